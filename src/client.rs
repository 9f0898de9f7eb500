//! HTTP client for the telemetry backend.
//!
//! All timestamps go out as ISO-8601 UTC strings in URL-encoded query
//! parameters. Any non-success status becomes `ClientError::ServerError`
//! carrying the response body.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::{AppConfig, ConfigResponse};
use crate::model::{FluxGrid, FluxSample, OrbitState, TrackPoint, Window};
use crate::time::to_iso;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Timeout")]
    Timeout,
    #[error("Server error (status {status}): {message}")]
    ServerError { status: u16, message: String },
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() {
            ClientError::Connection(err.to_string())
        } else if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Http(err.to_string())
        }
    }
}

type Query<'a> = Vec<(&'a str, String)>;

#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ClientError> {
        let raw = format!("{}{}", self.base_url, path);
        let parsed = if query.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, query)
        };
        parsed.map_err(|e| ClientError::Http(format!("invalid URL {}: {}", raw, e)))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ClientError::ServerError {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ClientError> {
        let url = self.url(path, query)?;
        log::debug!("GET {}", url);
        let response = Self::check(self.client.get(url).send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    pub async fn get_bytes(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>, ClientError> {
        let url = self.url(path, query)?;
        log::debug!("GET {}", url);
        let response = Self::check(self.client.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn put<T: Serialize, R: DeserializeOwned>(&self, path: &str, body: &T) -> Result<R, ClientError> {
        let url = self.url(path, &[])?;
        log::debug!("PUT {}", url);
        let response = Self::check(self.client.put(url).json(body).send().await?).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }
}

/// Read side of the backend that the engine consumes.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn get_config(&self) -> Result<ConfigResponse, ClientError>;

    async fn get_state(&self, time: Option<DateTime<Utc>>) -> Result<OrbitState, ClientError>;

    async fn get_track(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_sec: Option<u32>,
    ) -> Result<Vec<TrackPoint>, ClientError>;

    async fn get_flux(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_sec: u32,
        percentile: &str,
    ) -> Result<Vec<FluxSample>, ClientError>;

    async fn get_windows(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_sec: u32,
        percentile: &str,
    ) -> Result<Vec<Window>, ClientError>;

    async fn get_flux_grid(
        &self,
        time: DateTime<Utc>,
        channel: &str,
        percentile: &str,
        alt_km: Option<f64>,
    ) -> Result<FluxGrid, ClientError>;
}

/// Typed wrapper over the backend REST endpoints.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: HttpClient,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http: HttpClient::new(base_url, timeout)?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    pub async fn update_config(&self, config: &AppConfig) -> Result<ConfigResponse, ClientError> {
        self.http.put("/config", config).await
    }

    /// Raw CSV bytes of the observation plan.
    pub async fn export_observation_plan(&self, start: DateTime<Utc>, hours: u32) -> Result<Vec<u8>, ClientError> {
        self.http
            .get_bytes(
                "/decision/plan/export",
                &[("start", to_iso(&start)), ("hours", hours.to_string())],
            )
            .await
    }
}

fn range_query<'a>(start: DateTime<Utc>, end: DateTime<Utc>) -> Query<'a> {
    vec![("start", to_iso(&start)), ("end", to_iso(&end))]
}

fn window_query<'a>(start: DateTime<Utc>, end: DateTime<Utc>, step_sec: u32, percentile: &str) -> Query<'a> {
    let mut query = range_query(start, end);
    query.push(("step", step_sec.to_string()));
    query.push(("percentile", percentile.to_string()));
    query
}

fn grid_query<'a>(time: DateTime<Utc>, channel: &str, percentile: &str, alt_km: Option<f64>) -> Query<'a> {
    let mut query = vec![
        ("time", to_iso(&time)),
        ("channel", channel.to_string()),
        ("percentile", percentile.to_string()),
    ];
    if let Some(alt) = alt_km {
        query.push(("alt_km", alt.to_string()));
    }
    query
}

#[async_trait]
impl TelemetrySource for BackendClient {
    async fn get_config(&self) -> Result<ConfigResponse, ClientError> {
        self.http.get("/config", &[]).await
    }

    async fn get_state(&self, time: Option<DateTime<Utc>>) -> Result<OrbitState, ClientError> {
        let query: Query = time.iter().map(|t| ("time", to_iso(t))).collect();
        self.http.get("/sat/state", &query).await
    }

    async fn get_track(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_sec: Option<u32>,
    ) -> Result<Vec<TrackPoint>, ClientError> {
        let mut query = range_query(start, end);
        if let Some(step) = step_sec.filter(|s| *s > 0) {
            query.push(("step", step.to_string()));
        }
        self.http.get("/sat/track", &query).await
    }

    async fn get_flux(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_sec: u32,
        percentile: &str,
    ) -> Result<Vec<FluxSample>, ClientError> {
        self.http
            .get("/env/flux/track", &window_query(start, end, step_sec, percentile))
            .await
    }

    async fn get_windows(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_sec: u32,
        percentile: &str,
    ) -> Result<Vec<Window>, ClientError> {
        self.http
            .get("/decision/windows", &window_query(start, end, step_sec, percentile))
            .await
    }

    async fn get_flux_grid(
        &self,
        time: DateTime<Utc>,
        channel: &str,
        percentile: &str,
        alt_km: Option<f64>,
    ) -> Result<FluxGrid, ClientError> {
        self.http
            .get("/env/flux/grid", &grid_query(time, channel, percentile, alt_km))
            .await
    }
}
