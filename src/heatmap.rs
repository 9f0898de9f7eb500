//! Flux grid to false-color raster.
//!
//! One altitude layer is mapped through a fixed logarithmic color ramp.
//! Grid row 0 is the southernmost latitude, so rows are flipped on write to
//! put north at the top of the image.

use std::io::Cursor;

use image::{ImageBuffer, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::FluxGrid;

pub const HEATMAP_ALPHA: u8 = 180;

/// `(position, rgb)` stops, linearly interpolated per channel.
pub const RAMP_STOPS: [(f64, [u8; 3]); 4] = [
    (0.0, [10, 20, 60]),
    (0.4, [0, 140, 200]),
    (0.7, [255, 200, 60]),
    (1.0, [240, 80, 30]),
];

/// Color for a ramp position; `t` is clamped to `[0, 1]`.
pub fn ramp_color(t: f64) -> [u8; 4] {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let (lo, hi) = RAMP_STOPS
        .windows(2)
        .map(|w| (w[0], w[1]))
        .find(|(_, hi)| t <= hi.0)
        .unwrap_or((RAMP_STOPS[2], RAMP_STOPS[3]));
    let local = (t - lo.0) / (hi.0 - lo.0);
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * local).round() as u8;
    [mix(lo.1[0], hi.1[0]), mix(lo.1[1], hi.1[1]), mix(lo.1[2], hi.1[2]), HEATMAP_ALPHA]
}

/// Range of the strictly positive values of a layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FluxStats {
    pub min: f64,
    pub max: f64,
}

/// Raw RGBA raster, row-major from the top-left pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
}

impl HeatmapImage {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn to_rgba_image(&self) -> Result<RgbaImage, EngineError> {
        let raw: Vec<u8> = self.pixels.iter().flatten().copied().collect();
        ImageBuffer::from_raw(self.width, self.height, raw)
            .ok_or_else(|| EngineError::Malformed("pixel buffer does not match image size".to_string()))
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, EngineError> {
        let img = self.to_rgba_image()?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// First altitude layer, checked against the grid axes and for finite values.
fn first_layer(grid: &FluxGrid) -> Result<Option<&[Vec<f64>]>, EngineError> {
    let Some(layer) = grid.values.first() else {
        return Ok(None);
    };
    let Some(cols) = layer.first().map(Vec::len) else {
        return Ok(None);
    };
    if cols == 0 {
        return Ok(None);
    }
    if layer.len() != grid.latitudes.len() || cols != grid.longitudes.len() {
        return Err(EngineError::Malformed(format!(
            "flux grid layer is {}x{}, axes are {} latitudes by {} longitudes",
            layer.len(),
            cols,
            grid.latitudes.len(),
            grid.longitudes.len()
        )));
    }
    for (y, row) in layer.iter().enumerate() {
        if row.len() != cols {
            return Err(EngineError::Malformed(format!(
                "flux grid row {} has {} columns, expected {}",
                y,
                row.len(),
                cols
            )));
        }
        if let Some(x) = row.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::Malformed(format!("flux grid cell ({}, {}) is not finite", x, y)));
        }
    }
    Ok(Some(layer.as_slice()))
}

fn positive_range(layer: &[Vec<f64>]) -> Option<FluxStats> {
    layer
        .iter()
        .flatten()
        .copied()
        .filter(|v| *v > 0.0)
        .fold(None, |acc: Option<FluxStats>, v| {
            Some(match acc {
                Some(s) => FluxStats { min: s.min.min(v), max: s.max.max(v) },
                None => FluxStats { min: v, max: v },
            })
        })
}

/// `{min, max}` of the positive cells in layer 0, `{0, 0}` when there are none.
pub fn flux_stats(grid: &FluxGrid) -> Result<FluxStats, EngineError> {
    Ok(first_layer(grid)?.and_then(positive_range).unwrap_or_default())
}

/// Rasterizes layer 0. Returns `None` when there is nothing to draw.
pub fn rasterize(grid: &FluxGrid) -> Result<Option<HeatmapImage>, EngineError> {
    let Some(layer) = first_layer(grid)? else {
        return Ok(None);
    };
    let Some(range) = positive_range(layer) else {
        return Ok(None);
    };

    let min_log = range.min.log10();
    let max_log = range.max.log10();
    let span = max_log - min_log;
    let position = |v: f64| {
        if v <= 0.0 || span <= 0.0 {
            0.0
        } else {
            (v.log10() - min_log) / span
        }
    };

    let height = layer.len();
    let width = layer[0].len();
    let mut pixels = vec![[0u8; 4]; width * height];
    for (y, row) in layer.iter().enumerate() {
        let out_row = height - 1 - y;
        for (x, v) in row.iter().enumerate() {
            pixels[out_row * width + x] = ramp_color(position(*v));
        }
    }
    Ok(Some(HeatmapImage {
        width: width as u32,
        height: height as u32,
        pixels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_instant;

    fn grid(layer: Vec<Vec<f64>>) -> FluxGrid {
        FluxGrid {
            t: parse_instant("2025-01-05T12:00:00Z").unwrap(),
            channel: "Je>1MeV".to_string(),
            percentile: "mean".to_string(),
            latitudes: (0..layer.len()).map(|i| -90.0 + i as f64).collect(),
            longitudes: (0..layer.first().map_or(0, Vec::len)).map(|i| i as f64).collect(),
            altitudes_km: vec![500.0],
            values: vec![layer],
        }
    }

    #[test]
    fn ramp_hits_stops() {
        assert_eq!(ramp_color(0.0), [10, 20, 60, 180]);
        assert_eq!(ramp_color(0.4), [0, 140, 200, 180]);
        assert_eq!(ramp_color(0.7), [255, 200, 60, 180]);
        assert_eq!(ramp_color(1.0), [240, 80, 30, 180]);
        assert_eq!(ramp_color(0.2), [5, 80, 130, 180]);
        assert_eq!(ramp_color(-3.0), ramp_color(0.0));
        assert_eq!(ramp_color(7.0), ramp_color(1.0));
    }

    #[test]
    fn uniform_grid_is_first_stop() {
        let img = rasterize(&grid(vec![vec![5.0; 3]; 2])).unwrap().unwrap();
        assert_eq!((img.width, img.height), (3, 2));
        assert!(img.pixels.iter().all(|p| *p == [10, 20, 60, 180]));
    }

    #[test]
    fn tenfold_cell_maps_to_top_of_ramp() {
        let img = rasterize(&grid(vec![vec![1.0, 1.0], vec![1.0, 10.0]])).unwrap().unwrap();
        // grid (1, 1) lands on image row 0
        assert_eq!(img.pixel(1, 0), [240, 80, 30, 180]);
        assert_eq!(img.pixel(0, 0), [10, 20, 60, 180]);
        assert_eq!(img.pixel(0, 1), [10, 20, 60, 180]);
        assert_eq!(img.pixel(1, 1), [10, 20, 60, 180]);
    }

    #[test]
    fn rows_are_flipped() {
        let img = rasterize(&grid(vec![vec![1.0], vec![100.0], vec![10000.0]])).unwrap().unwrap();
        assert_eq!(img.pixel(0, 2), ramp_color(0.0));
        assert_eq!(img.pixel(0, 1), ramp_color(0.5));
        assert_eq!(img.pixel(0, 0), ramp_color(1.0));
    }

    #[test]
    fn non_positive_cells_use_floor_color() {
        let img = rasterize(&grid(vec![vec![0.0, -2.0, 1.0, 1000.0]])).unwrap().unwrap();
        assert_eq!(img.pixel(0, 0), ramp_color(0.0));
        assert_eq!(img.pixel(1, 0), ramp_color(0.0));
        assert_eq!(img.pixel(3, 0), ramp_color(1.0));
    }

    #[test]
    fn nothing_to_draw() {
        assert!(rasterize(&grid(vec![vec![0.0, -1.0]])).unwrap().is_none());
        assert!(rasterize(&grid(vec![])).unwrap().is_none());
        assert!(rasterize(&grid(vec![vec![]])).unwrap().is_none());
        let mut no_layers = grid(vec![vec![1.0]]);
        no_layers.values.clear();
        assert!(rasterize(&no_layers).unwrap().is_none());
        assert_eq!(flux_stats(&no_layers).unwrap(), FluxStats { min: 0.0, max: 0.0 });
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = rasterize(&grid(vec![vec![1.0, 2.0], vec![3.0]])).unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
        assert!(flux_stats(&grid(vec![vec![1.0, 2.0], vec![3.0]])).is_err());
    }

    #[test]
    fn stats_cover_positive_values_only() {
        let stats = flux_stats(&grid(vec![vec![0.0, 3.0], vec![-5.0, 40.0]])).unwrap();
        assert_eq!(stats, FluxStats { min: 3.0, max: 40.0 });
        assert!(stats.min <= stats.max && stats.min >= 0.0);
        let empty = flux_stats(&grid(vec![vec![0.0, -1.0]])).unwrap();
        assert_eq!(empty, FluxStats::default());
    }

    #[test]
    fn png_round_trip_and_determinism() {
        let g = grid(vec![vec![1.0, 2.0, 4.0], vec![8.0, 0.0, 16.0]]);
        let a = rasterize(&g).unwrap().unwrap();
        let b = rasterize(&g).unwrap().unwrap();
        let png_a = a.encode_png().unwrap();
        assert_eq!(png_a, b.encode_png().unwrap());
        let decoded = image::load(Cursor::new(&png_a), ImageFormat::Png).unwrap().to_rgba8();
        assert_eq!((decoded.width(), decoded.height()), (a.width, a.height));
        let pixels: Vec<[u8; 4]> = decoded.pixels().map(|p| p.0).collect();
        assert_eq!(pixels, a.pixels);
    }

    #[test]
    fn only_first_altitude_layer_is_drawn() {
        let mut g = grid(vec![vec![1.0, 10.0], vec![1.0, 1.0]]);
        g.altitudes_km.push(1000.0);
        g.values.push(vec![vec![1e6, 0.5], vec![2.0, 1e9]]);

        let img = rasterize(&g).unwrap().unwrap();
        assert_eq!(img, rasterize(&grid(vec![vec![1.0, 10.0], vec![1.0, 1.0]])).unwrap().unwrap());
        assert_eq!(img.pixel(1, 1), ramp_color(1.0));
        assert_eq!(flux_stats(&g).unwrap(), FluxStats { min: 1.0, max: 10.0 });
    }

    #[test]
    fn layer_must_match_axes() {
        let mut short_lat = grid(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        short_lat.latitudes.pop();
        assert!(matches!(rasterize(&short_lat).unwrap_err(), EngineError::Malformed(_)));
        assert!(flux_stats(&short_lat).is_err());

        let mut long_lon = grid(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        long_lon.longitudes.push(2.0);
        assert!(matches!(rasterize(&long_lon).unwrap_err(), EngineError::Malformed(msg) if msg.contains("3 longitudes")));
    }
}
