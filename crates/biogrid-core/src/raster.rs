use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// How a raster layer is read at a point. Fixed per layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterSampling {
    /// Value of the cell containing the point.
    #[default]
    Nearest,
    /// Bilinear interpolation between the four surrounding cell centres.
    Bilinear,
}

/// A single-band raster layer, row-major, pixel-is-area.
/// Row 0 covers the `min_y` edge. Coordinate math uses f64; cell values f32.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterLayer {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    /// Cells holding this value read as null.
    #[serde(default)]
    pub nodata: Option<f32>,
    #[serde(default)]
    pub sampling: RasterSampling,
}

impl RasterLayer {
    /// Create a layer covering the given extent, filled with `fill`.
    pub fn new(width: usize, height: usize, min_x: f64, max_x: f64, min_y: f64, max_y: f64, fill: f32) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            min_x,
            max_x,
            min_y,
            max_y,
            nodata: None,
            sampling: RasterSampling::Nearest,
        }
    }

    pub fn with_sampling(mut self, sampling: RasterSampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_nodata(mut self, nodata: f32) -> Self {
        self.nodata = Some(nodata);
        self
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    fn cell_width(&self) -> f64 {
        (self.max_x - self.min_x) / self.width as f64
    }

    fn cell_height(&self) -> f64 {
        (self.max_y - self.min_y) / self.height as f64
    }

    /// Cell value, or None for nodata and for cells missing from a short
    /// `data` buffer.
    fn value(&self, row: usize, col: usize) -> Option<f32> {
        let v = *self.data.get(row * self.width + col)?;
        if v.is_nan() || self.nodata == Some(v) {
            None
        } else {
            Some(v)
        }
    }

    /// Sample the layer at `p` with the layer's sampling method.
    /// Returns None outside the extent or on nodata.
    pub fn sample(&self, p: Point) -> Option<f64> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        if p.x < self.min_x || p.x > self.max_x || p.y < self.min_y || p.y > self.max_y {
            return None;
        }
        match self.sampling {
            RasterSampling::Nearest => self.sample_nearest(p),
            RasterSampling::Bilinear => self.sample_bilinear(p),
        }
    }

    fn sample_nearest(&self, p: Point) -> Option<f64> {
        // The max edge belongs to the last cell.
        let col = (((p.x - self.min_x) / self.cell_width()).floor() as usize).min(self.width - 1);
        let row = (((p.y - self.min_y) / self.cell_height()).floor() as usize).min(self.height - 1);
        self.value(row, col).map(f64::from)
    }

    fn sample_bilinear(&self, p: Point) -> Option<f64> {
        let fx = ((p.x - self.min_x) / self.cell_width() - 0.5).clamp(0.0, (self.width - 1) as f64);
        let fy = ((p.y - self.min_y) / self.cell_height() - 0.5).clamp(0.0, (self.height - 1) as f64);

        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;

        let v00 = f64::from(self.value(y0, x0)?);
        let v10 = f64::from(self.value(y0, x1)?);
        let v01 = f64::from(self.value(y1, x0)?);
        let v11 = f64::from(self.value(y1, x1)?);

        Some(
            v00 * (1.0 - tx) * (1.0 - ty)
                + v10 * tx * (1.0 - ty)
                + v01 * (1.0 - tx) * ty
                + v11 * tx * ty,
        )
    }
}
