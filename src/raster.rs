use std::sync::Arc;

use crate::error::{CardstockError, CardstockResult};
use crate::geom::Canvas;

/// Pixel buffer in row-major premultiplied RGBA8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Raster {
    /// Fully transparent raster.
    pub fn new(canvas: Canvas) -> Self {
        Self {
            width: canvas.width,
            height: canvas.height,
            data: vec![0u8; canvas.width as usize * canvas.height as usize * 4],
        }
    }

    pub fn from_premul(width: u32, height: u32, data: Vec<u8>) -> CardstockResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| CardstockError::validation("raster size overflow"))?;
        if data.len() != expected {
            return Err(CardstockError::validation(format!(
                "raster buffer length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        if width == 0 || height == 0 {
            return Err(CardstockError::validation("raster dimensions must be > 0"));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Uniform fill from a premultiplied RGBA8 color.
    pub fn solid(width: u32, height: u32, px: [u8; 4]) -> CardstockResult<Self> {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&px);
        }
        Self::from_premul(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, px: [u8; 4]) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data[i..i + 4].copy_from_slice(&px);
    }

    /// Bilinear sample at fractional pixel coordinates, premultiplied domain.
    /// Coordinates outside the buffer resolve to transparent, so scaled
    /// placement fades out at the asset edge instead of smearing it.
    pub fn sample_bilinear(&self, fx: f64, fy: f64) -> [u8; 4] {
        let x = fx - 0.5;
        let y = fy - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let tx = x - x0;
        let ty = y - y0;

        let fetch = |ix: i64, iy: i64| -> [u8; 4] {
            if ix < 0 || iy < 0 || ix >= i64::from(self.width) || iy >= i64::from(self.height) {
                [0, 0, 0, 0]
            } else {
                self.pixel(ix as u32, iy as u32)
            }
        };

        let p00 = fetch(x0 as i64, y0 as i64);
        let p10 = fetch(x0 as i64 + 1, y0 as i64);
        let p01 = fetch(x0 as i64, y0 as i64 + 1);
        let p11 = fetch(x0 as i64 + 1, y0 as i64 + 1);

        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = f64::from(p00[c]) * (1.0 - tx) + f64::from(p10[c]) * tx;
            let bot = f64::from(p01[c]) * (1.0 - tx) + f64::from(p11[c]) * tx;
            out[c] = (top * (1.0 - ty) + bot * ty).round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

/// Shared handle used by asset sources; rasters are decoded once and reused
/// across renders.
pub type SharedRaster = Arc<Raster>;
