use kurbo::{Affine, Point};

use crate::error::{CardstockError, CardstockResult};

/// Output raster dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> CardstockResult<Self> {
        if width == 0 || height == 0 {
            return Err(CardstockError::validation("Canvas dimensions must be > 0"));
        }
        Ok(Self { width, height })
    }
}

/// Card-relative placement rectangle. All fields are fractions of the card
/// width/height. Bounds may extend outside [0,1] (bleed and margin overlays),
/// and must never be clamped on that account.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub const FULL: Bounds = Bounds {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rasterizable bounds need positive extent; origin is unconstrained.
    pub fn validate_extent(&self) -> CardstockResult<()> {
        if !(self.width > 0.0) || !(self.height > 0.0) {
            return Err(CardstockError::geometry(format!(
                "bounds extent must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Convert to a pixel rect on `canvas`. Origin rounds down and the far
    /// edge rounds up so adjacent fractional regions never gap.
    pub fn to_pixels(&self, canvas: Canvas) -> CardstockResult<PixelRect> {
        self.validate_extent()?;
        let w = f64::from(canvas.width);
        let h = f64::from(canvas.height);

        let x0 = (self.x * w).floor();
        let y0 = (self.y * h).floor();
        let x1 = ((self.x + self.width) * w).ceil();
        let y1 = ((self.y + self.height) * h).ceil();

        Ok(PixelRect {
            x: x0 as i64,
            y: y0 as i64,
            width: (x1 - x0).max(1.0) as u32,
            height: (y1 - y0).max(1.0) as u32,
        })
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Affine map taking points in `source` to the matching points in `target`.
/// Used to place an asset authored for one rectangle into another.
pub fn map_between(source: Bounds, target: Bounds) -> CardstockResult<Affine> {
    source.validate_extent()?;
    target.validate_extent()?;

    let sx = target.width / source.width;
    let sy = target.height / source.height;
    Ok(Affine::translate((target.x, target.y))
        * Affine::scale_non_uniform(sx, sy)
        * Affine::translate((-source.x, -source.y)))
}

/// Remap a single point from `source` space to `target` space.
pub fn map_point_between(source: Bounds, target: Bounds, p: Point) -> CardstockResult<Point> {
    Ok(map_between(source, target)? * p)
}

/// Remap a whole rectangle from `source` space to `target` space. Used to
/// carry a mask (authored relative to a layer's native bounds) along when the
/// layer is moved or scaled.
pub fn map_rect_between(source: Bounds, target: Bounds, rect: Bounds) -> CardstockResult<Bounds> {
    let origin = map_point_between(source, target, Point::new(rect.x, rect.y))?;
    Ok(Bounds::new(
        origin.x,
        origin.y,
        rect.width * target.width / source.width,
        rect.height * target.height / source.height,
    ))
}

/// Integer rectangle in raster space. Origin may be negative when bounds
/// extend past the card edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Intersect with the canvas, returning the covered region or `None` when
    /// fully off-raster.
    pub fn clip_to(&self, canvas: Canvas) -> Option<PixelRect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.x + i64::from(self.width)).min(i64::from(canvas.width));
        let y1 = (self.y + i64::from(self.height)).min(i64::from(canvas.height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect {
            x: x0,
            y: y0,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_pixels_floor_origin_ceil_extent() {
        let canvas = Canvas {
            width: 100,
            height: 100,
        };
        let r = Bounds::new(0.105, 0.105, 0.4, 0.4).to_pixels(canvas).unwrap();
        assert_eq!((r.x, r.y), (10, 10));
        // Far edge at 50.5 rounds up to 51.
        assert_eq!((r.width, r.height), (41, 41));
    }

    #[test]
    fn adjacent_bounds_never_gap() {
        let canvas = Canvas {
            width: 97,
            height: 97,
        };
        let top = Bounds::new(0.0, 0.0, 1.0, 0.33).to_pixels(canvas).unwrap();
        let bottom = Bounds::new(0.0, 0.33, 1.0, 0.67).to_pixels(canvas).unwrap();
        assert!(top.y + i64::from(top.height) >= bottom.y);
    }

    #[test]
    fn bleed_bounds_keep_negative_origin() {
        let canvas = Canvas {
            width: 100,
            height: 100,
        };
        let r = Bounds::new(-0.05, -0.05, 1.1, 1.1).to_pixels(canvas).unwrap();
        assert_eq!((r.x, r.y), (-5, -5));
        assert_eq!((r.width, r.height), (110, 110));
        let clipped = r.clip_to(canvas).unwrap();
        assert_eq!((clipped.x, clipped.y), (0, 0));
        assert_eq!((clipped.width, clipped.height), (100, 100));
    }

    #[test]
    fn map_between_remaps_corners() {
        let og = Bounds::new(0.0, 0.0, 0.5, 0.5);
        let placed = Bounds::new(0.25, 0.5, 0.25, 0.25);
        let m = map_between(og, placed).unwrap();
        let p = m * Point::new(0.0, 0.0);
        assert!((p.x - 0.25).abs() < 1e-12 && (p.y - 0.5).abs() < 1e-12);
        let q = m * Point::new(0.5, 0.5);
        assert!((q.x - 0.5).abs() < 1e-12 && (q.y - 0.75).abs() < 1e-12);
    }

    #[test]
    fn map_rect_between_identity_and_shift() {
        let same = Bounds::new(0.1, 0.1, 0.5, 0.5);
        let rect = Bounds::new(0.2, 0.2, 0.1, 0.1);
        let out = map_rect_between(same, same, rect).unwrap();
        assert_eq!(out, rect);

        // Target twice as wide: the rect scales and shifts with it.
        let target = Bounds::new(0.1, 0.1, 1.0, 1.0);
        let scaled = map_rect_between(same, target, rect).unwrap();
        assert!((scaled.width - 0.2).abs() < 1e-12);
        assert!((scaled.x - 0.3).abs() < 1e-12);
    }

    #[test]
    fn map_between_rejects_degenerate_bounds() {
        let flat = Bounds::new(0.0, 0.0, 0.0, 1.0);
        assert!(map_between(flat, Bounds::FULL).is_err());
        assert!(map_between(Bounds::FULL, flat).is_err());
    }

    #[test]
    fn clip_fully_off_raster_is_none() {
        let canvas = Canvas {
            width: 10,
            height: 10,
        };
        let r = PixelRect {
            x: 20,
            y: 0,
            width: 5,
            height: 5,
        };
        assert!(r.clip_to(canvas).is_none());
    }
}
