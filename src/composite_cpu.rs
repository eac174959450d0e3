use crate::geom::{Canvas, PixelRect};
use crate::raster::Raster;

pub type PremulRgba8 = [u8; 4];

/// Source-over blend of one premultiplied pixel, scaled by `opacity`.
pub fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255(u16::from(dst[3]), inv));

    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(sc, dc);
    }
    out
}

/// Destination-out: the source alpha subtracts coverage from the destination.
/// Source color is ignored; this is the cutout/bevel operator.
pub fn erase(dst: PremulRgba8, src_alpha: u8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src_alpha == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src_alpha), op);
    let keep = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = mul_div255(u16::from(dst[i]), keep);
    }
    out
}

/// Alpha-intersection: scale a premultiplied pixel by mask coverage. Masks
/// gate visibility and contribute no color, so all four channels scale.
pub fn mask_mul(px: PremulRgba8, coverage: u8) -> PremulRgba8 {
    if coverage == 255 {
        return px;
    }
    let cov = u16::from(coverage);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = mul_div255(u16::from(px[i]), cov);
    }
    out
}

/// A mask bitmap together with its placement rect on the card raster.
pub struct MaskPlacement<'a> {
    pub raster: &'a Raster,
    pub rect: PixelRect,
}

impl MaskPlacement<'_> {
    /// Coverage of a canvas pixel center. Outside the mask's rect coverage is
    /// zero, which gates the layer down to the mask's silhouette.
    fn coverage_at(&self, px: i64, py: i64) -> u8 {
        let local_x = px as f64 + 0.5 - self.rect.x as f64;
        let local_y = py as f64 + 0.5 - self.rect.y as f64;
        if local_x < 0.0
            || local_y < 0.0
            || local_x > f64::from(self.rect.width)
            || local_y > f64::from(self.rect.height)
        {
            return 0;
        }
        let sx = local_x / f64::from(self.rect.width) * f64::from(self.raster.width());
        let sy = local_y / f64::from(self.rect.height) * f64::from(self.raster.height());
        self.raster.sample_bilinear(sx, sy)[3]
    }
}

fn combined_coverage(masks: &[MaskPlacement<'_>], px: i64, py: i64) -> u8 {
    let mut cov = 255u8;
    for m in masks {
        cov = mul_div255(u16::from(cov), u16::from(m.coverage_at(px, py)));
        if cov == 0 {
            break;
        }
    }
    cov
}

/// Composite `src` onto `dst` at `place` with source-over blending. Each mask
/// multiplies into the source alpha first (alpha-intersection), so the result
/// is identical to gating the source bitmap and then blending it.
pub fn blit_over(
    dst: &mut Raster,
    src: &Raster,
    place: PixelRect,
    opacity: f32,
    masks: &[MaskPlacement<'_>],
) {
    let canvas = Canvas {
        width: dst.width(),
        height: dst.height(),
    };
    let Some(clipped) = place.clip_to(canvas) else {
        return;
    };

    for py in clipped.y..clipped.y + i64::from(clipped.height) {
        for px in clipped.x..clipped.x + i64::from(clipped.width) {
            let sx = (px as f64 + 0.5 - place.x as f64) / f64::from(place.width)
                * f64::from(src.width());
            let sy = (py as f64 + 0.5 - place.y as f64) / f64::from(place.height)
                * f64::from(src.height());
            let mut s = src.sample_bilinear(sx, sy);
            if s[3] == 0 {
                continue;
            }
            if !masks.is_empty() {
                let cov = combined_coverage(masks, px, py);
                if cov == 0 {
                    continue;
                }
                s = mask_mul(s, cov);
            }
            let d = dst.pixel(px as u32, py as u32);
            dst.put_pixel(px as u32, py as u32, over(d, s, opacity));
        }
    }
}

/// Composite `src` onto `dst` at `place` with destination-out semantics.
/// Erase layers are gated by their own alpha only; masks never apply.
pub fn blit_erase(dst: &mut Raster, src: &Raster, place: PixelRect, opacity: f32) {
    let canvas = Canvas {
        width: dst.width(),
        height: dst.height(),
    };
    let Some(clipped) = place.clip_to(canvas) else {
        return;
    };

    for py in clipped.y..clipped.y + i64::from(clipped.height) {
        for px in clipped.x..clipped.x + i64::from(clipped.width) {
            let sx = (px as f64 + 0.5 - place.x as f64) / f64::from(place.width)
                * f64::from(src.width());
            let sy = (py as f64 + 0.5 - place.y as f64) / f64::from(place.height)
                * f64::from(src.height());
            let sa = src.sample_bilinear(sx, sy)[3];
            if sa == 0 {
                continue;
            }
            let d = dst.pixel(px as u32, py as u32);
            dst.put_pixel(px as u32, py as u32, erase(d, sa, opacity));
        }
    }
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}
