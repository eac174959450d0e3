use crate::composite_cpu::over;
use crate::raster::Raster;

/// Per-layer HSL adjustment. Hue is additive degrees, saturation and
/// lightness are additive percent points clamped into [0, 100].
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HslShift {
    pub hue: f64,
    pub saturation: f64,
    pub lightness: f64,
}

impl HslShift {
    pub fn is_identity(&self) -> bool {
        self.hue == 0.0 && self.saturation == 0.0 && self.lightness == 0.0
    }
}

/// Mix ratio of the flat color overlay against the HSL-shifted pixel.
const OVERLAY_MIX: f64 = 0.75;

/// Apply the HSL shift and optional flat color overlay to every non-transparent
/// pixel. Fully transparent pixels are left untouched so empty regions never
/// pick up color.
///
/// With `preserve_alpha` the alpha plane is copied back verbatim and the
/// overlay only re-mixes RGB; without it the overlay alpha-composites on top,
/// which pushes semi-transparent coverage toward opaque. Overlay assets that
/// get re-rendered repeatedly set `preserve_alpha` so coverage never drifts.
pub fn tint_in_place(
    raster: &mut Raster,
    shift: HslShift,
    overlay: Option<[u8; 3]>,
    preserve_alpha: bool,
) {
    if shift.is_identity() && overlay.is_none() {
        return;
    }

    for px in raster.data_mut().chunks_exact_mut(4) {
        let a = px[3];
        if a == 0 {
            continue;
        }

        let [mut r, mut g, mut b] = unpremultiply([px[0], px[1], px[2]], a);

        if !shift.is_identity() {
            let (h, s, l) = rgb_to_hsl(r, g, b);
            let h = (h + shift.hue).rem_euclid(360.0);
            let s = (s * 100.0 + shift.saturation).clamp(0.0, 100.0) / 100.0;
            let l = (l * 100.0 + shift.lightness).clamp(0.0, 100.0) / 100.0;
            let (nr, ng, nb) = hsl_to_rgb(h, s, l);
            r = nr;
            g = ng;
            b = nb;
        }

        if let Some(color) = overlay {
            if preserve_alpha {
                r = mix_u8(r, color[0], OVERLAY_MIX);
                g = mix_u8(g, color[1], OVERLAY_MIX);
                b = mix_u8(b, color[2], OVERLAY_MIX);
            } else {
                let base = premultiply([r, g, b], a);
                let cov = (OVERLAY_MIX * 255.0).round() as u8;
                let src = premultiply(color, cov);
                let out = over(base, [src[0], src[1], src[2], cov], 1.0);
                px.copy_from_slice(&out);
                continue;
            }
        }

        let out = premultiply([r, g, b], a);
        px[0] = out[0];
        px[1] = out[1];
        px[2] = out[2];
        px[3] = a;
    }
}

fn mix_u8(a: u8, b: u8, t: f64) -> u8 {
    (f64::from(a) * (1.0 - t) + f64::from(b) * t)
        .round()
        .clamp(0.0, 255.0) as u8
}

fn unpremultiply(rgb: [u8; 3], a: u8) -> [u8; 3] {
    if a == 0 || a == 255 {
        return rgb;
    }
    let a = u32::from(a);
    let un = |c: u8| -> u8 { ((u32::from(c) * 255 + a / 2) / a).min(255) as u8 };
    [un(rgb[0]), un(rgb[1]), un(rgb[2])]
}

fn premultiply(rgb: [u8; 3], a: u8) -> [u8; 4] {
    if a == 255 {
        return [rgb[0], rgb[1], rgb[2], 255];
    }
    let a16 = u16::from(a);
    let pm = |c: u8| -> u8 { ((u16::from(c) * a16 + 127) / 255) as u8 };
    [pm(rgb[0]), pm(rgb[1]), pm(rgb[2]), a]
}

/// Straight RGB to HSL; hue in degrees [0, 360), saturation/lightness in [0, 1].
fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let r = f64::from(r) / 255.0;
    let g = f64::from(g) / 255.0;
    let b = f64::from(b) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if max == min {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };

    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };

    (h * 60.0, s, l)
}

/// Standard HSL -> RGB conversion (sRGB space).
fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let h = (h % 360.0 + 360.0) % 360.0 / 360.0;
    let s = s.clamp(0.0, 1.0);
    let l = l.clamp(0.0, 1.0);

    let to_u8 = |x: f64| -> u8 { (x.clamp(0.0, 1.0) * 255.0).round() as u8 };

    if s == 0.0 {
        let v = to_u8(l);
        return (v, v, v);
    }

    fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
        if t < 0.0 {
            t += 1.0;
        }
        if t > 1.0 {
            t -= 1.0;
        }
        if t < 1.0 / 6.0 {
            return p + (q - p) * 6.0 * t;
        }
        if t < 1.0 / 2.0 {
            return q;
        }
        if t < 2.0 / 3.0 {
            return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
        }
        p
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);
    (to_u8(r), to_u8(g), to_u8(b))
}
