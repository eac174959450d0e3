use crate::error::{CardstockError, CardstockResult};
use crate::model::StretchRule;
use crate::raster::Raster;

/// Resize the named horizontal bands of a source bitmap by their additive
/// pixel deltas. Rows outside a band are copied pixel-exact (shifted, never
/// rescaled); rows inside a band are resampled nearest-neighbor. Rules apply
/// in order, each against the output of the previous one.
pub fn stretch_rows(src: &Raster, rules: &[StretchRule]) -> CardstockResult<Raster> {
    let mut current = src.clone();
    for rule in rules {
        current = stretch_one(&current, rule)?;
    }
    Ok(current)
}

fn stretch_one(src: &Raster, rule: &StretchRule) -> CardstockResult<Raster> {
    let h = i64::from(src.height());
    let y0 = ((rule.band_y * h as f64).floor() as i64).clamp(0, h);
    let y1 = (((rule.band_y + rule.band_height) * h as f64).ceil() as i64).clamp(0, h);
    if y1 <= y0 {
        return Err(CardstockError::geometry(format!(
            "stretch region '{}' covers no rows",
            rule.name
        )));
    }

    let old_band = y1 - y0;
    let new_band = (old_band + i64::from(rule.delta_px)).max(0);
    if new_band == old_band {
        return Ok(src.clone());
    }

    let out_h = h - old_band + new_band;
    if out_h <= 0 {
        return Err(CardstockError::geometry(format!(
            "stretch region '{}' collapses the bitmap",
            rule.name
        )));
    }

    let width = src.width();
    let row_bytes = width as usize * 4;
    let mut data = Vec::with_capacity(out_h as usize * row_bytes);
    let src_data = src.data();
    let src_row = |y: i64| -> &[u8] {
        let start = y as usize * row_bytes;
        &src_data[start..start + row_bytes]
    };

    for y in 0..y0 {
        data.extend_from_slice(src_row(y));
    }
    for j in 0..new_band {
        // Nearest source row inside the band.
        let sy = y0 + (j * old_band + old_band / 2) / new_band;
        data.extend_from_slice(src_row(sy.min(y1 - 1)));
    }
    for y in y1..h {
        data.extend_from_slice(src_row(y));
    }

    Raster::from_premul(width, out_h as u32, data)
}
