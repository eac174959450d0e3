use std::collections::HashMap;
use std::sync::Arc;

use crate::assets::{AssetSource, FontSource};
use crate::composite_cpu::{blit_over, over};
use crate::error::{CardstockError, CardstockResult};
use crate::geom::{Canvas, PixelRect};
use crate::model::AssetRef;
use crate::raster::Raster;
use crate::text::{GlyphMetrics, PlacedToken, ResolvedField, Token, fit_tokens, tokenize};

/// Inline symbol bitmaps resolve through the asset source under a fixed
/// prefix, so `{w}` looks up `symbols/w.png`.
pub fn symbol_ref(key: &str) -> AssetRef {
    AssetRef::new(format!("symbols/{key}.png"))
}

/// Font and symbol access for one paint pass.
pub struct TextPaintContext<'a> {
    pub fonts: &'a dyn FontSource,
    pub symbols: &'a dyn AssetSource,
}

#[derive(Clone)]
struct GlyphBitmap {
    metrics: fontdue::Metrics,
    coverage: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct GlyphKey {
    c: char,
    size_bits: u32,
    italic: bool,
    bold: bool,
}

/// Paints resolved text fields onto the accumulator. Rasterized glyphs are
/// cached per (char, size, style) within the painter's lifetime.
pub struct TextPainter<'a> {
    ctx: TextPaintContext<'a>,
    glyph_cache: HashMap<GlyphKey, GlyphBitmap>,
}

impl<'a> TextPainter<'a> {
    pub fn new(ctx: TextPaintContext<'a>) -> Self {
        Self {
            ctx,
            glyph_cache: HashMap::new(),
        }
    }

    /// Paint one field. Missing fonts and degenerate geometry are errors the
    /// caller records; a missing inline symbol only skips that symbol.
    pub fn paint_field(
        &mut self,
        acc: &mut Raster,
        canvas: Canvas,
        field: &ResolvedField,
    ) -> CardstockResult<()> {
        if field.text.is_empty() {
            return Ok(());
        }
        let size_px = (field.config.size * f64::from(canvas.height)) as f32;
        if size_px <= 0.0 {
            return Err(CardstockError::layout(format!(
                "field '{}': non-positive font size",
                field.name
            )));
        }

        let tokens = tokenize(&field.text);

        if let Some(spots) = &field.config.mana_placement {
            return self.paint_mana_row(acc, canvas, field, &tokens, spots);
        }

        let bounds = field
            .bounds
            .ok_or_else(|| CardstockError::layout(format!("field '{}' has no bounds", field.name)))?;
        let rect = bounds.to_pixels(canvas).map_err(|e| {
            CardstockError::layout(format!("field '{}': {e}", field.name))
        })?;

        let font = self
            .ctx
            .fonts
            .font(&field.config.font, false, false)
            .ok_or_else(|| {
                CardstockError::asset_unavailable(format!("font '{}'", field.config.font))
            })?;

        let layout = fit_tokens(
            &tokens,
            &*font,
            size_px,
            rect.width as f32,
            rect.height as f32,
            field.config.one_line,
        );

        let ascent = font
            .horizontal_line_metrics(layout.size_px)
            .map(|m| m.ascent)
            .unwrap_or(layout.size_px * 0.8);

        // One-liners center vertically in their box; paragraphs start at the top.
        let top = if field.config.one_line {
            rect.y as f32 + (rect.height as f32 - layout.line_height).max(0.0) / 2.0
        } else {
            rect.y as f32
        };

        let color = field.color.to_rgba8_straight();
        let shadow_dx = (field.config.shadow_x * f64::from(canvas.width)) as f32;
        let shadow_dy = (field.config.shadow_y * f64::from(canvas.height)) as f32;
        let outline_px = (field.config.outline_width * f64::from(canvas.height)) as f32;

        for (line_idx, line) in layout.lines.iter().enumerate() {
            let align_pad = match field.config.align {
                crate::model::Align::Left => 0.0,
                crate::model::Align::Center => (rect.width as f32 - line.width).max(0.0) / 2.0,
                crate::model::Align::Right => (rect.width as f32 - line.width).max(0.0),
            };
            let line_top = top + line_idx as f32 * layout.line_height;
            let baseline = line_top + ascent;

            for item in &line.items {
                let pen_x = rect.x as f32 + align_pad + item.x;
                match item.token {
                    Token::Word(word) => {
                        let styled = self
                            .ctx
                            .fonts
                            .font(&field.config.font, item.italic, item.bold)
                            .unwrap_or_else(|| font.clone());
                        if outline_px > 0.0 {
                            let o = outline_px.max(1.0);
                            for (ox, oy) in [
                                (-o, 0.0),
                                (o, 0.0),
                                (0.0, -o),
                                (0.0, o),
                                (-o, -o),
                                (-o, o),
                                (o, -o),
                                (o, o),
                            ] {
                                self.draw_word(
                                    acc, word, item, &styled, layout.size_px,
                                    pen_x + ox, baseline + oy, [0, 0, 0, color[3]], rect,
                                );
                            }
                        }
                        if shadow_dx != 0.0 || shadow_dy != 0.0 {
                            self.draw_word(
                                acc, word, item, &styled, layout.size_px,
                                pen_x + shadow_dx, baseline + shadow_dy,
                                [0, 0, 0, color[3]], rect,
                            );
                        }
                        self.draw_word(
                            acc, word, item, &styled, layout.size_px, pen_x, baseline, color, rect,
                        );
                    }
                    Token::Symbol(key) => {
                        self.draw_symbol(acc, key, pen_x, line_top, layout.size_px);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Explicit per-glyph placement: symbols from the raw text land on the
    /// configured spots in order. Non-symbol tokens do not consume spots.
    fn paint_mana_row(
        &mut self,
        acc: &mut Raster,
        canvas: Canvas,
        field: &ResolvedField,
        tokens: &[Token<'_>],
        spots: &[crate::model::ManaSpot],
    ) -> CardstockResult<()> {
        let symbols = tokens.iter().filter_map(|t| match t {
            Token::Symbol(key) => Some(*key),
            _ => None,
        });

        for (key, spot) in symbols.zip(spots.iter()) {
            let size = spot.size.unwrap_or(field.config.size);
            let size_px = (size * f64::from(canvas.height)) as f32;
            let x = (spot.x * f64::from(canvas.width)) as f32;
            let y = (spot.y * f64::from(canvas.height)) as f32;
            self.draw_symbol(acc, key, x, y, size_px);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_word(
        &mut self,
        acc: &mut Raster,
        word: &str,
        item: &PlacedToken<'_>,
        font: &Arc<fontdue::Font>,
        size_px: f32,
        pen_x: f32,
        baseline: f32,
        color: [u8; 4],
        clip: PixelRect,
    ) {
        let mut x = pen_x;
        for c in word.chars() {
            let key = GlyphKey {
                c,
                size_bits: size_px.to_bits(),
                italic: item.italic,
                bold: item.bold,
            };
            let glyph = self.glyph_cache.entry(key).or_insert_with(|| {
                let (metrics, coverage) = font.rasterize(c, size_px);
                GlyphBitmap { metrics, coverage }
            });

            draw_coverage(acc, glyph, x, baseline, color, clip);
            x += font.advance(c, size_px);
        }
    }

    fn draw_symbol(&mut self, acc: &mut Raster, key: &str, x: f32, y: f32, size_px: f32) {
        let asset = symbol_ref(key);
        match self.ctx.symbols.fetch(&asset) {
            Ok(raster) => {
                let place = PixelRect {
                    x: x.round() as i64,
                    y: y.round() as i64,
                    width: size_px.round().max(1.0) as u32,
                    height: size_px.round().max(1.0) as u32,
                };
                blit_over(acc, &raster, place, 1.0, &[]);
            }
            Err(error) => {
                tracing::debug!(symbol = key, %error, "inline symbol unavailable, skipped");
            }
        }
    }
}

fn draw_coverage(
    acc: &mut Raster,
    glyph: &GlyphBitmap,
    pen_x: f32,
    baseline: f32,
    color: [u8; 4],
    clip: PixelRect,
) {
    let left = pen_x.round() as i64 + i64::from(glyph.metrics.xmin);
    let top = baseline.round() as i64
        - i64::from(glyph.metrics.ymin)
        - glyph.metrics.height as i64;

    let clip_x1 = clip.x + i64::from(clip.width);
    let clip_y1 = clip.y + i64::from(clip.height);

    for gy in 0..glyph.metrics.height {
        for gx in 0..glyph.metrics.width {
            let cov = glyph.coverage[gy * glyph.metrics.width + gx];
            if cov == 0 {
                continue;
            }
            let px = left + gx as i64;
            let py = top + gy as i64;
            if px < clip.x.max(0) || py < clip.y.max(0) || px >= clip_x1 || py >= clip_y1 {
                continue;
            }
            if px < 0
                || py < 0
                || px >= i64::from(acc.width())
                || py >= i64::from(acc.height())
            {
                continue;
            }

            let a = ((u16::from(color[3]) * u16::from(cov) + 127) / 255) as u8;
            let pm = |c: u8| -> u8 { ((u16::from(c) * u16::from(a) + 127) / 255) as u8 };
            let src = [pm(color[0]), pm(color[1]), pm(color[2]), a];
            let d = acc.pixel(px as u32, py as u32);
            acc.put_pixel(px as u32, py as u32, over(d, src, 1.0));
        }
    }
}
