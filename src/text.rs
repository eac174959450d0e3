use crate::card::{Card, PlaneswalkerInfo, SagaInfo};
use crate::error::{CardstockError, CardstockResult};
use crate::geom::Bounds;
use crate::model::{ColorDef, FramePackTemplate, TextFieldConfig};

/// Horizontal room reserved for the loyalty cost badge, as a fraction of card
/// width. A slot with a cost string starts after the badge; a costless slot
/// keeps the full width.
pub const COST_BADGE_WIDTH: f64 = 0.08;

/// Split the saga chapter column among the first `min(count, 4)` slots,
/// proportionally to their weights. Inactive slots get exactly zero height.
/// Pure function of its inputs: the same count always yields the same splits.
pub fn saga_heights(count: u32, weights: [u32; 4], region_height: f64) -> [f64; 4] {
    let n = count.min(4) as usize;
    let mut out = [0.0; 4];
    if n == 0 {
        return out;
    }

    let total: u32 = weights[..n].iter().sum();
    if total == 0 {
        let each = region_height / n as f64;
        for slot in out.iter_mut().take(n) {
            *slot = each;
        }
        return out;
    }

    for i in 0..n {
        out[i] = region_height * f64::from(weights[i]) / f64::from(total);
    }
    out
}

/// Bounds of the four saga ability fields. `None` marks an inactive slot.
pub fn saga_ability_bounds(info: &SagaInfo) -> [Option<Bounds>; 4] {
    let heights = saga_heights(info.count, info.abilities, info.height);
    let mut out = [None; 4];
    let mut y = info.y;
    for (slot, &h) in heights.iter().enumerate() {
        if h > 0.0 {
            out[slot] = Some(Bounds::new(info.x, y, info.width, h));
            y += h;
        }
    }
    out
}

/// An ability is active iff its allotted height is positive.
pub fn planeswalker_count(heights: [f64; 4]) -> u32 {
    heights.iter().filter(|h| **h > 0.0).count() as u32
}

/// Bounds of the four planeswalker ability fields. The fixed ability-box
/// height is redistributed across the active slots in proportion to their
/// allotments, stacked from `base_y` (bottom-up when inverted), with each
/// slot's fine offset applied last.
pub fn planeswalker_slots(info: &PlaneswalkerInfo) -> [Option<Bounds>; 4] {
    let mut out = [None; 4];
    let total: f64 = info.heights.iter().filter(|h| **h > 0.0).sum();
    if total <= 0.0 {
        return out;
    }

    let region_height = info.original_ability_bounds.height;
    let order: Vec<usize> = if info.invert {
        (0..4).rev().collect()
    } else {
        (0..4).collect()
    };

    let mut y = info.base_y;
    for slot in order {
        let h = info.heights[slot];
        if h <= 0.0 {
            continue;
        }
        let slot_height = region_height * h / total;
        out[slot] = Some(Bounds::new(
            info.x,
            y + info.ability_adjust[slot],
            info.width,
            slot_height,
        ));
        y += slot_height;
    }
    out
}

/// A slot with a cost string is shifted right of the loyalty badge and
/// narrowed by the same amount; a costless slot keeps the full, left-aligned
/// width. Required asymmetry, not an approximation.
pub fn adjust_planeswalker_text_bounds(slot: Bounds, cost: &str) -> Bounds {
    if cost.is_empty() {
        slot
    } else {
        Bounds::new(
            slot.x + COST_BADGE_WIDTH,
            slot.y,
            slot.width - COST_BADGE_WIDTH,
            slot.height,
        )
    }
}

/// One lexed unit of a raw field string. `{...}` groups resolve to style
/// toggles or inline symbols; everything else is words and whitespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token<'a> {
    Word(&'a str),
    Space,
    Newline,
    /// Inline symbol key, e.g. `w` for `{w}`, `t` for `{t}`.
    Symbol(&'a str),
    ItalicOn,
    ItalicOff,
    BoldOn,
    BoldOff,
}

/// Lex a raw field string left to right. Unterminated braces are kept as
/// literal text rather than dropped.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let next_special = rest.find(|c: char| c == '{' || c == '\n' || c.is_whitespace());
        match next_special {
            None => {
                out.push(Token::Word(rest));
                break;
            }
            Some(0) => {
                let c = rest.chars().next().expect("nonempty");
                if c == '\n' {
                    out.push(Token::Newline);
                    rest = &rest[1..];
                } else if c == '{' {
                    match rest.find('}') {
                        Some(close) => {
                            out.push(group_token(&rest[1..close]));
                            rest = &rest[close + 1..];
                        }
                        None => {
                            // Unterminated group: treat the brace as a word.
                            out.push(Token::Word(rest));
                            rest = "";
                        }
                    }
                } else {
                    out.push(Token::Space);
                    rest = &rest[c.len_utf8()..];
                }
            }
            Some(i) => {
                out.push(Token::Word(&rest[..i]));
                rest = &rest[i..];
            }
        }
    }
    out
}

fn group_token(inner: &str) -> Token<'_> {
    match inner {
        "i" => Token::ItalicOn,
        "/i" => Token::ItalicOff,
        "bold" => Token::BoldOn,
        "/bold" => Token::BoldOff,
        _ => Token::Symbol(inner),
    }
}

/// Font measurements needed by the wrapper. Kept as a seam so layout logic
/// tests run on fixed-advance metrics without real font bytes.
pub trait GlyphMetrics {
    fn advance(&self, c: char, size_px: f32) -> f32;
    fn line_height(&self, size_px: f32) -> f32;
}

impl GlyphMetrics for fontdue::Font {
    fn advance(&self, c: char, size_px: f32) -> f32 {
        self.metrics(c, size_px).advance_width
    }

    fn line_height(&self, size_px: f32) -> f32 {
        self.horizontal_line_metrics(size_px)
            .map(|m| m.new_line_size)
            .unwrap_or(size_px * 1.2)
    }
}

/// A token placed on a line, with the style spans resolved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacedToken<'a> {
    pub token: Token<'a>,
    pub italic: bool,
    pub bold: bool,
    /// Left edge relative to the line start.
    pub x: f32,
    pub width: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayoutLine<'a> {
    pub items: Vec<PlacedToken<'a>>,
    pub width: f32,
}

/// Inline symbols render as square bitmaps sized to the font.
fn token_width(token: &Token<'_>, metrics: &dyn GlyphMetrics, size_px: f32) -> f32 {
    match token {
        Token::Word(w) => w.chars().map(|c| metrics.advance(c, size_px)).sum(),
        Token::Space => metrics.advance(' ', size_px),
        Token::Symbol(_) => size_px,
        _ => 0.0,
    }
}

/// Greedy word wrap into `max_width`. `one_line` never breaks; overflow is
/// clipped by the painter instead.
pub fn wrap_tokens<'a>(
    tokens: &[Token<'a>],
    metrics: &dyn GlyphMetrics,
    size_px: f32,
    max_width: f32,
    one_line: bool,
) -> Vec<LayoutLine<'a>> {
    let mut lines = vec![LayoutLine::default()];
    let mut italic = false;
    let mut bold = false;

    for token in tokens {
        match token {
            Token::ItalicOn => italic = true,
            Token::ItalicOff => italic = false,
            Token::BoldOn => bold = true,
            Token::BoldOff => bold = false,
            Token::Newline => {
                if !one_line {
                    lines.push(LayoutLine::default());
                }
            }
            Token::Space | Token::Word(_) | Token::Symbol(_) => {
                let width = token_width(token, metrics, size_px);
                let line = lines.last_mut().expect("at least one line");

                let breaks = !one_line
                    && !matches!(token, Token::Space)
                    && !line.items.is_empty()
                    && line.width + width > max_width;
                let line = if breaks {
                    lines.push(LayoutLine::default());
                    lines.last_mut().expect("just pushed")
                } else {
                    line
                };

                // Leading spaces on a wrapped line are dropped.
                if matches!(token, Token::Space) && line.items.is_empty() {
                    continue;
                }

                line.items.push(PlacedToken {
                    token: *token,
                    italic,
                    bold,
                    x: line.width,
                    width,
                });
                line.width += width;
            }
        }
    }

    // Trailing spaces never count toward alignment.
    for line in &mut lines {
        while let Some(last) = line.items.last() {
            if matches!(last.token, Token::Space) {
                line.width = last.x;
                line.items.pop();
            } else {
                break;
            }
        }
    }
    lines
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextLayout<'a> {
    pub lines: Vec<LayoutLine<'a>>,
    pub size_px: f32,
    pub line_height: f32,
}

impl TextLayout<'_> {
    pub fn text_height(&self) -> f32 {
        self.lines.len() as f32 * self.line_height
    }
}

const MIN_FIT_SCALE: f32 = 0.3;
const FIT_ITERATIONS: u32 = 12;

/// Auto-fit: binary search over font scale until the wrapped text fits the
/// box (height for paragraphs, width for one-liners). Returns the layout at
/// the largest fitting size, or at the floor scale when nothing fits.
pub fn fit_tokens<'a>(
    tokens: &[Token<'a>],
    metrics: &dyn GlyphMetrics,
    base_size_px: f32,
    box_width: f32,
    box_height: f32,
    one_line: bool,
) -> TextLayout<'a> {
    let layout_at = |size_px: f32| -> TextLayout<'a> {
        let lines = wrap_tokens(tokens, metrics, size_px, box_width, one_line);
        TextLayout {
            lines,
            size_px,
            line_height: metrics.line_height(size_px),
        }
    };

    let fits = |layout: &TextLayout<'_>| -> bool {
        if one_line {
            layout.lines.iter().all(|l| l.width <= box_width)
        } else {
            layout.text_height() <= box_height
        }
    };

    let best = layout_at(base_size_px);
    if fits(&best) {
        return best;
    }

    let mut lo = base_size_px * MIN_FIT_SCALE;
    let mut hi = base_size_px;
    for _ in 0..FIT_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        if fits(&layout_at(mid)) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    layout_at(lo)
}

/// A text field with its geometry and color resolved for this render pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedField {
    pub name: String,
    pub text: String,
    pub config: TextFieldConfig,
    /// `None` only for fields laid out via explicit mana placement.
    pub bounds: Option<Bounds>,
    pub color: ColorDef,
}

fn effective_color(config: &TextFieldConfig, active_names: &[&str]) -> ColorDef {
    if let Some(rule) = &config.conditional_color {
        if active_names.iter().any(|n| n.contains(&rule.contains)) {
            return rule.color;
        }
    }
    config.color
}

fn ability_slot(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("ability")?;
    let slot: usize = digits.parse().ok()?;
    (slot < 4).then_some(slot)
}

/// Resolve the active text fields for a render pass: static template fields
/// plus dynamically activated ones, with saga/planeswalker geometry computed
/// from the card's sub-state. Inactive ability slots are omitted silently;
/// fields whose adjusted bounds collapse produce a `LayoutError` entry and
/// are omitted from the render.
pub fn resolve_fields(
    template: &FramePackTemplate,
    card: &Card,
) -> (Vec<ResolvedField>, Vec<(String, CardstockError)>) {
    let active_names = card.active_names();
    let saga_slots = card.saga.as_ref().map(saga_ability_bounds);
    let pw_slots = card.planeswalker.as_ref().map(planeswalker_slots);

    let mut fields = Vec::new();
    let mut problems = Vec::new();

    for (name, field) in &card.text {
        let slot = ability_slot(name);

        let bounds = match (slot, &saga_slots, &pw_slots) {
            (Some(i), Some(slots), _) if template.is_saga() => match slots[i] {
                Some(b) => Some(b),
                None => continue, // inactive chapter, not an error
            },
            (Some(i), _, Some(slots)) if template.is_planeswalker() => match slots[i] {
                Some(b) => {
                    let cost = card
                        .planeswalker
                        .as_ref()
                        .map(|pw| pw.abilities[i].as_str())
                        .unwrap_or("");
                    Some(adjust_planeswalker_text_bounds(b, cost))
                }
                None => continue,
            },
            _ => field.config.bounds,
        };

        if let Some(b) = bounds {
            if b.height == 0.0 {
                continue; // inactive slot
            }
            if let Err(e) = check_field_extent(b) {
                problems.push((name.clone(), e));
                continue;
            }
        } else if field.config.mana_placement.is_none() {
            problems.push((
                name.clone(),
                CardstockError::layout(format!("field '{name}' has no geometry")),
            ));
            continue;
        }

        fields.push(ResolvedField {
            name: name.clone(),
            text: field.text.clone(),
            config: field.config.clone(),
            bounds,
            color: effective_color(&field.config, &active_names),
        });
    }

    (fields, problems)
}

fn check_field_extent(b: Bounds) -> CardstockResult<()> {
    if !(b.width > 0.0) || !(b.height > 0.0) {
        return Err(CardstockError::layout(format!(
            "text bounds collapsed to {}x{}",
            b.width, b.height
        )));
    }
    Ok(())
}
