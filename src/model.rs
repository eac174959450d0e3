use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CardstockError, CardstockResult};
use crate::geom::Bounds;

/// Opaque asset identifier. The engine never interprets it beyond equality;
/// the surrounding application resolves it to bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(pub String);

impl AssetRef {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Thumbnail naming convention used by the surrounding UI:
    /// `name.png` becomes `nameThumb.png`. Refs without an extension get the
    /// suffix appended.
    pub fn thumb(&self) -> AssetRef {
        match self.0.rsplit_once('.') {
            Some((stem, ext)) => AssetRef(format!("{stem}Thumb.{ext}")),
            None => AssetRef(format!("{}Thumb", self.0)),
        }
    }
}

/// Straight (non-premultiplied) color, normalized 0..1 per channel.
/// Deserializes from `#RRGGBB`/`#RRGGBBAA` hex, an `[r,g,b]`/`[r,g,b,a]`
/// array, or an `{r,g,b}` object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorDef {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ColorDef {
    pub const BLACK: ColorDef = ColorDef {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub const WHITE: ColorDef = ColorDef {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };

    pub fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_rgba8_straight(self) -> [u8; 4] {
        let to_u8 = |x: f64| -> u8 { (x.clamp(0.0, 1.0) * 255.0).round() as u8 };
        [to_u8(self.r), to_u8(self.g), to_u8(self.b), to_u8(self.a)]
    }

    pub fn to_rgb8(self) -> [u8; 3] {
        let [r, g, b, _] = self.to_rgba8_straight();
        [r, g, b]
    }

    pub fn to_rgba8_premul(self) -> [u8; 4] {
        let [r, g, b, a] = self.to_rgba8_straight();
        let a16 = u16::from(a);
        let pm = |c: u8| -> u8 { ((u16::from(c) * a16 + 127) / 255) as u8 };
        [pm(r), pm(g), pm(b), a]
    }
}

impl<'de> Deserialize<'de> for ColorDef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Hex(String),
            RgbaObj {
                r: f64,
                g: f64,
                b: f64,
                #[serde(default = "one")]
                a: f64,
            },
            Arr(Vec<f64>),
        }

        fn one() -> f64 {
            1.0
        }

        match Repr::deserialize(deserializer)? {
            Repr::Hex(s) => parse_hex(&s).map_err(serde::de::Error::custom),
            Repr::RgbaObj { r, g, b, a } => Ok(Self::rgba(r, g, b, a)),
            Repr::Arr(v) => {
                if v.len() == 3 {
                    Ok(Self::rgba(v[0], v[1], v[2], 1.0))
                } else if v.len() == 4 {
                    Ok(Self::rgba(v[0], v[1], v[2], v[3]))
                } else {
                    Err(serde::de::Error::custom(
                        "color array must have len 3 ([r,g,b]) or 4 ([r,g,b,a])",
                    ))
                }
            }
        }
    }
}

fn parse_hex(s: &str) -> Result<ColorDef, String> {
    let s = s.trim();
    let s = s.strip_prefix('#').unwrap_or(s);

    fn hex_byte(pair: &str) -> Result<u8, String> {
        u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte \"{pair}\""))
    }

    let (r, g, b, a) = match s.len() {
        6 => {
            let r = hex_byte(&s[0..2])?;
            let g = hex_byte(&s[2..4])?;
            let b = hex_byte(&s[4..6])?;
            (r, g, b, 255)
        }
        8 => {
            let r = hex_byte(&s[0..2])?;
            let g = hex_byte(&s[2..4])?;
            let b = hex_byte(&s[4..6])?;
            let a = hex_byte(&s[6..8])?;
            (r, g, b, a)
        }
        _ => {
            return Err("hex color must be #RRGGBB or #RRGGBBAA (case-insensitive)".to_owned());
        }
    };

    Ok(ColorDef::rgba(
        (r as f64) / 255.0,
        (g as f64) / 255.0,
        (b as f64) / 255.0,
        (a as f64) / 255.0,
    ))
}

/// Named horizontal band of a layer's source bitmap whose height can be
/// adjusted independently of the rest of the asset. `band_y`/`band_height`
/// are fractions of the source bitmap height; `delta_px` is additive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StretchRule {
    pub name: String,
    pub band_y: f64,
    pub band_height: f64,
    #[serde(default)]
    pub delta_px: i32,
}

/// A mask bitmap whose alpha gates a layer's visibility. Masks may carry
/// their own placement bounds and the bounds they were authored at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskDescriptor {
    pub name: String,
    pub image: AssetRef,
    #[serde(default)]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub og_bounds: Option<Bounds>,
}

/// Immutable description of one renderable frame layer within a pack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub name: String,
    pub image: AssetRef,
    #[serde(default)]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub masks: Vec<MaskDescriptor>,
    /// When set, a maskless instance renders the full bitmap instead of
    /// triggering complementary expansion.
    #[serde(default)]
    pub no_default_mask: bool,
    /// Frame indices auto-instantiated beneath this layer when no mask is
    /// applied. Accepts a single index or a list in JSON.
    #[serde(default, deserialize_with = "de_index_or_list")]
    pub complementary: Vec<usize>,
    /// Destination-out compositing: the layer's alpha subtracts coverage.
    #[serde(default)]
    pub erase: bool,
    /// Color operations must leave the alpha plane byte-identical.
    #[serde(default)]
    pub preserve_alpha: bool,
    #[serde(default)]
    pub stretch: Vec<StretchRule>,
}

fn de_index_or_list<'de, D>(deserializer: D) -> Result<Vec<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        One(usize),
        Many(Vec<usize>),
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Repr::One(i)) => vec![i],
        Some(Repr::Many(v)) => v,
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// Override color applied when any active layer or mask name contains the
/// given substring (e.g. white text on a "(Back)" face).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalColor {
    pub contains: String,
    pub color: ColorDef,
}

/// Explicit per-glyph placement for fields laid out as individual symbols
/// (e.g. a mana cost row) instead of a wrapped paragraph.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManaSpot {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub size: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextFieldConfig {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub mana_placement: Option<Vec<ManaSpot>>,
    /// Font size as a fraction of card height.
    pub size: f64,
    #[serde(default = "default_font")]
    pub font: String,
    #[serde(default)]
    pub align: Align,
    #[serde(default)]
    pub one_line: bool,
    #[serde(default = "default_color")]
    pub color: ColorDef,
    #[serde(default)]
    pub shadow_x: f64,
    #[serde(default)]
    pub shadow_y: f64,
    #[serde(default)]
    pub outline_width: f64,
    #[serde(default)]
    pub conditional_color: Option<ConditionalColor>,
}

fn default_font() -> String {
    "regular".to_string()
}

fn default_color() -> ColorDef {
    ColorDef::BLACK
}

impl TextFieldConfig {
    /// Geometry is not required here: ability fields get computed bounds at
    /// render time. A static field that still lacks geometry then surfaces as
    /// a per-field layout problem, not a template rejection.
    pub fn validate(&self, name: &str) -> CardstockResult<()> {
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(CardstockError::validation(format!(
                "text field '{name}': size must be finite and > 0"
            )));
        }
        Ok(())
    }
}

/// Saga defaults: chapter weights, initial count, and the chapter column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaConfig {
    pub default_abilities: [u32; 4],
    pub count: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SagaConfig {
    pub fn validate(&self) -> CardstockResult<()> {
        if !(self.width > 0.0) || !(self.height > 0.0) {
            return Err(CardstockError::validation(
                "saga chapter column must have positive extent",
            ));
        }
        Ok(())
    }
}

/// Planeswalker defaults: ability costs, per-slot height allotments and fine
/// offsets, and the fixed ability-box region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneswalkerConfig {
    #[serde(default)]
    pub abilities: [String; 4],
    #[serde(default)]
    pub ability_adjust: [f64; 4],
    pub heights: [f64; 4],
    pub x: f64,
    pub width: f64,
    #[serde(default)]
    pub invert: bool,
    pub base_y: f64,
    pub ability_bounds: Bounds,
}

impl PlaneswalkerConfig {
    pub fn validate(&self) -> CardstockResult<()> {
        if !(self.width > 0.0) {
            return Err(CardstockError::validation(
                "planeswalker ability width must be positive",
            ));
        }
        self.ability_bounds.validate_extent()?;
        Ok(())
    }
}

/// Declarative frame pack shipped by the external catalog. Read-only input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePackTemplate {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub art_bounds: Option<Bounds>,
    #[serde(default)]
    pub set_symbol_bounds: Option<Bounds>,
    #[serde(default)]
    pub watermark_bounds: Option<Bounds>,
    pub frames: Vec<LayerDescriptor>,
    #[serde(default)]
    pub text: BTreeMap<String, TextFieldConfig>,
    #[serde(default)]
    pub saga: Option<SagaConfig>,
    #[serde(default)]
    pub planeswalker: Option<PlaneswalkerConfig>,
    /// Granted to the card when a frame from this pack is committed, and
    /// sticky for the card's lifetime afterwards.
    #[serde(default)]
    pub nickname_field: Option<TextFieldConfig>,
}

impl FramePackTemplate {
    pub fn validate(&self) -> CardstockResult<()> {
        if self.id.trim().is_empty() {
            return Err(CardstockError::validation("template id cannot be empty"));
        }

        for (idx, frame) in self.frames.iter().enumerate() {
            for &comp in &frame.complementary {
                if comp >= self.frames.len() {
                    return Err(CardstockError::validation(format!(
                        "frame '{}' (index {idx}): complementary index {comp} out of range",
                        frame.name
                    )));
                }
            }
            if let Some(b) = frame.bounds {
                b.validate_extent().map_err(|e| {
                    CardstockError::validation(format!("frame '{}': {e}", frame.name))
                })?;
            }
        }

        for (name, field) in &self.text {
            field.validate(name)?;
        }
        if let Some(field) = &self.nickname_field {
            field.validate("nickname")?;
        }
        if let Some(saga) = &self.saga {
            saga.validate()?;
        }
        if let Some(pw) = &self.planeswalker {
            pw.validate()?;
        }
        Ok(())
    }

    pub fn frame(&self, index: usize) -> CardstockResult<&LayerDescriptor> {
        self.frames.get(index).ok_or_else(|| {
            CardstockError::validation(format!(
                "template '{}': frame index {index} out of range",
                self.id
            ))
        })
    }

    fn version_contains(&self, needle: &str) -> bool {
        self.version
            .as_deref()
            .is_some_and(|v| v.to_ascii_lowercase().contains(needle))
    }

    pub fn is_saga(&self) -> bool {
        self.version_contains("saga")
    }

    pub fn is_planeswalker(&self) -> bool {
        self.version_contains("planeswalker")
    }
}

/// Read-only template lookup injected by the caller. The engine holds no
/// global registry.
pub trait TemplateCatalog {
    fn template(&self, id: &str) -> Option<&FramePackTemplate>;
}

/// Map-backed catalog used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    templates: BTreeMap<String, FramePackTemplate>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template: FramePackTemplate) -> CardstockResult<()> {
        template.validate()?;
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }
}

impl TemplateCatalog for MemoryCatalog {
    fn template(&self, id: &str) -> Option<&FramePackTemplate> {
        self.templates.get(id)
    }
}
