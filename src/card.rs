use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CardstockError, CardstockResult, CompositionError};
use crate::geom::Bounds;
use crate::model::{
    AssetRef, ColorDef, FramePackTemplate, MaskDescriptor, TemplateCatalog, TextFieldConfig,
};
use crate::text::planeswalker_count;
use crate::tint_cpu::HslShift;

/// A mask the user committed onto a layer instance. Carries its own bitmap
/// and placement, independent of the parent layer's.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMask {
    pub name: String,
    pub image: AssetRef,
    #[serde(default)]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub og_bounds: Option<Bounds>,
}

impl From<&MaskDescriptor> for AppliedMask {
    fn from(desc: &MaskDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
            image: desc.image.clone(),
            bounds: desc.bounds,
            og_bounds: desc.og_bounds,
        }
    }
}

/// The mutable per-instance fields, grouped so an "og" snapshot can restore
/// them all on reset-to-default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerState {
    /// Percent, 0..=100.
    pub opacity: f64,
    pub visible: bool,
    /// Placement offset in card fractions.
    pub x: f64,
    pub y: f64,
    /// Uniform scale about the placement center.
    pub scale: f64,
    pub hsl: HslShift,
    pub color_overlay: ColorDef,
    pub color_overlay_check: bool,
}

impl Default for LayerState {
    fn default() -> Self {
        Self {
            opacity: 100.0,
            visible: true,
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            hsl: HslShift::default(),
            color_overlay: ColorDef::WHITE,
            color_overlay_check: false,
        }
    }
}

/// One layer in the card's stack: a descriptor reference plus runtime state.
/// The card owns these exclusively; reordering is a list permutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInstance {
    pub template_id: String,
    pub frame_index: usize,
    /// Descriptor name, kept on the instance for conditional-color predicates.
    pub name: String,
    pub state: LayerState,
    pub og: LayerState,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub masks: Vec<AppliedMask>,
}

impl LayerInstance {
    pub fn from_descriptor(
        template: &FramePackTemplate,
        frame_index: usize,
    ) -> CardstockResult<Self> {
        let descriptor = template.frame(frame_index)?;
        let state = LayerState::default();
        Ok(Self {
            template_id: template.id.clone(),
            frame_index,
            name: descriptor.name.clone(),
            og: state.clone(),
            state,
            locked: false,
            masks: Vec::new(),
        })
    }

    pub fn reset(&mut self) {
        self.state = self.og.clone();
    }
}

/// Saga sub-state: chapter weights and the chapter column geometry. Sole
/// driver of how many `abilityN` fields are active.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaInfo {
    pub abilities: [u32; 4],
    pub count: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SagaInfo {
    pub fn from_config(config: &crate::model::SagaConfig) -> Self {
        Self {
            abilities: config.default_abilities,
            count: config.count,
            x: config.x,
            y: config.y,
            width: config.width,
            height: config.height,
        }
    }
}

/// Planeswalker sub-state: per-slot height allotments, cost strings, fine
/// offsets, and the fixed ability-box region they redistribute within.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneswalkerInfo {
    pub abilities: [String; 4],
    pub ability_adjust: [f64; 4],
    pub heights: [f64; 4],
    pub count: u32,
    pub x: f64,
    pub width: f64,
    pub invert: bool,
    pub base_y: f64,
    pub original_ability_bounds: Bounds,
}

impl PlaneswalkerInfo {
    pub fn from_config(config: &crate::model::PlaneswalkerConfig) -> Self {
        Self {
            abilities: config.abilities.clone(),
            ability_adjust: config.ability_adjust,
            heights: config.heights,
            count: planeswalker_count(config.heights),
            x: config.x,
            width: config.width,
            invert: config.invert,
            base_y: config.base_y,
            original_ability_bounds: config.ability_bounds,
        }
    }
}

/// Runtime text field: the template config plus the user-edited raw string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextField {
    pub config: TextFieldConfig,
    pub text: String,
}

impl TextField {
    pub fn from_config(config: &TextFieldConfig) -> Self {
        Self {
            text: config.text.clone(),
            config: config.clone(),
        }
    }
}

pub const NICKNAME_FIELD: &str = "nickname";

/// The card aggregate: an ordered layer stack (bottom to top), the text-field
/// map, and the dynamic sub-state. Owned by the surrounding application; the
/// engine reads it and applies the mutation operations below.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub template_id: String,
    #[serde(default)]
    pub layers: Vec<LayerInstance>,
    #[serde(default)]
    pub text: BTreeMap<String, TextField>,
    #[serde(default)]
    pub saga: Option<SagaInfo>,
    #[serde(default)]
    pub planeswalker: Option<PlaneswalkerInfo>,
    /// Once granted by a pack pick this never goes back to false, even if the
    /// granting layer is later removed.
    #[serde(default)]
    pub nickname_active: bool,
}

impl Card {
    pub fn new(catalog: &dyn TemplateCatalog, template_id: &str) -> CardstockResult<Self> {
        let template = catalog
            .template(template_id)
            .ok_or_else(|| CardstockError::validation(format!("unknown template '{template_id}'")))?;

        let text = template
            .text
            .iter()
            .map(|(name, config)| (name.clone(), TextField::from_config(config)))
            .collect();

        let saga = if template.is_saga() {
            template.saga.as_ref().map(SagaInfo::from_config)
        } else {
            None
        };
        let planeswalker = if template.is_planeswalker() {
            template.planeswalker.as_ref().map(PlaneswalkerInfo::from_config)
        } else {
            None
        };

        Ok(Self {
            template_id: template_id.to_string(),
            layers: Vec::new(),
            text,
            saga,
            planeswalker,
            nickname_active: false,
        })
    }

    /// Commit a frame pick. With no mask, the descriptor's complementary
    /// frames are instantiated first so they sit beneath the primary layer;
    /// chains expand depth-first with cycle detection. Packs that grant a
    /// nickname field activate it here, sticky for the card's lifetime.
    pub fn commit_frame_pick(
        &mut self,
        template: &FramePackTemplate,
        frame_index: usize,
        mask: Option<AppliedMask>,
    ) -> CardstockResult<()> {
        let descriptor = template.frame(frame_index)?;

        if mask.is_none() && !descriptor.no_default_mask && !descriptor.complementary.is_empty() {
            let mut visited = BTreeSet::from([frame_index]);
            let mut pending = Vec::new();
            for &comp in &descriptor.complementary {
                expand_complementary(template, comp, &mut visited, &mut pending)?;
            }
            self.layers.extend(pending);
        }

        let mut instance = LayerInstance::from_descriptor(template, frame_index)?;
        instance.masks.extend(mask);
        self.layers.push(instance);

        if template.nickname_field.is_some() {
            self.activate_nickname(template);
        }
        Ok(())
    }

    fn activate_nickname(&mut self, template: &FramePackTemplate) {
        self.nickname_active = true;
        if let Some(config) = &template.nickname_field {
            self.text
                .entry(NICKNAME_FIELD.to_string())
                .or_insert_with(|| TextField::from_config(config));
        }
    }

    /// Move the layer at `from` so it ends up at `to`. Pure list permutation.
    pub fn reorder_layer(&mut self, from: usize, to: usize) -> CardstockResult<()> {
        if from >= self.layers.len() || to >= self.layers.len() {
            return Err(CardstockError::validation("layer index out of range"));
        }
        if self.layers[from].locked {
            return Err(CardstockError::validation(format!(
                "layer '{}' is locked",
                self.layers[from].name
            )));
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        Ok(())
    }

    /// Remove a layer. The nickname field stays active even when the layer
    /// that granted it goes away.
    pub fn remove_layer(&mut self, index: usize) -> CardstockResult<()> {
        if index >= self.layers.len() {
            return Err(CardstockError::validation("layer index out of range"));
        }
        if self.layers[index].locked {
            return Err(CardstockError::validation(format!(
                "layer '{}' is locked",
                self.layers[index].name
            )));
        }
        self.layers.remove(index);
        Ok(())
    }

    pub fn reset_layer(&mut self, index: usize) -> CardstockResult<()> {
        let layer = self
            .layers
            .get_mut(index)
            .ok_or_else(|| CardstockError::validation("layer index out of range"))?;
        layer.reset();
        Ok(())
    }

    /// Update the saga chapter count. Geometry is derived at render time, so
    /// setting the same count twice is a no-op.
    pub fn set_saga_count(&mut self, count: u32) -> CardstockResult<()> {
        let saga = self
            .saga
            .as_mut()
            .ok_or_else(|| CardstockError::validation("card has no saga state"))?;
        saga.count = count;
        Ok(())
    }

    /// Replace the planeswalker height allotments; the active count follows.
    pub fn set_planeswalker_heights(&mut self, heights: [f64; 4]) -> CardstockResult<()> {
        let pw = self
            .planeswalker
            .as_mut()
            .ok_or_else(|| CardstockError::validation("card has no planeswalker state"))?;
        pw.heights = heights;
        pw.count = planeswalker_count(heights);
        Ok(())
    }

    pub fn set_planeswalker_cost(&mut self, slot: usize, cost: impl Into<String>) -> CardstockResult<()> {
        let pw = self
            .planeswalker
            .as_mut()
            .ok_or_else(|| CardstockError::validation("card has no planeswalker state"))?;
        let ability = pw
            .abilities
            .get_mut(slot)
            .ok_or_else(|| CardstockError::validation("planeswalker slot out of range"))?;
        *ability = cost.into();
        Ok(())
    }

    /// Names of all visible layers and their applied masks, the input to
    /// conditional-color predicates. Evaluated once per render pass.
    pub fn active_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for layer in &self.layers {
            if !layer.state.visible {
                continue;
            }
            names.push(layer.name.as_str());
            for mask in &layer.masks {
                names.push(mask.name.as_str());
            }
        }
        names
    }
}

fn expand_complementary(
    template: &FramePackTemplate,
    frame_index: usize,
    visited: &mut BTreeSet<usize>,
    out: &mut Vec<LayerInstance>,
) -> CardstockResult<()> {
    if !visited.insert(frame_index) {
        return Err(CompositionError::CycleDetected(frame_index).into());
    }
    let descriptor = template.frame(frame_index)?;
    for &comp in &descriptor.complementary {
        expand_complementary(template, comp, visited, out)?;
    }
    out.push(LayerInstance::from_descriptor(template, frame_index)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LayerDescriptor, MemoryCatalog};

    fn descriptor(name: &str) -> LayerDescriptor {
        LayerDescriptor {
            name: name.to_string(),
            image: AssetRef::new(format!("{name}.png")),
            bounds: None,
            masks: vec![],
            no_default_mask: false,
            complementary: vec![],
            erase: false,
            preserve_alpha: false,
            stretch: vec![],
        }
    }

    fn crown_template() -> FramePackTemplate {
        let mut crown = descriptor("Legend Crown");
        crown.complementary = vec![1];
        FramePackTemplate {
            id: "crowns".to_string(),
            label: "Legend Crowns".to_string(),
            version: None,
            art_bounds: None,
            set_symbol_bounds: None,
            watermark_bounds: None,
            frames: vec![crown, descriptor("Border Cover")],
            text: BTreeMap::new(),
            saga: None,
            planeswalker: None,
            nickname_field: None,
        }
    }

    fn catalog_with(template: FramePackTemplate) -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(template).unwrap();
        catalog
    }

    #[test]
    fn maskless_pick_cascades_complementary_beneath() {
        let template = crown_template();
        let catalog = catalog_with(template.clone());
        let mut card = Card::new(&catalog, "crowns").unwrap();
        card.commit_frame_pick(&template, 0, None).unwrap();

        assert_eq!(card.layers.len(), 2);
        assert_eq!(card.layers[0].name, "Border Cover");
        assert_eq!(card.layers[1].name, "Legend Crown");
    }

    #[test]
    fn masked_pick_suppresses_complementary() {
        let template = crown_template();
        let catalog = catalog_with(template.clone());
        let mut card = Card::new(&catalog, "crowns").unwrap();
        let mask = AppliedMask {
            name: "Full".to_string(),
            image: AssetRef::new("full.png"),
            bounds: None,
            og_bounds: None,
        };
        card.commit_frame_pick(&template, 0, Some(mask)).unwrap();

        assert_eq!(card.layers.len(), 1);
        assert_eq!(card.layers[0].name, "Legend Crown");
    }

    #[test]
    fn complementary_cycle_is_detected() {
        let mut template = crown_template();
        template.frames[1].complementary = vec![0];
        let catalog = catalog_with(template.clone());
        let mut card = Card::new(&catalog, "crowns").unwrap();
        let err = card.commit_frame_pick(&template, 0, None).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn nickname_survives_removal_of_granting_layer() {
        let mut template = crown_template();
        template.nickname_field = Some(TextFieldConfig {
            text: String::new(),
            bounds: Some(Bounds::new(0.1, 0.1, 0.8, 0.08)),
            mana_placement: None,
            size: 0.04,
            font: "regular".to_string(),
            align: crate::model::Align::Center,
            one_line: true,
            color: ColorDef::BLACK,
            shadow_x: 0.0,
            shadow_y: 0.0,
            outline_width: 0.0,
            conditional_color: None,
        });
        let catalog = catalog_with(template.clone());
        let mut card = Card::new(&catalog, "crowns").unwrap();
        card.commit_frame_pick(&template, 0, None).unwrap();
        assert!(card.nickname_active);
        assert!(card.text.contains_key(NICKNAME_FIELD));

        // Drop every layer the pick created.
        card.remove_layer(1).unwrap();
        card.remove_layer(0).unwrap();
        assert!(card.nickname_active);
        assert!(card.text.contains_key(NICKNAME_FIELD));
    }

    #[test]
    fn reset_layer_restores_og_state() {
        let template = crown_template();
        let catalog = catalog_with(template.clone());
        let mut card = Card::new(&catalog, "crowns").unwrap();
        card.commit_frame_pick(&template, 1, None).unwrap();

        let layer = &mut card.layers[0];
        layer.state.opacity = 35.0;
        layer.state.x = 0.2;
        layer.state.hsl.hue = 90.0;
        card.reset_layer(0).unwrap();
        assert_eq!(card.layers[0].state, LayerState::default());
    }

    #[test]
    fn locked_layer_refuses_reorder_and_remove() {
        let template = crown_template();
        let catalog = catalog_with(template.clone());
        let mut card = Card::new(&catalog, "crowns").unwrap();
        card.commit_frame_pick(&template, 1, None).unwrap();
        card.commit_frame_pick(&template, 1, None).unwrap();
        card.layers[0].locked = true;

        assert!(card.reorder_layer(0, 1).is_err());
        assert!(card.remove_layer(0).is_err());
        assert!(card.reorder_layer(1, 0).is_ok());
    }

    #[test]
    fn active_names_cover_masks_and_skip_hidden() {
        let template = crown_template();
        let catalog = catalog_with(template.clone());
        let mut card = Card::new(&catalog, "crowns").unwrap();
        let mask = AppliedMask {
            name: "Crown (Back)".to_string(),
            image: AssetRef::new("back.png"),
            bounds: None,
            og_bounds: None,
        };
        card.commit_frame_pick(&template, 0, Some(mask)).unwrap();
        card.commit_frame_pick(&template, 1, None).unwrap();
        card.layers[1].state.visible = false;

        let names = card.active_names();
        assert!(names.contains(&"Legend Crown"));
        assert!(names.contains(&"Crown (Back)"));
        assert!(!names.contains(&"Border Cover"));
    }
}
