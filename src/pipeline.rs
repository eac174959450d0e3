use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::assets::{AssetSource, FontSource};
use crate::card::{Card, LayerInstance, LayerState};
use crate::composite_cpu::{MaskPlacement, blit_erase, blit_over};
use crate::error::{CardstockError, CardstockResult, CompositionError};
use crate::geom::{Bounds, Canvas, map_rect_between};
use crate::model::{AssetRef, FramePackTemplate, LayerDescriptor, TemplateCatalog};
use crate::raster::Raster;
use crate::stretch_cpu::stretch_rows;
use crate::text::resolve_fields;
use crate::text_cpu::{TextPaintContext, TextPainter};
use crate::tint_cpu::tint_in_place;

/// Everything the render needs besides the card itself. All read-only;
/// the engine holds no state of its own between renders.
pub struct RenderInputs<'a> {
    pub catalog: &'a dyn TemplateCatalog,
    pub assets: &'a dyn AssetSource,
    pub fonts: &'a dyn FontSource,
}

/// A recoverable failure attributed to one layer or text field. The render
/// carries on without that element.
#[derive(Debug)]
pub struct RenderProblem {
    pub source: String,
    pub error: CardstockError,
}

/// Best-effort render result: the raster plus whatever was skipped.
#[derive(Debug)]
pub struct RenderOutput {
    pub raster: Raster,
    pub problems: Vec<RenderProblem>,
}

/// Render a card: composite the layer stack bottom to top, then lay out and
/// paint the active text fields. Per-layer and per-field failures are
/// collected in `problems`; only a structurally invalid input (unknown
/// template, zero canvas) aborts the whole render.
#[tracing::instrument(skip_all, fields(template = %card.template_id))]
pub fn render(
    inputs: &RenderInputs<'_>,
    card: &Card,
    canvas: Canvas,
) -> CardstockResult<RenderOutput> {
    let template = inputs.catalog.template(&card.template_id).ok_or_else(|| {
        CardstockError::validation(format!("unknown template '{}'", card.template_id))
    })?;
    if canvas.width == 0 || canvas.height == 0 {
        return Err(CardstockError::validation("canvas dimensions must be > 0"));
    }

    // Decode fan-out is safe; the composite loop below stays sequential
    // because stack order is semantically significant.
    inputs.assets.prefetch(&collect_refs(inputs.catalog, card));

    let mut acc = Raster::new(canvas);
    let mut problems = Vec::new();

    for (stack_idx, instance) in card.layers.iter().enumerate() {
        if !instance.state.visible {
            continue;
        }
        let Some(layer_template) = inputs.catalog.template(&instance.template_id) else {
            problems.push(RenderProblem {
                source: instance.name.clone(),
                error: CardstockError::validation(format!(
                    "layer references unknown template '{}'",
                    instance.template_id
                )),
            });
            continue;
        };

        let mut visited = BTreeSet::from([instance.frame_index]);
        composite_with_expansion(
            inputs,
            card,
            &mut acc,
            canvas,
            layer_template,
            instance,
            stack_idx,
            &mut visited,
            &mut problems,
        );
    }

    paint_text(inputs, card, template, &mut acc, canvas, &mut problems);

    Ok(RenderOutput {
        raster: acc,
        problems,
    })
}

/// Composite one instance, expanding complementary frames beneath it first
/// when it carries no mask. Expansion chains are followed depth-first with a
/// per-stack-entry visited set; revisiting a frame is a cycle.
#[allow(clippy::too_many_arguments)]
fn composite_with_expansion(
    inputs: &RenderInputs<'_>,
    card: &Card,
    acc: &mut Raster,
    canvas: Canvas,
    template: &FramePackTemplate,
    instance: &LayerInstance,
    stack_idx: usize,
    visited: &mut BTreeSet<usize>,
    problems: &mut Vec<RenderProblem>,
) {
    let descriptor = match template.frame(instance.frame_index) {
        Ok(d) => d,
        Err(error) => {
            problems.push(RenderProblem {
                source: instance.name.clone(),
                error,
            });
            return;
        }
    };

    // Maskless layers pull their complementary frames in beneath them; a
    // no-default-mask layer legitimately renders bare instead. Zero-opacity
    // layers still expand so border covers stay consistent.
    if instance.masks.is_empty() && !descriptor.no_default_mask {
        for &comp in &descriptor.complementary {
            if materialized_below(card, stack_idx, &instance.template_id, comp) {
                continue;
            }
            if !visited.insert(comp) {
                problems.push(RenderProblem {
                    source: instance.name.clone(),
                    error: CompositionError::CycleDetected(comp).into(),
                });
                continue;
            }
            match LayerInstance::from_descriptor(template, comp) {
                Ok(fresh) => composite_with_expansion(
                    inputs, card, acc, canvas, template, &fresh, stack_idx, visited, problems,
                ),
                Err(error) => problems.push(RenderProblem {
                    source: instance.name.clone(),
                    error,
                }),
            }
        }
    }

    if instance.state.opacity <= 0.0 {
        return;
    }

    if let Err(error) = draw_layer(inputs, acc, canvas, descriptor, instance) {
        warn!(layer = %instance.name, %error, "layer skipped");
        problems.push(RenderProblem {
            source: instance.name.clone(),
            error,
        });
    }
}

/// A complementary frame already committed beneath `stack_idx` as a real
/// instance is not expanded again, so a committed cascade renders once.
fn materialized_below(card: &Card, stack_idx: usize, template_id: &str, frame_index: usize) -> bool {
    card.layers[..stack_idx]
        .iter()
        .any(|l| l.template_id == template_id && l.frame_index == frame_index)
}

/// Placement bounds for an instance: descriptor bounds (full card when
/// absent), scaled about the center, shifted by the instance offset.
fn placement_bounds(descriptor: &LayerDescriptor, state: &LayerState) -> Bounds {
    let base = descriptor.bounds.unwrap_or(Bounds::FULL);
    let w = base.width * state.scale;
    let h = base.height * state.scale;
    Bounds::new(
        base.x + state.x + (base.width - w) / 2.0,
        base.y + state.y + (base.height - h) / 2.0,
        w,
        h,
    )
}

fn draw_layer(
    inputs: &RenderInputs<'_>,
    acc: &mut Raster,
    canvas: Canvas,
    descriptor: &LayerDescriptor,
    instance: &LayerInstance,
) -> CardstockResult<()> {
    let src = inputs.assets.fetch(&descriptor.image)?;

    let state = &instance.state;
    let overlay = state
        .color_overlay_check
        .then(|| state.color_overlay.to_rgb8());
    let needs_stretch = !descriptor.stretch.is_empty();
    let needs_tint = !state.hsl.is_identity() || overlay.is_some();

    let place = placement_bounds(descriptor, state).to_pixels(canvas)?;
    let opacity = (state.opacity / 100.0) as f32;

    // Erase layers are gated by their own alpha only; color and masks are
    // irrelevant to destination-out.
    if descriptor.erase {
        let bitmap = if needs_stretch {
            stretch_rows(&src, &descriptor.stretch)?
        } else {
            (*src).clone()
        };
        blit_erase(acc, &bitmap, place, opacity);
        return Ok(());
    }

    let tinted;
    let bitmap: &Raster = if needs_stretch || needs_tint {
        let mut work = if needs_stretch {
            stretch_rows(&src, &descriptor.stretch)?
        } else {
            (*src).clone()
        };
        tint_in_place(&mut work, state.hsl, overlay, descriptor.preserve_alpha);
        tinted = work;
        &tinted
    } else {
        &src
    };

    let layer_og = descriptor.bounds.unwrap_or(Bounds::FULL);
    let layer_now = placement_bounds(descriptor, state);

    let mut mask_rasters = Vec::with_capacity(instance.masks.len());
    for mask in &instance.masks {
        let raster = inputs.assets.fetch(&mask.image)?;
        // A mask's own bounds (explicit placement first, authored og bounds
        // second) are expressed against the layer's native placement, so they
        // follow the layer when the user moves or scales it.
        let mask_bounds = match mask.bounds.or(mask.og_bounds) {
            Some(b) => map_rect_between(layer_og, layer_now, b)?,
            None => layer_now,
        };
        let rect = mask_bounds.to_pixels(canvas)?;
        mask_rasters.push((raster, rect));
    }
    let placements: Vec<MaskPlacement<'_>> = mask_rasters
        .iter()
        .map(|(raster, rect)| MaskPlacement {
            raster,
            rect: *rect,
        })
        .collect();

    blit_over(acc, bitmap, place, opacity, &placements);
    Ok(())
}

fn paint_text(
    inputs: &RenderInputs<'_>,
    card: &Card,
    template: &FramePackTemplate,
    acc: &mut Raster,
    canvas: Canvas,
    problems: &mut Vec<RenderProblem>,
) {
    let (fields, field_problems) = resolve_fields(template, card);
    for (source, error) in field_problems {
        debug!(field = %source, %error, "text field omitted");
        problems.push(RenderProblem { source, error });
    }

    let mut painter = TextPainter::new(TextPaintContext {
        fonts: inputs.fonts,
        symbols: inputs.assets,
    });
    for field in &fields {
        if let Err(error) = painter.paint_field(acc, canvas, field) {
            warn!(field = %field.name, %error, "text field skipped");
            problems.push(RenderProblem {
                source: field.name.clone(),
                error,
            });
        }
    }
}

/// Unique bitmap refs a render will touch: layer images, their complementary
/// closures, and applied masks. Input to the decode prefetch.
fn collect_refs(catalog: &dyn TemplateCatalog, card: &Card) -> Vec<AssetRef> {
    let mut refs = BTreeSet::new();
    for instance in &card.layers {
        let Some(template) = catalog.template(&instance.template_id) else {
            continue;
        };
        let mut pending = vec![instance.frame_index];
        let mut seen = BTreeSet::new();
        while let Some(idx) = pending.pop() {
            if !seen.insert(idx) {
                continue;
            }
            if let Ok(descriptor) = template.frame(idx) {
                refs.insert(descriptor.image.clone());
                pending.extend(descriptor.complementary.iter().copied());
            }
        }
        for mask in &instance.masks {
            refs.insert(mask.image.clone());
        }
    }
    refs.into_iter().collect()
}
