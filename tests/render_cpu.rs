use std::collections::BTreeMap;

use cardstock::{
    AppliedMask, AssetRef, Bounds, Canvas, Card, FramePackTemplate, LayerDescriptor,
    MemoryAssets, MemoryCatalog, MemoryFonts, Raster, RenderInputs, render,
};

const CANVAS: Canvas = Canvas {
    width: 8,
    height: 8,
};

fn frame(name: &str, image: &str, bounds: Option<Bounds>) -> LayerDescriptor {
    LayerDescriptor {
        name: name.to_string(),
        image: AssetRef::new(image),
        bounds,
        masks: vec![],
        no_default_mask: false,
        complementary: vec![],
        erase: false,
        preserve_alpha: false,
        stretch: vec![],
    }
}

fn template(id: &str, frames: Vec<LayerDescriptor>) -> FramePackTemplate {
    FramePackTemplate {
        id: id.to_string(),
        label: id.to_string(),
        version: None,
        art_bounds: None,
        set_symbol_bounds: None,
        watermark_bounds: None,
        frames,
        text: BTreeMap::new(),
        saga: None,
        planeswalker: None,
        nickname_field: None,
    }
}

/// Solid raster sized 1:1 for a given fraction of the 8x8 canvas, so
/// sampling is exact at every pixel.
fn solid(w: u32, h: u32, straight: [u8; 4]) -> Raster {
    let a = u16::from(straight[3]);
    let pm = |c: u8| ((u16::from(c) * a + 127) / 255) as u8;
    Raster::solid(w, h, [pm(straight[0]), pm(straight[1]), pm(straight[2]), straight[3]])
        .unwrap()
}

struct Fixture {
    catalog: MemoryCatalog,
    assets: MemoryAssets,
    fonts: MemoryFonts,
}

impl Fixture {
    fn new(template_def: FramePackTemplate) -> Self {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(template_def).unwrap();
        Self {
            catalog,
            assets: MemoryAssets::new(),
            fonts: MemoryFonts::new(),
        }
    }

    fn render(&self, card: &Card) -> cardstock::RenderOutput {
        let inputs = RenderInputs {
            catalog: &self.catalog,
            assets: &self.assets,
            fonts: &self.fonts,
        };
        render(&inputs, card, CANVAS).unwrap()
    }
}

fn assert_px_near(got: [u8; 4], want: [u8; 4]) {
    for (g, w) in got.iter().zip(want) {
        assert!(g.abs_diff(w) <= 2, "pixel {got:?} != {want:?}");
    }
}

#[test]
fn stack_order_is_significant() {
    let t = template(
        "order",
        vec![
            frame("Red", "red.png", None),
            frame("Blue", "blue.png", None),
        ],
    );
    let mut fx = Fixture::new(t.clone());
    fx.assets
        .insert(AssetRef::new("red.png"), solid(8, 8, [255, 0, 0, 255]));
    fx.assets
        .insert(AssetRef::new("blue.png"), solid(8, 8, [0, 0, 255, 255]));

    let mut card = Card::new(&fx.catalog, "order").unwrap();
    card.commit_frame_pick(&t, 0, None).unwrap();
    card.commit_frame_pick(&t, 1, None).unwrap();
    let top_blue = fx.render(&card);
    assert_px_near(top_blue.raster.pixel(4, 4), [0, 0, 255, 255]);

    card.reorder_layer(1, 0).unwrap();
    let top_red = fx.render(&card);
    assert_px_near(top_red.raster.pixel(4, 4), [255, 0, 0, 255]);
    assert_ne!(top_blue.raster, top_red.raster);
}

#[test]
fn opaque_mask_is_identity() {
    let t = template("mask", vec![frame("Green", "green.png", None)]);
    let mut fx = Fixture::new(t.clone());
    fx.assets
        .insert(AssetRef::new("green.png"), solid(8, 8, [0, 255, 0, 255]));
    fx.assets
        .insert(AssetRef::new("white.png"), solid(8, 8, [255, 255, 255, 255]));

    let mut unmasked = Card::new(&fx.catalog, "mask").unwrap();
    unmasked.commit_frame_pick(&t, 0, None).unwrap();
    let plain = fx.render(&unmasked);

    let mut masked = Card::new(&fx.catalog, "mask").unwrap();
    masked
        .commit_frame_pick(
            &t,
            0,
            Some(AppliedMask {
                name: "Full".to_string(),
                image: AssetRef::new("white.png"),
                bounds: None,
                og_bounds: None,
            }),
        )
        .unwrap();
    let gated = fx.render(&masked);

    assert_eq!(plain.raster, gated.raster);
}

#[test]
fn erase_layer_transparent_bitmap_is_noop_and_opaque_clears() {
    let right_half = Bounds::new(0.5, 0.0, 0.5, 1.0);
    let mut cut = frame("Cutout", "cut.png", Some(right_half));
    cut.erase = true;
    let t = template("erase", vec![frame("Red", "red.png", None), cut]);
    let mut fx = Fixture::new(t.clone());
    fx.assets
        .insert(AssetRef::new("red.png"), solid(8, 8, [255, 0, 0, 255]));

    // Fully transparent erase bitmap: accumulator unchanged.
    fx.assets
        .insert(AssetRef::new("cut.png"), solid(4, 8, [0, 0, 0, 0]));
    let mut card = Card::new(&fx.catalog, "erase").unwrap();
    card.commit_frame_pick(&t, 0, None).unwrap();
    card.commit_frame_pick(&t, 1, None).unwrap();
    let untouched = fx.render(&card);
    assert_px_near(untouched.raster.pixel(6, 4), [255, 0, 0, 255]);

    // Fully opaque erase bitmap: the region's alpha drops to zero.
    let mut fx2 = Fixture::new(t.clone());
    fx2.assets
        .insert(AssetRef::new("red.png"), solid(8, 8, [255, 0, 0, 255]));
    fx2.assets
        .insert(AssetRef::new("cut.png"), solid(4, 8, [0, 0, 0, 255]));
    let cleared = fx2.render(&card);
    assert_eq!(cleared.raster.pixel(6, 4), [0, 0, 0, 0]);
    assert_px_near(cleared.raster.pixel(1, 4), [255, 0, 0, 255]);
}

#[test]
fn maskless_crown_pulls_border_cover_beneath() {
    let right_half = Bounds::new(0.5, 0.0, 0.5, 1.0);
    let mut crown = frame("Crown", "crown.png", Some(right_half));
    crown.complementary = vec![1];
    let t = template(
        "crown",
        vec![crown, frame("Border Cover", "cover.png", None)],
    );
    let mut fx = Fixture::new(t.clone());
    fx.assets
        .insert(AssetRef::new("crown.png"), solid(4, 8, [0, 255, 0, 255]));
    fx.assets
        .insert(AssetRef::new("cover.png"), solid(8, 8, [0, 0, 255, 255]));
    fx.assets
        .insert(AssetRef::new("white.png"), solid(4, 8, [255, 255, 255, 255]));

    // Render-time expansion: a bare instance without a committed cascade.
    let mut card = Card::new(&fx.catalog, "crown").unwrap();
    card.layers.push(cardstock::LayerInstance {
        template_id: "crown".to_string(),
        frame_index: 0,
        name: "Crown".to_string(),
        state: cardstock::LayerState::default(),
        og: cardstock::LayerState::default(),
        locked: false,
        masks: vec![],
    });
    let out = fx.render(&card);
    // Cover shows left of the crown, crown wins on the right (composited after).
    assert_px_near(out.raster.pixel(1, 4), [0, 0, 255, 255]);
    assert_px_near(out.raster.pixel(6, 4), [0, 255, 0, 255]);

    // With a mask applied, the cover is never auto-instantiated.
    let mut masked = Card::new(&fx.catalog, "crown").unwrap();
    masked
        .commit_frame_pick(
            &t,
            0,
            Some(AppliedMask {
                name: "Full".to_string(),
                image: AssetRef::new("white.png"),
                bounds: Some(right_half),
                og_bounds: None,
            }),
        )
        .unwrap();
    let out = fx.render(&masked);
    assert_eq!(out.raster.pixel(1, 4), [0, 0, 0, 0]);
    assert_px_near(out.raster.pixel(6, 4), [0, 255, 0, 255]);
}

#[test]
fn committed_cascade_is_not_expanded_twice() {
    let mut crown = frame("Crown", "crown.png", Some(Bounds::new(0.5, 0.0, 0.5, 1.0)));
    crown.complementary = vec![1];
    // A half-transparent cover would double up visibly if expanded again.
    let t = template(
        "crown",
        vec![crown, frame("Border Cover", "cover.png", None)],
    );
    let mut fx = Fixture::new(t.clone());
    fx.assets
        .insert(AssetRef::new("crown.png"), solid(4, 8, [0, 255, 0, 255]));
    fx.assets
        .insert(AssetRef::new("cover.png"), solid(8, 8, [0, 0, 255, 128]));

    let mut card = Card::new(&fx.catalog, "crown").unwrap();
    card.commit_frame_pick(&t, 0, None).unwrap();
    assert_eq!(card.layers.len(), 2);
    let out = fx.render(&card);

    // One pass of a 50% blue cover over transparency.
    let expect = solid(1, 1, [0, 0, 255, 128]).pixel(0, 0);
    assert_px_near(out.raster.pixel(1, 4), expect);
}

#[test]
fn zero_opacity_layer_still_expands_complementary() {
    let mut crown = frame("Crown", "crown.png", Some(Bounds::new(0.5, 0.0, 0.5, 1.0)));
    crown.complementary = vec![1];
    let t = template(
        "crown",
        vec![crown, frame("Border Cover", "cover.png", None)],
    );
    let mut fx = Fixture::new(t.clone());
    fx.assets
        .insert(AssetRef::new("crown.png"), solid(4, 8, [0, 255, 0, 255]));
    fx.assets
        .insert(AssetRef::new("cover.png"), solid(8, 8, [0, 0, 255, 255]));

    let mut card = Card::new(&fx.catalog, "crown").unwrap();
    card.layers.push(cardstock::LayerInstance {
        template_id: "crown".to_string(),
        frame_index: 0,
        name: "Crown".to_string(),
        state: cardstock::LayerState {
            opacity: 0.0,
            ..cardstock::LayerState::default()
        },
        og: cardstock::LayerState::default(),
        locked: false,
        masks: vec![],
    });
    let out = fx.render(&card);

    // Cover renders, crown itself contributes nothing.
    assert_px_near(out.raster.pixel(1, 4), [0, 0, 255, 255]);
    assert_px_near(out.raster.pixel(6, 4), [0, 0, 255, 255]);
}

#[test]
fn missing_asset_degrades_instead_of_aborting() {
    let t = template(
        "partial",
        vec![
            frame("Red", "red.png", None),
            frame("Ghost", "missing.png", None),
        ],
    );
    let mut fx = Fixture::new(t.clone());
    fx.assets
        .insert(AssetRef::new("red.png"), solid(8, 8, [255, 0, 0, 255]));

    let mut card = Card::new(&fx.catalog, "partial").unwrap();
    card.commit_frame_pick(&t, 0, None).unwrap();
    card.commit_frame_pick(&t, 1, None).unwrap();
    let out = fx.render(&card);

    assert_eq!(out.problems.len(), 1);
    assert!(out.problems[0].error.to_string().contains("asset unavailable"));
    assert_px_near(out.raster.pixel(4, 4), [255, 0, 0, 255]);
}

#[test]
fn end_to_end_red_blue_white_overlay() {
    let t = template(
        "scenario",
        vec![
            frame("Red", "red.png", None),
            frame("Blue", "blue.png", Some(Bounds::new(0.5, 0.0, 0.5, 1.0))),
            frame("Overlay", "white.png", None),
        ],
    );
    let mut fx = Fixture::new(t.clone());
    fx.assets
        .insert(AssetRef::new("red.png"), solid(8, 8, [255, 0, 0, 255]));
    fx.assets
        .insert(AssetRef::new("blue.png"), solid(4, 8, [0, 0, 255, 255]));
    fx.assets
        .insert(AssetRef::new("white.png"), solid(8, 8, [255, 255, 255, 255]));

    let mut card = Card::new(&fx.catalog, "scenario").unwrap();
    card.commit_frame_pick(&t, 0, None).unwrap();
    card.commit_frame_pick(&t, 1, None).unwrap();
    card.commit_frame_pick(&t, 2, None).unwrap();
    card.layers[2].state.opacity = 50.0;

    let out = fx.render(&card);
    // Left half: red blended with 50% white.
    assert_px_near(out.raster.pixel(2, 4), [255, 128, 128, 255]);
    // Right half: blue blended with 50% white.
    assert_px_near(out.raster.pixel(6, 4), [128, 128, 255, 255]);
}
