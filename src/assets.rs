use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rayon::prelude::*;

use crate::error::{CardstockError, CardstockResult};
use crate::model::AssetRef;
use crate::raster::{Raster, SharedRaster};

/// Decode image bytes into a premultiplied RGBA8 raster.
pub fn decode_rgba8_premul(bytes: &[u8]) -> CardstockResult<Raster> {
    let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut data = rgba.into_raw();
    premultiply_rgba8_in_place(&mut data);
    Raster::from_premul(width, height, data)
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

/// Normalize and validate a card-relative asset path. The normalized result
/// uses `/` separators, removes `.` segments, and rejects absolute paths or
/// parent traversals (`..`).
pub fn normalize_rel_path(source: &str) -> CardstockResult<String> {
    let s = source.replace('\\', "/");
    if s.starts_with('/') {
        return Err(CardstockError::validation("asset paths must be relative"));
    }
    if s.is_empty() {
        return Err(CardstockError::validation("asset path must be non-empty"));
    }

    let mut out = Vec::<&str>::new();
    for part in s.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return Err(CardstockError::validation("asset paths must not contain '..'"));
        }
        out.push(part);
    }

    if out.is_empty() {
        return Err(CardstockError::validation(
            "asset path must contain a file name",
        ));
    }

    Ok(out.join("/"))
}

/// Resolves asset references to decoded rasters. Bytes are assumed resident
/// or locally readable; no network I/O happens behind this trait.
pub trait AssetSource: Sync {
    fn fetch(&self, asset: &AssetRef) -> CardstockResult<SharedRaster>;

    /// Warm any internal cache for the given refs. Sources without a cache
    /// ignore this; failures surface later from `fetch`.
    fn prefetch(&self, _assets: &[AssetRef]) {}
}

/// Pre-decoded in-memory store, used by tests and small embeds.
#[derive(Debug, Default)]
pub struct MemoryAssets {
    map: HashMap<AssetRef, SharedRaster>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset: AssetRef, raster: Raster) {
        self.map.insert(asset, Arc::new(raster));
    }
}

impl AssetSource for MemoryAssets {
    fn fetch(&self, asset: &AssetRef) -> CardstockResult<SharedRaster> {
        self.map
            .get(asset)
            .cloned()
            .ok_or_else(|| CardstockError::asset_unavailable(asset.as_str()))
    }
}

/// Directory-backed source that decodes on first fetch and caches the result.
#[derive(Debug)]
pub struct FsAssets {
    root: PathBuf,
    cache: Mutex<HashMap<AssetRef, SharedRaster>>,
}

impl FsAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn load(&self, asset: &AssetRef) -> CardstockResult<Raster> {
        let rel = normalize_rel_path(asset.as_str())?;
        let path = self.root.join(rel);
        let bytes = std::fs::read(&path).map_err(|e| {
            CardstockError::asset_unavailable(format!("{}: {e}", path.display()))
        })?;
        decode_rgba8_premul(&bytes)
            .map_err(|e| CardstockError::asset_unavailable(format!("{}: {e}", path.display())))
    }
}

impl AssetSource for FsAssets {
    fn fetch(&self, asset: &AssetRef) -> CardstockResult<SharedRaster> {
        if let Some(hit) = self.cache.lock().expect("asset cache poisoned").get(asset) {
            return Ok(hit.clone());
        }
        let raster = Arc::new(self.load(asset)?);
        self.cache
            .lock()
            .expect("asset cache poisoned")
            .insert(asset.clone(), raster.clone());
        Ok(raster)
    }

    /// Decode all uncached refs in parallel. Decoding is read-only per asset,
    /// so this is safe to fan out; compositing stays sequential regardless.
    fn prefetch(&self, assets: &[AssetRef]) {
        let pending: Vec<AssetRef> = {
            let cache = self.cache.lock().expect("asset cache poisoned");
            assets
                .iter()
                .filter(|a| !cache.contains_key(*a))
                .cloned()
                .collect()
        };

        let decoded: Vec<(AssetRef, Raster)> = pending
            .par_iter()
            .filter_map(|asset| match self.load(asset) {
                Ok(raster) => Some((asset.clone(), raster)),
                Err(error) => {
                    tracing::debug!(asset = asset.as_str(), %error, "prefetch skipped asset");
                    None
                }
            })
            .collect();

        let mut cache = self.cache.lock().expect("asset cache poisoned");
        for (asset, raster) in decoded {
            cache.entry(asset).or_insert_with(|| Arc::new(raster));
        }
    }
}

/// Parse font bytes for the glyph rasterizer.
pub fn load_font(bytes: &[u8]) -> CardstockResult<fontdue::Font> {
    fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
        .map_err(|error| CardstockError::validation(format!("failed to parse font: {error}")))
}

/// Resolves a field's font name (plus style toggles) to a parsed face.
pub trait FontSource {
    fn font(&self, name: &str, italic: bool, bold: bool) -> Option<Arc<fontdue::Font>>;
}

/// Name-keyed font map. Styled lookups try `name-bold-italic`, then the
/// single-style keys, then fall back to the base face.
#[derive(Default)]
pub struct MemoryFonts {
    map: HashMap<String, Arc<fontdue::Font>>,
}

impl MemoryFonts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, font: fontdue::Font) {
        self.map.insert(name.into(), Arc::new(font));
    }

    pub fn insert_bytes(&mut self, name: impl Into<String>, bytes: &[u8]) -> CardstockResult<()> {
        self.map.insert(name.into(), Arc::new(load_font(bytes)?));
        Ok(())
    }
}

impl FontSource for MemoryFonts {
    fn font(&self, name: &str, italic: bool, bold: bool) -> Option<Arc<fontdue::Font>> {
        let mut candidates = Vec::with_capacity(4);
        if bold && italic {
            candidates.push(format!("{name}-bold-italic"));
        }
        if bold {
            candidates.push(format!("{name}-bold"));
        }
        if italic {
            candidates.push(format!("{name}-italic"));
        }
        candidates.push(name.to_string());

        candidates
            .iter()
            .find_map(|key| self.map.get(key))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn decode_image_png_dimensions_and_premul() {
        let src_rgba = vec![100u8, 50u8, 200u8, 128u8];
        let img = image::RgbaImage::from_raw(1, 1, src_rgba).unwrap();

        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let raster = decode_rgba8_premul(&buf).unwrap();
        assert_eq!(raster.width(), 1);
        assert_eq!(raster.height(), 1);
        assert_eq!(
            raster.data(),
            &[
                ((100u16 * 128 + 127) / 255) as u8,
                ((50u16 * 128 + 127) / 255) as u8,
                ((200u16 * 128 + 127) / 255) as u8,
                128u8
            ]
        );
    }

    #[test]
    fn normalize_rel_path_cleans_and_rejects() {
        assert_eq!(normalize_rel_path("a/./b.png").unwrap(), "a/b.png");
        assert_eq!(normalize_rel_path("a\\b.png").unwrap(), "a/b.png");
        assert!(normalize_rel_path("/abs.png").is_err());
        assert!(normalize_rel_path("a/../b.png").is_err());
        assert!(normalize_rel_path("").is_err());
    }

    #[test]
    fn memory_assets_miss_is_asset_unavailable() {
        let assets = MemoryAssets::new();
        let err = assets.fetch(&AssetRef::new("missing.png")).unwrap_err();
        assert!(err.to_string().contains("asset unavailable"));
    }

    #[test]
    fn memory_fonts_miss_is_none() {
        let fonts = MemoryFonts::new();
        assert!(fonts.font("regular", false, false).is_none());
        assert!(fonts.font("regular", true, true).is_none());
    }
}
