#![forbid(unsafe_code)]

pub mod assets;
pub mod card;
pub mod composite_cpu;
pub mod error;
pub mod geom;
pub mod model;
pub mod pipeline;
pub mod raster;
pub mod stretch_cpu;
pub mod text;
pub mod text_cpu;
pub mod tint_cpu;

pub use assets::{AssetSource, FontSource, FsAssets, MemoryAssets, MemoryFonts};
pub use card::{AppliedMask, Card, LayerInstance, LayerState, PlaneswalkerInfo, SagaInfo, TextField};
pub use error::{CardstockError, CardstockResult, CompositionError};
pub use geom::{Bounds, Canvas, PixelRect};
pub use model::{
    AssetRef, ColorDef, FramePackTemplate, LayerDescriptor, MaskDescriptor, MemoryCatalog,
    StretchRule, TemplateCatalog, TextFieldConfig,
};
pub use pipeline::{RenderInputs, RenderOutput, RenderProblem, render};
pub use raster::Raster;
pub use tint_cpu::HslShift;
