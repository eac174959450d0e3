pub type CardstockResult<T> = Result<T, CardstockError>;

/// Recoverable failures inside the compositing loop. These are reported
/// per-layer alongside the rendered raster rather than aborting the render.
#[derive(thiserror::Error, Debug)]
pub enum CompositionError {
    #[error("complementary cycle detected at frame index {0}")]
    CycleDetected(usize),

    #[error("asset unavailable: {0}")]
    AssetUnavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum CardstockError {
    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("composition error: {0}")]
    Composition(#[from] CompositionError),

    #[error("layout error: {0}")]
    Layout(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CardstockError {
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }

    pub fn layout(msg: impl Into<String>) -> Self {
        Self::Layout(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn asset_unavailable(msg: impl Into<String>) -> Self {
        Self::Composition(CompositionError::AssetUnavailable(msg.into()))
    }
}
