/// Result alias that carries the custom [`BhDiverError`] type.
pub type Result<T> = std::result::Result<T, BhDiverError>;

/// Common error type for the core crate.
///
/// Only configuration and I/O problems surface here. Numerical trouble inside
/// the integrator is resolved locally and never reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum BhDiverError {
    /// A render request or configuration value was rejected before any pixel
    /// work started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Environment images are sampled as equirectangular maps and must be
    /// exactly twice as wide as they are tall.
    #[error("environment image must be equirectangular (2:1), got {width}x{height}")]
    NotEquirectangular { width: u32, height: u32 },
    /// Free-form message for failures without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around image decoding and encoding errors.
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// Wrapper around configuration parsing errors.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl BhDiverError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a configuration error.
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<&str> for BhDiverError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BhDiverError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
