//! Error taxonomy shared by every core component.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid schedule parameters; always raised before any side effect.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("no usable media: {0}")]
    EmptyPool(String),
    #[error("media pool cannot reach {target:.2}s (accumulated {accumulated:.2}s)")]
    InsufficientDuration { target: f64, accumulated: f64 },
    /// `diagnostics` is the tool's stderr, unmodified.
    #[error("encoder failed (exit {status:?}): {diagnostics}")]
    Encoding {
        status: Option<i32>,
        diagnostics: String,
    },
    #[error("publication credentials invalid: {0}")]
    CredentialsInvalid(String),
    #[error("publication failed: {0}")]
    Publication(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn encoding(diagnostics: impl Into<String>) -> Self {
        CoreError::Encoding {
            status: None,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn is_credentials(&self) -> bool {
        matches!(self, CoreError::CredentialsInvalid(_))
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
