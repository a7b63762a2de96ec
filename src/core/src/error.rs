use thiserror::Error;

/// incert error types
#[derive(Error, Debug)]
pub enum IncertError {
    /// Missing or contradictory run options
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Malformed image reference
    #[error("Invalid image reference '{reference}': {message}")]
    ReferenceError { reference: String, message: String },

    /// Input bytes do not contain a valid PEM certificate block
    #[error("Certificate format error: {0}")]
    CertificateError(String),

    /// Source content unreachable, unauthorized or corrupt
    #[error("Fetch error: {reference} - {message}")]
    FetchError { reference: String, message: String },

    /// Target file absent from the flattened image
    #[error("Target file not found: {path}")]
    TargetNotFound { path: String },

    /// Manifest entry whose media type is neither an image nor an index
    #[error("Unknown media type: {media_type}")]
    UnknownMediaType { media_type: String },

    /// Layer construction failed
    #[error("Layer build failed: {0}")]
    BuildError(String),

    /// Destination unreachable, unauthorized or rejected the upload
    #[error("Push error: {reference} - {message}")]
    PushError { reference: String, message: String },

    /// Platform selector matched no bundle entry
    #[error("Platform '{platform}' not available in image index")]
    PlatformNotFound { platform: String },

    /// Bundle nesting deeper than the configured limit
    #[error("Image index nesting exceeds maximum depth of {max_depth}")]
    IndexTooDeep { max_depth: usize },

    /// Malformed manifest or config content
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for IncertError {
    fn from(err: serde_json::Error) -> Self {
        IncertError::SerializationError(err.to_string())
    }
}

/// Result type alias for incert operations
pub type Result<T> = std::result::Result<T, IncertError>;
