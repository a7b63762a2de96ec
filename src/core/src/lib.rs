//! incert Core - Shared Types
//!
//! Error taxonomy and the immutable run configuration shared by the
//! rewrite engine and the command line front end.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{CertificateSource, MergePolicy, Ownership, RewriteConfig, RunConfig};
pub use error::{IncertError, Result};

/// incert version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
