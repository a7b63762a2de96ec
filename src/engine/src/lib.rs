//! incert Engine - CA bundle injection for container images.
//!
//! This crate provides the OCI image model, registry access, certificate
//! bundle rewriting for images and multi-platform indexes, and the
//! pipeline that ties them together.

#![allow(clippy::result_large_err)]

pub mod certs;
pub mod oci;
pub mod pipeline;
pub mod rewrite;

// Re-export common types
pub use certs::validate_certificate_bundle;
pub use oci::{Artifact, ContentAddressed, Image, ImageIndex, ImageReference, Layer, Platform};
pub use oci::{OciRegistry, Registry, RegistryAuth};
pub use pipeline::{Pipeline, PipelineReport};
pub use rewrite::{locate_file, rewrite_artifact, ImageRewriter, IndexRewriter, LayerBuilder, RewriteOutcome};

/// incert Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
