use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{IncertError, Result};

/// Default location of the CA bundle inside an image.
pub const DEFAULT_CERT_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Default permission bits stamped on the rewritten bundle.
pub const DEFAULT_CERT_MODE: u32 = 0o644;

/// Default limit on image index nesting.
pub const DEFAULT_MAX_INDEX_DEPTH: usize = 16;

/// How new certificate bytes are combined with the bundle already in the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Existing bundle, then the new bytes, then a newline.
    #[default]
    Append,
    /// The new bytes only. The image is never read.
    Replace,
}

impl std::fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergePolicy::Append => write!(f, "append"),
            MergePolicy::Replace => write!(f, "replace"),
        }
    }
}

/// Numeric owner stamped on the rewritten file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub uid: u64,
    pub gid: u64,
}

/// Settings read by the rewrite engine. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteConfig {
    /// Absolute path of the certificate bundle inside the image
    pub cert_path: String,

    /// Mode bits of the rewritten file
    pub mode: u32,

    /// Owner of the rewritten file
    pub owner: Ownership,

    /// Append to or replace the existing bundle
    pub policy: MergePolicy,

    /// Maximum image index nesting before the rewrite is refused
    pub max_index_depth: usize,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            cert_path: DEFAULT_CERT_PATH.to_string(),
            mode: DEFAULT_CERT_MODE,
            owner: Ownership::default(),
            policy: MergePolicy::default(),
            max_index_depth: DEFAULT_MAX_INDEX_DEPTH,
        }
    }
}

/// Where the certificates to inject come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateSource {
    /// A PEM bundle on the local filesystem
    File(PathBuf),
    /// The bundle at `cert_path` inside another image
    Image(String),
}

impl CertificateSource {
    /// Build from the two mutually exclusive options; exactly one must be set.
    pub fn from_options(file: Option<PathBuf>, image: Option<String>) -> Result<Self> {
        match (file, image) {
            (Some(file), None) => Ok(CertificateSource::File(file)),
            (None, Some(image)) => Ok(CertificateSource::Image(image)),
            (Some(_), Some(_)) => Err(IncertError::ConfigError(
                "only one of a certificate file or a certificate image may be given".to_string(),
            )),
            (None, None) => Err(IncertError::ConfigError(
                "either a certificate file or a certificate image must be given".to_string(),
            )),
        }
    }
}

/// Complete description of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Image or index to rewrite
    pub source: String,

    /// Where the rewritten image is pushed
    pub destination: String,

    /// Certificates to inject
    pub certificates: CertificateSource,

    /// Optional `os/arch[/variant]` selector
    pub platform: Option<String>,

    /// Optional local copy of the final bundle
    pub output_certs: Option<PathBuf>,

    /// Engine settings
    pub rewrite: RewriteConfig,
}

impl RunConfig {
    /// Reject options the pipeline cannot act on.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(IncertError::ConfigError(
                "source image reference is required".to_string(),
            ));
        }
        if self.destination.trim().is_empty() {
            return Err(IncertError::ConfigError(
                "destination image reference is required".to_string(),
            ));
        }
        if !self.rewrite.cert_path.starts_with('/') {
            return Err(IncertError::ConfigError(format!(
                "certificate path must be absolute, got '{}'",
                self.rewrite.cert_path
            )));
        }
        if self.rewrite.max_index_depth == 0 {
            return Err(IncertError::ConfigError(
                "maximum index depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
