//! Platform descriptors and `os/arch[/variant]` selectors.

use std::fmt;

use incert_core::error::{IncertError, Result};
use serde::{Deserialize, Serialize};

/// Platform of an image as carried by index entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            os_version: None,
            os_features: None,
            variant: None,
            features: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Parse an `os/arch[/variant]` selector such as `linux/arm64/v8`.
    pub fn parse(selector: &str) -> Result<Self> {
        let parts: Vec<&str> = selector.trim().split('/').collect();
        let invalid = || {
            IncertError::ConfigError(format!(
                "invalid platform '{}', expected os/arch[/variant]",
                selector
            ))
        };

        if parts.iter().any(|part| part.is_empty()) {
            return Err(invalid());
        }

        match parts.as_slice() {
            [os, arch] => Ok(Self::new(*os, *arch)),
            [os, arch, variant] => Ok(Self::new(*os, *arch).with_variant(*variant)),
            _ => Err(invalid()),
        }
    }

    /// Linux on the architecture this process runs on, in OCI naming.
    pub fn host_linux() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new("linux", arch)
    }

    /// Whether `self`, used as a selector, accepts `candidate`.
    ///
    /// OS and architecture must be equal; variant and OS version only
    /// constrain the match when the selector sets them.
    pub fn matches(&self, candidate: &Platform) -> bool {
        if self.os != candidate.os || self.architecture != candidate.architecture {
            return false;
        }
        if let Some(variant) = &self.variant {
            if candidate.variant.as_ref() != Some(variant) {
                return false;
            }
        }
        if let Some(os_version) = &self.os_version {
            if candidate.os_version.as_ref() != Some(os_version) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}
