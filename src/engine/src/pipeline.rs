//! The end-to-end run: resolve, validate, rewrite, persist, push, report.
//!
//! Every step either succeeds or aborts the run. Rewriting finishes before
//! anything is pushed, so a failed run never publishes a partial image.

use std::fmt;
use std::path::Path;

use incert_core::config::{CertificateSource, RunConfig};
use incert_core::error::{IncertError, Result};

use crate::certs::validate_certificate_bundle;
use crate::oci::{Artifact, ContentAddressed, ImageReference, Platform, Registry};
use crate::rewrite::{locate_file, rewrite_artifact};

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Destination reference as given
    pub reference: String,
    /// `sha256:<hex>` of the pushed manifest
    pub digest: String,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.reference, self.digest)
    }
}

/// Runs certificate injection against a registry.
pub struct Pipeline<R: Registry> {
    registry: R,
}

impl<R: Registry> Pipeline<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub async fn run(&self, config: &RunConfig) -> Result<PipelineReport> {
        config.validate()?;

        let source = ImageReference::parse(&config.source)?;
        let destination = ImageReference::parse(&config.destination)?;
        if destination.digest.is_some() {
            return Err(IncertError::ConfigError(format!(
                "destination '{}' must be a tag, not a digest",
                config.destination
            )));
        }
        let platform = config
            .platform
            .as_deref()
            .map(Platform::parse)
            .transpose()?;

        let addition = self.load_certificates(config, platform.as_ref()).await?;
        let count = validate_certificate_bundle(&addition)?;
        tracing::info!(certificates = count, bytes = addition.len(), "Loaded certificates");

        let fetched = self.registry.fetch(&source).await?;
        let target = match (&platform, &fetched) {
            (Some(platform), Artifact::Index(_)) => {
                let image = fetched.select_platform(platform)?;
                tracing::info!(platform = %platform, digest = %image.digest()?, "Selected platform");
                Artifact::Image(image.clone())
            }
            _ => fetched,
        };

        tracing::info!(
            source = %source,
            kind = %target.kind(),
            path = %config.rewrite.cert_path,
            policy = %config.rewrite.policy,
            "Rewriting certificates"
        );
        let outcome = rewrite_artifact(&target, &addition, &config.rewrite)?;

        if let Some(path) = &config.output_certs {
            match &outcome.merged {
                Some(merged) => write_certificates(path, merged).await?,
                None => tracing::warn!(
                    path = %path.display(),
                    "Index contains no images, certificate output not written"
                ),
            }
        }

        let digest = self.registry.push(&destination, &outcome.artifact).await?;

        Ok(PipelineReport {
            reference: config.destination.trim().to_string(),
            digest,
        })
    }

    async fn load_certificates(
        &self,
        config: &RunConfig,
        platform: Option<&Platform>,
    ) -> Result<Vec<u8>> {
        match &config.certificates {
            CertificateSource::File(path) => tokio::fs::read(path).await.map_err(|e| {
                IncertError::ConfigError(format!(
                    "Failed to read certificate file {}: {}",
                    path.display(),
                    e
                ))
            }),
            CertificateSource::Image(reference) => {
                let reference = ImageReference::parse(reference)?;
                let artifact = self.registry.fetch(&reference).await?;
                let platform = platform.cloned().unwrap_or_else(Platform::host_linux);
                let image = artifact.select_platform(&platform)?;

                tracing::info!(
                    reference = %reference,
                    path = %config.rewrite.cert_path,
                    "Reading certificates from image"
                );
                locate_file(image, &config.rewrite.cert_path)
            }
        }
    }
}

async fn write_certificates(path: &Path, merged: &[u8]) -> Result<()> {
    tokio::fs::write(path, merged).await.map_err(|e| {
        IncertError::ConfigError(format!(
            "Failed to write certificates to {}: {}",
            path.display(),
            e
        ))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await?;
    }

    tracing::info!(path = %path.display(), bytes = merged.len(), "Wrote certificates");
    Ok(())
}
