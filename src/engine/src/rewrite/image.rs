//! Rewriting a single-platform image.

use incert_core::config::RewriteConfig;
use incert_core::error::Result;

use super::flatten::locate_file;
use super::layer::LayerBuilder;
use super::merge::merge_with;
use crate::oci::{ContentAddressed, Image};

/// A rewritten image and the bundle bytes written into it.
#[derive(Debug, Clone)]
pub struct RewrittenImage {
    pub image: Image,
    pub merged: Vec<u8>,
}

/// Replaces or extends the certificate bundle of single-platform images.
#[derive(Debug, Clone, Copy)]
pub struct ImageRewriter<'a> {
    config: &'a RewriteConfig,
    addition: &'a [u8],
}

impl<'a> ImageRewriter<'a> {
    pub fn new(config: &'a RewriteConfig, addition: &'a [u8]) -> Self {
        Self { config, addition }
    }

    pub fn config(&self) -> &RewriteConfig {
        self.config
    }

    /// Locate, merge, build and append.
    ///
    /// Under replace the existing bundle is never read, so images without
    /// one are accepted. Under append a missing bundle fails the rewrite.
    pub fn rewrite(&self, image: &Image) -> Result<RewrittenImage> {
        let path = &self.config.cert_path;
        let merged = merge_with(self.addition, self.config.policy, || locate_file(image, path))?;

        let layer = LayerBuilder::from_config(self.config).build(&merged)?;
        let created_by = format!("incert: {} certificates at {}", self.config.policy, path);
        let rewritten = image.append_layer(layer, &created_by)?;

        tracing::debug!(
            source = %image.digest()?,
            rewritten = %rewritten.digest()?,
            policy = %self.config.policy,
            "Rewrote image"
        );

        Ok(RewrittenImage {
            image: rewritten,
            merged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::Platform;
    use incert_core::config::MergePolicy;
    use incert_core::error::IncertError;

    const CERT_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";

    fn base_image(bundle: Option<&[u8]>) -> Image {
        let image = Image::scratch(&Platform::new("linux", "amd64")).unwrap();
        match bundle {
            Some(content) => {
                let layer = LayerBuilder::new(CERT_PATH).build(content).unwrap();
                image.append_layer(layer, "base").unwrap()
            }
            None => {
                let layer = LayerBuilder::new("/etc/os-release").build(b"ID=test\n").unwrap();
                image.append_layer(layer, "base").unwrap()
            }
        }
    }

    fn config(policy: MergePolicy) -> RewriteConfig {
        RewriteConfig {
            policy,
            ..RewriteConfig::default()
        }
    }

    #[test]
    fn test_append_extends_bundle() {
        let base = base_image(Some(b"CERT_A\n"));
        let config = config(MergePolicy::Append);
        let result = ImageRewriter::new(&config, b"CERT_B").rewrite(&base).unwrap();

        assert_eq!(result.merged, b"CERT_A\nCERT_B\n");
        assert_eq!(locate_file(&result.image, CERT_PATH).unwrap(), b"CERT_A\nCERT_B\n");
        assert_eq!(result.image.layers().len(), 2);
        assert_eq!(result.image.layers()[0].digest(), base.layers()[0].digest());
    }

    #[test]
    fn test_append_without_bundle_fails() {
        let base = base_image(None);
        let config = config(MergePolicy::Append);
        let err = ImageRewriter::new(&config, b"CERT_B").rewrite(&base).unwrap_err();
        assert!(matches!(err, IncertError::TargetNotFound { ref path } if path == CERT_PATH));
    }

    #[test]
    fn test_replace_creates_missing_bundle() {
        let base = base_image(None);
        let config = config(MergePolicy::Replace);
        let result = ImageRewriter::new(&config, b"CERT_X").rewrite(&base).unwrap();
        assert_eq!(locate_file(&result.image, CERT_PATH).unwrap(), b"CERT_X");
    }

    #[test]
    fn test_replace_twice_is_idempotent() {
        let base = base_image(Some(b"CERT_A\n"));
        let config = config(MergePolicy::Replace);
        let rewriter = ImageRewriter::new(&config, b"CERT_X");

        let once = rewriter.rewrite(&base).unwrap();
        let twice = rewriter.rewrite(&once.image).unwrap();
        assert_eq!(locate_file(&twice.image, CERT_PATH).unwrap(), b"CERT_X");
    }

    #[test]
    fn test_rewrite_leaves_input_untouched() {
        let base = base_image(Some(b"CERT_A\n"));
        let before = base.digest().unwrap();
        let config = config(MergePolicy::Append);
        let result = ImageRewriter::new(&config, b"CERT_B").rewrite(&base).unwrap();

        assert_eq!(base.digest().unwrap(), before);
        assert_ne!(result.image.digest().unwrap(), before);
        assert_eq!(locate_file(&base, CERT_PATH).unwrap(), b"CERT_A\n");
    }

    #[test]
    fn test_new_layer_is_single_regular_file() {
        let base = base_image(Some(b"CERT_A\n"));
        let config = RewriteConfig {
            mode: 0o444,
            ..config(MergePolicy::Append)
        };
        let result = ImageRewriter::new(&config, b"CERT_B").rewrite(&base).unwrap();

        let mut archive = tar::Archive::new(result.image.layers()[1].reader().unwrap());
        let entries: Vec<_> = archive
            .entries()
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                let header = entry.header();
                (
                    entry.path().unwrap().to_string_lossy().into_owned(),
                    header.entry_type(),
                    header.mode().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            entries,
            vec![(
                "etc/ssl/certs/ca-certificates.crt".to_string(),
                tar::EntryType::Regular,
                0o444
            )]
        );
    }

    #[test]
    fn test_history_records_rewrite() {
        let base = base_image(Some(b"CERT_A\n"));
        let config = config(MergePolicy::Append);
        let result = ImageRewriter::new(&config, b"CERT_B").rewrite(&base).unwrap();
        let history = result.image.config_json().unwrap()["history"].clone();
        let last = history.as_array().unwrap().last().unwrap().clone();
        assert_eq!(
            last["created_by"],
            "incert: append certificates at /etc/ssl/certs/ca-certificates.crt"
        );
    }
}
