//! Certificate bundle rewriting.
//!
//! - [`flatten`] finds a file in the union of an image's layers
//! - [`merge`] combines the found bytes with the new certificates
//! - [`layer`] packages the result as a one-file layer
//! - [`image`] and [`index`] put that layer on every image reached
//!
//! Everything here is synchronous and works on in-memory values; fetching
//! and pushing happen around it.

pub mod flatten;
pub mod image;
pub mod index;
pub mod layer;
pub mod merge;

pub use flatten::{locate_file, LayerFlattener};
pub use image::{ImageRewriter, RewrittenImage};
pub use index::IndexRewriter;
pub use layer::LayerBuilder;
pub use merge::{merge, merge_with};

use incert_core::config::RewriteConfig;
use incert_core::error::Result;

use crate::oci::Artifact;

/// Result of rewriting an image or an index.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub artifact: Artifact,
    /// Bundle written into the image, or into the first image of an index.
    /// `None` for an index without images.
    pub merged: Option<Vec<u8>>,
}

/// Rewrite `artifact` with `addition` under `config`.
pub fn rewrite_artifact(
    artifact: &Artifact,
    addition: &[u8],
    config: &RewriteConfig,
) -> Result<RewriteOutcome> {
    let images = ImageRewriter::new(config, addition);

    match artifact {
        Artifact::Image(image) => {
            let rewritten = images.rewrite(image)?;
            Ok(RewriteOutcome {
                artifact: Artifact::Image(rewritten.image),
                merged: Some(rewritten.merged),
            })
        }
        Artifact::Index(index) => {
            let mut rewriter = IndexRewriter::new(images);
            let rewritten = rewriter.rewrite(index)?;
            Ok(RewriteOutcome {
                artifact: Artifact::Index(rewritten),
                merged: rewriter.into_merged_certificates(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::media_type::OCI_IMAGE_INDEX;
    use crate::oci::{ContentAddressed, Image, ImageIndex, Platform};
    use incert_core::config::MergePolicy;

    #[test]
    fn test_rewrite_single_image() {
        let image = Image::scratch(&Platform::new("linux", "amd64")).unwrap();
        let config = RewriteConfig {
            policy: MergePolicy::Replace,
            ..RewriteConfig::default()
        };
        let outcome = rewrite_artifact(&Artifact::Image(image), b"CERT_X", &config).unwrap();
        assert_eq!(outcome.merged.as_deref(), Some(&b"CERT_X"[..]));
        assert!(matches!(outcome.artifact, Artifact::Image(_)));
    }

    #[test]
    fn test_rewrite_empty_index() {
        let index = ImageIndex::new(OCI_IMAGE_INDEX, Vec::new());
        let before = index.digest().unwrap();
        let outcome =
            rewrite_artifact(&Artifact::Index(index), b"CERT_X", &RewriteConfig::default()).unwrap();
        assert!(outcome.merged.is_none());
        assert_eq!(outcome.artifact.digest().unwrap(), before);
    }
}
