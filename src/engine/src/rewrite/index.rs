//! Recursive rewriting of multi-platform indexes.

use std::collections::HashMap;

use incert_core::error::{IncertError, Result};

use super::image::ImageRewriter;
use crate::oci::{Artifact, ContentAddressed, ImageIndex, ManifestKind};

/// Rewrites every image reachable from an index.
///
/// Entry count, order and metadata are kept; only the children change.
/// A child seen twice (by source digest) is rewritten once.
pub struct IndexRewriter<'a> {
    images: ImageRewriter<'a>,
    max_depth: usize,
    memo: HashMap<String, Artifact>,
    first_merged: Option<Vec<u8>>,
}

impl<'a> IndexRewriter<'a> {
    pub fn new(images: ImageRewriter<'a>) -> Self {
        Self {
            max_depth: images.config().max_index_depth,
            images,
            memo: HashMap::new(),
            first_merged: None,
        }
    }

    /// Bundle bytes written into the first image rewritten.
    pub fn merged_certificates(&self) -> Option<&[u8]> {
        self.first_merged.as_deref()
    }

    pub fn into_merged_certificates(self) -> Option<Vec<u8>> {
        self.first_merged
    }

    pub fn rewrite(&mut self, index: &ImageIndex) -> Result<ImageIndex> {
        self.rewrite_at(index, 1)
    }

    fn rewrite_at(&mut self, index: &ImageIndex, depth: usize) -> Result<ImageIndex> {
        if depth > self.max_depth {
            return Err(IncertError::IndexTooDeep {
                max_depth: self.max_depth,
            });
        }

        // Classify every entry up front so an unknown type aborts before any work.
        let kinds = index
            .entries()
            .iter()
            .map(|entry| ManifestKind::classify(&entry.metadata.media_type))
            .collect::<Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(kinds.len());
        for (entry, kind) in index.entries().iter().zip(kinds) {
            if kind != entry.child.kind() {
                return Err(IncertError::OciImageError(format!(
                    "Entry declared as {} ({}) references an {}",
                    kind,
                    entry.metadata.media_type,
                    entry.child.kind()
                )));
            }

            let source = entry.child.digest()?;
            let child = match self.memo.get(&source) {
                Some(done) => done.clone(),
                None => {
                    let rewritten = match &entry.child {
                        Artifact::Image(image) => {
                            let result = self.images.rewrite(image)?;
                            if self.first_merged.is_none() {
                                self.first_merged = Some(result.merged);
                            }
                            Artifact::Image(result.image)
                        }
                        Artifact::Index(nested) => {
                            Artifact::Index(self.rewrite_at(nested, depth + 1)?)
                        }
                    };
                    self.memo.insert(source.clone(), rewritten.clone());
                    rewritten
                }
            };

            tracing::debug!(
                depth,
                platform = ?entry.metadata.platform.as_ref().map(|p| p.to_string()),
                source = %source,
                rewritten = %child.digest()?,
                "Rewrote index entry"
            );
            entries.push(entry.with_child(child));
        }

        Ok(index.with_entries(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::media_type::{OCI_IMAGE_INDEX, OCI_IMAGE_MANIFEST};
    use crate::oci::{Annotations, EntryMetadata, Image, ManifestEntry, Platform};
    use crate::rewrite::flatten::locate_file;
    use crate::rewrite::layer::LayerBuilder;
    use incert_core::config::{MergePolicy, RewriteConfig};

    const CERT_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";

    fn leaf(platform: Platform, bundle: &[u8]) -> ManifestEntry {
        let layer = LayerBuilder::new(CERT_PATH).build(bundle).unwrap();
        let image = Image::scratch(&platform).unwrap().append_layer(layer, "base").unwrap();
        ManifestEntry::new(
            EntryMetadata::new(OCI_IMAGE_MANIFEST).with_platform(platform),
            Artifact::Image(image),
        )
    }

    fn nested(index: ImageIndex) -> ManifestEntry {
        ManifestEntry::new(EntryMetadata::new(OCI_IMAGE_INDEX), Artifact::Index(index))
    }

    fn config(policy: MergePolicy) -> RewriteConfig {
        RewriteConfig {
            policy,
            ..RewriteConfig::default()
        }
    }

    #[test]
    fn test_preserves_structure_and_metadata() {
        let mut annotated = leaf(Platform::new("linux", "arm64"), b"A\n");
        let mut annotations = Annotations::new();
        annotations.insert("vnd.example.role".to_string(), "worker".to_string());
        annotated.metadata.annotations = Some(annotations);
        annotated.metadata.urls = Some(vec!["https://mirror.example.com/x".to_string()]);

        let mut index_annotations = Annotations::new();
        index_annotations.insert("org.opencontainers.image.version".to_string(), "1".to_string());
        let index = ImageIndex::new(
            OCI_IMAGE_INDEX,
            vec![leaf(Platform::new("linux", "amd64"), b"A\n"), annotated],
        )
        .with_annotations(index_annotations);

        let config = config(MergePolicy::Append);
        let mut rewriter = IndexRewriter::new(ImageRewriter::new(&config, b"B"));
        let rewritten = rewriter.rewrite(&index).unwrap();

        assert_eq!(rewritten.entries().len(), 2);
        assert_eq!(rewritten.media_type(), index.media_type());
        assert_eq!(rewritten.annotations(), index.annotations());
        for (before, after) in index.entries().iter().zip(rewritten.entries()) {
            assert_eq!(before.metadata, after.metadata);
            assert_ne!(before.child.digest().unwrap(), after.child.digest().unwrap());
        }
        assert_eq!(rewriter.merged_certificates(), Some(&b"A\nB\n"[..]));
    }

    #[test]
    fn test_nested_indexes_rewritten() {
        let inner = ImageIndex::new(
            OCI_IMAGE_INDEX,
            vec![
                leaf(Platform::new("linux", "amd64"), b"A\n"),
                leaf(Platform::new("linux", "arm64"), b"A\n"),
            ],
        );
        let outer = ImageIndex::new(OCI_IMAGE_INDEX, vec![nested(inner)]);

        let config = config(MergePolicy::Replace);
        let rewritten = IndexRewriter::new(ImageRewriter::new(&config, b"X"))
            .rewrite(&outer)
            .unwrap();

        let Artifact::Index(inner) = &rewritten.entries()[0].child else {
            panic!("expected nested index");
        };
        for entry in inner.entries() {
            let Artifact::Image(image) = &entry.child else {
                panic!("expected image");
            };
            assert_eq!(locate_file(image, CERT_PATH).unwrap(), b"X");
        }
    }

    #[test]
    fn test_unknown_media_type_aborts() {
        let mut unknown = leaf(Platform::new("unknown", "unknown"), b"A\n");
        unknown.metadata.media_type = "application/vnd.in-toto+json".to_string();
        let index = ImageIndex::new(
            OCI_IMAGE_INDEX,
            vec![leaf(Platform::new("linux", "amd64"), b"A\n"), unknown],
        );

        let config = config(MergePolicy::Append);
        let mut rewriter = IndexRewriter::new(ImageRewriter::new(&config, b"B"));
        let err = rewriter.rewrite(&index).unwrap_err();

        assert!(matches!(err, IncertError::UnknownMediaType { .. }));
        assert!(rewriter.merged_certificates().is_none());
    }

    #[test]
    fn test_declared_kind_must_match_child() {
        let mut lying = leaf(Platform::new("linux", "amd64"), b"A\n");
        lying.metadata.media_type = OCI_IMAGE_INDEX.to_string();
        let index = ImageIndex::new(OCI_IMAGE_INDEX, vec![lying]);

        let config = config(MergePolicy::Append);
        let result = IndexRewriter::new(ImageRewriter::new(&config, b"B")).rewrite(&index);
        assert!(matches!(result, Err(IncertError::OciImageError(_))));
    }

    #[test]
    fn test_depth_limit() {
        let innermost = ImageIndex::new(OCI_IMAGE_INDEX, vec![leaf(Platform::new("linux", "amd64"), b"A\n")]);
        let middle = ImageIndex::new(OCI_IMAGE_INDEX, vec![nested(innermost)]);
        let outer = ImageIndex::new(OCI_IMAGE_INDEX, vec![nested(middle)]);

        let shallow = RewriteConfig {
            max_index_depth: 2,
            ..config(MergePolicy::Replace)
        };
        let err = IndexRewriter::new(ImageRewriter::new(&shallow, b"X"))
            .rewrite(&outer)
            .unwrap_err();
        assert!(matches!(err, IncertError::IndexTooDeep { max_depth: 2 }));

        let enough = RewriteConfig {
            max_index_depth: 3,
            ..config(MergePolicy::Replace)
        };
        assert!(IndexRewriter::new(ImageRewriter::new(&enough, b"X"))
            .rewrite(&outer)
            .is_ok());
    }

    #[test]
    fn test_shared_child_rewritten_once() {
        let shared = leaf(Platform::new("linux", "amd64"), b"A\n");
        let index = ImageIndex::new(OCI_IMAGE_INDEX, vec![shared.clone(), shared]);

        let config = config(MergePolicy::Append);
        let rewritten = IndexRewriter::new(ImageRewriter::new(&config, b"B"))
            .rewrite(&index)
            .unwrap();

        let digests: Vec<_> = rewritten
            .entries()
            .iter()
            .map(|e| e.child.digest().unwrap())
            .collect();
        assert_eq!(digests[0], digests[1]);
    }

    #[test]
    fn test_append_missing_target_in_any_leaf_fails() {
        let stripped = {
            let layer = LayerBuilder::new("/etc/hostname").build(b"box\n").unwrap();
            let image = Image::scratch(&Platform::new("linux", "s390x"))
                .unwrap()
                .append_layer(layer, "base")
                .unwrap();
            ManifestEntry::new(
                EntryMetadata::new(OCI_IMAGE_MANIFEST).with_platform(Platform::new("linux", "s390x")),
                Artifact::Image(image),
            )
        };
        let index = ImageIndex::new(
            OCI_IMAGE_INDEX,
            vec![leaf(Platform::new("linux", "amd64"), b"A\n"), stripped],
        );

        let config = config(MergePolicy::Append);
        let result = IndexRewriter::new(ImageRewriter::new(&config, b"B")).rewrite(&index);
        assert!(matches!(result, Err(IncertError::TargetNotFound { .. })));
    }

    /// Attestation manifests carry an image media type, so they are rewritten
    /// like any other image.
    #[test]
    fn test_attestation_entry_treated_as_image() {
        let attestation = {
            let layer = LayerBuilder::new("/sbom.spdx.json").build(b"{}").unwrap();
            let image = Image::scratch(&Platform::new("unknown", "unknown"))
                .unwrap()
                .append_layer(layer, "attestation")
                .unwrap();
            ManifestEntry::new(
                EntryMetadata::new(OCI_IMAGE_MANIFEST)
                    .with_platform(Platform::new("unknown", "unknown")),
                Artifact::Image(image),
            )
        };
        let index = ImageIndex::new(
            OCI_IMAGE_INDEX,
            vec![leaf(Platform::new("linux", "amd64"), b"A\n"), attestation],
        );

        let append = config(MergePolicy::Append);
        let result = IndexRewriter::new(ImageRewriter::new(&append, b"B")).rewrite(&index);
        assert!(matches!(result, Err(IncertError::TargetNotFound { .. })));

        let replace = config(MergePolicy::Replace);
        let rewritten = IndexRewriter::new(ImageRewriter::new(&replace, b"X"))
            .rewrite(&index)
            .unwrap();
        let Artifact::Image(image) = &rewritten.entries()[1].child else {
            panic!("expected image");
        };
        assert_eq!(image.layers().len(), 2);
        assert_eq!(locate_file(image, CERT_PATH).unwrap(), b"X");
    }
}
