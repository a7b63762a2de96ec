//! Multi-platform image indexes and the image/index union.

use std::sync::Arc;

use incert_core::error::{IncertError, Result};

use super::digest::{sha256_digest, ContentAddressed};
use super::image::Image;
use super::manifest::{Annotations, Descriptor, IndexManifest};
use super::media_type::{ManifestKind, OCI_IMAGE_INDEX};
use super::platform::Platform;

/// Per-entry data an index carries alongside the child reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub media_type: String,
    pub platform: Option<Platform>,
    pub urls: Option<Vec<String>>,
    pub annotations: Option<Annotations>,
}

impl EntryMetadata {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            platform: None,
            urls: None,
            annotations: None,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    fn from_descriptor(descriptor: &Descriptor) -> Self {
        Self {
            media_type: descriptor.media_type.clone(),
            platform: descriptor.platform.clone(),
            urls: descriptor.urls.clone(),
            annotations: descriptor.annotations.clone(),
        }
    }

    /// Descriptor for a child with the given digest and size.
    fn describe(&self, digest: String, size: u64) -> Descriptor {
        Descriptor {
            media_type: self.media_type.clone(),
            digest,
            size,
            urls: self.urls.clone(),
            annotations: self.annotations.clone(),
            platform: self.platform.clone(),
        }
    }
}

/// One entry of an index: metadata plus the child it points at.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub metadata: EntryMetadata,
    pub child: Artifact,
}

impl ManifestEntry {
    pub fn new(metadata: EntryMetadata, child: Artifact) -> Self {
        Self { metadata, child }
    }

    /// The child replaced, metadata untouched.
    pub fn with_child(&self, child: Artifact) -> Self {
        Self {
            metadata: self.metadata.clone(),
            child,
        }
    }
}

/// An ordered collection of per-platform images or nested indexes.
#[derive(Debug, Clone)]
pub struct ImageIndex {
    schema_version: u32,
    media_type: Option<String>,
    annotations: Option<Annotations>,
    entries: Vec<ManifestEntry>,
    raw_manifest: Option<Arc<[u8]>>,
}

impl ImageIndex {
    pub fn new(media_type: impl Into<String>, entries: Vec<ManifestEntry>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type.into()),
            annotations: None,
            entries,
            raw_manifest: None,
        }
    }

    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = Some(annotations);
        self.raw_manifest = None;
        self
    }

    /// Assemble an index from manifest bytes as served by a registry and its
    /// already fetched children, in manifest order.
    pub fn from_manifest_bytes(raw: &[u8], children: Vec<Artifact>) -> Result<Self> {
        let manifest: IndexManifest = serde_json::from_slice(raw)?;
        if manifest.manifests.len() != children.len() {
            return Err(IncertError::OciImageError(format!(
                "Index lists {} manifests but {} were supplied",
                manifest.manifests.len(),
                children.len()
            )));
        }

        let mut entries = Vec::with_capacity(children.len());
        for (descriptor, child) in manifest.manifests.iter().zip(children) {
            let digest = child.digest()?;
            if digest != descriptor.digest {
                return Err(IncertError::OciImageError(format!(
                    "Index entry {} does not match child {}",
                    descriptor.digest, digest
                )));
            }
            entries.push(ManifestEntry::new(
                EntryMetadata::from_descriptor(descriptor),
                child,
            ));
        }

        Ok(Self {
            schema_version: manifest.schema_version,
            media_type: manifest.media_type,
            annotations: manifest.annotations,
            entries,
            raw_manifest: Some(raw.into()),
        })
    }

    /// Same index-level fields, new entries.
    pub fn with_entries(&self, entries: Vec<ManifestEntry>) -> Self {
        Self {
            schema_version: self.schema_version,
            media_type: self.media_type.clone(),
            annotations: self.annotations.clone(),
            entries,
            raw_manifest: None,
        }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn annotations(&self) -> Option<&Annotations> {
        self.annotations.as_ref()
    }

    /// Serializable manifest with descriptors computed from the children.
    pub fn manifest(&self) -> Result<IndexManifest> {
        let mut manifests = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let bytes = entry.child.manifest_bytes()?;
            let digest = sha256_digest(&bytes);
            manifests.push(entry.metadata.describe(digest, bytes.len() as u64));
        }

        Ok(IndexManifest {
            schema_version: self.schema_version,
            media_type: self.media_type.clone(),
            manifests,
            annotations: self.annotations.clone(),
        })
    }
}

impl ContentAddressed for ImageIndex {
    fn media_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or(OCI_IMAGE_INDEX)
    }

    fn manifest_bytes(&self) -> Result<Vec<u8>> {
        match &self.raw_manifest {
            Some(raw) => Ok(raw.to_vec()),
            None => Ok(serde_json::to_vec(&self.manifest()?)?),
        }
    }
}

/// What a reference resolves to.
#[derive(Debug, Clone)]
pub enum Artifact {
    Image(Image),
    Index(ImageIndex),
}

impl Artifact {
    pub fn kind(&self) -> ManifestKind {
        match self {
            Artifact::Image(_) => ManifestKind::Image,
            Artifact::Index(_) => ManifestKind::Index,
        }
    }

    /// First image, depth first in entry order, whose platform matches.
    ///
    /// A single image is returned as is; it carries no platform to compare.
    pub fn select_platform(&self, platform: &Platform) -> Result<&Image> {
        find_platform(self, platform).ok_or_else(|| IncertError::PlatformNotFound {
            platform: platform.to_string(),
        })
    }
}

fn find_platform<'a>(artifact: &'a Artifact, platform: &Platform) -> Option<&'a Image> {
    match artifact {
        Artifact::Image(image) => Some(image),
        Artifact::Index(index) => index.entries().iter().find_map(|entry| match &entry.child {
            Artifact::Image(image) => entry
                .metadata
                .platform
                .as_ref()
                .filter(|candidate| platform.matches(candidate))
                .map(|_| image),
            Artifact::Index(_) => find_platform(&entry.child, platform),
        }),
    }
}

impl ContentAddressed for Artifact {
    fn media_type(&self) -> &str {
        match self {
            Artifact::Image(image) => image.media_type(),
            Artifact::Index(index) => index.media_type(),
        }
    }

    fn manifest_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Artifact::Image(image) => image.manifest_bytes(),
            Artifact::Index(index) => index.manifest_bytes(),
        }
    }
}
