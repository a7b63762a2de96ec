//! Manifest and layer media types.

use incert_core::error::{IncertError, Result};
use serde::Deserialize;

pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Manifest types requested when resolving a reference.
pub const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    OCI_IMAGE_INDEX,
    DOCKER_MANIFEST_LIST,
    OCI_IMAGE_MANIFEST,
    DOCKER_MANIFEST_V2,
];

/// What a manifest describes. Anything else is rejected when classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Image,
    Index,
}

impl ManifestKind {
    /// Classify a declared media type.
    pub fn classify(media_type: &str) -> Result<Self> {
        match media_type {
            OCI_IMAGE_MANIFEST | DOCKER_MANIFEST_V2 => Ok(ManifestKind::Image),
            OCI_IMAGE_INDEX | DOCKER_MANIFEST_LIST => Ok(ManifestKind::Index),
            other => Err(IncertError::UnknownMediaType {
                media_type: other.to_string(),
            }),
        }
    }

    /// Classify raw manifest bytes by their `mediaType` field.
    ///
    /// OCI manifests may omit the field; an index is then recognised by its
    /// `manifests` array and an image by its `layers` array.
    pub fn sniff(manifest: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Probe {
            media_type: Option<String>,
            manifests: Option<serde_json::Value>,
            layers: Option<serde_json::Value>,
        }

        let probe: Probe = serde_json::from_slice(manifest)?;
        match probe.media_type {
            Some(media_type) => Self::classify(&media_type),
            None if probe.manifests.is_some() => Ok(ManifestKind::Index),
            None if probe.layers.is_some() => Ok(ManifestKind::Image),
            None => Err(IncertError::UnknownMediaType {
                media_type: "<unspecified>".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestKind::Image => write!(f, "image"),
            ManifestKind::Index => write!(f, "index"),
        }
    }
}

/// Whether a manifest media type belongs to the Docker v2 family.
pub fn is_docker(media_type: &str) -> bool {
    media_type.starts_with("application/vnd.docker.")
}

/// Layer media type matching the flavour of an image manifest.
pub fn layer_media_type_for(manifest_media_type: &str) -> &'static str {
    if is_docker(manifest_media_type) {
        DOCKER_LAYER_GZIP
    } else {
        OCI_LAYER_GZIP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_images() {
        assert_eq!(ManifestKind::classify(OCI_IMAGE_MANIFEST).unwrap(), ManifestKind::Image);
        assert_eq!(ManifestKind::classify(DOCKER_MANIFEST_V2).unwrap(), ManifestKind::Image);
    }

    #[test]
    fn test_classify_indexes() {
        assert_eq!(ManifestKind::classify(OCI_IMAGE_INDEX).unwrap(), ManifestKind::Index);
        assert_eq!(ManifestKind::classify(DOCKER_MANIFEST_LIST).unwrap(), ManifestKind::Index);
    }

    #[test]
    fn test_classify_unknown() {
        let err = ManifestKind::classify("application/vnd.in-toto+json").unwrap_err();
        assert!(matches!(
            err,
            IncertError::UnknownMediaType { ref media_type } if media_type == "application/vnd.in-toto+json"
        ));
    }

    #[test]
    fn test_sniff_declared_media_type() {
        let manifest = br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.list.v2+json","manifests":[]}"#;
        assert_eq!(ManifestKind::sniff(manifest).unwrap(), ManifestKind::Index);
    }

    #[test]
    fn test_sniff_without_media_type() {
        let index = br#"{"schemaVersion":2,"manifests":[]}"#;
        assert_eq!(ManifestKind::sniff(index).unwrap(), ManifestKind::Index);

        let image = br#"{"schemaVersion":2,"config":{},"layers":[]}"#;
        assert_eq!(ManifestKind::sniff(image).unwrap(), ManifestKind::Image);
    }

    #[test]
    fn test_sniff_unrecognised() {
        let result = ManifestKind::sniff(br#"{"schemaVersion":2}"#);
        assert!(matches!(result, Err(IncertError::UnknownMediaType { .. })));
    }

    #[test]
    fn test_sniff_invalid_json() {
        let result = ManifestKind::sniff(b"not json");
        assert!(matches!(result, Err(IncertError::SerializationError(_))));
    }

    #[test]
    fn test_layer_media_type_for() {
        assert_eq!(layer_media_type_for(DOCKER_MANIFEST_V2), DOCKER_LAYER_GZIP);
        assert_eq!(layer_media_type_for(OCI_IMAGE_MANIFEST), OCI_LAYER_GZIP);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ManifestKind::Image.to_string(), "image");
        assert_eq!(ManifestKind::Index.to_string(), "index");
    }
}
