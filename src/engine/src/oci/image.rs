//! Immutable single-platform images.

use std::sync::Arc;

use incert_core::error::{IncertError, Result};
use serde_json::{json, Value};

use super::digest::{sha256_digest, ContentAddressed};
use super::layer::Layer;
use super::manifest::{Descriptor, ImageManifest};
use super::media_type::{layer_media_type_for, OCI_IMAGE_CONFIG, OCI_IMAGE_MANIFEST};
use super::platform::Platform;

/// An image manifest together with its config blob and layer blobs.
///
/// Values are never mutated; [`Image::append_layer`] returns a new image.
#[derive(Debug, Clone)]
pub struct Image {
    manifest: ImageManifest,
    raw_manifest: Option<Arc<[u8]>>,
    config: Arc<[u8]>,
    layers: Vec<Layer>,
}

impl Image {
    /// Assemble an image, checking the blobs against the manifest.
    pub fn new(manifest: ImageManifest, config: impl Into<Arc<[u8]>>, layers: Vec<Layer>) -> Result<Self> {
        let config = config.into();

        let config_digest = sha256_digest(&config);
        if config_digest != manifest.config.digest {
            return Err(IncertError::OciImageError(format!(
                "Config digest mismatch: manifest says {}, blob is {}",
                manifest.config.digest, config_digest
            )));
        }

        if layers.len() != manifest.layers.len() {
            return Err(IncertError::OciImageError(format!(
                "Manifest lists {} layers but {} were supplied",
                manifest.layers.len(),
                layers.len()
            )));
        }
        for (declared, layer) in manifest.layers.iter().zip(&layers) {
            if declared.digest != layer.digest() {
                return Err(IncertError::OciImageError(format!(
                    "Layer {} does not match manifest entry {}",
                    layer.digest(),
                    declared.digest
                )));
            }
        }

        Ok(Self {
            manifest,
            raw_manifest: None,
            config,
            layers,
        })
    }

    /// Assemble an image from the manifest bytes as served by a registry.
    ///
    /// The bytes are kept so the image keeps the identity it was fetched under.
    pub fn from_manifest_bytes(
        raw: &[u8],
        config: impl Into<Arc<[u8]>>,
        layers: Vec<Layer>,
    ) -> Result<Self> {
        let manifest: ImageManifest = serde_json::from_slice(raw)?;
        let mut image = Self::new(manifest, config, layers)?;
        image.raw_manifest = Some(raw.into());
        Ok(image)
    }

    /// An image without layers for the given platform.
    pub fn scratch(platform: &Platform) -> Result<Self> {
        let mut config = json!({
            "architecture": platform.architecture,
            "os": platform.os,
        });
        if let Some(variant) = &platform.variant {
            config["variant"] = json!(variant);
        }
        config["config"] = json!({});
        config["rootfs"] = json!({ "type": "layers", "diff_ids": [] });
        config["history"] = json!([]);

        let config = serde_json::to_vec(&config)?;
        let manifest = ImageManifest {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_MANIFEST.to_string()),
            config: Descriptor::new(OCI_IMAGE_CONFIG, sha256_digest(&config), config.len() as u64),
            layers: Vec::new(),
            annotations: None,
        };
        Self::new(manifest, config, Vec::new())
    }

    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    pub fn config_bytes(&self) -> &[u8] {
        &self.config
    }

    /// Layers, base first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Parsed config blob, key order preserved.
    pub fn config_json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.config)?)
    }

    /// A new image with `layer` on top of this one's layers.
    ///
    /// The layer's media type is aligned with the manifest flavour, its
    /// diff_id is recorded under `rootfs.diff_ids` and a history entry
    /// carrying `created_by` is appended.
    pub fn append_layer(&self, layer: Layer, created_by: &str) -> Result<Image> {
        let diff_id = layer
            .diff_id()
            .ok_or_else(|| IncertError::BuildError("Appended layer has no diff_id".to_string()))?
            .to_string();
        let layer = layer.with_media_type(layer_media_type_for(self.media_type()));

        let mut config = self.config_json()?;
        let root = config.as_object_mut().ok_or_else(|| {
            IncertError::OciImageError("Image config is not a JSON object".to_string())
        })?;

        let rootfs = root
            .entry("rootfs")
            .or_insert_with(|| json!({ "type": "layers", "diff_ids": [] }));
        push_to_array(rootfs, "diff_ids", json!(diff_id))?;
        push_to_array(&mut config, "history", json!({ "created_by": created_by }))?;

        let config_bytes = serde_json::to_vec(&config)?;

        let mut manifest = self.manifest.clone();
        manifest.config = Descriptor {
            digest: sha256_digest(&config_bytes),
            size: config_bytes.len() as u64,
            ..self.manifest.config.clone()
        };
        manifest.layers.push(layer.descriptor().clone());

        let mut layers = self.layers.clone();
        layers.push(layer);

        tracing::debug!(
            layers = layers.len(),
            diff_id = %diff_id,
            "Appended layer to image"
        );

        Image::new(manifest, config_bytes, layers)
    }
}

fn push_to_array(parent: &mut Value, key: &str, item: Value) -> Result<()> {
    let object = parent.as_object_mut().ok_or_else(|| {
        IncertError::OciImageError(format!("Image config parent of '{}' is not an object", key))
    })?;
    let slot = object.entry(key).or_insert_with(|| json!([]));
    if slot.is_null() {
        *slot = json!([]);
    }
    slot.as_array_mut()
        .ok_or_else(|| IncertError::OciImageError(format!("Image config '{}' is not an array", key)))?
        .push(item);
    Ok(())
}

impl ContentAddressed for Image {
    fn media_type(&self) -> &str {
        self.manifest
            .media_type
            .as_deref()
            .unwrap_or(OCI_IMAGE_MANIFEST)
    }

    fn manifest_bytes(&self) -> Result<Vec<u8>> {
        match &self.raw_manifest {
            Some(raw) => Ok(raw.to_vec()),
            None => Ok(serde_json::to_vec(&self.manifest)?),
        }
    }
}
