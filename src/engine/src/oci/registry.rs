//! Registry access for fetching and publishing images and indexes.
//!
//! [`OciRegistry`] talks to real registries through `oci-distribution`.
//! Manifests travel as raw bytes in both directions so the digests computed
//! locally are the digests the registry serves.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use incert_core::config::DEFAULT_MAX_INDEX_DEPTH;
use incert_core::error::{IncertError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::credentials::CredentialStore;
use super::digest::{sha256_digest, ContentAddressed};
use super::image::Image;
use super::index::{Artifact, ImageIndex};
use super::layer::Layer;
use super::manifest::{Descriptor, ImageManifest, IndexManifest};
use super::media_type::{ManifestKind, ACCEPTED_MANIFEST_TYPES};
use super::reference::ImageReference;

/// Source and sink of images.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Resolve a reference to an image or an index, with all content pulled.
    async fn fetch(&self, reference: &ImageReference) -> Result<Artifact>;

    /// Publish an artifact under `reference` and return its digest.
    async fn push(&self, reference: &ImageReference, artifact: &Artifact) -> Result<String>;
}

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, or anonymous.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    /// Docker config (helpers included) for `registry`, then the environment,
    /// then anonymous.
    pub async fn resolve(registry: &str) -> Self {
        let found = match CredentialStore::default_path() {
            Ok(store) => store.get(registry).await,
            Err(e) => Err(e),
        };
        match found {
            Ok(Some((username, password))) => return Self::basic(username, password),
            Ok(None) => {}
            Err(e) => tracing::warn!(registry, error = %e, "Ignoring unusable Docker credentials"),
        }
        Self::from_env()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// [`Registry`] backed by the OCI distribution API.
pub struct OciRegistry {
    client: Client,
    max_index_depth: usize,
}

impl OciRegistry {
    /// A client speaking HTTPS to every registry except the listed hosts.
    pub fn new(insecure_registries: &[String]) -> Self {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries.to_vec())
        };
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };

        Self {
            client: Client::new(config),
            max_index_depth: DEFAULT_MAX_INDEX_DEPTH,
        }
    }

    pub fn with_max_index_depth(mut self, max_index_depth: usize) -> Self {
        self.max_index_depth = max_index_depth;
        self
    }

    fn fetch_error(reference: &ImageReference, message: String) -> IncertError {
        IncertError::FetchError {
            reference: reference.to_string(),
            message,
        }
    }

    fn push_error(reference: &ImageReference, message: String) -> IncertError {
        IncertError::PushError {
            reference: reference.to_string(),
            message,
        }
    }

    /// Pull the manifest `oci_ref` names and everything below it.
    ///
    /// `expected` is the digest a parent index recorded for this manifest.
    fn fetch_artifact<'a>(
        &'a self,
        source: &'a ImageReference,
        oci_ref: Reference,
        auth: &'a OciRegistryAuth,
        expected: Option<String>,
        depth: usize,
        cache: &'a mut HashMap<String, Artifact>,
    ) -> BoxFuture<'a, Result<Artifact>> {
        async move {
            if depth > self.max_index_depth {
                return Err(IncertError::IndexTooDeep {
                    max_depth: self.max_index_depth,
                });
            }

            let (raw, _) = self
                .client
                .pull_manifest_raw(&oci_ref, auth, ACCEPTED_MANIFEST_TYPES)
                .await
                .map_err(|e| Self::fetch_error(source, format!("Failed to pull manifest: {}", e)))?;

            let digest = match &expected {
                Some(expected) => verify_digest("Manifest", expected, &raw)
                    .map_err(|message| Self::fetch_error(source, message))?,
                None => sha256_digest(&raw),
            };

            let kind = ManifestKind::sniff(&raw)?;
            tracing::debug!(reference = %oci_ref, digest = %digest, kind = %kind, "Pulled manifest");

            match kind {
                ManifestKind::Image => {
                    let manifest: ImageManifest = serde_json::from_slice(&raw)?;
                    let config = self.pull_blob(source, &oci_ref, &manifest.config).await?;

                    let mut layers = Vec::with_capacity(manifest.layers.len());
                    for descriptor in &manifest.layers {
                        let blob = self.pull_blob(source, &oci_ref, descriptor).await?;
                        layers.push(Layer::from_blob(descriptor.clone(), blob));
                    }

                    Ok(Artifact::Image(Image::from_manifest_bytes(&raw, config, layers)?))
                }
                ManifestKind::Index => {
                    let manifest: IndexManifest = serde_json::from_slice(&raw)?;

                    // Reject unknown entries before pulling anything below.
                    for descriptor in &manifest.manifests {
                        ManifestKind::classify(&descriptor.media_type)?;
                    }

                    let mut children = Vec::with_capacity(manifest.manifests.len());
                    for descriptor in &manifest.manifests {
                        if let Some(child) = cache.get(&descriptor.digest) {
                            children.push(child.clone());
                            continue;
                        }
                        let child_ref = Reference::with_digest(
                            oci_ref.registry().to_string(),
                            oci_ref.repository().to_string(),
                            descriptor.digest.clone(),
                        );
                        let child = self
                            .fetch_artifact(
                                source,
                                child_ref,
                                auth,
                                Some(descriptor.digest.clone()),
                                depth + 1,
                                cache,
                            )
                            .await?;
                        cache.insert(descriptor.digest.clone(), child.clone());
                        children.push(child);
                    }

                    Ok(Artifact::Index(ImageIndex::from_manifest_bytes(&raw, children)?))
                }
            }
        }
        .boxed()
    }

    /// Pull a blob and check it against its descriptor.
    async fn pull_blob(
        &self,
        source: &ImageReference,
        oci_ref: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>> {
        let oci_descriptor: OciDescriptor =
            serde_json::from_value(serde_json::to_value(descriptor)?)?;

        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(oci_ref, &oci_descriptor, &mut data)
            .await
            .map_err(|e| {
                Self::fetch_error(source, format!("Failed to pull blob {}: {}", descriptor.digest, e))
            })?;

        verify_digest("Blob", &descriptor.digest, &data)
            .map_err(|message| Self::fetch_error(source, message))?;

        tracing::debug!(digest = %descriptor.digest, size = data.len(), "Pulled blob");
        Ok(data)
    }

    /// Run an upload plan. The last manifest goes to `target`, the rest by digest.
    async fn upload(
        &self,
        destination: &ImageReference,
        target: &Reference,
        plan: Vec<Upload<'_>>,
    ) -> Result<String> {
        let mut top = None;
        let count = plan.len();

        for (position, step) in plan.into_iter().enumerate() {
            match step {
                Upload::Blob { digest, data } => {
                    self.client
                        .push_blob(target, data, digest)
                        .await
                        .map_err(|e| {
                            Self::push_error(destination, format!("Failed to push blob {}: {}", digest, e))
                        })?;
                    tracing::debug!(digest, size = data.len(), "Pushed blob");
                }
                Upload::Manifest {
                    digest,
                    media_type,
                    bytes,
                } => {
                    let manifest_ref = if position + 1 == count {
                        target.clone()
                    } else {
                        Reference::with_digest(
                            target.registry().to_string(),
                            target.repository().to_string(),
                            digest.clone(),
                        )
                    };
                    let content_type = http::HeaderValue::from_str(media_type).map_err(|e| {
                        Self::push_error(destination, format!("Invalid manifest media type: {}", e))
                    })?;
                    self.client
                        .push_manifest_raw(&manifest_ref, bytes, content_type)
                        .await
                        .map_err(|e| {
                            Self::push_error(destination, format!("Failed to push manifest {}: {}", digest, e))
                        })?;
                    tracing::debug!(reference = %manifest_ref, digest = %digest, "Pushed manifest");
                    top = Some(digest);
                }
            }
        }

        top.ok_or_else(|| Self::push_error(destination, "Nothing to push".to_string()))
    }
}

/// Hash `data` and compare it with the digest a parent recorded for it.
fn verify_digest(what: &str, expected: &str, data: &[u8]) -> std::result::Result<String, String> {
    let actual = sha256_digest(data);
    if actual != expected {
        return Err(format!(
            "{} digest mismatch: expected {}, got {}",
            what, expected, actual
        ));
    }
    Ok(actual)
}

/// One registry write.
#[derive(Debug)]
enum Upload<'a> {
    Blob {
        digest: &'a str,
        data: &'a [u8],
    },
    Manifest {
        digest: String,
        media_type: &'a str,
        bytes: Vec<u8>,
    },
}

/// Writes needed to publish `artifact`, each distinct blob and manifest once.
///
/// Blobs precede the manifest that lists them and children precede their
/// index, so the artifact's own manifest is always last.
fn upload_plan(artifact: &Artifact) -> Result<Vec<Upload<'_>>> {
    fn visit<'a>(
        artifact: &'a Artifact,
        seen: &mut HashSet<String>,
        plan: &mut Vec<Upload<'a>>,
    ) -> Result<()> {
        let bytes = artifact.manifest_bytes()?;
        let digest = sha256_digest(&bytes);
        if seen.contains(&digest) {
            return Ok(());
        }

        match artifact {
            Artifact::Image(image) => {
                let blobs = std::iter::once((image.manifest().config.digest.as_str(), image.config_bytes()))
                    .chain(image.layers().iter().map(|layer| (layer.digest(), layer.blob())));
                for (blob_digest, data) in blobs {
                    if seen.insert(blob_digest.to_string()) {
                        plan.push(Upload::Blob {
                            digest: blob_digest,
                            data,
                        });
                    }
                }
            }
            Artifact::Index(index) => {
                for entry in index.entries() {
                    visit(&entry.child, seen, plan)?;
                }
            }
        }

        seen.insert(digest.clone());
        plan.push(Upload::Manifest {
            digest,
            media_type: artifact.media_type(),
            bytes,
        });
        Ok(())
    }

    let mut plan = Vec::new();
    visit(artifact, &mut HashSet::new(), &mut plan)?;
    Ok(plan)
}

#[async_trait]
impl Registry for OciRegistry {
    async fn fetch(&self, reference: &ImageReference) -> Result<Artifact> {
        let auth = RegistryAuth::resolve(&reference.registry)
            .await
            .to_oci_auth();

        tracing::info!(reference = %reference, "Fetching image");
        let mut cache = HashMap::new();
        let artifact = self
            .fetch_artifact(reference, reference.to_oci_reference(), &auth, None, 0, &mut cache)
            .await?;

        tracing::info!(
            reference = %reference,
            digest = %artifact.digest()?,
            kind = %artifact.kind(),
            "Fetched image"
        );
        Ok(artifact)
    }

    async fn push(&self, reference: &ImageReference, artifact: &Artifact) -> Result<String> {
        if reference.digest.is_some() {
            return Err(Self::push_error(
                reference,
                "destination must be a tag, not a digest".to_string(),
            ));
        }

        let oci_ref = reference.to_oci_reference();
        let auth = RegistryAuth::resolve(&reference.registry)
            .await
            .to_oci_auth();
        self.client
            .auth(&oci_ref, &auth, RegistryOperation::Push)
            .await
            .map_err(|e| Self::push_error(reference, format!("Authentication failed: {}", e)))?;

        let plan = upload_plan(artifact)?;
        tracing::info!(reference = %reference, uploads = plan.len(), "Pushing image");
        let digest = self.upload(reference, &oci_ref, plan).await?;

        tracing::info!(reference = %reference, digest = %digest, "Image pushed successfully");
        Ok(digest)
    }
}
