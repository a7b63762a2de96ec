//! Content addressing for manifests and blobs.
//!
//! An entity's identity is the SHA256 of its serialized manifest. Nothing is
//! cached: images and indexes are immutable, so recomputing is always correct.

use incert_core::error::Result;
use sha2::{Digest, Sha256};

use super::manifest::Descriptor;

/// Algorithm prefix of every digest produced here.
pub const SHA256_PREFIX: &str = "sha256:";

/// Compute SHA256 digest of raw bytes (hex string, no prefix).
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the prefixed `sha256:<hex>` digest of raw bytes.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{}{}", SHA256_PREFIX, sha256_bytes(data))
}

/// Anything identified by the hash of its serialized manifest.
pub trait ContentAddressed {
    /// Media type the manifest is served with.
    fn media_type(&self) -> &str;

    /// Canonical serialized manifest.
    fn manifest_bytes(&self) -> Result<Vec<u8>>;

    /// `sha256:<hex>` of [`ContentAddressed::manifest_bytes`].
    fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.manifest_bytes()?))
    }

    /// Descriptor pointing at this manifest.
    fn descriptor(&self) -> Result<Descriptor> {
        let bytes = self.manifest_bytes()?;
        Ok(Descriptor::new(
            self.media_type(),
            sha256_digest(&bytes),
            bytes.len() as u64,
        ))
    }
}
