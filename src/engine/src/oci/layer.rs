//! Layer blobs.
//!
//! A layer is kept in its compressed, as-distributed form. Readers decompress
//! on demand so flattening streams the tar without materialising it.

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use incert_core::error::{IncertError, Result};

use super::digest::sha256_digest;
use super::manifest::Descriptor;
use super::media_type::OCI_LAYER_GZIP;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One filesystem diff, as referenced by an image manifest.
#[derive(Debug, Clone)]
pub struct Layer {
    descriptor: Descriptor,
    blob: Arc<[u8]>,
    diff_id: Option<String>,
}

impl Layer {
    /// Wrap a blob that was pulled for `descriptor`.
    pub fn from_blob(descriptor: Descriptor, blob: impl Into<Arc<[u8]>>) -> Self {
        Self {
            descriptor,
            blob: blob.into(),
            diff_id: None,
        }
    }

    /// Gzip an uncompressed tar stream into a new OCI layer.
    pub fn from_tar(tar: &[u8]) -> Result<Self> {
        let diff_id = sha256_digest(tar);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(tar)
            .map_err(|e| IncertError::BuildError(format!("Failed to compress layer: {}", e)))?;
        let blob = encoder
            .finish()
            .map_err(|e| IncertError::BuildError(format!("Failed to compress layer: {}", e)))?;

        let descriptor = Descriptor::new(OCI_LAYER_GZIP, sha256_digest(&blob), blob.len() as u64);
        Ok(Self {
            descriptor,
            blob: blob.into(),
            diff_id: Some(diff_id),
        })
    }

    /// Same blob, advertised under another media type.
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.descriptor.media_type = media_type.into();
        self
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn digest(&self) -> &str {
        &self.descriptor.digest
    }

    pub fn media_type(&self) -> &str {
        &self.descriptor.media_type
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Digest of the uncompressed tar, known for layers built locally.
    pub fn diff_id(&self) -> Option<&str> {
        self.diff_id.as_deref()
    }

    /// Open the uncompressed tar stream.
    ///
    /// The compression is taken from the media type, falling back to the gzip
    /// magic bytes for media types that do not say.
    pub fn reader(&self) -> Result<LayerReader> {
        let media_type = self.media_type();
        if media_type.ends_with("zstd") {
            return Err(IncertError::OciImageError(format!(
                "Unsupported layer compression: {}",
                media_type
            )));
        }

        let cursor = Cursor::new(Arc::clone(&self.blob));
        let gzipped = media_type.ends_with("gzip") || self.blob.starts_with(&GZIP_MAGIC);
        if gzipped {
            Ok(LayerReader::Gzip(GzDecoder::new(cursor)))
        } else {
            Ok(LayerReader::Plain(cursor))
        }
    }
}

/// Uncompressed view of a layer blob.
pub enum LayerReader {
    Plain(Cursor<Arc<[u8]>>),
    Gzip(GzDecoder<Cursor<Arc<[u8]>>>),
}

impl Read for LayerReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            LayerReader::Plain(inner) => inner.read(buf),
            LayerReader::Gzip(inner) => inner.read(buf),
        }
    }
}
