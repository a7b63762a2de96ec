//! Single-file layer construction.

use incert_core::config::{Ownership, RewriteConfig, DEFAULT_CERT_MODE};
use incert_core::error::{IncertError, Result};

use super::flatten::clean_path;
use crate::oci::Layer;

/// Builds a layer holding exactly one regular file.
#[derive(Debug, Clone)]
pub struct LayerBuilder {
    path: String,
    mode: u32,
    owner: Ownership,
}

impl LayerBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: DEFAULT_CERT_MODE,
            owner: Ownership::default(),
        }
    }

    /// Path, mode and owner taken from the run configuration.
    pub fn from_config(config: &RewriteConfig) -> Self {
        Self::new(config.cert_path.clone())
            .mode(config.mode)
            .owner(config.owner)
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn owner(mut self, owner: Ownership) -> Self {
        self.owner = owner;
        self
    }

    /// Package `content` as the layer's single file.
    ///
    /// The tar header needs the size up front, so the content is fully
    /// buffered. Headers carry mtime 0 so equal inputs give equal digests.
    pub fn build(&self, content: &[u8]) -> Result<Layer> {
        // tar rejects absolute member names.
        let name = clean_path(&self.path);
        if name.is_empty() {
            return Err(IncertError::BuildError(format!(
                "Invalid file path for layer: '{}'",
                self.path
            )));
        }

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(self.mode);
        header.set_uid(self.owner.uid);
        header.set_gid(self.owner.gid);
        header.set_mtime(0);

        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_data(&mut header, &name, content)
            .map_err(|e| IncertError::BuildError(format!("Failed to write {}: {}", name, e)))?;
        let tar = builder
            .into_inner()
            .map_err(|e| IncertError::BuildError(format!("Failed to finish layer: {}", e)))?;

        let layer = Layer::from_tar(&tar)?;
        tracing::debug!(
            path = %self.path,
            size = content.len(),
            mode = %format!("{:o}", self.mode),
            uid = self.owner.uid,
            gid = self.owner.gid,
            digest = %layer.digest(),
            "Built certificate layer"
        );
        Ok(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn single_entry(layer: &Layer) -> (tar::Header, Vec<u8>, usize) {
        let mut archive = tar::Archive::new(layer.reader().unwrap());
        let mut entries = archive.entries().unwrap();

        let mut first = entries.next().unwrap().unwrap();
        let mut content = Vec::new();
        first.read_to_end(&mut content).unwrap();
        let header = first.header().clone();
        drop(first);

        (header, content, 1 + entries.count())
    }

    #[test]
    fn test_build_single_entry() {
        let layer = LayerBuilder::new("/etc/ssl/certs/ca-certificates.crt")
            .build(b"CERT")
            .unwrap();
        let (header, content, count) = single_entry(&layer);

        assert_eq!(count, 1);
        assert_eq!(content, b"CERT");
        assert_eq!(
            header.path().unwrap().to_str().unwrap(),
            "etc/ssl/certs/ca-certificates.crt"
        );
        assert_eq!(header.entry_type(), tar::EntryType::Regular);
        assert_eq!(header.size().unwrap(), 4);
        assert_eq!(header.mode().unwrap(), 0o644);
        assert_eq!(header.uid().unwrap(), 0);
        assert_eq!(header.gid().unwrap(), 0);
        assert_eq!(header.mtime().unwrap(), 0);
    }

    #[test]
    fn test_build_applies_mode_and_owner() {
        let layer = LayerBuilder::new("/etc/pki/bundle.pem")
            .mode(0o600)
            .owner(Ownership { uid: 65532, gid: 65532 })
            .build(b"CERT")
            .unwrap();
        let (header, _, _) = single_entry(&layer);
        assert_eq!(header.mode().unwrap(), 0o600);
        assert_eq!(header.uid().unwrap(), 65532);
        assert_eq!(header.gid().unwrap(), 65532);
    }

    #[test]
    fn test_build_from_config() {
        let config = RewriteConfig {
            cert_path: "/custom/ca.pem".to_string(),
            owner: Ownership { uid: 1000, gid: 1001 },
            ..RewriteConfig::default()
        };
        let layer = LayerBuilder::from_config(&config).build(b"X").unwrap();
        let (header, _, _) = single_entry(&layer);
        assert_eq!(header.path().unwrap().to_str().unwrap(), "custom/ca.pem");
        assert_eq!(header.uid().unwrap(), 1000);
        assert_eq!(header.gid().unwrap(), 1001);
    }

    #[test]
    fn test_build_long_path() {
        let path = format!("/{}/ca.pem", "nested".repeat(30));
        let layer = LayerBuilder::new(path.clone()).build(b"X").unwrap();
        let mut archive = tar::Archive::new(layer.reader().unwrap());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(
            entry.path().unwrap().to_str().unwrap(),
            path.trim_start_matches('/')
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = LayerBuilder::new("/etc/ssl/certs/ca-certificates.crt");
        let first = builder.build(b"CERT").unwrap();
        let second = builder.build(b"CERT").unwrap();
        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.diff_id(), second.diff_id());
    }

    #[test]
    fn test_build_empty_content() {
        let layer = LayerBuilder::new("/etc/empty").build(b"").unwrap();
        let (header, content, _) = single_entry(&layer);
        assert!(content.is_empty());
        assert_eq!(header.size().unwrap(), 0);
    }

    #[test]
    fn test_build_rejects_root_path() {
        let result = LayerBuilder::new("/").build(b"X");
        assert!(matches!(result, Err(IncertError::BuildError(_))));
    }
}
