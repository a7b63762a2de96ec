//! Image reference parsing.
//!
//! Parses references like `ghcr.io/org/app:1.2` or `alpine@sha256:...` into
//! their registry, repository, tag and digest components.

use incert_core::error::{IncertError, Result};

/// Registry assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag assumed when a reference carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host, with port if one was given
    pub registry: String,
    /// Repository path, `library/` prefixed for Docker Hub official images
    pub repository: String,
    pub tag: Option<String>,
    /// `algorithm:hex`
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference.
    ///
    /// - `alpine` → docker.io/library/alpine:latest
    /// - `org/app:1.0` → docker.io/org/app:1.0
    /// - `localhost:5000/app` → localhost:5000/app:latest
    /// - `ghcr.io/org/app:1.0@sha256:...` → tag and digest both kept
    pub fn parse(reference: &str) -> Result<Self> {
        let input = reference.trim();
        let fail = |message: &str| IncertError::ReferenceError {
            reference: reference.to_string(),
            message: message.to_string(),
        };

        if input.is_empty() {
            return Err(fail("reference is empty"));
        }

        let (remainder, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                validate_digest(digest).map_err(|m| fail(&m))?;
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A colon after the last slash starts the tag; earlier colons belong
        // to a registry port.
        let last_slash = remainder.rfind('/').map_or(0, |pos| pos + 1);
        let (name, tag) = match remainder[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                (&remainder[..split], Some(&remainder[split + 1..]))
            }
            None => (remainder, None),
        };

        if let Some(tag) = tag {
            validate_tag(tag).map_err(|m| fail(&m))?;
        }

        let (registry, repository) = split_registry(name);
        validate_repository(&repository).map_err(|m| fail(&m))?;

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Convert to the transport's reference type, preferring the digest.
    pub fn to_oci_reference(&self) -> oci_distribution::Reference {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => oci_distribution::Reference::with_digest(
                self.registry.clone(),
                self.repository.clone(),
                digest.clone(),
            ),
            (None, tag) => oci_distribution::Reference::with_tag(
                self.registry.clone(),
                self.repository.clone(),
                tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string()),
            ),
        }
    }

    /// Full normalized form.
    pub fn full_reference(&self) -> String {
        let mut out = format!("{}/{}", self.registry, self.repository);
        if let Some(tag) = &self.tag {
            out.push(':');
            out.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_reference())
    }
}

/// The first path component is a registry if it looks like a host.
fn split_registry(name: &str) -> (String, String) {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first.to_string(), rest.to_string());
        }
        return (DEFAULT_REGISTRY.to_string(), name.to_string());
    }
    (DEFAULT_REGISTRY.to_string(), format!("library/{}", name))
}

fn validate_repository(repository: &str) -> std::result::Result<(), String> {
    if repository.is_empty() {
        return Err("repository is empty".to_string());
    }
    for component in repository.split('/') {
        if component.is_empty() {
            return Err("repository has an empty path component".to_string());
        }
        let valid = component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c));
        if !valid {
            return Err(format!(
                "repository component '{}' must be lowercase alphanumerics and separators",
                component
            ));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> std::result::Result<(), String> {
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    if !first_ok || tag.len() > MAX_TAG_LEN {
        return Err(format!("invalid tag '{}'", tag));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c)) {
        return Err(format!("invalid tag '{}'", tag));
    }
    Ok(())
}

fn validate_digest(digest: &str) -> std::result::Result<(), String> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err("digest must be algorithm:hex".to_string());
    };
    if algorithm.is_empty() || hex.is_empty() {
        return Err("digest must be algorithm:hex".to_string());
    }
    if algorithm == "sha256"
        && (hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()))
    {
        return Err("sha256 digest must be 64 lowercase hex characters".to_string());
    }
    Ok(())
}
