//! Union view of an image's layers and file lookup within it.
//!
//! Layers are read top-most first. An entry is visible unless a higher layer
//! already produced the same path, whited it out, or placed a non-directory
//! at one of its ancestors.

use std::collections::HashSet;
use std::io::Read;

use incert_core::error::{IncertError, Result};

use crate::oci::{Image, Layer};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Symbolic and hard links followed before a lookup gives up.
pub const MAX_LINK_HOPS: usize = 8;

/// Kind of a visible filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink(String),
    HardLink(String),
    Other,
}

/// A visible entry of the flattened filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    /// Cleaned path without a leading separator
    pub path: String,
    pub kind: EntryKind,
    /// Index of the layer holding the entry, base first
    pub layer: usize,
}

/// Normalize an archive or lookup path: `.` and empty components dropped,
/// `..` applied, no leading or trailing separator.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Streams the flattened filesystem of an image.
pub struct LayerFlattener<'a> {
    image: &'a Image,
}

impl<'a> LayerFlattener<'a> {
    pub fn new(image: &'a Image) -> Self {
        Self { image }
    }

    /// Visit visible entries, top-most layer first, until `visit` returns a value.
    ///
    /// The reader passed alongside an entry yields that entry's content.
    pub fn find_map<T, F>(&self, mut visit: F) -> Result<Option<T>>
    where
        F: FnMut(&FlatEntry, &mut dyn Read) -> Result<Option<T>>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut hides_children: HashSet<String> = HashSet::new();

        for (position, layer) in self.image.layers().iter().enumerate().rev() {
            tracing::debug!(layer = position, digest = %layer.digest(), "Scanning layer");

            let mut archive = tar::Archive::new(layer.reader()?);
            let entries = archive.entries().map_err(|e| layer_error(layer.digest(), e))?;
            let mut opaque_dirs = Vec::new();

            for entry in entries {
                let mut entry = entry.map_err(|e| layer_error(layer.digest(), e))?;
                let raw_path = entry.path().map_err(|e| layer_error(layer.digest(), e))?;
                let path = clean_path(&raw_path.to_string_lossy());
                if path.is_empty() {
                    continue;
                }

                let (dir, base) = match path.rsplit_once('/') {
                    Some((dir, base)) => (dir.to_string(), base.to_string()),
                    None => (String::new(), path.clone()),
                };

                if base == OPAQUE_WHITEOUT {
                    opaque_dirs.push(dir);
                    continue;
                }
                if let Some(hidden) = base.strip_prefix(WHITEOUT_PREFIX) {
                    let hidden = if dir.is_empty() {
                        hidden.to_string()
                    } else {
                        format!("{}/{}", dir, hidden)
                    };
                    seen.insert(hidden.clone());
                    hides_children.insert(hidden);
                    continue;
                }

                if seen.contains(&path) || ancestor_hidden(&path, &hides_children) {
                    continue;
                }

                let header = entry.header();
                let kind = match header.entry_type() {
                    tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::File,
                    tar::EntryType::Directory => EntryKind::Directory,
                    tar::EntryType::Symlink => EntryKind::Symlink(link_target(&entry)?),
                    tar::EntryType::Link => EntryKind::HardLink(link_target(&entry)?),
                    _ => EntryKind::Other,
                };

                seen.insert(path.clone());
                if kind != EntryKind::Directory {
                    hides_children.insert(path.clone());
                }

                let flat = FlatEntry {
                    path,
                    kind,
                    layer: position,
                };
                if let Some(found) = visit(&flat, &mut entry)? {
                    return Ok(Some(found));
                }
            }

            hides_children.extend(opaque_dirs);
        }

        Ok(None)
    }

    /// Every visible entry, top-most layer first.
    pub fn entries(&self) -> Result<Vec<FlatEntry>> {
        let mut all = Vec::new();
        self.find_map::<(), _>(|entry, _| {
            all.push(entry.clone());
            Ok(None)
        })?;
        Ok(all)
    }
}

fn ancestor_hidden(path: &str, hides_children: &HashSet<String>) -> bool {
    let mut current = parent_of(path);
    loop {
        if hides_children.contains(current) {
            return true;
        }
        if current.is_empty() {
            return false;
        }
        current = parent_of(current);
    }
}

fn link_target<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let target = entry
        .link_name()
        .map_err(|e| IncertError::OciImageError(format!("Unreadable link target: {}", e)))?
        .ok_or_else(|| IncertError::OciImageError("Link entry without a target".to_string()))?;
    Ok(target.to_string_lossy().into_owned())
}

fn layer_error(digest: &str, e: std::io::Error) -> IncertError {
    IncertError::OciImageError(format!("Failed to read layer {}: {}", digest, e))
}

/// Read the file at `path` from the flattened image.
///
/// `/a/b` and `a/b` name the same entry. Links are followed up to
/// [`MAX_LINK_HOPS`] times; the bytes returned are the link target's.
pub fn locate_file(image: &Image, path: &str) -> Result<Vec<u8>> {
    let flattener = LayerFlattener::new(image);
    let mut wanted = clean_path(path);

    for _ in 0..=MAX_LINK_HOPS {
        let found = flattener.find_map(|entry, content| {
            if entry.path != wanted {
                return Ok(None);
            }
            match &entry.kind {
                EntryKind::File => {
                    let mut bytes = Vec::new();
                    content.read_to_end(&mut bytes)?;
                    Ok(Some(Located::Content(bytes)))
                }
                EntryKind::Symlink(target) => {
                    let resolved = if target.starts_with('/') {
                        clean_path(target)
                    } else {
                        clean_path(&format!("{}/{}", parent_of(&entry.path), target))
                    };
                    Ok(Some(Located::Link(resolved)))
                }
                EntryKind::HardLink(target) => Ok(Some(Located::HardLink {
                    layer: entry.layer,
                    target: clean_path(target),
                })),
                EntryKind::Directory | EntryKind::Other => Ok(Some(Located::NotAFile)),
            }
        })?;

        match found {
            Some(Located::Content(bytes)) => {
                tracing::debug!(path, resolved = %wanted, size = bytes.len(), "Located file");
                return Ok(bytes);
            }
            Some(Located::Link(next)) => {
                tracing::debug!(from = %wanted, to = %next, "Following link");
                wanted = next;
            }
            Some(Located::HardLink { layer, target }) => {
                if let Some(bytes) = read_hard_link(&image.layers()[layer], &target)? {
                    tracing::debug!(path, target = %target, layer, "Located file through hard link");
                    return Ok(bytes);
                }
                // Target lives in another layer; resolve it through the union view.
                tracing::debug!(from = %wanted, to = %target, "Following hard link");
                wanted = target;
            }
            Some(Located::NotAFile) | None => {
                return Err(IncertError::TargetNotFound {
                    path: path.to_string(),
                })
            }
        }
    }

    Err(IncertError::OciImageError(format!(
        "Too many levels of links resolving {}",
        path
    )))
}

enum Located {
    Content(Vec<u8>),
    Link(String),
    HardLink { layer: usize, target: String },
    NotAFile,
}

/// Bytes a hard link refers to, read from the archive holding the link.
///
/// Returns `None` when `target` is not a regular file of that archive.
fn read_hard_link(layer: &Layer, target: &str) -> Result<Option<Vec<u8>>> {
    let mut wanted = target.to_string();

    for _ in 0..=MAX_LINK_HOPS {
        let mut archive = tar::Archive::new(layer.reader()?);
        let entries = archive.entries().map_err(|e| layer_error(layer.digest(), e))?;
        let mut next = None;

        for entry in entries {
            let mut entry = entry.map_err(|e| layer_error(layer.digest(), e))?;
            let path = clean_path(
                &entry
                    .path()
                    .map_err(|e| layer_error(layer.digest(), e))?
                    .to_string_lossy(),
            );
            if path != wanted {
                continue;
            }

            match entry.header().entry_type() {
                tar::EntryType::Regular | tar::EntryType::Continuous => {
                    let mut bytes = Vec::new();
                    entry.read_to_end(&mut bytes)?;
                    return Ok(Some(bytes));
                }
                tar::EntryType::Link => {
                    next = Some(clean_path(&link_target(&entry)?));
                    break;
                }
                _ => return Ok(None),
            }
        }

        match next {
            Some(target) => wanted = target,
            None => return Ok(None),
        }
    }

    Err(IncertError::OciImageError(format!(
        "Too many levels of hard links resolving {}",
        target
    )))
}
