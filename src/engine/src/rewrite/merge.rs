//! Combining an image's existing bundle with new certificates.

use incert_core::config::MergePolicy;
use incert_core::error::Result;

/// `existing ++ addition ++ "\n"` under append, `addition` under replace.
pub fn merge(existing: &[u8], addition: &[u8], policy: MergePolicy) -> Vec<u8> {
    match policy {
        MergePolicy::Append => {
            let mut merged = Vec::with_capacity(existing.len() + addition.len() + 1);
            merged.extend_from_slice(existing);
            merged.extend_from_slice(addition);
            merged.push(b'\n');
            merged
        }
        MergePolicy::Replace => addition.to_vec(),
    }
}

/// Like [`merge`], but the existing bytes are only produced when needed.
///
/// Under replace `existing` is never called, so a missing file is not an error.
pub fn merge_with<F>(addition: &[u8], policy: MergePolicy, existing: F) -> Result<Vec<u8>>
where
    F: FnOnce() -> Result<Vec<u8>>,
{
    match policy {
        MergePolicy::Append => Ok(merge(&existing()?, addition, policy)),
        MergePolicy::Replace => Ok(addition.to_vec()),
    }
}
