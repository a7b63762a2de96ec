//! Structural check of PEM certificate input.
//!
//! Only the PEM framing is inspected: labels, markers and base64 bodies.
//! Certificates are never parsed as X.509.

use base64::Engine;
use incert_core::error::{IncertError, Result};

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

struct PemBlock<'a> {
    label: &'a str,
    body: &'a str,
}

/// Next `-----BEGIN x----- ... -----END x-----` block, skipping leading text.
fn next_block(input: &str) -> Option<(PemBlock<'_>, &str)> {
    let mut rest = input;
    loop {
        let start = rest.find("-----BEGIN ")?;
        let after_begin = &rest[start + "-----BEGIN ".len()..];
        let label_end = after_begin.find("-----")?;
        let label = &after_begin[..label_end];
        let body_start = &after_begin[label_end + "-----".len()..];

        let end_marker = format!("-----END {}-----", label);
        match body_start.find(&end_marker) {
            Some(end) if !label.contains('\n') => {
                let block = PemBlock {
                    label,
                    body: &body_start[..end],
                };
                return Some((block, &body_start[end + end_marker.len()..]));
            }
            _ => rest = after_begin,
        }
    }
}

/// Decode a block body, ignoring whitespace and RFC 1421 header lines.
fn decode_body(body: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let encoded: String = body
        .lines()
        .filter(|line| !line.contains(':'))
        .flat_map(|line| line.chars().filter(|c| !c.is_whitespace()))
        .collect();
    base64::engine::general_purpose::STANDARD.decode(encoded)
}

/// Check that `bytes` looks like a PEM certificate bundle.
///
/// The first PEM block must be a `CERTIFICATE` with a non-empty base64 body.
/// Returns the number of certificate blocks found.
pub fn validate_certificate_bundle(bytes: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(bytes).map_err(|_| {
        IncertError::CertificateError("certificate input is not valid UTF-8 text".to_string())
    })?;

    let Some((first, mut rest)) = next_block(text) else {
        return Err(IncertError::CertificateError(
            "no PEM block found in certificate input".to_string(),
        ));
    };

    if first.label != CERTIFICATE_LABEL {
        return Err(IncertError::CertificateError(format!(
            "first PEM block is '{}', expected '{}'",
            first.label, CERTIFICATE_LABEL
        )));
    }
    match decode_body(first.body) {
        Ok(der) if !der.is_empty() => {}
        Ok(_) => {
            return Err(IncertError::CertificateError(
                "first certificate block is empty".to_string(),
            ))
        }
        Err(e) => {
            return Err(IncertError::CertificateError(format!(
                "first certificate block is not valid base64: {}",
                e
            )))
        }
    }

    let mut count = 1;
    while let Some((block, remaining)) = next_block(rest) {
        if block.label == CERTIFICATE_LABEL {
            count += 1;
        }
        rest = remaining;
    }

    tracing::debug!(certificates = count, "Validated certificate input");
    Ok(count)
}
