//! MIME classification of uploaded payloads.
//!
//! The store only needs "given the first bytes, what is it and is it
//! ASCII?", so the capability sits behind [`ContentSniffer`]. The default
//! [`MagicSniffer`] matches magic numbers with `infer` and falls back to a
//! text/binary heuristic.

use std::path::Path;

/// Raw bytes handed to the sniffer.
pub const SNIFF_LEN: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub mime: String,
    pub is_ascii: bool,
}

pub trait ContentSniffer: Send + Sync {
    fn classify(&self, prefix: &[u8]) -> Classification;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MagicSniffer;

impl ContentSniffer for MagicSniffer {
    fn classify(&self, prefix: &[u8]) -> Classification {
        let is_ascii = prefix.is_ascii();
        let mime = match infer::get(prefix) {
            Some(kind) => kind.mime_type().to_string(),
            None if looks_like_text(prefix) || is_ascii => "text/plain".to_string(),
            None => "application/octet-stream".to_string(),
        };
        Classification { mime, is_ascii }
    }
}

/// Classify an upload, letting the filename extension refine generic text.
pub fn classify_upload(
    sniffer: &dyn ContentSniffer,
    filename: &str,
    prefix: &[u8],
) -> Classification {
    let mut classification = sniffer.classify(prefix);
    if classification.mime == "text/plain" {
        if let Some(mime) = text_override(filename) {
            classification.mime = mime.to_string();
        }
    }
    classification
}

fn text_override(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match ext.as_str() {
        "js" | "mjs" => Some("application/javascript"),
        "css" => Some("text/css"),
        "html" | "htm" => Some("text/html"),
        "json" => Some("application/json"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// No bytes outside the usual text control set (tab, newlines, form feed, escape).
fn looks_like_text(prefix: &[u8]) -> bool {
    let text = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        // a multi-byte character may be cut at the end of the prefix
        Err(err) if err.error_len().is_none() => {
            std::str::from_utf8(&prefix[..err.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return false,
    };
    !text
        .bytes()
        .any(|b| matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f))
}
