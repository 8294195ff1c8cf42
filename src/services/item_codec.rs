//! On-disk encoding of stored items.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<id>/<original name>   gzip payload
//! <root>/<id>/<id>.json.gz      gzip JSON sidecar (StoredItem)
//! <root>/upload_<random>        transient upload buffer
//! ```

use crate::models::item::StoredItem;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use md5::Context;
use std::{
    fs,
    io::{self, ErrorKind, Read, Write},
    path::Path,
};
use thiserror::Error;

use super::sniffer::SNIFF_LEN;

/// Prefix of upload buffers written directly under the root.
pub const TRANSIENT_PREFIX: &str = "upload_";

const SIDECAR_SUFFIX: &str = ".json.gz";

pub fn sidecar_name(id: &str) -> String {
    format!("{}{}", id, SIDECAR_SUFFIX)
}

pub fn is_transient(name: &str) -> bool {
    name.starts_with(TRANSIENT_PREFIX)
}

/// An id names exactly one directory directly under the root.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !is_transient(id)
        && !id
            .bytes()
            .any(|b| b == b'/' || b == b'\\' || b.is_ascii_control())
}

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("sidecar unreadable: {0}")]
    Io(#[from] io::Error),
    #[error("sidecar malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sidecar belongs to `{found}`, not `{expected}`")]
    IdMismatch { expected: String, found: String },
}

/// Result of encoding one upload.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    /// Hex MD5 of the compressed bytes.
    pub fingerprint: String,
    /// Uncompressed length.
    pub size: u64,
    /// First raw bytes, for content sniffing.
    pub prefix: Vec<u8>,
}

/// Incremental gzip encoder for an upload stream.
///
/// Every call returns the compressed bytes produced so far; the caller
/// writes them out. The fingerprint covers exactly those bytes.
pub struct PayloadEncoder {
    encoder: GzEncoder<Vec<u8>>,
    digest: Context,
    size: u64,
    prefix: Vec<u8>,
}

impl PayloadEncoder {
    pub fn new() -> Self {
        Self {
            encoder: GzEncoder::new(Vec::new(), Compression::default()),
            digest: Context::new(),
            size: 0,
            prefix: Vec::with_capacity(SNIFF_LEN),
        }
    }

    /// Raw bytes consumed so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn push(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        if self.prefix.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - self.prefix.len()).min(chunk.len());
            self.prefix.extend_from_slice(&chunk[..take]);
        }
        self.size += chunk.len() as u64;
        self.encoder.write_all(chunk)?;
        let out = std::mem::take(self.encoder.get_mut());
        self.digest.consume(&out);
        Ok(out)
    }

    /// Flush the gzip trailer. Returns the last bytes to write and the summary.
    pub fn finish(mut self) -> io::Result<(Vec<u8>, EncodedPayload)> {
        let tail = self.encoder.finish()?;
        self.digest.consume(&tail);
        let encoded = EncodedPayload {
            fingerprint: format!("{:x}", self.digest.compute()),
            size: self.size,
            prefix: self.prefix,
        };
        Ok((tail, encoded))
    }
}

impl Default for PayloadEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize an item record to gzip JSON.
pub fn encode_sidecar(item: &StoredItem) -> Result<Vec<u8>, SidecarError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer_pretty(&mut encoder, item)?;
    Ok(encoder.finish()?)
}

pub fn decode_sidecar(bytes: &[u8]) -> Result<StoredItem, SidecarError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Read the sidecar of item `id`, checking it belongs to that directory.
pub fn read_sidecar(root: &Path, id: &str) -> Result<StoredItem, SidecarError> {
    let bytes = fs::read(root.join(id).join(sidecar_name(id)))?;
    let item = decode_sidecar(&bytes)?;
    check_sidecar_id(id, item)
}

pub fn check_sidecar_id(id: &str, item: StoredItem) -> Result<StoredItem, SidecarError> {
    if item.id != id {
        return Err(SidecarError::IdMismatch {
            expected: id.to_string(),
            found: item.id,
        });
    }
    Ok(item)
}

/// Remove a whole item directory. Returns `false` if it was already gone.
pub fn remove_item_dir(root: &Path, id: &str) -> io::Result<bool> {
    match fs::remove_dir_all(root.join(id)) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Decompress a whole payload into memory.
pub fn read_payload(path: &Path) -> io::Result<Vec<u8>> {
    let file = fs::File::open(path)?;
    let mut out = Vec::new();
    GzDecoder::new(io::BufReader::new(file)).read_to_end(&mut out)?;
    Ok(out)
}
