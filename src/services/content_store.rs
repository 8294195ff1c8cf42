//! src/services/content_store.rs
//!
//! ContentStore: ingestion, lookup and deletion of items kept under
//! `root/{id}/`. There is no database; each item carries its own gzip JSON
//! sidecar, and the directory tree is the only shared state.

use crate::{config::StoreConfig, models::item::StoredItem};
use bytes::Bytes;
use chrono::Utc;
use flate2::read::GzDecoder;
use futures::{Stream, StreamExt, pin_mut, stream};
use std::{
    io::{self, BufReader, ErrorKind, Read},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tokio_util::io::StreamReader;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    identifier::IdAssigner,
    item_codec::{
        PayloadEncoder, SidecarError, TRANSIENT_PREFIX, check_sidecar_id, decode_sidecar,
        encode_sidecar, is_valid_id, read_payload, sidecar_name,
    },
    quota::QuotaHandle,
    retention::{self, SweepReport},
    scanner::{FsListing, ScanSummary, scan},
    sniffer::{ContentSniffer, MagicSniffer, classify_upload},
};

const MAX_NAME_LEN: usize = 255;
const DECOMPRESS_CHUNK: usize = 64 * 1024;
/// Decompressed chunks buffered ahead of a slow client.
const DECOMPRESS_QUEUE: usize = 4;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("upload of {size} bytes exceeds the per-file limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("invalid file name `{0}`")]
    InvalidName(String),
    #[error("item `{0}` not found")]
    NotFound(String),
    #[error("metadata for item `{id}` is unreadable: {source}")]
    CorruptMetadata {
        id: String,
        #[source]
        source: SidecarError,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// How payload bytes handed out by [`ContentStore::get`] are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadEncoding {
    Gzip,
    Identity,
}

/// A payload opened for streaming to a client.
pub struct ItemContent {
    pub item: StoredItem,
    pub encoding: PayloadEncoding,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

/// Entry point for everything the HTTP layer does with stored content.
#[derive(Clone)]
pub struct ContentStore {
    config: Arc<StoreConfig>,
    ids: IdAssigner,
    sniffer: Arc<dyn ContentSniffer>,
    quota: QuotaHandle,
}

/// Upload buffer under the root; removed when dropped unless already moved.
struct TransientUpload {
    path: PathBuf,
}

impl TransientUpload {
    fn new(root: &Path) -> Self {
        Self {
            path: root.join(format!("{}{}", TRANSIENT_PREFIX, Uuid::new_v4().simple())),
        }
    }
}

impl Drop for TransientUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed upload buffer {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove upload buffer {}: {}", self.path.display(), err),
        }
    }
}

/// Item directory under construction; removed when dropped before `keep`.
///
/// Covers the ingest future being cancelled between creating the directory
/// and writing its sidecar.
struct PendingItem {
    dir: PathBuf,
    committed: bool,
}

impl PendingItem {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            committed: false,
        }
    }

    fn keep(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingItem {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!("removed incomplete item {}", self.dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to clean up {}: {}", self.dir.display(), err),
        }
    }
}

impl ContentStore {
    pub fn new(config: Arc<StoreConfig>, quota: QuotaHandle) -> Self {
        Self::with_sniffer(config, quota, Arc::new(MagicSniffer))
    }

    pub fn with_sniffer(
        config: Arc<StoreConfig>,
        quota: QuotaHandle,
        sniffer: Arc<dyn ContentSniffer>,
    ) -> Self {
        Self {
            ids: IdAssigner::new(config.id_digits),
            config,
            sniffer,
            quota,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Reduce a client filename to a safe final path component.
    fn sanitize_name(filename: &str) -> StoreResult<String> {
        let name = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        if name.is_empty() || name == "." || name == ".." {
            return Err(StoreError::InvalidName(filename.to_string()));
        }
        if name.len() > MAX_NAME_LEN || name.chars().any(char::is_control) {
            return Err(StoreError::InvalidName(filename.to_string()));
        }
        Ok(name.to_string())
    }

    /// Stream an upload into the store.
    ///
    /// - Rejects `declared_size` above the per-file cap before touching disk.
    /// - Gzips the stream into an `upload_*` buffer, enforcing the cap on
    ///   the real byte count as well.
    /// - Derives the id from the fingerprint of the compressed bytes.
    /// - Replaces whatever lived at that id, moves the payload in and
    ///   writes the sidecar.
    /// - Signals the quota worker.
    ///
    /// The buffer is always removed; a half-built item directory is removed
    /// on failure.
    pub async fn ingest<S>(
        &self,
        filename: &str,
        declared_size: Option<u64>,
        stream: S,
    ) -> StoreResult<StoredItem>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let limit = self.config.max_bytes_per_file;
        if let Some(size) = declared_size.filter(|size| *size > limit) {
            return Err(StoreError::TooLarge { size, limit });
        }
        let name = Self::sanitize_name(filename)?;

        fs::create_dir_all(self.root()).await?;
        let upload = TransientUpload::new(self.root());
        let mut file = File::create(&upload.path).await?;

        let mut encoder = PayloadEncoder::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let size = encoder.size() + chunk.len() as u64;
            if size > limit {
                return Err(StoreError::TooLarge { size, limit });
            }
            let out = encoder.push(&chunk)?;
            file.write_all(&out).await?;
        }
        let (tail, encoded) = encoder.finish()?;
        file.write_all(&tail).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let id = self.ids.assign(&encoded.fingerprint);
        if name == sidecar_name(&id) {
            return Err(StoreError::InvalidName(name));
        }

        let item_dir = self.root().join(&id);
        match fs::remove_dir_all(&item_dir).await {
            Ok(()) => debug!("replacing existing item {}", id),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::Io(err)),
        }
        let pending = PendingItem::new(item_dir.clone());
        fs::create_dir_all(&item_dir).await?;

        let classification = classify_upload(self.sniffer.as_ref(), &name, &encoded.prefix);
        let item = StoredItem::new(
            id,
            name,
            encoded.fingerprint,
            encoded.size,
            classification.mime,
            classification.is_ascii,
            Utc::now(),
        );

        if let Err(err) = self.commit(&upload, &item_dir, &item).await {
            error!("failed to store item {}: {}", item.id, err);
            return Err(err);
        }
        pending.keep();

        debug!("stored {} as {}/{}", item.size_human, item.id, item.original_name);
        self.enforce_quota_async();
        Ok(item)
    }

    /// Move the payload into its item directory and write the sidecar.
    async fn commit(
        &self,
        upload: &TransientUpload,
        item_dir: &Path,
        item: &StoredItem,
    ) -> StoreResult<()> {
        fs::rename(&upload.path, item_dir.join(&item.original_name)).await?;
        let sidecar = encode_sidecar(item).map_err(|source| StoreError::CorruptMetadata {
            id: item.id.clone(),
            source,
        })?;
        fs::write(item_dir.join(sidecar_name(&item.id)), sidecar).await?;
        Ok(())
    }

    /// Read an item's metadata.
    ///
    /// A missing directory is `NotFound`; a directory without a readable
    /// sidecar is `CorruptMetadata`. Both mean "no such item" to callers.
    pub async fn load(&self, id: &str) -> StoreResult<StoredItem> {
        if !is_valid_id(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let dir = self.root().join(id);
        let corrupt = |source: SidecarError| StoreError::CorruptMetadata {
            id: id.to_string(),
            source,
        };
        let bytes = match fs::read(dir.join(sidecar_name(id))).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound && !dir.is_dir() => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(err) => return Err(corrupt(SidecarError::Io(err))),
        };
        let item = decode_sidecar(&bytes).map_err(corrupt)?;
        check_sidecar_id(id, item).map_err(corrupt)
    }

    /// Open an item's payload. With `decompress` the original bytes are
    /// streamed; otherwise the stored gzip bytes are passed through as is.
    pub async fn get(&self, id: &str, name: &str, decompress: bool) -> StoreResult<ItemContent> {
        let item = self.load(id).await?;
        if item.original_name != name {
            return Err(StoreError::NotFound(format!("{}/{}", id, name)));
        }
        let path = self.root().join(id).join(&item.original_name);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(format!("{}/{}", id, name))
            } else {
                StoreError::Io(err)
            }
        })?;

        if !decompress {
            return Ok(ItemContent {
                item,
                encoding: PayloadEncoding::Gzip,
                reader: Box::new(file),
            });
        }

        let file = file.into_std().await;
        let (tx, rx) = tokio::sync::mpsc::channel::<io::Result<Bytes>>(DECOMPRESS_QUEUE);
        let item_id = item.id.clone();
        tokio::task::spawn_blocking(move || {
            let mut decoder = GzDecoder::new(BufReader::new(file));
            let mut buf = vec![0u8; DECOMPRESS_CHUNK];
            loop {
                let chunk = match decoder.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        // surfaced to the reader so the transfer fails instead of ending short
                        warn!("payload of {} is unreadable: {}", item_id, err);
                        Err(err)
                    }
                };
                let failed = chunk.is_err();
                if tx.blocking_send(chunk).is_err() {
                    debug!("client stopped reading {}", item_id);
                    break;
                }
                if failed {
                    break;
                }
            }
        });
        let chunks = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        let reader = StreamReader::new(Box::pin(chunks));

        Ok(ItemContent {
            item,
            encoding: PayloadEncoding::Identity,
            reader: Box::new(reader),
        })
    }

    /// Decompressed payload as text, for inline display of small text items.
    pub async fn read_text(&self, item: &StoredItem) -> StoreResult<String> {
        let path = self.root().join(&item.id).join(&item.original_name);
        let bytes = tokio::task::spawn_blocking(move || read_payload(&path))
            .await
            .map_err(io::Error::other)??;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Remove an item. Returns whether anything was there; removing an
    /// absent item is not an error.
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        let dir = self.root().join(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("removed item {}", id);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Whether `root/id/name` exists on disk.
    pub async fn exists(&self, id: &str, name: &str) -> bool {
        if !is_valid_id(id) || Self::sanitize_name(name).ok().as_deref() != Some(name) {
            return false;
        }
        fs::try_exists(self.root().join(id).join(name))
            .await
            .unwrap_or(false)
    }

    /// Schedule a quota pass on the eviction worker.
    pub fn enforce_quota_async(&self) {
        self.quota.request();
    }

    /// Run one retention sweep on the blocking pool.
    pub async fn sweep_once(&self) -> SweepReport {
        let config = Arc::clone(&self.config);
        match tokio::task::spawn_blocking(move || retention::sweep_once(&config, false)).await {
            Ok(report) => report,
            Err(err) => {
                error!("retention sweep panicked: {}", err);
                SweepReport::default()
            }
        }
    }

    /// Current usage of the store root.
    pub async fn usage(&self) -> StoreResult<ScanSummary> {
        let root = self.root().to_path_buf();
        let summary = tokio::task::spawn_blocking(move || scan(&FsListing, &root))
            .await
            .map_err(io::Error::other)??;
        Ok(summary)
    }
}
