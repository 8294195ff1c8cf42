//! Quota enforcement: evict the largest item until the store fits its cap.
//!
//! Passes are driven by a single worker task. Ingestion only signals it
//! through a channel of capacity one, so a burst of uploads collapses into
//! at most one pending pass behind the running one.

use crate::config::StoreConfig;
use std::{path::Path, sync::Arc};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use super::{
    item_codec::remove_item_dir,
    scanner::{DirectoryListing, FsListing, scan},
};

/// Upper bound on evictions per pass.
pub const MAX_EVICTIONS_PER_PASS: usize = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// Usage is below the cap (possibly after evicting `evicted` items).
    Satisfied { evicted: usize },
    /// Over the cap but nothing evictable is left.
    NothingToEvict { evicted: usize },
    /// Eviction budget spent while still over the cap.
    Unsatisfiable { evicted: usize, total_bytes: u64 },
    /// The store root could not be scanned.
    ScanFailed { evicted: usize },
}

/// Run one enforcement pass against the real store root.
pub fn enforce(config: &StoreConfig) -> QuotaOutcome {
    enforce_with(&FsListing, &config.root, config.max_bytes_total)
}

pub fn enforce_with(
    listing: &impl DirectoryListing,
    root: &Path,
    max_bytes_total: u64,
) -> QuotaOutcome {
    let mut evicted = 0;
    loop {
        let summary = match scan(listing, root) {
            Ok(summary) => summary,
            Err(err) => {
                error!(root = %root.display(), error = %err, "error getting store size");
                return QuotaOutcome::ScanFailed { evicted };
            }
        };
        if summary.total_bytes < max_bytes_total {
            return QuotaOutcome::Satisfied { evicted };
        }
        let Some(largest) = summary.largest else {
            return QuotaOutcome::NothingToEvict { evicted };
        };
        if evicted == MAX_EVICTIONS_PER_PASS {
            warn!(
                dir_size = summary.total_bytes,
                max_bytes_total, "quota pass hit its eviction limit, store still over cap"
            );
            return QuotaOutcome::Unsatisfiable {
                evicted,
                total_bytes: summary.total_bytes,
            };
        }

        debug!(
            dir_size = summary.total_bytes,
            max_bytes_total,
            id = %largest.id,
            size = largest.size,
            "store over cap, evicting largest item"
        );
        // a failed removal still counts, so a stuck directory cannot spin the loop
        if let Err(err) = remove_item_dir(root, &largest.id) {
            error!(id = %largest.id, error = %err, "failed to evict item");
        }
        evicted += 1;
    }
}

/// Cheap handle used to request a quota pass.
#[derive(Clone, Debug)]
pub struct QuotaHandle {
    tx: mpsc::Sender<()>,
}

impl QuotaHandle {
    /// Ask for a pass. A no-op while another request is already pending.
    pub fn request(&self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("quota pass already pending"),
            Err(TrySendError::Closed(())) => warn!("quota worker has stopped"),
        }
    }
}

/// The single long-lived eviction worker.
pub struct QuotaWorker;

impl QuotaWorker {
    pub fn spawn(config: Arc<StoreConfig>) -> (QuotaHandle, JoinHandle<()>) {
        Self::spawn_with(move || enforce(&config))
    }

    /// Run `pass` on the blocking pool once per accepted request.
    pub fn spawn_with<F>(pass: F) -> (QuotaHandle, JoinHandle<()>)
    where
        F: Fn() -> QuotaOutcome + Send + Sync + 'static,
    {
        let pass = Arc::new(pass);
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let pass = Arc::clone(&pass);
                match tokio::task::spawn_blocking(move || pass()).await {
                    Ok(QuotaOutcome::Satisfied { evicted }) if evicted > 0 => {
                        info!(evicted, "quota pass finished");
                    }
                    Ok(outcome) => debug!(?outcome, "quota pass finished"),
                    Err(err) => error!(error = %err, "quota pass panicked"),
                }
            }
            debug!("quota worker shutting down");
        });
        (QuotaHandle { tx }, task)
    }
}
