//! Retention sweeper: deletes items older than their size-scaled lifetime.

use crate::{config::StoreConfig, models::item::time_to_deletion};
use chrono::{DateTime, Utc};
use std::{fs, io::ErrorKind, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{
    item_codec::{is_transient, read_sidecar, remove_item_dir},
    quota::QuotaHandle,
};

/// What one sweep did, for logging and tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    /// Entries whose sidecar could not be decoded.
    pub skipped: usize,
    pub purged_uploads: usize,
}

/// Sweep the store once. `purge_transient` also removes leftover
/// `upload_*` buffers, which is only safe before any upload can be running.
pub fn sweep_once(config: &StoreConfig, purge_transient: bool) -> SweepReport {
    sweep_at(config, purge_transient, Utc::now())
}

pub fn sweep_at(config: &StoreConfig, purge_transient: bool, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();
    let entries = match fs::read_dir(&config.root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return report,
        Err(err) => {
            error!(root = %config.root.display(), error = %err, "error reading store directory");
            return report;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_transient(&name) {
            if purge_transient {
                let path = entry.path();
                let removed = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => report.purged_uploads += 1,
                    Err(err) => error!(filename = %name, error = %err, "error removing temp file"),
                }
            }
            continue;
        }
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        report.examined += 1;
        let item = match read_sidecar(&config.root, &name) {
            Ok(item) => item,
            Err(err) => {
                debug!(id = %name, error = %err, "skipping item: unreadable metadata");
                report.skipped += 1;
                continue;
            }
        };

        let ttl = time_to_deletion(item.size, config.minutes_per_gigabyte);
        let age = now
            .signed_duration_since(item.modified_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age < ttl {
            debug!(id = %name, ?age, time_to_deletion = ?ttl, "keeping item: not old enough");
            continue;
        }

        info!(
            id = %item.id,
            size = %item.size_human,
            modified = %item.modified_at,
            "deleting expired item"
        );
        match remove_item_dir(&config.root, &name) {
            Ok(_) => report.expired += 1,
            Err(err) => error!(id = %name, error = %err, "error deleting expired item"),
        }
    }

    report
}

/// Run the sweeper forever: a startup pass that also purges stale upload
/// buffers, then one pass every `interval`. Each pass is followed by a
/// quota request.
pub fn spawn_sweeper(
    config: Arc<StoreConfig>,
    interval: Duration,
    quota: QuotaHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut startup = true;
        loop {
            ticker.tick().await;
            let cfg = Arc::clone(&config);
            let purge = startup;
            match tokio::task::spawn_blocking(move || sweep_once(&cfg, purge)).await {
                Ok(report) => debug!(?report, startup, "retention sweep finished"),
                Err(err) => error!(error = %err, "retention sweep panicked"),
            }
            startup = false;
            quota.request();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::item::StoredItem,
        services::item_codec::{encode_sidecar, sidecar_name},
    };
    use std::path::Path;
    use tempfile::TempDir;

    fn config(root: &TempDir) -> StoreConfig {
        StoreConfig {
            root: root.path().to_path_buf(),
            max_bytes_per_file: u64::MAX,
            max_bytes_total: u64::MAX,
            minutes_per_gigabyte: 60.0,
            id_digits: 3,
        }
    }

    /// Write an item whose metadata claims `size` bytes, created at `modified`.
    fn put_item(root: &Path, id: &str, size: u64, modified: DateTime<Utc>) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("payload.bin"), b"gz").unwrap();
        let item = StoredItem::new(
            id.into(),
            "payload.bin".into(),
            "fp".into(),
            size,
            "application/octet-stream".into(),
            false,
            modified,
        );
        fs::write(dir.join(sidecar_name(id)), encode_sidecar(&item).unwrap()).unwrap();
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[test]
    fn one_gigabyte_expires_after_an_hour() {
        let root = tempfile::tempdir().unwrap();
        let now = Utc::now();
        put_item(root.path(), "061", 1_000_000_000, now - minutes(61));
        put_item(root.path(), "059", 1_000_000_000, now - minutes(59));

        let report = sweep_at(&config(&root), false, now);
        assert_eq!(report.expired, 1);
        assert!(!root.path().join("061").exists());
        assert!(root.path().join("059").exists());
    }

    #[test]
    fn half_gigabyte_lives_twice_as_long() {
        let root = tempfile::tempdir().unwrap();
        let now = Utc::now();
        put_item(root.path(), "090", 500_000_000, now - minutes(90));
        put_item(root.path(), "121", 500_000_000, now - minutes(121));

        sweep_at(&config(&root), false, now);
        assert!(root.path().join("090").exists());
        assert!(!root.path().join("121").exists());
    }

    #[test]
    fn corrupt_sidecar_does_not_stop_the_sweep() {
        let root = tempfile::tempdir().unwrap();
        let now = Utc::now();
        put_item(root.path(), "001", 1_000_000_000, now - minutes(120));
        put_item(root.path(), "002", 1_000_000_000, now - minutes(10));
        put_item(root.path(), "004", 1_000_000_000, now - minutes(61));
        put_item(root.path(), "005", 2_000_000_000, now - minutes(20));
        let broken = root.path().join("003");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(sidecar_name("003")), b"not gzip at all").unwrap();

        let report = sweep_at(&config(&root), false, now);
        assert_eq!(report.examined, 5);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.expired, 2);
        assert!(!root.path().join("001").exists());
        assert!(root.path().join("002").exists());
        assert!(broken.exists());
        assert!(!root.path().join("004").exists());
        assert!(root.path().join("005").exists());
    }

    #[test]
    fn upload_buffers_only_purged_at_startup() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("upload_abc"), b"partial").unwrap();

        let report = sweep_at(&config(&root), false, Utc::now());
        assert_eq!(report.purged_uploads, 0);
        assert!(root.path().join("upload_abc").exists());

        let report = sweep_at(&config(&root), true, Utc::now());
        assert_eq!(report.purged_uploads, 1);
        assert!(!root.path().join("upload_abc").exists());
    }

    #[test]
    fn missing_root_is_a_quiet_no_op() {
        let root = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            root: root.path().join("absent"),
            ..config(&root)
        };
        assert_eq!(sweep_once(&cfg, true), SweepReport::default());
    }
}
