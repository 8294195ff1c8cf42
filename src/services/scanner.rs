//! Store scanner: total occupied bytes and the largest item.
//!
//! The walk runs against [`DirectoryListing`] so it can be exercised on an
//! in-memory tree. Each item directory holds one payload and one small
//! sidecar, so the biggest file is a good enough proxy for the biggest item.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tracing::warn;

use super::item_codec::is_transient;

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: String,
    pub is_dir: bool,
    /// File length; ignored for directories.
    pub len: u64,
}

impl ListedEntry {
    pub fn file(name: impl Into<String>, len: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            len,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            len: 0,
        }
    }
}

/// Capability to list the immediate children of a directory.
pub trait DirectoryListing {
    fn list(&self, dir: &Path) -> io::Result<Vec<ListedEntry>>;
}

/// Lists the real filesystem. Symlinks are reported as files of their own
/// length and never followed.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsListing;

impl DirectoryListing for FsListing {
    fn list(&self, dir: &Path) -> io::Result<Vec<ListedEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => entries.push(ListedEntry::dir(name)),
                Ok(meta) => entries.push(ListedEntry::file(name, meta.len())),
                // removed between read_dir and stat, e.g. by a concurrent eviction
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "cannot stat entry");
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// The item currently holding the biggest file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LargestItem {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total_bytes: u64,
    pub largest: Option<LargestItem>,
}

impl ScanSummary {
    pub fn largest_id(&self) -> Option<&str> {
        self.largest.as_ref().map(|l| l.id.as_str())
    }
}

/// Walk `root`, summing every file and tracking the largest one inside an
/// item directory.
///
/// A missing root is an empty store. Failing to list the root itself is an
/// error; failing to list anything below it is logged and skipped.
pub fn scan(listing: &impl DirectoryListing, root: &Path) -> io::Result<ScanSummary> {
    let top = match listing.list(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ScanSummary::default()),
        Err(err) => return Err(err),
    };

    let mut summary = ScanSummary::default();
    // (directory, owning item id)
    let mut pending: Vec<(PathBuf, String)> = Vec::new();

    for entry in top {
        if entry.is_dir {
            if is_transient(&entry.name) {
                // counted, never evicted as an item
                walk_sizes(listing, &root.join(&entry.name), &mut summary.total_bytes);
            } else {
                pending.push((root.join(&entry.name), entry.name));
            }
        } else {
            summary.total_bytes += entry.len;
        }
    }

    while let Some((dir, id)) = pending.pop() {
        let entries = match listing.list(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable directory");
                continue;
            }
        };
        for entry in entries {
            let path = dir.join(&entry.name);
            if entry.is_dir {
                pending.push((path, id.clone()));
                continue;
            }
            summary.total_bytes += entry.len;
            let bigger = summary
                .largest
                .as_ref()
                .is_none_or(|largest| entry.len > largest.size);
            if bigger {
                summary.largest = Some(LargestItem {
                    id: id.clone(),
                    path,
                    size: entry.len,
                });
            }
        }
    }

    Ok(summary)
}

fn walk_sizes(listing: &impl DirectoryListing, dir: &Path, total: &mut u64) {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        match listing.list(&dir) {
            Ok(entries) => {
                for entry in entries {
                    if entry.is_dir {
                        pending.push(dir.join(&entry.name));
                    } else {
                        *total += entry.len;
                    }
                }
            }
            Err(err) => warn!(dir = %dir.display(), error = %err, "skipping unreadable directory"),
        }
    }
}
