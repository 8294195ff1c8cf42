//! Represents one stored upload and the values derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bytes in the "gigabyte" used by the retention rate (SI, not GiB).
pub const ONE_GIGABYTE: u64 = 1_000_000_000;

/// Metadata record persisted next to every payload as the item sidecar.
///
/// Field names on disk follow the sidecar format the store has always
/// written, so existing data directories stay readable.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredItem {
    /// Short identifier, also the name of the item directory.
    #[serde(rename = "ID")]
    pub id: String,

    /// Client-supplied filename (final path component only).
    #[serde(rename = "Name")]
    pub original_name: String,

    /// Hex MD5 of the compressed payload; `id` is derived from it.
    #[serde(rename = "Hash")]
    pub fingerprint: String,

    /// Size of the original, uncompressed upload.
    #[serde(rename = "Size")]
    pub size: u64,

    #[serde(rename = "SizeHuman", default)]
    pub size_human: String,

    #[serde(rename = "ContentType")]
    pub content_type: String,

    /// Ingestion time; the retention clock starts here.
    #[serde(rename = "Modified")]
    pub modified_at: DateTime<Utc>,

    #[serde(rename = "IsImage", default)]
    pub is_image: bool,

    #[serde(rename = "IsText", default)]
    pub is_text: bool,

    #[serde(rename = "IsAudio", default)]
    pub is_audio: bool,

    #[serde(rename = "IsVideo", default)]
    pub is_video: bool,

    /// Whether the sniffed prefix was plain ASCII.
    #[serde(rename = "IsASCII", default)]
    pub is_ascii: bool,

    /// Path (relative to the public URL) that serves the payload.
    #[serde(rename = "Link", default)]
    pub public_link: String,
}

impl StoredItem {
    /// Build the record for a freshly ingested payload, deriving the
    /// media flags from `content_type`.
    pub fn new(
        id: String,
        original_name: String,
        fingerprint: String,
        size: u64,
        content_type: String,
        is_ascii: bool,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let public_link = format!("/1/{}/{}", id, original_name);
        Self {
            is_image: content_type.contains("image/"),
            is_text: content_type.contains("text/"),
            is_audio: content_type.contains("audio/"),
            is_video: content_type.contains("video/"),
            size_human: human_bytes(size),
            id,
            original_name,
            fingerprint,
            size,
            content_type,
            modified_at,
            is_ascii,
            public_link,
        }
    }

    /// Moment at which the retention sweeper may delete this item.
    pub fn expires_at(&self, minutes_per_gigabyte: f64) -> DateTime<Utc> {
        let ttl = time_to_deletion(self.size, minutes_per_gigabyte);
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.modified_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Retention window for an item of `size` bytes.
///
/// Inversely proportional to size: `minutes_per_gigabyte * (1 GB / size)`.
/// A zero-byte item is treated as one byte. Saturates at `Duration::MAX`.
pub fn time_to_deletion(size: u64, minutes_per_gigabyte: f64) -> Duration {
    let size = size.max(1) as f64;
    let minutes = minutes_per_gigabyte * (ONE_GIGABYTE as f64 / size);
    Duration::try_from_secs_f64(minutes * 60.0).unwrap_or(Duration::MAX)
}

/// Format a byte count with SI units, e.g. `83 MB`, `1.5 kB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];
    if bytes < 10 {
        return format!("{} B", bytes);
    }
    let mut exp = 0;
    let mut divisor = 1u64;
    while bytes / divisor >= 1000 && exp < UNITS.len() - 1 {
        divisor *= 1000;
        exp += 1;
    }
    let value = (bytes as f64 / divisor as f64 * 10.0).round() / 10.0;
    if value < 10.0 {
        format!("{:.1} {}", value, UNITS[exp])
    } else {
        format!("{:.0} {}", value, UNITS[exp])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(d: Duration) -> f64 {
        d.as_secs_f64() / 60.0
    }

    #[test]
    fn one_gigabyte_lives_for_the_configured_rate() {
        let ttl = time_to_deletion(1_000_000_000, 60.0);
        assert!((minutes(ttl) - 60.0).abs() < 1e-6);
    }

    #[test]
    fn smaller_items_live_longer() {
        let half = time_to_deletion(500_000_000, 60.0);
        assert!((minutes(half) - 120.0).abs() < 1e-6);
        assert!(half > time_to_deletion(1_000_000_000, 60.0));
    }

    #[test]
    fn empty_items_do_not_divide_by_zero() {
        assert_eq!(time_to_deletion(0, 60.0), time_to_deletion(1, 60.0));
        assert!(time_to_deletion(0, f64::MAX) == Duration::MAX);
    }

    #[test]
    fn media_flags_follow_content_type() {
        let item = StoredItem::new(
            "123".into(),
            "cat.png".into(),
            "abc".into(),
            2048,
            "image/png".into(),
            false,
            Utc::now(),
        );
        assert!(item.is_image);
        assert!(!item.is_text && !item.is_audio && !item.is_video);
        assert_eq!(item.public_link, "/1/123/cat.png");
        assert_eq!(item.size_human, "2.0 kB");
    }

    #[test]
    fn human_bytes_uses_si_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(999), "999 B");
        assert_eq!(human_bytes(1_500), "1.5 kB");
        assert_eq!(human_bytes(83_000_000), "83 MB");
        assert_eq!(human_bytes(1_000_000_000), "1.0 GB");
    }
}
