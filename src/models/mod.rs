//! Core data model of the share store.
//!
//! A stored item is immutable once written: its record serializes to the
//! gzip JSON sidecar that sits next to the payload on disk.

pub mod item;
