//! The content store subsystem: ingestion, encoding, id assignment and the
//! two eviction policies (quota and retention).

pub mod content_store;
pub mod identifier;
pub mod item_codec;
pub mod quota;
pub mod retention;
pub mod scanner;
pub mod sniffer;
