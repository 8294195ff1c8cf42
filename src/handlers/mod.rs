//! HTTP handlers. Thin adapters between axum and [`ContentStore`].

use crate::services::content_store::ContentStore;
use std::sync::Arc;

pub mod health_handlers;
pub mod item_handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: ContentStore,
    /// Base URL prepended to item links, without a trailing slash.
    pub public_url: Arc<str>,
}

impl AppState {
    pub fn new(store: ContentStore, public_url: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            public_url: public_url.into(),
        }
    }
}
