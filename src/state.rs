//! Shared state handed to every handler.

use crate::services::{lazy_store::CacheStats, store::Store};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// The store requests are served from (normally a `LazyStore`).
    pub store: Arc<dyn Store>,

    /// Orchestrator counters, reported by `/readyz` when present.
    pub stats: Option<Arc<CacheStats>>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, stats: None }
    }

    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = Some(stats);
        self
    }
}
