//! Local → origin bucket name mapping.

use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// Maps a local bucket name to the bucket it mirrors on the origin.
/// Unmapped names resolve to themselves.
///
/// The mapping is replaced wholesale; readers always see either the old or
/// the new table, never a mix.
#[derive(Debug, Default)]
pub struct NamespaceMap {
    current: RwLock<Arc<HashMap<String, String>>>,
}

impl NamespaceMap {
    pub fn new(mapping: HashMap<String, String>) -> Self {
        Self {
            current: RwLock::new(Arc::new(mapping)),
        }
    }

    pub fn replace(&self, mapping: HashMap<String, String>) {
        *self.current.write() = Arc::new(mapping);
    }

    pub fn origin_bucket(&self, local: &str) -> String {
        self.current
            .read()
            .get(local)
            .cloned()
            .unwrap_or_else(|| local.to_string())
    }
}
