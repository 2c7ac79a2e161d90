//! Item lookup seam.
//!
//! The fact store never creates items. Writers resolve product names through
//! a [`Catalog`] first and treat a missing entry as a caller error.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Name ↔ id lookup over the item master.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolve an item name to its id.
    async fn item_id_by_name(&self, name: &str) -> Result<Option<i64>>;

    /// Resolve an item id to its name.
    async fn item_name_by_id(&self, item_id: i64) -> Result<Option<String>>;
}

/// In-memory catalog for tests and embedding callers that keep their own item list.
pub struct InMemoryCatalog {
    items: RwLock<BTreeMap<i64, String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a name and return its id (existing id if the name is known).
    pub fn insert(&self, name: &str) -> Result<i64> {
        let mut items = self
            .items
            .write()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        if let Some((id, _)) = items.iter().find(|(_, n)| n.as_str() == name) {
            return Ok(*id);
        }
        let id = items.keys().next_back().map(|id| id + 1).unwrap_or(1);
        items.insert(id, name.to_string());
        Ok(id)
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn item_id_by_name(&self, name: &str) -> Result<Option<i64>> {
        let items = self
            .items
            .read()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        Ok(items
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id))
    }

    async fn item_name_by_id(&self, item_id: i64) -> Result<Option<String>> {
        let items = self
            .items
            .read()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        Ok(items.get(&item_id).cloned())
    }
}
