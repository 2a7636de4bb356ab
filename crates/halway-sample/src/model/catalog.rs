//! # Catalog Model
//!
//! The states exchanged as HAL properties, and [`CatalogStore`], the data source behind
//! the server resources.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State of an `Item` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub id: u32,
    pub name: String,
    pub price: f64,
}

/// State of the `Catalog` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogState {
    pub title: String,
    pub size: usize,
}

#[derive(Debug, Clone)]
struct StoredItem {
    state: ItemState,
    related: Vec<u32>,
}

/// Thread-safe item store. Ids are assigned in insertion order, starting at 1.
pub struct CatalogStore {
    title: String,
    items: RwLock<BTreeMap<u32, StoredItem>>,
}

impl CatalogStore {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: RwLock::new(BTreeMap::new()),
        }
    }

    /// A small catalog with three items, the first two related to each other.
    pub fn sample() -> Self {
        let store = Self::new("Hardware");
        let hammer = store.add_item("Hammer", 12.5);
        let nails = store.add_item("Nails", 3.0);
        store.add_item("Saw", 24.0);
        store.relate(hammer, nails);
        store.relate(nails, hammer);
        store
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn add_item(&self, name: impl Into<String>, price: f64) -> u32 {
        let mut items = self.items.write();
        let id = items.keys().next_back().map_or(1, |last| last + 1);
        items.insert(
            id,
            StoredItem {
                state: ItemState {
                    id,
                    name: name.into(),
                    price,
                },
                related: Vec::new(),
            },
        );
        id
    }

    /// Adds `to` to the related items of `from`. Returns false if either item is unknown.
    pub fn relate(&self, from: u32, to: u32) -> bool {
        let mut items = self.items.write();
        if !items.contains_key(&to) {
            return false;
        }
        match items.get_mut(&from) {
            Some(item) => {
                if !item.related.contains(&to) {
                    item.related.push(to);
                }
                true
            }
            None => false,
        }
    }

    pub fn rename(&self, id: u32, name: impl Into<String>) -> bool {
        match self.items.write().get_mut(&id) {
            Some(item) => {
                item.state.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u32) -> Option<ItemState> {
        self.items.read().get(&id).map(|item| item.state.clone())
    }

    pub fn related(&self, id: u32) -> Vec<u32> {
        self.items
            .read()
            .get(&id)
            .map(|item| item.related.clone())
            .unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.items.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> CatalogState {
        CatalogState {
            title: self.title.clone(),
            size: self.len(),
        }
    }
}
