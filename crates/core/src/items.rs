//! Static item directory: product id → department + emoji.
//!
//! The directory is an immutable [`ItemMap`] behind a shared pointer. Readers take
//! a [`ItemDirectory::snapshot`] and render against it; [`ItemDirectory::reload`]
//! builds nothing itself, it only swaps the pointer to a fully constructed map, so a
//! reader observes either the old mapping or the new one, never a mix.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Fallback used for product ids absent from the directory.
pub const UNKNOWN_CATEGORY: &str = "Unknown";
pub const UNKNOWN_EMOJI: &str = "❓";

/// Display metadata for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub category: String,
    pub emoji: String,
}

impl ItemInfo {
    pub fn new(category: impl Into<String>, emoji: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            emoji: emoji.into(),
        }
    }
}

/// Immutable product id → metadata mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMap {
    items: HashMap<i64, ItemInfo>,
}

impl ItemMap {
    pub fn new(items: HashMap<i64, ItemInfo>) -> Self {
        Self { items }
    }

    pub fn get(&self, product_id: i64) -> Option<&ItemInfo> {
        self.items.get(&product_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Display string for a recommended product: `"{emoji} {id} ({category})"`.
    pub fn render(&self, product_id: i64) -> String {
        match self.get(product_id) {
            Some(info) => format!("{} {} ({})", info.emoji, product_id, info.category),
            None => format!("{UNKNOWN_EMOJI} {product_id} ({UNKNOWN_CATEGORY})"),
        }
    }
}

impl FromIterator<(i64, ItemInfo)> for ItemMap {
    fn from_iter<T: IntoIterator<Item = (i64, ItemInfo)>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Shared, atomically reloadable handle to the current [`ItemMap`].
#[derive(Debug, Clone, Default)]
pub struct ItemDirectory {
    current: Arc<RwLock<Arc<ItemMap>>>,
}

impl ItemDirectory {
    pub fn new(map: ItemMap) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(map))),
        }
    }

    /// Current mapping. Holding the snapshot keeps it alive across a reload.
    pub fn snapshot(&self) -> Arc<ItemMap> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the mapping. Returns the number of items now visible.
    pub fn reload(&self, map: ItemMap) -> usize {
        let next = Arc::new(map);
        let len = next.len();
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!(items = len, "item directory reloaded");
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dairy() -> ItemMap {
        [(10, ItemInfo::new("DAIRY", "🥛"))].into_iter().collect()
    }

    #[test]
    fn renders_known_and_unknown_items() {
        let map = dairy();
        assert_eq!(map.render(10), "🥛 10 (DAIRY)");
        assert_eq!(map.render(99), "❓ 99 (Unknown)");
    }

    #[test]
    fn snapshot_survives_reload() {
        let dir = ItemDirectory::new(dairy());
        let before = dir.snapshot();

        let replaced: ItemMap = [(10, ItemInfo::new("PRODUCE", "🥕"))].into_iter().collect();
        assert_eq!(dir.reload(replaced), 1);

        assert_eq!(before.render(10), "🥛 10 (DAIRY)");
        assert_eq!(dir.snapshot().render(10), "🥕 10 (PRODUCE)");
    }

    #[test]
    fn concurrent_readers_see_whole_maps_only() {
        let a: ItemMap = (0..100).map(|i| (i, ItemInfo::new("A", "a"))).collect();
        let b: ItemMap = (0..100).map(|i| (i, ItemInfo::new("B", "b"))).collect();
        let dir = ItemDirectory::new(a.clone());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let dir = dir.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = dir.snapshot();
                        let first = snap.get(0).unwrap().category.clone();
                        assert!((0..100).all(|i| snap.get(i).unwrap().category == first));
                    }
                })
            })
            .collect();

        for i in 0..200 {
            dir.reload(if i % 2 == 0 { b.clone() } else { a.clone() });
        }
        for r in readers {
            r.join().unwrap();
        }
    }
}
