// Tue Oct 13 2026 - Alex

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Compute-once store. The map lock is only held to fetch or create a cell; the
/// value is computed outside it, so a computation may itself consult other keys.
/// A computation must never ask for its own key.
pub struct MemoCache<K, V> {
    cells: RwLock<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K: Eq + Hash + Copy, V: Clone> MemoCache<K, V> {
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_compute<F: FnOnce() -> V>(&self, key: K, compute: F) -> V {
        self.cell(key).get_or_init(compute).clone()
    }

    pub fn get(&self, key: K) -> Option<V> {
        self.cells.read().get(&key).and_then(|cell| cell.get().cloned())
    }

    pub fn len(&self) -> usize {
        self.cells.read().values().filter(|cell| cell.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cells.write().clear();
    }

    fn cell(&self, key: K) -> Arc<OnceCell<V>> {
        if let Some(cell) = self.cells.read().get(&key) {
            return cell.clone();
        }
        self.cells
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

impl<K: Eq + Hash + Copy, V: Clone> Default for MemoCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_computes_once() {
        let cache: MemoCache<u64, u64> = MemoCache::new();
        let calls = AtomicUsize::new(0);
        let results: Vec<u64> = (0..64)
            .into_par_iter()
            .map(|_| {
                cache.get_or_compute(7, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    49
                })
            })
            .collect();
        assert!(results.iter().all(|&v| v == 49));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_nested_keys() {
        let cache: MemoCache<u64, u64> = MemoCache::new();
        let value = cache.get_or_compute(1, || cache.get_or_compute(2, || 20) + 1);
        assert_eq!(value, 21);
        assert_eq!(cache.get(2), Some(20));
        cache.clear();
        assert!(cache.is_empty());
    }
}
