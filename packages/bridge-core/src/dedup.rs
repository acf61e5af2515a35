//! Bounded "already processed" cache for scanned block ids and `(tx, pair)` keys.
//!
//! Shared by every catch-up worker and the tail-follow loop, so lookups and inserts go
//! through a short `Mutex` critical section; nothing is awaited while it is held.
//!
//! ## Sizing
//!
//! - Block entries (id and height) are kept for roughly one `max_lag` window (67 by default).
//! - Transaction keys are `hash:pair_id` strings; 300 keys is well under 64 KB.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

const DEFAULT_BLOCK_CACHE_SIZE: usize = 67;
const DEFAULT_TX_CACHE_SIZE: usize = 300;

/// A remembered block: its id and the height it was scanned at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub id: String,
    pub height: u64,
}

/// Fixed-capacity, insertion-ordered map with oldest-first eviction.
struct BoundedMap<V> {
    order: VecDeque<String>,
    members: HashMap<String, V>,
    max_size: usize,
}

impl<V> BoundedMap<V> {
    fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            order: VecDeque::with_capacity(max_size),
            members: HashMap::with_capacity(max_size),
            max_size,
        }
    }

    fn get(&self, key: &str) -> Option<&V> {
        self.members.get(key)
    }

    /// Returns `false` when the key was already present; the stored value is kept.
    fn insert(&mut self, key: &str, value: V) -> bool {
        if self.members.contains_key(key) {
            return false;
        }
        while self.order.len() >= self.max_size {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.members.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.to_string());
        self.members.insert(key.to_string(), value);
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn entries(&self) -> impl Iterator<Item = (&String, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.members.get(k).map(|v| (k, v)))
    }
}

/// Dedup caches for one scanner.
pub struct DedupCache {
    blocks: Mutex<BoundedMap<u64>>,
    txs: Mutex<BoundedMap<()>>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_CACHE_SIZE, DEFAULT_TX_CACHE_SIZE)
    }
}

impl DedupCache {
    pub fn new(block_capacity: usize, tx_capacity: usize) -> Self {
        Self {
            blocks: Mutex::new(BoundedMap::new(block_capacity)),
            txs: Mutex::new(BoundedMap::new(tx_capacity)),
        }
    }

    pub fn is_block_scanned(&self, block_id: &str) -> bool {
        lock(&self.blocks).get(block_id).is_some()
    }

    pub fn cache_scanned_block(&self, block_id: &str, height: u64) {
        lock(&self.blocks).insert(block_id, height);
    }

    /// Height recorded for a remembered block.
    pub fn scanned_block_height(&self, block_id: &str) -> Option<u64> {
        lock(&self.blocks).get(block_id).copied()
    }

    /// Remembered blocks, oldest first.
    pub fn scanned_blocks(&self) -> Vec<DedupEntry> {
        lock(&self.blocks)
            .entries()
            .map(|(id, height)| DedupEntry {
                id: id.clone(),
                height: *height,
            })
            .collect()
    }

    pub fn is_tx_scanned(&self, tx_hash: &str, pair_id: &str) -> bool {
        lock(&self.txs).get(&tx_key(tx_hash, pair_id)).is_some()
    }

    pub fn cache_scanned_tx(&self, tx_hash: &str, pair_id: &str) {
        lock(&self.txs).insert(&tx_key(tx_hash, pair_id), ());
    }

    pub fn block_len(&self) -> usize {
        lock(&self.blocks).len()
    }

    pub fn tx_len(&self) -> usize {
        lock(&self.txs).len()
    }
}

fn tx_key(tx_hash: &str, pair_id: &str) -> String {
    format!("{}:{}", tx_hash.to_lowercase(), pair_id.to_lowercase())
}

// Poisoning is ignored: every BoundedMap mutation leaves the map consistent.
fn lock<V>(m: &Mutex<BoundedMap<V>>) -> MutexGuard<'_, BoundedMap<V>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_block_cache_insert_and_contains() {
        let cache = DedupCache::new(10, 10);
        assert!(!cache.is_block_scanned("b1"));
        cache.cache_scanned_block("b1", 1);
        assert!(cache.is_block_scanned("b1"));
    }

    #[test]
    fn test_block_cache_evicts_oldest() {
        let cache = DedupCache::new(3, 10);
        cache.cache_scanned_block("b1", 1);
        cache.cache_scanned_block("b2", 2);
        cache.cache_scanned_block("b3", 3);
        cache.cache_scanned_block("b4", 4);
        assert!(!cache.is_block_scanned("b1"));
        assert!(cache.is_block_scanned("b2"));
        assert!(cache.is_block_scanned("b4"));
        assert_eq!(cache.block_len(), 3);
    }

    #[test]
    fn test_reinsert_does_not_refresh_or_duplicate() {
        let cache = DedupCache::new(2, 10);
        cache.cache_scanned_block("b1", 1);
        cache.cache_scanned_block("b2", 2);
        cache.cache_scanned_block("b1", 1);
        assert_eq!(cache.block_len(), 2);
        cache.cache_scanned_block("b3", 3);
        // b1 is still the oldest entry
        assert!(!cache.is_block_scanned("b1"));
        assert!(cache.is_block_scanned("b2"));
    }

    #[test]
    fn test_block_entries_keep_height() {
        let cache = DedupCache::new(2, 10);
        cache.cache_scanned_block("b1", 100);
        cache.cache_scanned_block("b2", 101);
        cache.cache_scanned_block("b1", 500);
        assert_eq!(cache.scanned_block_height("b1"), Some(100));
        cache.cache_scanned_block("b3", 102);
        assert_eq!(cache.scanned_block_height("b1"), None);
        assert_eq!(
            cache.scanned_blocks(),
            vec![
                DedupEntry { id: "b2".into(), height: 101 },
                DedupEntry { id: "b3".into(), height: 102 },
            ]
        );
    }

    #[test]
    fn test_tx_cache_keys_on_hash_and_pair() {
        let cache = DedupCache::new(10, 10);
        cache.cache_scanned_tx("ABCD", "eos");
        assert!(cache.is_tx_scanned("abcd", "EOS"));
        assert!(!cache.is_tx_scanned("abcd", "usdt"));
    }

    #[test]
    fn test_concurrent_inserts() {
        let cache = Arc::new(DedupCache::new(1000, 10));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.cache_scanned_block(&format!("{}-{}", t, i), i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.block_len(), 800);
    }
}
