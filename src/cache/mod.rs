//! Bounded-byte, bounded-entry, TTL'd LRU cache from resolved path to
//! cached file content.
//!
//! Cache entries participate simultaneously in a hash map (path -> slot
//! index) and a doubly linked list ordered by recency. Per Design Note §9
//! ("raw pointer graphs... use an arena plus stable indices"), the list is
//! intrusive over a slab (`Vec<Option<Slot>>` + free list) rather than
//! over raw pointers, so eviction and move-to-head are safe-Rust `usize`
//! manipulations.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One cached file's content and metadata.
#[derive(Debug, Clone)]
pub struct CacheValue {
    pub content: Vec<u8>,
    pub mime_type: String,
    pub last_modified: u64,
    pub etag: String,
}

struct Slot {
    path: String,
    value: CacheValue,
    memory_usage: usize,
    inserted_at: Instant,
    last_access: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Metadata overhead charged against `byte_cap` per entry, alongside the
/// content bytes themselves — mirrors the original's `size(metadata) +
/// size(content)` accounting.
const METADATA_OVERHEAD: usize = 128;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded LRU cache manager. Per §5's documented concurrency adaptation,
/// a host that shares one manager across connection tasks wraps it in a
/// `parking_lot::Mutex` (done one level up, in the static-file service);
/// the manager itself assumes exclusive access while a method runs.
pub struct CacheManager {
    slots: Vec<Option<Slot>>,
    free_list: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    byte_total: usize,
    byte_cap: usize,
    entry_cap: usize,
    ttl: Option<Duration>,
    stats: CacheStats,
}

impl CacheManager {
    /// `ttl_secs <= 0` disables expiry, per spec.md §4.4.
    pub fn new(byte_cap: usize, entry_cap: usize, ttl_secs: i64) -> Self {
        CacheManager {
            slots: Vec::new(),
            free_list: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            byte_total: 0,
            byte_cap,
            entry_cap,
            ttl: if ttl_secs > 0 {
                Some(Duration::from_secs(ttl_secs as u64))
            } else {
                None
            },
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn byte_total(&self) -> usize {
        self.byte_total
    }

    /// Looks up `path`. On hit, moves the entry to the list head and
    /// increments the hit counter. A TTL-expired entry is evicted and
    /// counted as a miss.
    pub fn get(&mut self, path: &str) -> Option<CacheValue> {
        let idx = *self.index.get(path)?;

        if let Some(ttl) = self.ttl {
            let inserted_at = self.slots[idx].as_ref().unwrap().inserted_at;
            if inserted_at.elapsed() > ttl {
                self.evict_index(idx);
                self.stats.misses += 1;
                return None;
            }
        }

        self.move_to_head(idx);
        let slot = self.slots[idx].as_mut().unwrap();
        slot.last_access = Instant::now();
        self.stats.hits += 1;
        Some(slot.value.clone())
    }

    /// Inserts or replaces the entry for `path`, evicting LRU tails until
    /// both caps are satisfied.
    pub fn put(&mut self, path: impl Into<String>, value: CacheValue) {
        let path = path.into();
        let memory_usage = METADATA_OVERHEAD + value.content.len() + value.mime_type.len() + value.etag.len();

        if let Some(&idx) = self.index.get(&path) {
            let old_usage = self.slots[idx].as_ref().unwrap().memory_usage;
            self.byte_total = self.byte_total - old_usage + memory_usage;
            let slot = self.slots[idx].as_mut().unwrap();
            slot.value = value;
            slot.memory_usage = memory_usage;
            slot.inserted_at = Instant::now();
            slot.last_access = Instant::now();
            self.move_to_head(idx);
            self.evict_until_within_caps();
            return;
        }

        while (self.byte_total + memory_usage > self.byte_cap && !self.index.is_empty())
            || self.index.len() >= self.entry_cap
        {
            if !self.evict_tail() {
                break;
            }
        }

        let now = Instant::now();
        let slot = Slot {
            path: path.clone(),
            value,
            memory_usage,
            inserted_at: now,
            last_access: now,
            prev: None,
            next: self.head,
        };
        let idx = self.alloc_slot(slot);
        if let Some(head) = self.head {
            self.slots[head].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.index.insert(path, idx);
        self.byte_total += memory_usage;
    }

    fn evict_until_within_caps(&mut self) {
        while (self.byte_total > self.byte_cap || self.index.len() > self.entry_cap) && !self.index.is_empty() {
            if !self.evict_tail() {
                break;
            }
        }
    }

    fn alloc_slot(&mut self, slot: Slot) -> usize {
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    fn move_to_head(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        let slot = self.slots[idx].as_mut().unwrap();
        slot.prev = None;
        slot.next = self.head;
        if let Some(head) = self.head {
            self.slots[head].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().unwrap();
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    /// Evicts the list tail. Returns `false` if the cache is empty.
    fn evict_tail(&mut self) -> bool {
        let Some(tail) = self.tail else { return false };
        self.evict_index(tail);
        self.stats.evictions += 1;
        true
    }

    fn evict_index(&mut self, idx: usize) {
        self.unlink(idx);
        let slot = self.slots[idx].take().unwrap();
        self.index.remove(&slot.path);
        self.byte_total -= slot.memory_usage;
        self.free_list.push(idx);
    }

    /// Removes every TTL-expired entry proactively (e.g. from a periodic
    /// sweep); `get` already evicts lazily on access, so this is only
    /// needed to reclaim memory for entries nobody is requesting anymore.
    pub fn cleanup_expired(&mut self) {
        let Some(ttl) = self.ttl else { return };
        let expired: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|s| s.inserted_at.elapsed() > ttl).map(|_| i))
            .collect();
        for idx in expired {
            self.evict_index(idx);
        }
    }

    /// Checks every invariant spec.md §8 requires of a cache manager.
    /// Intended for tests; not on any hot path.
    #[cfg(test)]
    fn check_invariants(&self) {
        let computed_total: usize = self
            .slots
            .iter()
            .filter_map(|s| s.as_ref().map(|s| s.memory_usage))
            .sum();
        assert_eq!(computed_total, self.byte_total);
        assert_eq!(self.index.len(), self.slots.iter().filter(|s| s.is_some()).count());
        assert!(self.byte_total <= self.byte_cap || self.index.len() <= 1);
        assert!(self.index.len() <= self.entry_cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(content: &str) -> CacheValue {
        CacheValue {
            content: content.as_bytes().to_vec(),
            mime_type: "text/plain".to_string(),
            last_modified: 0,
            etag: format!("\"{}\"", content.len()),
        }
    }

    #[test]
    fn lru_eviction_scenario_from_spec() {
        let mut cache = CacheManager::new(1024 * 1024, 2, -1);
        cache.put("/a", value("A"));
        cache.put("/b", value("B"));
        cache.get("/a");
        cache.put("/c", value("C"));

        assert!(cache.get("/a").is_some());
        assert!(cache.get("/b").is_none());
        assert!(cache.get("/c").is_some());
        assert_eq!(cache.stats().evictions, 1);
        cache.check_invariants();
    }

    #[test]
    fn byte_cap_is_respected() {
        let mut cache = CacheManager::new(METADATA_OVERHEAD + 10, 1000, -1);
        cache.put("/small", value("x"));
        cache.put("/big", value(&"y".repeat(20)));
        assert!(cache.byte_total() <= METADATA_OVERHEAD + 10);
        cache.check_invariants();
    }

    #[test]
    fn replacing_existing_path_updates_byte_total_without_duplicating() {
        let mut cache = CacheManager::new(1024, 10, -1);
        cache.put("/a", value("short"));
        let before = cache.len();
        cache.put("/a", value("a longer value than before"));
        assert_eq!(cache.len(), before);
        cache.check_invariants();
    }

    #[test]
    fn ttl_expiry_evicts_and_counts_as_miss() {
        let mut cache = CacheManager::new(1024, 10, 0); // handled manually below
        cache.ttl = Some(Duration::from_millis(1));
        cache.put("/a", value("A"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("/a").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn non_positive_ttl_disables_expiry() {
        let cache = CacheManager::new(1024, 10, 0);
        assert!(cache.ttl.is_none());
        let cache_neg = CacheManager::new(1024, 10, -5);
        assert!(cache_neg.ttl.is_none());
    }
}
