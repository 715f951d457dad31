use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::block::Block;
use crate::table::SsTable;

/// Cache of open table readers, keyed by sst id.
pub type TableCache = LruCache<u64, Arc<SsTable>>;
/// Cache of decoded blocks, keyed by (sst id, block offset).
pub type BlockCache = LruCache<(u64, u64), Arc<Block>>;

/// One pinned cache slot. The value stays resident while any handle is
/// alive; the last handle to drop reports the key back to the cache's
/// victim queue through the releaser channel.
struct CacheEntry<K, V> {
    key: K,
    value: V,
    refs: AtomicU64,
    releaser: Sender<K>,
}

/// A pin on a cache entry. Cloning re-pins; dropping releases.
pub struct CacheHandle<K: Clone, V>(Arc<CacheEntry<K, V>>);

impl<K: Clone, V> CacheHandle<K, V> {
    pub fn value(&self) -> &V {
        &self.0.value
    }
}

impl<K: Clone, V> Clone for CacheHandle<K, V> {
    fn clone(&self) -> Self {
        self.0.refs.fetch_add(1, Ordering::Relaxed);
        CacheHandle(self.0.clone())
    }
}

impl<K: Clone, V> Drop for CacheHandle<K, V> {
    fn drop(&mut self) {
        if self.0.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            // last pin gone, nominate the key for eviction. The cache may be
            // gone already during shutdown, which is fine.
            let _ = self.0.releaser.send(self.0.key.clone());
        }
    }
}

struct LruInner<K, V> {
    map: HashMap<K, Arc<CacheEntry<K, V>>>,
    victims: VecDeque<K>,
}

/// Bounded cache with ref-counted pinning. Two structures: the key map and
/// a FIFO of once-released keys. An entry becomes evictable only after its
/// pin count reaches zero; eviction takes the oldest such key. Lookups that
/// re-pin a queued victim simply win the race, the stale queue slot is
/// skipped at eviction time.
pub struct LruCache<K: Clone + Eq + Hash, V: Clone> {
    inner: RwLock<LruInner<K, V>>,
    capacity: usize,
    releaser: Sender<K>,
    released: Receiver<K>,
}

impl<K: Clone + Eq + Hash, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "cache capacity must be >= 1");
        let (releaser, released) = unbounded();
        Self {
            inner: RwLock::new(LruInner {
                map: HashMap::new(),
                victims: VecDeque::new(),
            }),
            capacity,
            releaser,
            released,
        }
    }

    /// Pin and return the entry under `key`, if resident.
    pub fn get(&self, key: &K) -> Option<CacheHandle<K, V>> {
        let inner = self.inner.read();
        let entry = inner.map.get(key)?;
        entry.refs.fetch_add(1, Ordering::Relaxed);
        Some(CacheHandle(entry.clone()))
    }

    /// Insert `value` under `key` and return a pinned handle. If another
    /// loader raced us here, their entry wins and `value` is dropped. At
    /// capacity the oldest fully-released entry is evicted first.
    pub fn insert(&self, key: K, value: V) -> CacheHandle<K, V> {
        let mut inner = self.inner.write();

        while let Ok(victim) = self.released.try_recv() {
            inner.victims.push_back(victim);
        }

        if let Some(existing) = inner.map.get(&key) {
            existing.refs.fetch_add(1, Ordering::Relaxed);
            return CacheHandle(existing.clone());
        }

        if inner.map.len() >= self.capacity {
            self.evict(&mut inner);
        }

        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            value,
            refs: AtomicU64::new(1),
            releaser: self.releaser.clone(),
        });
        inner.map.insert(key, entry.clone());
        CacheHandle(entry)
    }

    /// Drop the oldest victim whose pin count is still zero. Queue slots
    /// whose entry was re-pinned or already evicted are discarded; a later
    /// release enqueues them again.
    fn evict(&self, inner: &mut LruInner<K, V>) {
        while let Some(victim) = inner.victims.pop_front() {
            let evictable = inner
                .map
                .get(&victim)
                .map_or(false, |entry| entry.refs.load(Ordering::Acquire) == 0);
            if evictable {
                inner.map.remove(&victim);
                return;
            }
        }
    }

    /// Remove `key` outright, regardless of the victim queue. Used when the
    /// underlying file is deleted.
    pub fn remove(&self, key: &K) {
        self.inner.write().map.remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
