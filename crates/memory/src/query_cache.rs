use crate::types::ScoredId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Закэшированный результат поиска
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub results: Arc<Vec<ScoredId>>,
    /// Fingerprint снапшота индекса, по которому считался результат
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedResult,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Запись валидна строго до `created_at + ttl`
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.created_at + self.ttl
    }

    pub fn expires_at(&self) -> Instant {
        self.created_at + self.ttl
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Debug, Default)]
struct LruTracker {
    entries: HashMap<String, Slot>,
    /// tick -> key, от самого старого к самому свежему
    access_order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl LruTracker {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        if let Some(slot) = self.entries.get_mut(key) {
            self.access_order.remove(&slot.tick);
            slot.tick = tick;
            self.access_order.insert(tick, key.to_string());
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.access_order.remove(&slot.tick);
        Some(slot)
    }

    fn pop_lru(&mut self) -> Option<String> {
        let (_, key) = self.access_order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// In-process кэш запросов с TTL и LRU вытеснением.
///
/// Вся синхронизация внутренняя, `get`/`put` можно звать из любого числа задач.
pub struct QueryCache {
    tracker: Mutex<LruTracker>,
    capacity: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            tracker: Mutex::new(LruTracker::default()),
            capacity: capacity.max(1),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Чтение обновляет LRU-позицию, но не продлевает TTL
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut tracker = self.tracker.lock();

        let valid = match tracker.entries.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(slot) => slot.entry.is_valid_at(now),
        };

        if !valid {
            tracker.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Query cache entry expired");
            return None;
        }

        tracker.touch(key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        tracker.entries.get(key).map(|slot| slot.entry.clone())
    }

    pub fn put(&self, key: &str, value: CachedResult, ttl: Duration) {
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            ttl,
        };

        let mut tracker = self.tracker.lock();
        tracker.remove(key);

        while tracker.entries.len() >= self.capacity {
            match tracker.pop_lru() {
                Some(evicted) => {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %evicted, "Query cache eviction (LRU)");
                }
                None => break,
            }
        }

        let tick = tracker.next_tick;
        tracker.next_tick += 1;
        tracker.access_order.insert(tick, key.to_string());
        tracker.entries.insert(key.to_string(), Slot { entry, tick });
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// `put` с TTL по умолчанию
    pub fn insert(&self, key: &str, value: CachedResult) {
        self.put(key, value, self.default_ttl);
    }

    /// Сбросить всё (перестройка корпуса)
    pub fn invalidate_all(&self) -> usize {
        let mut tracker = self.tracker.lock();
        let removed = tracker.entries.len();
        tracker.entries.clear();
        tracker.access_order.clear();
        info!(removed, "🧹 Query cache invalidated");
        removed
    }

    /// Удалить просроченные записи; правило то же, что и в `get`
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut tracker = self.tracker.lock();
        let expired: Vec<String> = tracker
            .entries
            .iter()
            .filter(|(_, slot)| !slot.entry.is_valid_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            tracker.remove(key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        if !expired.is_empty() {
            debug!(removed = expired.len(), "Query cache sweep");
        }
        expired.len()
    }

    /// Фоновая чистка; задача завершается вместе с последним `Arc` на кэш
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Первый тик срабатывает сразу
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                    }
                    None => break,
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.tracker.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
