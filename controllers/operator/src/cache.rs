//! Fixed-capacity cache with per-entry expiry.
//!
//! Entries expire `ttl` after insertion. When the cache is full the oldest
//! entry is evicted, so a key may be forgotten early but never remembered
//! past its expiry. Time comes from `tokio::time`, which lets tests drive
//! expiry with a paused clock.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct ExpiringCache<K> {
    entries: HashMap<K, Instant>,
    // insertion order, may hold stale pairs for keys inserted again
    order: VecDeque<(K, Instant)>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Hash + Eq + Clone> ExpiringCache<K> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// True if `key` was inserted less than `ttl` ago and not evicted since
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    /// Insert `key` with a fresh expiry, evicting the oldest entry if full
    pub fn insert(&mut self, key: K) {
        let now = Instant::now();
        self.purge_expired(now);
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.capacity {
                if !self.evict_oldest() {
                    break;
                }
            }
        }
        let expires_at = now + self.ttl;
        self.entries.insert(key.clone(), expires_at);
        self.order.push_back((key, expires_at));
    }

    /// Insert `key` unless it is present, returns whether it was inserted
    pub fn insert_if_absent(&mut self, key: K) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.insert(key);
        true
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.values().filter(|e| **e > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&mut self, now: Instant) {
        while let Some((_, expires_at)) = self.order.front() {
            if *expires_at > now {
                break;
            }
            if let Some((key, expires_at)) = self.order.pop_front() {
                self.remove_if_current(&key, expires_at);
            }
        }
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((key, expires_at)) = self.order.pop_front() {
            if self.remove_if_current(&key, expires_at) {
                return true;
            }
        }
        false
    }

    // Removes `key` only if `expires_at` belongs to its latest insertion
    fn remove_if_current(&mut self, key: &K, expires_at: Instant) -> bool {
        if self.entries.get(key) == Some(&expires_at) {
            self.entries.remove(key);
            true
        } else {
            false
        }
    }
}
