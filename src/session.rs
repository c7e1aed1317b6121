//! Bounded cache of per-session usage accumulators (C6).
//!
//! Sessions are soft state: never persisted, emptied on restart, and
//! evictable at any time. Concurrency uses `DashMap`'s sharded locking
//! (the teacher already leans on `dashmap` for its rate limiter); eviction
//! is a plain oldest-`last_used_at` scan over the map, acceptable at the
//! default capacity of 1024 entries.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub profile: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_count: u64,
    pub last_provider: Option<String>,
    pub last_model: Option<String>,
}

impl Session {
    fn new(id: String, profile: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            profile,
            created_at: now,
            last_used_at: now,
            input_tokens: 0,
            output_tokens: 0,
            request_count: 0,
            last_provider: None,
            last_model: None,
        }
    }
}

pub struct SessionStore {
    capacity: usize,
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, sessions: DashMap::new() }
    }

    /// Look up a session, lazily creating it under `id` (as found in the
    /// URL) if it doesn't already exist. Evicts the oldest entry by
    /// `last_used_at` first if the store is at capacity and `id` is new.
    pub fn touch(&self, id: &str, profile: &str) {
        if self.sessions.contains_key(id) {
            if let Some(mut s) = self.sessions.get_mut(id) {
                s.last_used_at = Utc::now();
            }
            return;
        }
        if self.sessions.len() >= self.capacity {
            self.evict_oldest();
        }
        self.sessions.insert(id.to_string(), Session::new(id.to_string(), profile.to_string()));
    }

    fn evict_oldest(&self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|e| e.value().last_used_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.sessions.remove(&key);
        }
    }

    /// Record a completed request's token usage against its session. Short
    /// critical section: numeric adds only.
    pub fn record_usage(&self, id: &str, input_tokens: u64, output_tokens: u64, provider: &str, model: &str) {
        if let Some(mut s) = self.sessions.get_mut(id) {
            s.input_tokens += input_tokens;
            s.output_tokens += output_tokens;
            s.request_count += 1;
            s.last_used_at = Utc::now();
            s.last_provider = Some(provider.to_string());
            s.last_model = Some(model.to_string());
        }
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn touch_creates_a_session_lazily() {
        let store = SessionStore::new(10);
        assert!(store.get("s1").is_none());
        store.touch("s1", "default");
        assert!(store.get("s1").is_some());
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest() {
        let store = SessionStore::new(2);
        store.touch("s1", "default");
        sleep(Duration::from_millis(2));
        store.touch("s2", "default");
        sleep(Duration::from_millis(2));
        store.touch("s3", "default");
        assert_eq!(store.len(), 2);
        assert!(store.get("s1").is_none(), "oldest session should have been evicted");
        assert!(store.get("s2").is_some());
        assert!(store.get("s3").is_some());
    }

    #[test]
    fn record_usage_accumulates_tokens_and_request_count() {
        let store = SessionStore::new(10);
        store.touch("s1", "default");
        store.record_usage("s1", 10, 20, "p1", "m1");
        store.record_usage("s1", 5, 7, "p1", "m1");
        let session = store.get("s1").unwrap();
        assert_eq!(session.input_tokens, 15);
        assert_eq!(session.output_tokens, 27);
        assert_eq!(session.request_count, 2);
        assert_eq!(session.last_model.as_deref(), Some("m1"));
    }

    #[test]
    fn touching_an_existing_session_refreshes_last_used_without_duplicating() {
        let store = SessionStore::new(10);
        store.touch("s1", "default");
        store.touch("s1", "default");
        assert_eq!(store.len(), 1);
    }
}
