//! Ad-hoc profiles registered through the management API (part of C8).
//!
//! Mirrors [`crate::session::SessionStore`]'s shape — a `DashMap` with a
//! plain oldest-`last_used_at` eviction scan — but keyed by a generated id
//! and holding a whole [`Profile`] rather than usage counters. Entries live
//! until daemon exit or LRU eviction; nothing here is persisted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::Profile;

struct Entry {
    profile: Profile,
    last_used_at: DateTime<Utc>,
}

pub struct TempProfileStore {
    capacity: usize,
    profiles: DashMap<String, Entry>,
}

impl TempProfileStore {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, profiles: DashMap::new() }
    }

    /// Register a new ad-hoc profile naming `providers` (by config provider
    /// name), evicting the oldest entry first if already at capacity.
    /// Returns the generated id.
    pub fn insert(&self, providers: Vec<String>) -> String {
        if self.profiles.len() >= self.capacity {
            self.evict_oldest();
        }
        let id = Uuid::new_v4().to_string();
        let profile = Profile {
            name: id.clone(),
            providers,
            routing: Default::default(),
            long_context_threshold: 32_000,
            strategy: Default::default(),
        };
        self.profiles.insert(id.clone(), Entry { profile, last_used_at: Utc::now() });
        id
    }

    fn evict_oldest(&self) {
        let oldest = self
            .profiles
            .iter()
            .min_by_key(|e| e.value().last_used_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.profiles.remove(&key);
        }
    }

    /// Look up a temp profile by id, refreshing its `last_used_at` so it
    /// isn't the next eviction candidate just for being looked up rarely.
    pub fn get(&self, id: &str) -> Option<Profile> {
        let mut entry = self.profiles.get_mut(id)?;
        entry.last_used_at = Utc::now();
        Some(entry.profile.clone())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips_the_provider_list() {
        let store = TempProfileStore::new(10);
        let id = store.insert(vec!["p1".into(), "p2".into()]);
        let profile = store.get(&id).unwrap();
        assert_eq!(profile.providers, vec!["p1", "p2"]);
        assert_eq!(profile.name, id);
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest() {
        let store = TempProfileStore::new(2);
        let id1 = store.insert(vec!["p1".into()]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.insert(vec!["p2".into()]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.insert(vec!["p3".into()]);
        assert_eq!(store.len(), 2);
        assert!(store.get(&id1).is_none(), "oldest temp profile should have been evicted");
    }

    #[test]
    fn unknown_id_returns_none() {
        let store = TempProfileStore::new(10);
        assert!(store.get("ghost").is_none());
    }
}
