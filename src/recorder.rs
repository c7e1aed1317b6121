//! Health and usage recording (C7): a per-provider sliding window for
//! health, and an append-only usage log, both fed from one non-blocking
//! entry point on the request path.
//!
//! The ring-buffer-plus-`try_lock` shape mirrors the teacher's existing
//! `TrafficLog` — an entry is dropped rather than waited for when the lock
//! is contended, and the buffer itself never grows past its capacity.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

/// Emitted once per completed request (§3).
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub profile: String,
    pub scenario: String,
    pub attempted_providers: Vec<String>,
    pub winning_provider: Option<String>,
    pub status: u16,
    pub latency_ms: u64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub client_dialect: String,
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

struct ProviderWindow {
    entries: VecDeque<(Outcome, u64)>,
    consecutive_failures: u32,
}

impl ProviderWindow {
    fn new() -> Self {
        Self { entries: VecDeque::new(), consecutive_failures: 0 }
    }

    fn push(&mut self, outcome: Outcome, latency_ms: u64, capacity: usize) {
        if self.entries.len() >= capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((outcome, latency_ms));
        match outcome {
            Outcome::Success => self.consecutive_failures = 0,
            Outcome::Failure => self.consecutive_failures += 1,
        }
    }

    fn snapshot(&self, provider: &str) -> HealthSnapshot {
        let total = self.entries.len();
        let successes = self.entries.iter().filter(|(o, _)| *o == Outcome::Success).count();
        let success_rate = if total == 0 { 1.0 } else { successes as f64 / total as f64 };
        let mut latencies: Vec<u64> = self.entries.iter().map(|(_, l)| *l).collect();
        latencies.sort_unstable();
        let pct = |p: f64| -> u64 {
            if latencies.is_empty() {
                0
            } else {
                let idx = ((latencies.len() - 1) as f64 * p).round() as usize;
                latencies[idx]
            }
        };
        let degraded = total > 0 && success_rate < 0.70;
        let unhealthy = (total > 0 && success_rate < 0.30) || self.consecutive_failures >= 5;
        HealthSnapshot {
            provider: provider.to_string(),
            total_attempts: total,
            success_rate,
            p50_latency_ms: pct(0.50),
            p95_latency_ms: pct(0.95),
            consecutive_failures: self.consecutive_failures,
            degraded,
            unhealthy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub provider: String,
    pub total_attempts: usize,
    pub success_rate: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub consecutive_failures: u32,
    pub degraded: bool,
    pub unhealthy: bool,
}

pub struct Recorder {
    capacity: usize,
    queue: Mutex<VecDeque<RequestRecord>>,
    notify: Notify,
    dropped: AtomicU64,
    windows: DashMap<String, Mutex<ProviderWindow>>,
    window_k: usize,
    usage_log_path: RwLock<Option<PathBuf>>,
}

impl Recorder {
    pub fn new(capacity: usize, window_k: usize, usage_log_path: Option<PathBuf>) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            windows: DashMap::new(),
            window_k,
            usage_log_path: RwLock::new(usage_log_path),
        }
    }

    /// Non-blocking from the request path: either enqueues immediately, or
    /// (lock contended, or queue already at capacity) drops the oldest
    /// record and bumps the drop counter. Never waits.
    pub fn record(&self, record: RequestRecord) {
        let mut queue = match self.queue.try_lock() {
            Ok(g) => g,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(record);
        drop(queue);
        self.notify.notify_one();
    }

    /// Called once per provider attempt, independent of whether the overall
    /// request eventually succeeds (§4.4 "each attempt updates C7").
    pub fn observe_attempt(&self, provider: &str, outcome: Outcome, latency_ms: u64) {
        let entry = self.windows.entry(provider.to_string()).or_insert_with(|| Mutex::new(ProviderWindow::new()));
        if let Ok(mut w) = entry.lock() {
            w.push(outcome, latency_ms, self.window_k);
        }
    }

    pub fn health_snapshot(&self, provider: &str) -> Option<HealthSnapshot> {
        self.windows.get(provider).and_then(|w| w.lock().ok().map(|g| g.snapshot(provider)))
    }

    pub fn all_health_snapshots(&self) -> Vec<HealthSnapshot> {
        self.windows
            .iter()
            .filter_map(|entry| entry.value().lock().ok().map(|g| g.snapshot(entry.key())))
            .collect()
    }

    /// P50 latency for a provider, used by the `least-latency` strategy.
    /// Unseen providers sort last (treated as having no data, i.e. worst).
    pub fn p50_latency_ms(&self, provider: &str) -> Option<u64> {
        self.health_snapshot(provider).map(|s| s.p50_latency_ms)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drains every currently-queued record and appends it to the usage log
    /// as one line of JSON each. Runs in a dedicated background task so the
    /// request path is never blocked on file I/O.
    pub async fn run(&self) {
        loop {
            self.notify.notified().await;
            self.drain_to_log().await;
        }
    }

    async fn drain_to_log(&self) {
        let drained: Vec<RequestRecord> = {
            let mut queue = self.queue.lock().expect("recorder queue mutex poisoned");
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        let path = self.usage_log_path.read().expect("usage log path lock poisoned").clone();
        let Some(path) = path else { return };
        match tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(mut file) => {
                let mut buf = String::new();
                for record in &drained {
                    if let Ok(line) = serde_json::to_string(record) {
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
                if let Err(e) = file.write_all(buf.as_bytes()).await {
                    tracing::warn!(path = %path.display(), error = %e, "usage log write failed");
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "usage log open failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> RequestRecord {
        RequestRecord {
            timestamp: Utc::now(),
            session_id: "abc123".into(),
            profile: "default".into(),
            scenario: "default".into(),
            attempted_providers: vec!["p1".into()],
            winning_provider: Some("p1".into()),
            status: 200,
            latency_ms: 50,
            input_tokens: 10,
            output_tokens: 20,
            cost: 0.0,
            client_dialect: "anthropic".into(),
            error_kind: None,
        }
    }

    #[test]
    fn ring_buffer_drops_oldest_over_capacity() {
        let rec = Recorder::new(2, 200, None);
        rec.record(sample_record());
        rec.record(sample_record());
        rec.record(sample_record());
        assert_eq!(rec.dropped_count(), 1);
        assert_eq!(rec.queue.lock().unwrap().len(), 2);
    }

    #[test]
    fn health_window_computes_success_rate_and_flags() {
        let rec = Recorder::new(10, 200, None);
        for _ in 0..7 {
            rec.observe_attempt("p1", Outcome::Success, 100);
        }
        for _ in 0..3 {
            rec.observe_attempt("p1", Outcome::Failure, 500);
        }
        let snap = rec.health_snapshot("p1").unwrap();
        assert!((snap.success_rate - 0.70).abs() < 1e-9);
        assert!(!snap.degraded, "70% is the boundary, not below it");
        assert!(!snap.unhealthy);
    }

    #[test]
    fn unhealthy_on_five_consecutive_failures() {
        let rec = Recorder::new(10, 200, None);
        for _ in 0..5 {
            rec.observe_attempt("p1", Outcome::Failure, 10);
        }
        let snap = rec.health_snapshot("p1").unwrap();
        assert!(snap.unhealthy);
    }

    #[test]
    fn window_respects_capacity_k() {
        let rec = Recorder::new(10, 3, None);
        for _ in 0..10 {
            rec.observe_attempt("p1", Outcome::Success, 1);
        }
        let snap = rec.health_snapshot("p1").unwrap();
        assert_eq!(snap.total_attempts, 3);
    }
}
