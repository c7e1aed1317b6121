//! Process-wide shared state, handed to every handler on both listeners.
//!
//! Everything here is either a process singleton with its own internal
//! concurrency control ([`ConfigStore`], [`SessionStore`], [`Recorder`],
//! [`TempProfileStore`]) or cheap to construct per-request ([`PricingTable`],
//! rebuilt from the live config snapshot so it always reflects the latest
//! `pricing_overrides`).

use std::sync::Arc;
use std::time::Instant;

use crate::config::ConfigStore;
use crate::recorder::Recorder;
use crate::router::Router;
use crate::session::SessionStore;
use crate::temp_profile::TempProfileStore;

pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub router: Router,
    pub recorder: Arc<Recorder>,
    pub sessions: Arc<SessionStore>,
    pub temp_profiles: TempProfileStore,
    pub started_at: Instant,
    pub version: &'static str,
    pub proxy_port: u16,
    pub web_port: u16,
}

impl AppState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
