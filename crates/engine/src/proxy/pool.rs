//! Proxy pool
//!
//! Hands out one proxy per work item. All operations take a single lock, so
//! checkout, release and ban are atomic with respect to concurrent workers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{Proxy, ProxyError, ProxyWorkingStatus};
use super::source::ProxySource;
use crate::duration_serde::option_duration_millis;

/// How the next proxy is chosen among eligible ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyRotation {
    /// Cycle through the list in order
    #[default]
    RoundRobin,
    /// Prefer the proxy with the fewest uses
    LeastUsed,
}

/// Proxy pool configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use multirun_engine::proxy::{ProxyPoolConfig, ProxyRotation};
///
/// let config = ProxyPoolConfig::default()
///     .with_rotation(ProxyRotation::LeastUsed)
///     .with_max_uses(50)
///     .with_ban_time(Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyPoolConfig {
    /// Rotation policy
    pub rotation: ProxyRotation,

    /// Allow one proxy to serve several in-flight items at once
    pub allow_shared: bool,

    /// Proxies at or above this many uses are not handed out any more
    pub max_uses: Option<u32>,

    /// Banned proxies become eligible again after this long
    #[serde(with = "option_duration_millis")]
    pub ban_time: Option<Duration>,

    /// Shuffle the list whenever it is (re)loaded
    pub shuffle: bool,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            rotation: ProxyRotation::RoundRobin,
            allow_shared: false,
            max_uses: None,
            ban_time: None,
            shuffle: false,
        }
    }
}

impl ProxyPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rotation(mut self, rotation: ProxyRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_shared(mut self, allow_shared: bool) -> Self {
        self.allow_shared = allow_shared;
        self
    }

    pub fn with_max_uses(mut self, max_uses: u32) -> Self {
        self.max_uses = Some(max_uses);
        self
    }

    pub fn with_ban_time(mut self, ban_time: Duration) -> Self {
        self.ban_time = Some(ban_time);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}

/// A checked-out proxy
///
/// Must be handed back with [`ProxyPool::release`] or
/// [`ProxyPool::release_unchanged`]. Releasing a proxy that a reload dropped
/// is a no-op.
#[derive(Debug, Clone)]
pub struct ProxyLease {
    pub proxy: Proxy,
}

impl ProxyLease {
    pub fn id(&self) -> Uuid {
        self.proxy.id
    }
}

/// Result of a checkout attempt
#[derive(Debug)]
pub enum Checkout {
    /// A proxy was handed out
    Leased(ProxyLease),
    /// Usable proxies exist but are all in flight (or serving a timed ban)
    Busy,
    /// No proxy can be handed out without a reload or unban
    Exhausted,
}

/// Counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPoolStats {
    pub total: usize,
    pub untested: usize,
    pub working: usize,
    pub banned: usize,
    pub offline: usize,
    /// Reached `max_uses`
    pub exhausted: usize,
    /// Currently checked out
    pub in_flight: usize,
}

#[derive(Debug)]
struct Entry {
    proxy: Proxy,
    in_flight: u32,
}

#[derive(Debug, Default)]
struct PoolState {
    entries: Vec<Entry>,
    cursor: usize,
}

enum Eligibility {
    Ready,
    Later,
    Never,
}

/// Pool of proxies shared by the workers of a job
pub struct ProxyPool {
    config: ProxyPoolConfig,
    state: Mutex<PoolState>,
    reload_lock: tokio::sync::Mutex<()>,
    changed: Notify,
}

impl ProxyPool {
    /// Create an empty pool
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::default()),
            reload_lock: tokio::sync::Mutex::new(()),
            changed: Notify::new(),
        }
    }

    /// Create a pool holding `proxies`
    pub fn with_proxies(config: ProxyPoolConfig, proxies: Vec<Proxy>) -> Self {
        let pool = Self::new(config);
        pool.replace(proxies);
        pool
    }

    pub fn config(&self) -> &ProxyPoolConfig {
        &self.config
    }

    /// Hand out the next eligible proxy
    pub fn checkout(&self) -> Checkout {
        let now = Utc::now();
        let mut state = self.state.lock();
        let len = state.entries.len();
        let mut waiting = false;
        let mut chosen: Option<usize> = None;

        for offset in 0..len {
            let idx = (state.cursor + offset) % len;
            match self.eligibility(&state.entries[idx], now) {
                Eligibility::Ready => match self.config.rotation {
                    ProxyRotation::RoundRobin => {
                        chosen = Some(idx);
                        break;
                    }
                    ProxyRotation::LeastUsed => {
                        let better = chosen.map_or(true, |current| {
                            state.entries[idx].proxy.uses < state.entries[current].proxy.uses
                        });
                        if better {
                            chosen = Some(idx);
                        }
                    }
                },
                Eligibility::Later => waiting = true,
                Eligibility::Never => {}
            }
        }

        let Some(idx) = chosen else {
            return if waiting {
                Checkout::Busy
            } else {
                Checkout::Exhausted
            };
        };

        state.cursor = (idx + 1) % len;
        let entry = &mut state.entries[idx];
        if entry.proxy.working_status == ProxyWorkingStatus::Banned {
            // Timed ban expired
            entry.proxy.working_status = ProxyWorkingStatus::Untested;
        }
        entry.proxy.uses += 1;
        entry.in_flight += 1;

        Checkout::Leased(ProxyLease {
            proxy: entry.proxy.clone(),
        })
    }

    /// Return a proxy and record its new working status
    pub fn release(&self, lease: ProxyLease, status: ProxyWorkingStatus) {
        self.give_back(lease, Some(status));
    }

    /// Return a proxy without changing its status
    pub fn release_unchanged(&self, lease: ProxyLease) {
        self.give_back(lease, None);
    }

    /// Ban a proxy that is still checked out
    pub fn mark_banned(&self, lease: &ProxyLease) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.proxy.id == lease.id()) {
            entry.proxy.working_status = ProxyWorkingStatus::Banned;
            entry.proxy.last_banned = Some(Utc::now());
        }
    }

    /// Set a proxy's status directly (e.g. after an explicit check)
    pub fn set_status(&self, id: Uuid, status: ProxyWorkingStatus) -> bool {
        let mut state = self.state.lock();
        match state.entries.iter_mut().find(|e| e.proxy.id == id) {
            Some(entry) => {
                apply_status(&mut entry.proxy, status);
                true
            }
            None => false,
        }
    }

    /// Clear all bans; returns how many proxies were unbanned
    pub fn unban_all(&self) -> usize {
        let mut state = self.state.lock();
        let mut count = 0;
        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.proxy.working_status == ProxyWorkingStatus::Banned)
        {
            entry.proxy.working_status = ProxyWorkingStatus::Untested;
            entry.proxy.last_banned = None;
            count += 1;
        }
        drop(state);
        if count > 0 {
            info!(count, "Unbanned proxies");
            self.changed.notify_waiters();
        }
        count
    }

    /// Replace the whole proxy set
    ///
    /// Duplicates (same type, host and port) are dropped. Usage counters and
    /// statuses start fresh, but a proxy that is still checked out stays
    /// checked out under its old id so its lease remains valid.
    pub fn replace(&self, proxies: Vec<Proxy>) -> usize {
        let mut seen = HashSet::new();
        let mut unique: Vec<Proxy> = proxies
            .into_iter()
            .filter(|p| seen.insert(p.identity()))
            .collect();

        if self.config.shuffle {
            unique.shuffle(&mut rand::thread_rng());
        }

        let count = unique.len();
        let mut state = self.state.lock();
        let mut checked_out: HashMap<_, (Uuid, u32)> = state
            .entries
            .iter()
            .filter(|e| e.in_flight > 0)
            .map(|e| (e.proxy.identity(), (e.proxy.id, e.in_flight)))
            .collect();

        state.cursor = 0;
        state.entries = unique
            .into_iter()
            .map(|mut proxy| {
                let in_flight = match checked_out.remove(&proxy.identity()) {
                    Some((id, in_flight)) => {
                        proxy.id = id;
                        in_flight
                    }
                    None => 0,
                };
                Entry { proxy, in_flight }
            })
            .collect();
        drop(state);
        self.changed.notify_waiters();
        count
    }

    /// Reload from sources; a failing source is logged and skipped
    ///
    /// Concurrent reloads are collapsed: a caller that finds a reload in
    /// progress waits for it and returns without reloading again.
    pub async fn reload(&self, sources: &[Arc<dyn ProxySource>]) -> Result<usize, ProxyError> {
        if sources.is_empty() {
            return Ok(self.len());
        }

        let _guard = match self.reload_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let _wait = self.reload_lock.lock().await;
                return Ok(self.len());
            }
        };

        let mut proxies = Vec::new();
        let mut last_error = None;
        for source in sources {
            match source.fetch().await {
                Ok(mut fetched) => {
                    debug!(source = %source.name(), count = fetched.len(), "Fetched proxies");
                    proxies.append(&mut fetched);
                }
                Err(e) => {
                    warn!(source = %source.name(), error = %e, "Proxy source failed");
                    last_error = Some(e);
                }
            }
        }

        if proxies.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let count = self.replace(proxies);
        info!(count, sources = sources.len(), "Proxy pool reloaded");
        Ok(count)
    }

    /// Notified whenever a proxy is released or the set changes
    ///
    /// Enable the `Notified` future before calling [`ProxyPool::checkout`] so
    /// a release in between is not missed.
    pub fn changed(&self) -> &Notify {
        &self.changed
    }

    /// Number of proxies
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of all proxies
    pub fn snapshot(&self) -> Vec<Proxy> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|e| e.proxy.clone())
            .collect()
    }

    /// Counts by status
    pub fn stats(&self) -> ProxyPoolStats {
        let state = self.state.lock();
        let mut stats = ProxyPoolStats {
            total: state.entries.len(),
            ..Default::default()
        };

        for entry in &state.entries {
            match entry.proxy.working_status {
                ProxyWorkingStatus::Untested => stats.untested += 1,
                ProxyWorkingStatus::Working => stats.working += 1,
                ProxyWorkingStatus::Banned => stats.banned += 1,
                ProxyWorkingStatus::Offline => stats.offline += 1,
            }
            if self.is_used_up(&entry.proxy) {
                stats.exhausted += 1;
            }
            if entry.in_flight > 0 {
                stats.in_flight += 1;
            }
        }
        stats
    }

    fn give_back(&self, lease: ProxyLease, status: Option<ProxyWorkingStatus>) {
        let mut state = self.state.lock();
        match state.entries.iter_mut().find(|e| e.proxy.id == lease.id()) {
            Some(entry) => {
                entry.in_flight = entry.in_flight.saturating_sub(1);
                entry.proxy.last_checked = Some(Utc::now());
                if let Some(status) = status {
                    apply_status(&mut entry.proxy, status);
                }
            }
            None => debug!(proxy = %lease.proxy, "Released a proxy that is no longer in the pool"),
        }
        drop(state);
        self.changed.notify_waiters();
    }

    fn is_used_up(&self, proxy: &Proxy) -> bool {
        self.config
            .max_uses
            .is_some_and(|max| proxy.uses >= max)
    }

    fn eligibility(&self, entry: &Entry, now: chrono::DateTime<Utc>) -> Eligibility {
        let proxy = &entry.proxy;
        if proxy.working_status == ProxyWorkingStatus::Offline || self.is_used_up(proxy) {
            return Eligibility::Never;
        }

        if proxy.working_status == ProxyWorkingStatus::Banned {
            let Some(ban_time) = self.config.ban_time else {
                return Eligibility::Never;
            };
            let expired = proxy.last_banned.map_or(true, |banned_at| {
                chrono::Duration::from_std(ban_time)
                    .map(|ban| banned_at + ban <= now)
                    .unwrap_or(false)
            });
            if !expired {
                return Eligibility::Later;
            }
        }

        if entry.in_flight > 0 && !self.config.allow_shared {
            return Eligibility::Later;
        }

        Eligibility::Ready
    }
}

fn apply_status(proxy: &mut Proxy, status: ProxyWorkingStatus) {
    proxy.working_status = status;
    if status == ProxyWorkingStatus::Banned {
        proxy.last_banned = Some(Utc::now());
    }
}

impl std::fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
