//! Job counters and snapshots

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::status::JobStatus;
use super::JobId;
use crate::duration_serde::option_duration_millis;
use crate::executor::Completion;
use crate::proxy::ProxyPoolStats;

/// Per-line counters of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataStats {
    /// Lines that reached a final outcome
    pub tested: u64,
    pub hits: u64,
    pub custom: u64,
    pub fails: u64,
    /// Ban outcomes, including ones that were retried
    pub bans: u64,
    /// Retry outcomes, including ones that were retried again
    pub retries: u64,
    pub errors: u64,
    /// Lines given up by ban-loop evasion (also counted as fails)
    pub evaded: u64,
}

const CPM_WINDOW_SECS: u64 = 60;

/// Checks per minute over a sliding one-minute window
#[derive(Debug)]
pub struct CpmTracker {
    origin: Instant,
    // (second since origin, checks in that second)
    buckets: VecDeque<(u64, u64)>,
}

impl Default for CpmTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CpmTracker {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            buckets: VecDeque::with_capacity(CPM_WINDOW_SECS as usize + 1),
        }
    }

    pub fn record(&mut self, now: Instant) {
        let second = self.second(now);
        match self.buckets.back_mut() {
            Some((last, count)) if *last == second => *count += 1,
            _ => self.buckets.push_back((second, 1)),
        }

        while let Some(&(first, _)) = self.buckets.front() {
            if first + CPM_WINDOW_SECS <= second {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// Checks recorded during the minute before `now`
    pub fn cpm(&self, now: Instant) -> u64 {
        let second = self.second(now);
        self.buckets
            .iter()
            .filter(|(at, _)| at + CPM_WINDOW_SECS > second)
            .map(|(_, count)| count)
            .sum()
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
    }

    fn second(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_secs()
    }
}

/// Consistent point-in-time view of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    /// Configured concurrency
    pub bots: usize,
    /// Checks currently in flight
    pub active_bots: usize,
    pub stats: DataStats,
    /// Lines in the data pool, if known
    pub total: Option<u64>,
    pub skip: u64,
    /// Lines left to check in the current run, if the total is known
    pub to_check: Option<u64>,
    /// Fraction of the data pool consumed, if the total is known
    pub progress: Option<f64>,
    pub cpm: u64,
    #[serde(with = "option_duration_millis")]
    pub elapsed: Option<Duration>,
    #[serde(with = "option_duration_millis")]
    pub eta: Option<Duration>,
    pub proxies: Option<ProxyPoolStats>,
    /// Workers stalled because no proxy could be handed out
    pub waiting_for_proxies: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_completion: Option<Completion>,
}

impl JobSnapshot {
    /// Compact one-line summary for logs and consoles
    pub fn summary_line(&self) -> String {
        let progress = self
            .progress
            .map(|p| format!("{:.1}%", p * 100.0))
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!(
            "[{}] {} | bots {}/{} | tested {} | hits {} | custom {} | fails {} | bans {} | retries {} | errors {} | cpm {}",
            self.status,
            progress,
            self.active_bots,
            self.bots,
            self.stats.tested,
            self.stats.hits,
            self.stats.custom,
            self.stats.fails,
            self.stats.bans,
            self.stats.retries,
            self.stats.errors,
            self.cpm,
        );
        if let Some(eta) = self.eta {
            line.push_str(&format!(" | eta {}s", eta.as_secs()));
        }
        if self.waiting_for_proxies > 0 {
            line.push_str(&format!(" | waiting for proxies: {}", self.waiting_for_proxies));
        }
        line
    }
}

/// Time left at the current rate
pub(crate) fn estimate_eta(remaining: Option<u64>, cpm: u64) -> Option<Duration> {
    match remaining {
        Some(remaining) if cpm > 0 => Some(Duration::from_secs_f64(
            remaining as f64 / cpm as f64 * 60.0,
        )),
        _ => None,
    }
}
