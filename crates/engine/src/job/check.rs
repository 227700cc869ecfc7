//! The work function of a multi-run job: one line, retried with fresh
//! proxies until it reaches a final outcome

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::options::NoValidProxyBehaviour;
use super::JobId;
use crate::bot::{BotContext, BotOutcome, BotRunner};
use crate::executor::WorkError;
use crate::proxy::{Checkout, ProxyLease, ProxyPool, ProxySource, ProxyWorkingStatus};

/// One input line and its position in the data pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DataLine {
    pub index: u64,
    pub line: String,
}

/// Final result of checking one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CheckOutput {
    /// Never `Ban` or `Retry`
    pub outcome: BotOutcome,
    pub captured: BTreeMap<String, String>,
    /// Proxy of the final attempt
    pub proxy: Option<String>,
    pub bans: u32,
    pub retries: u32,
    /// Given up by ban-loop evasion
    pub evaded: bool,
    /// Why the line ended as `Error`
    pub reason: Option<String>,
}

/// A bot fault that ended the check of a line
///
/// Carries the bans and retries that happened before the fault so the job
/// can still count them.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub(crate) struct CheckFailure {
    pub message: String,
    pub bans: u32,
    pub retries: u32,
}

/// Signals a check that observed the abort; the executor drops such items
#[derive(Debug, thiserror::Error)]
#[error("check cancelled")]
pub(crate) struct CheckCancelled;

enum Acquired {
    Direct,
    Leased(ProxyLease),
    Skip,
}

/// Everything a worker needs to check lines for one run
pub(crate) struct Checker {
    pub job_id: JobId,
    pub bot: Arc<dyn BotRunner>,
    /// `None` when the run does not use proxies
    pub proxies: Option<Arc<ProxyPool>>,
    pub sources: Vec<Arc<dyn ProxySource>>,
    pub behaviour: NoValidProxyBehaviour,
    pub wait_interval: Duration,
    /// `0` removes the limit
    pub ban_loop_evasion: u32,
    pub retry_errors: bool,
    pub waiting: Arc<AtomicUsize>,
}

impl Checker {
    fn evasion_exceeded(&self, attempts: u32) -> bool {
        self.ban_loop_evasion > 0 && attempts > self.ban_loop_evasion
    }

    pub async fn check(
        self: Arc<Self>,
        item: DataLine,
        cancel: CancellationToken,
    ) -> Result<CheckOutput, WorkError> {
        let mut bans = 0u32;
        let mut retries = 0u32;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(CheckCancelled.into());
            }
            attempt += 1;

            let lease = match self.acquire_proxy(&cancel).await? {
                Acquired::Direct => None,
                Acquired::Leased(lease) => Some(lease),
                Acquired::Skip => {
                    return Ok(CheckOutput {
                        outcome: BotOutcome::Error,
                        captured: BTreeMap::new(),
                        proxy: None,
                        bans,
                        retries,
                        evaded: false,
                        reason: Some("no valid proxy available".to_string()),
                    });
                }
            };

            let ctx = BotContext::new(self.job_id, attempt, cancel.clone()).with_line_index(item.index);
            let proxy = lease.as_ref().map(|lease| &lease.proxy);
            let result = self.bot.run(&item.line, proxy, &ctx).await;
            let proxy_name = proxy.map(ToString::to_string);

            let result = match result {
                Ok(result) => result,
                Err(_) if cancel.is_cancelled() => {
                    self.give_back(lease, None);
                    return Err(CheckCancelled.into());
                }
                Err(e) => {
                    self.give_back(lease, None);
                    if self.retry_errors && !self.evasion_exceeded(bans + retries + 1) {
                        retries += 1;
                        debug!(index = item.index, attempt, error = %e, "Retrying line after bot error");
                        continue;
                    }
                    return Err(CheckFailure {
                        message: e.to_string(),
                        bans,
                        retries,
                    }
                    .into());
                }
            };

            match result.outcome {
                BotOutcome::Ban | BotOutcome::Retry | BotOutcome::Error
                    if cancel.is_cancelled() =>
                {
                    self.give_back(lease, None);
                    return Err(CheckCancelled.into());
                }
                BotOutcome::Ban => {
                    bans += 1;
                    self.give_back(lease, Some(ProxyWorkingStatus::Banned));
                }
                BotOutcome::Retry => {
                    retries += 1;
                    self.give_back(lease, None);
                }
                BotOutcome::Error if self.retry_errors => {
                    retries += 1;
                    self.give_back(lease, None);
                }
                BotOutcome::Error => {
                    self.give_back(lease, None);
                    return Ok(CheckOutput {
                        outcome: BotOutcome::Error,
                        captured: result.captured,
                        proxy: proxy_name,
                        bans,
                        retries,
                        evaded: false,
                        reason: None,
                    });
                }
                BotOutcome::Success | BotOutcome::Fail | BotOutcome::Custom(_) => {
                    self.give_back(lease, Some(ProxyWorkingStatus::Working));
                    return Ok(CheckOutput {
                        outcome: result.outcome,
                        captured: result.captured,
                        proxy: proxy_name,
                        bans,
                        retries,
                        evaded: false,
                        reason: None,
                    });
                }
            }

            if self.evasion_exceeded(bans + retries) {
                debug!(index = item.index, bans, retries, "Ban-loop evasion gave up on line");
                return Ok(CheckOutput {
                    outcome: BotOutcome::Fail,
                    captured: result.captured,
                    proxy: proxy_name,
                    bans,
                    retries,
                    evaded: true,
                    reason: None,
                });
            }
        }
    }

    fn give_back(&self, lease: Option<ProxyLease>, status: Option<ProxyWorkingStatus>) {
        let (Some(pool), Some(lease)) = (&self.proxies, lease) else {
            return;
        };
        match status {
            Some(status) => pool.release(lease, status),
            None => pool.release_unchanged(lease),
        }
    }

    async fn acquire_proxy(&self, cancel: &CancellationToken) -> Result<Acquired, WorkError> {
        let Some(pool) = &self.proxies else {
            return Ok(Acquired::Direct);
        };

        let mut waiting: Option<WaitingGuard> = None;
        let mut recovered = false;

        loop {
            let changed = pool.changed().notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match pool.checkout() {
                Checkout::Leased(lease) => return Ok(Acquired::Leased(lease)),
                Checkout::Busy => {}
                Checkout::Exhausted if recovered => {}
                Checkout::Exhausted => match self.behaviour {
                    NoValidProxyBehaviour::Wait => {}
                    NoValidProxyBehaviour::SkipLine => return Ok(Acquired::Skip),
                    NoValidProxyBehaviour::Unban => {
                        pool.unban_all();
                        recovered = true;
                        continue;
                    }
                    NoValidProxyBehaviour::Reload => {
                        if let Err(e) = pool.reload(&self.sources).await {
                            warn!(job_id = %self.job_id, error = %e, "Proxy reload failed");
                        }
                        recovered = true;
                        continue;
                    }
                },
            }

            if waiting.is_none() {
                waiting = Some(WaitingGuard::new(Arc::clone(&self.waiting)));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(CheckCancelled.into()),
                _ = &mut changed => {}
                _ = tokio::time::sleep(self.wait_interval) => recovered = false,
            }
        }
    }
}

/// Counts a worker as waiting for proxies while alive
struct WaitingGuard(Arc<AtomicUsize>);

impl WaitingGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
