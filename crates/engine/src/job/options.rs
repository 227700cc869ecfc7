//! Durable job options

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::DataPoolSpec;
use crate::duration_serde::{duration_millis, option_duration_millis};
use crate::hits::HitOutputSpec;
use crate::proxy::{ProxyPoolConfig, ProxySourceSpec};

/// When a started job actually begins checking
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartCondition {
    #[default]
    Immediate,
    /// At an absolute time
    At { time: DateTime<Utc> },
    /// After a delay counted from `start`
    After {
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
    /// When [`MultiRunJob::trigger`](super::MultiRunJob::trigger) is called
    Trigger,
}

/// Whether checks go through proxies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobProxyMode {
    /// Follow the `use_proxies` setting
    #[default]
    Default,
    On,
    Off,
}

impl JobProxyMode {
    pub fn uses_proxies(self, use_proxies: bool) -> bool {
        match self {
            Self::Default => use_proxies,
            Self::On => true,
            Self::Off => false,
        }
    }
}

/// What a worker does when proxies are required but none can be handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoValidProxyBehaviour {
    /// Stall until a proxy becomes available
    #[default]
    Wait,
    /// Reload the proxy sources, then wait
    Reload,
    /// Unban every proxy, then wait
    Unban,
    /// Give up on the line and count it as an error
    SkipLine,
}

/// The persisted configuration of a multi-run job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiRunJobOptions {
    /// Display name
    pub name: String,

    /// Number of concurrent bots
    pub bots: usize,

    /// Lines already consumed; advanced when a run is stopped or aborted
    pub skip: u64,

    /// Lines past `skip` that an interrupted run already checked
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub completed_ahead: Vec<u64>,

    pub start_condition: StartCondition,

    pub proxy_mode: JobProxyMode,

    /// Proxy use when `proxy_mode` is `Default`
    pub use_proxies: bool,

    pub proxy_sources: Vec<ProxySourceSpec>,

    /// Rotation, sharing, max uses and ban expiry
    pub proxy_pool: ProxyPoolConfig,

    pub no_valid_proxy_behaviour: NoValidProxyBehaviour,

    /// Poll interval while waiting for a proxy
    #[serde(with = "duration_millis")]
    pub proxy_wait_interval: Duration,

    /// Reload proxy sources on this interval while running
    #[serde(with = "option_duration_millis")]
    pub periodic_proxy_reload: Option<Duration>,

    /// Bans plus retries allowed per line before it is given up as a fail.
    /// `0` removes the limit.
    pub ban_loop_evasion: u32,

    /// Retry lines whose check ended in an error
    pub retry_errors: bool,

    /// Send custom outcomes to the hit outputs
    pub store_custom_hits: bool,

    pub data_pool: DataPoolSpec,

    pub hit_outputs: Vec<HitOutputSpec>,
}

impl Default for MultiRunJobOptions {
    fn default() -> Self {
        Self {
            name: "multi-run".to_string(),
            bots: 1,
            skip: 0,
            completed_ahead: Vec::new(),
            start_condition: StartCondition::Immediate,
            proxy_mode: JobProxyMode::Default,
            use_proxies: false,
            proxy_sources: Vec::new(),
            proxy_pool: ProxyPoolConfig::default(),
            no_valid_proxy_behaviour: NoValidProxyBehaviour::Wait,
            proxy_wait_interval: Duration::from_secs(1),
            periodic_proxy_reload: None,
            ban_loop_evasion: 100,
            retry_errors: false,
            store_custom_hits: true,
            data_pool: DataPoolSpec::default(),
            hit_outputs: Vec::new(),
        }
    }
}

impl MultiRunJobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_bots(mut self, bots: usize) -> Self {
        self.bots = bots;
        self
    }

    /// Resume from `skip`, forgetting lines recorded past the old position
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self.completed_ahead.clear();
        self
    }

    pub fn with_start_condition(mut self, condition: StartCondition) -> Self {
        self.start_condition = condition;
        self
    }

    pub fn with_proxy_mode(mut self, mode: JobProxyMode) -> Self {
        self.proxy_mode = mode;
        self
    }

    pub fn with_use_proxies(mut self, use_proxies: bool) -> Self {
        self.use_proxies = use_proxies;
        self
    }

    /// Add a proxy source; also turns on `use_proxies`
    pub fn with_proxy_source(mut self, source: ProxySourceSpec) -> Self {
        self.proxy_sources.push(source);
        self.use_proxies = true;
        self
    }

    pub fn with_proxy_pool(mut self, config: ProxyPoolConfig) -> Self {
        self.proxy_pool = config;
        self
    }

    pub fn with_no_valid_proxy_behaviour(mut self, behaviour: NoValidProxyBehaviour) -> Self {
        self.no_valid_proxy_behaviour = behaviour;
        self
    }

    pub fn with_proxy_wait_interval(mut self, interval: Duration) -> Self {
        self.proxy_wait_interval = interval;
        self
    }

    pub fn with_periodic_proxy_reload(mut self, interval: Duration) -> Self {
        self.periodic_proxy_reload = Some(interval);
        self
    }

    pub fn with_ban_loop_evasion(mut self, limit: u32) -> Self {
        self.ban_loop_evasion = limit;
        self
    }

    pub fn with_retry_errors(mut self, retry_errors: bool) -> Self {
        self.retry_errors = retry_errors;
        self
    }

    pub fn with_store_custom_hits(mut self, store: bool) -> Self {
        self.store_custom_hits = store;
        self
    }

    pub fn with_data_pool(mut self, data_pool: DataPoolSpec) -> Self {
        self.data_pool = data_pool;
        self
    }

    pub fn with_hit_output(mut self, output: HitOutputSpec) -> Self {
        self.hit_outputs.push(output);
        self
    }

    /// Whether checks of this job go through proxies
    pub fn uses_proxies(&self) -> bool {
        self.proxy_mode.uses_proxies(self.use_proxies)
    }

    /// Lines a new run will not check: everything below `skip` plus the
    /// lines recorded past it
    pub fn consumed(&self) -> u64 {
        let ahead = self.completed_ahead.iter().filter(|&&index| index >= self.skip).count();
        self.skip + ahead as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyRotation, ProxyType};

    #[test]
    fn test_defaults_fill_missing_fields() {
        let options: MultiRunJobOptions =
            serde_json::from_str(r#"{"bots": 25, "proxy_mode": "on"}"#).unwrap();

        assert_eq!(options.bots, 25);
        assert_eq!(options.proxy_mode, JobProxyMode::On);
        assert_eq!(options.ban_loop_evasion, 100);
        assert_eq!(options.proxy_wait_interval, Duration::from_secs(1));
        assert!(options.uses_proxies());
    }

    #[test]
    fn test_round_trip_with_nested_specs() {
        let options = MultiRunJobOptions::new()
            .with_name("combo check")
            .with_start_condition(StartCondition::After {
                delay: Duration::from_secs(30),
            })
            .with_proxy_source(ProxySourceSpec::File {
                path: "proxies.txt".into(),
                default_type: ProxyType::Socks5,
            })
            .with_proxy_pool(ProxyPoolConfig::new().with_rotation(ProxyRotation::LeastUsed))
            .with_data_pool(DataPoolSpec::Range {
                start: 0,
                amount: 1000,
                step: 1,
                pad: true,
            })
            .with_hit_output(HitOutputSpec::Log);

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["start_condition"], serde_json::json!({"type": "after", "delay": 30000}));

        let parsed: MultiRunJobOptions = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn test_consumed_counts_lines_past_skip() {
        let mut options = MultiRunJobOptions::new().with_skip(10);
        assert_eq!(options.consumed(), 10);

        options.completed_ahead = vec![4, 12, 15];
        assert_eq!(options.consumed(), 12);

        let options = options.with_skip(20);
        assert!(options.completed_ahead.is_empty());
        assert_eq!(options.consumed(), 20);
    }

    #[test]
    fn test_proxy_mode() {
        assert!(JobProxyMode::On.uses_proxies(false));
        assert!(!JobProxyMode::Off.uses_proxies(true));
        assert!(JobProxyMode::Default.uses_proxies(true));
    }
}
