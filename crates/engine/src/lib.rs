//! # Multirun Engine
//!
//! A bounded-concurrency engine for running large batches of independent bot
//! checks, one per line of input data, optionally through rotating proxies.
//!
//! ## Features
//!
//! - **Live-resizable concurrency**: the number of workers can change while a run is in progress;
//!   shrinking drains in-flight work instead of killing it
//! - **Pause without losing position**: paused runs stop acquiring slots, the input cursor stays put
//! - **Soft stop and hard abort**: stop drains the in-flight items, abort cancels them cooperatively
//! - **Proxy rotation**: exclusive checkout, max uses, ban bookkeeping with optional expiry
//! - **Ban-loop evasion**: lines that keep getting banned are given up after a bounded budget
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        MultiRunJob                           │
//! │  (status state machine, counters, hit outputs, start wait)  │
//! └─────────────────────────────────────────────────────────────┘
//!          │ lines                    │ (line, proxy)
//!          ▼                          ▼
//! ┌──────────────────┐   ┌───────────────────────────────────────┐
//! │     DataPool     │   │             WorkExecutor               │
//! │ (list/file/range)│──►│  (slot gate, events, pause/stop/abort) │
//! └──────────────────┘   └───────────────────────────────────────┘
//!                                     │
//!                                     ▼
//!                    ┌───────────────────────────────┐
//!                    │  BotRunner  +  ProxyPool      │
//!                    │  (one check, proxy lease)     │
//!                    └───────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use multirun_engine::prelude::*;
//!
//! let options = MultiRunJobOptions::new()
//!     .with_bots(20)
//!     .with_data_pool(DataPoolSpec::File { path: "combos.txt".into() })
//!     .with_proxy_source(ProxySourceSpec::File { path: "proxies.txt".into(), default_type: ProxyType::Http });
//!
//! let job = MultiRunJob::builder(options, Arc::new(MyBot)).build()?;
//! job.start().await?;
//! job.wait_idle(Duration::from_secs(3600)).await?;
//! println!("{:?}", job.snapshot().stats);
//! ```

pub mod bot;
pub mod data;
pub mod duration_serde;
pub mod executor;
pub mod hits;
pub mod job;
pub mod proxy;

/// Prelude for common imports
pub mod prelude {
    pub use crate::bot::{BotContext, BotError, BotOutcome, BotResult, BotRunner};
    pub use crate::data::{DataPool, DataPoolError, DataPoolSpec};
    pub use crate::executor::{
        Completion, ExecutorConfig, ExecutorError, ExecutorEvent, ExecutorInput, ExecutorStatus,
        WorkExecutor,
    };
    pub use crate::hits::{Hit, HitKind, HitOutput, HitOutputError, HitOutputSpec};
    pub use crate::job::{
        JobError, JobId, JobManager, JobProxyMode, JobSnapshot, JobStatus, MultiRunJob,
        MultiRunJobBuilder, MultiRunJobOptions, NoValidProxyBehaviour, StartCondition,
    };
    pub use crate::proxy::{
        Proxy, ProxyError, ProxyPool, ProxyPoolConfig, ProxySource, ProxySourceSpec, ProxyType,
        ProxyWorkingStatus,
    };
}

// Re-export key types at crate root
pub use bot::{BotContext, BotError, BotOutcome, BotResult, BotRunner};
pub use executor::{
    Completion, ExecutorConfig, ExecutorError, ExecutorEvent, ExecutorInput, ExecutorStatus,
    WorkExecutor,
};
pub use job::{JobError, JobId, JobManager, JobSnapshot, JobStatus, MultiRunJob, MultiRunJobOptions};
pub use proxy::{Proxy, ProxyPool, ProxyType};
