//! Proxies, proxy sources and the proxy pool
//!
//! This module provides:
//! - [`Proxy`] - One proxy with its working status and usage counters
//! - [`ProxySource`] - Where proxies are loaded from (lists, files)
//! - [`ProxyPool`] - Hands out one proxy per work item and records outcomes
//!
//! # Checkout lifecycle
//!
//! ```text
//!   checkout() ──► ProxyLease ──► bot runs ──► release(lease, status)
//!        │                                        │
//!        │ Busy: every usable proxy is in flight  ├─ Working  (eligible again)
//!        │ Exhausted: nothing usable at all       ├─ Banned   (until unban / ban expiry)
//!        ▼                                        └─ Offline
//!   caller waits, reloads or unbans
//! ```

mod model;
mod pool;
mod source;

pub use model::{Proxy, ProxyError, ProxyType, ProxyWorkingStatus};
pub use pool::{Checkout, ProxyLease, ProxyPool, ProxyPoolConfig, ProxyPoolStats, ProxyRotation};
pub use source::{
    parse_proxy_lines, FileProxySource, ListProxySource, ProxySource, ProxySourceSpec,
};
