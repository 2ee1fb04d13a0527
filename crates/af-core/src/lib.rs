//! AdFilter Core Library
//!
//! Per-tab bookkeeping for an ad and tracker blocking request filter: what each
//! rule group blocked in a tab, which tracker requests belong to an ad click
//! the user made, and what to show when a whole document is blocked.
//!
//! # Architecture
//!
//! Everything runs on one host sequence. A [`TabRegistry`] owns one
//! [`TabFilterState`] per tab and receives block reports and navigation
//! events from the host. Data gathered during a main-frame navigation is
//! buffered and becomes visible only when that navigation commits. Observer
//! notifications are batched to at most one flush per interval. Time is read
//! through the [`Clock`](clock::Clock) in the [`FilterContext`], and timers are
//! drained by the host calling [`TabRegistry::run_due_timers`].
//!
//! # Modules
//!
//! - `types`: Rule groups, identifiers, transition and scheme bit sets
//! - `url`: Fast URL slicing without allocations
//! - `psl`: Registrable-domain computation over the Public Suffix List
//! - `clock`, `timer`: Injected time and host-driven one-shot timers
//! - `buffered`: Pending/committed two-slot values
//! - `blocked`: Per-tab blocked URL and tracker records
//! - `tab_state`: Per-tab filter state and ad attribution
//! - `registry`: Cross-tab registry, aggregate counters, notification batching
//! - `interstitial`: Blocked-document throttle and interstitial page
//! - `config`: Timing configuration

pub mod blocked;
pub mod buffered;
pub mod clock;
pub mod config;
pub mod context;
pub mod interstitial;
pub mod navigation;
pub mod psl;
pub mod registry;
pub mod tab_state;
pub mod timer;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use blocked::{BlockedTrackerInfo, BlockedUrlInfo, TabBlockedUrlInfo};
pub use config::{ConfigError, FilterConfig};
pub use context::FilterContext;
pub use interstitial::{
    DocumentBlockedInterstitial, DocumentBlockedThrottle, InterstitialCommand, InterstitialController,
    RuleService, ThrottleDecision,
};
pub use navigation::{NavigationHandle, NavigationRecord};
pub use psl::{DomainRegistry, PrivateRegistries, PslError};
pub use registry::{BlockedCounters, FilterEvent, ObserverId, TabHandle, TabRegistry, TabResolver};
pub use tab_state::{AdAttribution, TabFilterState};
pub use types::{FrameId, NavigationId, NetError, RuleGroup, TabId};
