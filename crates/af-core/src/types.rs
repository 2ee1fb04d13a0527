//! Core type definitions for the request filter
//!
//! Identifiers handed to us by the browsing-context model, the two rule
//! groups, and the small bit sets used to describe URLs and navigations.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Rule Groups
// =============================================================================

/// Number of rule groups. Per-group state is always a fixed array of this size.
pub const RULE_GROUP_COUNT: usize = 2;

/// The two independent filtering categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum RuleGroup {
    /// Tracking-protection rules
    TrackingRules = 0,
    /// Ad-blocking rules
    AdBlockingRules = 1,
}

impl RuleGroup {
    /// All groups, in index order. Tracking comes first and wins ties.
    pub const ALL: [RuleGroup; RULE_GROUP_COUNT] =
        [RuleGroup::TrackingRules, RuleGroup::AdBlockingRules];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short name used on the command line and in rendered pages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::TrackingRules => "tracking",
            Self::AdBlockingRules => "ad-blocking",
        }
    }
}

impl TryFrom<u8> for RuleGroup {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::TrackingRules),
            1 => Ok(Self::AdBlockingRules),
            _ => Err(()),
        }
    }
}

impl FromStr for RuleGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tracking" | "tracking-rules" => Ok(Self::TrackingRules),
            "ad-blocking" | "ad-blocking-rules" | "adblocking" => Ok(Self::AdBlockingRules),
            other => Err(format!("unknown rule group '{other}'")),
        }
    }
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size per-group storage, indexed by [`RuleGroup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleGroupArray<T>([T; RULE_GROUP_COUNT]);

impl<T> RuleGroupArray<T> {
    pub fn new(tracking: T, ad_blocking: T) -> Self {
        Self([tracking, ad_blocking])
    }

    /// Iterate `(group, value)` pairs in group order.
    pub fn iter(&self) -> impl Iterator<Item = (RuleGroup, &T)> {
        RuleGroup::ALL.into_iter().zip(self.0.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (RuleGroup, &mut T)> {
        RuleGroup::ALL.into_iter().zip(self.0.iter_mut())
    }
}

impl<T> Index<RuleGroup> for RuleGroupArray<T> {
    type Output = T;

    #[inline]
    fn index(&self, group: RuleGroup) -> &T {
        &self.0[group.index()]
    }
}

impl<T> IndexMut<RuleGroup> for RuleGroupArray<T> {
    #[inline]
    fn index_mut(&mut self, group: RuleGroup) -> &mut T {
        &mut self.0[group.index()]
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Stable identity of a browser tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

/// Stable identity of a frame, unique across tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub u64);

/// Opaque per-navigation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NavigationId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

impl fmt::Display for NavigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nav#{}", self.0)
    }
}

// =============================================================================
// Scheme Masks
// =============================================================================

bitflags::bitflags! {
    /// URL scheme mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SchemeMask: u8 {
        const HTTP = 1 << 0;
        const HTTPS = 1 << 1;
        const WS = 1 << 2;
        const WSS = 1 << 3;
        const DATA = 1 << 4;
        const FTP = 1 << 5;
        /// Schemes eligible for ad attribution
        const HTTP_OR_HTTPS = Self::HTTP.bits() | Self::HTTPS.bits();
    }
}

// =============================================================================
// Page Transitions
// =============================================================================

/// Core transition type of a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionType {
    #[default]
    Link,
    Typed,
    AutoBookmark,
    AutoSubframe,
    ManualSubframe,
    Generated,
    FormSubmit,
    Reload,
}

bitflags::bitflags! {
    /// Qualifiers attached to a transition type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransitionQualifiers: u32 {
        const FORWARD_BACK = 0x0100_0000;
        const FROM_ADDRESS_BAR = 0x0200_0000;
        const HOME_PAGE = 0x0400_0000;
        const FROM_API = 0x0800_0000;
        const CHAIN_START = 0x1000_0000;
        const CHAIN_END = 0x2000_0000;
        /// Redirect caused by JavaScript or a meta refresh tag
        const CLIENT_REDIRECT = 0x4000_0000;
        /// Redirect caused by a server-side 3xx response
        const SERVER_REDIRECT = 0x8000_0000;
    }
}

/// How a navigation came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTransition {
    pub core: TransitionType,
    pub qualifiers: TransitionQualifiers,
}

impl PageTransition {
    pub const fn new(core: TransitionType, qualifiers: TransitionQualifiers) -> Self {
        Self { core, qualifiers }
    }

    pub const fn link() -> Self {
        Self::new(TransitionType::Link, TransitionQualifiers::empty())
    }

    #[inline]
    pub fn is_client_redirect(&self) -> bool {
        self.qualifiers.contains(TransitionQualifiers::CLIENT_REDIRECT)
    }
}

// =============================================================================
// Network Errors
// =============================================================================

/// The subset of network error codes the filter cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetError {
    #[default]
    Ok,
    Failed,
    Aborted,
    /// The request was blocked by a client-side filter
    BlockedByClient,
    Other(i32),
}

impl NetError {
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Failed => -2,
            Self::Aborted => -3,
            Self::BlockedByClient => -20,
            Self::Other(code) => code,
        }
    }

    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            -2 => Self::Failed,
            -3 => Self::Aborted,
            -20 => Self::BlockedByClient,
            other => Self::Other(other),
        }
    }
}

// =============================================================================
// Exception Lists
// =============================================================================

/// Which per-domain exception list a rule group is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExceptionList {
    /// Rules apply everywhere except the listed domains
    ExemptList,
    /// Rules apply only on the listed domains
    ProcessList,
}
