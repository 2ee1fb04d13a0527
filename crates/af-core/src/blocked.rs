//! Per-tab blocked request records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Hits for a single blocked URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedUrlInfo {
    pub blocked_count: u64,
}

/// A tracker organization, identified by its domain, and every URL blocked under it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTrackerInfo {
    pub blocked_count: u64,
    pub blocked_urls: BTreeMap<String, BlockedUrlInfo>,
}

/// Everything one rule group blocked in one tab since the last committed navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabBlockedUrlInfo {
    pub total_count: u64,
    pub blocked_urls: BTreeMap<String, BlockedUrlInfo>,
    pub blocked_trackers: BTreeMap<String, BlockedTrackerInfo>,
}

impl TabBlockedUrlInfo {
    /// Count a block that did not belong to a known tracker.
    pub fn record_url(&mut self, url: &str) {
        self.total_count += 1;
        self.blocked_urls.entry(url.to_owned()).or_default().blocked_count += 1;
    }

    /// Count a block attributed to the tracker registered under `domain`.
    /// The URL is recorded under the tracker only.
    pub fn record_tracker(&mut self, domain: &str, url: &str) {
        self.total_count += 1;
        let tracker = self.blocked_trackers.entry(domain.to_owned()).or_default();
        tracker.blocked_count += 1;
        tracker.blocked_urls.entry(url.to_owned()).or_default().blocked_count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}
