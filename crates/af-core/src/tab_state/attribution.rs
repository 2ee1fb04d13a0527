//! Ad-click attribution window
//!
//! Tracks one "ad click -> landing domain -> query trigger" tuple per tab and
//! decides whether a tracker request belongs to it.

use std::time::Instant;

/// Attribution window of a tab. Empty `trigger` means no window is open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdAttribution {
    pub ad_click_time: Option<Instant>,
    /// Host of the page the ad was clicked on.
    pub ad_click_domain: String,
    pub trigger: String,
    /// Registrable domain the click is expected to land on.
    pub landing_domain: String,
    pub on_landing_site: bool,
    pub last_attributed_navigation: Option<Instant>,
}

impl AdAttribution {
    /// A click was recorded and a trigger matched on the way to the landing page.
    pub fn is_active(&self) -> bool {
        !self.trigger.is_empty()
    }

    /// Ready to exempt tracker requests.
    pub fn is_on_landing_site(&self) -> bool {
        self.on_landing_site && !self.landing_domain.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Check a `"domain|trigger"` string against the current window.
    ///
    /// # Panics
    ///
    /// When the window is live and the input has no `|`. The string is always
    /// produced by the rule matcher, so a missing separator is a wiring bug.
    pub fn matches(&self, domain_and_trigger: &str) -> bool {
        if !self.is_on_landing_site() {
            return false;
        }

        let Some((match_domain, trigger)) = domain_and_trigger.split_once('|') else {
            panic!("ad attribution input '{domain_and_trigger}' is missing the '|' separator");
        };

        if trigger != self.trigger {
            return false;
        }

        is_same_or_subdomain(&self.ad_click_domain, match_domain)
    }
}

/// True if `host` equals `domain` or is a subdomain of it, ignoring one
/// trailing dot on either side.
pub fn is_same_or_subdomain(host: &str, domain: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    let domain = domain.strip_suffix('.').unwrap_or(domain);

    let (host, domain) = (host.as_bytes(), domain.as_bytes());
    if host.len() < domain.len() {
        return false;
    }

    let boundary = host.len() - domain.len();
    if !host[boundary..].eq_ignore_ascii_case(domain) {
        return false;
    }
    boundary == 0 || host[boundary - 1] == b'.'
}
