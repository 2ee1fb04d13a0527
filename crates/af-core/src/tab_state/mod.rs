//! Per-tab filter state
//!
//! One [`TabFilterState`] exists per tab. It records what each rule group
//! blocked, which frames had their document blocked, and the tab's ad-click
//! attribution window.
//!
//! # Navigation buffering
//!
//! While a main-frame, cross-document navigation is in flight, block records,
//! the attribution-enabled flag and the allowed attribution trackers are
//! written to pending buffers. They replace the visible values only when the
//! navigation commits. With no navigation in flight, writes land in the
//! committed values directly.
//!
//! # Outbox
//!
//! The state never calls out. Side effects that concern the owner (arming the
//! expiration timer, attribution changes) are queued as [`TabEvent`]s and
//! drained with [`TabFilterState::take_events`].

mod attribution;

pub use attribution::{is_same_or_subdomain, AdAttribution};

use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use log::{debug, trace};

use crate::blocked::TabBlockedUrlInfo;
use crate::buffered::Buffered;
use crate::context::FilterContext;
use crate::navigation::NavigationHandle;
use crate::psl::PrivateRegistries;
use crate::timer::{OneShotTimer, TimerTicket};
use crate::types::{FrameId, NavigationId, RuleGroup, RuleGroupArray, TabId};
use crate::url::{extract_host, extract_query, is_http_or_https};

/// Side effects a tab state asks its owner to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabEvent {
    /// The attribution expiration timer was (re)armed.
    ExpirationArmed(TimerTicket),
    /// An attribution window opened or closed.
    AttributionChanged,
}

/// Filter bookkeeping for one tab.
pub struct TabFilterState {
    tab_id: TabId,
    context: FilterContext,

    ongoing_navigations: HashSet<NavigationId>,
    blocked_urls: RuleGroupArray<Buffered<TabBlockedUrlInfo>>,
    blocked_frames: RuleGroupArray<HashSet<FrameId>>,

    ad_attribution_enabled: Buffered<bool>,
    allowed_attribution_trackers: Buffered<BTreeSet<String>>,
    ad_query_triggers: Vec<String>,
    attribution: AdAttribution,
    expiration_timer: OneShotTimer,

    events: Vec<TabEvent>,
}

impl TabFilterState {
    pub fn new(tab_id: TabId, context: FilterContext) -> Self {
        Self {
            tab_id,
            context,
            ongoing_navigations: HashSet::new(),
            blocked_urls: RuleGroupArray::default(),
            blocked_frames: RuleGroupArray::default(),
            ad_attribution_enabled: Buffered::default(),
            allowed_attribution_trackers: Buffered::default(),
            ad_query_triggers: Vec::new(),
            attribution: AdAttribution::default(),
            expiration_timer: OneShotTimer::new(),
            events: Vec::new(),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Drain queued side effects.
    pub fn take_events(&mut self) -> Vec<TabEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_navigation_in_flight(&self) -> bool {
        !self.ongoing_navigations.is_empty()
    }

    // =========================================================================
    // Blocked URLs
    // =========================================================================

    pub fn on_url_blocked(&mut self, group: RuleGroup, url: &str) {
        trace!("{}: {group} blocked {url}", self.tab_id);
        self.blocked_urls[group].current_mut().record_url(url);
    }

    pub fn on_tracker_blocked(&mut self, group: RuleGroup, domain: &str, url: &str) {
        trace!("{}: {group} blocked {url} (tracker {domain})", self.tab_id);
        self.blocked_urls[group].current_mut().record_tracker(domain, url);
    }

    /// Committed block records for a group.
    pub fn blocked_urls_info(&self, group: RuleGroup) -> &TabBlockedUrlInfo {
        self.blocked_urls[group].committed()
    }

    // =========================================================================
    // Frame block state
    // =========================================================================

    pub fn set_frame_block_state(&mut self, group: RuleGroup, frame: FrameId) {
        self.blocked_frames[group].insert(frame);
    }

    pub fn reset_frame_block_state(&mut self, group: RuleGroup, frame: FrameId) {
        self.blocked_frames[group].remove(&frame);
    }

    pub fn was_frame_blocked(&self, group: RuleGroup, frame: FrameId) -> bool {
        self.blocked_frames[group].contains(&frame)
    }

    pub fn frame_deleted(&mut self, frame: FrameId) {
        for (_, frames) in self.blocked_frames.iter_mut() {
            frames.remove(&frame);
        }
    }

    // =========================================================================
    // Ad attribution
    // =========================================================================

    /// Whether the committed page allows ad attribution.
    pub fn ad_attribution_enabled(&self) -> bool {
        *self.ad_attribution_enabled.committed()
    }

    pub fn set_ad_attribution_state(&mut self, enabled: bool) {
        *self.ad_attribution_enabled.current_mut() = enabled;
    }

    /// Record a click on an ad link leading to `ad_url`, with the query
    /// substrings that identify the landing page.
    ///
    /// Ignored unless the current page enables attribution and the click's
    /// navigation is in flight.
    pub fn set_ad_query_triggers(&mut self, ad_url: &str, triggers: Vec<String>) {
        if !self.ad_attribution_enabled() || !self.is_navigation_in_flight() {
            return;
        }

        self.reset_ad_attribution();

        self.attribution.ad_click_time = Some(self.now());
        self.attribution.ad_click_domain = extract_host(ad_url).unwrap_or_default().to_ascii_lowercase();

        self.ad_query_triggers.clear();
        for trigger in triggers {
            if !trigger.is_empty() && !self.ad_query_triggers.contains(&trigger) {
                self.ad_query_triggers.push(trigger);
            }
        }
        debug!(
            "{}: ad click on {} with {} trigger(s)",
            self.tab_id,
            self.attribution.ad_click_domain,
            self.ad_query_triggers.len()
        );
    }

    /// Check whether the tracker request `tracker_url`, flagged by a rule as
    /// `"domain|trigger"`, belongs to the open attribution window. Matching
    /// requests are remembered as allowed.
    pub fn does_ad_attribution_match(&mut self, tracker_url: &str, domain_and_trigger: &str) -> bool {
        if !self.attribution.matches(domain_and_trigger) {
            return false;
        }

        self.allowed_attribution_trackers
            .current_mut()
            .insert(tracker_url.to_owned());
        debug!("{}: allowed attribution tracker {tracker_url}", self.tab_id);
        true
    }

    pub fn allowed_attribution_trackers(&self) -> &BTreeSet<String> {
        self.allowed_attribution_trackers.committed()
    }

    pub fn is_attribution_tracker_allowed(&self, url: &str) -> bool {
        self.allowed_attribution_trackers.committed().contains(url)
    }

    pub fn attribution(&self) -> &AdAttribution {
        &self.attribution
    }

    pub fn ad_query_triggers(&self) -> &[String] {
        &self.ad_query_triggers
    }

    pub fn has_active_attribution(&self) -> bool {
        self.attribution.is_active()
    }

    pub fn current_ad_trigger(&self) -> &str {
        &self.attribution.trigger
    }

    pub fn current_ad_landing_domain(&self) -> &str {
        &self.attribution.landing_domain
    }

    pub fn is_on_ad_landing_site(&self) -> bool {
        self.attribution.on_landing_site
    }

    /// Deadline of the running expiration timer.
    pub fn attribution_expires_at(&self) -> Option<Instant> {
        self.expiration_timer.deadline()
    }

    /// Called by the owner when an expiration ticket comes due.
    pub fn on_expiration_timer(&mut self, ticket: TimerTicket) {
        if self.expiration_timer.fire(ticket) {
            debug!("{}: ad attribution expired", self.tab_id);
            self.reset_ad_attribution();
        }
    }

    /// Close the attribution window. Owners hear about it only if one was open.
    pub fn reset_ad_attribution(&mut self) {
        let had_window = self.attribution.is_active() || !self.attribution.landing_domain.is_empty();
        self.attribution.reset();
        self.expiration_timer.stop();
        if had_window {
            self.events.push(TabEvent::AttributionChanged);
        }
    }

    /// The attribution window to carry over to a tab opened on `url` from this
    /// one, if `url` is on the landing domain.
    pub fn attribution_for_opened_url(&self, url: &str) -> Option<AdAttribution> {
        if self.attribution.landing_domain.is_empty() {
            return None;
        }
        let domain = self
            .context
            .domains
            .registrable_domain_for_url(url, PrivateRegistries::Exclude);
        (domain == self.attribution.landing_domain).then(|| self.attribution.clone())
    }

    /// Take over an attribution window from the tab that opened this one.
    pub fn adopt_attribution(&mut self, source: AdAttribution) {
        let now = self.now();
        self.attribution = AdAttribution {
            on_landing_site: true,
            last_attributed_navigation: Some(now),
            ..source
        };
        debug!(
            "{}: inherited ad attribution for {}",
            self.tab_id, self.attribution.landing_domain
        );
        self.arm_expiration_timer();
        self.events.push(TabEvent::AttributionChanged);
    }

    // =========================================================================
    // Navigation lifecycle
    // =========================================================================

    pub fn did_start_navigation(&mut self, navigation: &dyn NavigationHandle) {
        if !navigation.is_in_main_frame() || navigation.is_same_document() {
            return;
        }

        self.ongoing_navigations.insert(navigation.navigation_id());

        if navigation.page_transition().is_client_redirect() {
            self.ensure_buffering();
            self.do_query_trigger_check(navigation.url());
            return;
        }

        debug!("{}: {} started", self.tab_id, navigation.navigation_id());
        for (_, blocked) in self.blocked_urls.iter_mut() {
            blocked.begin();
        }
        self.ad_attribution_enabled.begin();
        self.allowed_attribution_trackers.begin();
        self.ad_query_triggers.clear();
    }

    pub fn did_redirect_navigation(&mut self, navigation: &dyn NavigationHandle) {
        if !navigation.is_in_main_frame() || navigation.is_same_document() {
            return;
        }
        self.do_query_trigger_check(navigation.url());
    }

    pub fn did_finish_navigation(&mut self, navigation: &dyn NavigationHandle) {
        if !navigation.is_in_main_frame() || navigation.is_same_document() {
            return;
        }

        self.ongoing_navigations.remove(&navigation.navigation_id());

        if !navigation.has_committed() {
            debug!("{}: {} did not commit", self.tab_id, navigation.navigation_id());
            if !self.is_navigation_in_flight() {
                self.discard_buffers();
            }
            return;
        }

        if !self.ad_query_triggers.is_empty() {
            self.do_query_trigger_check(navigation.url());
        }

        if !self.attribution.landing_domain.is_empty() {
            self.update_landing_site(navigation.url());
        }

        debug!("{}: {} committed {}", self.tab_id, navigation.navigation_id(), navigation.url());
        self.commit_buffers();
        if self.is_navigation_in_flight() {
            self.ensure_buffering();
        }
    }

    fn update_landing_site(&mut self, committed_url: &str) {
        let now = self.now();
        let domain = self
            .context
            .domains
            .registrable_domain_for_url(committed_url, PrivateRegistries::Exclude);

        if domain == self.attribution.landing_domain {
            self.attribution.on_landing_site = true;
            self.attribution.last_attributed_navigation = Some(now);
            return;
        }

        let grace = self.context.config.off_site_grace();
        let within_grace = self
            .attribution
            .last_attributed_navigation
            .is_some_and(|last| last.checked_add(grace).map_or(true, |end| end > now));

        if within_grace {
            self.attribution.on_landing_site = false;
            self.attribution.last_attributed_navigation = Some(now);
        } else {
            debug!("{}: left ad landing site {}", self.tab_id, self.attribution.landing_domain);
            self.reset_ad_attribution();
        }
    }

    /// Open an attribution window if `url` carries one of the pending query triggers.
    fn do_query_trigger_check(&mut self, url: &str) {
        if self.attribution.is_active() || self.ad_query_triggers.is_empty() {
            return;
        }
        if !is_http_or_https(url) {
            return;
        }
        let Some(host) = extract_host(url) else {
            return;
        };
        let Some(query) = extract_query(url) else {
            return;
        };

        // Leading '&' lets a trigger such as "&gclid=" match the first parameter.
        let query = format!("&{query}");
        let Some(trigger) = self
            .ad_query_triggers
            .iter()
            .find(|trigger| query.contains(trigger.as_str()))
            .cloned()
        else {
            return;
        };

        let landing_domain = self
            .context
            .domains
            .registrable_domain(host, PrivateRegistries::Exclude);
        if landing_domain.is_empty() {
            return;
        }

        debug!("{}: ad attribution trigger '{trigger}' for {landing_domain}", self.tab_id);
        self.attribution.landing_domain = landing_domain;
        self.attribution.trigger = trigger;
        self.attribution.last_attributed_navigation = Some(self.now());
        self.arm_expiration_timer();
        self.events.push(TabEvent::AttributionChanged);
    }

    fn arm_expiration_timer(&mut self) {
        let click_time = self.attribution.ad_click_time.unwrap_or_else(|| self.now());
        let Some(deadline) = click_time.checked_add(self.context.config.ad_attribution_expiration()) else {
            // Past the clock's range: the window never expires.
            self.expiration_timer.stop();
            return;
        };
        let ticket = self.expiration_timer.start(deadline);
        self.events.push(TabEvent::ExpirationArmed(ticket));
    }

    fn ensure_buffering(&mut self) {
        for (_, blocked) in self.blocked_urls.iter_mut() {
            blocked.ensure_buffering();
        }
        self.ad_attribution_enabled.ensure_buffering();
        self.allowed_attribution_trackers.ensure_buffering();
    }

    fn commit_buffers(&mut self) {
        for (_, blocked) in self.blocked_urls.iter_mut() {
            blocked.commit();
        }
        self.ad_attribution_enabled.commit();
        self.allowed_attribution_trackers.commit();
    }

    fn discard_buffers(&mut self) {
        for (_, blocked) in self.blocked_urls.iter_mut() {
            blocked.discard();
        }
        self.ad_attribution_enabled.discard();
        self.allowed_attribution_trackers.discard();
    }

    fn now(&self) -> Instant {
        self.context.clock.now()
    }
}
