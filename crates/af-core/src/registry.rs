//! Tab Registry
//!
//! Per-profile owner of every [`TabFilterState`], keyed by tab. Block reports
//! from the network layer arrive here with a frame; the registry resolves the
//! frame's tab, routes the report to that tab's state, keeps cross-tab
//! aggregate counters and batches observer notifications so that observers
//! hear from it at most once per notification interval.
//!
//! The registry is driven by a single-threaded host loop. Timers are armed on
//! an internal queue; the host calls [`TabRegistry::run_due_timers`] whenever
//! [`TabRegistry::next_timer_deadline`] has passed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::FilterContext;
use crate::navigation::NavigationHandle;
use crate::psl::walk_host_suffixes;
use crate::tab_state::{TabEvent, TabFilterState};
use crate::timer::{OneShotTimer, TimerQueue, TimerTicket};
use crate::types::{FrameId, RuleGroup, RuleGroupArray, TabId};
use crate::url::extract_host;

// =============================================================================
// Collaborators
// =============================================================================

/// The tab a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabHandle {
    pub tab_id: TabId,
    /// Tab belongs to an off-the-record profile.
    pub off_the_record: bool,
}

/// Resolves frames to tabs. Frames outside any tab (prerendered, detached,
/// extension backgrounds) resolve to `None`.
pub trait TabResolver {
    fn tab_for_frame(&self, frame: FrameId) -> Option<TabHandle>;
}

/// Identifier of a rule source contributing tracker metadata.
pub type RuleSourceId = u32;

// =============================================================================
// Observer Events
// =============================================================================

/// Notification delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FilterEvent {
    /// Tabs that recorded new blocks for `group` since the last flush.
    NewBlockedUrlsReported { group: RuleGroup, tabs: BTreeSet<TabId> },
    /// Tabs that allowed a new attribution tracker since the last flush.
    NewAttributionTrackerAllowed { tabs: BTreeSet<TabId> },
    /// The tab's attribution window opened or closed.
    AllowAttributionChanged { tab: TabId },
}

/// Handle returned by [`TabRegistry::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct Subscriber {
    id: ObserverId,
    callback: Box<dyn FnMut(&FilterEvent)>,
}

// =============================================================================
// Aggregate Counters
// =============================================================================

/// Serializable snapshot of the aggregate counters, for persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedCounters {
    /// Blocks per tracker domain or request host.
    pub blocked_domains: BTreeMap<RuleGroup, BTreeMap<String, u64>>,
    /// Blocks per host of the page that made the request.
    pub blocked_for_origin: BTreeMap<RuleGroup, BTreeMap<String, u64>>,
    /// Unix seconds at which counting started.
    pub reporting_start: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerTarget {
    Notifications,
    AttributionExpiration(TabId),
}

// =============================================================================
// Registry
// =============================================================================

/// Cross-tab filter state for one browsing profile.
pub struct TabRegistry {
    context: FilterContext,
    resolver: Rc<dyn TabResolver>,

    tabs: HashMap<TabId, TabFilterState>,
    tracker_infos: RuleGroupArray<HashMap<String, BTreeMap<RuleSourceId, Value>>>,

    blocked_domains: RuleGroupArray<BTreeMap<String, u64>>,
    blocked_for_origin: RuleGroupArray<BTreeMap<String, u64>>,
    reporting_start: SystemTime,

    tabs_with_new_blocks: RuleGroupArray<BTreeSet<TabId>>,
    tabs_with_new_attribution_trackers: BTreeSet<TabId>,
    last_notification: Instant,
    notification_timer: OneShotTimer,
    timers: TimerQueue<TimerTarget>,

    observers: Vec<Subscriber>,
    next_observer_id: u64,
    schedule_save: Option<Box<dyn FnMut()>>,
}

impl TabRegistry {
    pub fn new(context: FilterContext, resolver: Rc<dyn TabResolver>) -> Self {
        let now = context.clock.now();
        let reporting_start = context.clock.wall_time();
        Self {
            context,
            resolver,
            tabs: HashMap::new(),
            tracker_infos: RuleGroupArray::default(),
            blocked_domains: RuleGroupArray::default(),
            blocked_for_origin: RuleGroupArray::default(),
            reporting_start,
            tabs_with_new_blocks: RuleGroupArray::default(),
            tabs_with_new_attribution_trackers: BTreeSet::new(),
            last_notification: now,
            notification_timer: OneShotTimer::new(),
            timers: TimerQueue::new(),
            observers: Vec::new(),
            next_observer_id: 0,
            schedule_save: None,
        }
    }

    pub fn context(&self) -> &FilterContext {
        &self.context
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Subscribe to notifications. Callbacks run synchronously, in
    /// registration order, and must not call back into the registry.
    pub fn add_observer(&mut self, callback: impl FnMut(&FilterEvent) + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push(Subscriber {
            id,
            callback: Box::new(callback),
        });
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) {
        self.observers.retain(|subscriber| subscriber.id != id);
    }

    /// Called on every notification flush so the host can persist counters.
    pub fn set_save_callback(&mut self, callback: impl FnMut() + 'static) {
        self.schedule_save = Some(Box::new(callback));
    }

    fn notify(&mut self, event: &FilterEvent) {
        for subscriber in self.observers.iter_mut() {
            (subscriber.callback)(event);
        }
    }

    // =========================================================================
    // Tabs
    // =========================================================================

    /// State of a tab, if one was ever created for it.
    pub fn tab_state(&self, tab: TabId) -> Option<&TabFilterState> {
        self.tabs.get(&tab)
    }

    /// State of the tab owning `frame`.
    pub fn tab_state_for_frame(&self, frame: FrameId) -> Option<&TabFilterState> {
        let handle = self.resolver.tab_for_frame(frame)?;
        self.tabs.get(&handle.tab_id)
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    /// Tear down a closed tab. Aggregate counters keep its history.
    pub fn on_tab_removed(&mut self, tab: TabId) {
        if self.tabs.remove(&tab).is_some() {
            debug!("{tab}: removed");
        }
        for (_, tabs) in self.tabs_with_new_blocks.iter_mut() {
            tabs.remove(&tab);
        }
        self.tabs_with_new_attribution_trackers.remove(&tab);
        self.timers
            .remove_where(|target| *target == TimerTarget::AttributionExpiration(tab));
    }

    /// Run `f` on the tab's state, creating it on first use, then act on the
    /// events it queued.
    fn with_tab<R>(&mut self, tab: TabId, f: impl FnOnce(&mut TabFilterState) -> R) -> R {
        let context = &self.context;
        let state = self
            .tabs
            .entry(tab)
            .or_insert_with(|| TabFilterState::new(tab, context.clone()));
        let result = f(state);
        let events = state.take_events();
        self.handle_tab_events(tab, events);
        result
    }

    fn handle_tab_events(&mut self, tab: TabId, events: Vec<TabEvent>) {
        for event in events {
            match event {
                TabEvent::ExpirationArmed(ticket) => {
                    self.timers.schedule(TimerTarget::AttributionExpiration(tab), ticket);
                }
                TabEvent::AttributionChanged => {
                    self.notify(&FilterEvent::AllowAttributionChanged { tab });
                }
            }
        }
    }

    fn resolve(&self, frame: FrameId) -> Option<TabHandle> {
        let handle = self.resolver.tab_for_frame(frame);
        if handle.is_none() {
            trace!("{frame}: not attached to a tab");
        }
        handle
    }

    // =========================================================================
    // Block reports
    // =========================================================================

    /// A request to `url`, made by a page on `origin` in `frame`, was blocked by `group`.
    pub fn on_url_blocked(&mut self, group: RuleGroup, origin: &str, url: &str, frame: FrameId) {
        let Some(handle) = self.resolve(frame) else {
            warn!("dropping {group} block of {url}: {frame} has no tab");
            return;
        };
        let tab = handle.tab_id;

        let host = extract_host(url).unwrap_or_default().to_ascii_lowercase();
        let tracker = self.find_tracker_domain(group, &host);

        match tracker.as_deref() {
            Some(domain) => self.with_tab(tab, |state| state.on_tracker_blocked(group, domain, url)),
            None => self.with_tab(tab, |state| state.on_url_blocked(group, url)),
        }

        if !handle.off_the_record {
            let domain = tracker.unwrap_or(host);
            *self.blocked_domains[group].entry(domain).or_default() += 1;

            let origin_host = extract_host(origin).unwrap_or(origin).to_ascii_lowercase();
            *self.blocked_for_origin[group].entry(origin_host).or_default() += 1;
        }

        self.tabs_with_new_blocks[group].insert(tab);
        self.prepare_new_notifications();
    }

    /// The registered tracker domain covering `host`, walking up one label at a time.
    fn find_tracker_domain(&self, group: RuleGroup, host: &str) -> Option<String> {
        let infos = &self.tracker_infos[group];
        if infos.is_empty() {
            return None;
        }
        walk_host_suffixes(host)
            .find(|suffix| infos.contains_key(*suffix))
            .map(str::to_owned)
    }

    /// Replace everything `source` contributed to the tracker table of `group`.
    pub fn on_tracker_infos_updated(
        &mut self,
        group: RuleGroup,
        source: RuleSourceId,
        new_tracker_infos: HashMap<String, Value>,
    ) {
        let table = &mut self.tracker_infos[group];
        table.retain(|_, sources| {
            sources.remove(&source);
            !sources.is_empty()
        });

        let added = new_tracker_infos.len();
        for (domain, info) in new_tracker_infos {
            table
                .entry(domain.to_ascii_lowercase())
                .or_default()
                .insert(source, info);
        }
        debug!("{group}: source {source} now provides {added} tracker(s), {} total", table.len());
    }

    /// Metadata each source holds about a tracker domain.
    pub fn tracker_info(&self, group: RuleGroup, domain: &str) -> Option<&BTreeMap<RuleSourceId, Value>> {
        self.tracker_infos[group].get(domain)
    }

    // =========================================================================
    // Frame block state
    // =========================================================================

    pub fn set_frame_block_state(&mut self, group: RuleGroup, frame: FrameId) {
        if let Some(handle) = self.resolve(frame) {
            self.with_tab(handle.tab_id, |state| state.set_frame_block_state(group, frame));
        }
    }

    pub fn reset_frame_block_state(&mut self, group: RuleGroup, frame: FrameId) {
        if let Some(handle) = self.resolve(frame) {
            if let Some(state) = self.tabs.get_mut(&handle.tab_id) {
                state.reset_frame_block_state(group, frame);
            }
        }
    }

    pub fn was_frame_blocked(&self, group: RuleGroup, frame: FrameId) -> bool {
        self.tab_state_for_frame(frame)
            .is_some_and(|state| state.was_frame_blocked(group, frame))
    }

    pub fn frame_deleted(&mut self, frame: FrameId) {
        if let Some(handle) = self.resolve(frame) {
            if let Some(state) = self.tabs.get_mut(&handle.tab_id) {
                state.frame_deleted(frame);
            }
        }
    }

    // =========================================================================
    // Ad attribution
    // =========================================================================

    pub fn set_ad_attribution_state(&mut self, frame: FrameId, enabled: bool) {
        if let Some(handle) = self.resolve(frame) {
            self.with_tab(handle.tab_id, |state| state.set_ad_attribution_state(enabled));
        }
    }

    pub fn set_ad_query_triggers(&mut self, frame: FrameId, ad_url: &str, triggers: Vec<String>) {
        if let Some(handle) = self.resolve(frame) {
            self.with_tab(handle.tab_id, |state| state.set_ad_query_triggers(ad_url, triggers));
        }
    }

    /// See [`TabFilterState::does_ad_attribution_match`].
    pub fn does_ad_attribution_match(
        &mut self,
        frame: FrameId,
        tracker_url: &str,
        domain_and_trigger: &str,
    ) -> bool {
        let Some(handle) = self.resolve(frame) else {
            return false;
        };
        let tab = handle.tab_id;
        if !self.tabs.contains_key(&tab) {
            return false;
        }

        let matched = self.with_tab(tab, |state| state.does_ad_attribution_match(tracker_url, domain_and_trigger));
        if matched {
            self.tabs_with_new_attribution_trackers.insert(tab);
            self.prepare_new_notifications();
        }
        matched
    }

    /// A link in `source_frame` was opened in the new tab `new_tab`. Carries
    /// the attribution window over if `url` is on the landing domain.
    pub fn did_open_requested_url(&mut self, source_frame: FrameId, new_tab: TabId, url: &str) {
        let Some(handle) = self.resolve(source_frame) else {
            return;
        };
        let Some(attribution) = self
            .tabs
            .get(&handle.tab_id)
            .and_then(|state| state.attribution_for_opened_url(url))
        else {
            return;
        };
        debug!("{}: passing ad attribution to {new_tab}", handle.tab_id);
        self.with_tab(new_tab, |state| state.adopt_attribution(attribution));
    }

    // =========================================================================
    // Navigation lifecycle
    // =========================================================================

    pub fn did_start_navigation(&mut self, navigation: &dyn NavigationHandle) {
        if let Some(handle) = self.resolve(navigation.frame()) {
            self.with_tab(handle.tab_id, |state| state.did_start_navigation(navigation));
        }
    }

    pub fn did_redirect_navigation(&mut self, navigation: &dyn NavigationHandle) {
        if let Some(handle) = self.resolve(navigation.frame()) {
            self.with_tab(handle.tab_id, |state| state.did_redirect_navigation(navigation));
        }
    }

    pub fn did_finish_navigation(&mut self, navigation: &dyn NavigationHandle) {
        if let Some(handle) = self.resolve(navigation.frame()) {
            self.with_tab(handle.tab_id, |state| state.did_finish_navigation(navigation));
        }
    }

    // =========================================================================
    // Aggregate counters
    // =========================================================================

    pub fn blocked_domains(&self, group: RuleGroup) -> &BTreeMap<String, u64> {
        &self.blocked_domains[group]
    }

    pub fn blocked_for_origin(&self, group: RuleGroup) -> &BTreeMap<String, u64> {
        &self.blocked_for_origin[group]
    }

    pub fn reporting_start(&self) -> SystemTime {
        self.reporting_start
    }

    /// Reset the aggregate counters, e.g. when the user clears statistics.
    pub fn clear_blocked_counters(&mut self) {
        for (_, counts) in self.blocked_domains.iter_mut() {
            counts.clear();
        }
        for (_, counts) in self.blocked_for_origin.iter_mut() {
            counts.clear();
        }
        self.reporting_start = self.context.clock.wall_time();
    }

    pub fn counters(&self) -> BlockedCounters {
        let collect = |counts: &RuleGroupArray<BTreeMap<String, u64>>| {
            counts
                .iter()
                .map(|(group, map)| (group, map.clone()))
                .collect::<BTreeMap<_, _>>()
        };
        BlockedCounters {
            blocked_domains: collect(&self.blocked_domains),
            blocked_for_origin: collect(&self.blocked_for_origin),
            reporting_start: self
                .reporting_start
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
        }
    }

    /// Load counters saved by a previous session.
    pub fn restore_counters(&mut self, counters: BlockedCounters) {
        for group in RuleGroup::ALL {
            self.blocked_domains[group] = counters.blocked_domains.get(&group).cloned().unwrap_or_default();
            self.blocked_for_origin[group] = counters.blocked_for_origin.get(&group).cloned().unwrap_or_default();
        }
        self.reporting_start = UNIX_EPOCH + Duration::from_secs(counters.reporting_start);
    }

    // =========================================================================
    // Timers and notification batching
    // =========================================================================

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at the clock's current time.
    pub fn run_due_timers(&mut self) {
        let now = self.context.clock.now();
        while let Some((target, ticket)) = self.timers.pop_due(now) {
            self.fire_timer(target, ticket);
        }
    }

    fn fire_timer(&mut self, target: TimerTarget, ticket: TimerTicket) {
        match target {
            TimerTarget::Notifications => {
                if self.notification_timer.fire(ticket) {
                    self.send_notifications();
                }
            }
            TimerTarget::AttributionExpiration(tab) => {
                if self.tabs.contains_key(&tab) {
                    self.with_tab(tab, |state| state.on_expiration_timer(ticket));
                }
            }
        }
    }

    /// Flush now if the last flush is at least one interval old, otherwise
    /// make sure a flush is scheduled for when it will be.
    fn prepare_new_notifications(&mut self) {
        if self.notification_timer.is_running() {
            return;
        }

        let interval = self.context.config.notification_interval();
        let since_last = self.context.clock.now().saturating_duration_since(self.last_notification);
        if since_last >= interval {
            self.send_notifications();
            return;
        }

        match self.last_notification.checked_add(interval) {
            Some(due) => {
                let ticket = self.notification_timer.start(due);
                self.timers.schedule(TimerTarget::Notifications, ticket);
            }
            None => warn!("notification interval {interval:?} is out of range, holding notifications"),
        }
    }

    fn send_notifications(&mut self) {
        self.last_notification = self.context.clock.now();

        if let Some(save) = self.schedule_save.as_mut() {
            save();
        }

        for group in RuleGroup::ALL {
            if self.tabs_with_new_blocks[group].is_empty() {
                continue;
            }
            let tabs = std::mem::take(&mut self.tabs_with_new_blocks[group]);
            self.notify(&FilterEvent::NewBlockedUrlsReported { group, tabs });
        }

        if !self.tabs_with_new_attribution_trackers.is_empty() {
            let tabs = std::mem::take(&mut self.tabs_with_new_attribution_trackers);
            self.notify(&FilterEvent::NewAttributionTrackerAllowed { tabs });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    use serde_json::json;

    use crate::clock::{Clock, ManualClock};
    use crate::navigation::NavigationRecord;

    const AD: RuleGroup = RuleGroup::AdBlockingRules;
    const TRACKING: RuleGroup = RuleGroup::TrackingRules;

    /// Frame n belongs to tab n / 10; tabs 9x are off the record.
    struct FakeTabs;

    impl TabResolver for FakeTabs {
        fn tab_for_frame(&self, frame: FrameId) -> Option<TabHandle> {
            if frame.0 == 0 {
                return None;
            }
            let tab_id = frame.0 / 10;
            Some(TabHandle {
                tab_id: TabId(tab_id),
                off_the_record: tab_id >= 90,
            })
        }
    }

    struct Harness {
        registry: TabRegistry,
        clock: Rc<ManualClock>,
        events: Rc<RefCell<Vec<FilterEvent>>>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Rc::new(ManualClock::new(1_700_000_000));
            let mut registry = TabRegistry::new(FilterContext::with_clock(clock.clone()), Rc::new(FakeTabs));
            let events = Rc::new(RefCell::new(Vec::new()));
            let sink = events.clone();
            registry.add_observer(move |event| sink.borrow_mut().push(event.clone()));
            Self { registry, clock, events }
        }

        fn advance(&mut self, by: Duration) {
            self.clock.advance(by);
            self.registry.run_due_timers();
        }

        fn blocked_reports(&self) -> Vec<(RuleGroup, Vec<u64>)> {
            self.events
                .borrow()
                .iter()
                .filter_map(|event| match event {
                    FilterEvent::NewBlockedUrlsReported { group, tabs } => {
                        Some((*group, tabs.iter().map(|t| t.0).collect()))
                    }
                    _ => None,
                })
                .collect()
        }
    }

    fn trackers(domains: &[&str]) -> HashMap<String, Value> {
        domains
            .iter()
            .map(|d| (d.to_string(), json!({ "name": d })))
            .collect()
    }

    #[test]
    fn test_block_reports_are_routed_to_the_frames_tab() {
        let mut h = Harness::new();
        h.registry.on_url_blocked(AD, "https://news.com", "https://ads.net/a.js", FrameId(11));
        h.registry.on_url_blocked(AD, "https://news.com", "https://ads.net/a.js", FrameId(12));
        h.registry.on_url_blocked(AD, "https://blog.com", "https://ads.net/b.js", FrameId(21));

        let tab1 = h.registry.tab_state(TabId(1)).expect("tab 1 created");
        assert_eq!(tab1.blocked_urls_info(AD).total_count, 2);
        assert_eq!(tab1.blocked_urls_info(AD).blocked_urls["https://ads.net/a.js"].blocked_count, 2);
        assert_eq!(h.registry.tab_state(TabId(2)).map(|s| s.blocked_urls_info(AD).total_count), Some(1));
    }

    #[test]
    fn test_frames_without_tab_are_ignored() {
        let mut h = Harness::new();
        h.registry.on_url_blocked(AD, "https://news.com", "https://ads.net/a.js", FrameId(0));
        h.registry.set_frame_block_state(AD, FrameId(0));

        assert_eq!(h.registry.tab_count(), 0);
        assert!(h.registry.blocked_domains(AD).is_empty());
        assert!(!h.registry.was_frame_blocked(AD, FrameId(0)));
        assert!(!h.registry.does_ad_attribution_match(FrameId(0), "https://x.com/", "a.com|t"));
    }

    #[test]
    fn test_tracker_blocks_are_grouped_under_tracker_domain() {
        let mut h = Harness::new();
        h.registry.on_tracker_infos_updated(TRACKING, 1, trackers(&["tracker.net"]));
        h.registry.on_url_blocked(TRACKING, "https://news.com", "https://cdn.eu.tracker.net/t.js", FrameId(11));
        h.registry.on_url_blocked(TRACKING, "https://news.com", "https://tracker.net/p", FrameId(11));
        h.registry.on_url_blocked(TRACKING, "https://news.com", "https://nottracker.net/p", FrameId(11));

        let info = h.registry.tab_state(TabId(1)).map(|s| s.blocked_urls_info(TRACKING).clone()).unwrap_or_default();
        assert_eq!(info.total_count, 3);
        assert_eq!(info.blocked_trackers["tracker.net"].blocked_count, 2);
        assert!(!info.blocked_urls.contains_key("https://cdn.eu.tracker.net/t.js"));
        assert!(info.blocked_urls.contains_key("https://nottracker.net/p"));

        assert_eq!(h.registry.blocked_domains(TRACKING).get("tracker.net"), Some(&2));
        assert_eq!(h.registry.blocked_domains(TRACKING).get("nottracker.net"), Some(&1));
        assert_eq!(h.registry.blocked_for_origin(TRACKING).get("news.com"), Some(&3));
    }

    #[test]
    fn test_tracker_infos_are_per_group() {
        let mut h = Harness::new();
        h.registry.on_tracker_infos_updated(TRACKING, 1, trackers(&["tracker.net"]));
        h.registry.on_url_blocked(AD, "https://news.com", "https://tracker.net/ad.js", FrameId(11));

        let info = h.registry.tab_state(TabId(1)).map(|s| s.blocked_urls_info(AD).clone()).unwrap_or_default();
        assert!(info.blocked_trackers.is_empty());
        assert_eq!(info.blocked_urls.len(), 1);
    }

    #[test]
    fn test_tracker_info_update_replaces_source_entries() {
        let mut h = Harness::new();
        h.registry.on_tracker_infos_updated(TRACKING, 1, trackers(&["a.com", "shared.com"]));
        h.registry.on_tracker_infos_updated(TRACKING, 2, trackers(&["shared.com"]));
        h.registry.on_tracker_infos_updated(TRACKING, 1, trackers(&["b.com"]));

        assert!(h.registry.tracker_info(TRACKING, "a.com").is_none());
        assert_eq!(h.registry.tracker_info(TRACKING, "b.com").map(|s| s.len()), Some(1));
        let shared = h.registry.tracker_info(TRACKING, "shared.com").expect("source 2 keeps it");
        assert_eq!(shared.keys().copied().collect::<Vec<_>>(), vec![2]);

        h.registry.on_tracker_infos_updated(TRACKING, 2, HashMap::new());
        assert!(h.registry.tracker_info(TRACKING, "shared.com").is_none());
    }

    #[test]
    fn test_off_the_record_tabs_skip_aggregates() {
        let mut h = Harness::new();
        h.registry.on_url_blocked(AD, "https://news.com", "https://ads.net/a.js", FrameId(901));

        assert!(h.registry.blocked_domains(AD).is_empty());
        assert!(h.registry.blocked_for_origin(AD).is_empty());
        assert_eq!(h.registry.tab_state(TabId(90)).map(|s| s.blocked_urls_info(AD).total_count), Some(1));
    }

    #[test]
    fn test_first_flush_waits_one_interval_after_startup() {
        let mut h = Harness::new();
        h.advance(Duration::from_millis(200));
        h.registry.on_url_blocked(AD, "https://a.com", "https://ads.net/1", FrameId(11));
        h.advance(Duration::from_millis(300));
        h.registry.on_url_blocked(AD, "https://b.com", "https://ads.net/2", FrameId(21));

        assert!(h.blocked_reports().is_empty());
        assert!(h.registry.next_timer_deadline().is_some());

        h.advance(Duration::from_millis(500));
        assert_eq!(h.blocked_reports(), vec![(AD, vec![1, 2])]);
    }

    #[test]
    fn test_notifications_are_rate_limited() {
        let mut h = Harness::new();
        h.advance(Duration::from_secs(5));

        // Idle long enough: the first report flushes at once.
        h.registry.on_url_blocked(AD, "https://a.com", "https://ads.net/1", FrameId(11));
        assert_eq!(h.blocked_reports(), vec![(AD, vec![1])]);

        h.advance(Duration::from_millis(100));
        h.registry.on_url_blocked(AD, "https://a.com", "https://ads.net/2", FrameId(11));
        h.advance(Duration::from_millis(100));
        h.registry.on_url_blocked(TRACKING, "https://b.com", "https://t.net/3", FrameId(21));
        h.registry.on_url_blocked(AD, "https://b.com", "https://ads.net/4", FrameId(21));
        assert_eq!(h.blocked_reports().len(), 1);

        h.advance(Duration::from_millis(799));
        assert_eq!(h.blocked_reports().len(), 1);

        h.advance(Duration::from_millis(1));
        assert_eq!(
            h.blocked_reports(),
            vec![(AD, vec![1]), (TRACKING, vec![2]), (AD, vec![1, 2])]
        );
    }

    #[test]
    fn test_save_callback_runs_on_each_flush() {
        let mut h = Harness::new();
        let saves = Rc::new(Cell::new(0));
        let counter = saves.clone();
        h.registry.set_save_callback(move || counter.set(counter.get() + 1));

        h.advance(Duration::from_secs(2));
        h.registry.on_url_blocked(AD, "https://a.com", "https://ads.net/1", FrameId(11));
        h.registry.on_url_blocked(AD, "https://a.com", "https://ads.net/2", FrameId(11));
        h.advance(Duration::from_secs(1));

        assert_eq!(saves.get(), 2);
    }

    #[test]
    fn test_removed_tab_is_dropped_from_pending_notifications() {
        let mut h = Harness::new();
        h.registry.on_url_blocked(AD, "https://a.com", "https://ads.net/1", FrameId(11));
        h.registry.on_url_blocked(AD, "https://b.com", "https://ads.net/2", FrameId(21));
        h.registry.on_tab_removed(TabId(1));
        h.advance(Duration::from_secs(1));

        assert!(h.registry.tab_state(TabId(1)).is_none());
        assert_eq!(h.blocked_reports(), vec![(AD, vec![2])]);
        assert_eq!(h.registry.blocked_domains(AD).get("ads.net"), Some(&2));
    }

    #[test]
    fn test_removed_observer_hears_nothing() {
        let mut h = Harness::new();
        let heard = Rc::new(Cell::new(0));
        let counter = heard.clone();
        let id = h.registry.add_observer(move |_| counter.set(counter.get() + 1));
        h.registry.remove_observer(id);

        h.registry.on_url_blocked(AD, "https://a.com", "https://ads.net/1", FrameId(11));
        h.advance(Duration::from_secs(1));

        assert_eq!(heard.get(), 0);
        assert_eq!(h.blocked_reports().len(), 1);
    }

    #[test]
    fn test_clear_and_restore_counters() {
        let mut h = Harness::new();
        h.registry.on_url_blocked(AD, "https://news.com/page", "https://ads.net/1", FrameId(11));
        let saved = h.registry.counters();
        assert_eq!(saved.reporting_start, 1_700_000_000);
        assert_eq!(saved.blocked_domains[&AD]["ads.net"], 1);

        h.clock.advance(Duration::from_secs(60));
        h.registry.clear_blocked_counters();
        assert!(h.registry.blocked_domains(AD).is_empty());
        assert_eq!(h.registry.counters().reporting_start, 1_700_000_060);

        h.registry.restore_counters(saved.clone());
        assert_eq!(h.registry.counters(), saved);
    }

    #[test]
    fn test_frame_block_state_through_registry() {
        let mut h = Harness::new();
        h.registry.set_frame_block_state(AD, FrameId(13));
        assert!(h.registry.was_frame_blocked(AD, FrameId(13)));
        assert!(!h.registry.was_frame_blocked(TRACKING, FrameId(13)));

        h.registry.frame_deleted(FrameId(13));
        assert!(!h.registry.was_frame_blocked(AD, FrameId(13)));
    }

    fn land_on_ad_site(h: &mut Harness, frame: FrameId) {
        let first = NavigationRecord::main_frame(1, frame, "https://shop.example.com/");
        h.registry.did_start_navigation(&first);
        h.registry.did_finish_navigation(&first.committed());
        h.registry.set_ad_attribution_state(frame, true);

        let click = NavigationRecord::main_frame(2, frame, "https://ads.adnet.com/click");
        h.registry.did_start_navigation(&click);
        h.registry.set_ad_query_triggers(frame, "https://shop.example.com/item", vec!["gclid".into()]);
        let click = click.redirected_to("https://landing.com/?gclid=1");
        h.registry.did_redirect_navigation(&click);
        h.registry.did_finish_navigation(&click.committed());
    }

    #[test]
    fn test_attribution_match_is_reported_to_observers() {
        let mut h = Harness::new();
        land_on_ad_site(&mut h, FrameId(11));
        assert!(h.events.borrow().contains(&FilterEvent::AllowAttributionChanged { tab: TabId(1) }));

        h.advance(Duration::from_secs(2));
        assert!(h.registry.does_ad_attribution_match(FrameId(11), "https://conv.adnet.com/p", "example.com|gclid"));
        assert!(!h.registry.does_ad_attribution_match(FrameId(11), "https://conv.adnet.com/p", "ample.com|gclid"));

        let allowed: Vec<_> = h
            .events
            .borrow()
            .iter()
            .filter(|e| matches!(e, FilterEvent::NewAttributionTrackerAllowed { .. }))
            .cloned()
            .collect();
        assert_eq!(
            allowed,
            vec![FilterEvent::NewAttributionTrackerAllowed { tabs: BTreeSet::from([TabId(1)]) }]
        );
    }

    #[test]
    fn test_attribution_expires_through_timer_queue() {
        let mut h = Harness::new();
        land_on_ad_site(&mut h, FrameId(11));
        h.events.borrow_mut().clear();

        h.advance(Duration::from_secs(7 * 24 * 60 * 60 - 1));
        assert!(h.registry.tab_state(TabId(1)).is_some_and(|s| s.has_active_attribution()));

        h.advance(Duration::from_secs(1));
        let state = h.registry.tab_state(TabId(1)).expect("tab exists");
        assert!(!state.has_active_attribution());
        assert_eq!(state.current_ad_trigger(), "");
        assert!(!h.registry.does_ad_attribution_match(FrameId(11), "https://conv.adnet.com/p", "example.com|gclid"));
        assert_eq!(
            *h.events.borrow(),
            vec![FilterEvent::AllowAttributionChanged { tab: TabId(1) }]
        );
    }

    #[test]
    fn test_expiration_of_closed_tab_is_dropped() {
        let mut h = Harness::new();
        land_on_ad_site(&mut h, FrameId(11));
        h.registry.on_tab_removed(TabId(1));
        h.events.borrow_mut().clear();

        h.advance(Duration::from_secs(8 * 24 * 60 * 60));
        assert!(h.registry.tab_state(TabId(1)).is_none());
        assert!(h.events.borrow().is_empty());
    }

    #[test]
    fn test_reused_tab_id_keeps_its_own_expiration() {
        let mut h = Harness::new();
        land_on_ad_site(&mut h, FrameId(11));
        h.advance(Duration::from_secs(2));
        h.registry.on_tab_removed(TabId(1));
        assert!(h.registry.next_timer_deadline().is_none());

        h.advance(Duration::from_secs(24 * 60 * 60));
        land_on_ad_site(&mut h, FrameId(11));

        h.advance(Duration::from_secs(6 * 24 * 60 * 60));
        assert!(h.registry.tab_state(TabId(1)).is_some_and(|s| s.has_active_attribution()));

        h.advance(Duration::from_secs(24 * 60 * 60));
        assert!(h.registry.tab_state(TabId(1)).is_some_and(|s| !s.has_active_attribution()));
    }

    #[test]
    fn test_open_link_in_new_tab_carries_attribution() {
        let mut h = Harness::new();
        land_on_ad_site(&mut h, FrameId(11));

        h.registry.did_open_requested_url(FrameId(11), TabId(2), "https://www.landing.com/cart");
        h.registry.did_open_requested_url(FrameId(11), TabId(3), "https://elsewhere.com/");

        assert!(h.registry.does_ad_attribution_match(FrameId(21), "https://conv.adnet.com/p", "example.com|gclid"));
        assert!(h.registry.tab_state(TabId(3)).is_none());

        let source_deadline = h.registry.tab_state(TabId(1)).and_then(|s| s.attribution_expires_at());
        let opened_deadline = h.registry.tab_state(TabId(2)).and_then(|s| s.attribution_expires_at());
        assert!(source_deadline.is_some());
        assert_eq!(source_deadline, opened_deadline);
    }

    #[test]
    fn test_clock_is_shared_with_tabs() {
        let h = Harness::new();
        assert_eq!(h.registry.context().clock.now(), h.clock.now());
    }
}
