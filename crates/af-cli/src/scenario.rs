//! Scenario replay
//!
//! A scenario declares the tabs and frames of a browsing session, then lists
//! steps (navigations, blocked requests, attribution signals, clock advances)
//! to run through a [`TabRegistry`] on a manual clock.
//!
//! ```json
//! {
//!   "tabs": [{ "id": 1, "frames": [11, 12] }],
//!   "steps": [
//!     { "op": "start_navigation", "id": 1, "frame": 11, "url": "https://news.com/" },
//!     { "op": "finish_navigation", "id": 1 },
//!     { "op": "block", "group": "ad-blocking-rules", "origin": "https://news.com/",
//!       "url": "https://ads.net/a.js", "frame": 12 },
//!     { "op": "advance", "ms": 1000 }
//!   ]
//! }
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use af_core::clock::ManualClock;
use af_core::registry::{BlockedCounters, FilterEvent, TabHandle, TabRegistry, TabResolver};
use af_core::types::{FrameId, NetError, RuleGroup, TabId};
use af_core::{DomainRegistry, FilterConfig, FilterContext, NavigationRecord, TabBlockedUrlInfo};

/// Wall-clock second the replay clock starts at.
const REPLAY_START_UNIX_SECS: u64 = 1_700_000_000;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub tabs: Vec<ScenarioTab>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioTab {
    pub id: u64,
    pub frames: Vec<u64>,
    #[serde(default)]
    pub off_the_record: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    StartNavigation {
        id: i64,
        frame: u64,
        url: String,
        #[serde(default)]
        subframe: bool,
        #[serde(default)]
        same_document: bool,
        #[serde(default)]
        client_redirect: bool,
    },
    RedirectNavigation {
        id: i64,
        url: String,
    },
    FinishNavigation {
        id: i64,
        /// Net error code; the navigation commits when absent.
        #[serde(default)]
        error: Option<i32>,
    },
    Block {
        group: RuleGroup,
        origin: String,
        url: String,
        frame: u64,
    },
    TrackerInfos {
        group: RuleGroup,
        source: u32,
        trackers: HashMap<String, Value>,
    },
    SetFrameBlocked {
        group: RuleGroup,
        frame: u64,
    },
    SetAdAttribution {
        frame: u64,
        enabled: bool,
    },
    AdQueryTriggers {
        frame: u64,
        ad_url: String,
        triggers: Vec<String>,
    },
    AttributionMatch {
        frame: u64,
        tracker_url: String,
        domain_and_trigger: String,
    },
    OpenUrl {
        source_frame: u64,
        new_tab: u64,
        url: String,
    },
    Advance {
        ms: u64,
    },
    CloseTab {
        tab: u64,
    },
}

/// An observer event, stamped with replay time.
#[derive(Debug, Clone, Serialize)]
pub struct TimedEvent {
    pub at_ms: u128,
    #[serde(flatten)]
    pub event: FilterEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub step: usize,
    pub tracker_url: String,
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TabReport {
    pub blocked: BTreeMap<RuleGroup, TabBlockedUrlInfo>,
    pub ad_attribution_enabled: bool,
    pub ad_trigger: String,
    pub ad_landing_domain: String,
    pub on_ad_landing_site: bool,
    pub allowed_attribution_trackers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub events: Vec<TimedEvent>,
    pub attribution_matches: Vec<MatchResult>,
    pub tabs: BTreeMap<TabId, TabReport>,
    pub counters: BlockedCounters,
}

struct ScenarioTabs {
    frames: HashMap<FrameId, TabHandle>,
}

impl ScenarioTabs {
    fn new(tabs: &[ScenarioTab]) -> Self {
        let frames = tabs
            .iter()
            .flat_map(|tab| {
                let handle = TabHandle {
                    tab_id: TabId(tab.id),
                    off_the_record: tab.off_the_record,
                };
                tab.frames.iter().map(move |&frame| (FrameId(frame), handle))
            })
            .collect();
        Self { frames }
    }
}

impl TabResolver for ScenarioTabs {
    fn tab_for_frame(&self, frame: FrameId) -> Option<TabHandle> {
        self.frames.get(&frame).copied()
    }
}

/// Replay `scenario` and collect everything observers saw.
pub fn replay(scenario: &Scenario, config: FilterConfig, domains: DomainRegistry) -> Result<ReplayReport, String> {
    let clock = Rc::new(ManualClock::new(REPLAY_START_UNIX_SECS));
    let context = FilterContext::new(clock.clone(), Rc::new(domains), config);
    let mut registry = TabRegistry::new(context, Rc::new(ScenarioTabs::new(&scenario.tabs)));

    let events = Rc::new(RefCell::new(Vec::new()));
    {
        let events = events.clone();
        let clock = clock.clone();
        registry.add_observer(move |event| {
            events.borrow_mut().push(TimedEvent {
                at_ms: clock.elapsed().as_millis(),
                event: event.clone(),
            });
        });
    }

    let mut navigations: HashMap<i64, NavigationRecord> = HashMap::new();
    let mut attribution_matches = Vec::new();

    for (index, step) in scenario.steps.iter().enumerate() {
        debug!("step {index}: {step:?}");
        match step {
            Step::StartNavigation {
                id,
                frame,
                url,
                subframe,
                same_document,
                client_redirect,
            } => {
                let mut navigation = if *subframe {
                    NavigationRecord::subframe(*id, FrameId(*frame), url.as_str())
                } else {
                    NavigationRecord::main_frame(*id, FrameId(*frame), url.as_str())
                };
                if *same_document {
                    navigation = navigation.same_document();
                }
                if *client_redirect {
                    navigation = navigation.client_redirect();
                }
                registry.did_start_navigation(&navigation);
                navigations.insert(*id, navigation);
            }
            Step::RedirectNavigation { id, url } => {
                let navigation = navigations
                    .remove(id)
                    .ok_or_else(|| format!("step {index}: navigation {id} was never started"))?
                    .redirected_to(url.as_str());
                registry.did_redirect_navigation(&navigation);
                navigations.insert(*id, navigation);
            }
            Step::FinishNavigation { id, error } => {
                let navigation = navigations
                    .remove(id)
                    .ok_or_else(|| format!("step {index}: navigation {id} was never started"))?;
                let navigation = match error {
                    Some(code) => navigation.failed(NetError::from_code(*code)),
                    None => navigation.committed(),
                };
                registry.did_finish_navigation(&navigation);
            }
            Step::Block {
                group,
                origin,
                url,
                frame,
            } => registry.on_url_blocked(*group, origin, url, FrameId(*frame)),
            Step::TrackerInfos {
                group,
                source,
                trackers,
            } => registry.on_tracker_infos_updated(*group, *source, trackers.clone()),
            Step::SetFrameBlocked { group, frame } => registry.set_frame_block_state(*group, FrameId(*frame)),
            Step::SetAdAttribution { frame, enabled } => {
                registry.set_ad_attribution_state(FrameId(*frame), *enabled)
            }
            Step::AdQueryTriggers {
                frame,
                ad_url,
                triggers,
            } => registry.set_ad_query_triggers(FrameId(*frame), ad_url, triggers.clone()),
            Step::AttributionMatch {
                frame,
                tracker_url,
                domain_and_trigger,
            } => {
                if !domain_and_trigger.contains('|') {
                    return Err(format!("step {index}: '{domain_and_trigger}' has no '|' separator"));
                }
                let matched = registry.does_ad_attribution_match(FrameId(*frame), tracker_url, domain_and_trigger);
                attribution_matches.push(MatchResult {
                    step: index,
                    tracker_url: tracker_url.clone(),
                    matched,
                });
            }
            Step::OpenUrl {
                source_frame,
                new_tab,
                url,
            } => registry.did_open_requested_url(FrameId(*source_frame), TabId(*new_tab), url),
            Step::Advance { ms } => {
                clock.advance(Duration::from_millis(*ms));
                registry.run_due_timers();
            }
            Step::CloseTab { tab } => registry.on_tab_removed(TabId(*tab)),
        }
    }

    if !navigations.is_empty() {
        info!("{} navigation(s) never finished", navigations.len());
    }

    let tabs = scenario
        .tabs
        .iter()
        .filter_map(|tab_decl| {
            let tab = TabId(tab_decl.id);
            registry.tab_state(tab).map(|state| {
                let report = TabReport {
                    blocked: RuleGroup::ALL
                        .into_iter()
                        .map(|group| (group, state.blocked_urls_info(group).clone()))
                        .collect(),
                    ad_attribution_enabled: state.ad_attribution_enabled(),
                    ad_trigger: state.current_ad_trigger().to_owned(),
                    ad_landing_domain: state.current_ad_landing_domain().to_owned(),
                    on_ad_landing_site: state.is_on_ad_landing_site(),
                    allowed_attribution_trackers: state.allowed_attribution_trackers().iter().cloned().collect(),
                };
                (tab, report)
            })
        })
        .collect();

    let counters = registry.counters();
    drop(registry);

    let events = events.take();
    Ok(ReplayReport {
        events,
        attribution_matches,
        tabs,
        counters,
    })
}
