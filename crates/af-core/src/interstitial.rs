//! Blocked-document interstitial
//!
//! When a main-frame document is blocked by a rule, the navigation fails with
//! [`NetError::BlockedByClient`]. [`DocumentBlockedThrottle`] intercepts that
//! failure, works out which rule group blocked the document and swaps the
//! network error page for a [`DocumentBlockedInterstitial`]. The page posts
//! integer command IDs back, handled by
//! [`DocumentBlockedInterstitial::command_received`].

use std::fmt::Write as _;

use log::{debug, error};

use crate::navigation::NavigationHandle;
use crate::types::{ExceptionList, FrameId, NetError, RuleGroup};
use crate::url::extract_host;

// =============================================================================
// Collaborators
// =============================================================================

/// The rule engine, as seen from the interstitial.
pub trait RuleService {
    fn is_document_blocked(&self, group: RuleGroup, frame: FrameId, url: &str) -> bool;
    fn remove_exception_for_domain(&mut self, group: RuleGroup, list: ExceptionList, domain: &str);
    fn add_exception_for_domain(&mut self, group: RuleGroup, list: ExceptionList, domain: &str);
    fn active_exception_list(&self, group: RuleGroup) -> ExceptionList;
}

/// Session-history control of the tab showing the interstitial.
pub trait InterstitialController {
    fn can_go_back(&self) -> bool;
    fn go_back(&mut self);
    /// Reload the blocked URL. Used once the user chose to proceed.
    fn reload(&mut self);
}

// =============================================================================
// Commands
// =============================================================================

/// Command IDs shared by every security interstitial page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum InterstitialCommand {
    DontProceed = 0,
    Proceed = 1,
    ShowMoreSection = 2,
    OpenHelpCenter = 3,
    OpenDiagnostic = 4,
    Reload = 5,
    OpenDateSettings = 6,
    OpenLogin = 7,
    DoReport = 8,
    DontReport = 9,
    OpenReportingPrivacy = 10,
    OpenWhitepaper = 11,
    ReportPhishingError = 12,
    OpenEnhancedProtectionSettings = 13,
    CloseInterstitialWithoutUi = 14,
    RequestSiteAccessPermission = 15,
}

impl TryFrom<i32> for InterstitialCommand {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::DontProceed),
            1 => Ok(Self::Proceed),
            2 => Ok(Self::ShowMoreSection),
            3 => Ok(Self::OpenHelpCenter),
            4 => Ok(Self::OpenDiagnostic),
            5 => Ok(Self::Reload),
            6 => Ok(Self::OpenDateSettings),
            7 => Ok(Self::OpenLogin),
            8 => Ok(Self::DoReport),
            9 => Ok(Self::DontReport),
            10 => Ok(Self::OpenReportingPrivacy),
            11 => Ok(Self::OpenWhitepaper),
            12 => Ok(Self::ReportPhishingError),
            13 => Ok(Self::OpenEnhancedProtectionSettings),
            14 => Ok(Self::CloseInterstitialWithoutUi),
            15 => Ok(Self::RequestSiteAccessPermission),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Interstitial Page
// =============================================================================

/// The page shown in place of a blocked main-frame document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentBlockedInterstitial {
    url: String,
    group: RuleGroup,
}

impl DocumentBlockedInterstitial {
    pub fn new(url: impl Into<String>, group: RuleGroup) -> Self {
        Self {
            url: url.into(),
            group,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Rule group that blocked the document.
    pub fn group(&self) -> RuleGroup {
        self.group
    }

    /// Lowercased host of the blocked URL, empty when it has none.
    pub fn domain(&self) -> String {
        extract_host(&self.url).unwrap_or_default().to_ascii_lowercase()
    }

    pub fn html_contents(&self) -> String {
        let url = escape_html(&self.url);
        let group = self.group.name();
        let mut html = String::with_capacity(1024 + url.len());

        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str("<title>Page blocked</title>\n</head>\n");
        let _ = writeln!(html, "<body data-rule-group=\"{group}\">");
        html.push_str("<h1>This page was blocked</h1>\n");
        let _ = writeln!(
            html,
            "<p>The document at <code>{url}</code> was blocked by your {group} rules.</p>"
        );
        let _ = writeln!(
            html,
            "<button id=\"proceed\" onclick=\"sendCommand({})\">Allow this site</button>",
            InterstitialCommand::Proceed as i32
        );
        let _ = writeln!(
            html,
            "<button id=\"go-back\" onclick=\"sendCommand({})\">Go back</button>",
            InterstitialCommand::DontProceed as i32
        );
        html.push_str("<script>\n");
        html.push_str("function sendCommand(cmd) { window.domAutomationController.send(cmd); }\n");
        html.push_str("</script>\n</body>\n</html>\n");
        html
    }

    /// Handle a command posted by the rendered page.
    pub fn command_received(
        &self,
        command_id: i32,
        rules: &mut dyn RuleService,
        controller: &mut dyn InterstitialController,
    ) {
        match InterstitialCommand::try_from(command_id) {
            Ok(InterstitialCommand::DontProceed) => {
                if controller.can_go_back() {
                    controller.go_back();
                }
            }
            Ok(InterstitialCommand::Proceed) => {
                self.exempt_domain(rules);
                controller.reload();
            }
            Ok(command) => {
                error!("unsupported command {command:?} on blocked-document interstitial");
                debug_assert!(false, "unsupported interstitial command {command:?}");
            }
            Err(()) => {
                error!("unknown command id {command_id} on blocked-document interstitial");
                debug_assert!(false, "unknown interstitial command id {command_id}");
            }
        }
    }

    fn exempt_domain(&self, rules: &mut dyn RuleService) {
        let domain = self.domain();
        debug!("exempting {domain} after {} block", self.group);

        exempt_domain_in_group(rules, RuleGroup::AdBlockingRules, &domain);
        if self.group == RuleGroup::TrackingRules {
            exempt_domain_in_group(rules, RuleGroup::TrackingRules, &domain);
        }
    }
}

fn exempt_domain_in_group(rules: &mut dyn RuleService, group: RuleGroup, domain: &str) {
    rules.remove_exception_for_domain(group, ExceptionList::ProcessList, domain);
    if rules.active_exception_list(group) == ExceptionList::ExemptList {
        rules.add_exception_for_domain(group, ExceptionList::ExemptList, domain);
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// =============================================================================
// Navigation Throttle
// =============================================================================

/// Outcome of [`DocumentBlockedThrottle::will_fail_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Let the failure take its normal course.
    Proceed,
    /// Cancel with `net_error` and show the interstitial's HTML instead of the error page.
    Cancel {
        net_error: NetError,
        interstitial: DocumentBlockedInterstitial,
    },
}

/// Hooks the failure of main-frame navigations blocked by a rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentBlockedThrottle;

impl DocumentBlockedThrottle {
    pub fn new() -> Self {
        Self
    }

    pub fn will_fail_request(
        &self,
        navigation: &dyn NavigationHandle,
        rules: &dyn RuleService,
    ) -> ThrottleDecision {
        if !navigation.is_in_main_frame() || navigation.net_error() != NetError::BlockedByClient {
            return ThrottleDecision::Proceed;
        }

        let frame = navigation.frame();
        let url = navigation.url();
        let Some(group) = RuleGroup::ALL
            .into_iter()
            .find(|&group| rules.is_document_blocked(group, frame, url))
        else {
            return ThrottleDecision::Proceed;
        };

        debug!("{}: document {url} blocked by {group} rules", navigation.navigation_id());
        ThrottleDecision::Cancel {
            net_error: NetError::BlockedByClient,
            interstitial: DocumentBlockedInterstitial::new(url, group),
        }
    }
}
