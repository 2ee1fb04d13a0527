//! Navigation handles
//!
//! The browser's navigation machinery is external; the filter only reads a
//! handful of facts from each navigation through [`NavigationHandle`].

use crate::types::{FrameId, NavigationId, NetError, PageTransition, TransitionQualifiers};

/// Read-only view of a navigation, as passed to lifecycle callbacks.
pub trait NavigationHandle {
    fn navigation_id(&self) -> NavigationId;
    fn is_in_main_frame(&self) -> bool;
    fn is_same_document(&self) -> bool;
    /// Current URL; after a redirect, the redirect target.
    fn url(&self) -> &str;
    fn page_transition(&self) -> PageTransition;
    fn has_committed(&self) -> bool;
    fn net_error(&self) -> NetError;
    /// Frame the navigation targets.
    fn frame(&self) -> FrameId;
}

/// Plain-data navigation handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRecord {
    pub id: NavigationId,
    pub frame: FrameId,
    pub url: String,
    pub main_frame: bool,
    pub same_document: bool,
    pub transition: PageTransition,
    pub committed: bool,
    pub net_error: NetError,
}

impl NavigationRecord {
    /// A fresh cross-document main-frame navigation.
    pub fn main_frame(id: i64, frame: FrameId, url: impl Into<String>) -> Self {
        Self {
            id: NavigationId(id),
            frame,
            url: url.into(),
            main_frame: true,
            same_document: false,
            transition: PageTransition::link(),
            committed: false,
            net_error: NetError::Ok,
        }
    }

    pub fn subframe(id: i64, frame: FrameId, url: impl Into<String>) -> Self {
        Self {
            main_frame: false,
            ..Self::main_frame(id, frame, url)
        }
    }

    pub fn client_redirect(mut self) -> Self {
        self.transition.qualifiers |= TransitionQualifiers::CLIENT_REDIRECT;
        self
    }

    pub fn same_document(mut self) -> Self {
        self.same_document = true;
        self
    }

    /// Follow a redirect to `url`.
    pub fn redirected_to(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn committed(mut self) -> Self {
        self.committed = true;
        self.net_error = NetError::Ok;
        self
    }

    pub fn failed(mut self, error: NetError) -> Self {
        self.committed = false;
        self.net_error = error;
        self
    }
}

impl NavigationHandle for NavigationRecord {
    fn navigation_id(&self) -> NavigationId {
        self.id
    }

    fn is_in_main_frame(&self) -> bool {
        self.main_frame
    }

    fn is_same_document(&self) -> bool {
        self.same_document
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn page_transition(&self) -> PageTransition {
        self.transition
    }

    fn has_committed(&self) -> bool {
        self.committed
    }

    fn net_error(&self) -> NetError {
        self.net_error
    }

    fn frame(&self) -> FrameId {
        self.frame
    }
}
