//! Shared collaborators handed to every tab state

use std::rc::Rc;

use crate::clock::{Clock, SystemClock};
use crate::config::FilterConfig;
use crate::psl::DomainRegistry;

/// Per-profile context passed explicitly to the registry and each tab state.
#[derive(Clone)]
pub struct FilterContext {
    pub clock: Rc<dyn Clock>,
    pub domains: Rc<DomainRegistry>,
    pub config: Rc<FilterConfig>,
}

impl FilterContext {
    pub fn new(clock: Rc<dyn Clock>, domains: Rc<DomainRegistry>, config: FilterConfig) -> Self {
        Self {
            clock,
            domains,
            config: Rc::new(config),
        }
    }

    /// Context with the system clock, the bundled suffix list and default timings.
    pub fn system() -> Self {
        Self::new(
            Rc::new(SystemClock),
            Rc::new(DomainRegistry::builtin()),
            FilterConfig::default(),
        )
    }

    /// Context on the given clock with the bundled suffix list and default timings.
    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self::new(clock, Rc::new(DomainRegistry::builtin()), FilterConfig::default())
    }
}
