//! Public Suffix List (PSL) utilities for registrable-domain extraction
//!
//! A [`DomainRegistry`] wraps two parsed lists: the full list, and the
//! ICANN section alone. Callers pick which one applies with
//! [`PrivateRegistries`]. The registry is created once per profile and
//! shared with every tab through the filter context.
//!
//! # Examples
//!
//! ```
//! use af_core::psl::{DomainRegistry, PrivateRegistries};
//!
//! let domains = DomainRegistry::builtin();
//! assert_eq!(domains.registrable_domain("sub.example.co.uk", PrivateRegistries::Exclude), "example.co.uk");
//! assert_eq!(domains.registrable_domain("me.github.io", PrivateRegistries::Include), "me.github.io");
//! assert_eq!(domains.registrable_domain("me.github.io", PrivateRegistries::Exclude), "github.io");
//! ```

use std::net::IpAddr;

use log::warn;
use publicsuffix::{List, Psl};

use crate::url::extract_host;

/// Marker separating the ICANN section from the private section of the list.
const PRIVATE_SECTION_MARKER: &str = "// ===BEGIN PRIVATE DOMAINS===";

/// Public Suffix List bundled with the crate, as published at publicsuffix.org.
const BUILTIN_LIST: &str = include_str!("../data/public_suffix_list.dat");

/// Error type for list loading.
#[derive(Debug, thiserror::Error)]
pub enum PslError {
    #[error("Invalid public suffix list: {0}")]
    InvalidList(String),
}

/// Whether private registries (e.g. `github.io`) count as public suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateRegistries {
    Include,
    Exclude,
}

/// Registrable-domain ("public suffix + 1 label") computation.
pub struct DomainRegistry {
    full: List,
    icann: List,
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry").finish_non_exhaustive()
    }
}

impl DomainRegistry {
    /// Registry backed by the bundled list.
    pub fn builtin() -> Self {
        match Self::from_list_text(BUILTIN_LIST) {
            Ok(registry) => registry,
            Err(e) => {
                warn!("bundled suffix list rejected, using default rule only: {e}");
                Self {
                    full: List::new(),
                    icann: List::new(),
                }
            }
        }
    }

    /// Parse a Public Suffix List in the standard `public_suffix_list.dat` format.
    pub fn from_list_text(text: &str) -> Result<Self, PslError> {
        let icann_text = match text.find(PRIVATE_SECTION_MARKER) {
            Some(pos) => &text[..pos],
            None => text,
        };

        let full = text
            .parse::<List>()
            .map_err(|e| PslError::InvalidList(e.to_string()))?;
        let icann = icann_text
            .parse::<List>()
            .map_err(|e| PslError::InvalidList(e.to_string()))?;

        Ok(Self { full, icann })
    }

    /// Get the registrable domain for a hostname.
    ///
    /// Returns an empty string for IP addresses, bare public suffixes and
    /// single-label hosts.
    pub fn registrable_domain(&self, host: &str, private: PrivateRegistries) -> String {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() || is_ip_literal(&host) {
            return String::new();
        }

        let list = match private {
            PrivateRegistries::Include => &self.full,
            PrivateRegistries::Exclude => &self.icann,
        };

        list.domain(host.as_bytes())
            .and_then(|domain| std::str::from_utf8(domain.as_bytes()).ok().map(str::to_owned))
            .unwrap_or_default()
    }

    /// Registrable domain of a URL's host. Empty when the URL has no host.
    pub fn registrable_domain_for_url(&self, url: &str, private: PrivateRegistries) -> String {
        match extract_host(url) {
            Some(host) => self.registrable_domain(host, private),
            None => String::new(),
        }
    }
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn is_ip_literal(host: &str) -> bool {
    if host.starts_with('[') {
        return true;
    }
    host.parse::<IpAddr>().is_ok()
}

// =============================================================================
// Host Walking
// =============================================================================

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator walking a host from the full name up to its last label.
pub struct HostSuffixIter<'a> {
    current: Option<&'a str>,
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.current?;
        self.current = get_parent_domain(result);
        Some(result)
    }
}

/// Walk host suffixes from most specific to least specific, one label at a time.
pub fn walk_host_suffixes(host: &str) -> HostSuffixIter<'_> {
    let host = host.trim_end_matches('.');
    HostSuffixIter {
        current: if host.is_empty() { None } else { Some(host) },
    }
}
