//! Discovery: SSDP events in, described devices out.
//!
//! The [`DiscoveryManager`] feeds the [`DiscoveryCache`] from SSDP events
//! and schedules description fetches on a small worker pool. Description
//! parsing is behind the [`DescriptionProvider`] trait so the XML layer
//! stays pluggable.

mod manager;
mod provider;

pub use manager::DiscoveryManager;
pub use provider::{resolve_url, DescriptionProvider, HttpXmlDescriptionProvider};

/// Extracts the `uuid:...` part of a USN.
pub(crate) fn extract_udn_from_usn(usn: &str) -> Option<String> {
    let lower = usn.trim().to_ascii_lowercase();
    if let Some(idx) = lower.find("uuid:") {
        let sub = &lower[idx..];
        if let Some(end) = sub.find("::") {
            Some(sub[..end].to_string())
        } else {
            Some(sub.to_string())
        }
    } else {
        None
    }
}
