//! Discovery cache.
//!
//! UDN-keyed cache of discovered root devices. Entries expire at
//! `received_at + max_age`; duplicate ALIVEs refresh the expiry; BYEBYE
//! removes the entry. BOOTID transitions announced through UPDATE
//! (`NEXTBOOTID`) are benign; an unrelated BOOTID means the device
//! rebooted and its description must be fetched again.
//!
//! The cache is owned by the control-point composer; callers only ever
//! see copy-on-read snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::model::{DeviceDescription, DiscoveredDevice};

/// Outcome of an ALIVE (or search response) upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliveOutcome {
    /// First sighting of this UDN
    New,
    /// Known device, expiry refreshed
    Refreshed,
    /// Known device announcing an unrelated BOOTID: description is stale
    Rebooted,
}

#[derive(Debug)]
struct CacheEntry {
    locations: Vec<String>,
    server: String,
    max_age: u32,
    boot_id: Option<u32>,
    expected_next_boot: Option<u32>,
    received_at: Instant,
    needs_redescription: bool,
    description: Option<Arc<DeviceDescription>>,
}

impl CacheEntry {
    fn expires_at(&self) -> Instant {
        self.received_at + Duration::from_secs(u64::from(self.max_age))
    }
}

/// UDN-keyed cache of discovered devices.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    entries: HashMap<String, CacheEntry>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies an ALIVE or search response.
    pub fn upsert_alive(
        &mut self,
        udn: &str,
        location: &str,
        server: &str,
        max_age: u32,
        boot_id: Option<u32>,
    ) -> AliveOutcome {
        let key = udn.to_ascii_lowercase();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.received_at = Instant::now();
                entry.max_age = max_age;
                entry.server = server.to_string();
                if !entry.locations.iter().any(|l| l == location) {
                    entry.locations.push(location.to_string());
                }

                let rebooted = match (entry.boot_id, boot_id) {
                    (Some(old), Some(new)) if old != new => {
                        if entry.expected_next_boot == Some(new) {
                            // transition announced by a prior UPDATE
                            entry.expected_next_boot = None;
                            false
                        } else {
                            true
                        }
                    }
                    _ => false,
                };
                if boot_id.is_some() {
                    entry.boot_id = boot_id;
                }

                if rebooted {
                    info!("🔄 Device {} rebooted, description is stale", udn);
                    entry.needs_redescription = true;
                    entry.description = None;
                    AliveOutcome::Rebooted
                } else {
                    AliveOutcome::Refreshed
                }
            }
            None => {
                self.entries.insert(
                    key,
                    CacheEntry {
                        locations: vec![location.to_string()],
                        server: server.to_string(),
                        max_age,
                        boot_id,
                        expected_next_boot: None,
                        received_at: Instant::now(),
                        needs_redescription: true,
                        description: None,
                    },
                );
                debug!("New device {} at {}", udn, location);
                AliveOutcome::New
            }
        }
    }

    /// Applies an UPDATE message. Returns `true` when the device must be
    /// re-described (BOOTID unrelated to the previously announced
    /// NEXTBOOTID).
    pub fn apply_update(
        &mut self,
        udn: &str,
        location: &str,
        boot_id: u32,
        next_boot_id: u32,
    ) -> bool {
        let key = udn.to_ascii_lowercase();
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };

        if !entry.locations.iter().any(|l| l == location) {
            entry.locations.push(location.to_string());
        }

        let benign = entry.boot_id.is_none()
            || entry.boot_id == Some(boot_id)
            || entry.expected_next_boot == Some(boot_id);

        entry.boot_id = Some(boot_id);
        entry.expected_next_boot = Some(next_boot_id);

        if benign {
            false
        } else {
            info!("🔄 Device {} announced an unrelated BOOTID", udn);
            entry.needs_redescription = true;
            entry.description = None;
            true
        }
    }

    /// Removes a device on BYEBYE. Returns `true` if it was cached.
    pub fn remove(&mut self, udn: &str) -> bool {
        let removed = self.entries.remove(&udn.to_ascii_lowercase()).is_some();
        if removed {
            info!("👋 Device {} said byebye", udn);
        }
        removed
    }

    /// Removes entries past their expiry. Returns the expired UDNs.
    pub fn sweep_expired(&mut self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at() <= now)
            .map(|(udn, _)| udn.clone())
            .collect();
        for udn in &expired {
            self.entries.remove(udn);
            info!("⏰ Device {} expired from cache", udn);
        }
        expired
    }

    /// Does this device still need a description fetch?
    pub fn needs_description(&self, udn: &str) -> bool {
        self.entries
            .get(&udn.to_ascii_lowercase())
            .map(|e| e.needs_redescription || e.description.is_none())
            .unwrap_or(false)
    }

    /// Attaches a freshly fetched description.
    ///
    /// One cached root device per UDN: a later fetch replaces the earlier
    /// description.
    pub fn attach_description(&mut self, udn: &str, description: Arc<DeviceDescription>) {
        if let Some(entry) = self.entries.get_mut(&udn.to_ascii_lowercase()) {
            entry.description = Some(description);
            entry.needs_redescription = false;
        }
    }

    /// Snapshot of one entry.
    pub fn get(&self, udn: &str) -> Option<DiscoveredDevice> {
        let key = udn.to_ascii_lowercase();
        self.entries
            .get(&key)
            .map(|entry| snapshot(&key, entry))
    }

    /// Copy-on-read snapshot of the whole cache.
    pub fn snapshot(&self) -> Vec<DiscoveredDevice> {
        self.entries
            .iter()
            .map(|(udn, entry)| snapshot(udn, entry))
            .collect()
    }
}

fn snapshot(udn: &str, entry: &CacheEntry) -> DiscoveredDevice {
    DiscoveredDevice {
        udn: udn.to_string(),
        locations: entry.locations.clone(),
        server: entry.server.clone(),
        max_age: entry.max_age,
        boot_id: entry.boot_id,
        expires_in: entry.expires_at().saturating_duration_since(Instant::now()),
        description: entry.description.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UDN: &str = "uuid:2fac1234-31f8-11b4-a222-08002b34c003";
    const LOCATION: &str = "http://192.168.1.10:8080/desc.xml";

    #[test]
    fn test_new_then_refresh() {
        let mut cache = DiscoveryCache::new();
        assert_eq!(
            cache.upsert_alive(UDN, LOCATION, "nox", 1800, None),
            AliveOutcome::New
        );
        assert_eq!(
            cache.upsert_alive(UDN, LOCATION, "nox", 1800, None),
            AliveOutcome::Refreshed
        );
        assert_eq!(cache.len(), 1);
        assert!(cache.needs_description(UDN));
    }

    #[test]
    fn test_multiple_locations_accumulate() {
        let mut cache = DiscoveryCache::new();
        cache.upsert_alive(UDN, LOCATION, "nox", 1800, None);
        cache.upsert_alive(UDN, "http://10.0.0.2:8080/desc.xml", "nox", 1800, None);
        let device = cache.get(UDN).unwrap();
        assert_eq!(device.locations.len(), 2);
    }

    #[test]
    fn test_expiry_tracks_max_age() {
        let mut cache = DiscoveryCache::new();
        cache.upsert_alive(UDN, LOCATION, "nox", 1800, None);
        let device = cache.get(UDN).unwrap();
        // expiry = received_at + max_age
        assert!(device.expires_in <= Duration::from_secs(1800));
        assert!(device.expires_in > Duration::from_secs(1790));

        // entry with zero max-age expires on the next sweep
        cache.upsert_alive("uuid:ephemeral", LOCATION, "nox", 0, None);
        let expired = cache.sweep_expired();
        assert_eq!(expired, vec!["uuid:ephemeral".to_string()]);
        assert!(cache.get(UDN).is_some());
    }

    #[test]
    fn test_byebye_removes() {
        let mut cache = DiscoveryCache::new();
        cache.upsert_alive(UDN, LOCATION, "nox", 1800, None);
        assert!(cache.remove(UDN));
        assert!(!cache.remove(UDN));
        assert!(cache.get(UDN).is_none());
    }

    #[test]
    fn test_expected_bootid_transition_is_not_a_reboot() {
        let mut cache = DiscoveryCache::new();
        cache.upsert_alive(UDN, LOCATION, "nox", 1800, Some(7));

        // UPDATE announces the transition 7 -> 8
        assert!(!cache.apply_update(UDN, LOCATION, 7, 8));

        // the device now advertises BOOTID 8: expected, not a reboot
        assert_eq!(
            cache.upsert_alive(UDN, LOCATION, "nox", 1800, Some(8)),
            AliveOutcome::Refreshed
        );
    }

    #[test]
    fn test_unrelated_bootid_forces_redescription() {
        let mut cache = DiscoveryCache::new();
        cache.upsert_alive(UDN, LOCATION, "nox", 1800, Some(7));
        cache.attach_description(
            UDN,
            Arc::new(DeviceDescription {
                udn: UDN.to_string(),
                device_type: "urn:schemas-upnp-org:device:BinaryLight:1".to_string(),
                friendly_name: "Light".to_string(),
                manufacturer: "Nox".to_string(),
                model_name: "L1".to_string(),
                base_url: "http://192.168.1.10:8080".to_string(),
                services: vec![],
                embedded: vec![],
            }),
        );
        assert!(!cache.needs_description(UDN));

        // reboot without any UPDATE: BOOTID jumps to 42
        assert_eq!(
            cache.upsert_alive(UDN, LOCATION, "nox", 1800, Some(42)),
            AliveOutcome::Rebooted
        );
        assert!(cache.needs_description(UDN));
        assert!(cache.get(UDN).unwrap().description.is_none());
    }

    #[test]
    fn test_update_with_unrelated_bootid() {
        let mut cache = DiscoveryCache::new();
        cache.upsert_alive(UDN, LOCATION, "nox", 1800, Some(7));

        // UPDATE whose BOOTID matches neither current nor expected
        assert!(cache.apply_update(UDN, LOCATION, 42, 43));
        assert!(cache.needs_description(UDN));
    }
}
