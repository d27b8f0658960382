//! Control-side device snapshots and event payloads.

use std::sync::Arc;
use std::time::Duration;

use noxupnp::variable_types::StateValue;

/// Stable identifier for a discovered device (lowercased UDN).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn from_udn(udn: &str) -> Self {
        Self(udn.trim().to_ascii_lowercase())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Endpoints of one service, as declared by the device description.
///
/// Paths are kept as published; resolve them against a device location
/// with [`resolve_url`](crate::discovery::resolve_url) when building a
/// request.
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub service_id: String,
    pub service_type: String,
    pub scpd_path: String,
    pub control_path: String,
    pub event_path: String,
}

/// Parsed device description, as returned by a
/// [`DescriptionProvider`](crate::discovery::DescriptionProvider).
#[derive(Debug, Clone)]
pub struct DeviceDescription {
    pub udn: String,
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    /// Base for relative paths: URLBase if present, else the fetch location
    pub base_url: String,
    pub services: Vec<ServiceEndpoints>,
    pub embedded: Vec<DeviceDescription>,
}

impl DeviceDescription {
    /// All services of the device tree, root first.
    pub fn all_services(&self) -> Vec<&ServiceEndpoints> {
        let mut services: Vec<&ServiceEndpoints> = self.services.iter().collect();
        for child in &self.embedded {
            services.extend(child.all_services());
        }
        services
    }

    /// Finds a service whose type matches, ignoring the version suffix.
    pub fn find_service(&self, service_type_prefix: &str) -> Option<&ServiceEndpoints> {
        let needle = service_type_prefix.to_ascii_lowercase();
        self.all_services()
            .into_iter()
            .find(|s| s.service_type.to_ascii_lowercase().starts_with(&needle))
    }
}

/// Immutable snapshot of a discovery-cache entry.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub udn: String,
    /// All LOCATION values seen for this device
    pub locations: Vec<String>,
    pub server: String,
    pub max_age: u32,
    pub boot_id: Option<u32>,
    /// Time left before cache expiry
    pub expires_in: Duration,
    pub description: Option<Arc<DeviceDescription>>,
}

impl DiscoveredDevice {
    pub fn id(&self) -> DeviceId {
        DeviceId::from_udn(&self.udn)
    }
}

/// One state-variable change delivered by the event sink.
#[derive(Debug, Clone)]
pub struct StateVarUpdate {
    pub sid: String,
    pub service_id: String,
    pub variable: String,
    pub value: StateValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(service_type: &str) -> ServiceEndpoints {
        ServiceEndpoints {
            service_id: "urn:upnp-org:serviceId:SwitchPower".to_string(),
            service_type: service_type.to_string(),
            scpd_path: "/service/SwitchPower/desc.xml".to_string(),
            control_path: "/service/SwitchPower/control".to_string(),
            event_path: "/service/SwitchPower/event".to_string(),
        }
    }

    #[test]
    fn test_device_id_normalizes_case() {
        assert_eq!(
            DeviceId::from_udn("UUID:ABCD"),
            DeviceId::from_udn("uuid:abcd")
        );
    }

    #[test]
    fn test_find_service_ignores_version() {
        let description = DeviceDescription {
            udn: "uuid:abcd".to_string(),
            device_type: "urn:schemas-upnp-org:device:BinaryLight:1".to_string(),
            friendly_name: "Light".to_string(),
            manufacturer: "Nox".to_string(),
            model_name: "L1".to_string(),
            base_url: "http://192.168.1.10:8080".to_string(),
            services: vec![endpoints("urn:schemas-upnp-org:service:SwitchPower:2")],
            embedded: vec![],
        };

        assert!(description
            .find_service("urn:schemas-upnp-org:service:SwitchPower")
            .is_some());
        assert!(description
            .find_service("urn:schemas-upnp-org:service:Dimming")
            .is_none());
    }

    #[test]
    fn test_all_services_walks_embedded() {
        let child = DeviceDescription {
            udn: "uuid:child".to_string(),
            device_type: "urn:schemas-upnp-org:device:DimmableLight:1".to_string(),
            friendly_name: "Child".to_string(),
            manufacturer: "Nox".to_string(),
            model_name: "C1".to_string(),
            base_url: "http://192.168.1.10:8080".to_string(),
            services: vec![endpoints("urn:schemas-upnp-org:service:Dimming:1")],
            embedded: vec![],
        };
        let root = DeviceDescription {
            udn: "uuid:root".to_string(),
            device_type: "urn:schemas-upnp-org:device:BinaryLight:1".to_string(),
            friendly_name: "Root".to_string(),
            manufacturer: "Nox".to_string(),
            model_name: "R1".to_string(),
            base_url: "http://192.168.1.10:8080".to_string(),
            services: vec![endpoints("urn:schemas-upnp-org:service:SwitchPower:1")],
            embedded: vec![child],
        };

        assert_eq!(root.all_services().len(), 2);
    }
}
