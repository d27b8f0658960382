//! Description fetch and parse.

use std::io::BufReader;
use std::time::Duration;

use tracing::debug;
use ureq::Agent;
use xmltree::Element;

use crate::errors::ControlError;
use crate::model::{DeviceDescription, ServiceEndpoints};

/// Pluggable parser: turns a LOCATION URL into the typed device model.
pub trait DescriptionProvider: Send + Sync {
    fn fetch(&self, location: &str) -> Result<DeviceDescription, ControlError>;
}

/// Default provider: HTTP GET with `ureq`, XML via `xmltree`.
pub struct HttpXmlDescriptionProvider {
    timeout: Duration,
}

impl HttpXmlDescriptionProvider {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }
}

impl DescriptionProvider for HttpXmlDescriptionProvider {
    fn fetch(&self, location: &str) -> Result<DeviceDescription, ControlError> {
        debug!("Fetching description at {}", location);

        let config = Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build();
        let agent: Agent = config.into();

        let response = agent
            .get(location)
            .call()
            .map_err(|e| ControlError::Transport(format!("GET {}: {}", location, e)))?;

        let (_parts, body) = response.into_parts();
        let reader = BufReader::new(body.into_reader());
        let root = Element::parse(reader)
            .map_err(|e| ControlError::InvalidDescription(format!("{}: {}", location, e)))?;

        parse_description_document(&root, location)
    }
}

/// Parses a `<root>` description document.
pub fn parse_description_document(
    root: &Element,
    location: &str,
) -> Result<DeviceDescription, ControlError> {
    let base_url = child_text(root, "URLBase").unwrap_or_else(|| location.to_string());
    let device = root
        .get_child("device")
        .ok_or_else(|| ControlError::InvalidDescription("missing <device>".to_string()))?;
    parse_device_element(device, &base_url)
}

fn parse_device_element(
    device: &Element,
    base_url: &str,
) -> Result<DeviceDescription, ControlError> {
    let udn = child_text(device, "UDN")
        .ok_or_else(|| ControlError::InvalidDescription("missing <UDN>".to_string()))?;
    let device_type = child_text(device, "deviceType")
        .ok_or_else(|| ControlError::InvalidDescription("missing <deviceType>".to_string()))?;

    let mut services = Vec::new();
    if let Some(list) = device.get_child("serviceList") {
        for service in xml_children(list) {
            if service.name != "service" {
                continue;
            }
            let Some(service_type) = child_text(service, "serviceType") else {
                continue;
            };
            let Some(service_id) = child_text(service, "serviceId") else {
                continue;
            };
            services.push(ServiceEndpoints {
                service_id,
                service_type,
                scpd_path: child_text(service, "SCPDURL").unwrap_or_default(),
                control_path: child_text(service, "controlURL").unwrap_or_default(),
                event_path: child_text(service, "eventSubURL").unwrap_or_default(),
            });
        }
    }

    let mut embedded = Vec::new();
    if let Some(list) = device.get_child("deviceList") {
        for child in xml_children(list) {
            if child.name == "device" {
                embedded.push(parse_device_element(child, base_url)?);
            }
        }
    }

    Ok(DeviceDescription {
        udn,
        device_type,
        friendly_name: child_text(device, "friendlyName").unwrap_or_default(),
        manufacturer: child_text(device, "manufacturer").unwrap_or_default(),
        model_name: child_text(device, "modelName").unwrap_or_default(),
        base_url: base_url.to_string(),
        services,
        embedded,
    })
}

/// Resolves a possibly-relative path against a base URL.
pub fn resolve_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    match url::Url::parse(base).and_then(|b| b.join(path)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => {
            // best effort: concatenate on the authority
            let trimmed = base.trim_end_matches('/');
            if path.starts_with('/') {
                format!("{}{}", trimmed, path)
            } else {
                format!("{}/{}", trimmed, path)
            }
        }
    }
}

/// Helper to iterate over XML element children (filters out non-element nodes).
fn xml_children(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        xmltree::XMLNode::Element(elem) => Some(elem),
        _ => None,
    })
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name)
        .and_then(|child| child.get_text().map(|cow| cow.trim().to_string()))
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:BinaryLight:1</deviceType>
    <friendlyName>Desk Light</friendlyName>
    <manufacturer>Nox</manufacturer>
    <modelName>L1</modelName>
    <UDN>uuid:2fac1234-31f8-11b4-a222-08002b34c003</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:SwitchPower:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:SwitchPower</serviceId>
        <SCPDURL>/device/light/service/SwitchPower/desc.xml</SCPDURL>
        <controlURL>/device/light/service/SwitchPower/control</controlURL>
        <eventSubURL>/device/light/service/SwitchPower/event</eventSubURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:DimmableLight:1</deviceType>
        <friendlyName>Dimmer</friendlyName>
        <manufacturer>Nox</manufacturer>
        <modelName>D1</modelName>
        <UDN>uuid:aaaa1234-31f8-11b4-a222-08002b34c003</UDN>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn test_parse_description() {
        let root = Element::parse(DESCRIPTION.as_bytes()).unwrap();
        let description =
            parse_description_document(&root, "http://192.168.1.10:8080/desc.xml").unwrap();

        assert_eq!(
            description.udn,
            "uuid:2fac1234-31f8-11b4-a222-08002b34c003"
        );
        assert_eq!(description.friendly_name, "Desk Light");
        assert_eq!(description.services.len(), 1);
        assert_eq!(description.embedded.len(), 1);
        assert_eq!(
            description.services[0].control_path,
            "/device/light/service/SwitchPower/control"
        );
        // no URLBase: the fetch location is the base
        assert_eq!(description.base_url, "http://192.168.1.10:8080/desc.xml");
    }

    #[test]
    fn test_missing_udn_is_invalid() {
        let xml = r#"<root><device><deviceType>x</deviceType></device></root>"#;
        let root = Element::parse(xml.as_bytes()).unwrap();
        assert!(matches!(
            parse_description_document(&root, "http://h/desc.xml"),
            Err(ControlError::InvalidDescription(_))
        ));
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("http://192.168.1.10:8080/desc.xml", "/control"),
            "http://192.168.1.10:8080/control"
        );
        assert_eq!(
            resolve_url("http://192.168.1.10:8080/a/desc.xml", "control"),
            "http://192.168.1.10:8080/a/control"
        );
        assert_eq!(
            resolve_url("http://h/desc.xml", "http://other/control"),
            "http://other/control"
        );
    }
}
