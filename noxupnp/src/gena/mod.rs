//! # Module GENA - General Event Notification Architecture
//!
//! Codec des messages d'événements UPnP : corps `<e:propertyset>` des
//! NOTIFY et en-têtes de souscription (`TIMEOUT`, `CALLBACK`).
//!
//! ## Fonctionnalités
//!
//! - ✅ Construction/parsing de propertysets
//! - ✅ Parsing des en-têtes `TIMEOUT: Second-N` / `infinite`
//! - ✅ Parsing de la liste d'URLs `CALLBACK: <url1><url2>`

use std::io::Cursor;
use std::time::Duration;

use thiserror::Error;
use xmltree::{Element, EmitterConfig, XMLNode};

/// En-tête NT des messages d'événement.
pub const NT_EVENT: &str = "upnp:event";

/// En-tête NTS des NOTIFY d'événement.
pub const NTS_PROPCHANGE: &str = "upnp:propchange";

/// Timeout de souscription par défaut (UDA).
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(1800);

const EVENT_NS: &str = "urn:schemas-upnp-org:event-1-0";

/// Erreur de décodage GENA.
#[derive(Error, Debug)]
pub enum GenaError {
    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("Body is not an e:propertyset")]
    NotAPropertySet,
}

/// Construit le corps `<e:propertyset>` d'un NOTIFY.
///
/// Une `<e:property>` par variable, dans l'ordre fourni. Les valeurs sont
/// échappées par l'émetteur XML.
pub fn build_property_set(properties: &[(String, String)]) -> String {
    let mut propertyset = Element::new("e:propertyset");
    propertyset
        .attributes
        .insert("xmlns:e".to_string(), EVENT_NS.to_string());

    for (name, value) in properties {
        let mut property = Element::new("e:property");
        let mut variable = Element::new(name);
        variable.children.push(XMLNode::Text(value.clone()));
        property.children.push(XMLNode::Element(variable));
        propertyset.children.push(XMLNode::Element(property));
    }

    let mut buf = Vec::new();
    let config = EmitterConfig::new().perform_indent(false);
    propertyset
        .write_with_config(&mut buf, config)
        .expect("propertyset serialization cannot fail on a Vec");
    String::from_utf8(buf).expect("XML emitter produces UTF-8")
}

/// Parse le corps d'un NOTIFY en liste ordonnée (variable, valeur).
pub fn parse_property_set(body: &[u8]) -> Result<Vec<(String, String)>, GenaError> {
    let root = Element::parse(Cursor::new(body))?;
    if !root.name.ends_with("propertyset") {
        return Err(GenaError::NotAPropertySet);
    }

    let mut properties = Vec::new();
    for property in root.children.iter().filter_map(|n| n.as_element()) {
        if !property.name.ends_with("property") {
            continue;
        }
        for variable in property.children.iter().filter_map(|n| n.as_element()) {
            properties.push((
                variable.name.clone(),
                variable.get_text().unwrap_or_default().to_string(),
            ));
        }
    }

    Ok(properties)
}

/// Parse un en-tête `TIMEOUT: Second-N` (ou `Second-infinite`).
///
/// `Second-infinite` retourne `None` : c'est l'appelant qui choisit la
/// durée qu'il accorde à l'infini.
pub fn parse_timeout_header(raw: &str) -> Option<Duration> {
    let lower = raw.trim().to_ascii_lowercase();
    if lower == "infinite" || lower == "second-infinite" {
        return None;
    }
    let idx = lower.find("second-")?;
    let number = &lower[idx + 7..];
    number.parse::<u64>().ok().map(Duration::from_secs)
}

/// Formate un en-tête `TIMEOUT`.
pub fn format_timeout_header(timeout: Duration) -> String {
    format!("Second-{}", timeout.as_secs())
}

/// Parse un en-tête `CALLBACK: <url1><url2>` en liste d'URLs.
pub fn parse_callback_header(raw: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut rest = raw.trim();
    while let Some(start) = rest.find('<') {
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        let url = rest[start + 1..start + end].trim();
        if !url.is_empty() {
            urls.push(url.to_string());
        }
        rest = &rest[start + end + 1..];
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_set_roundtrip() {
        let properties = vec![
            ("Status".to_string(), "1".to_string()),
            ("Target".to_string(), "0".to_string()),
        ];
        let body = build_property_set(&properties);
        assert!(body.contains("e:propertyset"));

        let parsed = parse_property_set(body.as_bytes()).unwrap();
        assert_eq!(parsed, properties);
    }

    #[test]
    fn test_empty_property_set() {
        let body = build_property_set(&[]);
        let parsed = parse_property_set(body.as_bytes()).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_values_are_escaped() {
        let properties = vec![(
            "CurrentTrackMetaData".to_string(),
            "<DIDL-Lite>&amp;</DIDL-Lite>".to_string(),
        )];
        let body = build_property_set(&properties);
        let parsed = parse_property_set(body.as_bytes()).unwrap();
        assert_eq!(parsed, properties);
    }

    #[test]
    fn test_parse_foreign_propertyset() {
        // forme émise par d'autres stacks : préfixe différent, indentation
        let body = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property>
    <SystemUpdateID>512</SystemUpdateID>
  </e:property>
</e:propertyset>"#;
        let parsed = parse_property_set(body.as_bytes()).unwrap();
        assert_eq!(
            parsed,
            vec![("SystemUpdateID".to_string(), "512".to_string())]
        );
    }

    #[test]
    fn test_not_a_propertyset() {
        assert!(matches!(
            parse_property_set(b"<html></html>"),
            Err(GenaError::NotAPropertySet)
        ));
    }

    #[test]
    fn test_timeout_header() {
        assert_eq!(
            parse_timeout_header("Second-1800"),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(
            parse_timeout_header("second-300"),
            Some(Duration::from_secs(300))
        );
        assert_eq!(parse_timeout_header("Second-infinite"), None);
        assert_eq!(parse_timeout_header("garbage"), None);
        assert_eq!(format_timeout_header(Duration::from_secs(300)), "Second-300");
    }

    #[test]
    fn test_callback_header() {
        assert_eq!(
            parse_callback_header("<http://192.168.1.20:4321/cb>"),
            vec!["http://192.168.1.20:4321/cb".to_string()]
        );
        assert_eq!(
            parse_callback_header("<http://a/cb><http://b/cb>"),
            vec!["http://a/cb".to_string(), "http://b/cb".to_string()]
        );
        assert!(parse_callback_header("no brackets").is_empty());
    }
}
