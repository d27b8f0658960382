//! Parser SOAP pour actions UPnP.

use std::io::BufReader;

use xmltree::Element;

use super::{SoapBody, SoapEnvelope, SoapHeader};

/// Action UPnP extraite d'une enveloppe SOAP.
///
/// Les arguments sont dans l'ordre d'apparition sur le fil, qui est
/// l'ordre de déclaration de l'action.
#[derive(Debug, Clone)]
pub struct SoapAction {
    /// Nom de l'action (ex: "Play", "SetTarget")
    pub name: String,

    /// Namespace de l'action (ex: "urn:schemas-upnp-org:service:SwitchPower:1")
    pub namespace: Option<String>,

    /// Arguments de l'action, ordonnés
    pub args: Vec<(String, String)>,
}

impl SoapAction {
    /// Valeur d'un argument par nom.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Erreur de parsing SOAP.
#[derive(Debug, thiserror::Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    XmlError(#[from] xmltree::ParseError),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,

    #[error("No action found in SOAP Body")]
    NoAction,
}

/// Parse une action SOAP à partir de bytes XML.
pub fn parse_soap_action(xml: &[u8]) -> Result<SoapAction, SoapParseError> {
    let envelope = parse_soap_envelope(xml)?;
    extract_action_from_body(&envelope.body)
}

/// Parse une enveloppe SOAP complète.
pub fn parse_soap_envelope(xml: &[u8]) -> Result<SoapEnvelope, SoapParseError> {
    let reader = BufReader::new(xml);
    let root = Element::parse(reader)?;

    // Vérifier que c'est bien une Envelope
    if !root.name.ends_with("Envelope") {
        return Err(SoapParseError::MissingEnvelope);
    }

    // Extraire Header (optionnel)
    let header = root
        .children
        .iter()
        .find_map(|n| n.as_element())
        .filter(|e| e.name.ends_with("Header"))
        .map(|e| SoapHeader { content: e.clone() });

    // Extraire Body (obligatoire)
    let body_elem = root
        .children
        .iter()
        .find_map(|n| n.as_element().filter(|e| e.name.ends_with("Body")))
        .ok_or(SoapParseError::MissingBody)?;

    let body = SoapBody {
        content: body_elem.clone(),
    };

    Ok(SoapEnvelope { header, body })
}

/// Extrait l'action UPnP du corps SOAP.
fn extract_action_from_body(body: &SoapBody) -> Result<SoapAction, SoapParseError> {
    // Le Body contient un élément enfant qui est l'action
    // Format: <u:ActionName xmlns:u="service-urn">...</u:ActionName>

    let action_elem = body.first_element().ok_or(SoapParseError::NoAction)?;

    Ok(SoapAction {
        name: action_elem.name.clone(),
        namespace: action_elem.namespace.clone(),
        args: child_args(action_elem),
    })
}

/// Extrait les arguments de sortie d'une réponse `<ActionNameResponse>`.
///
/// Retourne `None` si le corps ne contient pas l'élément de réponse
/// attendu (cas d'un fault, par exemple).
pub fn extract_action_response(
    envelope: &SoapEnvelope,
    action: &str,
) -> Option<Vec<(String, String)>> {
    let expected = format!("{}Response", action);
    let response = envelope
        .body
        .first_element()
        .filter(|e| e.name == expected)?;
    Some(child_args(response))
}

/// Enfants directs d'un élément, comme paires (nom, texte), ordonnés.
fn child_args(elem: &Element) -> Vec<(String, String)> {
    elem.children
        .iter()
        .filter_map(|n| n.as_element())
        .map(|e| {
            (
                e.name.clone(),
                e.get_text().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_action() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:SetTarget xmlns:u="urn:schemas-upnp-org:service:SwitchPower:1">
      <newTargetValue>1</newTargetValue>
    </u:SetTarget>
  </s:Body>
</s:Envelope>"#;

        let action = parse_soap_action(xml.as_bytes()).unwrap();
        assert_eq!(action.name, "SetTarget");
        assert_eq!(
            action.namespace,
            Some("urn:schemas-upnp-org:service:SwitchPower:1".to_string())
        );
        assert_eq!(action.arg("newTargetValue"), Some("1"));
    }

    #[test]
    fn test_parse_action_no_args() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:Stop xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"/>
  </s:Body>
</s:Envelope>"#;

        let action = parse_soap_action(xml.as_bytes()).unwrap();
        assert_eq!(action.name, "Stop");
        assert!(action.args.is_empty());
    }

    #[test]
    fn test_argument_order_preserved() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:SetAVTransportURI xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
      <InstanceID>0</InstanceID>
      <CurrentURI>http://example.test/a.flac</CurrentURI>
      <CurrentURIMetaData></CurrentURIMetaData>
    </u:SetAVTransportURI>
  </s:Body>
</s:Envelope>"#;

        let action = parse_soap_action(xml.as_bytes()).unwrap();
        let names: Vec<&str> = action.args.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["InstanceID", "CurrentURI", "CurrentURIMetaData"]);
    }

    #[test]
    fn test_extract_response_args() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetTargetResponse xmlns:u="urn:schemas-upnp-org:service:SwitchPower:1">
      <RetTargetValue>1</RetTargetValue>
    </u:GetTargetResponse>
  </s:Body>
</s:Envelope>"#;

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let args = extract_action_response(&envelope, "GetTarget").unwrap();
        assert_eq!(args, vec![("RetTargetValue".to_string(), "1".to_string())]);
        assert!(extract_action_response(&envelope, "SetTarget").is_none());
    }

    #[test]
    fn test_missing_body() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"></s:Envelope>"#;
        assert!(matches!(
            parse_soap_envelope(xml.as_bytes()),
            Err(SoapParseError::MissingBody)
        ));
    }
}
