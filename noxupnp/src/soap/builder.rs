//! Construction de requêtes et réponses SOAP.

use xmltree::{Element, EmitterConfig, XMLNode};

/// Construit une requête d'action SOAP UPnP.
///
/// # Arguments
///
/// * `service_urn` - URN du service (ex: "urn:schemas-upnp-org:service:SwitchPower:1")
/// * `action` - Nom de l'action (ex: "SetTarget")
/// * `args` - Arguments IN, dans l'ordre déclaré
pub fn build_soap_request(
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<String, xmltree::Error> {
    let mut action_elem = Element::new(action);
    action_elem
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (name, value) in args {
        let mut child = Element::new(name);
        child.children.push(XMLNode::Text(value.to_string()));
        action_elem.children.push(XMLNode::Element(child));
    }

    serialize_envelope(action_elem)
}

/// Construit une réponse SOAP UPnP (`<u:ActionResponse>`).
///
/// # Arguments
///
/// * `service_urn` - URN du service
/// * `action` - Nom de l'action
/// * `values` - Arguments OUT, dans l'ordre déclaré
pub fn build_soap_response(
    service_urn: &str,
    action: &str,
    values: &[(String, String)],
) -> Result<String, xmltree::Error> {
    let response_name = format!("{}Response", action);
    let mut response_elem = Element::new(&response_name);
    response_elem
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (key, value) in values {
        let mut child = Element::new(key);
        child.children.push(XMLNode::Text(value.clone()));
        response_elem.children.push(XMLNode::Element(child));
    }

    serialize_envelope(response_elem)
}

/// Emballe un élément dans `<s:Envelope><s:Body>` et sérialise.
fn serialize_envelope(content: Element) -> Result<String, xmltree::Error> {
    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(content));

    let mut envelope = Element::new("s:Envelope");
    envelope.attributes.insert(
        "xmlns:s".to_string(),
        "http://schemas.xmlsoap.org/soap/envelope/".to_string(),
    );
    envelope.attributes.insert(
        "s:encodingStyle".to_string(),
        "http://schemas.xmlsoap.org/soap/encoding/".to_string(),
    );
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .perform_indent(true)
        .indent_string("  ");
    envelope.write_with_config(&mut buf, config)?;

    Ok(String::from_utf8(buf).unwrap())
}
