//! # Hébergement de devices
//!
//! Côté device host : dispatch des actions SOAP, gestion des
//! souscriptions GENA et composition du host complet.
//!
//! ## Architecture
//!
//! - [`ServiceState`] : valeurs courantes des variables d'un service,
//!   partagées avec les handlers d'actions
//! - [`ServiceHost`] : SCPD + dispatcher SOAP + souscriptions d'un service
//! - [`DeviceHost`] : composeur (modèle, routes HTTP, SSDP, arrêt propre)

mod device_host;
mod errors;
mod service_host;

pub use device_host::{DeviceHost, HostCapabilities, HostConfiguration};
pub use errors::HostError;
pub use service_host::{EventSubOutcome, ServiceHost, ServiceState, SubscriptionPolicy};

use xmltree::{Element, EmitterConfig};

/// Sérialise un élément en document XML indenté.
pub(crate) fn element_to_xml(elem: &Element) -> String {
    let config = EmitterConfig::new()
        .perform_indent(true)
        .indent_string("  ");

    let mut buf = Vec::new();
    elem.write_with_config(&mut buf, config)
        .expect("XML serialization to a Vec cannot fail");
    String::from_utf8(buf).expect("XML emitter produces UTF-8")
}
