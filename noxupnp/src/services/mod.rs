//! # Services UPnP
//!
//! Modèle d'un service : identifiant, type URN versionné, actions et
//! variables d'état, et dérivation des routes HTTP (description SCPD,
//! contrôle SOAP, souscription GENA).
//!
//! ## Invariants
//!
//! - Les noms d'actions et de variables sont uniques dans le service
//! - Chaque `relatedStateVariable` d'un argument résout vers une variable
//!   du même service

mod errors;

use std::sync::Arc;

use xmltree::{Element, XMLNode};

pub use errors::ServiceError;

use crate::actions::{Action, ActionSet};
use crate::state_variables::{StateVariable, StateVariableSet};
use crate::{UpnpObjectType, UpnpTyped};

/// Modèle d'un service UPnP.
#[derive(Debug, Clone)]
pub struct Service {
    object: UpnpObjectType,
    identifier: String,
    version: u8,
    vendor_domain: String,
    actions: ActionSet,
    variables: StateVariableSet,
}

impl UpnpTyped for Service {
    fn as_upnp_object_type(&self) -> &UpnpObjectType {
        &self.object
    }
}

impl Service {
    /// Crée un service. L'identifiant par défaut est le nom.
    pub fn new(name: String) -> Self {
        Self {
            object: UpnpObjectType::new(name.clone(), "Service"),
            identifier: name,
            version: 1,
            vendor_domain: "schemas-upnp-org".to_string(),
            actions: ActionSet::new(),
            variables: StateVariableSet::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn set_identifier(&mut self, identifier: String) {
        self.identifier = identifier;
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Définit la version du service.
    pub fn set_version(&mut self, version: u8) -> Result<(), ServiceError> {
        if version == 0 {
            return Err(ServiceError::InvalidVersion);
        }
        self.version = version;
        Ok(())
    }

    /// Domaine vendeur du type de service (défaut `schemas-upnp-org`).
    pub fn set_vendor_domain(&mut self, domain: String) {
        self.vendor_domain = domain;
    }

    /// Type de service UPnP.
    ///
    /// Format: `urn:{domain}:service:{name}:{version}`
    pub fn service_type(&self) -> String {
        format!(
            "urn:{}:service:{}:{}",
            self.vendor_domain,
            self.get_name(),
            self.version
        )
    }

    /// ID de service UPnP.
    ///
    /// Format: `urn:upnp-org:serviceId:{identifier}`
    pub fn service_id(&self) -> String {
        format!("urn:upnp-org:serviceId:{}", self.identifier)
    }

    /// Ajoute une action au service.
    pub fn add_action(&mut self, action: Arc<Action>) -> Result<(), ServiceError> {
        self.actions.insert(action).map_err(ServiceError::Action)
    }

    /// Ajoute une variable d'état au service.
    pub fn add_variable(&mut self, variable: Arc<StateVariable>) -> Result<(), ServiceError> {
        self.variables
            .insert(variable)
            .map_err(ServiceError::StateVariable)
    }

    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }

    pub fn variables(&self) -> &StateVariableSet {
        &self.variables
    }

    pub fn get_action(&self, name: &str) -> Option<Arc<Action>> {
        self.actions.get_by_name(name)
    }

    pub fn get_variable(&self, name: &str) -> Option<Arc<StateVariable>> {
        self.variables.get_by_name(name)
    }

    /// Validation à deux niveaux.
    ///
    /// Loose : identifiant et nom présents. Strict ajoute la résolution de
    /// chaque `relatedStateVariable` et la validité stricte des variables.
    pub fn is_valid(&self, strict: bool) -> bool {
        self.validate(strict).is_ok()
    }

    /// Variante diagnostique de [`is_valid`](Self::is_valid).
    pub fn validate(&self, strict: bool) -> Result<(), ServiceError> {
        if self.get_name().is_empty() || self.identifier.is_empty() {
            return Err(ServiceError::MissingIdentifier);
        }
        if !strict {
            return Ok(());
        }
        for action in self.actions.all() {
            for argument in action.arguments() {
                let var = argument.related_state_variable();
                if self.variables.get_by_name(var).is_none() {
                    return Err(ServiceError::UnresolvedStateVariable {
                        action: action.get_name().clone(),
                        argument: argument.get_name().clone(),
                        variable: var.to_string(),
                    });
                }
            }
        }
        for variable in self.variables.all() {
            if !variable.is_valid(true) {
                return Err(ServiceError::InvalidStateVariable(
                    variable.get_name().clone(),
                ));
            }
        }
        Ok(())
    }

    /// Retourne la route du service sous un device (chemin relatif).
    pub fn route(&self, device_route: &str) -> String {
        format!("{}/service/{}", device_route, self.get_name())
    }

    /// Route de contrôle SOAP.
    pub fn control_route(&self, device_route: &str) -> String {
        format!("{}/control", self.route(device_route))
    }

    /// Route de souscription aux événements.
    pub fn event_route(&self, device_route: &str) -> String {
        format!("{}/event", self.route(device_route))
    }

    /// Route de la description SCPD.
    pub fn scpd_route(&self, device_route: &str) -> String {
        format!("{}/desc.xml", self.route(device_route))
    }

    /// Génère l'élément XML SCPD (`<scpd>`).
    pub fn scpd_element(&self) -> Element {
        let mut elem = Element::new("scpd");
        elem.attributes.insert(
            "xmlns".to_string(),
            "urn:schemas-upnp-org:service-1-0".to_string(),
        );

        // specVersion
        let mut spec = Element::new("specVersion");
        let mut major = Element::new("major");
        major.children.push(XMLNode::Text("1".to_string()));
        spec.children.push(XMLNode::Element(major));

        let mut minor = Element::new("minor");
        minor.children.push(XMLNode::Text("0".to_string()));
        spec.children.push(XMLNode::Element(minor));

        elem.children.push(XMLNode::Element(spec));

        // actionList
        if !self.actions.is_empty() {
            elem.children
                .push(XMLNode::Element(self.actions.to_xml_element()));
        }

        // serviceStateTable
        if !self.variables.is_empty() {
            elem.children
                .push(XMLNode::Element(self.variables.to_xml_element()));
        }

        elem
    }

    /// Élément `<service>` pour la liste de services d'un device.
    pub fn to_xml_element(&self, device_route: &str) -> Element {
        let mut elem = Element::new("service");

        let mut service_type = Element::new("serviceType");
        service_type
            .children
            .push(XMLNode::Text(self.service_type()));
        elem.children.push(XMLNode::Element(service_type));

        let mut service_id = Element::new("serviceId");
        service_id.children.push(XMLNode::Text(self.service_id()));
        elem.children.push(XMLNode::Element(service_id));

        let mut scpd_url = Element::new("SCPDURL");
        scpd_url
            .children
            .push(XMLNode::Text(self.scpd_route(device_route)));
        elem.children.push(XMLNode::Element(scpd_url));

        let mut control_url = Element::new("controlURL");
        control_url
            .children
            .push(XMLNode::Text(self.control_route(device_route)));
        elem.children.push(XMLNode::Element(control_url));

        let mut event_sub_url = Element::new("eventSubURL");
        event_sub_url
            .children
            .push(XMLNode::Text(self.event_route(device_route)));
        elem.children.push(XMLNode::Element(event_sub_url));

        elem
    }
}
