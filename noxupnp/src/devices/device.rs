//! Définition du modèle Device UPnP.

use std::sync::Arc;

use uuid::Uuid;
use xmltree::{Element, XMLNode};

use crate::services::Service;
use crate::{UpnpObjectType, UpnpTyped};

use super::errors::DeviceError;

/// Modèle d'un device UPnP.
///
/// Porte l'UDN, le type versionné, les métadonnées descriptives et les
/// services. Les sous-devices vivent dans le
/// [`DeviceTree`](super::DeviceTree), pas ici.
#[derive(Debug, Clone)]
pub struct Device {
    /// Métadonnées de l'objet
    object: UpnpObjectType,

    /// Type de device UPnP (ex: "BinaryLight", "MediaRenderer")
    device_type: String,

    /// Version du device
    version: u8,

    /// UDN (Unique Device Name), préfixé `uuid:`
    udn: String,

    /// Nom convivial du device
    friendly_name: String,

    /// Fabricant
    manufacturer: String,

    /// URL du fabricant
    manufacturer_url: Option<String>,

    /// Description du modèle
    model_description: Option<String>,

    /// Nom du modèle
    model_name: String,

    /// Numéro du modèle
    model_number: Option<String>,

    /// Numéro de série
    serial_number: Option<String>,

    /// URL de présentation
    presentation_url: Option<String>,

    /// Services du device
    services: Vec<Arc<Service>>,
}

impl UpnpTyped for Device {
    fn as_upnp_object_type(&self) -> &UpnpObjectType {
        &self.object
    }
}

impl Device {
    /// Crée un nouveau modèle de device avec un UDN fraîchement généré.
    ///
    /// # Arguments
    ///
    /// * `name` - Nom unique du device (utilisé dans les routes)
    /// * `device_type` - Type UPnP du device
    /// * `friendly_name` - Nom convivial pour l'utilisateur
    pub fn new(name: String, device_type: String, friendly_name: String) -> Self {
        Self {
            object: UpnpObjectType::new(name.clone(), "Device"),
            device_type,
            version: 1,
            udn: format!("uuid:{}", Uuid::new_v4()),
            friendly_name,
            manufacturer: String::new(),
            manufacturer_url: None,
            model_description: None,
            model_name: name,
            model_number: None,
            serial_number: None,
            presentation_url: None,
            services: Vec::new(),
        }
    }

    /// Type de device UPnP.
    ///
    /// Format: `urn:schemas-upnp-org:device:{type}:{version}`
    pub fn device_type(&self) -> String {
        format!(
            "urn:schemas-upnp-org:device:{}:{}",
            self.device_type, self.version
        )
    }

    pub fn device_category(&self) -> &str {
        &self.device_type
    }

    /// Définit la version du device.
    pub fn set_version(&mut self, version: u8) -> Result<(), DeviceError> {
        if version == 0 {
            return Err(DeviceError::InvalidVersion);
        }
        self.version = version;
        Ok(())
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn udn(&self) -> &str {
        &self.udn
    }

    /// Remplace l'UDN. La valeur doit être préfixée `uuid:`.
    pub fn set_udn(&mut self, udn: String) -> Result<(), DeviceError> {
        if !udn.starts_with("uuid:") || udn.len() <= "uuid:".len() {
            return Err(DeviceError::InvalidUdn(udn));
        }
        self.udn = udn;
        Ok(())
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn set_manufacturer(&mut self, manufacturer: String) {
        self.manufacturer = manufacturer;
    }

    pub fn manufacturer_url(&self) -> Option<&str> {
        self.manufacturer_url.as_deref()
    }

    pub fn set_manufacturer_url(&mut self, url: String) {
        self.manufacturer_url = Some(url);
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn set_model_name(&mut self, name: String) {
        self.model_name = name;
    }

    pub fn model_description(&self) -> Option<&str> {
        self.model_description.as_deref()
    }

    pub fn set_model_description(&mut self, description: String) {
        self.model_description = Some(description);
    }

    pub fn model_number(&self) -> Option<&str> {
        self.model_number.as_deref()
    }

    pub fn set_model_number(&mut self, number: String) {
        self.model_number = Some(number);
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn set_serial_number(&mut self, serial: String) {
        self.serial_number = Some(serial);
    }

    pub fn presentation_url(&self) -> Option<&str> {
        self.presentation_url.as_deref()
    }

    pub fn set_presentation_url(&mut self, url: String) {
        self.presentation_url = Some(url);
    }

    /// Ajoute un service au device.
    ///
    /// # Errors
    ///
    /// Retourne une erreur si un service avec le même identifiant existe déjà.
    pub fn add_service(&mut self, service: Arc<Service>) -> Result<(), DeviceError> {
        if self
            .services
            .iter()
            .any(|s| s.identifier() == service.identifier())
        {
            return Err(DeviceError::ServiceAlreadyExists(
                service.identifier().to_string(),
            ));
        }
        self.services.push(service);
        Ok(())
    }

    /// Retourne tous les services.
    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    /// Retourne un service par identifiant.
    pub fn get_service(&self, identifier: &str) -> Option<Arc<Service>> {
        self.services
            .iter()
            .find(|s| s.identifier() == identifier)
            .cloned()
    }

    /// Validation à deux niveaux.
    ///
    /// Loose : UDN bien formé et type présent. Strict ajoute les champs
    /// descriptifs obligatoires (UDA) et la validité stricte des services.
    pub fn is_valid(&self, strict: bool) -> bool {
        if !self.udn.starts_with("uuid:") || self.device_type.is_empty() || self.version == 0 {
            return false;
        }
        if !strict {
            return true;
        }
        if self.friendly_name.is_empty() || self.manufacturer.is_empty() || self.model_name.is_empty()
        {
            return false;
        }
        self.services.iter().all(|s| s.is_valid(true))
    }

    /// Route HTTP du device.
    pub fn route(&self) -> String {
        format!("/device/{}", self.get_name())
    }

    /// Élément `<device>` de la description, sans la deviceList (ajoutée
    /// par le [`DeviceTree`](super::DeviceTree)).
    pub(crate) fn description_element(&self) -> Element {
        let mut elem = Element::new("device");

        let push_text = |elem: &mut Element, name: &str, value: &str| {
            let mut child = Element::new(name);
            child.children.push(XMLNode::Text(value.to_string()));
            elem.children.push(XMLNode::Element(child));
        };

        push_text(&mut elem, "deviceType", &self.device_type());
        push_text(&mut elem, "friendlyName", &self.friendly_name);
        push_text(&mut elem, "manufacturer", &self.manufacturer);
        if let Some(url) = &self.manufacturer_url {
            push_text(&mut elem, "manufacturerURL", url);
        }
        if let Some(desc) = &self.model_description {
            push_text(&mut elem, "modelDescription", desc);
        }
        push_text(&mut elem, "modelName", &self.model_name);
        if let Some(number) = &self.model_number {
            push_text(&mut elem, "modelNumber", number);
        }
        if let Some(serial) = &self.serial_number {
            push_text(&mut elem, "serialNumber", serial);
        }
        push_text(&mut elem, "UDN", &self.udn);
        if let Some(url) = &self.presentation_url {
            push_text(&mut elem, "presentationURL", url);
        }

        if !self.services.is_empty() {
            let mut list = Element::new("serviceList");
            for service in &self.services {
                list.children
                    .push(XMLNode::Element(service.to_xml_element(&self.route())));
            }
            elem.children.push(XMLNode::Element(list));
        }

        elem
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Device({}:{})", self.get_name(), self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_device_has_valid_udn() {
        let device = Device::new(
            "light".to_string(),
            "BinaryLight".to_string(),
            "Desk Light".to_string(),
        );
        assert!(device.udn().starts_with("uuid:"));
        assert_eq!(
            device.device_type(),
            "urn:schemas-upnp-org:device:BinaryLight:1"
        );
    }

    #[test]
    fn test_set_udn_validation() {
        let mut device = Device::new(
            "light".to_string(),
            "BinaryLight".to_string(),
            "Desk Light".to_string(),
        );
        assert!(device.set_udn("not-a-udn".to_string()).is_err());
        assert!(device.set_udn("uuid:".to_string()).is_err());
        assert!(device
            .set_udn("uuid:2fac1234-31f8-11b4-a222-08002b34c003".to_string())
            .is_ok());
    }

    #[test]
    fn test_strict_validation_requires_metadata() {
        let mut device = Device::new(
            "light".to_string(),
            "BinaryLight".to_string(),
            "Desk Light".to_string(),
        );
        // pas de fabricant : loose passe, strict échoue
        assert!(device.is_valid(false));
        assert!(!device.is_valid(true));

        device.set_manufacturer("Nox".to_string());
        assert!(device.is_valid(true));
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let mut device = Device::new(
            "light".to_string(),
            "BinaryLight".to_string(),
            "Desk Light".to_string(),
        );
        let service = Arc::new(Service::new("SwitchPower".to_string()));
        device.add_service(service.clone()).unwrap();
        assert!(matches!(
            device.add_service(service),
            Err(DeviceError::ServiceAlreadyExists(_))
        ));
    }
}
