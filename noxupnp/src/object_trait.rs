//! Identité commune des objets UPnP.
//!
//! Chaque objet du modèle (device, service, action, variable) porte un
//! [`UpnpObjectType`] : son nom et sa catégorie d'objet. Le trait
//! [`UpnpTyped`] fournit les accesseurs communs.

/// Nom et catégorie d'un objet UPnP.
#[derive(Debug, Clone)]
pub struct UpnpObjectType {
    pub(crate) name: String,
    pub(crate) object_type: String,
}

impl UpnpObjectType {
    /// Crée un nouveau descripteur d'objet.
    pub fn new(name: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            object_type: object_type.into(),
        }
    }
}

/// Trait pour les objets UPnP typés.
///
/// # Méthodes fournies
///
/// - [`get_name`](Self::get_name) : Récupère le nom de l'objet
/// - [`get_object_type`](Self::get_object_type) : Récupère la catégorie de l'objet
pub trait UpnpTyped {
    /// Retourne une référence vers le type de l'objet.
    fn as_upnp_object_type(&self) -> &UpnpObjectType;

    /// Retourne le nom de l'objet.
    fn get_name(&self) -> &String {
        &self.as_upnp_object_type().name
    }

    /// Retourne la catégorie de l'objet (ex: "Device", "Service").
    fn get_object_type(&self) -> &String {
        &self.as_upnp_object_type().object_type
    }
}
