//! Erreurs d'initialisation et d'exécution du device host.

use thiserror::Error;

use crate::services::ServiceError;

/// Erreurs du device host.
///
/// La taxonomie distingue la configuration, la description et la couche
/// réseau ; un échec d'initialisation est fatal.
#[derive(Error, Debug)]
pub enum HostError {
    /// Configuration incorrecte
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Description de device ou de service invalide
    #[error("Invalid description: {0}")]
    InvalidDescription(String),

    /// Échec de la couche réseau (bind HTTP, socket SSDP)
    #[error("Communications error: {0}")]
    Communications(#[from] std::io::Error),

    /// Host déjà démarré
    #[error("Device host is already started")]
    AlreadyStarted,

    /// Erreur du modèle de service
    #[error(transparent)]
    Service(#[from] ServiceError),
}
