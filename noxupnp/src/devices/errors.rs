//! Erreurs relatives aux devices UPnP.

use thiserror::Error;

/// Erreurs liées aux devices UPnP.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Service déjà existant
    #[error("Service '{0}' already exists in device")]
    ServiceAlreadyExists(String),

    /// Device déjà existant (UDN dupliqué)
    #[error("Device '{0}' already exists")]
    DeviceAlreadyExists(String),

    /// Version invalide
    #[error("Device version must be > 0")]
    InvalidVersion,

    /// UDN mal formé
    #[error("Invalid UDN '{0}': expected uuid:<value>")]
    InvalidUdn(String),

    /// Index d'arène inconnu
    #[error("Unknown device node index {0}")]
    UnknownNode(usize),

    /// Profondeur maximale dépassée
    #[error("Device tree exceeds maximum depth of {0}")]
    TreeTooDeep(usize),
}
