//! Erreurs relatives aux actions UPnP.

use thiserror::Error;

/// Erreurs liées aux actions.
///
/// Les variantes portent le code d'erreur UPnP correspondant via
/// [`upnp_error_code`](ActionError::upnp_error_code) ; les codes vendeur
/// doivent tomber dans 600-899 (700-799 réservés au profil du device).
#[derive(Error, Debug)]
pub enum ActionError {
    /// Action déjà existante dans le service
    #[error("Action '{0}' already exists in service")]
    AlreadyExists(String),

    /// Argument déjà existant dans l'action
    #[error("Argument '{0}' already exists in action")]
    ArgumentAlreadyExists(String),

    /// Argument d'entrée manquant
    #[error("Missing input argument '{0}'")]
    MissingArgument(String),

    /// Argument non déclaré
    #[error("Unexpected argument '{0}'")]
    UnexpectedArgument(String),

    /// Valeur d'argument invalide
    #[error("Invalid value for argument '{name}': {reason}")]
    InvalidArgumentValue { name: String, reason: String },

    /// Échec de l'exécution
    #[error("Action failed: {0}")]
    Failed(String),

    /// Erreur définie par le service (600-899)
    #[error("UPnP error {code}: {description}")]
    Vendor { code: u32, description: String },
}

impl ActionError {
    /// Code d'erreur UPnP à placer dans le fault SOAP.
    pub fn upnp_error_code(&self) -> u32 {
        match self {
            ActionError::MissingArgument(_)
            | ActionError::UnexpectedArgument(_)
            | ActionError::InvalidArgumentValue { .. } => 402,
            ActionError::Vendor { code, .. } => *code,
            _ => 501,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ActionError::MissingArgument("x".to_string()).upnp_error_code(),
            402
        );
        assert_eq!(
            ActionError::Failed("boom".to_string()).upnp_error_code(),
            501
        );
        assert_eq!(
            ActionError::Vendor {
                code: 701,
                description: "Transition not available".to_string()
            }
            .upnp_error_code(),
            701
        );
    }
}
