//! Erreurs relatives aux services UPnP.

use thiserror::Error;

use crate::actions::ActionError;
use crate::state_variables::StateVariableError;

/// Erreurs liées aux services UPnP.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Identifiant ou nom manquant
    #[error("Service identifier is missing")]
    MissingIdentifier,

    /// Version invalide
    #[error("Service version must be > 0")]
    InvalidVersion,

    /// Un argument référence une variable absente du service
    #[error("Action '{action}' argument '{argument}' references unknown state variable '{variable}'")]
    UnresolvedStateVariable {
        action: String,
        argument: String,
        variable: String,
    },

    /// Variable invalide en validation stricte
    #[error("State variable '{0}' fails strict validation")]
    InvalidStateVariable(String),

    /// Erreur du sous-modèle action
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Erreur du sous-modèle variable
    #[error(transparent)]
    StateVariable(#[from] StateVariableError),
}
