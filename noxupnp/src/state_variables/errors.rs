//! Erreurs relatives aux variables d'état.

use thiserror::Error;

use crate::variable_types::StateVarType;

/// Erreurs liées aux variables d'état UPnP.
#[derive(Error, Debug)]
pub enum StateVariableError {
    /// Variable déjà existante
    #[error("State variable '{0}' already exists in service")]
    AlreadyExists(String),

    /// Variable inconnue
    #[error("Unknown state variable '{0}'")]
    Unknown(String),

    /// Type de valeur incompatible
    #[error("Variable '{variable}' expects {expected:?}, got {actual:?}")]
    TypeMismatch {
        variable: String,
        expected: StateVarType,
        actual: StateVarType,
    },

    /// Valeur hors liste autorisée
    #[error("Value '{value}' is not allowed for variable '{variable}'")]
    ValueNotAllowed { variable: String, value: String },

    /// Valeur hors plage
    #[error("Value '{value}' is out of range for variable '{variable}'")]
    ValueOutOfRange { variable: String, value: String },
}
