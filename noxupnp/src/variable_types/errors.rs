//! Erreurs des valeurs typées.

use thiserror::Error;

use super::StateVarType;

/// Erreurs de parsing/coercion de valeurs.
#[derive(Error, Debug)]
pub enum StateValueError {
    /// La chaîne ne se parse pas vers le type déclaré
    #[error("Cannot parse '{raw}' as {value_type:?}")]
    ParseFailed {
        value_type: StateVarType,
        raw: String,
    },

    /// La valeur n'a pas le type attendu
    #[error("Expected a {expected:?} value, got {actual:?}")]
    TypeMismatch {
        expected: StateVarType,
        actual: StateVarType,
    },
}
