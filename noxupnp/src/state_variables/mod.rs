//! # Variables d'état UPnP
//!
//! Modèle des variables d'état d'un service : type de donnée, valeur par
//! défaut, valeurs/plage autorisées et drapeau `sendEvents`.
//!
//! La validation est à deux niveaux :
//!
//! - **strict** : conforme UDA, tous les champs obligatoires cohérents
//! - **loose** : nom et type présents (messages de pairs non conformes)

mod errors;

use std::collections::HashMap;
use std::sync::Arc;

use xmltree::{Element, XMLNode};

pub use errors::StateVariableError;

use crate::value_ranges::ValueRange;
use crate::variable_types::{StateValue, StateVarType};
use crate::{UpnpObjectType, UpnpTyped};

/// Modèle d'une variable d'état.
#[derive(Debug, Clone)]
pub struct StateVariable {
    object: UpnpObjectType,
    value_type: StateVarType,
    default_value: Option<StateValue>,
    value_range: Option<ValueRange>,
    allowed_values: Vec<String>,
    send_events: bool,
}

impl UpnpTyped for StateVariable {
    fn as_upnp_object_type(&self) -> &UpnpObjectType {
        &self.object
    }
}

impl StateVariable {
    /// Crée une variable d'état du type donné. `sendEvents` vaut `false`
    /// par défaut.
    pub fn new(name: impl Into<String>, value_type: StateVarType) -> Self {
        Self {
            object: UpnpObjectType::new(name, "StateVariable"),
            value_type,
            default_value: None,
            value_range: None,
            allowed_values: Vec::new(),
            send_events: false,
        }
    }

    pub fn value_type(&self) -> StateVarType {
        self.value_type
    }

    pub fn is_sending_events(&self) -> bool {
        self.send_events
    }

    /// Active la publication GENA des changements.
    pub fn set_send_events(&mut self, send_events: bool) {
        self.send_events = send_events;
    }

    pub fn default_value(&self) -> Option<&StateValue> {
        self.default_value.as_ref()
    }

    pub fn set_default_value(&mut self, value: StateValue) {
        self.default_value = Some(value);
    }

    pub fn value_range(&self) -> Option<&ValueRange> {
        self.value_range.as_ref()
    }

    pub fn set_value_range(&mut self, range: ValueRange) {
        self.value_range = Some(range);
    }

    pub fn allowed_values(&self) -> &[String] {
        &self.allowed_values
    }

    pub fn set_allowed_values(&mut self, values: Vec<String>) {
        self.allowed_values = values;
    }

    /// Validation à deux niveaux.
    ///
    /// Loose : nom non vide. Strict ajoute la cohérence des contraintes
    /// (défaut du bon type, liste autorisée réservée aux chaînes, plage
    /// réservée aux types numériques).
    pub fn is_valid(&self, strict: bool) -> bool {
        if self.get_name().is_empty() {
            return false;
        }
        if !strict {
            return true;
        }
        if let Some(default) = &self.default_value {
            if default.data_type() != self.value_type {
                return false;
            }
        }
        if !self.allowed_values.is_empty() && self.value_type != StateVarType::String {
            return false;
        }
        if self.value_range.is_some() && !self.value_type.is_numeric() {
            return false;
        }
        true
    }

    /// Vérifie qu'une valeur est acceptable pour cette variable : type
    /// identique, puis liste/plage autorisée.
    pub fn accepts(&self, value: &StateValue) -> Result<(), StateVariableError> {
        if value.data_type() != self.value_type {
            return Err(StateVariableError::TypeMismatch {
                variable: self.get_name().clone(),
                expected: self.value_type,
                actual: value.data_type(),
            });
        }
        if !self.allowed_values.is_empty() {
            let text = value.to_upnp_string();
            if !self.allowed_values.iter().any(|v| v == &text) {
                return Err(StateVariableError::ValueNotAllowed {
                    variable: self.get_name().clone(),
                    value: text,
                });
            }
        }
        if let Some(range) = &self.value_range {
            if !range.contains(value) {
                return Err(StateVariableError::ValueOutOfRange {
                    variable: self.get_name().clone(),
                    value: value.to_upnp_string(),
                });
            }
        }
        Ok(())
    }

    /// Élément `<stateVariable>` pour la table d'état du SCPD.
    pub fn to_xml_element(&self) -> Element {
        let mut elem = Element::new("stateVariable");
        elem.attributes.insert(
            "sendEvents".to_string(),
            if self.send_events { "yes" } else { "no" }.to_string(),
        );

        let mut name = Element::new("name");
        name.children.push(XMLNode::Text(self.get_name().clone()));
        elem.children.push(XMLNode::Element(name));

        let mut data_type = Element::new("dataType");
        data_type
            .children
            .push(XMLNode::Text(self.value_type.upnp_name().to_string()));
        elem.children.push(XMLNode::Element(data_type));

        if let Some(default) = &self.default_value {
            let mut default_elem = Element::new("defaultValue");
            default_elem
                .children
                .push(XMLNode::Text(default.to_upnp_string()));
            elem.children.push(XMLNode::Element(default_elem));
        }

        if !self.allowed_values.is_empty() {
            let mut list = Element::new("allowedValueList");
            for value in &self.allowed_values {
                let mut allowed = Element::new("allowedValue");
                allowed.children.push(XMLNode::Text(value.clone()));
                list.children.push(XMLNode::Element(allowed));
            }
            elem.children.push(XMLNode::Element(list));
        }

        if let Some(range) = &self.value_range {
            let mut range_elem = Element::new("allowedValueRange");
            let mut minimum = Element::new("minimum");
            minimum
                .children
                .push(XMLNode::Text(range.minimum().to_string()));
            range_elem.children.push(XMLNode::Element(minimum));
            let mut maximum = Element::new("maximum");
            maximum
                .children
                .push(XMLNode::Text(range.maximum().to_string()));
            range_elem.children.push(XMLNode::Element(maximum));
            if let Some(step) = range.step() {
                let mut step_elem = Element::new("step");
                step_elem.children.push(XMLNode::Text(step.to_string()));
                range_elem.children.push(XMLNode::Element(step_elem));
            }
            elem.children.push(XMLNode::Element(range_elem));
        }

        elem
    }
}

/// Ensemble des variables d'état d'un service (noms uniques).
#[derive(Debug, Default, Clone)]
pub struct StateVariableSet {
    variables: HashMap<String, Arc<StateVariable>>,
}

impl StateVariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère une variable. Le nom doit être unique dans le service.
    pub fn insert(&mut self, variable: Arc<StateVariable>) -> Result<(), StateVariableError> {
        let name = variable.get_name().clone();
        if self.variables.contains_key(&name) {
            return Err(StateVariableError::AlreadyExists(name));
        }
        self.variables.insert(name, variable);
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<StateVariable>> {
        self.variables.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<StateVariable>> {
        self.variables.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Élément `<serviceStateTable>` du SCPD.
    pub fn to_xml_element(&self) -> Element {
        let mut elem = Element::new("serviceStateTable");
        let mut names: Vec<&String> = self.variables.keys().collect();
        names.sort();
        for name in names {
            elem.children
                .push(XMLNode::Element(self.variables[name].to_xml_element()));
        }
        elem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        let mut set = StateVariableSet::new();
        set.insert(Arc::new(StateVariable::new("Status", StateVarType::Boolean)))
            .unwrap();
        let err = set
            .insert(Arc::new(StateVariable::new("Status", StateVarType::String)))
            .unwrap_err();
        assert!(matches!(err, StateVariableError::AlreadyExists(_)));
    }

    #[test]
    fn test_accepts_checks_type_and_constraints() {
        let mut var = StateVariable::new("Volume", StateVarType::UI2);
        var.set_value_range(ValueRange::new(0.0, 100.0, Some(1.0)).unwrap());

        assert!(var.accepts(&StateValue::UI2(50)).is_ok());
        assert!(matches!(
            var.accepts(&StateValue::UI2(200)),
            Err(StateVariableError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            var.accepts(&StateValue::String("50".to_string())),
            Err(StateVariableError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_allowed_value_list() {
        let mut var = StateVariable::new("TransportState", StateVarType::String);
        var.set_allowed_values(vec!["STOPPED".to_string(), "PLAYING".to_string()]);

        assert!(var
            .accepts(&StateValue::String("PLAYING".to_string()))
            .is_ok());
        assert!(var
            .accepts(&StateValue::String("FLYING".to_string()))
            .is_err());
    }

    #[test]
    fn test_strict_validation() {
        let mut var = StateVariable::new("Status", StateVarType::Boolean);
        assert!(var.is_valid(true));

        // défaut d'un autre type : strict refuse, loose accepte
        var.set_default_value(StateValue::String("0".to_string()));
        assert!(!var.is_valid(true));
        assert!(var.is_valid(false));
    }

    #[test]
    fn test_scpd_element() {
        let mut var = StateVariable::new("Status", StateVarType::Boolean);
        var.set_send_events(true);
        var.set_default_value(StateValue::Boolean(false));
        let elem = var.to_xml_element();
        assert_eq!(elem.attributes.get("sendEvents").unwrap(), "yes");
        assert_eq!(
            elem.get_child("dataType").unwrap().get_text().unwrap(),
            "boolean"
        );
        assert_eq!(
            elem.get_child("defaultValue").unwrap().get_text().unwrap(),
            "0"
        );
    }
}
