//! # Actions UPnP
//!
//! Modèle des actions d'un service : arguments ordonnés avec direction et
//! variable d'état associée, ensemble d'actions à noms uniques, et types
//! des handlers d'exécution côté host.

mod action_handler;
mod errors;

use std::collections::HashMap;
use std::sync::Arc;

use xmltree::{Element, XMLNode};

pub use action_handler::{ActionData, ActionFuture, ActionHandler, ActionOutcome};
pub use errors::ActionError;

use crate::{UpnpObjectType, UpnpTyped};

/// Direction d'un argument d'action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn upnp_name(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Argument d'une action.
///
/// `related_state_variable` doit résoudre vers une variable du même
/// service ; la résolution est vérifiée par
/// [`Service::is_valid`](crate::services::Service::is_valid).
#[derive(Debug, Clone)]
pub struct Argument {
    object: UpnpObjectType,
    direction: Direction,
    related_state_variable: String,
}

impl UpnpTyped for Argument {
    fn as_upnp_object_type(&self) -> &UpnpObjectType {
        &self.object
    }
}

impl Argument {
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        related_state_variable: impl Into<String>,
    ) -> Self {
        Self {
            object: UpnpObjectType::new(name, "Argument"),
            direction,
            related_state_variable: related_state_variable.into(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn related_state_variable(&self) -> &str {
        &self.related_state_variable
    }

    /// Élément `<argument>` pour le SCPD.
    pub fn to_xml_element(&self) -> Element {
        let mut elem = Element::new("argument");

        let mut name = Element::new("name");
        name.children.push(XMLNode::Text(self.get_name().clone()));
        elem.children.push(XMLNode::Element(name));

        let mut direction = Element::new("direction");
        direction
            .children
            .push(XMLNode::Text(self.direction.upnp_name().to_string()));
        elem.children.push(XMLNode::Element(direction));

        let mut related = Element::new("relatedStateVariable");
        related
            .children
            .push(XMLNode::Text(self.related_state_variable.clone()));
        elem.children.push(XMLNode::Element(related));

        elem
    }
}

/// Modèle d'une action UPnP.
///
/// Les arguments sont ordonnés : l'ordre de déclaration est l'ordre
/// d'apparition sur le fil SOAP.
#[derive(Debug, Clone)]
pub struct Action {
    object: UpnpObjectType,
    arguments: Vec<Argument>,
}

impl UpnpTyped for Action {
    fn as_upnp_object_type(&self) -> &UpnpObjectType {
        &self.object
    }
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            object: UpnpObjectType::new(name, "Action"),
            arguments: Vec::new(),
        }
    }

    /// Ajoute un argument en fin de liste.
    ///
    /// # Errors
    ///
    /// Retourne une erreur si un argument du même nom existe déjà.
    pub fn add_argument(&mut self, argument: Argument) -> Result<(), ActionError> {
        if self
            .arguments
            .iter()
            .any(|a| a.get_name() == argument.get_name())
        {
            return Err(ActionError::ArgumentAlreadyExists(
                argument.get_name().clone(),
            ));
        }
        self.arguments.push(argument);
        Ok(())
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|a| a.get_name() == name)
    }

    /// Arguments d'entrée, dans l'ordre déclaré.
    pub fn in_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction() == Direction::In)
    }

    /// Arguments de sortie, dans l'ordre déclaré.
    pub fn out_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction() == Direction::Out)
    }

    /// Élément `<action>` pour le SCPD.
    pub fn to_xml_element(&self) -> Element {
        let mut elem = Element::new("action");

        let mut name = Element::new("name");
        name.children.push(XMLNode::Text(self.get_name().clone()));
        elem.children.push(XMLNode::Element(name));

        if !self.arguments.is_empty() {
            let mut list = Element::new("argumentList");
            for argument in &self.arguments {
                list.children.push(XMLNode::Element(argument.to_xml_element()));
            }
            elem.children.push(XMLNode::Element(list));
        }

        elem
    }
}

/// Ensemble des actions d'un service (noms uniques).
#[derive(Debug, Default, Clone)]
pub struct ActionSet {
    actions: HashMap<String, Arc<Action>>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère une action. Le nom doit être unique dans le service.
    pub fn insert(&mut self, action: Arc<Action>) -> Result<(), ActionError> {
        let name = action.get_name().clone();
        if self.actions.contains_key(&name) {
            return Err(ActionError::AlreadyExists(name));
        }
        self.actions.insert(name, action);
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Action>> {
        self.actions.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Action>> {
        self.actions.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Élément `<actionList>` du SCPD.
    pub fn to_xml_element(&self) -> Element {
        let mut elem = Element::new("actionList");
        let mut names: Vec<&String> = self.actions.keys().collect();
        names.sort();
        for name in names {
            elem.children
                .push(XMLNode::Element(self.actions[name].to_xml_element()));
        }
        elem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_target() -> Action {
        let mut action = Action::new("SetTarget");
        action
            .add_argument(Argument::new("newTargetValue", Direction::In, "Target"))
            .unwrap();
        action
    }

    #[test]
    fn test_argument_order_preserved() {
        let mut action = Action::new("GetPositionInfo");
        for name in ["Track", "TrackDuration", "TrackURI"] {
            action
                .add_argument(Argument::new(name, Direction::Out, name))
                .unwrap();
        }
        let out: Vec<&String> = action.out_arguments().map(|a| a.get_name()).collect();
        assert_eq!(out, vec!["Track", "TrackDuration", "TrackURI"]);
    }

    #[test]
    fn test_duplicate_argument_rejected() {
        let mut action = set_target();
        let err = action
            .add_argument(Argument::new("newTargetValue", Direction::In, "Target"))
            .unwrap_err();
        assert!(matches!(err, ActionError::ArgumentAlreadyExists(_)));
    }

    #[test]
    fn test_action_set_unique_names() {
        let mut set = ActionSet::new();
        set.insert(Arc::new(set_target())).unwrap();
        assert!(matches!(
            set.insert(Arc::new(set_target())),
            Err(ActionError::AlreadyExists(_))
        ));
        assert!(set.get_by_name("SetTarget").is_some());
    }

    #[test]
    fn test_scpd_argument_element() {
        let action = set_target();
        let elem = action.to_xml_element();
        let list = elem.get_child("argumentList").unwrap();
        let arg = list.get_child("argument").unwrap();
        assert_eq!(arg.get_child("direction").unwrap().get_text().unwrap(), "in");
        assert_eq!(
            arg.get_child("relatedStateVariable")
                .unwrap()
                .get_text()
                .unwrap(),
            "Target"
        );
    }
}
