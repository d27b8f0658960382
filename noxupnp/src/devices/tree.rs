//! Arbre de devices en arène indicée.
//!
//! Le lien enfant→parent est résolu par index dans l'arène, jamais par
//! pointeur arrière : la propriété est mono-parent et l'arbre est acyclique
//! par construction. La profondeur est bornée par [`MAX_DEVICE_DEPTH`].

use std::collections::HashSet;
use std::sync::Arc;

use xmltree::{Element, XMLNode};

use super::device::Device;
use super::errors::DeviceError;

/// Profondeur maximale de l'arbre de devices (root inclus).
pub const MAX_DEVICE_DEPTH: usize = 16;

#[derive(Debug)]
struct DeviceNode {
    device: Arc<Device>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Arbre root/embedded d'un root device.
#[derive(Debug)]
pub struct DeviceTree {
    nodes: Vec<DeviceNode>,
}

impl DeviceTree {
    /// Crée un arbre dont le root est le device donné.
    pub fn new(root: Device) -> Self {
        Self {
            nodes: vec![DeviceNode {
                device: Arc::new(root),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Index du root device.
    pub fn root_index(&self) -> usize {
        0
    }

    /// Le root device.
    pub fn root(&self) -> Arc<Device> {
        self.nodes[0].device.clone()
    }

    /// Ajoute un device embedded sous le parent donné.
    ///
    /// # Errors
    ///
    /// - parent inexistant
    /// - profondeur au-delà de [`MAX_DEVICE_DEPTH`]
    /// - UDN déjà présent dans l'arbre
    pub fn add_child(&mut self, parent: usize, device: Device) -> Result<usize, DeviceError> {
        if parent >= self.nodes.len() {
            return Err(DeviceError::UnknownNode(parent));
        }
        if self.depth_of(parent) + 1 >= MAX_DEVICE_DEPTH {
            return Err(DeviceError::TreeTooDeep(MAX_DEVICE_DEPTH));
        }
        if self
            .nodes
            .iter()
            .any(|n| n.device.udn().eq_ignore_ascii_case(device.udn()))
        {
            return Err(DeviceError::DeviceAlreadyExists(device.udn().to_string()));
        }

        let index = self.nodes.len();
        self.nodes.push(DeviceNode {
            device: Arc::new(device),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(index);
        Ok(index)
    }

    /// Le device à l'index donné.
    pub fn device(&self, index: usize) -> Option<Arc<Device>> {
        self.nodes.get(index).map(|n| n.device.clone())
    }

    /// L'index du parent, `None` pour le root.
    pub fn parent_of(&self, index: usize) -> Option<usize> {
        self.nodes.get(index).and_then(|n| n.parent)
    }

    /// Les index des enfants directs.
    pub fn children_of(&self, index: usize) -> &[usize] {
        self.nodes
            .get(index)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Profondeur d'un nœud (root = 0), résolue en remontant l'arène.
    pub fn depth_of(&self, index: usize) -> usize {
        let mut depth = 0;
        let mut current = index;
        while let Some(parent) = self.nodes[current].parent {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Tous les devices de l'arbre, root en premier.
    pub fn all_devices(&self) -> Vec<Arc<Device>> {
        self.nodes.iter().map(|n| n.device.clone()).collect()
    }

    /// Cherche un device par UDN (comparaison exacte, les UDN sont
    /// sensibles à la casse).
    pub fn find_by_udn(&self, udn: &str) -> Option<Arc<Device>> {
        self.nodes
            .iter()
            .find(|n| n.device.udn() == udn)
            .map(|n| n.device.clone())
    }

    /// Validation de l'arbre entier.
    pub fn is_valid(&self, strict: bool) -> bool {
        self.nodes.iter().all(|n| n.device.is_valid(strict))
    }

    /// Cibles d'annonce SSDP du root device, dans l'ordre d'émission :
    /// `uuid:<udn>`, `upnp:rootdevice`, un type par device, un type par
    /// service (dédupliqués).
    pub fn notification_types(&self) -> Vec<String> {
        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        targets.push(self.root().udn().to_string());
        targets.push("upnp:rootdevice".to_string());

        for node in &self.nodes {
            let device_type = node.device.device_type();
            if seen.insert(device_type.clone()) {
                targets.push(device_type);
            }
        }
        for node in &self.nodes {
            for service in node.device.services() {
                let service_type = service.service_type();
                if seen.insert(service_type.clone()) {
                    targets.push(service_type);
                }
            }
        }

        targets
    }

    /// USN pour une cible d'annonce donnée.
    pub fn usn_for(&self, nt: &str) -> String {
        let root = self.root();
        let udn = root.udn();
        if nt.starts_with("uuid:") {
            nt.to_string()
        } else {
            format!("{}::{}", udn, nt)
        }
    }

    /// Document de description du root device (`<root>`).
    pub fn description_element(&self, base_url: &str) -> Element {
        let mut root = Element::new("root");
        root.attributes.insert(
            "xmlns".to_string(),
            "urn:schemas-upnp-org:device-1-0".to_string(),
        );

        let mut spec = Element::new("specVersion");
        let mut major = Element::new("major");
        major.children.push(XMLNode::Text("1".to_string()));
        spec.children.push(XMLNode::Element(major));
        let mut minor = Element::new("minor");
        minor.children.push(XMLNode::Text("0".to_string()));
        spec.children.push(XMLNode::Element(minor));
        root.children.push(XMLNode::Element(spec));

        let mut url_base = Element::new("URLBase");
        url_base.children.push(XMLNode::Text(base_url.to_string()));
        root.children.push(XMLNode::Element(url_base));

        root.children
            .push(XMLNode::Element(self.device_subtree_element(0)));

        root
    }

    fn device_subtree_element(&self, index: usize) -> Element {
        let node = &self.nodes[index];
        let mut elem = node.device.description_element();

        if !node.children.is_empty() {
            let mut list = Element::new("deviceList");
            for &child in &node.children {
                list.children
                    .push(XMLNode::Element(self.device_subtree_element(child)));
            }
            elem.children.push(XMLNode::Element(list));
        }

        elem
    }
}
