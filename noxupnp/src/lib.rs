//! # noxupnp - Runtime UPnP
//!
//! Cœur du runtime UPnP : modèle de device, codecs réseau (SSDP, HTTP,
//! SOAP, GENA), moteur SSDP des deux côtés, serveur HTTP du device host,
//! dispatcher SOAP et publication d'événements GENA.
//!
//! ## Architecture
//!
//! - [`devices`] / [`services`] / [`actions`] / [`state_variables`] : le modèle
//! - [`ssdp`] : découverte (serveur côté host, client côté control point)
//! - [`soap`] : enveloppes d'actions et faults
//! - [`gena`] : propertysets et en-têtes d'abonnement
//! - [`http`] : framing HTTP/1.1 brut (listener de callbacks)
//! - [`server`] : surface HTTP du host (axum)
//! - [`eventing`] : publication d'événements avec SEQ monotone
//! - [`hosting`] : dispatcher SOAP et composition du device host

mod object_trait;

pub mod actions;
pub mod devices;
pub mod eventing;
pub mod gena;
pub mod hosting;
pub mod http;
pub mod server;
pub mod services;
pub mod soap;
pub mod ssdp;
pub mod state_variables;
pub mod value_ranges;
pub mod variable_types;

pub use crate::object_trait::{UpnpObjectType, UpnpTyped};
