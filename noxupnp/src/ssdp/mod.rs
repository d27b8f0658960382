//! # Module SSDP - Simple Service Discovery Protocol
//!
//! Ce module implémente le protocole SSDP pour UPnP, permettant la
//! découverte automatique des devices sur le réseau.
//!
//! ## Fonctionnalités
//!
//! - ✅ Codec pur encode/décode des cinq formes de messages
//! - ✅ Envoi de NOTIFY alive/byebye/update en multicast
//! - ✅ Réponse aux M-SEARCH en unicast après le délai MX
//! - ✅ Annonces périodiques avec jitter
//! - ✅ Arrêt propre avec byebye
//!
//! ## Architecture
//!
//! - [`SsdpMessage`] : codec des messages (fonctions pures)
//! - [`SsdpServer`] : moteur côté device host
//! - [`SsdpClient`] : écoute côté control point
//!
//! ## Constantes SSDP
//!
//! - **Multicast Address**: 239.255.255.250:1900
//! - **Max-Age**: 1800 secondes (30 minutes)
//! - **Période d'annonce**: max-age/2 moins un jitter aléatoire

mod client;
mod message;
mod server;

pub use client::{SsdpClient, SsdpEvent};
pub use message::{SsdpError, SsdpMessage};
pub use server::{SsdpAdvertisement, SsdpServer};

/// Adresse multicast SSDP
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Durée de validité des annonces (en secondes)
pub const MAX_AGE: u32 = 1800;
