//! # Framing HTTP/1.1 brut
//!
//! Codec HTTP minimal pour les chemins où le serveur axum ne convient pas :
//! le listener de callbacks NOTIFY du control point lit et écrit ses
//! messages directement sur le socket.
//!
//! Voir [`codec`].

pub mod codec;
