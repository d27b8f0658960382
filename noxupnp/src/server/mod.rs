//! # Module Server - Surface HTTP du device host
//!
//! Abstraction fine au-dessus d'Axum : chaque moteur (description,
//! contrôle SOAP, eventing) enregistre ses propres handlers sur le
//! routeur partagé, puis le host démarre l'écoute.
//!
//! ## Fonctionnalités
//!
//! - 🎯 **Handlers personnalisés** : `add_handler()`, `add_post_handler_with_state()`
//! - 📡 **Méthodes GENA** : `add_any_handler_with_state()` route aussi
//!   SUBSCRIBE/UNSUBSCRIBE (méthodes non standard)
//! - ⚡ **Arrêt gracieux** : `shutdown()` cesse d'accepter des connexions

use std::net::SocketAddr;
use std::sync::Arc;

use axum::handler::Handler;
use axum::routing::{any, get, post};
use axum::Router;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Serveur HTTP du device host.
pub struct Server {
    name: String,
    base_url: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl Server {
    /// Crée une nouvelle instance de serveur.
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `base_url` - URL de base annoncée (ex: "http://192.168.1.10:8080")
    /// * `http_port` - Port HTTP à écouter
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
            shutdown_tx: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Ajoute un handler GET.
    pub async fn add_handler<H, T>(&mut self, path: &str, handler: H)
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let route = Router::new().route("/", get(handler));

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).nest(path, route);
    }

    /// Ajoute un handler avec state qui reçoit toutes les méthodes.
    ///
    /// Nécessaire pour les routes d'eventing : SUBSCRIBE et UNSUBSCRIBE ne
    /// sont pas des méthodes HTTP standard et ne matchent ni `get` ni
    /// `post`.
    pub async fn add_any_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S>,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", any(handler)).with_state(state);

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).nest(path, route);
    }

    /// Ajoute un handler POST avec state.
    pub async fn add_post_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S>,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", post(handler)).with_state(state);

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).nest(path, route);
    }

    /// Démarre le serveur HTTP.
    ///
    /// Retourne une erreur si le bind échoue ; l'écoute elle-même tourne
    /// dans une tâche tokio.
    pub async fn start(&mut self) -> std::io::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(
            "Server {} running at {} (port {})",
            self.name, self.base_url, self.http_port
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let router = self.router.clone();
        self.join_handle = Some(tokio::spawn(async move {
            let r = router.read().await.clone();
            let serve = axum::serve(listener, r.into_make_service()).with_graceful_shutdown(
                async move {
                    let _ = shutdown_rx.changed().await;
                },
            );
            if let Err(e) = serve.await {
                warn!("HTTP server error: {}", e);
            }
        }));

        Ok(())
    }

    /// Cesse d'accepter des connexions et laisse finir les requêtes en
    /// cours.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }

    /// Attend la fin du serveur.
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }
}
