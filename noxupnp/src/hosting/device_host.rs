//! Composition du device host : modèle + HTTP + SSDP + cycle de vie.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::devices::DeviceTree;
use crate::server::Server;
use crate::ssdp::{SsdpAdvertisement, SsdpServer};

use super::element_to_xml;
use super::errors::HostError;
use super::service_host::{ServiceHost, SubscriptionPolicy};

/// Configuration d'un device host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfiguration {
    /// Nom du host (logs et tokens produit)
    pub name: String,

    /// Port HTTP d'écoute
    pub http_port: u16,

    /// Adresse IP annoncée dans les LOCATION (détectée si absente)
    pub host_ip: Option<String>,

    /// Tokens produit pour l'en-tête SERVER
    pub server_tokens: String,

    /// Durée de validité des annonces SSDP (secondes, ≥ 1800)
    pub max_age: u32,

    /// Démarrer le moteur SSDP (désactivable pour les tests)
    pub announce: bool,

    /// Délai de grâce du drain des invocations à l'arrêt (secondes)
    pub shutdown_grace_secs: u64,
}

impl Default for HostConfiguration {
    fn default() -> Self {
        Self {
            name: "nox-host".to_string(),
            http_port: 8080,
            host_ip: None,
            server_tokens: "Linux/6.1 UPnP/1.1 nox/0.3".to_string(),
            max_age: crate::ssdp::MAX_AGE,
            announce: true,
            shutdown_grace_secs: 5,
        }
    }
}

impl HostConfiguration {
    fn validate(&self) -> Result<(), HostError> {
        if self.name.is_empty() {
            return Err(HostError::InvalidConfiguration(
                "host name is empty".to_string(),
            ));
        }
        if self.http_port == 0 {
            return Err(HostError::InvalidConfiguration(
                "http_port must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hooks fournis par le composeur applicatif.
///
/// Chaque hook est optionnel ; l'absence vaut comportement par défaut
/// (no-op, tout accepter).
#[derive(Default, Clone)]
pub struct HostCapabilities {
    /// Appelé après le bind, avant la première annonce
    pub on_init: Option<Arc<dyn Fn() + Send + Sync>>,

    /// Appelé en fin d'arrêt contrôlé
    pub on_quit: Option<Arc<dyn Fn() + Send + Sync>>,

    /// Politique d'acceptation des souscriptions
    pub subscription_policy: Option<SubscriptionPolicy>,
}

/// Device host : publie un arbre de devices sur HTTP et SSDP.
///
/// # Cycle de vie
///
/// 1. [`init`](Self::init) : validation, construction, routes HTTP
/// 2. Enregistrement des handlers d'actions via
///    [`service_host`](Self::service_host)
/// 3. [`start`](Self::start) : écoute HTTP, annonces SSDP
/// 4. [`shutdown`](Self::shutdown) : byebye, drain, libération
pub struct DeviceHost {
    config: HostConfiguration,
    server: Server,
    ssdp: SsdpServer,
    tree: Arc<DeviceTree>,
    service_hosts: Vec<ServiceHost>,
    capabilities: HostCapabilities,
    started: bool,
}

impl std::fmt::Debug for DeviceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHost")
            .field("config", &self.config)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl DeviceHost {
    /// Valide la configuration et l'arbre, construit le modèle runtime et
    /// enregistre les routes HTTP (description, contrôle, événements).
    pub async fn init(
        config: HostConfiguration,
        tree: DeviceTree,
        capabilities: HostCapabilities,
    ) -> Result<Self, HostError> {
        config.validate()?;
        if !tree.is_valid(true) {
            return Err(HostError::InvalidDescription(format!(
                "device tree rooted at {} fails strict validation",
                tree.root().udn()
            )));
        }

        let host_ip = match &config.host_ip {
            Some(ip) => ip.clone(),
            None => local_ip().unwrap_or_else(|| "127.0.0.1".to_string()),
        };
        let base_url = format!("http://{}:{}", host_ip, config.http_port);
        let mut server = Server::new(config.name.clone(), base_url.clone(), config.http_port);

        let tree = Arc::new(tree);

        // Route de description du root device
        let description_tree = Arc::clone(&tree);
        let description_base = base_url.clone();
        let description_route = format!("{}/desc.xml", tree.root().route());
        server
            .add_handler(&description_route, move || {
                let tree = Arc::clone(&description_tree);
                let base = description_base.clone();
                async move {
                    (
                        StatusCode::OK,
                        [(
                            axum::http::header::CONTENT_TYPE,
                            "text/xml; charset=\"utf-8\"",
                        )],
                        element_to_xml(&tree.description_element(&base)),
                    )
                        .into_response()
                }
            })
            .await;
        info!(
            "✅ Device description available at {}{}",
            base_url, description_route
        );

        // Un ServiceHost par service de chaque device de l'arbre
        let mut service_hosts = Vec::new();
        for device in tree.all_devices() {
            for service in device.services() {
                let host = ServiceHost::new(
                    service.clone(),
                    device.route(),
                    capabilities.subscription_policy.clone(),
                );
                host.register_urls(&mut server).await;
                service_hosts.push(host);
            }
        }

        Ok(Self {
            ssdp: SsdpServer::with_max_age(config.max_age),
            config,
            server,
            tree,
            service_hosts,
            capabilities,
            started: false,
        })
    }

    pub fn tree(&self) -> &Arc<DeviceTree> {
        &self.tree
    }

    pub fn base_url(&self) -> &str {
        self.server.base_url()
    }

    /// URL de la description du root device (LOCATION des annonces).
    pub fn description_url(&self) -> String {
        format!("{}{}/desc.xml", self.server.base_url(), self.tree.root().route())
    }

    /// Le [`ServiceHost`] d'un service, par identifiant de service.
    pub fn service_host(&self, identifier: &str) -> Option<&ServiceHost> {
        self.service_hosts
            .iter()
            .find(|h| h.service().identifier() == identifier)
    }

    /// Tous les services hébergés.
    pub fn service_hosts(&self) -> &[ServiceHost] {
        &self.service_hosts
    }

    /// Démarre l'écoute HTTP puis les annonces SSDP.
    pub async fn start(&mut self) -> Result<(), HostError> {
        if self.started {
            return Err(HostError::AlreadyStarted);
        }

        if let Some(on_init) = &self.capabilities.on_init {
            on_init();
        }

        self.server.start().await?;

        if self.config.announce {
            self.ssdp.start()?;
            self.ssdp.add_device(SsdpAdvertisement::from_tree(
                &self.tree,
                self.description_url(),
                self.config.server_tokens.clone(),
            ));
        }

        self.started = true;
        info!("✅ Device host {} started", self.config.name);
        Ok(())
    }

    /// Arrêt contrôlé.
    ///
    /// Dans l'ordre : arrêt de l'accept HTTP, rafale byebye, refus des
    /// nouvelles souscriptions, drain des invocations en cours dans le
    /// délai de grâce, libération des abonnements.
    pub async fn shutdown(&mut self) {
        info!("Shutting down device host {}", self.config.name);

        self.server.shutdown();
        self.ssdp.shutdown();

        for host in &self.service_hosts {
            host.stop_accepting();
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_grace_secs);
        while Instant::now() < deadline {
            let in_flight: usize = self.service_hosts.iter().map(|h| h.in_flight()).sum();
            if in_flight == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        for host in &self.service_hosts {
            host.state().publisher().clear();
        }

        if let Some(on_quit) = &self.capabilities.on_quit {
            on_quit();
        }

        self.started = false;
    }
}

/// IP locale vue du réseau, via un connect UDP qui n'émet rien.
fn local_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("239.255.255.250:1900").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Device;
    use crate::services::Service;
    use crate::state_variables::StateVariable;
    use crate::variable_types::{StateValue, StateVarType};

    fn light_tree() -> DeviceTree {
        let mut service = Service::new("SwitchPower".to_string());
        let mut status = StateVariable::new("Status", StateVarType::Boolean);
        status.set_send_events(true);
        status.set_default_value(StateValue::Boolean(false));
        service.add_variable(Arc::new(status)).unwrap();

        let mut device = Device::new(
            "light".to_string(),
            "BinaryLight".to_string(),
            "Desk Light".to_string(),
        );
        device.set_manufacturer("Nox".to_string());
        device.add_service(Arc::new(service)).unwrap();
        DeviceTree::new(device)
    }

    #[tokio::test]
    async fn test_init_validates_configuration() {
        let mut config = HostConfiguration::default();
        config.http_port = 0;
        let err = DeviceHost::init(config, light_tree(), HostCapabilities::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_init_validates_tree() {
        // device sans fabricant : la validation stricte échoue
        let device = Device::new(
            "bare".to_string(),
            "BinaryLight".to_string(),
            "Bare".to_string(),
        );
        let err = DeviceHost::init(
            HostConfiguration::default(),
            DeviceTree::new(device),
            HostCapabilities::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HostError::InvalidDescription(_)));
    }

    #[tokio::test]
    async fn test_init_builds_service_hosts() {
        let config = HostConfiguration {
            announce: false,
            host_ip: Some("127.0.0.1".to_string()),
            ..HostConfiguration::default()
        };
        let host = DeviceHost::init(config, light_tree(), HostCapabilities::default())
            .await
            .unwrap();

        assert_eq!(host.service_hosts().len(), 1);
        assert!(host.service_host("SwitchPower").is_some());
        assert!(host.service_host("Missing").is_none());
        assert!(host
            .description_url()
            .ends_with("/device/light/desc.xml"));
    }

    #[tokio::test]
    async fn test_capability_hooks_fire() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let inited = Arc::new(AtomicBool::new(false));
        let quitted = Arc::new(AtomicBool::new(false));

        let inited_flag = Arc::clone(&inited);
        let quitted_flag = Arc::clone(&quitted);
        let capabilities = HostCapabilities {
            on_init: Some(Arc::new(move || inited_flag.store(true, Ordering::SeqCst))),
            on_quit: Some(Arc::new(move || quitted_flag.store(true, Ordering::SeqCst))),
            subscription_policy: None,
        };

        let config = HostConfiguration {
            announce: false,
            host_ip: Some("127.0.0.1".to_string()),
            http_port: 0, // remplacé ci-dessous
            ..HostConfiguration::default()
        };
        // port éphémère réel pour pouvoir démarrer
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = HostConfiguration {
            http_port: port,
            ..config
        };

        let mut host = DeviceHost::init(config, light_tree(), capabilities)
            .await
            .unwrap();
        host.start().await.unwrap();
        assert!(inited.load(Ordering::SeqCst));

        host.shutdown().await;
        assert!(quitted.load(Ordering::SeqCst));
    }
}
