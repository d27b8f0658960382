//! Serveur SSDP côté device host.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::devices::DeviceTree;

use super::message::SsdpMessage;
use super::{MAX_AGE, SSDP_MULTICAST_ADDR, SSDP_PORT};

/// Annonce SSDP d'un root device hébergé.
#[derive(Debug, Clone)]
pub struct SsdpAdvertisement {
    /// UDN du root device (préfixé `uuid:`)
    pub udn: String,

    /// URL de la description du root device
    pub location: String,

    /// Tokens produit pour l'en-tête SERVER
    pub server: String,

    /// Cibles d'annonce, dans l'ordre d'émission
    pub notification_types: Vec<String>,
}

impl SsdpAdvertisement {
    /// Construit l'annonce d'un arbre de devices.
    pub fn from_tree(tree: &DeviceTree, location: String, server: String) -> Self {
        Self {
            udn: tree.root().udn().to_string(),
            location,
            server,
            notification_types: tree.notification_types(),
        }
    }

    /// USN pour une cible donnée.
    fn usn(&self, nt: &str) -> String {
        if nt.starts_with("uuid:") {
            nt.to_string()
        } else {
            format!("{}::{}", self.udn, nt)
        }
    }
}

/// Serveur SSDP gérant les annonces et les réponses aux M-SEARCH.
pub struct SsdpServer {
    /// Devices annoncés (UDN -> annonce)
    devices: Arc<RwLock<HashMap<String, SsdpAdvertisement>>>,

    /// Socket UDP pour SSDP
    socket: Option<Arc<UdpSocket>>,

    /// Durée de validité annoncée
    max_age: u32,

    /// Drapeau d'arrêt partagé avec les threads
    running: Arc<AtomicBool>,
}

impl SsdpServer {
    /// Crée un nouveau serveur SSDP.
    pub fn new() -> Self {
        Self::with_max_age(MAX_AGE)
    }

    /// Crée un serveur avec une durée de validité spécifique (≥ 1800 s
    /// recommandé par UDA ; bornée par le codec à l'émission).
    pub fn with_max_age(max_age: u32) -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            socket: None,
            max_age: max_age.max(1800),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Démarre le serveur SSDP.
    ///
    /// Bind sur 0.0.0.0:1900 (avec SO_REUSEADDR), rejoint le groupe
    /// multicast et lance les threads d'annonces périodiques et d'écoute
    /// des M-SEARCH.
    pub fn start(&mut self) -> std::io::Result<()> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        let bind_addr: SocketAddr = format!("0.0.0.0:{}", SSDP_PORT).parse().unwrap();
        socket2.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket2.into();
        socket.join_multicast_v4(
            &SSDP_MULTICAST_ADDR.parse().unwrap(),
            &"0.0.0.0".parse().unwrap(),
        )?;
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;
        socket.set_multicast_loop_v4(false)?;

        let socket = Arc::new(socket);
        self.socket = Some(socket.clone());
        self.running.store(true, Ordering::SeqCst);

        info!(
            "✅ SSDP server started on {}:{}",
            SSDP_MULTICAST_ADDR, SSDP_PORT
        );

        self.start_periodic_announcements(socket.clone());
        self.start_msearch_listener(socket);

        Ok(())
    }

    /// Ajoute un device et envoie la rafale alive initiale.
    ///
    /// La rafale part d'un thread dédié : les messages sont espacés d'un
    /// jitter et ne doivent pas bloquer l'appelant.
    pub fn add_device(&self, advertisement: SsdpAdvertisement) {
        let udn = advertisement.udn.clone();
        {
            let mut devices = self.devices.write().unwrap();
            devices.insert(udn, advertisement.clone());
        }

        if let Some(socket) = self.socket.clone() {
            let max_age = self.max_age;
            thread::spawn(move || Self::send_alive_burst(&socket, &advertisement, max_age));
        }
    }

    /// Supprime un device et envoie la rafale byebye.
    pub fn remove_device(&self, udn: &str) {
        let removed = {
            let mut devices = self.devices.write().unwrap();
            devices.remove(udn)
        };

        if let (Some(advertisement), Some(socket)) = (removed, self.socket.as_ref()) {
            Self::send_byebye_burst(socket, &advertisement);
        }
    }

    /// Arrêt contrôlé : byebye pour tous les devices puis arrêt des
    /// threads.
    pub fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(ref socket) = self.socket {
            info!("👋 Shutting down SSDP server, sending byebye for all devices");
            let devices = self.devices.read().unwrap();
            for advertisement in devices.values() {
                Self::send_byebye_burst(socket, advertisement);
            }
        }
        self.socket = None;
    }

    /// Envoie une rafale d'alive, un message par cible, espacés d'un
    /// jitter ≤ 100 ms.
    fn send_alive_burst(socket: &UdpSocket, advertisement: &SsdpAdvertisement, max_age: u32) {
        let addr: SocketAddr = format!("{}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT)
            .parse()
            .unwrap();

        for nt in &advertisement.notification_types {
            let msg = SsdpMessage::Alive {
                max_age,
                location: advertisement.location.clone(),
                nt: nt.clone(),
                server: advertisement.server.clone(),
                usn: advertisement.usn(nt),
                boot_id: None,
                config_id: None,
                search_port: None,
            };

            match socket.send_to(msg.encode().as_bytes(), addr) {
                Ok(_) => info!("✅ NOTIFY alive: {} (NT={})", advertisement.usn(nt), nt),
                Err(e) => warn!("❌ Failed to send NOTIFY alive for {}: {}", nt, e),
            }

            thread::sleep(Duration::from_millis(rand::random_range(0..=100)));
        }
    }

    /// Envoie une rafale de byebye, un message par cible.
    fn send_byebye_burst(socket: &UdpSocket, advertisement: &SsdpAdvertisement) {
        let addr: SocketAddr = format!("{}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT)
            .parse()
            .unwrap();

        for nt in &advertisement.notification_types {
            let msg = SsdpMessage::ByeBye {
                nt: nt.clone(),
                usn: advertisement.usn(nt),
                boot_id: None,
                config_id: None,
            };

            match socket.send_to(msg.encode().as_bytes(), addr) {
                Ok(_) => info!("👋 NOTIFY byebye: {} (NT={})", advertisement.usn(nt), nt),
                Err(e) => warn!("❌ Failed to send NOTIFY byebye for {}: {}", nt, e),
            }
        }
    }

    /// Lance les annonces périodiques.
    ///
    /// La période de chaque cycle vaut `max_age/2 - random([0, max_age/4])`
    /// secondes, retirée à chaque tour.
    fn start_periodic_announcements(&self, socket: Arc<UdpSocket>) {
        let devices = Arc::clone(&self.devices);
        let running = Arc::clone(&self.running);
        let max_age = self.max_age;

        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let period = (max_age / 2) - rand::random_range(0..=max_age / 4);

                // sommeil découpé pour observer l'arrêt
                let mut remaining = period as u64;
                while remaining > 0 && running.load(Ordering::SeqCst) {
                    let slice = remaining.min(1);
                    thread::sleep(Duration::from_secs(slice));
                    remaining -= slice;
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let snapshot: Vec<SsdpAdvertisement> =
                    devices.read().unwrap().values().cloned().collect();
                for advertisement in snapshot {
                    Self::send_alive_burst(&socket, &advertisement, max_age);
                }
            }
        });
    }

    /// Lance l'écoute des M-SEARCH.
    fn start_msearch_listener(&self, socket: Arc<UdpSocket>) {
        let devices = Arc::clone(&self.devices);
        let running = Arc::clone(&self.running);
        let max_age = self.max_age;

        thread::spawn(move || {
            let mut buf = [0u8; 8192];
            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buf) {
                    Ok((n, src)) => {
                        let data = String::from_utf8_lossy(&buf[..n]);
                        if !data.starts_with("M-SEARCH") {
                            continue;
                        }
                        // Un décodage raté (MAN absent ou invalide,
                        // en-tête manquant) est ignoré en silence.
                        let Ok(SsdpMessage::Search { mx, st, .. }) = SsdpMessage::decode(&data)
                        else {
                            continue;
                        };

                        let snapshot: Vec<SsdpAdvertisement> =
                            devices.read().unwrap().values().cloned().collect();
                        for advertisement in snapshot {
                            Self::schedule_msearch_response(
                                Arc::clone(&socket),
                                src,
                                st.clone(),
                                mx,
                                advertisement,
                                max_age,
                            );
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        // Timeout de lecture, continuer
                        continue;
                    }
                    Err(e) => {
                        warn!("❌ SSDP read error: {}", e);
                    }
                }
            }
        });
    }

    /// Répond à un M-SEARCH après un délai aléatoire dans
    /// [0, min(MX, 5)] secondes.
    fn schedule_msearch_response(
        socket: Arc<UdpSocket>,
        src: SocketAddr,
        st: String,
        mx: u32,
        advertisement: SsdpAdvertisement,
        max_age: u32,
    ) {
        let matched = matching_targets(&advertisement, &st);
        if matched.is_empty() {
            return;
        }

        thread::spawn(move || {
            let window_ms = u64::from(mx.min(5)) * 1000;
            thread::sleep(Duration::from_millis(rand::random_range(0..=window_ms)));

            for nt in matched {
                let date = chrono::Utc::now()
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string();
                let msg = SsdpMessage::SearchResponse {
                    max_age,
                    date,
                    location: advertisement.location.clone(),
                    server: advertisement.server.clone(),
                    st: nt.clone(),
                    usn: advertisement.usn(&nt),
                    boot_id: None,
                    config_id: None,
                    search_port: None,
                };

                match socket.send_to(msg.encode().as_bytes(), src) {
                    Ok(_) => debug!("📡 M-SEARCH response sent to {} with ST={}", src, nt),
                    Err(e) => warn!("❌ Failed to send M-SEARCH response to {}: {}", src, e),
                }
            }
        });
    }
}

/// Cibles annoncées qui correspondent à un ST donné.
fn matching_targets(advertisement: &SsdpAdvertisement, st: &str) -> Vec<String> {
    if st == "ssdp:all" {
        advertisement.notification_types.clone()
    } else if advertisement
        .notification_types
        .iter()
        .any(|nt| nt == st)
    {
        vec![st.to_string()]
    } else {
        Vec::new()
    }
}

impl Default for SsdpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SsdpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Device, DeviceTree};
    use crate::services::Service;
    use std::sync::Arc as StdArc;

    fn advertisement() -> SsdpAdvertisement {
        let mut root = Device::new(
            "light".to_string(),
            "BinaryLight".to_string(),
            "Desk Light".to_string(),
        );
        root.set_manufacturer("Nox".to_string());
        root.add_service(StdArc::new(Service::new("SwitchPower".to_string())))
            .unwrap();
        let tree = DeviceTree::new(root);
        SsdpAdvertisement::from_tree(
            &tree,
            "http://192.168.1.10:8080/device/light/desc.xml".to_string(),
            "Linux/6.1 UPnP/1.1 nox/0.3".to_string(),
        )
    }

    #[test]
    fn test_advertised_targets() {
        let ad = advertisement();
        assert_eq!(ad.notification_types.len(), 4);
        assert_eq!(ad.notification_types[0], ad.udn);
        assert_eq!(ad.notification_types[1], "upnp:rootdevice");
    }

    #[test]
    fn test_usn_forms() {
        let ad = advertisement();
        assert_eq!(ad.usn(&ad.udn), ad.udn);
        assert_eq!(
            ad.usn("upnp:rootdevice"),
            format!("{}::upnp:rootdevice", ad.udn)
        );
    }

    #[test]
    fn test_matching_targets() {
        let ad = advertisement();
        assert_eq!(matching_targets(&ad, "ssdp:all").len(), 4);
        assert_eq!(
            matching_targets(&ad, "upnp:rootdevice"),
            vec!["upnp:rootdevice".to_string()]
        );
        assert_eq!(matching_targets(&ad, &ad.udn), vec![ad.udn.clone()]);
        assert!(matching_targets(&ad, "urn:other:service:Nope:1").is_empty());
    }
}
