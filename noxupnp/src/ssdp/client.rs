/*!
Le client SSDP est un *control point*.
Il ne doit **pas** se binder sur le port UDP 1900.

Raison :

* Le serveur SSDP (mode device UPnP) doit écouter sur 0.0.0.0:1900 pour les M-SEARCH.
* Le client SSDP n'a besoin que d'envoyer des M-SEARCH et de recevoir les réponses
  unicast HTTP/200.
* Si client et serveur se bindent tous deux sur 1900 (même avec SO_REUSEPORT), le
  noyau répartit les datagrammes entre les sockets : NOTIFY et HTTP/200 se perdent
  aléatoirement côté client.

Donc :

* Serveur SSDP → bind(0.0.0.0:1900), join multicast, répond aux M-SEARCH.
* Client SSDP → bind(0.0.0.0:0), port éphémère, envoie les M-SEARCH, reçoit les réponses.

Le client rejoint quand même le groupe multicast pour recevoir les NOTIFY.
*/

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use super::message::{SsdpError, SsdpMessage};
use super::{SSDP_MULTICAST_ADDR, SSDP_PORT};

/// Événements SSDP intéressants pour un control point.
#[derive(Debug, Clone)]
pub enum SsdpEvent {
    Alive {
        usn: String,
        nt: String,
        location: String,
        server: String,
        max_age: u32,
        boot_id: Option<u32>,
        from: SocketAddr,
    },
    ByeBye {
        usn: String,
        nt: String,
        from: SocketAddr,
    },
    Update {
        usn: String,
        nt: String,
        location: String,
        boot_id: u32,
        next_boot_id: u32,
        from: SocketAddr,
    },
    SearchResponse {
        usn: String,
        st: String,
        location: String,
        server: String,
        max_age: u32,
        boot_id: Option<u32>,
        from: SocketAddr,
    },
}

/// Client SSDP pour envoyer des M-SEARCH et écouter les annonces.
#[derive(Clone)]
pub struct SsdpClient {
    socket: Arc<UdpSocket>,
    stop: Arc<AtomicBool>,
}

impl SsdpClient {
    /// Crée un nouveau client SSDP sur un port éphémère.
    pub fn new() -> std::io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;

        let bind_addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
        socket2.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket2.into();
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;
        socket.set_multicast_loop_v4(true)?; // utile en dev local

        for iface in get_if_addrs::get_if_addrs()? {
            if let std::net::IpAddr::V4(ipv4) = iface.ip() {
                if !ipv4.is_loopback() {
                    match socket.join_multicast_v4(&SSDP_MULTICAST_ADDR.parse().unwrap(), &ipv4) {
                        Ok(()) => {
                            debug!("SSDP: joined {} on {}", SSDP_MULTICAST_ADDR, ipv4);
                        }
                        Err(e) => {
                            warn!(
                                "SSDP: failed to join {} on {}: {}",
                                SSDP_MULTICAST_ADDR, ipv4, e
                            );
                        }
                    }
                }
            }
        }

        info!(
            "✅ SSDP client ready (listening for {}:{})",
            SSDP_MULTICAST_ADDR, SSDP_PORT
        );

        Ok(Self {
            socket: Arc::new(socket),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Envoie un M-SEARCH pour un type donné. Le MX est borné par le
    /// codec ([1, 5]).
    pub fn send_msearch(&self, st: &str, mx: u32) -> std::io::Result<()> {
        let msg = SsdpMessage::Search {
            mx,
            st: st.to_string(),
            user_agent: "nox UPnP/1.1 control point".to_string(),
        };

        let addr: SocketAddr = format!("{}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT)
            .parse()
            .unwrap();

        match self.socket.send_to(msg.encode().as_bytes(), addr) {
            Ok(_) => {
                info!("📤 M-SEARCH sent (ST={}, MX={})", st, mx);
                Ok(())
            }
            Err(e) => {
                warn!("❌ Failed to send M-SEARCH: {}", e);
                Err(e)
            }
        }
    }

    /// Demande l'arrêt de la boucle de réception.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Boucle de réception bloquante pour traiter les événements SSDP.
    ///
    /// Retourne quand [`stop`](Self::stop) a été appelé.
    pub fn run_event_loop<F>(&self, mut on_event: F)
    where
        F: FnMut(SsdpEvent) + Send + 'static,
    {
        let socket = Arc::clone(&self.socket);
        let mut buf = [0u8; 8192];
        while !self.stop.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let data = String::from_utf8_lossy(&buf[..n]);
                    match parse_event(&data, from) {
                        Ok(Some(event)) => {
                            debug!("📥 SSDP event from {}: {:?}", from, event);
                            on_event(event);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // MalformedMessage : ignoré en silence (trace
                            // pour le debug seulement)
                            trace!("SSDP message from {} dropped: {}", from, e);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // Timeout, recommencer
                    continue;
                }
                Err(e) => {
                    warn!("❌ SSDP client read error: {}", e);
                }
            }
        }
    }
}

/// Convertit un datagramme en événement control point.
///
/// `Ok(None)` pour les messages valides qui ne nous concernent pas
/// (M-SEARCH d'un autre control point).
fn parse_event(data: &str, from: SocketAddr) -> Result<Option<SsdpEvent>, SsdpError> {
    let event = match SsdpMessage::decode(data)? {
        SsdpMessage::Alive {
            max_age,
            location,
            nt,
            server,
            usn,
            boot_id,
            ..
        } => Some(SsdpEvent::Alive {
            usn,
            nt,
            location,
            server,
            max_age,
            boot_id,
            from,
        }),
        SsdpMessage::ByeBye { nt, usn, .. } => Some(SsdpEvent::ByeBye { usn, nt, from }),
        SsdpMessage::Update {
            location,
            nt,
            usn,
            boot_id,
            next_boot_id,
            ..
        } => Some(SsdpEvent::Update {
            usn,
            nt,
            location,
            boot_id,
            next_boot_id,
            from,
        }),
        SsdpMessage::SearchResponse {
            max_age,
            location,
            server,
            st,
            usn,
            boot_id,
            ..
        } => Some(SsdpEvent::SearchResponse {
            usn,
            st,
            location,
            server,
            max_age,
            boot_id,
            from,
        }),
        // Un autre control point nous interroge ; nous ne sommes pas un
        // device, on ignore.
        SsdpMessage::Search { .. } => None,
    };
    Ok(event)
}
