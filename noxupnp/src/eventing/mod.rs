//! # Publication d'événements GENA (côté host)
//!
//! Gère les abonnements d'un service éventé et la livraison des NOTIFY.
//!
//! ## Garanties
//!
//! - ✅ NOTIFY initial avec `SEQ: 0` et la valeur courante de chaque
//!   variable éventée, envoyé dès l'acceptation du SUBSCRIBE
//! - ✅ SEQ strictement croissant par abonnement, wrap de `0xFFFFFFFF`
//!   vers `1` (jamais vers `0`, réservé à l'événement initial)
//! - ✅ FIFO par abonnement, au plus un NOTIFY en vol
//! - ✅ Un NOTIFY en échec (non-2xx ou erreur transport) termine
//!   l'abonnement : l'abonné a perdu l'intégrité de la séquence
//! - ✅ Expiration sans renouvellement → ressources libérées

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gena::{build_property_set, DEFAULT_SUBSCRIPTION_TIMEOUT, NTS_PROPCHANGE, NT_EVENT};

/// Erreurs du publisher d'événements.
#[derive(Error, Debug)]
pub enum EventError {
    /// SID inconnu (renouvellement ou désabonnement)
    #[error("Unknown subscription '{0}'")]
    UnknownSid(String),

    /// SUBSCRIBE sans les en-têtes requis
    #[error("Subscription request is missing {0}")]
    PreconditionFailed(&'static str),
}

struct OutgoingNotify {
    seq: u32,
    body: String,
}

struct Subscription {
    timeout: Duration,
    expires_at: Instant,
    next_seq: u32,
    queue_tx: mpsc::UnboundedSender<OutgoingNotify>,
    alive: Arc<AtomicBool>,
}

impl Subscription {
    /// Alloue le prochain SEQ. 0 n'est produit qu'une fois (événement
    /// initial) ; le wrap revient à 1.
    fn allocate_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = next_seq_after(seq);
        seq
    }
}

/// SEQ suivant, wrap-aware.
fn next_seq_after(seq: u32) -> u32 {
    if seq == u32::MAX {
        1
    } else {
        seq + 1
    }
}

struct PublisherInner {
    subscriptions: HashMap<String, Subscription>,
}

/// Publisher d'événements d'un service hébergé.
#[derive(Clone)]
pub struct EventPublisher {
    service_id: String,
    inner: Arc<Mutex<PublisherInner>>,
}

impl EventPublisher {
    pub fn new(service_id: String) -> Self {
        Self {
            service_id,
            inner: Arc::new(Mutex::new(PublisherInner {
                subscriptions: HashMap::new(),
            })),
        }
    }

    /// Nombre d'abonnements actifs.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscriptions.len()
    }

    /// Accepte un nouvel abonnement.
    ///
    /// Alloue un SID frais, arme l'expiration et enfile immédiatement le
    /// NOTIFY initial (`SEQ: 0`) portant la valeur courante de chaque
    /// variable éventée. Doit être appelé depuis un runtime tokio.
    ///
    /// Retourne `(SID, timeout accordé)`.
    pub fn subscribe(
        &self,
        callbacks: Vec<String>,
        requested_timeout: Option<Duration>,
        initial_properties: Vec<(String, String)>,
    ) -> Result<(String, Duration), EventError> {
        if callbacks.is_empty() {
            return Err(EventError::PreconditionFailed("CALLBACK"));
        }

        let sid = format!("uuid:{}", Uuid::new_v4());
        let timeout = requested_timeout.unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT);
        let alive = Arc::new(AtomicBool::new(true));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let mut subscription = Subscription {
            timeout,
            expires_at: Instant::now() + timeout,
            next_seq: 0,
            queue_tx,
            alive: alive.clone(),
        };

        // Événement initial : consomme SEQ 0, même sans variable éventée,
        // pour que le premier changement parte toujours avec SEQ 1.
        let initial = OutgoingNotify {
            seq: subscription.allocate_seq(),
            body: build_property_set(&initial_properties),
        };
        let _ = subscription.queue_tx.send(initial);

        {
            let mut inner = self.inner.lock().unwrap();
            inner.subscriptions.insert(sid.clone(), subscription);
        }

        info!(
            "🔒 New subscription on {}: SID={}, callbacks={:?}, timeout={}s",
            self.service_id,
            sid,
            callbacks,
            timeout.as_secs()
        );

        tokio::spawn(delivery_loop(
            sid.clone(),
            callbacks,
            queue_rx,
            Arc::clone(&self.inner),
            alive,
        ));

        Ok((sid, timeout))
    }

    /// Renouvelle un abonnement existant. Pas de dump initial.
    pub fn renew(
        &self,
        sid: &str,
        requested_timeout: Option<Duration>,
    ) -> Result<Duration, EventError> {
        let mut inner = self.inner.lock().unwrap();
        let subscription = inner
            .subscriptions
            .get_mut(sid)
            .ok_or_else(|| EventError::UnknownSid(sid.to_string()))?;

        let timeout = requested_timeout.unwrap_or(subscription.timeout);
        subscription.timeout = timeout;
        subscription.expires_at = Instant::now() + timeout;

        info!("♻️ Renewed SID {} for {}s", sid, timeout.as_secs());
        Ok(timeout)
    }

    /// Supprime un abonnement ; les notifications en attente sont
    /// abandonnées.
    pub fn unsubscribe(&self, sid: &str) -> Result<(), EventError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.subscriptions.remove(sid) {
            Some(subscription) => {
                subscription.alive.store(false, Ordering::SeqCst);
                info!("❌ Unsubscribe SID={}", sid);
                Ok(())
            }
            None => Err(EventError::UnknownSid(sid.to_string())),
        }
    }

    /// Publie un changement de variables éventées vers tous les abonnés.
    ///
    /// Un NOTIFY est enfilé par abonnement avec `SEQ = lastSeq + 1` ;
    /// l'ordre d'appel est l'ordre de livraison (FIFO par abonnement).
    pub fn publish(&self, properties: &[(String, String)]) {
        if properties.is_empty() {
            return;
        }
        let body = build_property_set(properties);

        let mut inner = self.inner.lock().unwrap();
        for (sid, subscription) in inner.subscriptions.iter_mut() {
            let notify = OutgoingNotify {
                seq: subscription.allocate_seq(),
                body: body.clone(),
            };
            if subscription.queue_tx.send(notify).is_err() {
                debug!("Subscription {} queue is gone", sid);
            }
        }
    }

    /// Retire les abonnements expirés.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let expired: Vec<String> = inner
            .subscriptions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(sid, _)| sid.clone())
            .collect();
        for sid in expired {
            if let Some(subscription) = inner.subscriptions.remove(&sid) {
                subscription.alive.store(false, Ordering::SeqCst);
                info!("⏰ Subscription {} expired without renewal", sid);
            }
        }
    }

    /// Démarre le balayage périodique des expirations.
    pub fn start_expiry_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                publisher.sweep_expired();
            }
        })
    }

    /// Termine tous les abonnements (arrêt du host).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        for (_, subscription) in inner.subscriptions.drain() {
            subscription.alive.store(false, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    fn force_next_seq(&self, sid: &str, next_seq: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscriptions.get_mut(sid).unwrap().next_seq = next_seq;
    }

    #[cfg(test)]
    fn peek_next_seq(&self, sid: &str) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        inner.subscriptions.get(sid).map(|s| s.next_seq)
    }
}

/// Boucle de livraison d'un abonnement : FIFO, un NOTIFY en vol à la
/// fois. Les URLs de callback sont essayées dans l'ordre ; si aucune ne
/// répond 2xx, l'abonnement est terminé sans retry.
async fn delivery_loop(
    sid: String,
    callbacks: Vec<String>,
    mut queue_rx: mpsc::UnboundedReceiver<OutgoingNotify>,
    inner: Arc<Mutex<PublisherInner>>,
    alive: Arc<AtomicBool>,
) {
    let client = reqwest::Client::new();

    while let Some(notify) = queue_rx.recv().await {
        if !alive.load(Ordering::SeqCst) {
            break;
        }

        let mut delivered = false;
        for callback in &callbacks {
            match send_notify(&client, callback, &sid, notify.seq, &notify.body).await {
                Ok(status) if status.is_success() => {
                    debug!("✅ NOTIFY SEQ={} delivered to {}", notify.seq, callback);
                    delivered = true;
                    break;
                }
                Ok(status) => {
                    warn!(
                        "NOTIFY SEQ={} to {} answered {}",
                        notify.seq, callback, status
                    );
                }
                Err(e) => {
                    warn!("NOTIFY SEQ={} to {} failed: {}", notify.seq, callback, e);
                }
            }
        }

        if !delivered {
            // L'abonné a raté un événement : la séquence est rompue, on
            // termine l'abonnement plutôt que de réessayer.
            alive.store(false, Ordering::SeqCst);
            inner.lock().unwrap().subscriptions.remove(&sid);
            warn!("💀 Subscription {} terminated after failed NOTIFY", sid);
            break;
        }
    }
}

async fn send_notify(
    client: &reqwest::Client,
    callback: &str,
    sid: &str,
    seq: u32,
    body: &str,
) -> Result<reqwest::StatusCode, reqwest::Error> {
    let callback = callback.trim().trim_matches(|c| c == '<' || c == '>');
    let response = client
        .request(
            reqwest::Method::from_bytes(b"NOTIFY").unwrap(),
            callback,
        )
        .header("Content-Type", r#"text/xml; charset="utf-8""#)
        .header("NT", NT_EVENT)
        .header("NTS", NTS_PROPCHANGE)
        .header("SID", sid)
        .header("SEQ", seq.to_string())
        .body(body.to_string())
        .send()
        .await?;
    Ok(response.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc as std_mpsc;

    use crate::http::codec::{read_request, DEFAULT_MAX_BODY};

    #[test]
    fn test_seq_wrap_rule() {
        assert_eq!(next_seq_after(0), 1);
        assert_eq!(next_seq_after(41), 42);
        // wrap : 0xFFFFFFFF -> 1, jamais 0
        assert_eq!(next_seq_after(u32::MAX), 1);
    }

    /// Stub HTTP qui accepte des NOTIFY et pousse (seq, status envoyé)
    /// dans un canal.
    fn spawn_notify_stub(
        responses: Vec<u16>,
    ) -> (String, std_mpsc::Receiver<(u32, Vec<(String, String)>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = std_mpsc::channel();

        std::thread::spawn(move || {
            let mut responses = responses.into_iter();
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let Ok(request) = read_request(&mut reader, DEFAULT_MAX_BODY) else {
                    continue;
                };
                let seq: u32 = request.header("seq").unwrap().parse().unwrap();
                let properties =
                    crate::gena::parse_property_set(&request.body).unwrap_or_default();
                let status = responses.next().unwrap_or(200);
                let _ = stream.write_all(
                    format!(
                        "HTTP/1.1 {} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status
                    )
                    .as_bytes(),
                );
                let _ = tx.send((seq, properties));
                if status != 200 {
                    break;
                }
            }
        });

        (format!("http://127.0.0.1:{}/cb", port), rx)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initial_notify_then_ordered_seq() {
        let (callback, rx) = spawn_notify_stub(vec![]);
        let publisher = EventPublisher::new("SwitchPower".to_string());

        let (sid, timeout) = publisher
            .subscribe(
                vec![callback],
                None,
                vec![("Status".to_string(), "0".to_string())],
            )
            .unwrap();
        assert!(sid.starts_with("uuid:"));
        assert_eq!(timeout, Duration::from_secs(1800));

        publisher.publish(&[("Status".to_string(), "1".to_string())]);
        publisher.publish(&[("Status".to_string(), "0".to_string())]);

        let deadline = Duration::from_secs(5);
        let (seq0, props0) = rx.recv_timeout(deadline).unwrap();
        let (seq1, props1) = rx.recv_timeout(deadline).unwrap();
        let (seq2, _) = rx.recv_timeout(deadline).unwrap();

        assert_eq!(seq0, 0);
        assert_eq!(props0, vec![("Status".to_string(), "0".to_string())]);
        assert_eq!(seq1, 1);
        assert_eq!(props1, vec![("Status".to_string(), "1".to_string())]);
        assert_eq!(seq2, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_notify_terminates_subscription() {
        // le stub répond 200 à l'initial puis 500
        let (callback, rx) = spawn_notify_stub(vec![200, 500]);
        let publisher = EventPublisher::new("SwitchPower".to_string());

        let (_sid, _) = publisher.subscribe(vec![callback], None, vec![]).unwrap();
        assert_eq!(publisher.subscriber_count(), 1);

        let deadline = Duration::from_secs(5);
        rx.recv_timeout(deadline).unwrap(); // initial

        publisher.publish(&[("Status".to_string(), "1".to_string())]);
        rx.recv_timeout(deadline).unwrap(); // le 500

        // l'abonnement doit disparaître sans retry
        let mut waited = Duration::ZERO;
        while publisher.subscriber_count() > 0 && waited < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_seq_wraps_to_one() {
        let (callback, rx) = spawn_notify_stub(vec![]);
        let publisher = EventPublisher::new("SwitchPower".to_string());
        let (sid, _) = publisher.subscribe(vec![callback], None, vec![]).unwrap();

        let deadline = Duration::from_secs(5);
        rx.recv_timeout(deadline).unwrap(); // initial, SEQ 0

        publisher.force_next_seq(&sid, u32::MAX);
        publisher.publish(&[("Status".to_string(), "1".to_string())]);
        let (seq, _) = rx.recv_timeout(deadline).unwrap();
        assert_eq!(seq, u32::MAX);
        assert_eq!(publisher.peek_next_seq(&sid), Some(1));

        publisher.publish(&[("Status".to_string(), "0".to_string())]);
        let (seq, _) = rx.recv_timeout(deadline).unwrap();
        assert_eq!(seq, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_renew_and_expiry() {
        let (callback, _rx) = spawn_notify_stub(vec![]);
        let publisher = EventPublisher::new("SwitchPower".to_string());
        let (sid, _) = publisher
            .subscribe(vec![callback], Some(Duration::from_millis(10)), vec![])
            .unwrap();

        assert!(publisher.renew(&sid, Some(Duration::from_millis(10))).is_ok());
        assert!(matches!(
            publisher.renew("uuid:nope", None),
            Err(EventError::UnknownSid(_))
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.sweep_expired();
        assert_eq!(publisher.subscriber_count(), 0);
        assert!(matches!(
            publisher.unsubscribe(&sid),
            Err(EventError::UnknownSid(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subscribe_requires_callback() {
        let publisher = EventPublisher::new("SwitchPower".to_string());
        assert!(matches!(
            publisher.subscribe(vec![], None, vec![]),
            Err(EventError::PreconditionFailed("CALLBACK"))
        ));
    }
}
