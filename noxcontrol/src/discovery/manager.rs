//! SSDP events -> discovery cache updates.

use std::sync::{Arc, RwLock};
use std::thread;

use crossbeam_channel::{bounded, Sender};
use noxupnp::ssdp::SsdpEvent;
use tracing::{debug, warn};

use crate::registry::{AliveOutcome, DiscoveryCache};

use super::extract_udn_from_usn;
use super::provider::DescriptionProvider;

/// Pending description fetches are bounded; a full queue drops the fetch
/// (the next periodic ALIVE will retry).
const FETCH_QUEUE_DEPTH: usize = 10;
const FETCH_WORKERS: usize = 3;

/// Task to fetch a device description.
struct FetchTask {
    udn: String,
    location: String,
}

/// Applies SSDP events to the cache and schedules description fetches.
pub struct DiscoveryManager {
    cache: Arc<RwLock<DiscoveryCache>>,
    fetch_tx: Sender<FetchTask>,
}

impl DiscoveryManager {
    /// Spawns the fetch worker pool and returns the manager.
    pub fn new(
        cache: Arc<RwLock<DiscoveryCache>>,
        provider: Arc<dyn DescriptionProvider>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = bounded::<FetchTask>(FETCH_QUEUE_DEPTH);

        for _ in 0..FETCH_WORKERS {
            let fetch_rx = fetch_rx.clone();
            let provider = Arc::clone(&provider);
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                while let Ok(task) = fetch_rx.recv() {
                    match provider.fetch(&task.location) {
                        Ok(description) => {
                            let mut cache = cache.write().unwrap();
                            cache.attach_description(&task.udn, Arc::new(description));
                        }
                        Err(e) => {
                            warn!(
                                udn = task.udn.as_str(),
                                location = task.location.as_str(),
                                error = %e,
                                "Description fetch failed"
                            );
                        }
                    }
                }
            });
        }

        Self { cache, fetch_tx }
    }

    pub fn cache(&self) -> Arc<RwLock<DiscoveryCache>> {
        Arc::clone(&self.cache)
    }

    /// Applies one SSDP event.
    pub fn handle_ssdp_event(&self, event: SsdpEvent) {
        match event {
            SsdpEvent::Alive {
                usn,
                location,
                server,
                max_age,
                boot_id,
                ..
            }
            | SsdpEvent::SearchResponse {
                usn,
                location,
                server,
                max_age,
                boot_id,
                ..
            } => {
                let Some(udn) = extract_udn_from_usn(&usn) else {
                    return;
                };
                let (outcome, wants_fetch) = {
                    let mut cache = self.cache.write().unwrap();
                    let outcome =
                        cache.upsert_alive(&udn, &location, &server, max_age, boot_id);
                    (outcome, cache.needs_description(&udn))
                };

                if matches!(outcome, AliveOutcome::New | AliveOutcome::Rebooted) || wants_fetch {
                    // try_send: a full queue just skips this fetch
                    let _ = self.fetch_tx.try_send(FetchTask { udn, location });
                }
            }
            SsdpEvent::Update {
                usn,
                location,
                boot_id,
                next_boot_id,
                ..
            } => {
                let Some(udn) = extract_udn_from_usn(&usn) else {
                    return;
                };
                let needs_fetch = {
                    let mut cache = self.cache.write().unwrap();
                    cache.apply_update(&udn, &location, boot_id, next_boot_id)
                };
                if needs_fetch {
                    let _ = self.fetch_tx.try_send(FetchTask { udn, location });
                }
            }
            SsdpEvent::ByeBye { usn, .. } => {
                let Some(udn) = extract_udn_from_usn(&usn) else {
                    return;
                };
                let mut cache = self.cache.write().unwrap();
                if !cache.remove(&udn) {
                    debug!("byebye for unknown device {}", udn);
                }
            }
        }
    }
}
