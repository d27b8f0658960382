//! Control point composer.
//!
//! Wires the SSDP client, the discovery manager and cache, the event sink
//! and the invoker into one runtime:
//!
//! - an SSDP listener thread feeds discovery events to the manager,
//! - an initial M-SEARCH burst (repeated periodically) probes the network,
//! - a maintenance thread sweeps cache expiries and, when enabled,
//!   auto-subscribes to the services of newly described devices.
//!
//! The runtime is the single source of truth for device state: callers
//! consume copy-on-read snapshots and treat bus events as refresh hints.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use noxupnp::services::Service;
use noxupnp::ssdp::SsdpClient;

use crate::discovery::{resolve_url, DiscoveryManager, HttpXmlDescriptionProvider};
use crate::errors::ControlError;
use crate::event_sink::EventSink;
use crate::invoker::ActionProxy;
use crate::model::{DeviceDescription, DiscoveredDevice, StateVarUpdate};
use crate::registry::DiscoveryCache;

/// Configuration of a control point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPointConfiguration {
    /// Search targets probed at startup and on each renewal
    pub search_targets: Vec<String>,

    /// MX value of the M-SEARCH requests (clamped to [1, 5] on the wire)
    pub msearch_mx: u32,

    /// Period of the M-SEARCH renewal burst, seconds
    pub msearch_interval_secs: u64,

    /// HTTP timeout for description fetches, seconds
    pub description_timeout_secs: u64,

    /// SOAP call timeout, seconds
    pub soap_timeout_secs: u64,

    /// Subscribe to every evented service of newly described devices
    pub auto_subscribe: bool,
}

impl Default for ControlPointConfiguration {
    fn default() -> Self {
        Self {
            search_targets: vec!["ssdp:all".to_string()],
            msearch_mx: 3,
            msearch_interval_secs: 120,
            description_timeout_secs: 5,
            soap_timeout_secs: 30,
            auto_subscribe: false,
        }
    }
}

impl ControlPointConfiguration {
    fn validate(&self) -> Result<(), ControlError> {
        if self.search_targets.is_empty() {
            return Err(ControlError::InvalidConfiguration(
                "search_targets is empty".to_string(),
            ));
        }
        if self.soap_timeout_secs == 0 {
            return Err(ControlError::InvalidConfiguration(
                "soap_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// UPnP control point.
pub struct ControlPoint {
    config: ControlPointConfiguration,
    cache: Arc<RwLock<DiscoveryCache>>,
    sink: EventSink,
    client: SsdpClient,
    stop: Arc<AtomicBool>,
}

impl ControlPoint {
    /// Starts the discovery and maintenance threads and sends the initial
    /// M-SEARCH burst.
    pub fn spawn(config: ControlPointConfiguration) -> Result<Self, ControlError> {
        config.validate()?;

        let cache = Arc::new(RwLock::new(DiscoveryCache::new()));
        let sink = EventSink::spawn(Duration::from_secs(config.description_timeout_secs))
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        let client = SsdpClient::new().map_err(|e| ControlError::Transport(e.to_string()))?;
        let stop = Arc::new(AtomicBool::new(false));

        // initial search; failures are logged, periodic renewal will retry
        for target in &config.search_targets {
            if let Err(e) = client.send_msearch(target, config.msearch_mx) {
                warn!(target = target.as_str(), error = %e, "Initial M-SEARCH failed");
            }
        }

        // Discovery thread: provider and manager live inside the thread.
        let discovery_client = client.clone();
        let discovery_cache = Arc::clone(&cache);
        let description_timeout = config.description_timeout_secs;
        thread::Builder::new()
            .name("nox-discovery".into())
            .spawn(move || {
                let provider = Arc::new(HttpXmlDescriptionProvider::new(description_timeout));
                let manager = DiscoveryManager::new(discovery_cache, provider);
                discovery_client.run_event_loop(move |event| manager.handle_ssdp_event(event));
            })
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        // Maintenance thread: expiry sweep, M-SEARCH renewal, auto-subscribe.
        let maintenance_cache = Arc::clone(&cache);
        let maintenance_client = client.clone();
        let maintenance_sink = sink.clone();
        let maintenance_stop = Arc::clone(&stop);
        let maintenance_config = config.clone();
        thread::Builder::new()
            .name("nox-maintenance".into())
            .spawn(move || {
                run_maintenance(
                    maintenance_config,
                    maintenance_cache,
                    maintenance_client,
                    maintenance_sink,
                    maintenance_stop,
                )
            })
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        info!("✅ Control point started");
        Ok(Self {
            config,
            cache,
            sink,
            client,
            stop,
        })
    }

    /// Copy-on-read snapshot of the discovery cache.
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.cache.read().unwrap().snapshot()
    }

    /// Snapshot of one device.
    pub fn device(&self, udn: &str) -> Option<DiscoveredDevice> {
        self.cache.read().unwrap().get(udn)
    }

    /// Parsed description of a device, if fetched already.
    pub fn description(&self, udn: &str) -> Option<Arc<DeviceDescription>> {
        self.device(udn).and_then(|d| d.description)
    }

    /// Builds an [`ActionProxy`] for an action of a described device.
    ///
    /// The control endpoints cover every known LOCATION of the device, so
    /// the invoker can fail over between them.
    pub fn action_proxy(
        &self,
        udn: &str,
        service: Arc<Service>,
        action: &str,
    ) -> Result<ActionProxy, ControlError> {
        let device = self
            .device(udn)
            .ok_or_else(|| ControlError::InvalidArgs(format!("unknown device {}", udn)))?;
        let description = device.description.clone().ok_or_else(|| {
            ControlError::InvalidDescription(format!("device {} not described yet", udn))
        })?;

        let type_prefix = strip_version(&service.service_type());
        let endpoints = description.find_service(&type_prefix).ok_or_else(|| {
            ControlError::InvalidDescription(format!(
                "device {} has no service {}",
                udn, type_prefix
            ))
        })?;

        let mut urls: Vec<String> = Vec::new();
        for location in &device.locations {
            let url = resolve_url(location, &endpoints.control_path);
            if !urls.contains(&url) {
                urls.push(url);
            }
        }

        ActionProxy::new(
            service,
            action,
            urls,
            Duration::from_secs(self.config.soap_timeout_secs),
        )
    }

    /// Subscribes to a service of a described device. Returns the SID.
    pub fn subscribe(&self, udn: &str, service: Arc<Service>) -> Result<String, ControlError> {
        let device = self
            .device(udn)
            .ok_or_else(|| ControlError::InvalidArgs(format!("unknown device {}", udn)))?;
        let description = device.description.clone().ok_or_else(|| {
            ControlError::InvalidDescription(format!("device {} not described yet", udn))
        })?;

        let type_prefix = strip_version(&service.service_type());
        let endpoints = description.find_service(&type_prefix).ok_or_else(|| {
            ControlError::InvalidDescription(format!(
                "device {} has no service {}",
                udn, type_prefix
            ))
        })?;

        let base = device
            .locations
            .first()
            .cloned()
            .unwrap_or_else(|| description.base_url.clone());
        let event_url = resolve_url(&base, &endpoints.event_path);
        self.sink.subscribe(service, &event_url)
    }

    /// Receiver of state-variable updates from every subscription.
    pub fn updates(&self) -> Receiver<StateVarUpdate> {
        self.sink.updates()
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Stops the threads and unsubscribes everything.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.client.stop();
        self.sink.shutdown();
        info!("Control point stopped");
    }
}

impl Drop for ControlPoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_maintenance(
    config: ControlPointConfiguration,
    cache: Arc<RwLock<DiscoveryCache>>,
    client: SsdpClient,
    sink: EventSink,
    stop: Arc<AtomicBool>,
) {
    let interval = Duration::from_secs(config.msearch_interval_secs.max(1));
    let mut last_msearch = Instant::now();
    let auto_subscribed: Mutex<HashSet<String>> = Mutex::new(HashSet::new());

    while !stop.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));

        {
            let mut cache = cache.write().unwrap();
            cache.sweep_expired();
        }

        if last_msearch.elapsed() >= interval {
            for target in &config.search_targets {
                let _ = client.send_msearch(target, config.msearch_mx);
            }
            last_msearch = Instant::now();
        }

        if config.auto_subscribe {
            let snapshot = cache.read().unwrap().snapshot();
            let mut subscribed = auto_subscribed.lock().unwrap();
            for device in snapshot {
                let Some(description) = device.description.as_ref() else {
                    continue;
                };
                let Some(base) = device.locations.first() else {
                    continue;
                };
                for endpoints in description.all_services() {
                    if endpoints.event_path.is_empty() {
                        continue;
                    }
                    let key = format!("{}|{}", device.udn, endpoints.service_id);
                    if subscribed.contains(&key) {
                        continue;
                    }
                    let Some(service) = service_model_from_type(&endpoints.service_type) else {
                        continue;
                    };
                    let event_url = resolve_url(base, &endpoints.event_path);
                    match sink.subscribe(Arc::new(service), &event_url) {
                        Ok(sid) => {
                            info!(
                                udn = device.udn.as_str(),
                                service = endpoints.service_id.as_str(),
                                sid = sid.as_str(),
                                "Auto-subscribed"
                            );
                            subscribed.insert(key);
                        }
                        Err(e) => {
                            warn!(
                                udn = device.udn.as_str(),
                                service = endpoints.service_id.as_str(),
                                error = %e,
                                "Auto-subscription failed"
                            );
                        }
                    }
                }
            }
        }
    }
}

/// `urn:domain:service:Name:Ver` without the version suffix.
fn strip_version(service_type: &str) -> String {
    match service_type.rsplit_once(':') {
        Some((prefix, version)) if version.chars().all(|c| c.is_ascii_digit()) => {
            prefix.to_string()
        }
        _ => service_type.to_string(),
    }
}

/// Minimal service model from a type URN, for model-less subscriptions
/// (values are then delivered untyped).
fn service_model_from_type(service_type: &str) -> Option<Service> {
    let parts: Vec<&str> = service_type.split(':').collect();
    let ["urn", domain, "service", name, version] = parts.as_slice() else {
        return None;
    };
    let mut service = Service::new((*name).to_string());
    service.set_vendor_domain((*domain).to_string());
    if let Ok(version) = version.parse::<u8>() {
        let _ = service.set_version(version);
    }
    Some(service)
}
