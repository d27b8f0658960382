//! GENA event sink.
//!
//! Subscribes to evented services, accepts NOTIFY callbacks on a local
//! HTTP listener and delivers ordered, typed state-variable updates on an
//! [`EventBus`].
//!
//! Sequence integrity: the first NOTIFY of a subscription must carry
//! `SEQ: 0`; every later one must be exactly `last + 1` (wrapping from
//! `0xFFFFFFFF` to `1`). Any gap means events were lost, so the sink
//! drops the subscription and subscribes again from scratch.

use std::collections::HashMap;
use std::io::{self, BufReader, Write};
use std::net::{IpAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};
use ureq::{http, Agent};

use noxupnp::gena::{parse_property_set, parse_timeout_header, NT_EVENT};
use noxupnp::http::codec::{encode_response, read_request, HttpResponse, DEFAULT_MAX_BODY};
use noxupnp::services::Service;
use noxupnp::variable_types::StateValue;

use crate::errors::ControlError;
use crate::model::StateVarUpdate;

const SUBSCRIPTION_TIMEOUT_SECS: u64 = 300;
const HTTP_IDLE_TIMEOUT_SECS: u64 = 30;
const WORKER_LOOP_INTERVAL_MILLIS: u64 = 250;
const COMMAND_REPLY_TIMEOUT_SECS: u64 = 10;

/// Fan-out bus for state-variable updates.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<StateVarUpdate>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<StateVarUpdate> {
        let (tx, rx) = unbounded::<StateVarUpdate>();
        {
            let mut subscribers = self.subscribers.lock().unwrap();
            subscribers.push(tx);
        }
        rx
    }

    pub(crate) fn broadcast(&self, update: StateVarUpdate) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

struct IncomingNotify {
    path: String,
    sid: Option<String>,
    seq: Option<u32>,
    body: Vec<u8>,
}

enum Command {
    Subscribe {
        service: Arc<Service>,
        event_url: String,
        reply: Sender<Result<String, ControlError>>,
    },
    Unsubscribe {
        sid: String,
        reply: Sender<Result<(), ControlError>>,
    },
    ReadCurrent {
        sid: String,
        variable: String,
        reply: Sender<Option<StateValue>>,
    },
    ActiveCount {
        reply: Sender<usize>,
    },
    Shutdown,
}

/// GENA sink: one NOTIFY listener, one worker owning the subscriptions.
#[derive(Clone)]
pub struct EventSink {
    command_tx: Sender<Command>,
    bus: EventBus,
}

impl EventSink {
    /// Binds the callback listener on an ephemeral port and spawns the
    /// worker.
    pub fn spawn(http_timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind("0.0.0.0:0")?;
        let listener_port = listener.local_addr()?.port();
        info!("Event sink listener bound on port {}", listener_port);

        let (notify_tx, notify_rx) = unbounded::<IncomingNotify>();
        thread::Builder::new()
            .name("nox-event-http".into())
            .spawn(move || run_http_listener(listener, notify_tx))?;

        let (command_tx, command_rx) = unbounded::<Command>();
        let bus = EventBus::new();
        let worker = EventSinkWorker::new(listener_port, http_timeout, notify_rx, command_rx, bus.clone());
        thread::Builder::new()
            .name("nox-event-worker".into())
            .spawn(move || worker.run())?;

        Ok(Self { command_tx, bus })
    }

    /// Receiver of every update the sink delivers.
    pub fn updates(&self) -> Receiver<StateVarUpdate> {
        self.bus.subscribe()
    }

    /// Subscribes to a service's event URL. Returns the SID.
    ///
    /// The service model drives value coercion; variables absent from the
    /// model are delivered as strings.
    pub fn subscribe(
        &self,
        service: Arc<Service>,
        event_url: &str,
    ) -> Result<String, ControlError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(Command::Subscribe {
                service,
                event_url: event_url.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| ControlError::Transport("event sink worker is gone".to_string()))?;
        reply_rx
            .recv_timeout(Duration::from_secs(COMMAND_REPLY_TIMEOUT_SECS))
            .map_err(|_| ControlError::Timeout)?
    }

    pub fn unsubscribe(&self, sid: &str) -> Result<(), ControlError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(Command::Unsubscribe {
                sid: sid.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| ControlError::Transport("event sink worker is gone".to_string()))?;
        reply_rx
            .recv_timeout(Duration::from_secs(COMMAND_REPLY_TIMEOUT_SECS))
            .map_err(|_| ControlError::Timeout)?
    }

    /// Last value delivered for a variable of a subscription.
    pub fn read_current(&self, sid: &str, variable: &str) -> Option<StateValue> {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(Command::ReadCurrent {
                sid: sid.to_string(),
                variable: variable.to_string(),
                reply: reply_tx,
            })
            .ok()?;
        reply_rx
            .recv_timeout(Duration::from_secs(COMMAND_REPLY_TIMEOUT_SECS))
            .ok()
            .flatten()
    }

    /// Number of live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .command_tx
            .send(Command::ActiveCount { reply: reply_tx })
            .is_err()
        {
            return 0;
        }
        reply_rx
            .recv_timeout(Duration::from_secs(COMMAND_REPLY_TIMEOUT_SECS))
            .unwrap_or(0)
    }

    /// Unsubscribes everything and stops the worker.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

/// Callback listener: sequential HTTP/1.1 on each connection, keep-alive
/// until close or idle timeout. NOTIFY is routed to the worker; any other
/// method gets a 405.
fn run_http_listener(listener: TcpListener, notify_tx: Sender<IncomingNotify>) {
    for stream in listener.incoming() {
        let Ok(stream) = stream else { continue };
        let notify_tx = notify_tx.clone();
        thread::spawn(move || handle_connection(stream, notify_tx));
    }
}

fn handle_connection(mut stream: TcpStream, notify_tx: Sender<IncomingNotify>) {
    if stream
        .set_read_timeout(Some(Duration::from_secs(HTTP_IDLE_TIMEOUT_SECS)))
        .is_err()
    {
        return;
    }
    let Ok(clone) = stream.try_clone() else { return };
    let mut reader = BufReader::new(clone);

    loop {
        let request = match read_request(&mut reader, DEFAULT_MAX_BODY) {
            Ok(request) => request,
            Err(noxupnp::http::codec::HttpCodecError::ConnectionClosed) => return,
            Err(e) => {
                debug!("Dropping callback connection: {}", e);
                let _ = stream.write_all(&encode_response(&HttpResponse::new(400)));
                return;
            }
        };

        let keep_alive = request.wants_keep_alive();

        if request.method == "NOTIFY" {
            let notify = IncomingNotify {
                path: request.target.clone(),
                sid: request.header("sid").map(|s| s.to_string()),
                seq: request.header("seq").and_then(|s| s.trim().parse().ok()),
                body: request.body,
            };
            if notify_tx.send(notify).is_err() {
                warn!("Dropping notify because the worker channel is closed");
            }
            let _ = stream.write_all(&encode_response(&HttpResponse::new(200)));
        } else {
            let _ = stream.write_all(&encode_response(&HttpResponse::new(405)));
        }

        if !keep_alive {
            return;
        }
    }
}

struct SinkSubscription {
    service: Arc<Service>,
    event_url: String,
    callback_path: String,
    timeout: Duration,
    expires_at: Instant,
    renew_at: Instant,
    /// SEQ the next NOTIFY must carry; 0 until the initial event arrives
    expected_seq: u32,
    current: HashMap<String, StateValue>,
}

struct EventSinkWorker {
    listener_port: u16,
    http_timeout: Duration,
    notify_rx: Receiver<IncomingNotify>,
    command_rx: Receiver<Command>,
    bus: EventBus,
    subscriptions: HashMap<String, SinkSubscription>,
    path_index: HashMap<String, String>,
    path_counter: u64,
}

impl EventSinkWorker {
    fn new(
        listener_port: u16,
        http_timeout: Duration,
        notify_rx: Receiver<IncomingNotify>,
        command_rx: Receiver<Command>,
        bus: EventBus,
    ) -> Self {
        Self {
            listener_port,
            http_timeout,
            notify_rx,
            command_rx,
            bus,
            subscriptions: HashMap::new(),
            path_index: HashMap::new(),
            path_counter: 0,
        }
    }

    fn run(mut self) {
        let command_rx = self.command_rx.clone();
        let notify_rx = self.notify_rx.clone();
        loop {
            crossbeam_channel::select! {
                recv(command_rx) -> command => match command {
                    Ok(Command::Subscribe { service, event_url, reply }) => {
                        let result = self.subscribe(service, &event_url);
                        let _ = reply.send(result);
                    }
                    Ok(Command::Unsubscribe { sid, reply }) => {
                        let result = self.remove_subscription(&sid, true);
                        let _ = reply.send(result);
                    }
                    Ok(Command::ReadCurrent { sid, variable, reply }) => {
                        let value = self
                            .subscriptions
                            .get(&sid)
                            .and_then(|s| s.current.get(&variable).cloned());
                        let _ = reply.send(value);
                    }
                    Ok(Command::ActiveCount { reply }) => {
                        let _ = reply.send(self.subscriptions.len());
                    }
                    Ok(Command::Shutdown) | Err(_) => {
                        let sids: Vec<String> = self.subscriptions.keys().cloned().collect();
                        for sid in sids {
                            let _ = self.remove_subscription(&sid, true);
                        }
                        return;
                    }
                },
                recv(notify_rx) -> notify => {
                    if let Ok(notify) = notify {
                        self.handle_notify(notify);
                    }
                },
                default(Duration::from_millis(WORKER_LOOP_INTERVAL_MILLIS)) => {},
            }
            self.renew_due();
        }
    }

    fn subscribe(
        &mut self,
        service: Arc<Service>,
        event_url: &str,
    ) -> Result<String, ControlError> {
        self.path_counter += 1;
        let callback_path = format!("/events/{}", self.path_counter);

        let (sid, timeout) = send_subscribe(
            self.http_timeout,
            self.listener_port,
            event_url,
            &callback_path,
        )
        .map_err(|e| ControlError::Transport(e.to_string()))?;

        info!(
            service = service.identifier(),
            sid = sid.as_str(),
            "Subscribed (timeout {}s)",
            timeout.as_secs()
        );

        let subscription = SinkSubscription {
            service,
            event_url: event_url.to_string(),
            callback_path: callback_path.clone(),
            timeout,
            expires_at: Instant::now() + timeout,
            // renewal at timeout x 0.5
            renew_at: Instant::now() + timeout / 2,
            expected_seq: 0,
            current: HashMap::new(),
        };

        self.path_index.insert(callback_path, sid.clone());
        self.subscriptions.insert(sid.clone(), subscription);
        Ok(sid)
    }

    fn remove_subscription(&mut self, sid: &str, send_unsubscribe: bool) -> Result<(), ControlError> {
        let Some(subscription) = self.subscriptions.remove(sid) else {
            return Err(ControlError::SubscriptionLost(format!(
                "unknown SID {}",
                sid
            )));
        };
        self.path_index.remove(&subscription.callback_path);
        if send_unsubscribe {
            send_unsubscribe_request(self.http_timeout, &subscription.event_url, sid);
        }
        Ok(())
    }

    fn handle_notify(&mut self, notify: IncomingNotify) {
        let Some(sid) = self.path_index.get(&notify.path).cloned() else {
            debug!("Dropping notify for unknown path {}", notify.path);
            return;
        };

        let matches_sid = notify
            .sid
            .as_deref()
            .map(|received| received.eq_ignore_ascii_case(&sid))
            .unwrap_or(false);
        if !matches_sid {
            debug!(
                expected = sid.as_str(),
                received = notify.sid.as_deref().unwrap_or("none"),
                "Ignoring notify with mismatched SID"
            );
            return;
        }

        let Some(seq) = notify.seq else {
            debug!("Ignoring notify without SEQ");
            return;
        };

        let expected = self.subscriptions[&sid].expected_seq;
        if seq != expected {
            warn!(
                sid = sid.as_str(),
                expected, seq, "SEQ gap, subscription lost; resubscribing"
            );
            self.resubscribe(&sid);
            return;
        }

        let subscription = self.subscriptions.get_mut(&sid).unwrap();
        subscription.expected_seq = next_expected_seq(seq);

        let properties = match parse_property_set(&notify.body) {
            Ok(properties) => properties,
            Err(e) => {
                warn!(sid = sid.as_str(), error = %e, "Unparseable propertyset");
                return;
            }
        };

        for (variable, raw) in properties {
            let value = match subscription.service.get_variable(&variable) {
                Some(model) => match StateValue::parse(model.value_type(), &raw) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(variable = variable.as_str(), error = %e, "Uncoercible value");
                        continue;
                    }
                },
                // variable absent from the model: deliver as-is
                None => StateValue::String(raw),
            };

            subscription.current.insert(variable.clone(), value.clone());
            self.bus.broadcast(StateVarUpdate {
                sid: sid.clone(),
                service_id: subscription.service.identifier().to_string(),
                variable,
                value,
            });
        }
    }

    /// Recovers sequence integrity: drop the broken subscription and
    /// subscribe again from scratch (fresh SID, SEQ restarts at 0).
    fn resubscribe(&mut self, sid: &str) {
        let Some(old) = self.subscriptions.remove(sid) else {
            return;
        };
        self.path_index.remove(&old.callback_path);
        send_unsubscribe_request(self.http_timeout, &old.event_url, sid);

        match self.subscribe(old.service, &old.event_url) {
            Ok(new_sid) => {
                info!(old = sid, new = new_sid.as_str(), "Resubscribed after SEQ gap");
            }
            Err(e) => {
                warn!(sid = sid, error = %e, "Resubscription failed; subscription dropped");
            }
        }
    }

    fn renew_due(&mut self) {
        let now = Instant::now();

        // expired without a successful renewal: the publisher already
        // dropped us, a plain renewal would 412
        let expired: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(sid, _)| sid.clone())
            .collect();
        for sid in expired {
            warn!(sid = sid.as_str(), "Subscription expired; resubscribing");
            self.resubscribe(&sid);
        }

        let due: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.renew_at <= now)
            .map(|(sid, _)| sid.clone())
            .collect();

        for sid in due {
            let (event_url, timeout) = {
                let subscription = &self.subscriptions[&sid];
                (subscription.event_url.clone(), subscription.timeout)
            };
            match send_renewal(self.http_timeout, &event_url, &sid, timeout) {
                Ok(granted) => {
                    let subscription = self.subscriptions.get_mut(&sid).unwrap();
                    subscription.timeout = granted;
                    subscription.expires_at = Instant::now() + granted;
                    subscription.renew_at = Instant::now() + granted / 2;
                    debug!(sid = sid.as_str(), "Renewed subscription");
                }
                Err(e) => {
                    warn!(sid = sid.as_str(), error = %e, "Renewal failed; resubscribing");
                    self.resubscribe(&sid);
                }
            }
        }
    }
}

/// Expected SEQ after `seq`, wrap-aware.
fn next_expected_seq(seq: u32) -> u32 {
    if seq == u32::MAX {
        1
    } else {
        seq + 1
    }
}

fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .allow_non_standard_methods(true)
        .build()
        .into()
}

fn send_subscribe(
    http_timeout: Duration,
    listener_port: u16,
    event_url: &str,
    callback_path: &str,
) -> Result<(String, Duration)> {
    let (remote_host, remote_port) =
        parse_host_port(event_url).context("Cannot extract host for SUBSCRIBE")?;
    let local_ip = determine_local_ip(&remote_host, remote_port)
        .context("Cannot determine local IP for callback")?;
    let callback_url = format!(
        "http://{}:{}{}",
        format_ip(&local_ip),
        listener_port,
        callback_path
    );

    debug!(
        event_url,
        callback = callback_url.as_str(),
        "Sending SUBSCRIBE"
    );

    let request = http::Request::builder()
        .method("SUBSCRIBE")
        .uri(event_url)
        .header("HOST", format!("{}:{}", remote_host, remote_port))
        .header("CALLBACK", format!("<{}>", callback_url))
        .header("NT", NT_EVENT)
        .header("TIMEOUT", format!("Second-{}", SUBSCRIPTION_TIMEOUT_SECS))
        .body(())
        .map_err(anyhow::Error::new)?;

    let response = build_agent(http_timeout).run(request)?;
    if !response.status().is_success() {
        anyhow::bail!("SUBSCRIBE returned HTTP {}", response.status());
    }

    let sid = response
        .headers()
        .get("SID")
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("SUBSCRIBE response missing SID"))?;
    let timeout = response
        .headers()
        .get("TIMEOUT")
        .and_then(|value| value.to_str().ok())
        .and_then(parse_timeout_header)
        .unwrap_or(Duration::from_secs(SUBSCRIPTION_TIMEOUT_SECS));

    Ok((sid, timeout))
}

fn send_renewal(
    http_timeout: Duration,
    event_url: &str,
    sid: &str,
    timeout: Duration,
) -> Result<Duration> {
    let (remote_host, remote_port) =
        parse_host_port(event_url).context("Cannot extract host for renewal")?;

    let request = http::Request::builder()
        .method("SUBSCRIBE")
        .uri(event_url)
        .header("HOST", format!("{}:{}", remote_host, remote_port))
        .header("SID", sid)
        .header("TIMEOUT", format!("Second-{}", timeout.as_secs()))
        .body(())
        .map_err(anyhow::Error::new)?;

    let response = build_agent(http_timeout).run(request)?;
    if !response.status().is_success() {
        anyhow::bail!("SUBSCRIBE renewal failed with {}", response.status());
    }

    Ok(response
        .headers()
        .get("TIMEOUT")
        .and_then(|value| value.to_str().ok())
        .and_then(parse_timeout_header)
        .unwrap_or(timeout))
}

fn send_unsubscribe_request(http_timeout: Duration, event_url: &str, sid: &str) {
    let Some((remote_host, remote_port)) = parse_host_port(event_url) else {
        return;
    };
    let request = match http::Request::builder()
        .method("UNSUBSCRIBE")
        .uri(event_url)
        .header("HOST", format!("{}:{}", remote_host, remote_port))
        .header("SID", sid)
        .body(())
    {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to build UNSUBSCRIBE request");
            return;
        }
    };

    match build_agent(http_timeout).run(request) {
        Ok(response) if response.status().is_success() => {
            debug!(sid, "Unsubscribed");
        }
        Ok(response) => {
            warn!(sid, status = %response.status(), "UNSUBSCRIBE returned non-success status");
        }
        Err(e) => {
            warn!(sid, error = %e, "UNSUBSCRIBE request failed");
        }
    }
}

fn parse_host_port(url: &str) -> Option<(String, u16)> {
    let default_port = if url.to_ascii_lowercase().starts_with("https://") {
        443
    } else {
        80
    };
    let (_, rest) = url.split_once("://")?;
    let mut parts = rest.splitn(2, '/');
    let authority = parts.next()?.trim();
    if authority.starts_with('[') {
        let end = authority.find(']')?;
        let host = &authority[1..end];
        let remainder = authority.get(end + 1..).unwrap_or("");
        let port = if let Some(stripped) = remainder.strip_prefix(':') {
            stripped.parse().unwrap_or(default_port)
        } else {
            default_port
        };
        Some((host.to_string(), port))
    } else if let Some((host, port)) = authority.split_once(':') {
        Some((host.to_string(), port.parse().ok()?))
    } else {
        Some((authority.to_string(), default_port))
    }
}

fn determine_local_ip(remote_host: &str, remote_port: u16) -> io::Result<IpAddr> {
    let is_ipv6 = remote_host.contains(':') && !remote_host.contains('.');
    let target = if is_ipv6 {
        format!(
            "[{}]:{}",
            remote_host.trim_matches(|c| c == '[' || c == ']'),
            remote_port
        )
    } else {
        format!("{}:{}", remote_host, remote_port)
    };
    let bind_addr = if is_ipv6 { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(&target)?;
    Ok(socket.local_addr()?.ip())
}

fn format_ip(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use noxupnp::gena::build_property_set;
    use noxupnp::http::codec::read_response;
    use noxupnp::state_variables::StateVariable;
    use noxupnp::variable_types::StateVarType;

    fn switch_power() -> Arc<Service> {
        let mut service = Service::new("SwitchPower".to_string());
        let mut status = StateVariable::new("Status", StateVarType::Boolean);
        status.set_send_events(true);
        service.add_variable(Arc::new(status)).unwrap();
        Arc::new(service)
    }

    /// Minimal GENA publisher: answers SUBSCRIBE with a fresh SID and
    /// reports (sid, callback URL) pairs.
    fn spawn_gena_stub() -> (String, Receiver<(String, String)>, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = unbounded();
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_thread = Arc::clone(&count);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let Ok(request) = read_request(&mut reader, DEFAULT_MAX_BODY) else {
                    continue;
                };
                match request.method.as_str() {
                    "SUBSCRIBE" if request.header("sid").is_none() => {
                        let n = count_for_thread.fetch_add(1, Ordering::SeqCst) + 1;
                        let sid = format!("uuid:stub-{}", n);
                        let callback = request
                            .header("callback")
                            .unwrap_or_default()
                            .trim_matches(|c| c == '<' || c == '>')
                            .to_string();
                        let _ = tx.send((sid.clone(), callback));
                        let _ = stream.write_all(
                            format!(
                                "HTTP/1.1 200 OK\r\nSID: {}\r\nTIMEOUT: Second-60\r\nContent-Length: 0\r\n\r\n",
                                sid
                            )
                            .as_bytes(),
                        );
                    }
                    // renewal or unsubscribe
                    _ => {
                        let _ = stream.write_all(
                            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
                        );
                    }
                }
            }
        });

        (format!("http://127.0.0.1:{}/event", port), rx, count)
    }

    /// Sends one NOTIFY to a callback URL, returns the HTTP status.
    fn send_notify(callback: &str, sid: &str, seq: u32, properties: &[(String, String)]) -> u16 {
        let (host, port) = parse_host_port(callback).unwrap();
        let path = callback
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|i| rest[i..].to_string()))
            .unwrap();
        let body = build_property_set(properties);

        let mut stream = TcpStream::connect((host.as_str(), port)).unwrap();
        let request = format!(
            "NOTIFY {} HTTP/1.1\r\nHOST: {}:{}\r\nCONTENT-TYPE: text/xml\r\nNT: upnp:event\r\nNTS: upnp:propchange\r\nSID: {}\r\nSEQ: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            path,
            host,
            port,
            sid,
            seq,
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).unwrap();

        let mut reader = BufReader::new(stream);
        read_response(&mut reader, DEFAULT_MAX_BODY).unwrap().status
    }

    #[test]
    fn test_next_expected_seq_wraps_to_one() {
        assert_eq!(next_expected_seq(0), 1);
        assert_eq!(next_expected_seq(5), 6);
        assert_eq!(next_expected_seq(u32::MAX), 1);
    }

    #[test]
    fn test_subscribe_and_ordered_updates() {
        let sink = EventSink::spawn(Duration::from_secs(5)).unwrap();
        let (event_url, subs_rx, _) = spawn_gena_stub();
        let updates = sink.updates();

        let sid = sink.subscribe(switch_power(), &event_url).unwrap();
        assert_eq!(sid, "uuid:stub-1");
        let (stub_sid, callback) = subs_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(stub_sid, sid);

        // initial event, SEQ 0
        let status = send_notify(
            &callback,
            &sid,
            0,
            &[("Status".to_string(), "0".to_string())],
        );
        assert_eq!(status, 200);
        let update = updates.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(update.variable, "Status");
        assert_eq!(update.value.to_upnp_string(), "0");

        // next event, SEQ 1, coerced to boolean
        send_notify(
            &callback,
            &sid,
            1,
            &[("Status".to_string(), "1".to_string())],
        );
        let update = updates.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(update.value, StateValue::Boolean(true)));

        // read-current-value capability
        let current = sink.read_current(&sid, "Status").unwrap();
        assert_eq!(current.to_upnp_string(), "1");

        sink.shutdown();
    }

    #[test]
    fn test_seq_gap_triggers_resubscribe() {
        let sink = EventSink::spawn(Duration::from_secs(5)).unwrap();
        let (event_url, subs_rx, count) = spawn_gena_stub();
        let updates = sink.updates();

        let sid1 = sink.subscribe(switch_power(), &event_url).unwrap();
        let (_, callback1) = subs_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        send_notify(
            &callback1,
            &sid1,
            0,
            &[("Status".to_string(), "0".to_string())],
        );
        updates.recv_timeout(Duration::from_secs(5)).unwrap();

        // a NOTIFY was lost: SEQ jumps from 0 to 2
        send_notify(
            &callback1,
            &sid1,
            2,
            &[("Status".to_string(), "1".to_string())],
        );

        // the sink must drop the subscription and subscribe again
        let (sid2, callback2) = subs_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(sid2, sid1);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // the gap notify was not delivered
        assert!(updates.recv_timeout(Duration::from_millis(200)).is_err());

        // the fresh subscription starts at SEQ 0 again
        send_notify(
            &callback2,
            &sid2,
            0,
            &[("Status".to_string(), "1".to_string())],
        );
        let update = updates.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(update.value, StateValue::Boolean(true)));

        sink.shutdown();
    }

    #[test]
    fn test_mismatched_sid_ignored() {
        let sink = EventSink::spawn(Duration::from_secs(5)).unwrap();
        let (event_url, subs_rx, _) = spawn_gena_stub();
        let updates = sink.updates();

        let sid = sink.subscribe(switch_power(), &event_url).unwrap();
        let (_, callback) = subs_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        send_notify(
            &callback,
            "uuid:somebody-else",
            0,
            &[("Status".to_string(), "1".to_string())],
        );
        assert!(updates.recv_timeout(Duration::from_millis(200)).is_err());

        // the real subscription is still intact
        send_notify(&callback, &sid, 0, &[("Status".to_string(), "0".to_string())]);
        assert!(updates.recv_timeout(Duration::from_secs(5)).is_ok());

        sink.shutdown();
    }

    #[test]
    fn test_non_notify_method_gets_405() {
        let sink = EventSink::spawn(Duration::from_secs(5)).unwrap();
        let (event_url, subs_rx, _) = spawn_gena_stub();
        let _sid = sink.subscribe(switch_power(), &event_url).unwrap();
        let (_, callback) = subs_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (host, port) = parse_host_port(&callback).unwrap();
        let mut stream = TcpStream::connect((host.as_str(), port)).unwrap();
        stream
            .write_all(b"GET /events/1 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut reader = BufReader::new(stream);
        let response = read_response(&mut reader, DEFAULT_MAX_BODY).unwrap();
        assert_eq!(response.status, 405);

        sink.shutdown();
    }

    #[test]
    fn test_unsubscribe_removes_subscription() {
        let sink = EventSink::spawn(Duration::from_secs(5)).unwrap();
        let (event_url, subs_rx, _) = spawn_gena_stub();

        let sid = sink.subscribe(switch_power(), &event_url).unwrap();
        let _ = subs_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(sink.active_subscriptions(), 1);

        sink.unsubscribe(&sid).unwrap();
        assert_eq!(sink.active_subscriptions(), 0);
        assert!(sink.unsubscribe(&sid).is_err());

        sink.shutdown();
    }
}
