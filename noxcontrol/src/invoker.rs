//! SOAP action invoker.
//!
//! One [`ActionProxy`] per (service, action). All invocations through a
//! proxy are serialized: a FIFO queue feeds a single worker thread, so at
//! most one call is on the wire at any instant and request ordering needs
//! no caller-side coordination.
//!
//! Transport errors advance to the next control endpoint, wrapping once
//! over the location list; a `500` carrying a UPnP fault is a *remote*
//! error and ends the invocation immediately.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use noxupnp::actions::Action;
use noxupnp::services::Service;
use noxupnp::soap::{
    build_soap_request, extract_action_response, parse_soap_envelope, parse_upnp_error,
};
use noxupnp::variable_types::StateValue;
use noxupnp::UpnpTyped;
use tracing::{debug, trace, warn};
use ureq::Agent;

use crate::errors::ControlError;

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Queued,
    Connecting,
    Sending,
    AwaitingResponse,
    Completed,
    Failed,
}

/// Successful invocation result.
#[derive(Debug, Clone)]
pub struct ActionResponse {
    /// OUT arguments in wire order
    pub out_args: Vec<(String, String)>,
    /// Endpoints tried before the call went through
    pub attempts: u32,
}

struct Pending {
    in_args: Vec<(String, String)>,
    reply: Sender<Result<ActionResponse, ControlError>>,
}

/// Serialized invoker for one action of one remote service.
#[derive(Clone)]
pub struct ActionProxy {
    service: Arc<Service>,
    action: Arc<Action>,
    queue_tx: Sender<Pending>,
}

impl ActionProxy {
    /// Builds a proxy for `action_name` on `service`, reachable through
    /// the given control endpoints (one per known device location).
    pub fn new(
        service: Arc<Service>,
        action_name: &str,
        control_urls: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, ControlError> {
        let action = service.get_action(action_name).ok_or_else(|| {
            ControlError::InvalidArgs(format!(
                "service '{}' declares no action '{}'",
                service.identifier(),
                action_name
            ))
        })?;
        if control_urls.is_empty() {
            return Err(ControlError::InvalidConfiguration(
                "no control endpoints".to_string(),
            ));
        }

        let (queue_tx, queue_rx) = unbounded::<Pending>();
        let worker_service_type = service.service_type();
        let worker_action = action_name.to_string();
        thread::Builder::new()
            .name(format!("nox-invoke-{}", action_name))
            .spawn(move || {
                run_worker(
                    worker_service_type,
                    worker_action,
                    control_urls,
                    timeout,
                    queue_rx,
                )
            })
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        Ok(Self {
            service,
            action,
            queue_tx,
        })
    }

    /// Invokes the action and blocks until completion.
    ///
    /// Inputs are validated against the declared IN arguments before
    /// anything touches the wire; a mismatch is [`ControlError::InvalidArgs`]
    /// and is never sent. Calls issued while another is in flight queue up
    /// FIFO.
    pub fn invoke(
        &self,
        in_args: Vec<(String, String)>,
    ) -> Result<ActionResponse, ControlError> {
        self.validate_inputs(&in_args)?;

        let (reply_tx, reply_rx) = bounded(1);
        self.queue_tx
            .send(Pending {
                in_args,
                reply: reply_tx,
            })
            .map_err(|_| ControlError::Transport("invoker worker is gone".to_string()))?;

        reply_rx
            .recv()
            .map_err(|_| ControlError::Transport("invoker worker is gone".to_string()))?
    }

    fn validate_inputs(&self, in_args: &[(String, String)]) -> Result<(), ControlError> {
        for declared in self.action.in_arguments() {
            let Some((_, value)) = in_args.iter().find(|(n, _)| n == declared.get_name()) else {
                return Err(ControlError::InvalidArgs(format!(
                    "missing input argument '{}'",
                    declared.get_name()
                )));
            };
            let Some(variable) = self
                .service
                .get_variable(declared.related_state_variable())
            else {
                return Err(ControlError::InvalidArgs(format!(
                    "argument '{}' references unknown state variable '{}'",
                    declared.get_name(),
                    declared.related_state_variable()
                )));
            };
            StateValue::parse(variable.value_type(), value)
                .map_err(|e| ControlError::InvalidArgs(e.to_string()))?;
        }
        for (name, _) in in_args {
            if self.action.in_arguments().all(|a| a.get_name() != name) {
                return Err(ControlError::InvalidArgs(format!(
                    "unexpected argument '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

fn run_worker(
    service_type: String,
    action_name: String,
    urls: Vec<String>,
    timeout: Duration,
    queue_rx: Receiver<Pending>,
) {
    let agent = build_agent(timeout);
    // persists across invocations: keep using the endpoint that worked
    let mut next_location: usize = 0;

    while let Ok(pending) = queue_rx.recv() {
        let result = perform_invocation(
            &agent,
            &service_type,
            &action_name,
            &urls,
            &mut next_location,
            &pending.in_args,
        );
        let _ = pending.reply.send(result);
    }
}

fn perform_invocation(
    agent: &Agent,
    service_type: &str,
    action_name: &str,
    urls: &[String],
    next_location: &mut usize,
    in_args: &[(String, String)],
) -> Result<ActionResponse, ControlError> {
    let args_ref: Vec<(&str, &str)> = in_args
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    let body = build_soap_request(service_type, action_name, &args_ref)
        .map_err(|e| ControlError::InvalidArgs(e.to_string()))?;
    let soap_action_header = format!(r#""{}#{}""#, service_type, action_name);

    let mut state = InvocationState::Queued;
    let mut attempts: u32 = 0;
    let mut last_error: Option<ControlError> = None;

    // sequential over the endpoint list, wrapping once
    while (attempts as usize) < urls.len() {
        let url = &urls[*next_location % urls.len()];
        attempts += 1;

        state = InvocationState::Connecting;
        trace!(state = ?state, url = url.as_str(), "invocation transition");
        state = InvocationState::Sending;
        trace!(state = ?state, action = action_name, "invocation transition");

        let sent = agent
            .post(url)
            .header("Content-Type", r#"text/xml; charset="utf-8""#)
            .header("SOAPAction", &soap_action_header)
            .send(body.as_str());

        let mut response = match sent {
            Ok(response) => response,
            Err(e) => {
                warn!(url = url.as_str(), error = %e, "SOAP transport error, trying next endpoint");
                last_error = Some(ControlError::Transport(e.to_string()));
                *next_location = (*next_location + 1) % urls.len();
                continue;
            }
        };

        state = InvocationState::AwaitingResponse;
        trace!(state = ?state, status = response.status().as_u16(), "invocation transition");

        let status = response.status();
        let raw_body = match response.body_mut().read_to_string() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(url = url.as_str(), error = %e, "Failed to read SOAP response body");
                last_error = Some(ControlError::Transport(e.to_string()));
                *next_location = (*next_location + 1) % urls.len();
                continue;
            }
        };

        let envelope = parse_soap_envelope(raw_body.as_bytes()).ok();

        if status.is_success() {
            return match envelope
                .as_ref()
                .and_then(|env| extract_action_response(env, action_name))
            {
                Some(out_args) => {
                    state = InvocationState::Completed;
                    debug!(state = ?state, action = action_name, attempts, "invocation done");
                    Ok(ActionResponse { out_args, attempts })
                }
                None => {
                    state = InvocationState::Failed;
                    debug!(state = ?state, action = action_name, "invocation done");
                    Err(ControlError::MalformedMessage(format!(
                        "2xx reply without {}Response element",
                        action_name
                    )))
                }
            };
        }

        // Transport success with a UPnP fault: a remote error, final.
        if let Some(fault) = envelope.as_ref().and_then(|env| parse_upnp_error(env)) {
            state = InvocationState::Failed;
            debug!(state = ?state, code = fault.error_code, "invocation done");
            return Err(ControlError::RemoteFault {
                code: fault.error_code,
                description: fault.error_description,
            });
        }

        last_error = Some(ControlError::Transport(format!(
            "HTTP {} from {}",
            status, url
        )));
        *next_location = (*next_location + 1) % urls.len();
    }

    Err(last_error.unwrap_or_else(|| ControlError::Transport("no control endpoints".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use noxupnp::actions::{Argument, Direction};
    use noxupnp::http::codec::{read_request, DEFAULT_MAX_BODY};
    use noxupnp::soap::{build_soap_fault, build_soap_response};
    use noxupnp::state_variables::StateVariable;
    use noxupnp::variable_types::StateVarType;

    fn switch_power() -> Arc<Service> {
        let mut service = Service::new("SwitchPower".to_string());

        let mut target = StateVariable::new("Target", StateVarType::Boolean);
        target.set_default_value(StateValue::Boolean(false));
        service.add_variable(Arc::new(target)).unwrap();

        let mut set_target = Action::new("SetTarget");
        set_target
            .add_argument(Argument::new("newTargetValue", Direction::In, "Target"))
            .unwrap();
        service.add_action(Arc::new(set_target)).unwrap();

        let mut get_target = Action::new("GetTarget");
        get_target
            .add_argument(Argument::new("RetTargetValue", Direction::Out, "Target"))
            .unwrap();
        service.add_action(Arc::new(get_target)).unwrap();

        Arc::new(service)
    }

    /// Minimal SOAP control endpoint: answers every POST with the given
    /// status and body, tracking peak connection concurrency.
    fn spawn_control_stub(
        status: u16,
        body: String,
        hold: Duration,
    ) -> (String, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let current_for_thread = Arc::clone(&current);
        let peak_for_thread = Arc::clone(&peak);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let current = Arc::clone(&current_for_thread);
                let peak = Arc::clone(&peak_for_thread);
                let body = body.clone();
                thread::spawn(move || {
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    while read_request(&mut reader, DEFAULT_MAX_BODY).is_ok() {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(hold);
                        current.fetch_sub(1, Ordering::SeqCst);

                        let response = format!(
                            "HTTP/1.1 {} X\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n{}",
                            status,
                            body.len(),
                            body
                        );
                        if stream.write_all(response.as_bytes()).is_err() {
                            break;
                        }
                    }
                });
            }
        });

        (format!("http://127.0.0.1:{}/control", port), current, peak)
    }

    #[test]
    fn test_invoke_set_target_returns_empty_out_args() {
        let ok_body = build_soap_response(
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "SetTarget",
            &[],
        )
        .unwrap();
        let (url, _, _) = spawn_control_stub(200, ok_body, Duration::ZERO);

        let proxy = ActionProxy::new(
            switch_power(),
            "SetTarget",
            vec![url],
            Duration::from_secs(5),
        )
        .unwrap();

        let response = proxy
            .invoke(vec![("newTargetValue".to_string(), "1".to_string())])
            .unwrap();
        assert!(response.out_args.is_empty());
        assert_eq!(response.attempts, 1);
    }

    #[test]
    fn test_invoke_returns_out_args_in_order() {
        let ok_body = build_soap_response(
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "GetTarget",
            &[("RetTargetValue".to_string(), "1".to_string())],
        )
        .unwrap();
        let (url, _, _) = spawn_control_stub(200, ok_body, Duration::ZERO);

        let proxy = ActionProxy::new(
            switch_power(),
            "GetTarget",
            vec![url],
            Duration::from_secs(5),
        )
        .unwrap();

        let response = proxy.invoke(vec![]).unwrap();
        assert_eq!(
            response.out_args,
            vec![("RetTargetValue".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_input_validation_never_hits_the_wire() {
        // endpoint that cannot accept connections
        let proxy = ActionProxy::new(
            switch_power(),
            "SetTarget",
            vec!["http://127.0.0.1:1/control".to_string()],
            Duration::from_secs(1),
        )
        .unwrap();

        // missing argument
        assert!(matches!(
            proxy.invoke(vec![]),
            Err(ControlError::InvalidArgs(_))
        ));
        // unexpected argument
        assert!(matches!(
            proxy.invoke(vec![
                ("newTargetValue".to_string(), "1".to_string()),
                ("Extra".to_string(), "x".to_string()),
            ]),
            Err(ControlError::InvalidArgs(_))
        ));
        // value not coercible to boolean
        assert!(matches!(
            proxy.invoke(vec![("newTargetValue".to_string(), "banana".to_string())]),
            Err(ControlError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_endpoint_failover() {
        let ok_body = build_soap_response(
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "SetTarget",
            &[],
        )
        .unwrap();
        let (url, _, _) = spawn_control_stub(200, ok_body, Duration::ZERO);

        // first location refuses connections, second answers
        let proxy = ActionProxy::new(
            switch_power(),
            "SetTarget",
            vec!["http://127.0.0.1:1/control".to_string(), url],
            Duration::from_secs(5),
        )
        .unwrap();

        let response = proxy
            .invoke(vec![("newTargetValue".to_string(), "1".to_string())])
            .unwrap();
        assert_eq!(response.attempts, 2);
    }

    #[test]
    fn test_all_endpoints_down_is_transport_error() {
        let proxy = ActionProxy::new(
            switch_power(),
            "SetTarget",
            vec![
                "http://127.0.0.1:1/control".to_string(),
                "http://127.0.0.1:2/control".to_string(),
            ],
            Duration::from_secs(1),
        )
        .unwrap();

        assert!(matches!(
            proxy.invoke(vec![("newTargetValue".to_string(), "1".to_string())]),
            Err(ControlError::Transport(_))
        ));
    }

    #[test]
    fn test_remote_fault_is_not_failover() {
        let fault_body = build_soap_fault(
            "s:Client",
            "UPnPError",
            Some("718"),
            Some("Conflict in mapping"),
        )
        .unwrap();
        let (url, _, _) = spawn_control_stub(500, fault_body, Duration::ZERO);

        let proxy = ActionProxy::new(
            switch_power(),
            "SetTarget",
            vec![url, "http://127.0.0.1:1/control".to_string()],
            Duration::from_secs(5),
        )
        .unwrap();

        match proxy.invoke(vec![("newTargetValue".to_string(), "1".to_string())]) {
            Err(ControlError::RemoteFault { code, description }) => {
                assert_eq!(code, 718);
                assert_eq!(description, "Conflict in mapping");
            }
            other => panic!("expected RemoteFault, got {:?}", other.map(|r| r.out_args)),
        }
    }

    #[test]
    fn test_at_most_one_invocation_in_flight() {
        let ok_body = build_soap_response(
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "SetTarget",
            &[],
        )
        .unwrap();
        let (url, _, peak) = spawn_control_stub(200, ok_body, Duration::from_millis(120));

        let proxy = ActionProxy::new(
            switch_power(),
            "SetTarget",
            vec![url],
            Duration::from_secs(5),
        )
        .unwrap();

        let mut workers = Vec::new();
        for _ in 0..3 {
            let proxy = proxy.clone();
            workers.push(thread::spawn(move || {
                proxy
                    .invoke(vec![("newTargetValue".to_string(), "1".to_string())])
                    .unwrap()
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
