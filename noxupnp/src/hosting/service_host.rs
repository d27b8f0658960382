//! Hébergement d'un service : SCPD, dispatch SOAP, souscriptions GENA.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, info, warn};

use crate::actions::{ActionError, ActionHandler};
use crate::eventing::{EventError, EventPublisher};
use crate::gena::{format_timeout_header, parse_callback_header, parse_timeout_header, NT_EVENT};
use crate::server::Server;
use crate::services::Service;
use crate::soap::{
    build_soap_fault, build_soap_response, error_codes, parse_soap_action, SoapParseError,
};
use crate::state_variables::StateVariableError;
use crate::variable_types::StateValue;
use crate::UpnpTyped;

use super::element_to_xml;
use super::errors::HostError;

/// Méthodes HTTP pour les événements UPnP.
pub const METHOD_SUBSCRIBE: &str = "SUBSCRIBE";
pub const METHOD_UNSUBSCRIBE: &str = "UNSUBSCRIBE";

/// Prédicat d'acceptation des souscriptions (reçoit les URLs de callback).
///
/// Absence de politique = tout accepter.
pub type SubscriptionPolicy = Arc<dyn Fn(&[String]) -> bool + Send + Sync>;

/// Valeurs courantes des variables d'état d'un service hébergé.
///
/// C'est le handle que capturent les handlers d'actions : [`set`](Self::set)
/// valide la valeur contre le modèle, la range, et publie le changement via
/// GENA si la variable est éventée. Les écritures sont sérialisées, donc
/// l'ordre de publication est l'ordre des `set`.
#[derive(Clone)]
pub struct ServiceState {
    service: Arc<Service>,
    values: Arc<Mutex<HashMap<String, StateValue>>>,
    publisher: EventPublisher,
}

impl ServiceState {
    fn new(service: Arc<Service>) -> Self {
        let mut values = HashMap::new();
        for variable in service.variables().all() {
            if let Some(default) = variable.default_value() {
                values.insert(variable.get_name().clone(), default.clone());
            }
        }
        let publisher = EventPublisher::new(service.identifier().to_string());
        Self {
            service,
            values: Arc::new(Mutex::new(values)),
            publisher,
        }
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Valeur courante d'une variable.
    pub fn get(&self, name: &str) -> Option<StateValue> {
        self.values.lock().unwrap().get(name).cloned()
    }

    /// Écrit une variable après validation contre le modèle.
    ///
    /// Si la variable est éventée, le changement part immédiatement vers
    /// le publisher, sous le même verrou que l'écriture.
    pub fn set(&self, name: &str, value: StateValue) -> Result<(), StateVariableError> {
        let variable = self
            .service
            .get_variable(name)
            .ok_or_else(|| StateVariableError::Unknown(name.to_string()))?;
        variable.accepts(&value)?;

        let mut values = self.values.lock().unwrap();
        values.insert(name.to_string(), value.clone());
        if variable.is_sending_events() {
            self.publisher
                .publish(&[(name.to_string(), value.to_upnp_string())]);
        }
        Ok(())
    }

    /// Snapshot (variable, valeur) de toutes les variables éventées, pour
    /// le NOTIFY initial. Les variables jamais écrites et sans défaut
    /// partent avec une valeur vide.
    pub fn evented_snapshot(&self) -> Vec<(String, String)> {
        let values = self.values.lock().unwrap();
        let mut evented: Vec<(String, String)> = self
            .service
            .variables()
            .all()
            .into_iter()
            .filter(|v| v.is_sending_events())
            .map(|v| {
                let value = values
                    .get(v.get_name())
                    .map(|val| val.to_upnp_string())
                    .unwrap_or_default();
                (v.get_name().clone(), value)
            })
            .collect();
        evented.sort();
        evented
    }
}

/// Résultat transport-neutre d'une requête SUBSCRIBE/UNSUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSubOutcome {
    pub status: u16,
    pub sid: Option<String>,
    pub timeout: Option<String>,
}

impl EventSubOutcome {
    fn status_only(status: u16) -> Self {
        Self {
            status,
            sid: None,
            timeout: None,
        }
    }
}

/// Instance hébergée d'un service UPnP.
///
/// Reçoit les requêtes de contrôle SOAP et de souscription, et sert la
/// description SCPD.
#[derive(Clone)]
pub struct ServiceHost {
    state: ServiceState,
    device_route: String,
    handlers: Arc<RwLock<HashMap<String, ActionHandler>>>,
    policy: Option<SubscriptionPolicy>,
    accepting: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    invocation_counter: Arc<AtomicU64>,
    serial: Arc<AtomicBool>,
    action_gate: Arc<tokio::sync::Mutex<()>>,
}

impl ServiceHost {
    pub fn new(
        service: Arc<Service>,
        device_route: String,
        policy: Option<SubscriptionPolicy>,
    ) -> Self {
        Self {
            state: ServiceState::new(service),
            device_route,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            policy,
            accepting: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            invocation_counter: Arc::new(AtomicU64::new(0)),
            serial: Arc::new(AtomicBool::new(false)),
            action_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Sérialise l'exécution des actions de ce service.
    ///
    /// Par défaut les invocations concurrentes s'exécutent en parallèle.
    pub fn set_serial_actions(&self, serial: bool) {
        self.serial.store(serial, Ordering::SeqCst);
    }

    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    pub fn service(&self) -> &Arc<Service> {
        self.state.service()
    }

    /// Nombre d'invocations d'actions en cours.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Refuse les nouvelles souscriptions (arrêt en cours).
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Enregistre le handler d'une action du modèle.
    ///
    /// # Errors
    ///
    /// L'action doit exister dans le modèle du service.
    pub fn register_action_handler(
        &self,
        action: &str,
        handler: ActionHandler,
    ) -> Result<(), HostError> {
        if self.service().get_action(action).is_none() {
            return Err(HostError::InvalidDescription(format!(
                "service '{}' has no action '{}'",
                self.service().identifier(),
                action
            )));
        }
        self.handlers
            .write()
            .unwrap()
            .insert(action.to_string(), handler);
        Ok(())
    }

    /// Document SCPD du service.
    pub fn scpd_xml(&self) -> String {
        element_to_xml(&self.service().scpd_element())
    }

    /// Traite une requête de contrôle SOAP.
    ///
    /// Retourne `(status HTTP, corps XML)` : `200` avec la réponse
    /// d'action, ou `500` avec un fault UPnP (`401` action inconnue,
    /// `402` arguments invalides, code vendeur sinon).
    pub async fn handle_control(&self, soap_action: Option<&str>, body: &[u8]) -> (u16, String) {
        let service_type = self.service().service_type();

        // SOAPACTION: "urn:<svc-type>#<actionName>"
        let Some((header_type, header_action)) = soap_action
            .map(|raw| raw.trim().trim_matches('"'))
            .and_then(|raw| raw.split_once('#'))
        else {
            return fault(error_codes::INVALID_ACTION, "Invalid Action");
        };
        if header_type != service_type {
            return fault(error_codes::INVALID_ACTION, "Invalid Action");
        }

        let request = match parse_soap_action(body) {
            Ok(request) => request,
            Err(SoapParseError::NoAction) => {
                return fault(error_codes::INVALID_ACTION, "Invalid Action");
            }
            Err(e) => {
                debug!("Unparseable SOAP request: {}", e);
                return fault(error_codes::INVALID_ARGS, "Invalid Args");
            }
        };
        if request.name != header_action {
            return fault(error_codes::INVALID_ACTION, "Invalid Action");
        }

        let Some(action) = self.service().get_action(&request.name) else {
            return fault(error_codes::INVALID_ACTION, "Invalid Action");
        };

        // Lier les arguments IN déclarés, dans l'ordre, aux valeurs reçues
        let mut bound = HashMap::new();
        for argument in action.in_arguments() {
            let Some(raw) = request.arg(argument.get_name()) else {
                return fault(error_codes::INVALID_ARGS, "Invalid Args");
            };
            let Some(variable) = self
                .service()
                .get_variable(argument.related_state_variable())
            else {
                return fault(error_codes::INVALID_ARGS, "Invalid Args");
            };
            match StateValue::parse(variable.value_type(), raw) {
                Ok(value) => {
                    bound.insert(argument.get_name().clone(), value);
                }
                Err(e) => {
                    debug!("Argument {} rejected: {}", argument.get_name(), e);
                    return fault(error_codes::INVALID_ARGS, "Invalid Args");
                }
            }
        }
        // Arguments non déclarés → 402
        for (name, _) in &request.args {
            if action
                .in_arguments()
                .all(|declared| declared.get_name() != name)
            {
                return fault(error_codes::INVALID_ARGS, "Invalid Args");
            }
        }

        let handler = {
            let handlers = self.handlers.read().unwrap();
            handlers.get(&request.name).cloned()
        };
        let Some(handler) = handler else {
            return fault(
                error_codes::OPTIONAL_ACTION_NOT_IMPLEMENTED,
                "Optional Action Not Implemented",
            );
        };

        let invocation_id = self.invocation_counter.fetch_add(1, Ordering::SeqCst);
        debug!(
            "📡 Invocation #{} of {}#{}",
            invocation_id, service_type, request.name
        );

        let gate = if self.serial.load(Ordering::SeqCst) {
            Some(self.action_gate.lock().await)
        } else {
            None
        };
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = handler(Arc::new(bound)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(gate);

        match outcome {
            Ok(out_values) => {
                // Réordonner selon la déclaration ; les sorties non
                // déclarées passent en queue.
                let mut ordered: Vec<(String, String)> = Vec::new();
                for argument in action.out_arguments() {
                    if let Some((name, value)) =
                        out_values.iter().find(|(n, _)| n == argument.get_name())
                    {
                        ordered.push((name.clone(), value.to_upnp_string()));
                    }
                }
                for (name, value) in &out_values {
                    if action.out_arguments().all(|a| a.get_name() != name) {
                        ordered.push((name.clone(), value.to_upnp_string()));
                    }
                }

                match build_soap_response(&service_type, &request.name, &ordered) {
                    Ok(xml) => (200, xml),
                    Err(e) => {
                        warn!("Failed to serialize action response: {}", e);
                        fault(error_codes::ACTION_FAILED, "Action Failed")
                    }
                }
            }
            Err(e) => {
                let code = e.upnp_error_code().to_string();
                let description = match &e {
                    ActionError::Vendor { description, .. } => description.clone(),
                    other => other.to_string(),
                };
                fault(&code, &description)
            }
        }
    }

    /// Traite une requête SUBSCRIBE/UNSUBSCRIBE.
    pub fn handle_event_request(
        &self,
        method: &str,
        sid: Option<&str>,
        nt: Option<&str>,
        callback: Option<&str>,
        timeout: Option<&str>,
    ) -> EventSubOutcome {
        match method {
            METHOD_SUBSCRIBE => {
                if !self.accepting.load(Ordering::SeqCst) {
                    return EventSubOutcome::status_only(503);
                }
                let requested_timeout = timeout.and_then(parse_timeout_header);

                match sid {
                    // Renouvellement : SID seul, sans NT ni CALLBACK
                    Some(sid) => {
                        if nt.is_some() || callback.is_some() {
                            return EventSubOutcome::status_only(400);
                        }
                        match self.state.publisher().renew(sid, requested_timeout) {
                            Ok(granted) => EventSubOutcome {
                                status: 200,
                                sid: Some(sid.to_string()),
                                timeout: Some(format_timeout_header(granted)),
                            },
                            Err(EventError::UnknownSid(_)) => EventSubOutcome::status_only(412),
                            Err(_) => EventSubOutcome::status_only(412),
                        }
                    }
                    // Première souscription
                    None => {
                        if nt != Some(NT_EVENT) {
                            return EventSubOutcome::status_only(412);
                        }
                        let callbacks = callback.map(parse_callback_header).unwrap_or_default();
                        if callbacks.is_empty() {
                            return EventSubOutcome::status_only(412);
                        }
                        if let Some(policy) = &self.policy {
                            if !policy(&callbacks) {
                                info!("🚫 Subscription refused by policy");
                                return EventSubOutcome::status_only(503);
                            }
                        }

                        let initial = self.state.evented_snapshot();
                        match self
                            .state
                            .publisher()
                            .subscribe(callbacks, requested_timeout, initial)
                        {
                            Ok((sid, granted)) => EventSubOutcome {
                                status: 200,
                                sid: Some(sid),
                                timeout: Some(format_timeout_header(granted)),
                            },
                            Err(_) => EventSubOutcome::status_only(412),
                        }
                    }
                }
            }
            METHOD_UNSUBSCRIBE => match sid {
                Some(sid) => match self.state.publisher().unsubscribe(sid) {
                    Ok(()) => EventSubOutcome::status_only(200),
                    Err(_) => EventSubOutcome::status_only(412),
                },
                None => EventSubOutcome::status_only(412),
            },
            other => {
                warn!("Unsupported EventSub method: {}", other);
                EventSubOutcome::status_only(405)
            }
        }
    }

    /// Enregistre les routes du service dans le serveur HTTP.
    pub async fn register_urls(&self, server: &mut Server) {
        let service = self.service();
        info!(
            "✅ Service description for {} available at : {}{}",
            service.identifier(),
            server.base_url(),
            service.scpd_route(&self.device_route),
        );

        // Handler SCPD
        let instance_scpd = self.clone();
        server
            .add_handler(&service.scpd_route(&self.device_route), move || {
                let instance = instance_scpd.clone();
                async move {
                    (
                        StatusCode::OK,
                        [(
                            axum::http::header::CONTENT_TYPE,
                            "text/xml; charset=\"utf-8\"",
                        )],
                        instance.scpd_xml(),
                    )
                        .into_response()
                }
            })
            .await;

        // Handler control
        let instance_control = self.clone();
        server
            .add_post_handler_with_state(
                &service.control_route(&self.device_route),
                control_handler,
                instance_control,
            )
            .await;

        // Handler événements
        let instance_event = self.clone();
        server
            .add_any_handler_with_state(
                &service.event_route(&self.device_route),
                event_sub_handler,
                instance_event,
            )
            .await;
    }
}

/// Handler Axum pour le contrôle SOAP.
fn control_handler(
    State(instance): State<ServiceHost>,
    headers: HeaderMap,
    body: String,
) -> Pin<Box<dyn Future<Output = Response> + Send>> {
    Box::pin(async move {
        let soap_action = headers
            .get("SOAPACTION")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let (status, xml) = instance
            .handle_control(soap_action.as_deref(), body.as_bytes())
            .await;

        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            [(
                axum::http::header::CONTENT_TYPE,
                "text/xml; charset=\"utf-8\"",
            )],
            xml,
        )
            .into_response()
    })
}

/// Handler Axum pour les événements (SUBSCRIBE/UNSUBSCRIBE).
fn event_sub_handler(
    State(instance): State<ServiceHost>,
    req: Request<Body>,
) -> Pin<Box<dyn Future<Output = Response> + Send>> {
    Box::pin(async move {
        let method = req.method().as_str().to_string();
        let headers = req.headers();
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let sid = header("SID");
        let nt = header("NT");
        let callback = header("CALLBACK");
        let timeout = header("TIMEOUT");

        let outcome = instance.handle_event_request(
            &method,
            sid.as_deref(),
            nt.as_deref(),
            callback.as_deref(),
            timeout.as_deref(),
        );

        let status =
            StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = status.into_response();
        if let Some(sid) = outcome.sid {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("sid"),
                axum::http::HeaderValue::from_str(&sid).unwrap(),
            );
        }
        if let Some(timeout) = outcome.timeout {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("timeout"),
                axum::http::HeaderValue::from_str(&timeout).unwrap(),
            );
        }
        response
    })
}

fn fault(code: &str, description: &str) -> (u16, String) {
    let xml = build_soap_fault("s:Client", "UPnPError", Some(code), Some(description))
        .unwrap_or_default();
    (500, xml)
}
