//! Codec des messages SSDP.
//!
//! Fonctions pures : [`SsdpMessage::encode`] et [`SsdpMessage::decode`].
//! Les règles numériques sont appliquées des deux côtés :
//!
//! - `CACHE-CONTROL: max-age` borné à [5, 86400]
//! - `MX` : < 1 rejeté, > 5 ramené à 5
//! - `SEARCHPORT.UPNP.ORG` hors [49152, 65535] traité comme absent
//! - `BOOTID`/`CONFIGID` sur un byebye : les deux ou aucun
//!
//! `LOCATION` est transporté comme chaîne opaque (les scope-id IPv6
//! survivent au round-trip).

use std::collections::HashMap;

use thiserror::Error;

use super::{SSDP_MULTICAST_ADDR, SSDP_PORT};

pub const NTS_ALIVE: &str = "ssdp:alive";
pub const NTS_BYEBYE: &str = "ssdp:byebye";
pub const NTS_UPDATE: &str = "ssdp:update";

const MAX_AGE_MIN: u32 = 5;
const MAX_AGE_MAX: u32 = 86_400;
const SEARCHPORT_MIN: u16 = 49_152;

/// Erreur de décodage SSDP.
///
/// Les moteurs laissent tomber silencieusement les messages en erreur
/// (politique `MalformedMessage` du protocole).
#[derive(Error, Debug)]
pub enum SsdpError {
    #[error("Malformed SSDP start line: '{0}'")]
    MalformedStartLine(String),

    #[error("Missing mandatory SSDP header {0}")]
    MissingHeader(&'static str),

    #[error("Invalid value for SSDP header {header}: '{value}'")]
    InvalidValue {
        header: &'static str,
        value: String,
    },

    #[error("Unknown SSDP message kind")]
    UnknownKind,
}

/// Les cinq formes de messages SSDP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpMessage {
    /// NOTIFY ssdp:alive
    Alive {
        max_age: u32,
        location: String,
        nt: String,
        server: String,
        usn: String,
        boot_id: Option<u32>,
        config_id: Option<u32>,
        search_port: Option<u16>,
    },
    /// NOTIFY ssdp:byebye
    ByeBye {
        nt: String,
        usn: String,
        boot_id: Option<u32>,
        config_id: Option<u32>,
    },
    /// NOTIFY ssdp:update
    Update {
        location: String,
        nt: String,
        usn: String,
        boot_id: u32,
        next_boot_id: u32,
        config_id: Option<u32>,
        search_port: Option<u16>,
    },
    /// M-SEARCH
    Search {
        mx: u32,
        st: String,
        user_agent: String,
    },
    /// Réponse unicast à un M-SEARCH
    SearchResponse {
        max_age: u32,
        date: String,
        location: String,
        server: String,
        st: String,
        usn: String,
        boot_id: Option<u32>,
        config_id: Option<u32>,
        search_port: Option<u16>,
    },
}

impl SsdpMessage {
    /// Validation à deux niveaux.
    ///
    /// Loose : l'identité (USN ou ST) est présente. Strict ajoute les
    /// tokens produit (SERVER / USER-AGENT) quand la forme en porte.
    pub fn is_valid(&self, strict: bool) -> bool {
        match self {
            SsdpMessage::Alive { usn, server, .. } => {
                !usn.is_empty() && (!strict || !server.is_empty())
            }
            SsdpMessage::ByeBye { usn, .. } => !usn.is_empty(),
            SsdpMessage::Update { usn, .. } => !usn.is_empty(),
            SsdpMessage::Search { st, user_agent, .. } => {
                !st.is_empty() && (!strict || !user_agent.is_empty())
            }
            SsdpMessage::SearchResponse { usn, server, .. } => {
                !usn.is_empty() && (!strict || !server.is_empty())
            }
        }
    }

    /// Encode le message au format fil, terminé par `\r\n\r\n`.
    ///
    /// Les bornes numériques sont appliquées ici : un `max_age` ou un `MX`
    /// hors bornes est ramené dans la plage, un `search_port` hors plage
    /// est omis.
    pub fn encode(&self) -> String {
        let host = format!("{}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT);
        let mut out = String::new();

        match self {
            SsdpMessage::Alive {
                max_age,
                location,
                nt,
                server,
                usn,
                boot_id,
                config_id,
                search_port,
            } => {
                out.push_str("NOTIFY * HTTP/1.1\r\n");
                out.push_str(&format!("HOST: {}\r\n", host));
                out.push_str(&format!(
                    "CACHE-CONTROL: max-age={}\r\n",
                    clamp_max_age(*max_age)
                ));
                out.push_str(&format!("LOCATION: {}\r\n", location));
                out.push_str(&format!("NT: {}\r\n", nt));
                out.push_str(&format!("NTS: {}\r\n", NTS_ALIVE));
                out.push_str(&format!("SERVER: {}\r\n", server));
                out.push_str(&format!("USN: {}\r\n", usn));
                push_boot_headers(&mut out, *boot_id, *config_id, None, *search_port);
            }
            SsdpMessage::ByeBye {
                nt,
                usn,
                boot_id,
                config_id,
            } => {
                out.push_str("NOTIFY * HTTP/1.1\r\n");
                out.push_str(&format!("HOST: {}\r\n", host));
                out.push_str(&format!("NT: {}\r\n", nt));
                out.push_str(&format!("NTS: {}\r\n", NTS_BYEBYE));
                out.push_str(&format!("USN: {}\r\n", usn));
                // les deux ou aucun
                if let (Some(boot), Some(config)) = (boot_id, config_id) {
                    out.push_str(&format!("BOOTID.UPNP.ORG: {}\r\n", boot));
                    out.push_str(&format!("CONFIGID.UPNP.ORG: {}\r\n", config));
                }
            }
            SsdpMessage::Update {
                location,
                nt,
                usn,
                boot_id,
                next_boot_id,
                config_id,
                search_port,
            } => {
                out.push_str("NOTIFY * HTTP/1.1\r\n");
                out.push_str(&format!("HOST: {}\r\n", host));
                out.push_str(&format!("LOCATION: {}\r\n", location));
                out.push_str(&format!("NT: {}\r\n", nt));
                out.push_str(&format!("NTS: {}\r\n", NTS_UPDATE));
                out.push_str(&format!("USN: {}\r\n", usn));
                out.push_str(&format!("BOOTID.UPNP.ORG: {}\r\n", boot_id));
                out.push_str(&format!("NEXTBOOTID.UPNP.ORG: {}\r\n", next_boot_id));
                push_boot_headers(&mut out, None, *config_id, None, *search_port);
            }
            SsdpMessage::Search { mx, st, user_agent } => {
                out.push_str("M-SEARCH * HTTP/1.1\r\n");
                out.push_str(&format!("HOST: {}\r\n", host));
                out.push_str("MAN: \"ssdp:discover\"\r\n");
                out.push_str(&format!("MX: {}\r\n", (*mx).clamp(1, 5)));
                out.push_str(&format!("ST: {}\r\n", st));
                out.push_str(&format!("USER-AGENT: {}\r\n", user_agent));
            }
            SsdpMessage::SearchResponse {
                max_age,
                date,
                location,
                server,
                st,
                usn,
                boot_id,
                config_id,
                search_port,
            } => {
                out.push_str("HTTP/1.1 200 OK\r\n");
                out.push_str(&format!(
                    "CACHE-CONTROL: max-age={}\r\n",
                    clamp_max_age(*max_age)
                ));
                out.push_str(&format!("DATE: {}\r\n", date));
                out.push_str("EXT:\r\n");
                out.push_str(&format!("LOCATION: {}\r\n", location));
                out.push_str(&format!("SERVER: {}\r\n", server));
                out.push_str(&format!("ST: {}\r\n", st));
                out.push_str(&format!("USN: {}\r\n", usn));
                push_boot_headers(&mut out, *boot_id, *config_id, None, *search_port);
            }
        }

        out.push_str("\r\n");
        out
    }

    /// Décode un datagramme SSDP.
    pub fn decode(data: &str) -> Result<Self, SsdpError> {
        let mut lines = data.lines();
        let first_line = lines
            .next()
            .ok_or_else(|| SsdpError::MalformedStartLine(String::new()))?
            .trim();
        let upper = first_line.to_ascii_uppercase();
        let headers = parse_headers(lines);

        if upper.starts_with("NOTIFY ") {
            decode_notify(&headers)
        } else if upper.starts_with("M-SEARCH ") {
            decode_search(&headers)
        } else if upper.starts_with("HTTP/") && upper.contains(" 200 ") {
            decode_search_response(&headers)
        } else if upper.starts_with("NOTIFY") || upper.starts_with("M-SEARCH") || upper.starts_with("HTTP/") {
            Err(SsdpError::MalformedStartLine(first_line.to_string()))
        } else {
            Err(SsdpError::UnknownKind)
        }
    }
}

fn clamp_max_age(max_age: u32) -> u32 {
    max_age.clamp(MAX_AGE_MIN, MAX_AGE_MAX)
}

fn push_boot_headers(
    out: &mut String,
    boot_id: Option<u32>,
    config_id: Option<u32>,
    next_boot_id: Option<u32>,
    search_port: Option<u16>,
) {
    if let Some(boot) = boot_id {
        out.push_str(&format!("BOOTID.UPNP.ORG: {}\r\n", boot));
    }
    if let Some(config) = config_id {
        out.push_str(&format!("CONFIGID.UPNP.ORG: {}\r\n", config));
    }
    if let Some(next) = next_boot_id {
        out.push_str(&format!("NEXTBOOTID.UPNP.ORG: {}\r\n", next));
    }
    if let Some(port) = search_port {
        if port >= SEARCHPORT_MIN {
            out.push_str(&format!("SEARCHPORT.UPNP.ORG: {}\r\n", port));
        }
    }
}

fn decode_notify(headers: &HashMap<String, String>) -> Result<SsdpMessage, SsdpError> {
    let nts = headers
        .get("NTS")
        .ok_or(SsdpError::MissingHeader("NTS"))?
        .to_ascii_lowercase();
    let nt = required(headers, "NT")?;
    let usn = required(headers, "USN")?;

    match nts.as_str() {
        NTS_ALIVE => {
            require_present(headers, "HOST")?;
            let location = required(headers, "LOCATION")?;
            let server = required(headers, "SERVER")?;
            let max_age = parse_max_age(headers)?;
            let (boot_id, config_id) = optional_pair(headers, false);
            Ok(SsdpMessage::Alive {
                max_age,
                location,
                nt,
                server,
                usn,
                boot_id,
                config_id,
                search_port: optional_search_port(headers),
            })
        }
        NTS_BYEBYE => {
            require_present(headers, "HOST")?;
            let (boot_id, config_id) = optional_pair(headers, true);
            Ok(SsdpMessage::ByeBye {
                nt,
                usn,
                boot_id,
                config_id,
            })
        }
        NTS_UPDATE => {
            require_present(headers, "HOST")?;
            let location = required(headers, "LOCATION")?;
            let boot_id = required_u32(headers, "BOOTID.UPNP.ORG")?;
            let next_boot_id = required_u32(headers, "NEXTBOOTID.UPNP.ORG")?;
            let (_, config_id) = optional_pair(headers, false);
            Ok(SsdpMessage::Update {
                location,
                nt,
                usn,
                boot_id,
                next_boot_id,
                config_id,
                search_port: optional_search_port(headers),
            })
        }
        _ => Err(SsdpError::InvalidValue {
            header: "NTS",
            value: nts,
        }),
    }
}

fn decode_search(headers: &HashMap<String, String>) -> Result<SsdpMessage, SsdpError> {
    require_present(headers, "HOST")?;
    let man = required(headers, "MAN")?;
    if man.trim() != "\"ssdp:discover\"" {
        return Err(SsdpError::InvalidValue {
            header: "MAN",
            value: man,
        });
    }

    let st = required(headers, "ST")?;
    let user_agent = headers.get("USER-AGENT").cloned().unwrap_or_default();

    let mx_raw = required(headers, "MX")?;
    let mx: u32 = mx_raw.trim().parse().map_err(|_| SsdpError::InvalidValue {
        header: "MX",
        value: mx_raw.clone(),
    })?;
    if mx < 1 {
        return Err(SsdpError::InvalidValue {
            header: "MX",
            value: mx_raw,
        });
    }
    // UDA : traiter MX > 5 comme 5
    let mx = mx.min(5);

    Ok(SsdpMessage::Search { mx, st, user_agent })
}

fn decode_search_response(headers: &HashMap<String, String>) -> Result<SsdpMessage, SsdpError> {
    let st = required(headers, "ST")?;
    let usn = required(headers, "USN")?;
    let location = required(headers, "LOCATION")?;
    let server = required(headers, "SERVER")?;
    let date = required(headers, "DATE")?;
    require_present(headers, "EXT")?;
    let max_age = parse_max_age(headers)?;
    let (boot_id, config_id) = optional_pair(headers, false);

    Ok(SsdpMessage::SearchResponse {
        max_age,
        date,
        location,
        server,
        st,
        usn,
        boot_id,
        config_id,
        search_port: optional_search_port(headers),
    })
}

fn required(headers: &HashMap<String, String>, name: &'static str) -> Result<String, SsdpError> {
    headers
        .get(name)
        .cloned()
        .ok_or(SsdpError::MissingHeader(name))
}

/// Comme [`required`] mais tolère une valeur vide (HOST, EXT).
fn require_present(
    headers: &HashMap<String, String>,
    name: &'static str,
) -> Result<(), SsdpError> {
    if headers.contains_key(name) {
        Ok(())
    } else {
        Err(SsdpError::MissingHeader(name))
    }
}

fn required_u32(
    headers: &HashMap<String, String>,
    name: &'static str,
) -> Result<u32, SsdpError> {
    let raw = required(headers, name)?;
    raw.trim().parse().map_err(|_| SsdpError::InvalidValue {
        header: name,
        value: raw,
    })
}

/// `BOOTID`/`CONFIGID` optionnels. Une valeur non parsable est traitée
/// comme absente ; avec `paired`, la règle byebye "les deux ou aucun" est
/// appliquée.
fn optional_pair(headers: &HashMap<String, String>, paired: bool) -> (Option<u32>, Option<u32>) {
    let boot_id = headers
        .get("BOOTID.UPNP.ORG")
        .and_then(|v| v.trim().parse::<u32>().ok());
    let config_id = headers
        .get("CONFIGID.UPNP.ORG")
        .and_then(|v| v.trim().parse::<u32>().ok());

    if paired && (boot_id.is_none() != config_id.is_none()) {
        return (None, None);
    }
    (boot_id, config_id)
}

/// `SEARCHPORT.UPNP.ORG` hors [49152, 65535] → absent.
fn optional_search_port(headers: &HashMap<String, String>) -> Option<u16> {
    headers
        .get("SEARCHPORT.UPNP.ORG")
        .and_then(|v| v.trim().parse::<u16>().ok())
        .filter(|port| *port >= SEARCHPORT_MIN)
}

fn parse_max_age(headers: &HashMap<String, String>) -> Result<u32, SsdpError> {
    let raw = required(headers, "CACHE-CONTROL")?;
    let lower = raw.to_ascii_lowercase();
    let idx = lower.find("max-age").ok_or_else(|| SsdpError::InvalidValue {
        header: "CACHE-CONTROL",
        value: raw.clone(),
    })?;
    let after_key = &raw[idx + 7..];
    let after_eq = after_key.trim_start().trim_start_matches('=').trim_start();
    let digits: String = after_eq
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let age: u32 = digits.parse().map_err(|_| SsdpError::InvalidValue {
        header: "CACHE-CONTROL",
        value: raw.clone(),
    })?;
    Ok(clamp_max_age(age))
}

/// Parse les en-têtes d'un message SSDP (noms en majuscules).
pub(crate) fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim_end();

        // Ligne vide = fin des en-têtes
        if line.is_empty() {
            break;
        }

        // Couper au premier ':' seulement (les valeurs peuvent en contenir)
        if let Some(colon_pos) = line.find(':') {
            let (name, value_with_colon) = line.split_at(colon_pos);
            let value = &value_with_colon[1..];

            let name = name.trim().to_ascii_uppercase();
            let value = value.trim().to_string();

            if !name.is_empty() {
                headers.insert(name, value);
            }
        }
    }
    headers
}
