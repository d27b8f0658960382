//! Codec HTTP/1.1 minimal.
//!
//! Sous-ensemble strict : ligne de départ, en-têtes CRLF, corps délimité
//! par `Content-Length` ou `Transfer-Encoding: chunked` (grammaire
//! complète, trailers compris). Le codec refuse les corps au-delà d'un
//! plafond configurable ([`DEFAULT_MAX_BODY`], 10 MiB).
//!
//! Les noms d'en-têtes sont normalisés en minuscules au décodage.

use std::collections::HashMap;
use std::io::{self, BufRead};

use thiserror::Error;

/// Plafond par défaut sur la taille d'un corps (10 MiB).
pub const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024;

/// Erreur de framing HTTP.
#[derive(Error, Debug)]
pub enum HttpCodecError {
    /// Connexion fermée proprement avant la ligne de départ
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed start line: '{0}'")]
    MalformedStartLine(String),

    #[error("Malformed header: '{0}'")]
    MalformedHeader(String),

    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    /// Corps déclaré au-delà du plafond
    #[error("Declared body of {declared} bytes exceeds limit of {limit}")]
    BodyTooLarge { declared: usize, limit: usize },
}

/// Requête HTTP décodée.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    /// En-têtes, noms en minuscules
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// La connexion doit-elle rester ouverte après cette requête ?
    ///
    /// HTTP/1.1 : oui sauf `Connection: close`. HTTP/1.0 : non sauf
    /// `Connection: keep-alive`.
    pub fn wants_keep_alive(&self) -> bool {
        let connection = self
            .header("connection")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();
        if self.version == "HTTP/1.0" {
            connection == "keep-alive"
        } else {
            connection != "close"
        }
    }
}

/// Réponse HTTP décodée ou à émettre.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    /// En-têtes, noms en minuscules
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// Lit une requête HTTP complète sur un reader bufferisé.
pub fn read_request<R: BufRead>(
    reader: &mut R,
    max_body: usize,
) -> Result<HttpRequest, HttpCodecError> {
    let request_line = match read_line(reader)? {
        Some(line) => line,
        None => return Err(HttpCodecError::ConnectionClosed),
    };

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HttpCodecError::MalformedStartLine(request_line.clone()))?
        .to_ascii_uppercase();
    let target = parts
        .next()
        .ok_or_else(|| HttpCodecError::MalformedStartLine(request_line.clone()))?
        .to_string();
    let version = parts.next().unwrap_or("HTTP/1.1").to_string();
    if !version.starts_with("HTTP/") {
        return Err(HttpCodecError::MalformedStartLine(request_line));
    }

    let mut headers = read_headers(reader)?;
    let body = read_body(reader, &mut headers, max_body)?;

    Ok(HttpRequest {
        method,
        target,
        version,
        headers,
        body,
    })
}

/// Lit une réponse HTTP complète sur un reader bufferisé.
pub fn read_response<R: BufRead>(
    reader: &mut R,
    max_body: usize,
) -> Result<HttpResponse, HttpCodecError> {
    let status_line = match read_line(reader)? {
        Some(line) => line,
        None => return Err(HttpCodecError::ConnectionClosed),
    };

    let mut parts = status_line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| HttpCodecError::MalformedStartLine(status_line.clone()))?;
    if !version.starts_with("HTTP/") {
        return Err(HttpCodecError::MalformedStartLine(status_line.clone()));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| HttpCodecError::MalformedStartLine(status_line.clone()))?;
    let reason = parts.next().unwrap_or("").to_string();

    let mut headers = read_headers(reader)?;
    let body = read_body(reader, &mut headers, max_body)?;

    Ok(HttpResponse {
        status,
        reason,
        headers,
        body,
    })
}

/// Encode une réponse. `Content-Length` est toujours posé depuis le corps.
pub fn encode_response(response: &HttpResponse) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        if response.reason.is_empty() {
            reason_phrase(response.status)
        } else {
            &response.reason
        }
    );
    for (name, value) in &response.headers {
        if name == "content-length" {
            continue;
        }
        out.push_str(&format!("{}: {}\r\n", canonical_name(name), value));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));

    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(&response.body);
    bytes
}

/// Encode une requête. `Content-Length` est toujours posé depuis le corps.
pub fn encode_request(request: &HttpRequest) -> Vec<u8> {
    let mut out = format!("{} {} HTTP/1.1\r\n", request.method, request.target);
    for (name, value) in &request.headers {
        if name == "content-length" {
            continue;
        }
        out.push_str(&format!("{}: {}\r\n", canonical_name(name), value));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", request.body.len()));

    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(&request.body);
    bytes
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, HttpCodecError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn read_headers<R: BufRead>(reader: &mut R) -> Result<HashMap<String, String>, HttpCodecError> {
    let mut headers = HashMap::new();
    loop {
        let line = match read_line(reader)? {
            Some(line) => line,
            None => break,
        };
        if line.is_empty() {
            break;
        }
        match line.split_once(':') {
            Some((name, value)) => {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
            None => return Err(HttpCodecError::MalformedHeader(line)),
        }
    }
    Ok(headers)
}

fn read_body<R: BufRead>(
    reader: &mut R,
    headers: &mut HashMap<String, String>,
    max_body: usize,
) -> Result<Vec<u8>, HttpCodecError> {
    let chunked = headers
        .get("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    if chunked {
        return read_chunked_body(reader, headers, max_body);
    }

    let content_length: usize = match headers.get("content-length") {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| HttpCodecError::MalformedHeader(format!("content-length: {}", raw)))?,
        None => 0,
    };

    if content_length > max_body {
        return Err(HttpCodecError::BodyTooLarge {
            declared: content_length,
            limit: max_body,
        });
    }

    let mut body = vec![0u8; content_length];
    io::Read::read_exact(reader, &mut body)?;
    Ok(body)
}

/// Corps chunked, grammaire complète : taille hexadécimale avec extensions
/// optionnelles, chunks, puis trailers jusqu'à la ligne vide. Les trailers
/// rejoignent la map d'en-têtes.
fn read_chunked_body<R: BufRead>(
    reader: &mut R,
    headers: &mut HashMap<String, String>,
    max_body: usize,
) -> Result<Vec<u8>, HttpCodecError> {
    let mut body = Vec::new();

    loop {
        let size_line = read_line(reader)?
            .ok_or_else(|| HttpCodecError::MalformedChunk("missing chunk size".to_string()))?;
        // la taille peut être suivie d'extensions : "1a;name=value"
        let size_token = size_line
            .split(';')
            .next()
            .unwrap_or("")
            .trim();
        let size = usize::from_str_radix(size_token, 16)
            .map_err(|_| HttpCodecError::MalformedChunk(format!("bad size '{}'", size_line)))?;

        if size == 0 {
            break;
        }
        if body.len() + size > max_body {
            return Err(HttpCodecError::BodyTooLarge {
                declared: body.len() + size,
                limit: max_body,
            });
        }

        let start = body.len();
        body.resize(start + size, 0);
        io::Read::read_exact(reader, &mut body[start..])?;

        // CRLF de fin de chunk
        let crlf = read_line(reader)?
            .ok_or_else(|| HttpCodecError::MalformedChunk("missing chunk CRLF".to_string()))?;
        if !crlf.is_empty() {
            return Err(HttpCodecError::MalformedChunk(format!(
                "expected CRLF after chunk, got '{}'",
                crlf
            )));
        }
    }

    // trailers
    loop {
        let line = match read_line(reader)? {
            Some(line) => line,
            None => break,
        };
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    Ok(body)
}

/// Remet la casse usuelle pour l'émission (`content-type` → `Content-Type`).
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        412 => "Precondition Failed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn reader(raw: &str) -> BufReader<&[u8]> {
        BufReader::new(raw.as_bytes())
    }

    #[test]
    fn test_read_request_with_content_length() {
        let raw = "NOTIFY /cb HTTP/1.1\r\nHost: 192.168.1.20\r\nSID: uuid:sub-1\r\nContent-Length: 5\r\n\r\nhello";
        let request = read_request(&mut reader(raw), DEFAULT_MAX_BODY).unwrap();
        assert_eq!(request.method, "NOTIFY");
        assert_eq!(request.target, "/cb");
        assert_eq!(request.header("sid"), Some("uuid:sub-1"));
        assert_eq!(request.body, b"hello");
        assert!(request.wants_keep_alive());
    }

    #[test]
    fn test_read_request_without_body() {
        let raw = "GET /desc.xml HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n";
        let request = read_request(&mut reader(raw), DEFAULT_MAX_BODY).unwrap();
        assert!(request.body.is_empty());
        assert!(!request.wants_keep_alive());
    }

    #[test]
    fn test_chunked_body_with_trailers() {
        let raw = "POST /control HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n\
                   5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Checksum: abc\r\n\r\n";
        let request = read_request(&mut reader(raw), DEFAULT_MAX_BODY).unwrap();
        assert_eq!(request.body, b"hello world");
        assert_eq!(request.header("x-checksum"), Some("abc"));
    }

    #[test]
    fn test_body_ceiling() {
        let raw = "POST /control HTTP/1.1\r\nHost: h\r\nContent-Length: 999999999\r\n\r\n";
        assert!(matches!(
            read_request(&mut reader(raw), DEFAULT_MAX_BODY),
            Err(HttpCodecError::BodyTooLarge { .. })
        ));

        let raw = "POST /x HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\nff\r\n";
        assert!(matches!(
            read_request(&mut reader(raw), 16),
            Err(HttpCodecError::BodyTooLarge { .. })
        ));
    }

    #[test]
    fn test_connection_closed() {
        assert!(matches!(
            read_request(&mut reader(""), DEFAULT_MAX_BODY),
            Err(HttpCodecError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_malformed_start_line() {
        assert!(matches!(
            read_request(&mut reader("GARBAGE\r\n\r\n"), DEFAULT_MAX_BODY),
            Err(HttpCodecError::MalformedStartLine(_))
        ));
    }

    #[test]
    fn test_response_roundtrip() {
        let response = HttpResponse::new(200)
            .with_header("content-type", "text/xml")
            .with_body(b"<ok/>".to_vec());
        let encoded = encode_response(&response);
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/xml\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));

        let mut buf = BufReader::new(&encoded[..]);
        let decoded = read_response(&mut buf, DEFAULT_MAX_BODY).unwrap();
        assert_eq!(decoded.status, 200);
        assert_eq!(decoded.body, b"<ok/>");
    }

    #[test]
    fn test_request_roundtrip() {
        let mut headers = HashMap::new();
        headers.insert("nt".to_string(), "upnp:event".to_string());
        headers.insert("seq".to_string(), "0".to_string());
        let request = HttpRequest {
            method: "NOTIFY".to_string(),
            target: "/cb".to_string(),
            version: "HTTP/1.1".to_string(),
            headers,
            body: b"<e:propertyset/>".to_vec(),
        };

        let encoded = encode_request(&request);
        let mut buf = BufReader::new(&encoded[..]);
        let decoded = read_request(&mut buf, DEFAULT_MAX_BODY).unwrap();
        assert_eq!(decoded.method, "NOTIFY");
        assert_eq!(decoded.header("seq"), Some("0"));
        assert_eq!(decoded.body, request.body);
    }

    #[test]
    fn test_two_requests_on_one_connection() {
        let raw = "GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\nHost: h\r\n\r\n";
        let mut buf = reader(raw);
        let first = read_request(&mut buf, DEFAULT_MAX_BODY).unwrap();
        let second = read_request(&mut buf, DEFAULT_MAX_BODY).unwrap();
        assert_eq!(first.target, "/a");
        assert_eq!(second.target, "/b");
        assert!(matches!(
            read_request(&mut buf, DEFAULT_MAX_BODY),
            Err(HttpCodecError::ConnectionClosed)
        ));
    }
}
