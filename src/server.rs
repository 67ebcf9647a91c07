//! Minimal exposition server for the polling monitor client
//!
//! A blocking accept loop handles exactly one request per connection,
//! synchronously to completion. The parser covers just enough of HTTP/1.1
//! to carry the fixed command surface: request line, headers to find the
//! body length, body. Every response the agent ever writes is
//! `HTTP/1.1 200 OK` with an exact Content-Length; unmatched requests get
//! no response at all and the connection is closed. A slow client stalls
//! the accept loop for everyone, which is acceptable for the single
//! expected client.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::assets;
use crate::attach::DiagnosticChannel;
use crate::error::AgentError;
use crate::model::CallGraphModel;

const SERVER_HEADER: &str = "vigia/0.1.0";

/// Read timeout per connection, so one stuck client cannot hang the agent
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Parsed request: just enough structure to route on
#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    body: String,
}

pub struct ExpositionServer {
    listener: TcpListener,
    model: Arc<CallGraphModel>,
    channel: Arc<dyn DiagnosticChannel>,
}

impl ExpositionServer {
    /// Bind the listening socket; failure here is the one fatal startup error
    pub fn bind(
        port: u16,
        model: Arc<CallGraphModel>,
        channel: Arc<dyn DiagnosticChannel>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .with_context(|| format!("failed to open listening socket on port {port}"))?;
        Ok(Self {
            listener,
            model,
            channel,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; runs for the process lifetime
    pub fn run(self) -> ! {
        info!("exposition server listening on {:?}", self.listener.local_addr());
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("connection from {}", peer);
                    if let Err(e) = self.handle_connection(stream) {
                        // A single bad client must never take the agent down
                        warn!("could not handle request: {}", e);
                    }
                }
                Err(e) => warn!("accept failed: {}", e),
            }
        }
    }

    fn handle_connection(&self, stream: TcpStream) -> Result<(), AgentError> {
        stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;
        let mut reader = BufReader::new(&stream);
        let request = parse_request(&mut reader)?;
        debug!("request {} {}", request.method, request.path);
        self.route(&request, &stream);
        Ok(())
    }

    /// Dispatch by exact method + path-prefix match; first match wins
    fn route(&self, request: &Request, out: &TcpStream) {
        let method = request.method.as_str();
        let path = request.path.as_str();
        match (method, path) {
            ("GET", p) if p.starts_with("/favicon.ico") => self.send_asset(out, "favicon.ico"),
            ("GET", p) if p.starts_with("/monitor/styles/") || p.starts_with("/monitor/external/") => {
                self.send_asset(out, &p["/monitor/".len()..]);
            }
            ("GET", p) if p.starts_with("/monitor") => self.send_asset(out, "index.html"),
            ("DELETE", p) if p.starts_with("/tasks") => {
                self.model.reset();
                send_json(out, "OK".as_bytes());
            }
            ("DELETE", p) if p.starts_with("/filterWhite") => {
                self.set_filter(out, "", true);
            }
            ("DELETE", p) if p.starts_with("/filterBlack") => {
                self.set_filter(out, "", false);
            }
            ("PUT", p) if p.starts_with("/filterWhite") => {
                self.set_filter(out, &request.body, true);
            }
            ("PUT", p) if p.starts_with("/filterBlack") => {
                self.set_filter(out, &request.body, false);
            }
            ("GET", p) if p.starts_with("/process/ids") => {
                let pids = self.channel.list();
                info!("discovered targets={:?}", pids);
                self.model.set_discovered(pids);
                match serde_json::to_vec(&self.model.process_list()) {
                    Ok(body) => send_json(out, &body),
                    Err(e) => warn!("could not serialize process list: {}", e),
                }
            }
            ("PUT", p) if p.starts_with("/process/id") => {
                // Non-numeric bodies change nothing; the attached process stays
                match request.body.trim().parse::<i32>() {
                    Ok(pid) => self.model.request_process(pid),
                    Err(_) => warn!("invalid id={}", request.body.trim()),
                }
                send_json(out, "OK".as_bytes());
            }
            ("GET", p) if p.starts_with("/process") => {
                match serde_json::to_vec(&self.model.snapshot()) {
                    Ok(body) => send_json(out, &body),
                    Err(e) => warn!("could not serialize snapshot: {}", e),
                }
            }
            _ => {
                // Unmatched: close without writing a single byte
                warn!("not expected request={} {}", method, path);
            }
        }
    }

    fn set_filter(&self, out: &TcpStream, pattern: &str, white: bool) {
        let result = if white {
            self.model.set_white_list(pattern)
        } else {
            self.model.set_black_list(pattern)
        };
        match result {
            Ok(()) => {
                // A filter change always forces a full graph reset
                self.model.reset();
                send_json(out, "OK".as_bytes());
            }
            Err(e) => {
                warn!("{}", e);
                send_json(out, "ERROR".as_bytes());
            }
        }
    }

    fn send_asset(&self, out: &TcpStream, name: &str) {
        match assets::get(name) {
            Some((bytes, mime)) => send_response(out, mime, bytes),
            None => warn!("not expected asset request={}", name),
        }
    }
}

/// Parse a minimal request: request line, headers for Content-Length, body
fn parse_request(reader: &mut impl BufRead) -> Result<Request, AgentError> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(m), Some(p)) => (m.to_string(), p.to_string()),
        _ => {
            return Err(AgentError::Protocol(format!(
                "bad request line {:?}",
                request_line.trim_end()
            )))
        }
    };

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| AgentError::Protocol(format!("bad content length {value:?}")))?;
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;
    let body = String::from_utf8(body)
        .map_err(|_| AgentError::Protocol("body is not valid UTF-8".to_string()))?;

    Ok(Request { method, path, body })
}

fn send_json(out: &TcpStream, body: &[u8]) {
    send_response(out, "application/json", body);
}

/// Hand-built response: status line, Server, Content-Type, Content-Length.
/// Write failures are logged and swallowed.
fn send_response(mut out: &TcpStream, content_type: &str, body: &[u8]) {
    let header = format!(
        "HTTP/1.1 200 OK\r\nServer: {SERVER_HEADER}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let result = out
        .write_all(header.as_bytes())
        .and_then(|()| out.write_all(body))
        .and_then(|()| out.flush());
    if let Err(e) = result {
        warn!("could not write response: {}", e);
    }
}
