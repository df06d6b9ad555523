//! IMAP mail session: fetches unseen messages over implicit TLS.
//!
//! One short-lived connection per poll cycle:
//! `LOGIN` → `SELECT` → `SEARCH UNSEEN` → `FETCH n RFC822` per id → `CLOSE` → `LOGOUT`.
//! Fetching the full RFC822 body sets `\Seen` on the server, so nothing is
//! fetched twice.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::channels::MailSession;
use crate::config::ImapConfig;
use crate::error::ChannelError;
use crate::pipeline::types::RawMessage;

const SESSION_NAME: &str = "imap";

/// Socket read timeout for every IMAP response.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Mail session backed by a TLS IMAP server.
pub struct ImapSession {
    config: ImapConfig,
}

impl ImapSession {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailSession for ImapSession {
    fn name(&self) -> &str {
        SESSION_NAME
    }

    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, ChannelError> {
        let cfg = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_unseen_imap(&cfg))
            .await
            .map_err(|e| fetch_failed(format!("IMAP task panicked: {e}")))?
    }
}

/// Blocking fetch: connect, pull every unseen message, disconnect.
fn fetch_unseen_imap(config: &ImapConfig) -> Result<Vec<RawMessage>, ChannelError> {
    let tls = connect_tls(config)?;
    let mut conn = ImapConnection::new(tls);
    conn.fetch_unseen(config)
}

fn connect_tls(
    config: &ImapConfig,
) -> Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>, ChannelError> {
    let tcp = TcpStream::connect((&*config.host, config.port)).map_err(|e| {
        ChannelError::StartupFailed {
            name: SESSION_NAME.into(),
            reason: format!("connect {}:{}: {e}", config.host, config.port),
        }
    })?;
    tcp.set_read_timeout(Some(READ_TIMEOUT)).map_err(io_failed)?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = ServerName::try_from(config.host.clone()).map_err(|e| {
        ChannelError::StartupFailed {
            name: SESSION_NAME.into(),
            reason: format!("invalid server name {}: {e}", config.host),
        }
    })?;
    let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(|e| {
        ChannelError::StartupFailed {
            name: SESSION_NAME.into(),
            reason: e.to_string(),
        }
    })?;

    Ok(rustls::StreamOwned::new(conn, tcp))
}

fn fetch_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::FetchFailed {
        name: SESSION_NAME.into(),
        reason: reason.into(),
    }
}

fn io_failed(e: std::io::Error) -> ChannelError {
    ChannelError::Disconnected {
        name: SESSION_NAME.into(),
        reason: e.to_string(),
    }
}

// ── Protocol ────────────────────────────────────────────────────────

/// Everything the server sent in reply to one tagged command.
#[derive(Debug, Default)]
struct Response {
    /// Untagged lines, CRLF stripped, literals excluded.
    untagged: Vec<String>,
    /// Literal payloads (`{N}` blocks) in order of arrival.
    literals: Vec<Vec<u8>>,
    /// The tagged completion line without the tag.
    status: String,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status.starts_with("OK")
    }
}

/// Tagged-command IMAP client over any byte stream.
struct ImapConnection<S: Read + Write> {
    stream: BufReader<S>,
    tag_counter: u32,
}

impl<S: Read + Write> ImapConnection<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            tag_counter: 0,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    fn fetch_unseen(&mut self, config: &ImapConfig) -> Result<Vec<RawMessage>, ChannelError> {
        let greeting = self.read_line()?;
        debug!(greeting = %String::from_utf8_lossy(&greeting).trim_end(), "IMAP greeting");

        let login = self.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        if !login.is_ok() {
            return Err(ChannelError::AuthFailed {
                name: SESSION_NAME.into(),
                reason: login.status,
            });
        }

        let select = self.command(&format!("SELECT {}", quote(&config.mailbox)))?;
        if !select.is_ok() {
            return Err(fetch_failed(format!(
                "SELECT {} failed: {}",
                config.mailbox, select.status
            )));
        }

        let search = self.command("SEARCH UNSEEN")?;
        if !search.is_ok() {
            return Err(fetch_failed(format!("SEARCH failed: {}", search.status)));
        }
        let ids = parse_search(&search.untagged);

        if ids.is_empty() {
            info!("No new mail");
        } else {
            info!(count = ids.len(), mailbox = %config.mailbox, "Fetching new mail");
        }

        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            let fetch = self.command(&format!("FETCH {id} RFC822"))?;
            if !fetch.is_ok() {
                return Err(fetch_failed(format!("FETCH {id} failed: {}", fetch.status)));
            }
            match fetch.literals.into_iter().next() {
                Some(bytes) => messages.push(RawMessage::new(bytes)),
                None => warn!(id = %id, "FETCH returned no message body"),
            }
        }

        if let Err(e) = self.command("CLOSE") {
            warn!(error = %e, "IMAP CLOSE failed");
        }
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP LOGOUT failed");
        }

        Ok(messages)
    }

    /// Send one tagged command and collect the reply up to its completion line.
    fn command(&mut self, cmd: &str) -> Result<Response, ChannelError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);

        let writer = self.stream.get_mut();
        writer
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .map_err(io_failed)?;
        writer.flush().map_err(io_failed)?;

        let tag_prefix = format!("{tag} ");
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(size) = literal_size(&line) {
                response.literals.push(self.read_exact(size)?);
                // The rest of the line after the literal belongs to the same response.
                continue;
            }

            let text = String::from_utf8_lossy(&line).trim_end().to_string();
            if let Some(status) = text.strip_prefix(&tag_prefix) {
                response.status = status.to_string();
                return Ok(response);
            }
            response.untagged.push(text);
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).map_err(io_failed)?;
        if n == 0 {
            return Err(ChannelError::Disconnected {
                name: SESSION_NAME.into(),
                reason: "IMAP connection closed".into(),
            });
        }
        Ok(buf)
    }

    fn read_exact(&mut self, size: usize) -> Result<Vec<u8>, ChannelError> {
        let mut buf = vec![0u8; size];
        self.stream.read_exact(&mut buf).map_err(io_failed)?;
        Ok(buf)
    }
}

/// Size of a literal announced at the end of a line (`... {123}\r\n`).
fn literal_size(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let inner = line.strip_suffix(b"}")?;
    let open = inner.iter().rposition(|&b| b == b'{')?;
    std::str::from_utf8(&inner[open + 1..]).ok()?.parse().ok()
}

/// Message sequence numbers from `* SEARCH` lines.
fn parse_search(untagged: &[String]) -> Vec<String> {
    untagged
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

// ── Tests ───────────────────────────────────────────────────────────
