use crate::events::EventRecord;
use crate::queue::ORIGIN_ACTION;
use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{info, warn};

/// Largest accepted trigger document, bytes.
pub const MAX_SIZE: usize = 4096;
/// Idle window between periodic-task passes.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-connection read bound.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One decoded trigger, ready for the resolver.
#[derive(Debug)]
pub enum Trigger {
    Origin { record: EventRecord, action: String },
    Cancel { record: EventRecord },
    Other { record: EventRecord, kind: String },
}

/// Non-blocking trigger socket. Each accepted connection carries a single
/// JSON document and is closed after the read; peers are gated by the
/// resolved `servers` allow-list.
pub struct Listener {
    inner: TcpListener,
    allowed: Vec<IpAddr>,
}

impl Listener {
    pub fn bind(port: u16, servers: &[String]) -> Result<Self> {
        let inner = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .with_context(|| format!("bind trigger socket on port {port}"))?;
        inner
            .set_nonblocking(true)
            .context("mark trigger socket non-blocking")?;
        let allowed = resolve_allowlist(servers);
        info!(port, peers = allowed.len(), "trigger socket bound");
        Ok(Self { inner, allowed })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Re-resolve the allow-list so DNS changes are picked up without a
    /// restart.
    pub fn refresh_allowlist(&mut self, servers: &[String]) {
        self.allowed = resolve_allowlist(servers);
    }

    /// One accept attempt. `None` means idle, a rejected peer, or a
    /// malformed document; all three leave no state behind.
    pub fn poll(&self) -> Option<Trigger> {
        match self.inner.accept() {
            Ok((stream, peer)) => self.serve(stream, peer),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => None,
            Err(err) => {
                warn!(err = %err, "accept failed");
                None
            }
        }
    }

    fn serve(&self, stream: TcpStream, peer: SocketAddr) -> Option<Trigger> {
        if !self.allowed.contains(&peer.ip()) {
            warn!(peer = %peer, "rejecting connection from unlisted host");
            return None;
        }
        match read_document(stream) {
            Ok(payload) => match decode(&payload) {
                Ok(trigger) => Some(trigger),
                Err(err) => {
                    warn!(peer = %peer, err = %err, "dropping malformed trigger");
                    None
                }
            },
            Err(err) => {
                warn!(peer = %peer, err = %err, "dropping unreadable connection");
                None
            }
        }
    }
}

fn read_document(stream: TcpStream) -> Result<Vec<u8>> {
    stream
        .set_nonblocking(false)
        .context("mark connection blocking")?;
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .context("set read timeout")?;
    let mut payload = Vec::new();
    (&stream)
        .take(MAX_SIZE as u64)
        .read_to_end(&mut payload)
        .context("read trigger document")?;
    Ok(payload)
}

/// Validate the document shape and produce a typed trigger: an object with
/// string `type` and object `data` carrying a string `id`.
pub fn decode(payload: &[u8]) -> Result<Trigger> {
    let value: Value = serde_json::from_slice(payload).context("payload is not valid JSON")?;
    let Some(doc) = value.as_object() else {
        bail!("payload is not a JSON object");
    };
    let Some(kind) = doc.get("type").and_then(Value::as_str) else {
        bail!("missing string field `type`");
    };
    let Some(data) = doc.get("data").and_then(Value::as_object) else {
        bail!("missing object field `data`");
    };
    if !data.get("id").is_some_and(Value::is_string) {
        bail!("missing string field `data.id`");
    }
    let record: EventRecord =
        serde_json::from_value(Value::Object(data.clone())).context("malformed event record")?;

    Ok(match kind {
        "origin" => {
            let action = data
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or(ORIGIN_ACTION)
                .to_string();
            Trigger::Origin { record, action }
        }
        "cancel" => Trigger::Cancel { record },
        other => Trigger::Other {
            record,
            kind: other.to_string(),
        },
    })
}

fn resolve_allowlist(servers: &[String]) -> Vec<IpAddr> {
    let mut allowed = Vec::new();
    for host in servers {
        match (host.as_str(), 0u16).to_socket_addrs() {
            Ok(addrs) => allowed.extend(addrs.map(|addr| addr.ip())),
            Err(err) => warn!(host = %host, err = %err, "could not resolve allow-listed host"),
        }
    }
    allowed.sort();
    allowed.dedup();
    allowed
}
