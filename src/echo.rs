//! Minimal ping/echo RPC used to measure round-trip latency between hosts.
//!
//! A frame is a 4-byte big-endian length prefix followed by the JSON encoding
//! of a [`Packet`]. The server echoes each request back with `target`
//! overwritten by its own identity.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};

/// Default port the echo server listens on.
pub const DEFAULT_PORT: u16 = 3284;

/// Default time to wait for an echo response before giving up.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest frame the protocol accepts; packets are tiny, anything bigger is
/// a corrupt or hostile stream.
const MAX_FRAME_LEN: u32 = 4096;

/// The single message of the echo protocol. The response is structurally
/// identical to the request with `target` replaced by the responder's name
/// and the sequence number echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub source: String,
    pub target: String,
    pub sequence: u64,
}

async fn write_packet(stream: &mut TcpStream, packet: &Packet) -> Result<()> {
    let body = serde_json::to_vec(packet)?;
    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_packet(stream: &mut TcpStream) -> Result<Packet> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await?;
    let len = u32::from_be_bytes(prefix);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(Error::Frame(len));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Echo server that replies to ping requests from other hosts so they can
/// measure inter-host latency.
pub struct Server {
    name: String,
    addr: String,
    messages: Arc<AtomicU64>,
}

impl Server {
    /// Create a server bound to `addr` answering as `name`. An empty address
    /// falls back to all interfaces on the default port.
    pub fn new(addr: &str, name: &str) -> Self {
        let addr = if addr.is_empty() {
            format!("0.0.0.0:{DEFAULT_PORT}")
        } else {
            addr.to_string()
        };
        Self {
            name: name.to_string(),
            addr,
            messages: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of pings replied to, shared with the running server task so
    /// the total can be reported at shutdown.
    pub fn counter(&self) -> Arc<AtomicU64> {
        self.messages.clone()
    }

    /// Bind the TCP listener. Split from [`Server::run`] so callers (and
    /// tests) can learn the bound address before serving.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("listening for pings on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve ping requests until the process exits, one task per connection.
    pub async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let name = self.name.clone();
                    let messages = self.messages.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, &name, &messages).await {
                            debug!("echo connection closed: {err}");
                        }
                    });
                }
                Err(err) => warn!("could not accept echo connection: {err}"),
            }
        }
    }
}

/// Answer pings on one connection until the remote end hangs up.
async fn handle_connection(
    mut stream: TcpStream,
    name: &str,
    messages: &AtomicU64,
) -> Result<()> {
    loop {
        let mut packet = read_packet(&mut stream).await?;
        messages.fetch_add(1, Ordering::Relaxed);
        info!("received ping {} from {}", packet.sequence, packet.source);

        packet.target = name.to_string();
        write_packet(&mut stream, &packet).await?;
    }
}

/// Send a single ping from `source` to the peer named `target` at `addr` and
/// return the round-trip latency. The default port is appended when `addr`
/// carries none. The measurement starts before the dial, so connection setup
/// is included in the reported latency.
///
/// Exactly one attempt is made; connection failures, I/O failures and the
/// timeout all surface as errors and never as a zero duration. Zero is
/// reserved by callers as the timeout sentinel.
pub async fn send_ping(
    source: &str,
    target: &str,
    addr: &str,
    sequence: u64,
    timeout: Duration,
) -> Result<Duration> {
    let addr = resolve_addr(addr);
    let request = Packet {
        source: source.to_string(),
        target: target.to_string(),
        sequence,
    };

    let start = Instant::now();
    let reply = tokio::time::timeout(timeout, async {
        let mut stream = TcpStream::connect(&addr).await.map_err(|source| Error::Connect {
            addr: addr.clone(),
            source,
        })?;
        write_packet(&mut stream, &request).await?;
        read_packet(&mut stream).await
    })
    .await
    .map_err(|_| Error::PingTimeout {
        addr: addr.clone(),
        timeout,
    })??;
    let latency = start.elapsed();

    if reply.sequence != sequence {
        return Err(Error::Ping {
            addr,
            reason: format!("expected sequence {sequence}, got {}", reply.sequence),
        });
    }

    debug!("ping from {} to {} in {:?}", source, reply.target, latency);
    Ok(latency)
}

/// Append the default echo port if the address doesn't already carry one.
pub fn resolve_addr(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:{DEFAULT_PORT}")
    }
}
