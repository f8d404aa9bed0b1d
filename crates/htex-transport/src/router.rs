use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use htex_protocol::WorkerId;

use crate::error::TransportError;
use crate::frame::LineFramedCodec;

enum RouterEvent {
    Registered {
        identity: WorkerId,
        sender: mpsc::UnboundedSender<Bytes>,
    },
    Inbound {
        identity: WorkerId,
        body: Bytes,
    },
    Disconnected {
        identity: WorkerId,
    },
}

/// Listener side of a connection. Every inbound message is tagged with the
/// sending peer's identity (the first frame it sent after connecting);
/// outbound messages are routed back to a peer by that same identity.
///
/// `recv` multiplexes every connected peer behind a single channel, which is
/// this crate's async-native substitute for "polling multiple sockets with
/// one blocking call" (§4.2): one `select!`-driven task per connection feeds
/// a shared queue instead of an OS-level poll set.
pub struct RouterSocket {
    port: u16,
    events_rx: mpsc::UnboundedReceiver<RouterEvent>,
    outbound: HashMap<WorkerId, mpsc::UnboundedSender<Bytes>>,
    accept_task: JoinHandle<()>,
}

impl RouterSocket {
    /// Binds to the first free port in `port_range` (inclusive) and returns
    /// the bound socket together with the actual port chosen.
    pub async fn bind(host: &str, port_range: (u16, u16)) -> Result<Self, TransportError> {
        let (lo, hi) = port_range;
        let mut bound = None;
        for port in lo..=hi {
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .map_err(|e| TransportError::Framing(format!("invalid bind address {host}:{port}: {e}")))?;
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    bound = Some(listener);
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let listener = bound.ok_or(TransportError::PortRangeExhausted(lo, hi))?;
        let port = listener.local_addr()?.port();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(listener, events_tx));

        Ok(Self {
            port,
            events_rx,
            outbound: HashMap::new(),
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits up to `timeout` for the next inbound message from any peer.
    /// Malformed frames from a peer are logged and dropped — one
    /// misbehaving peer never blocks or poisons the others.
    pub async fn recv<T: DeserializeOwned>(&mut self, timeout: Duration) -> Result<(WorkerId, T), TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let event = match tokio::time::timeout(remaining, self.events_rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(TransportError::Closed),
                Err(_) => return Err(TransportError::Timeout),
            };
            match event {
                RouterEvent::Registered { identity, sender } => {
                    self.outbound.insert(identity, sender);
                }
                RouterEvent::Disconnected { identity } => {
                    self.outbound.remove(&identity);
                }
                RouterEvent::Inbound { identity, body } => match serde_json::from_slice::<T>(&body) {
                    Ok(msg) => return Ok((identity, msg)),
                    Err(e) => {
                        tracing::warn!(peer = %identity, error = %e, "dropping malformed frame");
                        continue;
                    }
                },
            }
        }
    }

    pub fn send<T: Serialize>(&self, identity: &WorkerId, msg: &T) -> Result<(), TransportError> {
        let sender = self
            .outbound
            .get(identity)
            .ok_or_else(|| TransportError::UnknownPeer(identity.clone()))?;
        let body = serde_json::to_vec(msg).map_err(|e| TransportError::Encode(e.to_string()))?;
        sender.send(Bytes::from(body)).map_err(|_| TransportError::Closed)
    }

    pub fn known_peers(&self) -> impl Iterator<Item = &WorkerId> {
        self.outbound.keys()
    }

    pub fn close(self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, events_tx: mpsc::UnboundedSender<RouterEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let events_tx = events_tx.clone();
                tokio::spawn(handle_connection(stream, events_tx));
            }
            Err(e) => {
                tracing::warn!(error = %e, "router accept failed");
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, events_tx: mpsc::UnboundedSender<RouterEvent>) {
    stream.set_nodelay(true).ok();
    let framed = Framed::new(stream, LineFramedCodec::default());
    let (mut sink, mut stream_half) = framed.split();

    let identity = match stream_half.next().await {
        Some(Ok(body)) => String::from_utf8_lossy(&body).into_owned(),
        _ => return, // peer dropped before sending its identity frame
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    if events_tx
        .send(RouterEvent::Registered {
            identity: identity.clone(),
            sender: tx,
        })
        .is_err()
    {
        return;
    }

    let writer_identity = identity.clone();
    let writer = tokio::spawn(async move {
        while let Some(body) = rx.recv().await {
            if sink.send(body).await.is_err() {
                tracing::debug!(peer = %writer_identity, "write side closed");
                break;
            }
        }
    });

    loop {
        match stream_half.next().await {
            Some(Ok(body)) => {
                if events_tx
                    .send(RouterEvent::Inbound {
                        identity: identity.clone(),
                        body,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(peer = %identity, error = %e, "malformed frame, dropping");
                continue;
            }
            None => break,
        }
    }

    writer.abort();
    let _ = events_tx.send(RouterEvent::Disconnected { identity });
}
