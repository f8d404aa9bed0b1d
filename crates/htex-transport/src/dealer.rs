use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use htex_protocol::WorkerId;

use crate::error::TransportError;
use crate::frame::LineFramedCodec;

/// Initiator side of a connection. Connects out to a `RouterSocket` and
/// sends a fixed identity as its very first frame, so the router can
/// address replies back to this peer by name.
pub struct DealerSocket {
    identity: WorkerId,
    inner: Framed<TcpStream, LineFramedCodec>,
}

impl DealerSocket {
    pub async fn connect(addr: impl ToSocketAddrs, identity: WorkerId) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let mut inner = Framed::new(stream, LineFramedCodec::default());
        inner.send(Bytes::from(identity.clone().into_bytes())).await?;
        Ok(Self { identity, inner })
    }

    pub fn identity(&self) -> &WorkerId {
        &self.identity
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        let body = serde_json::to_vec(msg).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.inner.send(Bytes::from(body)).await
    }

    pub async fn recv<T: DeserializeOwned>(&mut self, timeout: Duration) -> Result<T, TransportError> {
        let frame = match tokio::time::timeout(timeout, self.inner.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => return Err(TransportError::Closed),
            Err(_) => return Err(TransportError::Timeout),
        };
        serde_json::from_slice(&frame).map_err(|e| TransportError::Decode(e.to_string()))
    }

    pub async fn close(mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}
