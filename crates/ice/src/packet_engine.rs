//! Packet engine: the reliable, in-order overlay the transport hands a
//! freshly-selected packet stream to. Its internal reliability algorithm is
//! out of scope (spec.md §2/§9); this is the narrow collaborator interface
//! `ice::transport` depends on, plus a minimal in-process implementation
//! sufficient to drive the accept/connect flows end-to-end.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::Error;
use crate::packet_stream::PacketStream;

#[async_trait::async_trait]
pub trait PacketEngine: Send + Sync {
    /// Outbound side: send the opening zero byte and hand control to the
    /// caller once the stream is ready to carry bus traffic. DBus
    /// authentication beyond that byte is out of scope.
    async fn connect(&self, stream: Arc<PacketStream>) -> Result<(), Error>;

    /// Inbound side: read and validate the opening zero byte.
    async fn accept(&self, stream: Arc<PacketStream>) -> Result<(), Error>;

    async fn send(&self, bytes: &[u8]) -> Result<(), Error>;

    /// Reads the next application-level datagram; `None` on graceful close.
    async fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, Error>;

    async fn close(&self);
}

const OPENING_BYTE: u8 = 0;

/// In-process minimal `PacketEngine`: no retransmission or reordering of its
/// own, since the packet stream it sits on is already framed and delivered
/// in order by the OS socket; exists to exercise the connect/accept
/// handshake and satisfy the trait boundary.
pub struct SimplePacketEngine {
    stream: Mutex<Option<Arc<PacketStream>>>,
}

impl Default for SimplePacketEngine {
    fn default() -> Self {
        Self {
            stream: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl PacketEngine for SimplePacketEngine {
    async fn connect(&self, stream: Arc<PacketStream>) -> Result<(), Error> {
        stream
            .push(&[OPENING_BYTE])
            .await
            .map_err(|e| Error::Codec(e.to_string()))?;
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn accept(&self, stream: Arc<PacketStream>) -> Result<(), Error> {
        let mut buf = [0u8; 1];
        let mut reader = (*stream).clone();

        let n = reader
            .pull(&mut buf)
            .await
            .map_err(|e| Error::Codec(e.to_string()))?;

        if n != Some(1) || buf[0] != OPENING_BYTE {
            return Err(Error::Handshake("expected opening zero byte".to_string()));
        }

        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        let guard = self.stream.lock().await;
        let Some(stream) = guard.as_ref() else {
            return Err(Error::NotConnected);
        };
        stream.push(bytes).await.map_err(|e| Error::Codec(e.to_string()))
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        let mut reader = {
            let guard = self.stream.lock().await;
            let Some(stream) = guard.as_ref() else {
                return Err(Error::NotConnected);
            };
            (**stream).clone()
        };

        reader.pull(buf).await.map_err(|e| Error::Codec(e.to_string()))
    }

    async fn close(&self) {
        *self.stream.lock().await = None;
    }
}
