//! ICE packet stream: the datagram-level framing over a selected candidate
//! pair, keyed by a normalized connect spec (`ice:guid=<peer-guid>`).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use codec::crypto::{Password, fingerprint, hmac_sha1};
use codec::message::attributes::{
    Attribute, Data, Lifetime, MessageIntegrity, RequestedTransport, RequestedTransportProtocol,
    Software, UserName, XorPeerAddress,
};
use codec::message::methods::*;
use codec::message::MessageEncoder;
use codec::{Decoder, Error as CodecError};

use bytes::BytesMut;
use tokio::net::UdpSocket;

/// Fixed STUN header plus the attribute overhead `push`/`pull` always pay
/// when relaying through TURN: XOR-PEER-ADDRESS, DATA header,
/// MESSAGE-INTEGRITY, FINGERPRINT and a USERNAME sized for the longest
/// token this daemon issues. Matches the ~172 byte figure named in spec.
const STUN_RELAY_OVERHEAD: usize = 172;

#[derive(Clone)]
pub struct RelayTarget {
    pub socket: SocketAddr,
    pub peer: SocketAddr,
    pub username: String,
    pub password: Password,
    pub software: &'static str,
}

#[derive(Clone)]
pub struct PacketStream {
    socket: std::sync::Arc<UdpSocket>,
    remote: SocketAddr,
    relay: Option<RelayTarget>,
    interface_mtu: usize,
    turn_refresh_timestamp: Instant,
    turn_refresh_period: Duration,
}

impl PacketStream {
    pub fn new(
        socket: std::sync::Arc<UdpSocket>,
        remote: SocketAddr,
        relay: Option<RelayTarget>,
        interface_mtu: usize,
    ) -> Self {
        Self {
            socket,
            remote,
            relay,
            interface_mtu,
            turn_refresh_timestamp: Instant::now(),
            turn_refresh_period: Duration::from_secs(600),
        }
    }

    pub fn using_turn(&self) -> bool {
        self.relay.is_some()
    }

    /// Maximum application payload this stream can carry in one datagram.
    pub fn max_payload(&self) -> usize {
        if self.using_turn() {
            self.interface_mtu.saturating_sub(STUN_RELAY_OVERHEAD)
        } else {
            self.interface_mtu
        }
    }

    pub async fn push(&self, payload: &[u8]) -> Result<(), CodecError> {
        assert!(payload.len() <= self.max_payload());

        match &self.relay {
            Some(relay) => {
                let token: [u8; 12] = rand_token();
                let mut buf = BytesMut::new();
                let mut encoder = MessageEncoder::new(SEND_INDICATION, &token, &mut buf);
                encoder.append::<XorPeerAddress>(relay.peer);
                encoder.append::<Data>(payload);
                encoder.append::<UserName>(&relay.username);
                encoder.flush(Some(&relay.password))?;

                let _ = self.socket.send_to(&buf, relay.socket).await;
            }
            None => {
                let _ = self.socket.send_to(payload, self.remote).await;
            }
        }

        Ok(())
    }

    /// Reads one datagram. When relaying through TURN this recognizes a
    /// Data indication (extracting its payload) or silently consumes a
    /// binding/refresh response, updating the refresh period from any
    /// `LIFETIME` attribute it carries.
    pub async fn pull(&mut self, buf: &mut [u8]) -> Result<Option<usize>, CodecError> {
        let mut datagram = vec![0u8; self.interface_mtu.max(2048)];
        let (size, _addr) = self
            .socket
            .recv_from(&mut datagram)
            .await
            .map_err(|_| CodecError::InvalidInput)?;
        datagram.truncate(size);

        if !self.using_turn() {
            let n = size.min(buf.len());
            buf[..n].copy_from_slice(&datagram[..n]);
            return Ok(Some(n));
        }

        let mut decoder = Decoder::default();
        let message = match decoder.decode(&datagram) {
            Ok(m) => m,
            Err(_) => return Ok(None),
        };

        match message.method() {
            DATA_INDICATION => {
                let Some(data) = message.get::<Data>() else {
                    return Ok(None);
                };
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(Some(n))
            }
            BINDING_RESPONSE | REFRESH_RESPONSE => {
                const WARNING_PERIOD_SECS: u64 = 60;
                if let Some(lifetime) = message.get::<Lifetime>() {
                    let usable = (lifetime as u64).saturating_sub(WARNING_PERIOD_SECS);
                    self.turn_refresh_period = Duration::from_millis(usable * 1000);
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// STUN binding indication used as a NAT keepalive, sent to the remote
    /// peer directly or to the TURN allocation address when relaying.
    pub async fn send_nat_keepalive(&self) -> Result<(), CodecError> {
        let token: [u8; 12] = rand_token();
        let mut buf = BytesMut::new();
        let mut encoder = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
        encoder.flush(None)?;

        let target = self.relay.as_ref().map(|r| r.socket).unwrap_or(self.remote);
        let _ = self.socket.send_to(&buf, target).await;
        Ok(())
    }

    /// STUN refresh request renewing the TURN allocation's lifetime.
    pub async fn send_turn_refresh(&mut self, now: Instant, requested_lifetime: u32) -> Result<(), CodecError> {
        let Some(relay) = &self.relay else {
            return Ok(());
        };

        let token: [u8; 12] = rand_token();
        let mut buf = BytesMut::new();
        let mut encoder = MessageEncoder::new(REFRESH_REQUEST, &token, &mut buf);
        encoder.append::<Lifetime>(requested_lifetime);
        encoder.append::<RequestedTransport>(RequestedTransportProtocol::Udp);
        encoder.append::<Software>(relay.software);
        encoder.append::<UserName>(&relay.username);
        encoder.flush(Some(&relay.password))?;

        let _ = self.socket.send_to(&buf, relay.socket).await;
        self.turn_refresh_timestamp = now;
        Ok(())
    }

    pub fn turn_refresh_due(&self, now: Instant) -> bool {
        self.using_turn() && now.duration_since(self.turn_refresh_timestamp) >= self.turn_refresh_period
    }
}

fn rand_token() -> [u8; 12] {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let mut token = [0u8; 12];
    token[..4].copy_from_slice(&nanos.to_be_bytes());
    token[4..8].copy_from_slice(&std::process::id().to_be_bytes());
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_payload_subtracts_relay_overhead_only_when_using_turn() {
        let socket = std::sync::Arc::new(
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(UdpSocket::bind("127.0.0.1:0"))
                .unwrap(),
        );

        let direct = PacketStream::new(socket.clone(), "127.0.0.1:1".parse().unwrap(), None, 1500);
        assert_eq!(direct.max_payload(), 1500);

        let relayed = PacketStream::new(
            socket,
            "127.0.0.1:1".parse().unwrap(),
            Some(RelayTarget {
                socket: "127.0.0.1:2".parse().unwrap(),
                peer: "127.0.0.1:3".parse().unwrap(),
                username: "user".to_string(),
                password: Password::Md5([0u8; 16]),
                software: "meshbusd",
            }),
            1500,
        );
        assert_eq!(relayed.max_payload(), 1500 - STUN_RELAY_OVERHEAD);
    }
}
