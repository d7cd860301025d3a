//! ICE transport: ties bus endpoints to ICE packet streams and the packet
//! engine, runs the accept/management loop, and de-duplicates packet
//! streams per destination via a placeholder-insert-then-complete pattern.
//! Grounded on `turn-server/src/server.rs`'s per-connection task structure
//! and its "keep a registry, log accept/disconnect, reap on close" shape.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use ahash::AHashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::Error;
use crate::packet_engine::PacketEngine;
use crate::packet_stream::PacketStream;

pub const DEFAULT_MAX_INCOMPLETE: usize = 10;
pub const DEFAULT_MAX_COMPLETED: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Initialized,
    Active,
    Passive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Initialized,
    Authenticating,
    Failed,
    Succeeded,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointLifecycle {
    Initialized,
    Failed,
    Started,
    Stopping,
    Done,
}

/// A transport-level endpoint: the (side, auth, lifecycle) triple the
/// accept loop inspects to decide when to reap a connection.
pub struct IceEndpoint {
    pub connect_spec: String,
    side: Mutex<Side>,
    auth: Mutex<AuthState>,
    lifecycle: Mutex<EndpointLifecycle>,
    sudden_disconnect: Mutex<bool>,
}

impl IceEndpoint {
    fn new(side: Side, connect_spec: String) -> Arc<Self> {
        Arc::new(Self {
            connect_spec,
            side: Mutex::new(side),
            auth: Mutex::new(AuthState::Initialized),
            lifecycle: Mutex::new(EndpointLifecycle::Initialized),
            sudden_disconnect: Mutex::new(true),
        })
    }

    pub fn side(&self) -> Side {
        *self.side.lock()
    }

    pub fn auth_state(&self) -> AuthState {
        *self.auth.lock()
    }

    pub fn lifecycle(&self) -> EndpointLifecycle {
        *self.lifecycle.lock()
    }

    pub fn begin_authenticating(&self) {
        *self.auth.lock() = AuthState::Authenticating;
    }

    pub fn auth_succeeded(&self) {
        let mut auth = self.auth.lock();
        if *auth != AuthState::Authenticating {
            warn!("auth_succeeded called outside Authenticating state, continuing");
        }
        *auth = AuthState::Succeeded;
    }

    pub fn auth_failed(&self) {
        *self.auth.lock() = AuthState::Failed;
    }

    pub fn start(&self) {
        *self.auth.lock() = AuthState::Done;
        *self.lifecycle.lock() = EndpointLifecycle::Started;
    }

    /// Requests a graceful stop; the natural exit of the reader/writer
    /// tasks is what actually drives `EP_STOPPING`/`DONE`.
    pub fn request_stop(&self) {
        *self.sudden_disconnect.lock() = false;
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == EndpointLifecycle::Started {
            *lifecycle = EndpointLifecycle::Stopping;
        }
    }

    pub fn mark_exited(&self) -> bool {
        let sudden = *self.sudden_disconnect.lock();
        *self.lifecycle.lock() = EndpointLifecycle::Stopping;
        sudden
    }

    pub fn is_reapable(&self) -> bool {
        matches!(self.auth_state(), AuthState::Failed)
            || matches!(
                self.lifecycle(),
                EndpointLifecycle::Failed | EndpointLifecycle::Stopping
            )
    }
}

pub trait TransportListener: Send + Sync {
    fn on_bus_connection_lost(&self, connect_spec: &str);
}

enum StreamSlot {
    Pending(Arc<Notify>),
    Ready(Arc<PacketStream>),
}

struct StreamEntry {
    slot: StreamSlot,
    count: usize,
}

/// Normalizes a peer GUID into the connect-spec form spec.md §6.3 names.
pub fn normalize_spec(peer_guid: &str) -> String {
    format!("ice:guid={peer_guid}")
}

pub struct IceTransport {
    streams: Mutex<AHashMap<String, StreamEntry>>,
    endpoints: Mutex<Vec<Arc<IceEndpoint>>>,
    incomplete: AtomicUsize,
    completed: AtomicUsize,
    max_incomplete: usize,
    max_completed: usize,
    listener: Option<Arc<dyn TransportListener>>,
    installed_listen_specs: Mutex<std::collections::HashSet<String>>,
    guid_counter: AtomicU32,
}

impl IceTransport {
    pub fn new(listener: Option<Arc<dyn TransportListener>>) -> Self {
        Self {
            streams: Mutex::new(AHashMap::new()),
            endpoints: Mutex::new(Vec::new()),
            incomplete: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            max_incomplete: DEFAULT_MAX_INCOMPLETE,
            max_completed: DEFAULT_MAX_COMPLETED,
            listener,
            installed_listen_specs: Mutex::new(std::collections::HashSet::new()),
            guid_counter: AtomicU32::new(0),
        }
    }

    /// Installs a listen spec; idempotent start, matching `StartListen`.
    pub fn start_listen(&self, spec: &str) {
        self.installed_listen_specs.lock().insert(spec.to_string());
    }

    /// Idempotent stop: a spec not currently installed is a no-op, not an
    /// error (spec.md Open Question, resolved in `DESIGN.md`).
    pub fn stop_listen(&self, spec: &str) {
        self.installed_listen_specs.lock().remove(spec);
    }

    pub fn is_listening(&self, spec: &str) -> bool {
        self.installed_listen_specs.lock().contains(spec)
    }

    /// Accept-loop admission control: drops excess connections with
    /// `AUTH_FAILED` rather than queuing them.
    pub fn try_admit_incoming(&self) -> bool {
        let incomplete = self.incomplete.fetch_add(1, Ordering::AcqRel);
        if incomplete >= self.max_incomplete {
            self.incomplete.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        true
    }

    pub fn admit_passive(self: &Arc<Self>, connect_spec: String) -> Arc<IceEndpoint> {
        let endpoint = IceEndpoint::new(Side::Passive, connect_spec);
        endpoint.begin_authenticating();
        self.endpoints.lock().push(endpoint.clone());
        endpoint
    }

    /// Completes a passive endpoint's admission bookkeeping once
    /// authentication finishes (successfully or not).
    pub fn finish_incoming_auth(&self, succeeded: bool) {
        self.incomplete.fetch_sub(1, Ordering::AcqRel);
        if succeeded {
            self.completed.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Reaps endpoints whose auth/lifecycle state marks them as done;
    /// releases their packet streams and notifies the listener for sudden
    /// disconnects.
    pub fn reap(&self) {
        let mut endpoints = self.endpoints.lock();
        let mut i = 0;

        while i < endpoints.len() {
            if endpoints[i].is_reapable() {
                let endpoint = endpoints.swap_remove(i);
                debug!("reaping ICE endpoint: spec={}", endpoint.connect_spec);

                if matches!(endpoint.lifecycle(), EndpointLifecycle::Stopping) {
                    let sudden = *endpoint.sudden_disconnect.lock();
                    if sudden {
                        if let Some(listener) = &self.listener {
                            listener.on_bus_connection_lost(&endpoint.connect_spec);
                        }
                    }

                    if matches!(endpoint.auth_state(), AuthState::Succeeded | AuthState::Done) {
                        self.completed.fetch_sub(1, Ordering::AcqRel);
                    } else {
                        self.incomplete.fetch_sub(1, Ordering::AcqRel);
                    }
                }

                self.release(&endpoint.connect_spec);
            } else {
                i += 1;
            }
        }
    }

    /// Reuses or gathers a packet stream for `spec`. Concurrent callers for
    /// the same spec serialize behind the first gather via a placeholder
    /// notify; everyone who observes the same in-flight gather ends up
    /// sharing the single resulting stream and a correspondingly bumped
    /// reference count.
    pub async fn acquire<F, Fut>(&self, spec: &str, gather: F) -> Arc<PacketStream>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Arc<PacketStream>>,
    {
        let mut counted = false;

        loop {
            let notify = {
                let mut streams = self.streams.lock();

                match streams.get_mut(spec) {
                    Some(entry) => {
                        if !counted {
                            entry.count += 1;
                            counted = true;
                        }
                        match &entry.slot {
                            StreamSlot::Ready(stream) => return stream.clone(),
                            StreamSlot::Pending(notify) => notify.clone(),
                        }
                    }
                    None => {
                        streams.insert(
                            spec.to_string(),
                            StreamEntry {
                                slot: StreamSlot::Pending(Arc::new(Notify::new())),
                                count: 1,
                            },
                        );
                        drop(streams);

                        let stream = gather().await;
                        let mut streams = self.streams.lock();
                        if let Some(entry) = streams.get_mut(spec) {
                            if let StreamSlot::Pending(notify) = &entry.slot {
                                notify.notify_waiters();
                            }
                            entry.slot = StreamSlot::Ready(stream.clone());
                        }

                        return stream;
                    }
                }
            };

            notify.notified().await;
        }
    }

    /// Decrements the reference count for `spec`; destroys the stream and
    /// removes it from the map once the count reaches zero.
    pub fn release(&self, spec: &str) {
        let mut streams = self.streams.lock();
        let Some(entry) = streams.get_mut(spec) else {
            return;
        };

        entry.count = entry.count.saturating_sub(1);
        if entry.count == 0 {
            streams.remove(spec);
        }
    }

    pub fn reference_count(&self, spec: &str) -> usize {
        self.streams.lock().get(spec).map(|e| e.count).unwrap_or(0)
    }

    pub async fn connect_outbound<F, Fut>(
        self: &Arc<Self>,
        peer_guid: &str,
        gather: F,
        engine: &dyn PacketEngine,
    ) -> Result<Arc<IceEndpoint>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Arc<PacketStream>>,
    {
        let spec = normalize_spec(peer_guid);
        let stream = self.acquire(&spec, gather).await;

        engine.connect(stream).await?;

        let endpoint = IceEndpoint::new(Side::Active, spec);
        endpoint.start();
        self.endpoints.lock().push(endpoint.clone());
        self.completed.fetch_add(1, Ordering::AcqRel);

        info!("ICE endpoint connected: spec={}", endpoint.connect_spec);
        Ok(endpoint)
    }

    pub fn disconnect(&self, endpoint: &Arc<IceEndpoint>) {
        endpoint.request_stop();
    }

    pub fn next_guid(&self) -> u32 {
        self.guid_counter.fetch_add(1, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_stream::PacketStream;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use tokio::net::UdpSocket;

    async fn make_stream() -> Arc<PacketStream> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        Arc::new(PacketStream::new(socket, "127.0.0.1:1".parse().unwrap(), None, 1500))
    }

    #[tokio::test]
    async fn concurrent_acquire_shares_one_gather_and_bumps_refcount() {
        let transport = Arc::new(IceTransport::new(None));
        let gather_calls = Arc::new(StdAtomicUsize::new(0));

        let t1 = transport.clone();
        let calls1 = gather_calls.clone();
        let a = tokio::spawn(async move {
            t1.acquire("ice:guid=X", || async move {
                calls1.fetch_add(1, Ordering::AcqRel);
                make_stream().await
            })
            .await
        });

        let t2 = transport.clone();
        let calls2 = gather_calls.clone();
        let b = tokio::spawn(async move {
            t2.acquire("ice:guid=X", || async move {
                calls2.fetch_add(1, Ordering::AcqRel);
                make_stream().await
            })
            .await
        });

        let (_s1, _s2) = tokio::join!(a, b);

        assert_eq!(transport.reference_count("ice:guid=X"), 2);

        transport.release("ice:guid=X");
        transport.release("ice:guid=X");
        assert_eq!(transport.reference_count("ice:guid=X"), 0);
    }

    #[test]
    fn admission_control_caps_incomplete_connections() {
        let transport = IceTransport::new(None);
        for _ in 0..DEFAULT_MAX_INCOMPLETE {
            assert!(transport.try_admit_incoming());
        }
        assert!(!transport.try_admit_incoming());
    }

    #[test]
    fn stop_listen_on_unknown_spec_is_a_no_op() {
        let transport = IceTransport::new(None);
        transport.stop_listen("tcp:addr=127.0.0.1,port=9000");
        assert!(!transport.is_listening("tcp:addr=127.0.0.1,port=9000"));
    }
}
