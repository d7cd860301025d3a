//! Discovery manager: a single-threaded event loop over the rendezvous
//! connection's outbound queue and inbound long-poll events. Grounded on
//! `turn-server/src/server.rs`'s tokio task-per-concern shape, generalized
//! from "one task per socket" to "one task serializing queue mutations with
//! loop iteration" per spec.md §5's stated discipline.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::Error;
use crate::connection::{RendezvousConfig, RendezvousConnection};
use crate::messages::{CandidateWire, InboundEvent, ProximityEntry};

/// Outbound work items, queued in submission order and drained one at a
/// time by the main loop.
enum Outbound {
    Advertise(Vec<String>),
    Search(Vec<String>),
    Proximity(Vec<ProximityEntry>),
    Candidates {
        dest: String,
        candidates: Vec<CandidateWire>,
        add_stun: bool,
    },
}

pub trait DiscoveryListener: Send + Sync {
    fn on_search_match(&self, matching_name: &str, peer_id: &str, guid: &str);
    fn on_match_revoked(&self, peer_id: &str);
    fn on_address_candidates(&self, peer_id: &str, candidates: &[CandidateWire]);
    fn on_start_ice_checks(&self, peer_id: &str);
    fn on_auth_failed(&self, reason: &str);
}

struct SharedState {
    outbound: Mutex<VecDeque<Outbound>>,
    wake: Notify,
    advertised_names: Mutex<Vec<String>>,
    searched_names: Mutex<Vec<String>>,
    auth_failed: Mutex<bool>,
}

/// Handle used by the rest of the daemon to enqueue work; the actual I/O
/// happens on the manager's background task.
#[derive(Clone)]
pub struct DiscoveryManagerHandle {
    shared: Arc<SharedState>,
    stop: Arc<Notify>,
}

impl DiscoveryManagerHandle {
    pub fn advertise(&self, names: Vec<String>) {
        *self.shared.advertised_names.lock() = names.clone();
        self.enqueue(Outbound::Advertise(names));
    }

    pub fn search(&self, names: Vec<String>) {
        *self.shared.searched_names.lock() = names.clone();
        self.enqueue(Outbound::Search(names));
    }

    pub fn proximity(&self, entries: Vec<ProximityEntry>) {
        self.enqueue(Outbound::Proximity(entries));
    }

    pub fn send_candidates(&self, dest: String, candidates: Vec<CandidateWire>, add_stun: bool) {
        self.enqueue(Outbound::Candidates { dest, candidates, add_stun });
    }

    pub fn auth_failed(&self) -> bool {
        *self.shared.auth_failed.lock()
    }

    /// Idempotent: a second `stop()` is a harmless re-notify.
    pub fn stop(&self) {
        self.stop.notify_waiters();
    }

    fn enqueue(&self, item: Outbound) {
        self.shared.outbound.lock().push_back(item);
        self.shared.wake.notify_one();
    }
}

pub struct DiscoveryManager {
    connection: Arc<RendezvousConnection>,
    shared: Arc<SharedState>,
    listener: Arc<dyn DiscoveryListener>,
    stop: Arc<Notify>,
    username: String,
    password: String,
}

impl DiscoveryManager {
    pub fn new(
        config: RendezvousConfig,
        username: String,
        password: String,
        listener: Arc<dyn DiscoveryListener>,
    ) -> (Self, DiscoveryManagerHandle) {
        let connection = RendezvousConnection::new(config);
        let shared = Arc::new(SharedState {
            outbound: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            advertised_names: Mutex::new(Vec::new()),
            searched_names: Mutex::new(Vec::new()),
            auth_failed: Mutex::new(false),
        });
        let stop = Arc::new(Notify::new());

        let handle = DiscoveryManagerHandle {
            shared: shared.clone(),
            stop: stop.clone(),
        };

        let manager = Self {
            connection,
            shared,
            listener,
            stop,
            username,
            password,
        };

        (manager, handle)
    }

    /// Runs the event loop until `stop()` is called or login fails in a way
    /// that is not recoverable without an advertise/search set change.
    pub async fn run(mut self) {
        if let Err(e) = self.login_and_resync().await {
            warn!("rendezvous login failed: {e}");
            *self.shared.auth_failed.lock() = true;
            self.listener.on_auth_failed(&e.to_string());
            return;
        }

        let mut poll_task = self.spawn_long_poll();

        loop {
            let timeout = self.connection.next_keepalive_deadline();

            tokio::select! {
                _ = self.stop.notified() => {
                    info!("discovery manager stopping");
                    poll_task.abort();
                    return;
                }
                _ = self.shared.wake.notified() => {
                    self.drain_outbound().await;
                }
                poll_result = &mut poll_task => {
                    match poll_result {
                        Ok(Ok(response)) => {
                            for event in response.events {
                                self.handle_inbound(event).await;
                            }
                            poll_task = self.spawn_long_poll();
                        }
                        Ok(Err(e)) => {
                            warn!("long-poll connection reset: {e}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            poll_task = self.spawn_long_poll();
                        }
                        Err(_) => return,
                    }
                }
                _ = tokio::time::sleep(timeout) => {
                    if let Err(e) = self.connection.proximity(Vec::new()).await {
                        debug!("keep-alive send failed: {e}");
                    }
                }
            }
        }
    }

    /// Resends Advertisement, Search and Proximity in that order on a fresh
    /// persistent connection, per spec.md §4.7's idempotent re-sync rule.
    async fn login_and_resync(&self) -> Result<(), Error> {
        self.connection.client_login(&self.username, &self.password).await?;

        let names = self.shared.advertised_names.lock().clone();
        if !names.is_empty() {
            self.connection.advertise(names, self.connection.tokens.current()).await?;
        }

        let searched = self.shared.searched_names.lock().clone();
        if !searched.is_empty() {
            self.connection.search(searched).await?;
        }

        self.connection.proximity(Vec::new()).await?;
        Ok(())
    }

    fn spawn_long_poll(&self) -> tokio::task::JoinHandle<Result<crate::messages::LongPollResponse, Error>> {
        let connection = self.connection.clone();
        tokio::spawn(async move { connection.poll_messages().await })
    }

    async fn drain_outbound(&self) {
        loop {
            let item = self.shared.outbound.lock().pop_front();
            let Some(item) = item else { break };

            let result = match item {
                Outbound::Advertise(names) => {
                    self.connection.advertise(names, self.connection.tokens.current()).await
                }
                Outbound::Search(names) => self.connection.search(names).await,
                Outbound::Proximity(entries) => self.connection.proximity(entries).await,
                Outbound::Candidates { dest, candidates, add_stun } => {
                    self.connection.send_candidates(&dest, candidates, add_stun).await
                }
            };

            if let Err(e) = result {
                warn!("rendezvous outbound send failed: {e}");
            }
        }
    }

    async fn handle_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::SearchMatch { matching_name, peer_id, guid } => {
                self.listener.on_search_match(&matching_name, &peer_id, &guid);
            }
            InboundEvent::MatchRevoked { peer_id } => {
                self.listener.on_match_revoked(&peer_id);
            }
            InboundEvent::AddressCandidates { peer_id, candidates } => {
                self.listener.on_address_candidates(&peer_id, &candidates);
            }
            InboundEvent::StartICEChecks { peer_id } => {
                self.listener.on_start_ice_checks(&peer_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RendezvousConfig;

    struct NullListener;
    impl DiscoveryListener for NullListener {
        fn on_search_match(&self, _: &str, _: &str, _: &str) {}
        fn on_match_revoked(&self, _: &str) {}
        fn on_address_candidates(&self, _: &str, _: &[CandidateWire]) {}
        fn on_start_ice_checks(&self, _: &str) {}
        fn on_auth_failed(&self, _: &str) {}
    }

    #[test]
    fn handle_enqueues_without_requiring_the_manager_to_be_running() {
        let (_manager, handle) = DiscoveryManager::new(
            RendezvousConfig {
                server: "rdv.example.com".to_string(),
                allow_http: false,
                daemon_id: "daemon-1".to_string(),
            },
            "user".to_string(),
            "pass".to_string(),
            Arc::new(NullListener),
        );

        handle.advertise(vec!["com.example.A".to_string()]);
        assert_eq!(handle.shared.outbound.lock().len(), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let (_manager, handle) = DiscoveryManager::new(
            RendezvousConfig {
                server: "rdv.example.com".to_string(),
                allow_http: false,
                daemon_id: "daemon-1".to_string(),
            },
            "user".to_string(),
            "pass".to_string(),
            Arc::new(NullListener),
        );

        handle.stop();
        handle.stop();
    }
}
