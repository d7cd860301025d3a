//! Wire schemas for the rendezvous HTTPS protocol (§6.2): JSON request
//! bodies and response envelopes for every URI in the message table, plus
//! the inbound event types delivered over the persistent long-poll.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ClientLoginRequest {
    #[serde(rename = "firstMessage")]
    pub first_message: bool,
    #[serde(rename = "daemonID")]
    pub daemon_id: String,
    pub mechanism: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientLoginResponse {
    pub message: Option<String>,
    #[serde(rename = "peerID")]
    pub peer_id: Option<String>,
    #[serde(rename = "peerAddr")]
    pub peer_addr: Option<String>,
    #[serde(default, rename = "daemonRegistrationRequired")]
    pub daemon_registration_required: bool,
    #[serde(default, rename = "sessionActive")]
    pub session_active: bool,
    #[serde(default, rename = "configData")]
    pub config_data: Option<ConfigData>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigData {
    #[serde(rename = "Tkeepalive")]
    pub t_keepalive: Option<u64>,
}

pub const SCRAM_SHA_1_MECHANISM: &str = "SCRAM-SHA-1";

/// Authentication error codes that suspend reconnect attempts (§4.7).
pub const ERROR_DEACTIVATED_USER: &str = "DEACTIVATED_USER";
pub const ERROR_UNKNOWN_USER: &str = "UNKNOWN_USER";

#[derive(Debug, Clone, Serialize)]
pub struct DaemonRegistrationRequest {
    #[serde(rename = "daemonID")]
    pub daemon_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub acct: String,
    pub pwd: String,
    #[serde(rename = "expiryTime")]
    pub expiry_time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvertiseRequest {
    #[serde(rename = "StunInfo")]
    pub stun_info: Option<StunInfo>,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StunInfo {
    pub acct: String,
    pub pwd: String,
    #[serde(rename = "relayAddr")]
    pub relay_addr: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProximityRequest {
    pub proximity: Vec<ProximityEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProximityEntry {
    pub bssid: String,
    pub rssi: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressCandidatesRequest {
    pub candidates: Vec<CandidateWire>,
    #[serde(rename = "addSTUN", skip_serializing_if = "is_false")]
    pub add_stun: bool,
}

fn is_false(value: &bool) -> bool {
    !value
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateWire {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
    pub port: u16,
    pub foundation: String,
    pub component: u8,
    pub priority: u32,
}

/// Inbound events delivered on the persistent long-poll connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    SearchMatch {
        #[serde(rename = "matchingName")]
        matching_name: String,
        #[serde(rename = "peerID")]
        peer_id: String,
        #[serde(rename = "guid")]
        guid: String,
    },
    MatchRevoked {
        #[serde(rename = "peerID")]
        peer_id: String,
    },
    AddressCandidates {
        #[serde(rename = "peerID")]
        peer_id: String,
        candidates: Vec<CandidateWire>,
    },
    StartICEChecks {
        #[serde(rename = "peerID")]
        peer_id: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LongPollResponse {
    #[serde(default)]
    pub events: Vec<InboundEvent>,
}
