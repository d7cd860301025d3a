//! Rendezvous server connection: the on-demand and persistent HTTPS clients,
//! and the TURN token near-expiry cache. Grounded on `turn-server`'s
//! `Hooks` (`reqwest::Client` held alongside a config handle, one async
//! method per remote call) and on `StaticCredentials`'s elapsed-lifetime
//! check for the token-expiry rule.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::Error;
use crate::messages::*;

#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    pub server: String,
    /// Debug-only opt-in to plaintext HTTP; HTTPS otherwise (§4.7).
    pub allow_http: bool,
    pub daemon_id: String,
}

impl RendezvousConfig {
    fn base_url(&self) -> String {
        let scheme = if self.allow_http { "http" } else { "https" };
        format!("{scheme}://{}/rdv/v1", self.server)
    }
}

/// One `(acct, pwd, recvTime, expiryTime)` STUN-info record plus the
/// 60-second refresh margin named in spec.md §4.7.
pub struct TurnTokenCache {
    record: Mutex<Option<(StunInfo, Instant, Duration)>>,
}

const REFRESH_MARGIN: Duration = Duration::from_secs(60);

impl Default for TurnTokenCache {
    fn default() -> Self {
        Self {
            record: Mutex::new(None),
        }
    }
}

impl TurnTokenCache {
    pub fn store(&self, info: StunInfo, expiry_secs: u64) {
        *self.record.lock() = Some((info, Instant::now(), Duration::from_secs(expiry_secs)));
    }

    /// `true` when the cached record is still usable without a refresh:
    /// `now - recvTime < expiryTime - 60s`.
    pub fn is_fresh(&self, now: Instant) -> bool {
        match &*self.record.lock() {
            Some((_, recv_time, expiry)) => {
                let Some(margin) = expiry.checked_sub(REFRESH_MARGIN) else {
                    return false;
                };
                now.duration_since(*recv_time) < margin
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<StunInfo> {
        self.record.lock().as_ref().map(|(info, ..)| info.clone())
    }
}

/// A single HTTPS client role: persistent (long-poll) or on-demand
/// (everything else), each with its own keep-alive timestamp.
struct Channel {
    client: reqwest::Client,
    last_send: Mutex<Instant>,
}

impl Channel {
    fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            last_send: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_send.lock() = Instant::now();
    }

    fn residual(&self, keepalive: Duration) -> Duration {
        keepalive.saturating_sub(self.last_send.lock().elapsed())
    }
}

pub struct RendezvousConnection {
    config: RendezvousConfig,
    on_demand: Channel,
    persistent: Channel,
    peer_id: Mutex<Option<String>>,
    server_keepalive: Mutex<Duration>,
    pub tokens: TurnTokenCache,
}

impl RendezvousConnection {
    pub fn new(config: RendezvousConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            on_demand: Channel::new(),
            persistent: Channel::new(),
            peer_id: Mutex::new(None),
            server_keepalive: Mutex::new(Duration::from_secs(30)),
            tokens: TurnTokenCache::default(),
        })
    }

    pub fn peer_id(&self) -> Option<String> {
        self.peer_id.lock().clone()
    }

    /// `T_KEEP_ALIVE = max(server_keepalive, 30s) * 2`.
    pub fn keepalive_interval(&self) -> Duration {
        (*self.server_keepalive.lock()).max(Duration::from_secs(30)) * 2
    }

    /// The minimum residual wait across both channels, used by the
    /// discovery manager's main loop as its next timeout.
    pub fn next_keepalive_deadline(&self) -> Duration {
        let interval = self.keepalive_interval();
        self.on_demand.residual(interval).min(self.persistent.residual(interval))
    }

    pub async fn client_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(), Error> {
        use crate::scram::ScramClient;

        let client_nonce = crate::scram::generate_client_nonce();
        let mut scram = ScramClient::new(username, password, client_nonce);

        let first = ClientLoginRequest {
            first_message: true,
            daemon_id: self.config.daemon_id.clone(),
            mechanism: SCRAM_SHA_1_MECHANISM,
            message: scram.client_first_message(),
        };
        let first_response: ClientLoginResponse = self.post("/login", &first).await?;

        if let Some(error) = &first_response.error {
            return Err(auth_error(error));
        }
        let server_first = first_response
            .message
            .ok_or_else(|| Error::Protocol("missing server-first SCRAM message".to_string()))?;

        let client_final = scram
            .handle_server_first(&server_first)
            .map_err(|e| Error::Protocol(e.to_string()))?;

        let final_request = ClientLoginRequest {
            first_message: false,
            daemon_id: self.config.daemon_id.clone(),
            mechanism: SCRAM_SHA_1_MECHANISM,
            message: client_final,
        };
        let final_response: ClientLoginResponse = self.post("/login", &final_request).await?;

        if let Some(error) = &final_response.error {
            return Err(auth_error(error));
        }

        if let Some(server_final) = &final_response.message {
            scram
                .verify_server_final(server_final)
                .map_err(|e| Error::Protocol(e.to_string()))?;
        }

        let peer_id = final_response
            .peer_id
            .ok_or_else(|| Error::Protocol("login succeeded with no peerID".to_string()))?;

        if let Some(t_keepalive) = final_response.config_data.and_then(|c| c.t_keepalive) {
            *self.server_keepalive.lock() = Duration::from_secs(t_keepalive);
        }

        info!("rendezvous login succeeded: peerID={peer_id}");
        *self.peer_id.lock() = Some(peer_id);
        Ok(())
    }

    pub async fn daemon_register(&self) -> Result<(), Error> {
        let peer_id = self.require_peer_id()?;
        let body = DaemonRegistrationRequest {
            daemon_id: self.config.daemon_id.clone(),
        };
        let _: serde_json::Value = self
            .post(&format!("/peer/{peer_id}/daemon-reg"), &body)
            .await?;
        Ok(())
    }

    pub async fn refresh_token(&self) -> Result<StunInfo, Error> {
        let peer_id = self.require_peer_id()?;
        let response: TokenResponse = self.get(&format!("/peer/{peer_id}/token")).await?;
        let info = StunInfo {
            acct: response.acct,
            pwd: response.pwd,
            relay_addr: None,
        };
        self.tokens.store(info.clone(), response.expiry_time);
        Ok(info)
    }

    pub async fn advertise(&self, names: Vec<String>, stun_info: Option<StunInfo>) -> Result<(), Error> {
        let peer_id = self.require_peer_id()?;
        let body = AdvertiseRequest { stun_info, names };
        self.post_ignore(&format!("/peer/{peer_id}/advertisement"), &body).await
    }

    pub async fn search(&self, names: Vec<String>) -> Result<(), Error> {
        let peer_id = self.require_peer_id()?;
        let body = SearchRequest { names };
        self.post_ignore(&format!("/peer/{peer_id}/search"), &body).await
    }

    pub async fn proximity(&self, entries: Vec<ProximityEntry>) -> Result<(), Error> {
        let peer_id = self.require_peer_id()?;
        let body = ProximityRequest { proximity: entries };
        self.post_ignore(&format!("/peer/{peer_id}/proximity"), &body).await
    }

    pub async fn send_candidates(
        &self,
        dest: &str,
        candidates: Vec<CandidateWire>,
        add_stun: bool,
    ) -> Result<(), Error> {
        let peer_id = self.require_peer_id()?;
        let suffix = if add_stun { "/addSTUN" } else { "" };
        let body = AddressCandidatesRequest { candidates, add_stun };
        self.post_ignore(&format!("/peer/{peer_id}/candidates/dest/{dest}{suffix}"), &body)
            .await
    }

    pub async fn delete_session(&self) -> Result<(), Error> {
        let peer_id = self.require_peer_id()?;
        let url = format!("{}/peer/{peer_id}", self.config.base_url());
        self.on_demand
            .client
            .delete(&url)
            .header("Host", &self.config.server)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        self.on_demand.touch();
        Ok(())
    }

    /// Long-poll GET; blocks until the server has events or its own
    /// timeout elapses. Resets the persistent channel's keep-alive clock.
    pub async fn poll_messages(&self) -> Result<LongPollResponse, Error> {
        let peer_id = self.require_peer_id()?;
        let url = format!("{}/peer/{peer_id}/messages", self.config.base_url());

        let response = self
            .persistent
            .client
            .get(&url)
            .header("Host", &self.config.server)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        self.persistent.touch();

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::Transient(format!("long-poll status {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))
    }

    fn require_peer_id(&self) -> Result<String, Error> {
        self.peer_id.lock().clone().ok_or(Error::NotAuthenticated)
    }

    async fn post<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, Error> {
        let url = format!("{}{path}", self.config.base_url());
        let response = self
            .on_demand
            .client
            .post(&url)
            .header("Host", &self.config.server)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        self.on_demand.touch();

        if response.status() != reqwest::StatusCode::OK {
            warn!("rendezvous request to {path} failed: {}", response.status());
            return Err(Error::Transient(format!("status {}", response.status())));
        }

        response.json().await.map_err(|e| Error::Protocol(e.to_string()))
    }

    async fn get<R: serde::de::DeserializeOwned>(&self, path: &str) -> Result<R, Error> {
        let url = format!("{}{path}", self.config.base_url());
        let response = self
            .on_demand
            .client
            .get(&url)
            .header("Host", &self.config.server)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        self.on_demand.touch();

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::Transient(format!("status {}", response.status())));
        }

        response.json().await.map_err(|e| Error::Protocol(e.to_string()))
    }

    /// Like `post`, but the response body is advisory only: a malformed or
    /// empty body does not fail the call, only a transport/status error does.
    async fn post_ignore<B: Serialize>(&self, path: &str, body: &B) -> Result<(), Error> {
        let _: serde_json::Value = self.post(path, body).await.or_else(|e| match e {
            Error::Protocol(_) => Ok(serde_json::Value::Null),
            other => Err(other),
        })?;
        Ok(())
    }
}

fn auth_error(error: &str) -> Error {
    match error {
        ERROR_DEACTIVATED_USER | ERROR_UNKNOWN_USER => Error::AuthFailed(error.to_string()),
        other => Error::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_interval_applies_the_30s_floor() {
        let conn = RendezvousConnection::new(RendezvousConfig {
            server: "rdv.example.com".to_string(),
            allow_http: false,
            daemon_id: "daemon-1".to_string(),
        });
        assert_eq!(conn.keepalive_interval(), Duration::from_secs(60));

        *conn.server_keepalive.lock() = Duration::from_secs(45);
        assert_eq!(conn.keepalive_interval(), Duration::from_secs(90));
    }

    #[test]
    fn token_cache_expires_within_the_60s_margin() {
        let cache = TurnTokenCache::default();
        cache.store(
            StunInfo {
                acct: "a".to_string(),
                pwd: "p".to_string(),
                relay_addr: None,
            },
            120,
        );

        assert!(cache.is_fresh(Instant::now()));
        assert!(!cache.is_fresh(Instant::now() + Duration::from_secs(61)));
    }

    #[test]
    fn token_cache_with_no_record_is_never_fresh() {
        let cache = TurnTokenCache::default();
        assert!(!cache.is_fresh(Instant::now()));
    }
}
