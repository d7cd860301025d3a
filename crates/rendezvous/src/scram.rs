//! SCRAM-SHA-1 client authentication (RFC 5802), the mechanism named by
//! spec.md §4.7 for the rendezvous client-login handshake. Grounded on
//! `stun/src/util.rs`'s `hmac_sha1` for the crate pairing (`hmac` +
//! `sha1::Sha1`); the message-composition logic itself has no teacher
//! analogue since the teacher never authenticates as a SCRAM client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as base64_engine;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug)]
pub enum ScramError {
    MalformedServerFirst,
    MalformedServerFinal,
    NonceMismatch,
    ServerSignatureMismatch,
    ServerReportedError(String),
}

impl std::fmt::Display for ScramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScramError::MalformedServerFirst => write!(f, "malformed SCRAM server-first message"),
            ScramError::MalformedServerFinal => write!(f, "malformed SCRAM server-final message"),
            ScramError::NonceMismatch => write!(f, "server nonce does not extend the client nonce"),
            ScramError::ServerSignatureMismatch => write!(f, "server signature verification failed"),
            ScramError::ServerReportedError(reason) => write!(f, "SCRAM error from server: {reason}"),
        }
    }
}

impl std::error::Error for ScramError {}

/// Drives the client half of a single SCRAM-SHA-1 exchange: client-first,
/// then (after the server's challenge) client-final plus the expected
/// server signature to verify against the server-final message.
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    auth_message: Option<String>,
    salted_password: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(username: &str, password: &str, client_nonce: String) -> Self {
        let client_first_bare = format!("n={},r={}", saslprep_escape(username), client_nonce);
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce,
            client_first_bare,
            auth_message: None,
            salted_password: None,
        }
    }

    /// `n,,n=<user>,r=<nonce>` — the GS2 header plus the bare first message.
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Consumes the server's `r=<nonce>,s=<salt>,i=<iterations>` challenge
    /// and returns the client-final message carrying the computed proof.
    pub fn handle_server_first(
        &mut self,
        server_first: &str,
    ) -> Result<String, ScramError> {
        let mut nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;

        for field in server_first.split(',') {
            let mut parts = field.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some("r"), Some(v)) => nonce = Some(v.to_string()),
                (Some("s"), Some(v)) => salt_b64 = Some(v.to_string()),
                (Some("i"), Some(v)) => iterations = v.parse::<u32>().ok(),
                _ => {}
            }
        }

        let (nonce, salt_b64, iterations) = match (nonce, salt_b64, iterations) {
            (Some(n), Some(s), Some(i)) => (n, s, i),
            _ => return Err(ScramError::MalformedServerFirst),
        };

        if !nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceMismatch);
        }

        let salt = base64_engine
            .decode(salt_b64.as_bytes())
            .map_err(|_| ScramError::MalformedServerFirst)?;

        let salted_password = hi(self.password.as_bytes(), &salt, iterations);

        let channel_binding = base64_engine.encode(b"n,,");
        let client_final_without_proof = format!("c={channel_binding},r={nonce}");

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha1::digest(&client_key);
        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let client_proof = xor(&client_key, &client_signature);

        self.auth_message = Some(auth_message);
        self.salted_password = Some(salted_password);

        Ok(format!(
            "{client_final_without_proof},p={}",
            base64_engine.encode(client_proof)
        ))
    }

    /// Verifies the server's `v=<signature>` field in the final response
    /// against the expected signature computed from the stored auth message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), ScramError> {
        if let Some(rest) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerReportedError(rest.to_string()));
        }

        let signature_b64 = server_final
            .strip_prefix("v=")
            .ok_or(ScramError::MalformedServerFinal)?;

        let (Some(auth_message), Some(salted_password)) =
            (&self.auth_message, &self.salted_password)
        else {
            return Err(ScramError::MalformedServerFinal);
        };

        let server_key = hmac(salted_password, b"Server Key");
        let expected = hmac(&server_key, auth_message.as_bytes());
        let expected_b64 = base64_engine.encode(expected);

        if expected_b64 == signature_b64 {
            Ok(())
        } else {
            Err(ScramError::ServerSignatureMismatch)
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

fn hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 5802 `Hi(password, salt, iterations)`: PBKDF2 with a single-block
/// HMAC-SHA1 pseudorandom function.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut salt_block = salt.to_vec();
    salt_block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac(password, &salt_block);
    let mut result = u.clone();

    for _ in 1..iterations {
        u = hmac(password, &u);
        result = xor(&result, &u);
    }

    result
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Escapes `,` and `=` per RFC 5802 §5.1; this daemon's usernames never
/// need full SASLprep normalization beyond that.
fn saslprep_escape(value: &str) -> String {
    value.replace('=', "=3D").replace(',', "=2C")
}

pub fn generate_client_nonce() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 18] = rng.random();
    base64_engine.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_first_message_carries_gs2_header_and_nonce() {
        let client = ScramClient::new("alice", "pencil", "fyko+d2lbbFgONRv9qkxdawL".to_string());
        assert_eq!(
            client.client_first_message(),
            "n,,n=alice,r=fyko+d2lbbFgONRv9qkxdawL"
        );
    }

    #[test]
    fn rejects_server_nonce_not_extending_the_client_nonce() {
        let mut client = ScramClient::new("alice", "pencil", "client-nonce".to_string());
        let result = client.handle_server_first("r=unrelated,s=c2FsdA==,i=4096");
        assert!(matches!(result, Err(ScramError::NonceMismatch)));
    }

    #[test]
    fn full_exchange_round_trips_and_verifies_server_signature() {
        let client_nonce = "client-nonce".to_string();
        let mut client = ScramClient::new("alice", "pencil", client_nonce.clone());

        let salt = b"saltsalt";
        let iterations = 4096u32;
        let server_nonce = format!("{client_nonce}server-part");
        let server_first = format!(
            "r={server_nonce},s={},i={iterations}",
            base64_engine.encode(salt)
        );

        let client_final = client.handle_server_first(&server_first).unwrap();
        assert!(client_final.contains("p="));

        let salted_password = hi(b"pencil", salt, iterations);
        let server_key = hmac(&salted_password, b"Server Key");
        let channel_binding = base64_engine.encode(b"n,,");
        let client_final_without_proof = format!("c={channel_binding},r={server_nonce}");
        let auth_message = format!(
            "{},{},{}",
            client.client_first_bare, server_first, client_final_without_proof
        );
        let signature = hmac(&server_key, auth_message.as_bytes());
        let server_final = format!("v={}", base64_engine.encode(signature));

        assert!(client.verify_server_final(&server_final).is_ok());
    }

    #[test]
    fn server_reported_error_is_surfaced() {
        let mut client = ScramClient::new("alice", "pencil", "n".to_string());
        let _ = client.handle_server_first("r=nserver,s=c2FsdA==,i=1");
        let result = client.verify_server_final("e=UNKNOWN_USER");
        assert!(matches!(result, Err(ScramError::ServerReportedError(_))));
    }
}
