//! Component B -- Inverter Auth Client.
//!
//! Implements the challenge/response handshake against the inverter's HTTP
//! API (§4.5): PBKDF2-HMAC-SHA256 key derivation, an HMAC-SHA256 proof, and
//! an AES-256-GCM-wrapped session token. The wire format here is bit-exact
//! with the vendor's expectation -- see DESIGN.md for why the server nonce
//! is repeated in the auth message.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aes_gcm::aead::{generic_array::typenum::U16, Aead, KeyInit, Payload};
use aes_gcm::{aes::Aes256, AesGcm, Nonce};
use base64::{engine::general_purpose::STANDARD as b64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

type HmacSha256 = Hmac<Sha256>;
/// The vendor handshake uses a 16-byte GCM IV, not the crate default of 12.
type SessionCipher = AesGcm<Aes256, U16>;

#[derive(Debug, Error)]
pub enum InverterAuthError {
    #[error("request to inverter failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("handshake step {0} returned an unexpected response")]
    UnexpectedResponse(&'static str),
    #[error("session file could not be read or written: {0}")]
    SessionIo(#[from] std::io::Error),
    #[error("not authenticated")]
    NotAuthenticated,
}

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    username: &'a str,
    nonce: String,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    nonce: String,
    #[serde(rename = "transactionId")]
    transaction_id: String,
    rounds: u32,
    salt: String,
}

#[derive(Debug, Serialize)]
struct FinishRequest<'a> {
    #[serde(rename = "transactionId")]
    transaction_id: &'a str,
    proof: String,
}

#[derive(Debug, Deserialize)]
struct FinishResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    #[serde(rename = "transactionId")]
    transaction_id: &'a str,
    iv: String,
    tag: String,
    payload: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    session_id: String,
}

/// A live (or not-yet-established) session against one inverter.
pub struct InverterAuthClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    installer_password: String,
    master_password: String,
    session_file: PathBuf,
    session_id: RwLock<Option<String>>,
}

impl InverterAuthClient {
    pub fn new(
        base_url: String,
        username: String,
        installer_password: String,
        master_password: String,
        session_file: PathBuf,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            client,
            base_url,
            username,
            installer_password,
            master_password,
            session_file,
            session_id: RwLock::new(None),
        }
    }

    /// Bare connectivity probe: a `start` POST without completing the
    /// handshake, used by `test_connection` (§11.3).
    pub async fn test_connection(&self) -> Result<bool, InverterAuthError> {
        let client_nonce = random_nonce();
        let url = format!("{}/auth/start", self.base_url);
        let resp = self
            .client
            .post(url)
            .json(&StartRequest {
                username: &self.username,
                nonce: client_nonce,
            })
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    /// Restore a cached session id from disk, if present. A missing or
    /// corrupt file is not fatal -- the caller simply re-authenticates.
    pub async fn load_cached_session(&self) -> Option<String> {
        let contents = tokio::fs::read_to_string(&self.session_file).await.ok()?;
        let persisted: PersistedSession = serde_json::from_str(&contents).ok()?;
        *self.session_id.write().await = Some(persisted.session_id.clone());
        Some(persisted.session_id)
    }

    async fn persist_session(&self, session_id: &str) -> Result<(), InverterAuthError> {
        if let Some(parent) = Path::new(&self.session_file).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string(&PersistedSession {
            session_id: session_id.to_string(),
        })
        .expect("serialization of a two-field struct cannot fail");
        tokio::fs::write(&self.session_file, body).await?;
        Ok(())
    }

    /// Run the full five-step handshake (§4.5) and cache the resulting session.
    pub async fn login(&self) -> Result<(), InverterAuthError> {
        let client_nonce = random_nonce();

        // Step 1: start
        let start: StartResponse = self
            .client
            .post(format!("{}/auth/start", self.base_url))
            .json(&StartRequest {
                username: &self.username,
                nonce: client_nonce.clone(),
            })
            .send()
            .await?
            .error_for_status()
            .map_err(|_| InverterAuthError::UnexpectedResponse("start"))?
            .json()
            .await?;

        // Step 2: derive
        let salt = b64
            .decode(&start.salt)
            .map_err(|_| InverterAuthError::UnexpectedResponse("derive"))?;
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.installer_password.as_bytes(),
            &salt,
            start.rounds,
            &mut key,
        );
        let client_key = hmac_sha256(&key, b"Client Key");
        let server_key = hmac_sha256(&key, b"Server Key");
        let _ = server_key; // derived per spec, not used further by this client
        let stored_key = Sha256::digest(client_key);

        // Step 3: auth message (server nonce deliberately repeated, see DESIGN.md)
        let auth_message = format!(
            "n={},r={},r={},s={},i={},c=biws,r={}",
            self.username, client_nonce, start.nonce, start.salt, start.rounds, start.nonce
        );

        // Step 4: finish
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        let finish: FinishResponse = self
            .client
            .post(format!("{}/auth/finish", self.base_url))
            .json(&FinishRequest {
                transaction_id: &start.transaction_id,
                proof: b64.encode(proof),
            })
            .send()
            .await?
            .error_for_status()
            .map_err(|_| InverterAuthError::UnexpectedResponse("finish"))?
            .json()
            .await?;

        // Step 5: session
        let mut protocol_key_mac =
            HmacSha256::new_from_slice(&stored_key).expect("HMAC accepts any key length");
        protocol_key_mac.update(b"Session Key");
        protocol_key_mac.update(auth_message.as_bytes());
        protocol_key_mac.update(&client_key);
        let protocol_key = protocol_key_mac.finalize().into_bytes();

        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);
        let cipher = SessionCipher::new_from_slice(&protocol_key)
            .map_err(|_| InverterAuthError::UnexpectedResponse("session"))?;
        let mut plaintext = finish.token.clone().into_bytes();
        plaintext.push(b':');
        plaintext.extend_from_slice(self.master_password.as_bytes());
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| InverterAuthError::UnexpectedResponse("session"))?;
        // aes-gcm appends the 16-byte tag to the ciphertext; split them back
        // out because the wire format sends them as separate base64 fields.
        let tag_start = ciphertext.len() - 16;
        let (payload, tag) = ciphertext.split_at(tag_start);

        let session: SessionResponse = self
            .client
            .post(format!("{}/auth/create_session", self.base_url))
            .json(&SessionRequest {
                transaction_id: &start.transaction_id,
                iv: b64.encode(iv),
                tag: b64.encode(tag),
                payload: b64.encode(payload),
            })
            .send()
            .await?
            .error_for_status()
            .map_err(|_| InverterAuthError::UnexpectedResponse("create_session"))?
            .json()
            .await?;

        *self.session_id.write().await = Some(session.session_id.clone());
        self.persist_session(&session.session_id).await?;
        Ok(())
    }

    pub async fn logout(&self) {
        *self.session_id.write().await = None;
    }

    async fn session_header(&self) -> Result<String, InverterAuthError> {
        self.session_id
            .read()
            .await
            .clone()
            .map(|id| format!("Session {id}"))
            .ok_or(InverterAuthError::NotAuthenticated)
    }

    /// Verify the current session is still accepted by the inverter.
    pub async fn verify(&self) -> Result<bool, InverterAuthError> {
        let header = self.session_header().await?;
        let resp = self
            .client
            .get(format!("{}/auth/me", self.base_url))
            .header("Authorization", header)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body.get("authenticated").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Toggle the inverter between internal and external-control mode
    /// (§4.3's "external-control toggle").
    pub async fn set_external_control(&self, enabled: bool) -> Result<(), InverterAuthError> {
        let header = self.session_header().await?;
        let value = if enabled { "2" } else { "0" };
        let body = serde_json::json!([{
            "moduleid": "devices:local",
            "settings": [{ "id": "Battery:ExternControl", "value": value }],
        }]);
        self.client
            .put(format!("{}/settings", self.base_url))
            .header("Authorization", header)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(|_| InverterAuthError::UnexpectedResponse("settings"))?;
        Ok(())
    }
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 9];
    rand::thread_rng().fill_bytes(&mut bytes);
    b64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_message_repeats_server_nonce() {
        let username = "user1";
        let client_nonce = "cn";
        let server_nonce = "sn";
        let salt = "c2FsdA==";
        let rounds = 4096;
        let auth_message = format!(
            "n={username},r={client_nonce},r={server_nonce},s={salt},i={rounds},c=biws,r={server_nonce}"
        );
        assert_eq!(
            auth_message,
            "n=user1,r=cn,r=sn,s=c2FsdA==,i=4096,c=biws,r=sn"
        );
        assert_eq!(auth_message.matches("r=sn").count(), 2);
    }

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_sha256(b"key", b"message");
        let b = hmac_sha256(b"key", b"message");
        assert_eq!(a, b);
        let c = hmac_sha256(b"key", b"different");
        assert_ne!(a, c);
    }

    #[test]
    fn random_nonce_is_base64_and_varies() {
        let a = random_nonce();
        let b = random_nonce();
        assert!(b64.decode(&a).is_ok());
        assert_ne!(a, b);
    }
}
