//! SCRAM-SHA-256 client
//!
//! Implements the client side of SCRAM-SHA-256 (RFC 5802, RFC 7677) as used by
//! PostgreSQL SASL authentication, including `tls-server-end-point` channel
//! binding for `SCRAM-SHA-256-PLUS`.

use crate::protocol::postgres::constants::sasl;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LENGTH: usize = 24;

/// SCRAM authentication error types
#[derive(Debug, Clone)]
pub enum ScramError {
    /// Server signature did not verify
    InvalidServerProof(String),
    /// Server message could not be parsed
    InvalidServerMessage(String),
    /// Server reported an error in its final message (`e=`)
    ServerError(String),
    /// Base64 decoding error
    Base64Error(String),
    /// Key derivation failed
    KeyDerivation(String),
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramError::InvalidServerProof(msg) => write!(f, "invalid server proof: {}", msg),
            ScramError::InvalidServerMessage(msg) => write!(f, "invalid server message: {}", msg),
            ScramError::ServerError(msg) => write!(f, "server error: {}", msg),
            ScramError::Base64Error(msg) => write!(f, "Base64 error: {}", msg),
            ScramError::KeyDerivation(msg) => write!(f, "key derivation failed: {}", msg),
        }
    }
}

impl std::error::Error for ScramError {}

impl From<ScramError> for crate::Error {
    fn from(err: ScramError) -> Self {
        match err {
            ScramError::ServerError(msg) => crate::Error::CredentialRejected(msg),
            other => crate::Error::Protocol(other.to_string()),
        }
    }
}

/// Channel binding choice, which drives the GS2 header
#[derive(Clone, Debug)]
pub enum ChannelBinding {
    /// Client does not support channel binding (`n`)
    Unsupported,
    /// Client supports it but the server did not offer the -PLUS mechanism (`y`)
    NotAdvertised,
    /// `tls-server-end-point` with the SHA-256 of the server certificate
    TlsServerEndPoint(Vec<u8>),
}

impl ChannelBinding {
    fn gs2_header(&self) -> &'static str {
        match self {
            ChannelBinding::Unsupported => "n,,",
            ChannelBinding::NotAdvertised => "y,,",
            ChannelBinding::TlsServerEndPoint(_) => "p=tls-server-end-point,,",
        }
    }

    fn cbind_input(&self) -> Vec<u8> {
        let mut buf = self.gs2_header().as_bytes().to_vec();
        if let ChannelBinding::TlsServerEndPoint(data) = self {
            buf.extend_from_slice(data);
        }
        buf
    }
}

/// State kept between the client-final and server-final messages
#[derive(Clone)]
pub struct ScramState {
    auth_message: Vec<u8>,
    server_key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ScramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramState")
            .field("auth_message", &String::from_utf8_lossy(&self.auth_message))
            .field("server_key", &"<redacted>")
            .finish()
    }
}

/// SCRAM-SHA-256 client
pub struct ScramClient {
    username: String,
    password: Zeroizing<Vec<u8>>,
    nonce: String,
    channel_binding: ChannelBinding,
}

impl ScramClient {
    /// Create a client with a fresh random nonce
    pub fn new(username: &str, password: &[u8], channel_binding: ChannelBinding) -> Self {
        let mut rng = rand::thread_rng();
        let nonce_bytes: Vec<u8> = (0..NONCE_LENGTH).map(|_| rng.gen()).collect();
        Self::with_nonce(username, password, channel_binding, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(
        username: &str,
        password: &[u8],
        channel_binding: ChannelBinding,
        nonce: String,
    ) -> Self {
        Self {
            username: username.to_string(),
            password: Zeroizing::new(password.to_vec()),
            nonce,
            channel_binding,
        }
    }

    /// SASL mechanism name matching the channel binding choice
    pub fn mechanism(&self) -> &'static str {
        match self.channel_binding {
            ChannelBinding::TlsServerEndPoint(_) => sasl::SCRAM_SHA_256_PLUS,
            _ => sasl::SCRAM_SHA_256,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", escape_username(&self.username), self.nonce)
    }

    /// client-first-message: GS2 header followed by `n=<user>,r=<nonce>`
    pub fn client_first(&self) -> String {
        format!("{}{}", self.channel_binding.gs2_header(), self.client_first_bare())
    }

    /// Process server-first-message and build client-final-message
    pub fn client_final(&self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        let (server_nonce, salt, iterations) = parse_server_first(server_first)?;

        if !server_nonce.starts_with(&self.nonce) {
            return Err(ScramError::InvalidServerMessage(
                "server nonce doesn't contain client nonce".to_string(),
            ));
        }

        let salt_bytes = BASE64
            .decode(&salt)
            .map_err(|_| ScramError::Base64Error("invalid salt encoding".to_string()))?;
        let iterations = iterations
            .parse::<u32>()
            .map_err(|_| ScramError::InvalidServerMessage("invalid iteration count".to_string()))?;

        let channel_binding = BASE64.encode(self.channel_binding.cbind_input());
        let client_final_without_proof = format!("c={},r={}", channel_binding, server_nonce);

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            client_final_without_proof
        );

        let salted_password = salted_password(&self.password, &salt_bytes, iterations)?;

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);
        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;

        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = Zeroizing::new(hmac(&salted_password, b"Server Key")?);

        let client_final = format!("{},p={}", client_final_without_proof, BASE64.encode(proof));

        Ok((
            client_final,
            ScramState {
                auth_message: auth_message.into_bytes(),
                server_key,
            },
        ))
    }

    /// Verify server-final-message (`v=<signature>` or `e=<error>`)
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerError(error.to_string()));
        }

        let encoded = server_final
            .split(',')
            .next()
            .and_then(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerMessage("missing 'v=' prefix".to_string()))?;

        let server_signature = BASE64.decode(encoded).map_err(|_| {
            ScramError::Base64Error("invalid server signature encoding".to_string())
        })?;

        let expected = hmac(&state.server_key, &state.auth_message)?;

        if constant_time_compare(&server_signature, &expected) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof(
                "server signature verification failed".to_string(),
            ))
        }
    }
}

/// Parse server-first-message: `r=<nonce>,s=<salt>,i=<iterations>`
pub fn parse_server_first(msg: &str) -> Result<(String, String, String), ScramError> {
    let mut nonce = String::new();
    let mut salt = String::new();
    let mut iterations = String::new();

    for part in msg.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            nonce = value.to_string();
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = value.to_string();
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = value.to_string();
        } else if part.starts_with("m=") {
            return Err(ScramError::InvalidServerMessage(
                "unsupported mandatory extension".to_string(),
            ));
        }
    }

    if nonce.is_empty() || salt.is_empty() || iterations.is_empty() {
        return Err(ScramError::InvalidServerMessage(
            "missing required fields in server first message".to_string(),
        ));
    }

    Ok((nonce, salt, iterations))
}

/// `,` and `=` must be escaped in the SCRAM username
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn salted_password(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<Vec<u8>>, ScramError> {
    let mut out = Zeroizing::new(vec![0u8; 32]);
    pbkdf2::<HmacSha256>(password, salt, iterations, &mut out)
        .map_err(|e| ScramError::KeyDerivation(e.to_string()))?;
    Ok(out)
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ScramError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ScramError::KeyDerivation(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
