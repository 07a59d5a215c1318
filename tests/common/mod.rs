//! Fake backends and helpers shared by the socket tests

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use credwire::connector::{DialFuture, Dialer};
use credwire::protocol::mysql::constants::capabilities::*;
use credwire::protocol::mysql::{Connection, Packet};
use credwire::protocol::postgres::{encode_backend_message, BackendMessage};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};

pub const BUFFER: usize = 64 * 1024;

/// Hands out one pre-connected in-memory backend
pub struct DuplexDialer {
    stream: Mutex<Option<DuplexStream>>,
    dialed: AtomicBool,
}

impl DuplexDialer {
    /// Dialer plus the backend's end of the socket
    pub fn pair() -> (Self, DuplexStream) {
        let (proxy_side, backend_side) = tokio::io::duplex(BUFFER);
        let dialer = Self {
            stream: Mutex::new(Some(proxy_side)),
            dialed: AtomicBool::new(false),
        };
        (dialer, backend_side)
    }

    pub fn was_dialed(&self) -> bool {
        self.dialed.load(Ordering::SeqCst)
    }
}

impl Dialer for DuplexDialer {
    type Stream = DuplexStream;

    fn dial<'a>(&'a self, _host: &'a str, _port: u16) -> DialFuture<'a, DuplexStream> {
        self.dialed.store(true, Ordering::SeqCst);
        let stream = self.stream.lock().unwrap().take();
        Box::pin(async move {
            stream.ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "dialed twice"))
        })
    }
}

// ---------------------------------------------------------------------------
// MySQL
// ---------------------------------------------------------------------------

pub const MYSQL_SALT: &[u8; 20] = b"0123456789abcdefghij";

/// HandshakeV10 payload announcing `plugin`
pub fn mysql_greeting(plugin: &str, salt: &[u8; 20], tls: bool) -> Vec<u8> {
    let mut caps = CLIENT_LONG_PASSWORD
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
    if tls {
        caps |= CLIENT_SSL;
    }

    let mut payload = vec![10];
    payload.extend_from_slice(b"8.0.36-fake\0");
    payload.extend_from_slice(&7u32.to_le_bytes());
    payload.extend_from_slice(&salt[..8]);
    payload.push(0);
    payload.extend_from_slice(&((caps & 0xFFFF) as u16).to_le_bytes());
    payload.push(0xFF);
    payload.extend_from_slice(&2u16.to_le_bytes());
    payload.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    payload.push(21);
    payload.extend_from_slice(&[0; 10]);
    payload.extend_from_slice(&salt[8..]);
    payload.push(0);
    payload.extend_from_slice(plugin.as_bytes());
    payload.push(0);
    payload
}

/// HandshakeResponse41 payload a client would send
pub fn mysql_client_response(username: &str, auth: &[u8], database: &str) -> Vec<u8> {
    let caps = CLIENT_LONG_PASSWORD
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PLUGIN_AUTH;

    let mut payload = Vec::new();
    payload.extend_from_slice(&caps.to_le_bytes());
    payload.extend_from_slice(&(16u32 << 20).to_le_bytes());
    payload.push(45);
    payload.extend_from_slice(&[0; 23]);
    payload.extend_from_slice(username.as_bytes());
    payload.push(0);
    payload.push(auth.len() as u8);
    payload.extend_from_slice(auth);
    payload.extend_from_slice(database.as_bytes());
    payload.push(0);
    payload.extend_from_slice(b"mysql_native_password\0");
    payload
}

/// Generic OK payload
pub fn mysql_ok() -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]
}

/// Write `payload` on `conn` using its sequence counter
pub async fn mysql_send<S>(conn: &mut Connection<S>, payload: &[u8])
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut packet = Packet::new(conn.sequence_id(), payload).unwrap();
    conn.write_packet(&mut packet).await.unwrap();
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// Untagged startup message as a client sends it
pub fn pg_startup(params: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0x0003_0000i32.to_be_bytes());
    for (k, v) in params {
        body.extend_from_slice(k.as_bytes());
        body.push(0);
        body.extend_from_slice(v.as_bytes());
        body.push(0);
    }
    body.push(0);

    let mut frame = ((body.len() + 4) as i32).to_be_bytes().to_vec();
    frame.extend_from_slice(&body);
    frame
}

/// SSLRequest as a client sends it
pub fn pg_ssl_request() -> Vec<u8> {
    let mut frame = 8i32.to_be_bytes().to_vec();
    frame.extend_from_slice(&80877103i32.to_be_bytes());
    frame
}

/// Read the untagged startup message the proxy sent to the backend
pub async fn pg_read_startup<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<(String, String)> {
    let len = stream.read_i32().await.unwrap() as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await.unwrap();
    assert_eq!(&body[..4], &0x0003_0000i32.to_be_bytes());

    let mut parts = body[4..]
        .split(|b| *b == 0)
        .map(|s| String::from_utf8(s.to_vec()).unwrap());
    let mut params = Vec::new();
    while let Some(key) = parts.next() {
        if key.is_empty() {
            break;
        }
        params.push((key, parts.next().unwrap()));
    }
    params
}

/// Read one tagged frontend message
pub async fn pg_read_message<S: AsyncRead + Unpin>(stream: &mut S) -> (u8, Vec<u8>) {
    let tag = stream.read_u8().await.unwrap();
    let len = stream.read_i32().await.unwrap() as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await.unwrap();
    (tag, body)
}

/// Read one tagged backend message as raw bytes (what a client sees)
pub async fn pg_read_raw<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let (tag, body) = pg_read_message(stream).await;
    let mut frame = vec![tag];
    frame.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// Send a backend message
pub async fn pg_send<S: AsyncWrite + Unpin>(stream: &mut S, msg: BackendMessage) {
    stream.write_all(&encode_backend_message(&msg)).await.unwrap();
    stream.flush().await.unwrap();
}

/// Field `field` of an ErrorResponse body
pub fn pg_error_field(body: &[u8], field: u8) -> Option<String> {
    let mut rest = body;
    while let Some((&ty, tail)) = rest.split_first() {
        if ty == 0 {
            break;
        }
        let end = tail.iter().position(|b| *b == 0)?;
        if ty == field {
            return Some(String::from_utf8_lossy(&tail[..end]).into_owned());
        }
        rest = &tail[end + 1..];
    }
    None
}

/// The bytes the client must see once the backend accepted the credential
pub const PG_AUTH_OK: [u8; 9] = [b'R', 0, 0, 0, 8, 0, 0, 0, 0];

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Server half of SCRAM-SHA-256
pub struct ScramServer {
    password: String,
    salt: Vec<u8>,
    iterations: u32,
    nonce: String,
    client_first_bare: String,
    server_first: String,
}

/// What the server saw in the client-final message
pub struct ScramOutcome {
    pub proof_valid: bool,
    pub channel_binding: Vec<u8>,
    pub server_final: String,
}

impl ScramServer {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            salt: b"credwire-test-salt".to_vec(),
            iterations: 4096,
            nonce: "3rfcNHYJY1ZVvWVs7j".to_string(),
            client_first_bare: String::new(),
            server_first: String::new(),
        }
    }

    /// Parse client-first (after the GS2 header) and build server-first
    pub fn server_first(&mut self, client_first: &str) -> String {
        let mut commas = client_first.match_indices(',').map(|(i, _)| i);
        commas.next().unwrap();
        let header_end = commas.next().unwrap();
        self.client_first_bare = client_first[header_end + 1..].to_string();

        let client_nonce = self
            .client_first_bare
            .split(',')
            .find_map(|attr| attr.strip_prefix("r="))
            .unwrap();
        self.server_first = format!(
            "r={}{},s={},i={}",
            client_nonce,
            self.nonce,
            BASE64.encode(&self.salt),
            self.iterations
        );
        self.server_first.clone()
    }

    /// Check the client proof and build server-final
    pub fn server_final(&self, client_final: &str) -> ScramOutcome {
        let (without_proof, proof) = client_final.rsplit_once(",p=").unwrap();
        let channel_binding = without_proof
            .split(',')
            .find_map(|attr| attr.strip_prefix("c="))
            .map(|c| BASE64.decode(c).unwrap())
            .unwrap();
        let proof = BASE64.decode(proof).unwrap();

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, self.server_first, without_proof
        );
        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(
            self.password.as_bytes(),
            &self.salt,
            self.iterations,
            &mut salted,
        )
        .unwrap();

        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let signature = hmac(&stored_key, auth_message.as_bytes());
        let recovered: Vec<u8> = proof.iter().zip(&signature).map(|(a, b)| a ^ b).collect();
        let proof_valid = Sha256::digest(&recovered).as_slice() == stored_key.as_slice();

        let server_key = hmac(&salted, b"Server Key");
        let server_signature = hmac(&server_key, auth_message.as_bytes());

        ScramOutcome {
            proof_valid,
            channel_binding,
            server_final: format!("v={}", BASE64.encode(server_signature)),
        }
    }
}
