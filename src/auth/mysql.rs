//! MySQL authentication plugins
//!
//! * `mysql_native_password`: `SHA1(pw) XOR SHA1(salt ++ SHA1(SHA1(pw)))`
//! * `caching_sha2_password`: `SHA256(pw) XOR SHA256(SHA256(SHA256(pw)) ++ salt)`,
//!   with a full-authentication fallback that sends the password either in the
//!   clear over TLS or RSA-OAEP encrypted with the server's public key.

use crate::protocol::mysql::constants::plugins;
use crate::{Error, Result};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Challenge response for `mysql_native_password`.
///
/// An empty password yields an empty response.
pub fn native_password(password: &[u8], salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let scramble = hasher.finalize();

    stage1.iter().zip(scramble.iter()).map(|(a, b)| a ^ b).collect()
}

/// Challenge response for `caching_sha2_password`.
///
/// An empty password yields an empty response.
pub fn caching_sha2_password(password: &[u8], salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha256::digest(password);
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(salt);
    let scramble = hasher.finalize();

    stage1.iter().zip(scramble.iter()).map(|(a, b)| a ^ b).collect()
}

/// Challenge response for the named plugin
pub fn scramble_for_plugin(plugin: &str, password: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
    match plugin {
        plugins::MYSQL_NATIVE_PASSWORD => Ok(native_password(password, salt)),
        plugins::CACHING_SHA2_PASSWORD => Ok(caching_sha2_password(password, salt)),
        other => Err(Error::UnsupportedAuthMethod(format!(
            "MySQL authentication plugin '{}'",
            other
        ))),
    }
}

/// Password followed by a NUL, as sent during full authentication over TLS
pub fn cleartext_password(password: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(password.len() + 1));
    out.extend_from_slice(password);
    out.push(0);
    out
}

/// Encrypt `password ++ NUL`, XORed with the cycled salt, using RSA-OAEP (SHA-1)
/// and the PEM public key the server sent.
pub fn encrypt_password(password: &[u8], salt: &[u8], public_key_pem: &[u8]) -> Result<Vec<u8>> {
    if salt.is_empty() {
        return Err(Error::Protocol("empty salt for RSA password exchange".into()));
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|_| Error::Protocol("server public key is not valid PEM".into()))?;
    let pem = pem.trim_end_matches('\0');
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| Error::Protocol(format!("invalid server public key: {}", e)))?;

    let mut plain = cleartext_password(password);
    for (byte, salt_byte) in plain.iter_mut().zip(salt.iter().cycle()) {
        *byte ^= salt_byte;
    }

    let mut rng = rand::thread_rng();
    key.encrypt(&mut rng, Oaep::new::<Sha1>(), &plain)
        .map_err(|e| Error::Protocol(format!("RSA encryption failed: {}", e)))
}
