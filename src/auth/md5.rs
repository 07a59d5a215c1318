//! PostgreSQL md5 password response

use ::md5::{Digest, Md5};

/// `"md5" + hex(md5(hex(md5(password ++ user)) ++ salt))`
pub fn md5_password(user: &str, password: &[u8], salt: &[u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password);
    hasher.update(user.as_bytes());
    let inner = hex::encode(hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{}", hex::encode(hasher.finalize()))
}
