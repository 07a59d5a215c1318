//! Proxy configuration
//!
//! Loaded from a JSON document:
//!
//! ```json
//! {
//!   "protocol": "pg",
//!   "listen_address": "127.0.0.1:6432",
//!   "credentials": { "host": "db.internal", "username": "svc", "password": "...", "database": "app" }
//! }
//! ```
//!
//! or from `CREDWIRE_*` environment variables.

use crate::connector::Protocol;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

const ENV_PROTOCOL: &str = "CREDWIRE_PROTOCOL";
const ENV_LISTEN: &str = "CREDWIRE_LISTEN";
const ENV_CREDENTIAL_PREFIX: &str = "CREDWIRE_CRED_";

/// Listener configuration plus the static credential map
#[derive(Clone, Deserialize)]
pub struct ProxyConfig {
    /// Wire protocol served
    pub protocol: Protocol,
    /// Listen address; defaults per protocol when absent
    #[serde(default)]
    pub listen_address: Option<String>,
    /// Credential map handed to the connector
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

impl ProxyConfig {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Read `CREDWIRE_PROTOCOL`, `CREDWIRE_LISTEN` and `CREDWIRE_CRED_<KEY>`
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut protocol = None;
        let mut listen_address = None;
        let mut credentials = HashMap::new();

        for (key, value) in vars {
            if key == ENV_PROTOCOL {
                protocol = Some(value.parse::<Protocol>()?);
            } else if key == ENV_LISTEN {
                listen_address = Some(value);
            } else if let Some(name) = key.strip_prefix(ENV_CREDENTIAL_PREFIX) {
                if !name.is_empty() {
                    credentials.insert(name.to_ascii_lowercase(), value);
                }
            }
        }

        let protocol =
            protocol.ok_or_else(|| Error::Config(format!("{} is not set", ENV_PROTOCOL)))?;
        Ok(Self {
            protocol,
            listen_address,
            credentials,
        })
    }

    /// Configured listen address or the protocol default
    pub fn listen_address(&self) -> &str {
        self.listen_address
            .as_deref()
            .unwrap_or_else(|| self.protocol.default_listen_address())
    }
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.credentials.keys().collect();
        keys.sort();
        f.debug_struct("ProxyConfig")
            .field("protocol", &self.protocol)
            .field("listen_address", &self.listen_address())
            .field("credentials", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_json() {
        let config = ProxyConfig::from_json(
            r#"{"protocol":"mysql","credentials":{"host":"db","username":"svc","password":"pw"}}"#,
        )
        .unwrap();
        assert_eq!(config.protocol, Protocol::MySql);
        assert_eq!(config.listen_address(), "127.0.0.1:3306");
        assert_eq!(config.credentials["host"], "db");
    }

    #[test]
    fn test_from_json_rejects_unknown_protocol() {
        let err = ProxyConfig::from_json(r#"{"protocol":"mongo"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_vars() {
        let config = ProxyConfig::from_vars(vars(&[
            ("CREDWIRE_PROTOCOL", "postgresql"),
            ("CREDWIRE_LISTEN", "0.0.0.0:6432"),
            ("CREDWIRE_CRED_HOST", "db.internal"),
            ("CREDWIRE_CRED_SSLMODE", "verify-full"),
            ("CREDWIRE_CRED_", "ignored"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();
        assert_eq!(config.protocol, Protocol::Postgres);
        assert_eq!(config.listen_address(), "0.0.0.0:6432");
        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials["sslmode"], "verify-full");
    }

    #[test]
    fn test_from_vars_requires_protocol() {
        let err = ProxyConfig::from_vars(vars(&[("CREDWIRE_CRED_HOST", "db")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_debug_hides_credential_values() {
        let config = ProxyConfig::from_vars(vars(&[
            ("CREDWIRE_PROTOCOL", "pg"),
            ("CREDWIRE_CRED_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
