//! Resolved connection details for one backend connection

use crate::connection::tls::SSL_OPTION_KEYS;
use crate::connector::Protocol;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;
use zeroize::Zeroizing;

/// Keys consumed directly rather than passed through as options
const RESERVED_KEYS: &[&str] = &["host", "port", "address", "username", "password"];

/// Host, port, credential and options for one backend connection.
///
/// Built once per client session from already-resolved credentials. The
/// password is wiped from memory when the value is dropped.
#[derive(Clone)]
pub struct ConnectionDetails {
    /// Backend host name or IP address
    pub host: String,
    /// Backend port
    pub port: u16,
    /// Username injected into the handshake
    pub username: String,
    password: Zeroizing<String>,
    /// Protocol session options (passed to the backend where the protocol allows)
    pub options: BTreeMap<String, String>,
    /// Options consumed by the TLS negotiator
    pub ssl_options: BTreeMap<String, String>,
}

impl ConnectionDetails {
    /// Create details with no options
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let mut ssl_options = BTreeMap::new();
        ssl_options.insert("host".to_string(), host.clone());
        Self {
            host,
            port,
            username: username.into(),
            password: Zeroizing::new(password.into()),
            options: BTreeMap::new(),
            ssl_options,
        }
    }

    /// Set an option, routing SSL keys to the SSL options
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if SSL_OPTION_KEYS.contains(&key.as_str()) {
            self.ssl_options.insert(key, value.into());
        } else {
            self.options.insert(key, value.into());
        }
        self
    }

    /// Build details from a resolved credential map.
    ///
    /// `host`, `port`, `username` and `password` are taken directly; SSL keys
    /// go to [`ConnectionDetails::ssl_options`] (together with a copy of
    /// `host`); everything else becomes a session option. Postgres also honours
    /// the deprecated `address` key (`host[:port]`) when `host` is absent.
    pub fn from_credentials(protocol: Protocol, credentials: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| credentials.get(key).filter(|v| !v.is_empty());

        let mut host = get("host").cloned();
        let mut port = match get("port") {
            Some(port) => parse_port(port)?,
            None => protocol.default_port(),
        };

        if host.is_none() && protocol == Protocol::Postgres {
            if let Some(address) = get("address") {
                warn!("the 'address' credential is deprecated, use 'host' and 'port'");
                let (h, p) = split_address(address, port)?;
                host = Some(h);
                port = p;
            }
        }

        let host = host.ok_or_else(|| Error::Config("missing required credential 'host'".into()))?;

        let mut details = Self::new(
            host,
            port,
            get("username").cloned().unwrap_or_default(),
            get("password").cloned().unwrap_or_default(),
        );

        for (key, value) in credentials {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            details = details.with_option(key.clone(), value.clone());
        }

        Ok(details)
    }

    /// The injected password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Debug for ConnectionDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDetails")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("options", &self.options)
            .field("ssl_options", &self.ssl_options.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| Error::Config(format!("invalid port '{}'", port)))
}

/// Split `host[:port]` or `[v6]:port`
fn split_address(address: &str, default_port: u16) -> Result<(String, u16)> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::Config(format!("invalid address '{}'", address)))?;
        let port = match tail {
            "" => default_port,
            _ => match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None => return Err(Error::Config(format!("invalid address '{}'", address))),
            },
        };
        return Ok((host.to_string(), port));
    }

    match address.split_once(':') {
        None => Ok((address.to_string(), default_port)),
        Some((host, port)) if !port.contains(':') => Ok((host.to_string(), parse_port(port)?)),
        Some(_) => Err(Error::Config(format!("invalid address '{}'", address))),
    }
}
