//! Connector registry and connection broker
//!
//! [`connect`] is the whole per-session contract: dial the backend, run the
//! protocol's authentication engine, and hand back the authenticated backend
//! stream. On failure a protocol-native error frame has already been written to
//! the client, unless the client itself went away.

pub mod mysql;
pub mod postgres;

use crate::connection::{resolve_mode, ConnectionDetails, MaybeTlsStream};
use crate::metrics::{counters, histograms, labels};
use crate::protocol::mysql::Connection;
use crate::{Error, Result};
use serde::Deserialize;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn, Instrument};

/// Supported wire protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Protocol {
    /// MySQL client/server protocol
    MySql,
    /// PostgreSQL frontend/backend protocol
    Postgres,
}

/// Protocol names accepted in configuration
const REGISTRY: &[(&str, Protocol)] = &[
    ("mysql", Protocol::MySql),
    ("pg", Protocol::Postgres),
    ("postgres", Protocol::Postgres),
    ("postgresql", Protocol::Postgres),
];

impl Protocol {
    /// Look up a protocol by configured name
    pub fn from_name(name: &str) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, p)| *p)
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::MySql => labels::PROTOCOL_MYSQL,
            Protocol::Postgres => labels::PROTOCOL_POSTGRES,
        }
    }

    /// Default backend port
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::MySql => 3306,
            Protocol::Postgres => 5432,
        }
    }

    /// Default proxy listen address
    pub fn default_listen_address(&self) -> &'static str {
        match self {
            Protocol::MySql => "127.0.0.1:3306",
            Protocol::Postgres => "127.0.0.1:5432",
        }
    }

    /// Whether `sslmode=require` with a root certificate verifies the chain
    pub fn allow_legacy_ca_fallback(&self) -> bool {
        matches!(self, Protocol::Postgres)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| Error::Config(format!("unknown protocol '{}'", s)))
    }
}

impl TryFrom<String> for Protocol {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Future returned by [`Dialer::dial`]
pub type DialFuture<'a, S> = Pin<Box<dyn Future<Output = io::Result<S>> + Send + 'a>>;

/// Opens the raw backend connection
pub trait Dialer: Send + Sync {
    /// Stream type produced
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `host:port`
    fn dial<'a>(&'a self, host: &'a str, port: u16) -> DialFuture<'a, Self::Stream>;
}

/// Plain TCP dialer with `TCP_NODELAY`
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    fn dial<'a>(&'a self, host: &'a str, port: u16) -> DialFuture<'a, TcpStream> {
        Box::pin(async move {
            let stream = TcpStream::connect((host, port)).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }
}

/// Authenticate a backend connection for `client` using `details`.
///
/// Returns the backend stream positioned right after authentication; any
/// post-authentication traffic is still unread.
pub async fn connect<C, D>(
    protocol: Protocol,
    client: &mut C,
    details: &ConnectionDetails,
    dialer: &D,
) -> Result<MaybeTlsStream<D::Stream>>
where
    C: AsyncRead + AsyncWrite + Unpin,
    D: Dialer,
{
    let start = Instant::now();
    let span = tracing::debug_span!("handshake", %protocol, backend = %details.address());

    let result = match protocol {
        Protocol::MySql => broker_mysql(client, details, dialer).instrument(span).await,
        Protocol::Postgres => broker_postgres(client, details, dialer).instrument(span).await,
    };

    match &result {
        Ok(_) => {
            counters::handshake_succeeded(protocol.name());
            histograms::handshake_duration(protocol.name(), start.elapsed().as_millis() as u64);
        }
        Err(err) => {
            counters::handshake_failed(protocol.name(), err.kind().as_str());
            if err.client_reachable() {
                warn!(%protocol, kind = %err.kind(), error = %err, "backend handshake failed");
            } else {
                debug!(%protocol, "client closed the connection during handshake");
            }
        }
    }
    result
}

/// Write a protocol-native error frame for a failure that happened before
/// [`connect`] could run, such as credential resolution.
pub async fn reject<C>(protocol: Protocol, client: &mut C, err: &Error) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    counters::handshake_failed(protocol.name(), err.kind().as_str());
    match protocol {
        Protocol::MySql => mysql::send_error(&mut Connection::client(client), err).await,
        Protocol::Postgres => postgres::send_error(client, err).await,
    }
}

async fn broker_mysql<C, D>(
    client: &mut C,
    details: &ConnectionDetails,
    dialer: &D,
) -> Result<MaybeTlsStream<D::Stream>>
where
    C: AsyncRead + AsyncWrite + Unpin,
    D: Dialer,
{
    let mut client = Connection::client(client);

    let result = async {
        let policy = resolve_mode(&details.ssl_options, Protocol::MySql.allow_legacy_ca_fallback())?;
        let backend = dial(dialer, details).await?;
        mysql::Handshake::new(&mut client, details, &policy)
            .run(backend)
            .await
    }
    .await;

    if let Err(err) = &result {
        if err.client_reachable() {
            if let Err(e) = mysql::send_error(&mut client, err).await {
                debug!(error = %e, "could not deliver error to client");
            }
        }
    }
    result
}

async fn broker_postgres<C, D>(
    client: &mut C,
    details: &ConnectionDetails,
    dialer: &D,
) -> Result<MaybeTlsStream<D::Stream>>
where
    C: AsyncRead + AsyncWrite + Unpin,
    D: Dialer,
{
    let mut handshake = postgres::Handshake::new(details);

    let result = async {
        let startup = handshake.accept_startup(client).await?;
        let policy = resolve_mode(
            &details.ssl_options,
            Protocol::Postgres.allow_legacy_ca_fallback(),
        )?;
        let backend = dial(dialer, details).await?;
        handshake
            .authenticate(client, backend, &policy, &startup)
            .await
    }
    .await;

    if let Err(err) = &result {
        if err.client_reachable() {
            if let Err(e) = postgres::send_error(client, err).await {
                debug!(error = %e, "could not deliver error to client");
            }
        }
    }
    result
}

async fn dial<D: Dialer>(dialer: &D, details: &ConnectionDetails) -> Result<D::Stream> {
    debug!(backend = %details.address(), "dialing backend");
    dialer
        .dial(&details.host, details.port)
        .await
        .map_err(Error::Io)
}
