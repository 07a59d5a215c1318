//! credwire: a credential-injecting wire proxy for MySQL and PostgreSQL.
//!
//! A client connects to the proxy with any (or no) password. The proxy dials the
//! real database, performs the authentication handshake itself with credentials
//! it resolved on the client's behalf, and then becomes a transparent byte pipe.
//!
//! The crate is organised bottom-up:
//!
//! * [`protocol`]: frame codecs and message models for both wire protocols
//! * [`auth`]: password hashing and challenge-response algorithms
//! * [`connection`]: connection details, TLS negotiation, backend transport
//! * [`connector`]: the per-protocol authentication engines and their registry
//! * [`proxy`]: the accept loop and the post-authentication pipe
//!
//! # Example
//!
//! ```ignore
//! use credwire::connection::ConnectionDetails;
//! use credwire::connector::{self, Protocol, TcpDialer};
//!
//! let details = ConnectionDetails::from_credentials(Protocol::Postgres, credentials)?;
//! let backend = connector::connect(Protocol::Postgres, &mut client, &details, &TcpDialer).await?;
//! credwire::proxy::pipe(client, backend, None).await;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod proxy;

pub use config::ProxyConfig;
pub use connection::ConnectionDetails;
pub use connector::Protocol;
pub use error::{Error, ErrorKind, Result};
