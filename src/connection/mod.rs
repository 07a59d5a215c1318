//! Backend connection plumbing
//!
//! This module handles:
//! * Resolved connection details and option routing
//! * TLS policy resolution and the backend TLS upgrade
//! * The plain-or-TLS backend stream
//! * Handshake stage machines

mod details;
mod state;
pub mod tls;
mod transport;

pub use details::ConnectionDetails;
pub use state::{MySqlStage, PostgresStage};
pub use tls::{resolve_mode, SslMode, TlsPolicy};
pub use transport::MaybeTlsStream;
