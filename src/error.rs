//! Error type for the proxy core
//!
//! Every error is scoped to a single client session. [`Error::kind`] folds the
//! variants into the taxonomy used to pick the error frame sent to the client.

use std::io;
use thiserror::Error;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure on either leg
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or truncated frame, bad length header, unexpected message
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Authentication mechanism the engine does not implement
    #[error("unsupported authentication method: {0}")]
    UnsupportedAuthMethod(String),

    /// Backend refused TLS, bad certificate material or failed verification
    #[error("SSL negotiation failed: {0}")]
    Ssl(String),

    /// Backend declined the injected credential
    #[error("credential rejected by backend: {0}")]
    CredentialRejected(String),

    /// Invalid configuration or missing required startup field
    #[error("configuration error: {0}")]
    Config(String),

    /// The client hung up before the handshake finished
    #[error("client closed the connection")]
    ClientClosed,

    /// The backend hung up before the handshake finished
    #[error("backend closed the connection")]
    BackendClosed,

    /// The backend answered the connection with an error instead of a
    /// greeting (too many connections, host blocked)
    #[error("backend refused the connection: {0}")]
    BackendRefused(String),

    /// Handshake stage machine was driven out of order
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Framing or sequencing problem
    ProtocolViolation,
    /// Mechanism not implemented
    UnsupportedAuthMethod,
    /// TLS could not be established or verified
    SslNegotiationFailure,
    /// Backend rejected the credential
    CredentialRejected,
    /// Invalid configuration
    ConfigurationError,
    /// The client is gone; nothing may be written back to it
    ClientGone,
    /// Transport failure not attributable to the client
    Io,
}

impl ErrorKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::UnsupportedAuthMethod => "unsupported_auth_method",
            ErrorKind::SslNegotiationFailure => "ssl_negotiation_failure",
            ErrorKind::CredentialRejected => "credential_rejected",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::ClientGone => "client_gone",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::BackendClosed | Error::BackendRefused(_) => ErrorKind::Io,
            Error::Protocol(_) | Error::InvalidState { .. } => ErrorKind::ProtocolViolation,
            Error::UnsupportedAuthMethod(_) => ErrorKind::UnsupportedAuthMethod,
            Error::Ssl(_) => ErrorKind::SslNegotiationFailure,
            Error::CredentialRejected(_) => ErrorKind::CredentialRejected,
            Error::Config(_) => ErrorKind::ConfigurationError,
            Error::ClientClosed => ErrorKind::ClientGone,
        }
    }

    /// Whether an error frame may still be written to the client
    pub fn client_reachable(&self) -> bool {
        self.kind() != ErrorKind::ClientGone
    }

    /// Map an I/O error raised on the client leg.
    ///
    /// EOF and reset become [`Error::ClientClosed`] so the broker stays silent.
    pub(crate) fn from_client_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Error::ClientClosed,
            _ => Error::Io(err),
        }
    }

    /// Map an I/O error raised on the backend leg
    pub(crate) fn from_backend_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::BackendClosed,
            _ => Error::Io(err),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
