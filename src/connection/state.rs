//! Handshake stage machines
//!
//! Each authentication engine walks its stages strictly in order. A transition
//! the protocol does not allow is an [`Error::InvalidState`].

use crate::{Error, Result};
use std::fmt;

/// Stages of the MySQL authentication handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MySqlStage {
    /// Waiting for the backend's initial handshake
    AwaitServerHandshake,
    /// Relaying the rewritten handshake to the client
    RelayToClient,
    /// Waiting for the client's handshake response
    AwaitClientResponse,
    /// Checking TLS requirements against the backend's capabilities
    ValidateSslCapability,
    /// Forcing the capability bits the proxy relies on
    OverrideClientCapabilities,
    /// Replacing the username and auth response
    InjectCredentials,
    /// Upgrading the backend leg to TLS
    SslUpgrade,
    /// Writing the handshake response (or a follow-up) to the backend
    SendToBackend,
    /// Waiting for OK, ERR, auth switch or more-data
    AwaitBackendResult,
    /// Backend accepted the credential
    Authenticated,
    /// Handshake aborted
    Failed,
}

impl MySqlStage {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: MySqlStage) -> bool {
        use MySqlStage::*;

        matches!(
            (self, next),
            (AwaitServerHandshake, RelayToClient)
                | (RelayToClient, AwaitClientResponse)
                | (AwaitClientResponse, ValidateSslCapability)
                | (ValidateSslCapability, OverrideClientCapabilities)
                | (OverrideClientCapabilities, InjectCredentials)
                | (InjectCredentials, SslUpgrade)
                | (InjectCredentials, SendToBackend)
                | (SslUpgrade, SendToBackend)
                | (SendToBackend, AwaitBackendResult)
                | (AwaitBackendResult, AwaitBackendResult)
                | (AwaitBackendResult, SendToBackend)
                | (AwaitBackendResult, Authenticated)
        ) || (next == Failed && !matches!(self, Authenticated | Failed))
    }

    /// Transition to new stage
    pub fn transition(&mut self, next: MySqlStage) -> Result<()> {
        checked_transition(self, next, Self::can_transition_to)
    }
}

impl fmt::Display for MySqlStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitServerHandshake => "await_server_handshake",
            Self::RelayToClient => "relay_to_client",
            Self::AwaitClientResponse => "await_client_response",
            Self::ValidateSslCapability => "validate_ssl_capability",
            Self::OverrideClientCapabilities => "override_client_capabilities",
            Self::InjectCredentials => "inject_credentials",
            Self::SslUpgrade => "ssl_upgrade",
            Self::SendToBackend => "send_to_backend",
            Self::AwaitBackendResult => "await_backend_result",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Stages of the Postgres authentication handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostgresStage {
    /// Waiting for the client's startup packet
    AwaitClientStartup,
    /// The client asked for TLS once and was declined
    ClientSslDeclined,
    /// Negotiating TLS with the backend
    NegotiateBackendSsl,
    /// Sending the rewritten startup message
    SendStartup,
    /// Answering backend authentication challenges
    Authenticating,
    /// Backend sent AuthenticationOk
    Authenticated,
    /// Handshake aborted
    Failed,
}

impl PostgresStage {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: PostgresStage) -> bool {
        use PostgresStage::*;

        matches!(
            (self, next),
            (AwaitClientStartup, ClientSslDeclined)
                | (AwaitClientStartup, NegotiateBackendSsl)
                | (AwaitClientStartup, SendStartup)
                | (ClientSslDeclined, NegotiateBackendSsl)
                | (ClientSslDeclined, SendStartup)
                | (NegotiateBackendSsl, SendStartup)
                | (SendStartup, Authenticating)
                | (Authenticating, Authenticated)
        ) || (next == Failed && !matches!(self, Authenticated | Failed))
    }

    /// Transition to new stage
    pub fn transition(&mut self, next: PostgresStage) -> Result<()> {
        checked_transition(self, next, Self::can_transition_to)
    }
}

impl fmt::Display for PostgresStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitClientStartup => "await_client_startup",
            Self::ClientSslDeclined => "client_ssl_declined",
            Self::NegotiateBackendSsl => "negotiate_backend_ssl",
            Self::SendStartup => "send_startup",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn checked_transition<T>(current: &mut T, next: T, allowed: fn(&T, T) -> bool) -> Result<()>
where
    T: Copy + fmt::Debug,
{
    if !allowed(current, next) {
        return Err(Error::InvalidState {
            expected: format!("valid transition from {:?}", current),
            actual: format!("{:?}", next),
        });
    }
    *current = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_plaintext_path() {
        use MySqlStage::*;
        let mut stage = AwaitServerHandshake;
        for next in [
            RelayToClient,
            AwaitClientResponse,
            ValidateSslCapability,
            OverrideClientCapabilities,
            InjectCredentials,
            SendToBackend,
            AwaitBackendResult,
            Authenticated,
        ] {
            stage.transition(next).unwrap();
        }
        assert_eq!(stage, Authenticated);
    }

    #[test]
    fn test_mysql_tls_and_auth_switch_path() {
        use MySqlStage::*;
        let mut stage = InjectCredentials;
        stage.transition(SslUpgrade).unwrap();
        stage.transition(SendToBackend).unwrap();
        stage.transition(AwaitBackendResult).unwrap();
        stage.transition(SendToBackend).unwrap();
        stage.transition(AwaitBackendResult).unwrap();
        stage.transition(AwaitBackendResult).unwrap();
        stage.transition(Authenticated).unwrap();
    }

    #[test]
    fn test_mysql_cannot_skip_validation() {
        let mut stage = MySqlStage::AwaitClientResponse;
        let err = stage.transition(MySqlStage::InjectCredentials).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(stage, MySqlStage::AwaitClientResponse);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut stage = MySqlStage::SendToBackend;
        stage.transition(MySqlStage::Failed).unwrap();
        assert!(stage.transition(MySqlStage::Failed).is_err());
        assert!(!MySqlStage::Authenticated.can_transition_to(MySqlStage::Failed));
    }

    #[test]
    fn test_postgres_paths() {
        use PostgresStage::*;
        let mut stage = AwaitClientStartup;
        stage.transition(ClientSslDeclined).unwrap();
        stage.transition(NegotiateBackendSsl).unwrap();
        stage.transition(SendStartup).unwrap();
        stage.transition(Authenticating).unwrap();
        stage.transition(Authenticated).unwrap();
    }

    #[test]
    fn test_postgres_second_ssl_request_is_invalid() {
        let mut stage = PostgresStage::ClientSslDeclined;
        assert!(stage.transition(PostgresStage::ClientSslDeclined).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(MySqlStage::SslUpgrade.to_string(), "ssl_upgrade");
        assert_eq!(PostgresStage::SendStartup.to_string(), "send_startup");
    }
}
