//! MySQL authentication engine
//!
//! The proxy sits between the client and the server during the connection
//! phase. The server greeting is relayed with TLS hidden and the plugin forced
//! to `mysql_native_password`; the client's reply is kept for its capability
//! flags, charset and attributes, but its username and auth response are
//! replaced by the injected credential before it reaches the server.

use crate::auth::mysql as auth;
use crate::connection::{ConnectionDetails, MaybeTlsStream, MySqlStage, TlsPolicy};
use crate::metrics::{counters, labels};
use crate::protocol::mysql::constants::{
    caching_sha2, capabilities, error_codes, plugins, response, SSL_REQUEST_PAYLOAD_LENGTH,
};
use crate::protocol::mysql::{
    AuthMoreData, AuthSwitchRequest, Connection, ErrPacket, HandshakeResponse41, HandshakeV10,
    Packet, Side,
};
use crate::{Error, ErrorKind, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Facts gathered while the handshake runs
#[derive(Debug, Clone, Default)]
pub struct HandshakeState {
    /// Capabilities announced by the server greeting
    pub server_capabilities: u32,
    /// Current salt (replaced by an auth switch)
    pub salt: Vec<u8>,
    /// Current authentication plugin (replaced by an auth switch)
    pub auth_plugin: String,
    /// Capabilities sent to the server after the override
    pub client_capabilities: u32,
    /// Whether the backend leg is upgraded to TLS
    pub tls_requested: bool,
}

/// Drives the handshake against one backend connection
pub struct Handshake<'a, C> {
    client: &'a mut Connection<C>,
    details: &'a ConnectionDetails,
    policy: &'a TlsPolicy,
    stage: MySqlStage,
    state: HandshakeState,
}

impl<'a, C> Handshake<'a, C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    /// Prepare a handshake for `client` using `details`
    pub fn new(
        client: &'a mut Connection<C>,
        details: &'a ConnectionDetails,
        policy: &'a TlsPolicy,
    ) -> Self {
        Self {
            client,
            details,
            policy,
            stage: MySqlStage::AwaitServerHandshake,
            state: HandshakeState::default(),
        }
    }

    /// State gathered so far
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Run the handshake to completion and return the authenticated backend
    /// stream. On error the stage is `Failed` and nothing has been written to
    /// the client beyond what the protocol had already exchanged.
    pub async fn run<B>(&mut self, backend: B) -> Result<MaybeTlsStream<B>>
    where
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.drive(Connection::backend(MaybeTlsStream::Plain(backend))).await;
        if result.is_err() && self.stage != MySqlStage::Failed {
            self.stage = MySqlStage::Failed;
        }
        result
    }

    async fn drive<B>(
        &mut self,
        mut backend: Connection<MaybeTlsStream<B>>,
    ) -> Result<MaybeTlsStream<B>>
    where
        B: AsyncRead + AsyncWrite + Unpin,
    {
        // 1. server greeting
        let packet = backend.read_packet().await?;
        if packet.first_byte() == Some(response::ERR) {
            let err = ErrPacket::unpack(&packet)?;
            warn!(code = err.code, "backend refused connection");
            return Err(Error::BackendRefused(err.to_string()));
        }
        let greeting = HandshakeV10::unpack(&packet)?;
        self.state.server_capabilities = greeting.capability_flags;
        self.state.salt = greeting.salt.clone();
        self.state.auth_plugin = if greeting.auth_plugin.is_empty() {
            plugins::MYSQL_NATIVE_PASSWORD.to_string()
        } else {
            greeting.auth_plugin.clone()
        };
        debug!(
            server_version = %greeting.server_version,
            plugin = %self.state.auth_plugin,
            server_tls = greeting.supports_tls(),
            "received server greeting"
        );

        // 2. relay the greeting with TLS hidden
        self.stage.transition(MySqlStage::RelayToClient)?;
        let mut relayed = greeting.for_client().pack()?;
        self.client.write_packet(&mut relayed).await?;

        // 3. client handshake response
        self.stage.transition(MySqlStage::AwaitClientResponse)?;
        let packet = self.client.read_packet().await?;
        if is_ssl_request(&packet) {
            return Err(Error::Ssl("client requested TLS on the proxy leg".into()));
        }
        let mut response = HandshakeResponse41::unpack(&packet)?;
        debug!(
            client_user = %response.username,
            database = ?response.database,
            "received client handshake response"
        );

        self.stage.transition(MySqlStage::ValidateSslCapability)?;
        if response.requests_tls() {
            return Err(Error::Ssl("client requested TLS on the proxy leg".into()));
        }
        self.state.tls_requested = self.policy.is_enabled();
        if self.state.tls_requested && !greeting.supports_tls() {
            return Err(Error::Ssl("backend does not support SSL".into()));
        }

        // 4. capabilities the proxy relies on
        self.stage.transition(MySqlStage::OverrideClientCapabilities)?;
        response.capability_flags |=
            capabilities::CLIENT_SECURE_CONNECTION | capabilities::CLIENT_PLUGIN_AUTH;
        if self.state.tls_requested {
            response.capability_flags |= capabilities::CLIENT_SSL;
        }
        self.state.client_capabilities = response.capability_flags;

        // 5. real credential
        self.stage.transition(MySqlStage::InjectCredentials)?;
        let auth_response = auth::scramble_for_plugin(
            &self.state.auth_plugin,
            self.details.password().as_bytes(),
            &self.state.salt,
        )?;
        response.inject_credentials(&self.details.username, auth_response, &self.state.auth_plugin);
        record_mechanism(&self.state.auth_plugin);

        // 6. optional TLS upgrade
        if self.state.tls_requested {
            self.stage.transition(MySqlStage::SslUpgrade)?;
            let mut ssl_request = response.ssl_request()?;
            backend.write_packet(&mut ssl_request).await?;

            let (stream, sequence_id) = backend.into_parts();
            let stream = stream.upgrade(self.policy).await?;
            backend = Connection::resume(Side::Backend, stream, sequence_id);
            debug!("backend leg upgraded to TLS");
        }

        self.stage.transition(MySqlStage::SendToBackend)?;
        let mut packet = response.pack()?;
        backend.write_packet(&mut packet).await?;

        // 7. backend verdict
        self.stage.transition(MySqlStage::AwaitBackendResult)?;
        self.await_result(&mut backend).await?;

        Ok(backend.into_inner())
    }

    async fn await_result<B>(&mut self, backend: &mut Connection<MaybeTlsStream<B>>) -> Result<()>
    where
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let mut switched = false;

        loop {
            let mut packet = backend.read_packet().await?;

            match packet.first_byte() {
                Some(response::OK) => {
                    self.client.write_packet(&mut packet).await?;
                    self.stage.transition(MySqlStage::Authenticated)?;
                    debug!("backend accepted injected credential");
                    return Ok(());
                }
                Some(response::ERR) => {
                    let err = ErrPacket::unpack(&packet)?;
                    warn!(code = err.code, "backend rejected injected credential");
                    return Err(Error::CredentialRejected(err.to_string()));
                }
                Some(response::AUTH_SWITCH_REQUEST) => {
                    if switched {
                        return Err(Error::Protocol("repeated auth switch request".into()));
                    }
                    switched = true;

                    let request = AuthSwitchRequest::unpack(&packet)?;
                    debug!(plugin = %request.plugin_name, "backend requested auth switch");
                    self.state.auth_plugin = request.plugin_name;
                    self.state.salt = request.plugin_data;

                    let data = auth::scramble_for_plugin(
                        &self.state.auth_plugin,
                        self.details.password().as_bytes(),
                        &self.state.salt,
                    )?;
                    record_mechanism(&self.state.auth_plugin);
                    self.send(backend, &data).await?;
                }
                Some(response::AUTH_MORE_DATA) => {
                    let more = AuthMoreData::unpack(&packet)?;
                    match more.data.first().copied() {
                        Some(caching_sha2::FAST_AUTH_SUCCESS) => {
                            debug!("fast authentication succeeded");
                            self.stage.transition(MySqlStage::AwaitBackendResult)?;
                        }
                        Some(caching_sha2::PERFORM_FULL_AUTHENTICATION) => {
                            self.full_authentication(backend).await?;
                        }
                        other => {
                            return Err(Error::Protocol(format!(
                                "unexpected auth more data status {:?}",
                                other
                            )));
                        }
                    }
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected packet during authentication: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// `caching_sha2_password` full authentication: the password in the clear
    /// over TLS, otherwise RSA-encrypted with the server's public key
    async fn full_authentication<B>(
        &mut self,
        backend: &mut Connection<MaybeTlsStream<B>>,
    ) -> Result<()>
    where
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let details = self.details;
        let password = details.password().as_bytes();

        if backend.get_ref().is_tls() {
            debug!("full authentication over TLS");
            let data = auth::cleartext_password(password);
            return self.send(backend, &data).await;
        }

        debug!("full authentication, requesting server public key");
        self.send(backend, &[caching_sha2::REQUEST_PUBLIC_KEY]).await?;

        let packet = backend.read_packet().await?;
        if packet.first_byte() == Some(response::ERR) {
            let err = ErrPacket::unpack(&packet)?;
            return Err(Error::CredentialRejected(err.to_string()));
        }
        let key = AuthMoreData::unpack(&packet)?;
        let encrypted = auth::encrypt_password(password, &self.state.salt, &key.data)?;
        self.send(backend, &encrypted).await
    }

    async fn send<B>(&mut self, backend: &mut Connection<MaybeTlsStream<B>>, data: &[u8]) -> Result<()>
    where
        B: AsyncRead + AsyncWrite + Unpin,
    {
        self.stage.transition(MySqlStage::SendToBackend)?;
        let mut packet = Packet::new(backend.sequence_id(), data)?;
        backend.write_packet(&mut packet).await?;
        self.stage.transition(MySqlStage::AwaitBackendResult)
    }
}

fn is_ssl_request(packet: &Packet) -> bool {
    let payload = packet.payload();
    payload.len() == SSL_REQUEST_PAYLOAD_LENGTH
        && u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]])
            & capabilities::CLIENT_SSL
            != 0
}

fn record_mechanism(plugin: &str) {
    let mechanism = match plugin {
        plugins::CACHING_SHA2_PASSWORD => labels::MECHANISM_CACHING_SHA2,
        _ => labels::MECHANISM_MYSQL_NATIVE,
    };
    counters::auth_mechanism(labels::PROTOCOL_MYSQL, mechanism);
}

/// Generic ERR frame for a failed handshake. Messages never carry backend
/// detail or secrets.
pub fn error_packet(err: &Error) -> ErrPacket {
    match err.kind() {
        ErrorKind::SslNegotiationFailure => ErrPacket::new(
            error_codes::SSL_CONNECTION_ERROR,
            "HY000",
            "SSL connection error",
        ),
        ErrorKind::ProtocolViolation => {
            ErrPacket::new(error_codes::MALFORMED_PACKET, "HY000", "Malformed packet")
        }
        ErrorKind::CredentialRejected => ErrPacket::new(
            error_codes::ACCESS_DENIED,
            "28000",
            "Access denied: backend rejected credentials",
        ),
        ErrorKind::UnsupportedAuthMethod => ErrPacket::new(
            error_codes::NOT_SUPPORTED_AUTH_MODE,
            "08004",
            "Authentication method not supported by proxy",
        ),
        _ => ErrPacket::new(error_codes::UNKNOWN_ERROR, "HY000", "Proxy connection error"),
    }
}

/// Write the generic ERR frame for `err` to the client, continuing the
/// client's sequence
pub async fn send_error<C>(client: &mut Connection<C>, err: &Error) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut packet = error_packet(err).pack()?;
    client.write_packet(&mut packet).await
}
