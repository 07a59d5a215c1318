//! Postgres authentication engine
//!
//! The client's startup packet is read first (declining any TLS or GSSAPI
//! encryption request), the backend is authenticated with the injected
//! credential, and the client is then told `AuthenticationOk`. Everything the
//! backend sends after its own `AuthenticationOk` is left on the socket for the
//! pipe.

use crate::auth::{md5_password, ChannelBinding, ScramClient};
use crate::connection::{ConnectionDetails, MaybeTlsStream, PostgresStage, TlsPolicy};
use crate::metrics::{counters, labels};
use crate::protocol::postgres::codec::{
    read_message, read_ssl_response, read_startup, write_to_backend, write_to_client,
};
use crate::protocol::postgres::constants::{sasl, sqlstate, ssl_response};
use crate::protocol::postgres::encode::encode_startup_message;
use crate::protocol::postgres::{
    encode_authentication_ok, encode_backend_message, encode_message, AuthenticationMessage,
    BackendMessage, ErrorFields, FrontendMessage, StartupMessage, StartupRequest,
};
use crate::{Error, ErrorKind, Result};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Startup keys the proxy always sets itself
const OWNED_STARTUP_KEYS: &[&str] = &["user", "database"];

/// Drives the Postgres handshake for one session
pub struct Handshake<'a> {
    details: &'a ConnectionDetails,
    stage: PostgresStage,
}

impl<'a> Handshake<'a> {
    /// Prepare a handshake using `details`
    pub fn new(details: &'a ConnectionDetails) -> Self {
        Self {
            details,
            stage: PostgresStage::AwaitClientStartup,
        }
    }

    /// Current stage
    pub fn stage(&self) -> PostgresStage {
        self.stage
    }

    /// Read the client's startup message, answering `N` to one SSLRequest and
    /// one GSSENCRequest. The client leg never uses TLS.
    pub async fn accept_startup<C>(&mut self, client: &mut C) -> Result<StartupMessage>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let mut gss_declined = false;

        loop {
            match read_startup(client).await? {
                StartupRequest::Startup(startup) => {
                    if startup.param("database").is_none() {
                        return Err(missing_database());
                    }
                    debug!(
                        version = startup.version,
                        params = startup.params.len(),
                        "received client startup"
                    );
                    return Ok(startup);
                }
                StartupRequest::SslRequest => {
                    if self.stage == PostgresStage::ClientSslDeclined {
                        return Err(Error::Protocol(
                            "unexpected SSLRequest after SSL not supported response".into(),
                        ));
                    }
                    self.stage.transition(PostgresStage::ClientSslDeclined)?;
                    debug!("declining client SSLRequest");
                    write_to_client(client, &[ssl_response::DENY]).await?;
                }
                StartupRequest::GssEncRequest => {
                    if gss_declined || self.stage == PostgresStage::ClientSslDeclined {
                        return Err(Error::Protocol(
                            "unexpected GSSENCRequest after encryption was declined".into(),
                        ));
                    }
                    gss_declined = true;
                    debug!("declining client GSSENCRequest");
                    write_to_client(client, &[ssl_response::DENY]).await?;
                }
                StartupRequest::CancelRequest { .. } => {
                    return Err(Error::Protocol("cancel requests are not forwarded".into()));
                }
            }
        }
    }

    /// Authenticate against `backend` on behalf of the client whose startup
    /// message is `startup`, then send `AuthenticationOk` to the client.
    pub async fn authenticate<C, B>(
        &mut self,
        client: &mut C,
        backend: B,
        policy: &TlsPolicy,
        startup: &StartupMessage,
    ) -> Result<MaybeTlsStream<B>>
    where
        C: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.drive(client, backend, policy, startup).await;
        if result.is_err() {
            self.stage = PostgresStage::Failed;
        }
        result
    }

    async fn drive<C, B>(
        &mut self,
        client: &mut C,
        backend: B,
        policy: &TlsPolicy,
        startup: &StartupMessage,
    ) -> Result<MaybeTlsStream<B>>
    where
        C: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let params = backend_startup_params(self.details, startup)?;
        let mut backend = MaybeTlsStream::Plain(backend);

        if policy.is_enabled() {
            self.stage.transition(PostgresStage::NegotiateBackendSsl)?;
            write_to_backend(&mut backend, &encode_message(&FrontendMessage::SslRequest)).await?;
            match read_ssl_response(&mut backend).await? {
                ssl_response::ALLOW => {
                    backend = backend.upgrade(policy).await?;
                    debug!("backend leg upgraded to TLS");
                }
                ssl_response::DENY => {
                    return Err(Error::Ssl("the backend does not allow SSL connections".into()));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected SSLRequest response byte: 0x{:02X}",
                        other
                    )));
                }
            }
        }

        self.stage.transition(PostgresStage::SendStartup)?;
        write_to_backend(&mut backend, &encode_startup_message(&params)).await?;

        self.stage.transition(PostgresStage::Authenticating)?;
        self.authenticate_backend(&mut backend).await?;
        self.stage.transition(PostgresStage::Authenticated)?;

        write_to_client(client, &encode_authentication_ok()).await?;
        debug!("sent AuthenticationOk to client");

        Ok(backend)
    }

    async fn authenticate_backend<B>(&mut self, backend: &mut MaybeTlsStream<B>) -> Result<()>
    where
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let details = self.details;
        let mut mechanism = labels::MECHANISM_TRUST;

        loop {
            let msg = read_message(backend).await?;

            match msg {
                BackendMessage::Authentication(auth) => match auth {
                    AuthenticationMessage::Ok => {
                        debug!(mechanism, "backend authentication successful");
                        counters::auth_mechanism(labels::PROTOCOL_POSTGRES, mechanism);
                        return Ok(());
                    }
                    AuthenticationMessage::CleartextPassword => {
                        mechanism = labels::MECHANISM_CLEARTEXT;
                        let msg = FrontendMessage::Password(details.password().to_string());
                        write_to_backend(backend, &encode_message(&msg)).await?;
                    }
                    AuthenticationMessage::Md5Password { salt } => {
                        mechanism = labels::MECHANISM_MD5;
                        let hashed =
                            md5_password(&details.username, details.password().as_bytes(), &salt);
                        let msg = FrontendMessage::Password(hashed);
                        write_to_backend(backend, &encode_message(&msg)).await?;
                    }
                    AuthenticationMessage::Sasl { mechanisms } => {
                        mechanism = labels::MECHANISM_SCRAM;
                        self.sasl(backend, &mechanisms).await?;
                    }
                    AuthenticationMessage::SaslContinue { .. }
                    | AuthenticationMessage::SaslFinal { .. } => {
                        return Err(Error::Protocol(
                            "unexpected SASL message outside of SASL flow".into(),
                        ));
                    }
                    other => {
                        return Err(Error::UnsupportedAuthMethod(other.method_name()));
                    }
                },
                BackendMessage::ErrorResponse(err) => {
                    warn!(code = err.code().unwrap_or(""), "backend rejected injected credential");
                    return Err(Error::CredentialRejected(err.to_string()));
                }
                BackendMessage::NoticeResponse(notice) => {
                    debug!("backend notice during authentication: {}", notice);
                }
                BackendMessage::NegotiateProtocolVersion {
                    newest_minor,
                    unrecognized,
                } => {
                    debug!(
                        newest_minor,
                        ?unrecognized,
                        "backend negotiated protocol version"
                    );
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during auth: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// SCRAM-SHA-256 exchange, with channel binding when the backend leg is
    /// TLS and the server offers `SCRAM-SHA-256-PLUS`
    async fn sasl<B>(&mut self, backend: &mut MaybeTlsStream<B>, mechanisms: &[String]) -> Result<()>
    where
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let offers = |name: &str| mechanisms.iter().any(|m| m == name);

        let channel_binding = match backend.channel_binding_data() {
            Some(data) if offers(sasl::SCRAM_SHA_256_PLUS) => ChannelBinding::TlsServerEndPoint(data),
            Some(_) => ChannelBinding::NotAdvertised,
            None => ChannelBinding::Unsupported,
        };
        let plus = matches!(channel_binding, ChannelBinding::TlsServerEndPoint(_));
        if !plus && !offers(sasl::SCRAM_SHA_256) {
            return Err(Error::UnsupportedAuthMethod(format!(
                "SASL mechanisms {}",
                mechanisms.join(", ")
            )));
        }

        let scram = ScramClient::new(
            &self.details.username,
            self.details.password().as_bytes(),
            channel_binding,
        );
        debug!(mechanism = scram.mechanism(), "initiating SCRAM authentication");

        let msg = FrontendMessage::SaslInitialResponse {
            mechanism: scram.mechanism().to_string(),
            data: scram.client_first().into_bytes(),
        };
        write_to_backend(backend, &encode_message(&msg)).await?;

        let server_first = match read_message(backend).await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslContinue { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(Error::CredentialRejected(err.to_string()));
            }
            _ => {
                return Err(Error::Protocol(
                    "expected SaslContinue message during SASL authentication".into(),
                ));
            }
        };
        let server_first = String::from_utf8(server_first)
            .map_err(|_| Error::Protocol("invalid UTF-8 in server first message".into()))?;

        let (client_final, state) = scram.client_final(&server_first)?;
        let msg = FrontendMessage::SaslResponse {
            data: client_final.into_bytes(),
        };
        write_to_backend(backend, &encode_message(&msg)).await?;

        let server_final = match read_message(backend).await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslFinal { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(Error::CredentialRejected(err.to_string()));
            }
            _ => {
                return Err(Error::Protocol(
                    "expected SaslFinal message during SASL authentication".into(),
                ));
            }
        };
        let server_final = String::from_utf8(server_final)
            .map_err(|_| Error::Protocol("invalid UTF-8 in server final message".into()))?;

        scram.verify_server_final(&server_final, &state)?;
        debug!("SCRAM server signature verified");
        Ok(())
    }
}

/// Parameters for the backend startup message: the injected `user`, the
/// client's `database`, then the client's own options overridden by the
/// configured ones.
pub fn backend_startup_params(
    details: &ConnectionDetails,
    startup: &StartupMessage,
) -> Result<Vec<(String, String)>> {
    let database = startup
        .param("database")
        .ok_or_else(missing_database)?;

    let mut options: BTreeMap<&str, &str> = startup
        .params
        .iter()
        .filter(|(k, _)| !OWNED_STARTUP_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    for (k, v) in &details.options {
        if !OWNED_STARTUP_KEYS.contains(&k.as_str()) {
            options.insert(k, v);
        }
    }

    let mut params = vec![
        ("user".to_string(), details.username.clone()),
        ("database".to_string(), database.to_string()),
    ];
    params.extend(options.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Ok(params)
}

fn missing_database() -> Error {
    Error::Config("no 'database' found in connect options".into())
}

/// Generic FATAL ErrorResponse for a failed handshake
pub fn error_fields(err: &Error) -> ErrorFields {
    let (code, message) = match err.kind() {
        ErrorKind::CredentialRejected => (
            sqlstate::INVALID_PASSWORD,
            "authentication failed: backend rejected credentials",
        ),
        ErrorKind::ProtocolViolation => (sqlstate::PROTOCOL_VIOLATION, "protocol violation"),
        ErrorKind::UnsupportedAuthMethod => (
            sqlstate::INVALID_AUTHORIZATION_SPECIFICATION,
            "authentication method not supported by proxy",
        ),
        ErrorKind::SslNegotiationFailure => (
            sqlstate::INVALID_AUTHORIZATION_SPECIFICATION,
            "SSL negotiation with backend failed",
        ),
        ErrorKind::ConfigurationError => (sqlstate::INTERNAL_ERROR, "proxy configuration error"),
        _ => (sqlstate::INTERNAL_ERROR, "proxy connection error"),
    };

    ErrorFields::default()
        .push(b'S', "FATAL")
        .push(b'V', "FATAL")
        .push(b'C', code)
        .push(b'M', message)
}

/// Write the generic ErrorResponse for `err` to the client
pub async fn send_error<C>(client: &mut C, err: &Error) -> Result<()>
where
    C: AsyncWrite + Unpin,
{
    let frame = encode_backend_message(&BackendMessage::ErrorResponse(error_fields(err)));
    write_to_client(client, &frame).await
}
