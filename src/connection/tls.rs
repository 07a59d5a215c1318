//! TLS negotiation for the backend leg.
//!
//! A [`TlsPolicy`] is derived once per session from the SSL options
//! (`sslmode`, `sslrootcert`, `sslcert`, `sslkey`, `sslhost`, `host`) by
//! [`resolve_mode`], and consumed by [`upgrade`].
//!
//! Certificate options carry PEM content, not file paths.
//!
//! The rustls handshake itself never rejects a server certificate. Chain and
//! hostname checks run after the handshake against the presented certificates,
//! so `require` can tolerate self-signed servers while `verify-ca` and
//! `verify-full` still enforce their guarantees.
//!
//! rustls never renegotiates, so a server-initiated renegotiation ends the
//! session with a TLS error.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{self, CryptoProvider};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

/// SSL option keys routed to the TLS negotiator
pub const SSL_OPTION_KEYS: &[&str] = &["sslmode", "sslrootcert", "sslcert", "sslkey", "sslhost"];

/// SSL/TLS connection mode, matching the `sslmode` option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS (plaintext connection)
    Disable,
    /// TLS required, server certificate is not verified
    #[default]
    Require,
    /// TLS required, server certificate must chain to a trusted root
    VerifyCa,
    /// As `VerifyCa`, and the certificate must match the server name
    VerifyFull,
}

impl SslMode {
    /// Whether this mode requires certificate verification (CA or full)
    pub fn requires_verification(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Require => write!(f, "require"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    /// An empty string selects the default, `require`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "" | "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!(
                "unsupported sslmode '{}': expected disable, require, verify-ca or verify-full",
                s
            ))),
        }
    }
}

/// Resolved TLS behaviour for one backend connection
#[derive(Clone)]
pub struct TlsPolicy {
    mode: SslMode,
    verify_chain: bool,
    server_name: String,
    root_cert: Option<String>,
    client_identity: Option<(String, String)>,
}

impl TlsPolicy {
    /// A policy that never attempts TLS
    pub fn disabled(host: &str) -> Self {
        Self {
            mode: SslMode::Disable,
            verify_chain: false,
            server_name: host.to_string(),
            root_cert: None,
            client_identity: None,
        }
    }

    /// The configured mode
    pub fn mode(&self) -> SslMode {
        self.mode
    }

    /// Whether a TLS upgrade must be attempted
    pub fn is_enabled(&self) -> bool {
        self.mode != SslMode::Disable
    }

    /// Whether the presented chain is verified after the handshake.
    ///
    /// True for `verify-ca`, `verify-full`, and `require` with a root
    /// certificate when legacy CA fallback is allowed.
    pub fn verifies_chain(&self) -> bool {
        self.verify_chain
    }

    /// Name used for SNI and `verify-full` hostname matching
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

impl std::fmt::Debug for TlsPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsPolicy")
            .field("mode", &self.mode)
            .field("verify_chain", &self.verify_chain)
            .field("server_name", &self.server_name)
            .field("root_cert", &self.root_cert.as_ref().map(|_| "<pem>"))
            .field("client_identity", &self.client_identity.as_ref().map(|_| "<pem>"))
            .finish()
    }
}

/// Derive the TLS policy from SSL options.
///
/// `sslmode` is `disable`, `require` (also the default when absent or empty),
/// `verify-ca` or `verify-full`; anything else is a configuration error.
/// With `allow_legacy_ca_fallback`, `require` plus a non-empty `sslrootcert`
/// verifies the chain like `verify-ca`.
pub fn resolve_mode(
    options: &BTreeMap<String, String>,
    allow_legacy_ca_fallback: bool,
) -> Result<TlsPolicy> {
    let get = |key: &str| options.get(key).map(String::as_str).unwrap_or("");

    let mode: SslMode = get("sslmode").parse()?;

    let root_cert = Some(get("sslrootcert"))
        .filter(|pem| !pem.is_empty())
        .map(str::to_string);

    let client_identity = match (get("sslcert"), get("sslkey")) {
        ("", _) | (_, "") => None,
        (cert, key) => Some((cert.to_string(), key.to_string())),
    };

    let server_name = match get("sslhost") {
        "" => get("host"),
        sslhost => sslhost,
    }
    .to_string();

    let verify_chain = match mode {
        SslMode::Disable => false,
        SslMode::Require => allow_legacy_ca_fallback && root_cert.is_some(),
        SslMode::VerifyCa | SslMode::VerifyFull => true,
    };

    Ok(TlsPolicy {
        mode,
        verify_chain,
        server_name,
        root_cert,
        client_identity,
    })
}

/// Perform a TLS client handshake over `stream` and verify the peer as the
/// policy demands.
pub async fn upgrade<S>(stream: S, policy: &TlsPolicy) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !policy.is_enabled() {
        return Err(Error::Ssl("TLS upgrade attempted with sslmode=disable".into()));
    }

    let provider = Arc::new(crypto::ring::default_provider());
    // Parse roots before dialing TLS so bad PEM fails without a handshake.
    let roots = if policy.verify_chain {
        Some(root_store(policy.root_cert.as_deref())?)
    } else {
        None
    };

    let config = client_config(policy, provider.clone())?;
    let server_name = parse_server_name(&policy.server_name)?;

    debug!(mode = %policy.mode, server_name = %policy.server_name, "starting TLS handshake");
    let tls_stream = TlsConnector::from(Arc::new(config))
        .connect(server_name.clone(), stream)
        .await
        .map_err(|e| Error::Ssl(format!("TLS handshake failed: {}", e)))?;

    if let Some(roots) = roots {
        let (_, conn) = tls_stream.get_ref();
        let certs = conn
            .peer_certificates()
            .ok_or_else(|| Error::Ssl("server presented no certificate".into()))?;
        verify_peer(
            certs,
            &server_name,
            roots,
            provider,
            policy.mode == SslMode::VerifyFull,
        )?;
        debug!("server certificate verified");
    }

    Ok(tls_stream)
}

fn client_config(policy: &TlsPolicy, provider: Arc<CryptoProvider>) -> Result<ClientConfig> {
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Ssl(format!("TLS configuration failed: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DeferredVerification { provider }));

    match &policy.client_identity {
        Some((cert_pem, key_pem)) => {
            let certs = parse_certificates(cert_pem)?;
            let key = parse_private_key(key_pem)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::Ssl(format!("invalid client certificate: {}", e)))
        }
        None => Ok(builder.with_no_client_auth()),
    }
}

/// Check the presented chain against `roots`; the hostname is only enforced
/// when `check_hostname` is set.
fn verify_peer(
    certs: &[CertificateDer<'static>],
    server_name: &ServerName<'static>,
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
    check_hostname: bool,
) -> Result<()> {
    let (end_entity, intermediates) = certs
        .split_first()
        .ok_or_else(|| Error::Ssl("server presented no certificate".into()))?;

    let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
        .build()
        .map_err(|e| Error::Ssl(format!("cannot build certificate verifier: {}", e)))?;

    match verifier.verify_server_cert(end_entity, intermediates, server_name, &[], UnixTime::now())
    {
        Ok(_) => Ok(()),
        Err(rustls::Error::InvalidCertificate(ref err))
            if !check_hostname && is_name_mismatch(err) =>
        {
            Ok(())
        }
        Err(e) => Err(Error::Ssl(format!("certificate verification failed: {}", e))),
    }
}

fn is_name_mismatch(err: &CertificateError) -> bool {
    matches!(
        err,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

/// `tls-server-end-point` channel binding data for a DER certificate (RFC 5929).
///
/// The hash follows the certificate's signature algorithm: SHA-384 and
/// SHA-512 signatures hash with the same function, everything else
/// (including MD5 and SHA-1) with SHA-256.
pub fn tls_server_end_point(cert: &[u8]) -> Vec<u8> {
    let algorithm = X509Certificate::from_der(cert)
        .ok()
        .map(|(_, parsed)| parsed.signature_algorithm.algorithm.to_id_string());

    match algorithm.as_deref() {
        Some(SHA384_WITH_RSA | ECDSA_WITH_SHA384) => Sha384::digest(cert).to_vec(),
        Some(SHA512_WITH_RSA | ECDSA_WITH_SHA512) => Sha512::digest(cert).to_vec(),
        _ => Sha256::digest(cert).to_vec(),
    }
}

const SHA384_WITH_RSA: &str = "1.2.840.113549.1.1.12";
const SHA512_WITH_RSA: &str = "1.2.840.113549.1.1.13";
const ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";
const ECDSA_WITH_SHA512: &str = "1.2.840.10045.4.3.4";

fn root_store(root_pem: Option<&str>) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();

    if let Some(pem) = root_pem {
        let (added, _) = store.add_parsable_certificates(parse_certificates(pem)?);
        if added == 0 {
            return Err(Error::Ssl("couldn't parse pem in sslrootcert".into()));
        }
        return Ok(store);
    }

    let native = rustls_native_certs::load_native_certs();
    store.add_parsable_certificates(native.certs);
    if store.is_empty() {
        debug!("platform trust store is empty, using bundled roots");
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    Ok(store)
}

fn parse_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Ssl(format!("couldn't parse certificate pem: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::Ssl("no certificates found in pem".into()));
    }
    Ok(certs)
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| Error::Ssl(format!("couldn't parse private key pem: {}", e)))?
        .ok_or_else(|| Error::Ssl("no private key found in sslkey".into()))
}

/// Parse the TLS server name (SNI) from a hostname or IP address.
pub fn parse_server_name(hostname: &str) -> Result<ServerName<'static>> {
    let hostname = hostname.trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Config(format!("invalid hostname for TLS: '{}'", hostname)))
}

/// Accepts any server certificate during the handshake while still checking
/// handshake signatures. Chain verification happens in [`verify_peer`].
#[derive(Debug)]
struct DeferredVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for DeferredVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
