//! Backend TLS tests with generated certificates
//!
//! A throwaway CA and a `localhost` leaf are minted with rcgen; the fake
//! backends terminate TLS with tokio-rustls.

mod common;

use common::*;
use credwire::connection::ConnectionDetails;
use credwire::connector::{self, Protocol};
use credwire::protocol::mysql::constants::capabilities::CLIENT_SSL;
use credwire::protocol::mysql::{Connection, HandshakeResponse41, Side};
use credwire::protocol::postgres::{AuthenticationMessage, BackendMessage};
use credwire::ErrorKind;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, SignatureAlgorithm};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha256, Sha384};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_rustls::TlsAcceptor;

struct TestPki {
    ca_pem: String,
    leaf: CertificateDer<'static>,
    acceptor: TlsAcceptor,
}

fn pki() -> TestPki {
    pki_with(&rcgen::PKCS_ECDSA_P256_SHA256)
}

/// CA and leaf keys both use `alg`, so the leaf is signed with it too
fn pki_with(alg: &'static SignatureAlgorithm) -> TestPki {
    let ca_key = KeyPair::generate_for(alg).unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "credwire test CA");
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let leaf_key = KeyPair::generate_for(alg).unwrap();
    let leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();
    let leaf_der = leaf.der().clone();

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(
        vec![leaf_der.clone()],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
    )
    .unwrap();

    TestPki {
        ca_pem: ca.pem(),
        leaf: leaf_der,
        acceptor: TlsAcceptor::from(Arc::new(config)),
    }
}

fn pg_details(host: &str, sslmode: &str, root: Option<&str>) -> ConnectionDetails {
    let mut details =
        ConnectionDetails::new(host, 5432, "svc_app", "s3cret").with_option("sslmode", sslmode);
    if let Some(root) = root {
        details = details.with_option("sslrootcert", root);
    }
    details
}

/// Answer the SSLRequest with `S` and terminate TLS
async fn pg_accept_tls(
    mut backend: DuplexStream,
    acceptor: TlsAcceptor,
) -> std::io::Result<tokio_rustls::server::TlsStream<DuplexStream>> {
    let mut request = [0u8; 8];
    backend.read_exact(&mut request).await?;
    assert_eq!(request.to_vec(), pg_ssl_request());
    backend.write_all(b"S").await?;
    acceptor.accept(backend).await
}

/// Fake backend that offers SCRAM-SHA-256-PLUS and checks the client's
/// channel binding against `expected_binding`
async fn serve_scram_plus(
    backend: DuplexStream,
    acceptor: TlsAcceptor,
    expected_binding: Vec<u8>,
) -> tokio_rustls::server::TlsStream<DuplexStream> {
    let mut tls = pg_accept_tls(backend, acceptor).await.unwrap();
    pg_read_startup(&mut tls).await;
    pg_send(
        &mut tls,
        BackendMessage::Authentication(AuthenticationMessage::Sasl {
            mechanisms: vec!["SCRAM-SHA-256-PLUS".into(), "SCRAM-SHA-256".into()],
        }),
    )
    .await;

    let (_, body) = pg_read_message(&mut tls).await;
    let nul = body.iter().position(|b| *b == 0).unwrap();
    assert_eq!(&body[..nul], b"SCRAM-SHA-256-PLUS");
    let client_first = String::from_utf8(body[nul + 5..].to_vec()).unwrap();
    assert!(client_first.starts_with("p=tls-server-end-point,,"));

    let mut scram = ScramServer::new("s3cret");
    let server_first = scram.server_first(&client_first);
    pg_send(
        &mut tls,
        BackendMessage::Authentication(AuthenticationMessage::SaslContinue {
            data: server_first.into_bytes(),
        }),
    )
    .await;
    let (_, client_final) = pg_read_message(&mut tls).await;
    let outcome = scram.server_final(&String::from_utf8(client_final).unwrap());
    assert!(outcome.proof_valid);
    assert_eq!(outcome.channel_binding, expected_binding);
    pg_send(
        &mut tls,
        BackendMessage::Authentication(AuthenticationMessage::SaslFinal {
            data: outcome.server_final.into_bytes(),
        }),
    )
    .await;
    pg_send(&mut tls, BackendMessage::Authentication(AuthenticationMessage::Ok)).await;
    tls
}

fn end_point_binding(hash: &[u8]) -> Vec<u8> {
    let mut data = b"p=tls-server-end-point,,".to_vec();
    data.extend_from_slice(hash);
    data
}

#[tokio::test]
async fn test_postgres_verify_full_with_scram_plus() {
    let pki = pki();
    let (dialer, backend) = DuplexDialer::pair();
    let (mut proxy_client, mut client) = tokio::io::duplex(BUFFER);
    let expected_binding = end_point_binding(&Sha256::digest(pki.leaf.as_ref()));

    let server = tokio::spawn(serve_scram_plus(backend, pki.acceptor.clone(), expected_binding));

    client
        .write_all(&pg_startup(&[("user", "alice"), ("database", "app")]))
        .await
        .unwrap();
    let details = pg_details("localhost", "verify-full", Some(&pki.ca_pem));
    let backend = connector::connect(Protocol::Postgres, &mut proxy_client, &details, &dialer)
        .await
        .unwrap();
    assert!(backend.is_tls());

    let mut frame = [0u8; 9];
    client.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame, PG_AUTH_OK);
    server.await.unwrap();
}

#[tokio::test]
async fn test_scram_plus_binding_uses_sha384_certificate_hash() {
    let pki = pki_with(&rcgen::PKCS_ECDSA_P384_SHA384);
    let (dialer, backend) = DuplexDialer::pair();
    let (mut proxy_client, mut client) = tokio::io::duplex(BUFFER);
    let expected_binding = end_point_binding(&Sha384::digest(pki.leaf.as_ref()));
    assert_eq!(expected_binding.len(), "p=tls-server-end-point,,".len() + 48);

    let server = tokio::spawn(serve_scram_plus(backend, pki.acceptor.clone(), expected_binding));

    client
        .write_all(&pg_startup(&[("user", "alice"), ("database", "app")]))
        .await
        .unwrap();
    let details = pg_details("localhost", "require", None);
    let backend = connector::connect(Protocol::Postgres, &mut proxy_client, &details, &dialer)
        .await
        .unwrap();
    assert!(backend.is_tls());

    let mut frame = [0u8; 9];
    client.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame, PG_AUTH_OK);
    server.await.unwrap();
}

#[tokio::test]
async fn test_postgres_scram_over_tls_without_plus() {
    let pki = pki();
    let (dialer, backend) = DuplexDialer::pair();
    let (mut proxy_client, mut client) = tokio::io::duplex(BUFFER);

    let acceptor = pki.acceptor.clone();
    let server = tokio::spawn(async move {
        let mut tls = pg_accept_tls(backend, acceptor).await.unwrap();
        pg_read_startup(&mut tls).await;
        pg_send(
            &mut tls,
            BackendMessage::Authentication(AuthenticationMessage::Sasl {
                mechanisms: vec!["SCRAM-SHA-256".into()],
            }),
        )
        .await;
        let (_, body) = pg_read_message(&mut tls).await;
        let nul = body.iter().position(|b| *b == 0).unwrap();
        let client_first = String::from_utf8(body[nul + 5..].to_vec()).unwrap();
        assert!(client_first.starts_with("y,,"));

        let mut scram = ScramServer::new("s3cret");
        let server_first = scram.server_first(&client_first);
        pg_send(
            &mut tls,
            BackendMessage::Authentication(AuthenticationMessage::SaslContinue {
                data: server_first.into_bytes(),
            }),
        )
        .await;
        let (_, client_final) = pg_read_message(&mut tls).await;
        let outcome = scram.server_final(&String::from_utf8(client_final).unwrap());
        assert!(outcome.proof_valid);
        assert_eq!(outcome.channel_binding, b"y,,");
        pg_send(
            &mut tls,
            BackendMessage::Authentication(AuthenticationMessage::SaslFinal {
                data: outcome.server_final.into_bytes(),
            }),
        )
        .await;
        pg_send(&mut tls, BackendMessage::Authentication(AuthenticationMessage::Ok)).await;
        tls
    });

    client
        .write_all(&pg_startup(&[("user", "alice"), ("database", "app")]))
        .await
        .unwrap();
    let details = pg_details("db.internal", "require", None);
    connector::connect(Protocol::Postgres, &mut proxy_client, &details, &dialer)
        .await
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_verify_full_rejects_hostname_mismatch() {
    let pki = pki();
    let (dialer, backend) = DuplexDialer::pair();
    let (mut proxy_client, mut client) = tokio::io::duplex(BUFFER);

    let acceptor = pki.acceptor.clone();
    let server = tokio::spawn(async move {
        let _ = pg_accept_tls(backend, acceptor).await;
    });

    client
        .write_all(&pg_startup(&[("user", "alice"), ("database", "app")]))
        .await
        .unwrap();
    let details = pg_details("db.internal", "verify-full", Some(&pki.ca_pem));
    let err = connector::connect(Protocol::Postgres, &mut proxy_client, &details, &dialer)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SslNegotiationFailure);
    server.await.unwrap();
}

#[tokio::test]
async fn test_verify_ca_ignores_hostname() {
    let pki = pki();
    let (dialer, backend) = DuplexDialer::pair();
    let (mut proxy_client, mut client) = tokio::io::duplex(BUFFER);

    let acceptor = pki.acceptor.clone();
    let server = tokio::spawn(async move {
        let mut tls = pg_accept_tls(backend, acceptor).await.unwrap();
        pg_read_startup(&mut tls).await;
        pg_send(&mut tls, BackendMessage::Authentication(AuthenticationMessage::Ok)).await;
        tls
    });

    client
        .write_all(&pg_startup(&[("user", "alice"), ("database", "app")]))
        .await
        .unwrap();
    let details = pg_details("db.internal", "verify-ca", Some(&pki.ca_pem));
    connector::connect(Protocol::Postgres, &mut proxy_client, &details, &dialer)
        .await
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_verify_ca_rejects_unknown_issuer() {
    let pki = pki();
    let other = pki_other_ca();
    let (dialer, backend) = DuplexDialer::pair();
    let (mut proxy_client, mut client) = tokio::io::duplex(BUFFER);

    let acceptor = pki.acceptor.clone();
    let server = tokio::spawn(async move {
        let _ = pg_accept_tls(backend, acceptor).await;
    });

    client
        .write_all(&pg_startup(&[("user", "alice"), ("database", "app")]))
        .await
        .unwrap();
    let details = pg_details("localhost", "verify-ca", Some(&other));
    let err = connector::connect(Protocol::Postgres, &mut proxy_client, &details, &dialer)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SslNegotiationFailure);
    server.await.unwrap();
}

#[tokio::test]
async fn test_legacy_ca_fallback_verifies_require() {
    let pki = pki();
    let other = pki_other_ca();
    let (dialer, backend) = DuplexDialer::pair();
    let (mut proxy_client, mut client) = tokio::io::duplex(BUFFER);

    let acceptor = pki.acceptor.clone();
    let server = tokio::spawn(async move {
        let _ = pg_accept_tls(backend, acceptor).await;
    });

    client
        .write_all(&pg_startup(&[("user", "alice"), ("database", "app")]))
        .await
        .unwrap();
    let details = pg_details("localhost", "require", Some(&other));
    let err = connector::connect(Protocol::Postgres, &mut proxy_client, &details, &dialer)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SslNegotiationFailure);
    server.await.unwrap();
}

#[tokio::test]
async fn test_garbage_root_pem_is_ssl_failure() {
    let pki = pki();
    let (dialer, backend) = DuplexDialer::pair();
    let (mut proxy_client, mut client) = tokio::io::duplex(BUFFER);

    let acceptor = pki.acceptor.clone();
    let server = tokio::spawn(async move {
        let _ = pg_accept_tls(backend, acceptor).await;
    });

    client
        .write_all(&pg_startup(&[("user", "alice"), ("database", "app")]))
        .await
        .unwrap();
    let details = pg_details("localhost", "verify-ca", Some("not a certificate"));
    let err = connector::connect(Protocol::Postgres, &mut proxy_client, &details, &dialer)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SslNegotiationFailure);
    server.await.unwrap();
}

#[tokio::test]
async fn test_mysql_tls_upgrade() {
    let pki = pki();
    let (dialer, backend) = DuplexDialer::pair();
    let (mut proxy_client, client) = tokio::io::duplex(BUFFER);

    let acceptor = pki.acceptor.clone();
    let server = tokio::spawn(async move {
        let mut server = Connection::client(backend);
        mysql_send(&mut server, &mysql_greeting("caching_sha2_password", MYSQL_SALT, true)).await;

        let ssl_request = server.read_packet().await.unwrap();
        assert_eq!(ssl_request.payload_length(), 32);
        assert_eq!(ssl_request.sequence_id(), 1);
        let caps = u32::from_le_bytes(ssl_request.payload()[..4].try_into().unwrap());
        assert_ne!(caps & CLIENT_SSL, 0);

        let (stream, seq) = server.into_parts();
        let tls = acceptor.accept(stream).await.unwrap();
        let mut server = Connection::resume(Side::Client, tls, seq);

        let response = HandshakeResponse41::unpack(&server.read_packet().await.unwrap()).unwrap();
        assert_eq!(response.sequence_id, 2);
        assert_eq!(response.username, "svc_app");
        assert_ne!(response.capability_flags & CLIENT_SSL, 0);

        mysql_send(&mut server, &[0x01, 0x04]).await;
        let password = server.read_packet().await.unwrap();
        assert_eq!(password.payload(), b"s3cret\0");
        mysql_send(&mut server, &mysql_ok()).await;
        server
    });

    let client_task = tokio::spawn(async move {
        let mut client = Connection::client(client);
        client.read_packet().await.unwrap();
        mysql_send(&mut client, &mysql_client_response("alice", &[0; 20], "app")).await;
        let ok = client.read_packet().await.unwrap();
        assert_eq!(ok.first_byte(), Some(0x00));
        assert_eq!(ok.sequence_id(), 2);
    });

    let details = ConnectionDetails::new("localhost", 3306, "svc_app", "s3cret")
        .with_option("sslmode", "verify-full")
        .with_option("sslrootcert", pki.ca_pem.clone());
    let backend = connector::connect(Protocol::MySql, &mut proxy_client, &details, &dialer)
        .await
        .unwrap();
    assert!(backend.is_tls());
    client_task.await.unwrap();
    server.await.unwrap();
}

/// PEM of an unrelated CA
fn pki_other_ca() -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, "someone else");
    params.self_signed(&key).unwrap().pem()
}
