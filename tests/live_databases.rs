//! Tests against a real database
//!
//! ```bash
//! export CREDWIRE_TEST_PG_HOST=localhost
//! export CREDWIRE_TEST_PG_USER=postgres
//! export CREDWIRE_TEST_PG_PASSWORD=postgres
//! export CREDWIRE_TEST_PG_DATABASE=postgres
//! # optional: CREDWIRE_TEST_PG_PORT, CREDWIRE_TEST_PG_SSLMODE (default disable)
//! cargo test --test live_databases -- --ignored --nocapture
//! ```

use credwire::connector::Protocol;
use credwire::proxy::{ProxyService, StaticCredentials};
use std::collections::HashMap;
use std::env;
use tokio::net::TcpListener;

fn pg_credentials() -> Option<(HashMap<String, String>, String)> {
    let mut credentials = HashMap::new();
    credentials.insert("host".to_string(), env::var("CREDWIRE_TEST_PG_HOST").ok()?);
    credentials.insert("username".to_string(), env::var("CREDWIRE_TEST_PG_USER").ok()?);
    credentials.insert("password".to_string(), env::var("CREDWIRE_TEST_PG_PASSWORD").ok()?);
    if let Ok(port) = env::var("CREDWIRE_TEST_PG_PORT") {
        credentials.insert("port".to_string(), port);
    }
    credentials.insert(
        "sslmode".to_string(),
        env::var("CREDWIRE_TEST_PG_SSLMODE").unwrap_or_else(|_| "disable".to_string()),
    );
    let database = env::var("CREDWIRE_TEST_PG_DATABASE").unwrap_or_else(|_| "postgres".into());
    Some((credentials, database))
}

async fn start_proxy(credentials: HashMap<String, String>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let service = ProxyService::new(Protocol::Postgres, StaticCredentials::new(credentials));
        service
            .serve(listener, std::future::pending::<()>())
            .await
            .unwrap();
    });
    port
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_live_postgres_query_through_proxy() {
    let Some((credentials, database)) = pg_credentials() else {
        eprintln!("Skipping test: CREDWIRE_TEST_PG_HOST not set");
        return;
    };
    let port = start_proxy(credentials).await;

    let conn_str = format!(
        "host=127.0.0.1 port={} user=nobody password=ignored dbname={}",
        port, database
    );
    let (client, connection) = tokio_postgres::connect(&conn_str, tokio_postgres::NoTls)
        .await
        .expect("connect through proxy");
    tokio::spawn(connection);

    let row = client.query_one("SELECT 1::INT4 + 1", &[]).await.unwrap();
    let value: i32 = row.get(0);
    assert_eq!(value, 2);

    let row = client.query_one("SELECT current_user", &[]).await.unwrap();
    let user: String = row.get(0);
    assert_ne!(user, "nobody");
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_live_postgres_wrong_password_is_rejected() {
    let Some((mut credentials, database)) = pg_credentials() else {
        eprintln!("Skipping test: CREDWIRE_TEST_PG_HOST not set");
        return;
    };
    credentials.insert("password".to_string(), "definitely-wrong".to_string());
    let port = start_proxy(credentials).await;

    let conn_str = format!("host=127.0.0.1 port={} user=nobody dbname={}", port, database);
    let err = tokio_postgres::connect(&conn_str, tokio_postgres::NoTls)
        .await
        .err()
        .expect("connection must fail");
    let db_err = err.as_db_error().expect("server error frame");
    assert_eq!(db_err.code().code(), "28P01");
}
