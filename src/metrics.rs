//! Metrics instrumentation
//!
//! Thin wrappers around the `metrics` facade. The library never installs a
//! recorder; embedders pick an exporter and these calls become no-ops otherwise.

/// Label values shared across metrics
pub mod labels {
    /// MySQL protocol label
    pub const PROTOCOL_MYSQL: &str = "mysql";
    /// PostgreSQL protocol label
    pub const PROTOCOL_POSTGRES: &str = "pg";

    /// mysql_native_password
    pub const MECHANISM_MYSQL_NATIVE: &str = "mysql_native_password";
    /// caching_sha2_password
    pub const MECHANISM_CACHING_SHA2: &str = "caching_sha2_password";
    /// Postgres cleartext password
    pub const MECHANISM_CLEARTEXT: &str = "cleartext";
    /// Postgres md5 password
    pub const MECHANISM_MD5: &str = "md5";
    /// Postgres SCRAM-SHA-256
    pub const MECHANISM_SCRAM: &str = "scram-sha-256";
    /// Backend accepted without a challenge
    pub const MECHANISM_TRUST: &str = "trust";

    /// Client to backend
    pub const DIRECTION_UPSTREAM: &str = "client_to_backend";
    /// Backend to client
    pub const DIRECTION_DOWNSTREAM: &str = "backend_to_client";
}

/// Counter metrics
pub mod counters {
    /// A client connection was accepted
    pub fn session_accepted(protocol: &'static str) {
        metrics::counter!("credwire_sessions_accepted_total", "protocol" => protocol).increment(1);
    }

    /// The backend handshake completed and the pipe started
    pub fn handshake_succeeded(protocol: &'static str) {
        metrics::counter!("credwire_handshakes_total", "protocol" => protocol, "result" => "ok")
            .increment(1);
    }

    /// The backend handshake failed
    pub fn handshake_failed(protocol: &'static str, kind: &'static str) {
        metrics::counter!(
            "credwire_handshakes_total",
            "protocol" => protocol,
            "result" => "error",
            "kind" => kind
        )
        .increment(1);
    }

    /// An authentication mechanism was used against the backend
    pub fn auth_mechanism(protocol: &'static str, mechanism: &'static str) {
        metrics::counter!(
            "credwire_auth_mechanism_total",
            "protocol" => protocol,
            "mechanism" => mechanism
        )
        .increment(1);
    }

    /// Bytes copied by the pipe
    pub fn bytes_piped(direction: &'static str, bytes: u64) {
        metrics::counter!("credwire_piped_bytes_total", "direction" => direction).increment(bytes);
    }
}

/// Histogram metrics
pub mod histograms {
    /// Time from backend dial to authenticated backend socket
    pub fn handshake_duration(protocol: &'static str, duration_ms: u64) {
        metrics::histogram!("credwire_handshake_duration_ms", "protocol" => protocol)
            .record(duration_ms as f64);
    }

    /// Lifetime of a piped session
    pub fn session_duration(protocol: &'static str, duration_ms: u64) {
        metrics::histogram!("credwire_session_duration_ms", "protocol" => protocol)
            .record(duration_ms as f64);
    }
}
