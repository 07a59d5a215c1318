//! Postgres protocol constants

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// SSLRequest code (80877103 = 1234 << 16 | 5679)
pub const SSL_REQUEST_CODE: i32 = 0x04D2_162F;

/// GSSENCRequest code (80877104 = 1234 << 16 | 5680)
pub const GSSENC_REQUEST_CODE: i32 = 0x04D2_1630;

/// CancelRequest code (80877102 = 1234 << 16 | 5678)
pub const CANCEL_REQUEST_CODE: i32 = 0x04D2_162E;

/// Maximum message length (1 GB), matching PostgreSQL's own `PQ_LARGE_MESSAGE_LIMIT`.
///
/// Any message whose length field exceeds this value is rejected before allocation.
pub const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Maximum startup packet length, matching the server's `MAX_STARTUP_PACKET_LENGTH`
pub const MAX_STARTUP_LENGTH: usize = 10_000;

/// Smallest valid startup packet: length + protocol code
pub const MIN_STARTUP_LENGTH: usize = 8;

/// Single-byte answers to SSLRequest / GSSENCRequest
pub mod ssl_response {
    /// Encryption accepted
    pub const ALLOW: u8 = b'S';
    /// Encryption refused
    pub const DENY: u8 = b'N';
}

/// Message type tags
pub mod tags {
    /// Authentication request
    pub const AUTHENTICATION: u8 = b'R';

    /// Backend key data
    pub const BACKEND_KEY_DATA: u8 = b'K';

    /// Error response
    pub const ERROR_RESPONSE: u8 = b'E';

    /// Notice response
    pub const NOTICE_RESPONSE: u8 = b'N';

    /// Protocol minor version negotiation
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';

    /// Parameter status
    pub const PARAMETER_STATUS: u8 = b'S';

    /// Ready for query
    pub const READY_FOR_QUERY: u8 = b'Z';

    /// Password, SASLInitialResponse and SASLResponse share this tag
    pub const PASSWORD_MESSAGE: u8 = b'p';
}

/// Authentication types
pub mod auth {
    /// Authentication successful
    pub const OK: i32 = 0;

    /// Kerberos V5
    pub const KERBEROS_V5: i32 = 2;

    /// Cleartext password required
    pub const CLEARTEXT_PASSWORD: i32 = 3;

    /// MD5 password required
    pub const MD5_PASSWORD: i32 = 5;

    /// SCM credentials
    pub const SCM_CREDENTIAL: i32 = 6;

    /// GSSAPI
    pub const GSS: i32 = 7;

    /// GSSAPI or SSPI continuation
    pub const GSS_CONTINUE: i32 = 8;

    /// SSPI
    pub const SSPI: i32 = 9;

    /// SASL mechanisms available (Postgres 10+)
    pub const SASL: i32 = 10;

    /// SASL server challenge
    pub const SASL_CONTINUE: i32 = 11;

    /// SASL server final message
    pub const SASL_FINAL: i32 = 12;
}

/// SQLSTATE codes used in proxy-generated errors
pub mod sqlstate {
    /// invalid_authorization_specification
    pub const INVALID_AUTHORIZATION_SPECIFICATION: &str = "28000";
    /// invalid_password
    pub const INVALID_PASSWORD: &str = "28P01";
    /// protocol_violation
    pub const PROTOCOL_VIOLATION: &str = "08P01";
    /// internal_error
    pub const INTERNAL_ERROR: &str = "XX000";
}

/// SASL mechanism names
pub mod sasl {
    /// SCRAM-SHA-256
    pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";
    /// SCRAM-SHA-256 with channel binding
    pub const SCRAM_SHA_256_PLUS: &str = "SCRAM-SHA-256-PLUS";
}
