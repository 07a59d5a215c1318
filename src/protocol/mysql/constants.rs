//! MySQL protocol constants

/// Largest payload a single frame can carry (2^24 - 1)
pub const MAX_PAYLOAD_LENGTH: usize = 0xFF_FFFF;

/// Frame header size: 3-byte length + 1-byte sequence id
pub const HEADER_LENGTH: usize = 4;

/// Protocol version carried by HandshakeV10
pub const HANDSHAKE_PROTOCOL_VERSION: u8 = 10;

/// Size of the fixed prefix of HandshakeResponse41 that doubles as the SSL request:
/// capabilities (4) + max packet size (4) + charset (1) + reserved (23)
pub const SSL_REQUEST_PAYLOAD_LENGTH: usize = 32;

/// Minimum length of the second salt part
pub const SALT_PART2_MIN_LENGTH: usize = 13;

/// Capability flags
pub mod capabilities {
    /// Long passwords
    pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
    /// Database name in the handshake response
    pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
    /// 4.1 protocol
    pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
    /// Switch to TLS after the SSL request
    pub const CLIENT_SSL: u32 = 0x0000_0800;
    /// 4.1 authentication (salted response with a length byte)
    pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
    /// Authentication plugins
    pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
    /// Connection attributes
    pub const CLIENT_CONNECT_ATTRS: u32 = 0x0010_0000;
    /// Length-encoded auth response
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;
    /// Session state tracking in OK packets
    pub const CLIENT_SESSION_TRACK: u32 = 0x0080_0000;
}

/// First payload byte of server responses during the connection phase
pub mod response {
    /// OK packet
    pub const OK: u8 = 0x00;
    /// AuthMoreData
    pub const AUTH_MORE_DATA: u8 = 0x01;
    /// Auth switch request (or EOF outside the connection phase)
    pub const AUTH_SWITCH_REQUEST: u8 = 0xFE;
    /// ERR packet
    pub const ERR: u8 = 0xFF;
}

/// caching_sha2_password exchange bytes
pub mod caching_sha2 {
    /// Client asks for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Cached credential matched
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Server needs the full password
    pub const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;
}

/// Authentication plugin names
pub mod plugins {
    /// SHA1 challenge-response
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    /// SHA256 challenge-response with full-auth fallback
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
}

/// Client error codes used for proxy-generated ERR packets
pub mod error_codes {
    /// CR_UNKNOWN_ERROR
    pub const UNKNOWN_ERROR: u16 = 2000;
    /// CR_SSL_CONNECTION_ERROR
    pub const SSL_CONNECTION_ERROR: u16 = 2026;
    /// CR_MALFORMED_PACKET
    pub const MALFORMED_PACKET: u16 = 2027;
    /// ER_ACCESS_DENIED_ERROR
    pub const ACCESS_DENIED: u16 = 1045;
    /// ER_NOT_SUPPORTED_AUTH_MODE
    pub const NOT_SUPPORTED_AUTH_MODE: u16 = 1251;
}
