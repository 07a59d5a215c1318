//! Protocol message types

/// First message a client sends, before any typed traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupRequest {
    /// Regular startup message
    Startup(StartupMessage),

    /// Client asks for TLS
    SslRequest,

    /// Client asks for GSSAPI encryption
    GssEncRequest,

    /// Client wants to cancel a running query on another connection
    CancelRequest {
        /// Backend process ID
        process_id: i32,
        /// Cancellation key
        secret_key: i32,
    },
}

/// Startup message: protocol version and connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    /// Protocol version
    pub version: i32,
    /// Connection parameters, in the order sent
    pub params: Vec<(String, String)>,
}

impl StartupMessage {
    /// Look up a parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Frontend message (proxy → server)
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// Startup message
    Startup {
        /// Protocol version
        version: i32,
        /// Connection parameters
        params: Vec<(String, String)>,
    },

    /// Password message (cleartext or md5 digest)
    Password(String),

    /// SASL initial response message
    SaslInitialResponse {
        /// SASL mechanism name (e.g., "SCRAM-SHA-256")
        mechanism: String,
        /// SASL client first message data
        data: Vec<u8>,
    },

    /// SASL response message
    SaslResponse {
        /// SASL client final message data
        data: Vec<u8>,
    },

    /// SSLRequest message (TLS negotiation)
    SslRequest,
}

/// Backend message (server → client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationMessage),

    /// Backend key data (for cancellation)
    BackendKeyData {
        /// Process ID
        process_id: i32,
        /// Secret key
        secret_key: i32,
    },

    /// Error response
    ErrorResponse(ErrorFields),

    /// Notice response
    NoticeResponse(ErrorFields),

    /// Server supports an older minor version or ignored some options
    NegotiateProtocolVersion {
        /// Newest minor version the server supports
        newest_minor: i32,
        /// Options the server did not recognise
        unrecognized: Vec<String>,
    },

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery {
        /// Transaction status
        status: u8,
    },
}

/// Authentication message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMessage {
    /// Authentication OK
    Ok,

    /// Kerberos V5 required
    KerberosV5,

    /// Cleartext password required
    CleartextPassword,

    /// MD5 password required
    Md5Password {
        /// Salt for MD5 hash
        salt: [u8; 4],
    },

    /// SCM credentials required
    ScmCredential,

    /// GSSAPI required
    Gss,

    /// GSSAPI or SSPI continuation
    GssContinue {
        /// Opaque mechanism data
        data: Vec<u8>,
    },

    /// SSPI required
    Sspi,

    /// SASL authentication mechanisms available (Postgres 10+)
    Sasl {
        /// List of SASL mechanism names (e.g., ["SCRAM-SHA-256"])
        mechanisms: Vec<String>,
    },

    /// SASL continuation message (server challenge)
    SaslContinue {
        /// SASL server first/continue message data
        data: Vec<u8>,
    },

    /// SASL final message (server verification)
    SaslFinal {
        /// SASL server final message data
        data: Vec<u8>,
    },

    /// A request code this proxy does not know
    Unknown(i32),
}

impl AuthenticationMessage {
    /// Name used in logs and errors
    pub fn method_name(&self) -> String {
        match self {
            Self::Ok => "ok".into(),
            Self::KerberosV5 => "KerberosV5".into(),
            Self::CleartextPassword => "cleartext password".into(),
            Self::Md5Password { .. } => "md5".into(),
            Self::ScmCredential => "SCM credential".into(),
            Self::Gss => "GSSAPI".into(),
            Self::GssContinue { .. } => "GSSAPI continue".into(),
            Self::Sspi => "SSPI".into(),
            Self::Sasl { .. } => "SASL".into(),
            Self::SaslContinue { .. } => "SASL continue".into(),
            Self::SaslFinal { .. } => "SASL final".into(),
            Self::Unknown(code) => format!("unknown request {}", code),
        }
    }
}

/// Error/notice fields, in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// (field type, value) pairs
    pub fields: Vec<(u8, String)>,
}

impl ErrorFields {
    /// Field by type byte
    pub fn get(&self, field_type: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| *t == field_type)
            .map(|(_, v)| v.as_str())
    }

    /// Append a field
    pub fn push(mut self, field_type: u8, value: impl Into<String>) -> Self {
        self.fields.push((field_type, value.into()));
        self
    }

    /// Severity (ERROR, FATAL, ...)
    pub fn severity(&self) -> Option<&str> {
        self.get(b'S')
    }

    /// SQLSTATE code
    pub fn code(&self) -> Option<&str> {
        self.get(b'C')
    }

    /// Human-readable message
    pub fn message(&self) -> Option<&str> {
        self.get(b'M')
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(msg) = self.message() {
            write!(f, "{}", msg)?;
        }
        if let Some(code) = self.code() {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}
