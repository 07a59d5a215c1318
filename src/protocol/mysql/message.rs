//! Typed MySQL connection-phase messages
//!
//! Every message unpacks from a [`Packet`] and packs back into one. Messages that
//! the proxy edits remember the field sizes they were read with, so packing after
//! an edit derives the new header length from the original one through
//! [`LengthPatch`].

use super::constants::{
    capabilities::*, plugins, response, HANDSHAKE_PROTOCOL_VERSION, SALT_PART2_MIN_LENGTH,
};
use super::packet::Packet;
use crate::protocol::primitives::{
    lenenc_int_len, put_lenenc_bytes, put_lenenc_int, put_nul_bytes, LengthPatch, Reader,
};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Size of the first salt part in HandshakeV10
const SALT_PART1_LENGTH: usize = 8;

/// Server greeting (HandshakeV10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeV10 {
    /// Sequence id of the frame
    pub sequence_id: u8,
    /// Always 10
    pub protocol_version: u8,
    /// Human-readable server version
    pub server_version: String,
    /// Server thread id
    pub connection_id: u32,
    /// Full salt (both parts, trailing NUL removed)
    pub salt: Vec<u8>,
    /// Filler byte after the first salt part
    pub filler: u8,
    /// Server capability flags (lower and upper halves combined)
    pub capability_flags: u32,
    /// Default collation
    pub character_set: u8,
    /// Server status flags
    pub status_flags: u16,
    /// Announced length of the auth plugin data
    pub auth_plugin_data_len: u8,
    /// Reserved bytes
    pub reserved: [u8; 10],
    /// Default authentication plugin (empty without CLIENT_PLUGIN_AUTH)
    pub auth_plugin: String,
    plugin_terminated: bool,
    extra: Vec<u8>,
    original: Option<HandshakeLayout>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HandshakeLayout {
    payload_len: usize,
    server_version_field: usize,
    plugin_field: usize,
}

impl HandshakeV10 {
    /// Parse a server greeting
    pub fn unpack(packet: &Packet) -> Result<Self> {
        let mut r = Reader::new(packet.payload());

        let protocol_version = r.u8()?;
        if protocol_version != HANDSHAKE_PROTOCOL_VERSION {
            return Err(Error::Protocol(format!(
                "unsupported handshake protocol version {}",
                protocol_version
            )));
        }
        let server_version = r.nul_string()?;
        let connection_id = r.u32_le()?;
        let mut salt = r.bytes(SALT_PART1_LENGTH)?.to_vec();
        let filler = r.u8()?;
        let caps_lower = r.u16_le()?;
        let character_set = r.u8()?;
        let status_flags = r.u16_le()?;
        let caps_upper = r.u16_le()?;
        let capability_flags = u32::from(caps_upper) << 16 | u32::from(caps_lower);
        let auth_plugin_data_len = r.u8()?;
        let mut reserved = [0u8; 10];
        reserved.copy_from_slice(r.bytes(10)?);

        if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let part2 = r.bytes(salt_part2_len(auth_plugin_data_len))?;
            let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
            salt.extend_from_slice(part2);
        }

        let (auth_plugin, plugin_terminated) = if capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            let (name, terminated) = r.nul_bytes_or_rest();
            (String::from_utf8_lossy(name).into_owned(), terminated)
        } else {
            (String::new(), true)
        };
        let extra = r.rest().to_vec();

        let mut handshake = Self {
            sequence_id: packet.sequence_id(),
            protocol_version,
            server_version,
            connection_id,
            salt,
            filler,
            capability_flags,
            character_set,
            status_flags,
            auth_plugin_data_len,
            reserved,
            auth_plugin,
            plugin_terminated,
            extra,
            original: None,
        };
        handshake.original = Some(HandshakeLayout {
            payload_len: packet.payload_length(),
            server_version_field: handshake.server_version_field_len(),
            plugin_field: handshake.plugin_field_len(),
        });
        Ok(handshake)
    }

    /// Serialize, patching the header length for any edited variable fields
    pub fn pack(&self) -> Result<Packet> {
        if self.salt.len() < SALT_PART1_LENGTH {
            return Err(Error::Protocol(format!(
                "salt must be at least {} bytes",
                SALT_PART1_LENGTH
            )));
        }

        let mut buf = BytesMut::with_capacity(128);
        buf.put_u8(self.protocol_version);
        put_nul_bytes(&mut buf, self.server_version.as_bytes());
        buf.put_u32_le(self.connection_id);
        buf.put_slice(&self.salt[..SALT_PART1_LENGTH]);
        buf.put_u8(self.filler);
        buf.put_u16_le((self.capability_flags & 0xFFFF) as u16);
        buf.put_u8(self.character_set);
        buf.put_u16_le(self.status_flags);
        buf.put_u16_le((self.capability_flags >> 16) as u16);
        buf.put_u8(self.auth_plugin_data_len);
        buf.put_slice(&self.reserved);

        if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let part2 = &self.salt[SALT_PART1_LENGTH..];
            let width = salt_part2_len(self.auth_plugin_data_len);
            if part2.len() > width {
                return Err(Error::Protocol("salt longer than announced".into()));
            }
            buf.put_slice(part2);
            buf.put_bytes(0, width - part2.len());
        }
        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.put_slice(self.auth_plugin.as_bytes());
            if self.plugin_terminated {
                buf.put_u8(0);
            }
        }
        buf.put_slice(&self.extra);

        let header_length = match self.original {
            Some(layout) => LengthPatch::new(layout.payload_len)
                .field(layout.server_version_field, self.server_version_field_len())
                .field(layout.plugin_field, self.plugin_field_len())
                .resolve()?,
            None => buf.len(),
        };
        Packet::build(self.sequence_id, &buf, header_length)
    }

    /// Whether the server offers TLS
    pub fn supports_tls(&self) -> bool {
        self.capability_flags & CLIENT_SSL != 0
    }

    /// Copy relayed to the client: TLS bit cleared, plugin forced to
    /// `mysql_native_password`. The client-facing leg is always plaintext and
    /// the client's own credential is never used.
    pub fn for_client(&self) -> Self {
        let mut relayed = self.clone();
        relayed.capability_flags &= !CLIENT_SSL;
        if relayed.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            relayed.auth_plugin = plugins::MYSQL_NATIVE_PASSWORD.to_string();
            relayed.plugin_terminated = true;
        }
        relayed
    }

    fn server_version_field_len(&self) -> usize {
        self.server_version.len() + 1
    }

    fn plugin_field_len(&self) -> usize {
        if self.capability_flags & CLIENT_PLUGIN_AUTH == 0 {
            return 0;
        }
        self.auth_plugin.len() + usize::from(self.plugin_terminated)
    }
}

fn salt_part2_len(auth_plugin_data_len: u8) -> usize {
    usize::from(auth_plugin_data_len)
        .saturating_sub(SALT_PART1_LENGTH)
        .max(SALT_PART2_MIN_LENGTH)
}

/// Client reply to the greeting (HandshakeResponse41)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse41 {
    /// Sequence id of the frame
    pub sequence_id: u8,
    /// Client capability flags
    pub capability_flags: u32,
    /// Largest packet the client accepts
    pub max_packet_size: u32,
    /// Requested collation
    pub character_set: u8,
    /// Reserved bytes
    pub reserved: [u8; 23],
    /// Login user
    pub username: String,
    /// Challenge response computed by the client
    pub auth_response: Vec<u8>,
    /// Initial schema (CLIENT_CONNECT_WITH_DB)
    pub database: Option<String>,
    /// Plugin the response was computed with (CLIENT_PLUGIN_AUTH)
    pub auth_plugin: Option<String>,
    /// Connection attributes and anything else after the plugin name
    pub tail: Vec<u8>,
    plugin_terminated: bool,
    original: Option<ResponseLayout>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResponseLayout {
    payload_len: usize,
    username_field: usize,
    auth_field: usize,
    plugin_field: usize,
}

impl HandshakeResponse41 {
    /// Parse a client reply.
    ///
    /// Only protocol 4.1 clients are accepted.
    pub fn unpack(packet: &Packet) -> Result<Self> {
        let mut r = Reader::new(packet.payload());

        let capability_flags = r.u32_le()?;
        if capability_flags & CLIENT_PROTOCOL_41 == 0 {
            return Err(Error::Protocol(
                "client does not support protocol 4.1".into(),
            ));
        }
        let max_packet_size = r.u32_le()?;
        let character_set = r.u8()?;
        let mut reserved = [0u8; 23];
        reserved.copy_from_slice(r.bytes(23)?);
        let username = r.nul_string()?;

        let auth_response = if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            r.lenenc_bytes()?.to_vec()
        } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = r.u8()?;
            r.bytes(usize::from(len))?.to_vec()
        } else {
            r.nul_bytes()?.to_vec()
        };

        let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 && !r.is_empty() {
            Some(r.nul_string()?)
        } else {
            None
        };

        let (auth_plugin, plugin_terminated) =
            if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !r.is_empty() {
                let (name, terminated) = r.nul_bytes_or_rest();
                (Some(String::from_utf8_lossy(name).into_owned()), terminated)
            } else {
                (None, true)
            };
        let tail = r.rest().to_vec();

        let mut resp = Self {
            sequence_id: packet.sequence_id(),
            capability_flags,
            max_packet_size,
            character_set,
            reserved,
            username,
            auth_response,
            database,
            auth_plugin,
            tail,
            plugin_terminated,
            original: None,
        };
        resp.original = Some(ResponseLayout {
            payload_len: packet.payload_length(),
            username_field: resp.username_field_len(),
            auth_field: resp.auth_field_len(),
            plugin_field: resp.plugin_field_len(),
        });
        Ok(resp)
    }

    /// Serialize, patching the header length for edited fields
    pub fn pack(&self) -> Result<Packet> {
        let mut buf = BytesMut::with_capacity(128 + self.tail.len());
        self.put_fixed_prefix(&mut buf);
        put_nul_bytes(&mut buf, self.username.as_bytes());

        if self.capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            put_lenenc_bytes(&mut buf, &self.auth_response);
        } else if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = u8::try_from(self.auth_response.len()).map_err(|_| {
                Error::Protocol("auth response too long for a one-byte length".into())
            })?;
            buf.put_u8(len);
            buf.put_slice(&self.auth_response);
        } else {
            put_nul_bytes(&mut buf, &self.auth_response);
        }

        if self.capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            if let Some(db) = &self.database {
                put_nul_bytes(&mut buf, db.as_bytes());
            }
        }
        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            if let Some(plugin) = &self.auth_plugin {
                buf.put_slice(plugin.as_bytes());
                if self.plugin_terminated {
                    buf.put_u8(0);
                }
            }
        }
        buf.put_slice(&self.tail);

        let header_length = match self.original {
            Some(layout) => self.patched_length(layout)?,
            None => buf.len(),
        };
        Packet::build(self.sequence_id, &buf, header_length)
    }

    /// Header length after edits: original length plus the size change of the
    /// username, auth response and plugin name fields
    fn patched_length(&self, layout: ResponseLayout) -> Result<usize> {
        LengthPatch::new(layout.payload_len)
            .field(layout.username_field, self.username_field_len())
            .field(layout.auth_field, self.auth_field_len())
            .field(layout.plugin_field, self.plugin_field_len())
            .resolve()
    }

    /// The truncated frame sent before a TLS upgrade: capability flags, max
    /// packet size, charset and reserved bytes only
    pub fn ssl_request(&self) -> Result<Packet> {
        let mut buf = BytesMut::with_capacity(32);
        self.put_fixed_prefix(&mut buf);
        Packet::new(self.sequence_id, &buf)
    }

    /// Whether this response asks the server to switch to TLS
    pub fn requests_tls(&self) -> bool {
        self.capability_flags & CLIENT_SSL != 0
    }

    /// Replace the login with the real credential
    pub fn inject_credentials(&mut self, username: &str, auth_response: Vec<u8>, plugin: &str) {
        self.username = username.to_string();
        self.auth_response = auth_response;
        self.auth_plugin = Some(plugin.to_string());
        self.plugin_terminated = true;
    }

    fn put_fixed_prefix(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.capability_flags);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.character_set);
        buf.put_slice(&self.reserved);
    }

    fn username_field_len(&self) -> usize {
        self.username.len() + 1
    }

    fn auth_field_len(&self) -> usize {
        let len = self.auth_response.len();
        if self.capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            lenenc_int_len(len as u64) + len
        } else if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            1 + len
        } else {
            len + 1
        }
    }

    fn plugin_field_len(&self) -> usize {
        match &self.auth_plugin {
            Some(name) if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 => {
                name.len() + usize::from(self.plugin_terminated)
            }
            _ => 0,
        }
    }
}

/// OK packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    /// Sequence id of the frame
    pub sequence_id: u8,
    /// Rows affected by the last statement
    pub affected_rows: u64,
    /// Last generated id
    pub last_insert_id: u64,
    /// Server status flags
    pub status_flags: u16,
    /// Warning count
    pub warnings: u16,
    /// Human readable info and session state, kept raw
    pub info: Vec<u8>,
}

impl OkPacket {
    /// Parse an OK packet
    pub fn unpack(packet: &Packet) -> Result<Self> {
        let mut r = Reader::new(packet.payload());
        let header = r.u8()?;
        if header != response::OK {
            return Err(Error::Protocol(format!(
                "expected OK packet, got header 0x{:02X}",
                header
            )));
        }
        Ok(Self {
            sequence_id: packet.sequence_id(),
            affected_rows: r.lenenc_int()?,
            last_insert_id: r.lenenc_int()?,
            status_flags: r.u16_le()?,
            warnings: r.u16_le()?,
            info: r.rest().to_vec(),
        })
    }

    /// Serialize
    pub fn pack(&self) -> Result<Packet> {
        let mut buf = BytesMut::with_capacity(16 + self.info.len());
        buf.put_u8(response::OK);
        put_lenenc_int(&mut buf, self.affected_rows);
        put_lenenc_int(&mut buf, self.last_insert_id);
        buf.put_u16_le(self.status_flags);
        buf.put_u16_le(self.warnings);
        buf.put_slice(&self.info);
        Packet::new(self.sequence_id, &buf)
    }
}

/// ERR packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    /// Sequence id of the frame
    pub sequence_id: u8,
    /// Error code
    pub code: u16,
    /// Five-character SQLSTATE, when the `#` marker is present
    pub sql_state: Option<String>,
    /// Error message
    pub message: String,
}

impl ErrPacket {
    /// Build an error with a SQLSTATE
    pub fn new(code: u16, sql_state: &str, message: impl Into<String>) -> Self {
        Self {
            sequence_id: 0,
            code,
            sql_state: Some(sql_state.to_string()),
            message: message.into(),
        }
    }

    /// Parse an ERR packet
    pub fn unpack(packet: &Packet) -> Result<Self> {
        let mut r = Reader::new(packet.payload());
        let header = r.u8()?;
        if header != response::ERR {
            return Err(Error::Protocol(format!(
                "expected ERR packet, got header 0x{:02X}",
                header
            )));
        }
        let code = r.u16_le()?;
        let sql_state = if r.remaining() >= 6 && packet.payload()[r.position()] == b'#' {
            r.u8()?;
            Some(String::from_utf8_lossy(r.bytes(5)?).into_owned())
        } else {
            None
        };
        let message = String::from_utf8_lossy(r.rest()).into_owned();
        Ok(Self {
            sequence_id: packet.sequence_id(),
            code,
            sql_state,
            message,
        })
    }

    /// Serialize
    pub fn pack(&self) -> Result<Packet> {
        let mut buf = BytesMut::with_capacity(9 + self.message.len());
        buf.put_u8(response::ERR);
        buf.put_u16_le(self.code);
        if let Some(state) = &self.sql_state {
            if state.len() != 5 {
                return Err(Error::Protocol(format!("invalid SQLSTATE '{}'", state)));
            }
            buf.put_u8(b'#');
            buf.put_slice(state.as_bytes());
        }
        buf.put_slice(self.message.as_bytes());
        Packet::new(self.sequence_id, &buf)
    }
}

impl std::fmt::Display for ErrPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "ERROR {} ({}): {}", self.code, state, self.message),
            None => write!(f, "ERROR {}: {}", self.code, self.message),
        }
    }
}

/// Request to redo authentication with another plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    /// Sequence id of the frame
    pub sequence_id: u8,
    /// Plugin to switch to
    pub plugin_name: String,
    /// New salt (trailing NUL removed)
    pub plugin_data: Vec<u8>,
}

impl AuthSwitchRequest {
    /// Parse an auth switch request
    pub fn unpack(packet: &Packet) -> Result<Self> {
        let mut r = Reader::new(packet.payload());
        let header = r.u8()?;
        if header != response::AUTH_SWITCH_REQUEST {
            return Err(Error::Protocol(format!(
                "expected auth switch request, got header 0x{:02X}",
                header
            )));
        }
        let plugin_name = r.nul_string()?;
        let data = r.rest();
        let plugin_data = data.strip_suffix(&[0]).unwrap_or(data).to_vec();
        Ok(Self {
            sequence_id: packet.sequence_id(),
            plugin_name,
            plugin_data,
        })
    }

    /// Serialize (plugin data is NUL-terminated on the wire)
    pub fn pack(&self) -> Result<Packet> {
        let mut buf = BytesMut::with_capacity(self.plugin_name.len() + self.plugin_data.len() + 3);
        buf.put_u8(response::AUTH_SWITCH_REQUEST);
        put_nul_bytes(&mut buf, self.plugin_name.as_bytes());
        put_nul_bytes(&mut buf, &self.plugin_data);
        Packet::new(self.sequence_id, &buf)
    }
}

/// Extra authentication data sent by the server (0x01 prefix)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMoreData {
    /// Sequence id of the frame
    pub sequence_id: u8,
    /// Plugin specific payload
    pub data: Vec<u8>,
}

impl AuthMoreData {
    /// Parse an AuthMoreData packet
    pub fn unpack(packet: &Packet) -> Result<Self> {
        let mut r = Reader::new(packet.payload());
        let header = r.u8()?;
        if header != response::AUTH_MORE_DATA {
            return Err(Error::Protocol(format!(
                "expected auth more data, got header 0x{:02X}",
                header
            )));
        }
        Ok(Self {
            sequence_id: packet.sequence_id(),
            data: r.rest().to_vec(),
        })
    }

    /// Serialize
    pub fn pack(&self) -> Result<Packet> {
        let mut buf = BytesMut::with_capacity(1 + self.data.len());
        buf.put_u8(response::AUTH_MORE_DATA);
        buf.put_slice(&self.data);
        Packet::new(self.sequence_id, &buf)
    }
}
