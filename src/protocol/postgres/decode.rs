//! Protocol message decoding

use super::constants::{
    auth, tags, CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, MAX_MESSAGE_LENGTH, SSL_REQUEST_CODE,
};
use super::message::{
    AuthenticationMessage, BackendMessage, ErrorFields, StartupMessage, StartupRequest,
};
use std::io;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_cstr(data: &[u8], offset: &mut usize, what: &str) -> io::Result<String> {
    let rest = data
        .get(*offset..)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string()))?;
    let end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| invalid(format!("missing null terminator in {}", what)))?;
    let value = String::from_utf8_lossy(&rest[..end]).to_string();
    *offset += end + 1;
    Ok(value)
}

fn read_i32(data: &[u8], offset: usize, what: &str) -> io::Result<i32> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string()))?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Validate a length field (which counts itself) and return it
pub fn check_length(len: i32) -> io::Result<usize> {
    if len < 4 {
        return Err(invalid(format!("message length {} below minimum 4", len)));
    }
    let len = len as usize;
    if len > MAX_MESSAGE_LENGTH {
        return Err(invalid(format!(
            "message length {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_LENGTH
        )));
    }
    Ok(len)
}

/// Decode a backend message body given its tag
pub fn decode_body(tag: u8, body: &[u8]) -> io::Result<BackendMessage> {
    match tag {
        tags::AUTHENTICATION => decode_authentication(body),
        tags::BACKEND_KEY_DATA => decode_backend_key_data(body),
        tags::ERROR_RESPONSE => Ok(BackendMessage::ErrorResponse(decode_error_fields(body)?)),
        tags::NOTICE_RESPONSE => Ok(BackendMessage::NoticeResponse(decode_error_fields(body)?)),
        tags::NEGOTIATE_PROTOCOL_VERSION => decode_negotiate_protocol_version(body),
        tags::PARAMETER_STATUS => decode_parameter_status(body),
        tags::READY_FOR_QUERY => decode_ready_for_query(body),
        _ => Err(invalid(format!("unexpected message tag: 0x{:02X}", tag))),
    }
}

/// Decode the body of an untagged startup-phase packet (everything after the
/// length field)
pub fn decode_startup(body: &[u8]) -> io::Result<StartupRequest> {
    let code = read_i32(body, 0, "protocol version")?;

    match code {
        SSL_REQUEST_CODE => Ok(StartupRequest::SslRequest),
        GSSENC_REQUEST_CODE => Ok(StartupRequest::GssEncRequest),
        CANCEL_REQUEST_CODE => Ok(StartupRequest::CancelRequest {
            process_id: read_i32(body, 4, "cancel process id")?,
            secret_key: read_i32(body, 8, "cancel secret key")?,
        }),
        version => {
            let mut params = Vec::new();
            let mut offset = 4;
            loop {
                let key = read_cstr(body, &mut offset, "startup parameter name")?;
                if key.is_empty() {
                    break;
                }
                let value = read_cstr(body, &mut offset, "startup parameter value")?;
                params.push((key, value));
            }
            if offset != body.len() {
                return Err(invalid("trailing bytes after startup parameters"));
            }
            Ok(StartupRequest::Startup(StartupMessage { version, params }))
        }
    }
}

fn decode_authentication(data: &[u8]) -> io::Result<BackendMessage> {
    let auth_type = read_i32(data, 0, "auth type")?;

    let auth_msg = match auth_type {
        auth::OK => AuthenticationMessage::Ok,
        auth::KERBEROS_V5 => AuthenticationMessage::KerberosV5,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => {
            let salt_bytes = data
                .get(4..8)
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "salt data"))?;
            let mut salt = [0u8; 4];
            salt.copy_from_slice(salt_bytes);
            AuthenticationMessage::Md5Password { salt }
        }
        auth::SCM_CREDENTIAL => AuthenticationMessage::ScmCredential,
        auth::GSS => AuthenticationMessage::Gss,
        auth::GSS_CONTINUE => AuthenticationMessage::GssContinue {
            data: data[4..].to_vec(),
        },
        auth::SSPI => AuthenticationMessage::Sspi,
        auth::SASL => {
            // Mechanism list: NUL-terminated names ending with an empty name
            let mut mechanisms = Vec::new();
            let mut offset = 4;
            while offset < data.len() {
                let mechanism = read_cstr(data, &mut offset, "SASL mechanism")?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            AuthenticationMessage::Sasl { mechanisms }
        }
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
            data: data[4..].to_vec(),
        },
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal {
            data: data[4..].to_vec(),
        },
        other => AuthenticationMessage::Unknown(other),
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_backend_key_data(data: &[u8]) -> io::Result<BackendMessage> {
    Ok(BackendMessage::BackendKeyData {
        process_id: read_i32(data, 0, "backend key data")?,
        secret_key: read_i32(data, 4, "backend key data")?,
    })
}

fn decode_error_fields(data: &[u8]) -> io::Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut offset = 0;

    while offset < data.len() {
        let field_type = data[offset];
        offset += 1;
        if field_type == 0 {
            break;
        }
        let value = read_cstr(data, &mut offset, "error field")?;
        fields.fields.push((field_type, value));
    }

    Ok(fields)
}

fn decode_negotiate_protocol_version(data: &[u8]) -> io::Result<BackendMessage> {
    let newest_minor = read_i32(data, 0, "newest minor version")?;
    let count = read_i32(data, 4, "unrecognized option count")?;
    let mut offset = 8;
    let mut unrecognized = Vec::new();
    for _ in 0..count.max(0) {
        unrecognized.push(read_cstr(data, &mut offset, "unrecognized option")?);
    }
    Ok(BackendMessage::NegotiateProtocolVersion {
        newest_minor,
        unrecognized,
    })
}

fn decode_parameter_status(data: &[u8]) -> io::Result<BackendMessage> {
    let mut offset = 0;
    let name = read_cstr(data, &mut offset, "parameter name")?;
    let value = read_cstr(data, &mut offset, "parameter value")?;
    Ok(BackendMessage::ParameterStatus { name, value })
}

fn decode_ready_for_query(data: &[u8]) -> io::Result<BackendMessage> {
    let status = *data
        .first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "status byte"))?;
    Ok(BackendMessage::ReadyForQuery { status })
}
