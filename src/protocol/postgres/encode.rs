//! Protocol message encoding
//!
//! Frontend messages are what the proxy sends to the database. Backend messages
//! are what it synthesizes toward the client (and what test servers emit).

use super::constants::{auth, tags, PROTOCOL_VERSION, SSL_REQUEST_CODE};
use super::message::{AuthenticationMessage, BackendMessage, ErrorFields, FrontendMessage};
use bytes::{BufMut, BytesMut};

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> BytesMut {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            encode_startup(&mut buf, *version, params);
        }
        FrontendMessage::Password(password) => {
            encode_tagged(&mut buf, tags::PASSWORD_MESSAGE, |b| {
                b.put(password.as_bytes());
                b.put_u8(0);
            });
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            encode_tagged(&mut buf, tags::PASSWORD_MESSAGE, |b| {
                b.put(mechanism.as_bytes());
                b.put_u8(0);
                b.put_i32(data.len() as i32);
                b.put_slice(data);
            });
        }
        FrontendMessage::SaslResponse { data } => {
            encode_tagged(&mut buf, tags::PASSWORD_MESSAGE, |b| b.put_slice(data));
        }
        FrontendMessage::SslRequest => {
            buf.put_i32(8); // Length (includes itself)
            buf.put_i32(SSL_REQUEST_CODE);
        }
    }

    buf
}

/// Encode a backend message into bytes
pub fn encode_backend_message(msg: &BackendMessage) -> BytesMut {
    let mut buf = BytesMut::new();

    match msg {
        BackendMessage::Authentication(auth_msg) => {
            encode_tagged(&mut buf, tags::AUTHENTICATION, |b| {
                encode_authentication(b, auth_msg)
            });
        }
        BackendMessage::BackendKeyData {
            process_id,
            secret_key,
        } => {
            encode_tagged(&mut buf, tags::BACKEND_KEY_DATA, |b| {
                b.put_i32(*process_id);
                b.put_i32(*secret_key);
            });
        }
        BackendMessage::ErrorResponse(fields) => {
            encode_tagged(&mut buf, tags::ERROR_RESPONSE, |b| encode_fields(b, fields));
        }
        BackendMessage::NoticeResponse(fields) => {
            encode_tagged(&mut buf, tags::NOTICE_RESPONSE, |b| encode_fields(b, fields));
        }
        BackendMessage::NegotiateProtocolVersion {
            newest_minor,
            unrecognized,
        } => {
            encode_tagged(&mut buf, tags::NEGOTIATE_PROTOCOL_VERSION, |b| {
                b.put_i32(*newest_minor);
                b.put_i32(unrecognized.len() as i32);
                for option in unrecognized {
                    b.put(option.as_bytes());
                    b.put_u8(0);
                }
            });
        }
        BackendMessage::ParameterStatus { name, value } => {
            encode_tagged(&mut buf, tags::PARAMETER_STATUS, |b| {
                b.put(name.as_bytes());
                b.put_u8(0);
                b.put(value.as_bytes());
                b.put_u8(0);
            });
        }
        BackendMessage::ReadyForQuery { status } => {
            encode_tagged(&mut buf, tags::READY_FOR_QUERY, |b| b.put_u8(*status));
        }
    }

    buf
}

/// The `AuthenticationOk` message sent to the client once the backend accepted
/// the injected credential
pub fn encode_authentication_ok() -> BytesMut {
    encode_backend_message(&BackendMessage::Authentication(AuthenticationMessage::Ok))
}

fn encode_startup(buf: &mut BytesMut, version: i32, params: &[(String, String)]) {
    // Startup messages don't have a type byte
    let len_pos = buf.len();
    buf.put_i32(0);
    buf.put_i32(version);

    for (key, value) in params {
        buf.put(key.as_bytes());
        buf.put_u8(0);
        buf.put(value.as_bytes());
        buf.put_u8(0);
    }
    buf.put_u8(0);

    backfill_length(buf, len_pos);
}

/// Write a tag, reserve the length, let `body` append, then fill in the length
fn encode_tagged(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_pos = buf.len();
    buf.put_i32(0);
    body(buf);
    backfill_length(buf, len_pos);
}

fn backfill_length(buf: &mut BytesMut, len_pos: usize) {
    let len = buf.len() - len_pos;
    buf[len_pos..len_pos + 4].copy_from_slice(&(len as i32).to_be_bytes());
}

fn encode_authentication(buf: &mut BytesMut, msg: &AuthenticationMessage) {
    match msg {
        AuthenticationMessage::Ok => buf.put_i32(auth::OK),
        AuthenticationMessage::KerberosV5 => buf.put_i32(auth::KERBEROS_V5),
        AuthenticationMessage::CleartextPassword => buf.put_i32(auth::CLEARTEXT_PASSWORD),
        AuthenticationMessage::Md5Password { salt } => {
            buf.put_i32(auth::MD5_PASSWORD);
            buf.put_slice(salt);
        }
        AuthenticationMessage::ScmCredential => buf.put_i32(auth::SCM_CREDENTIAL),
        AuthenticationMessage::Gss => buf.put_i32(auth::GSS),
        AuthenticationMessage::GssContinue { data } => {
            buf.put_i32(auth::GSS_CONTINUE);
            buf.put_slice(data);
        }
        AuthenticationMessage::Sspi => buf.put_i32(auth::SSPI),
        AuthenticationMessage::Sasl { mechanisms } => {
            buf.put_i32(auth::SASL);
            for mechanism in mechanisms {
                buf.put(mechanism.as_bytes());
                buf.put_u8(0);
            }
            buf.put_u8(0);
        }
        AuthenticationMessage::SaslContinue { data } => {
            buf.put_i32(auth::SASL_CONTINUE);
            buf.put_slice(data);
        }
        AuthenticationMessage::SaslFinal { data } => {
            buf.put_i32(auth::SASL_FINAL);
            buf.put_slice(data);
        }
        AuthenticationMessage::Unknown(code) => buf.put_i32(*code),
    }
}

fn encode_fields(buf: &mut BytesMut, fields: &ErrorFields) {
    for (field_type, value) in &fields.fields {
        buf.put_u8(*field_type);
        buf.put(value.as_bytes());
        buf.put_u8(0);
    }
    buf.put_u8(0);
}

/// Startup message carrying protocol 3.0 and the given parameters
pub fn encode_startup_message(params: &[(String, String)]) -> BytesMut {
    encode_message(&FrontendMessage::Startup {
        version: PROTOCOL_VERSION,
        params: params.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_password() {
        let msg = FrontendMessage::Password("secret".to_string());
        let buf = encode_message(&msg);

        assert_eq!(buf[0], b'p');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, (buf.len() - 1) as i32);
        assert_eq!(&buf[5..], b"secret\0");
    }

    #[test]
    fn test_encode_ssl_request() {
        let buf = encode_message(&FrontendMessage::SslRequest);

        // SSLRequest is exactly 8 bytes: 4-byte length (8) + 4-byte code (80877103)
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x08]);
        assert_eq!(&buf[4..8], &[0x04, 0xD2, 0x16, 0x2F]);
    }

    #[test]
    fn test_encode_startup() {
        let params = vec![
            ("user".to_string(), "app".to_string()),
            ("database".to_string(), "db".to_string()),
        ];
        let buf = encode_startup_message(&params);
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len());
        assert_eq!(&buf[4..8], &PROTOCOL_VERSION.to_be_bytes());
        assert_eq!(&buf[8..], b"user\0app\0database\0db\0\0");
    }

    #[test]
    fn test_encode_authentication_ok() {
        let buf = encode_authentication_ok();
        assert_eq!(&buf[..], &[b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_sasl_initial_response() {
        let msg = FrontendMessage::SaslInitialResponse {
            mechanism: "SCRAM-SHA-256".into(),
            data: b"n,,n=,r=abc".to_vec(),
        };
        let buf = encode_message(&msg);
        let mech_end = 5 + "SCRAM-SHA-256".len();
        assert_eq!(&buf[5..mech_end], b"SCRAM-SHA-256");
        assert_eq!(buf[mech_end], 0);
        assert_eq!(&buf[mech_end + 1..mech_end + 5], &11i32.to_be_bytes());
    }
}
