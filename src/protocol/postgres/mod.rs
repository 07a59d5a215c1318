//! PostgreSQL frontend/backend protocol (startup and authentication)

pub mod codec;
pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::{check_length, decode_body, decode_startup};
pub use encode::{encode_authentication_ok, encode_backend_message, encode_message};
pub use message::{
    AuthenticationMessage, BackendMessage, ErrorFields, FrontendMessage, StartupMessage,
    StartupRequest,
};
