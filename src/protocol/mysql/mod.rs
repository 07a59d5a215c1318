//! MySQL client/server protocol (connection phase)

pub mod constants;
pub mod message;
pub mod packet;

pub use message::{
    AuthMoreData, AuthSwitchRequest, ErrPacket, HandshakeResponse41, HandshakeV10, OkPacket,
};
pub use packet::{Connection, Packet, Side};
