//! MySQL frame codec
//!
//! A frame is a 3-byte little-endian payload length, a 1-byte sequence id and
//! the payload. Each [`Connection`] owns the sequence counter for its socket.

use super::constants::{HEADER_LENGTH, MAX_PAYLOAD_LENGTH};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One owned frame: header followed by payload
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    buf: BytesMut,
}

impl Packet {
    /// Frame `payload` with a header computed from its length
    pub fn new(sequence_id: u8, payload: &[u8]) -> Result<Self> {
        Self::build(sequence_id, payload, payload.len())
    }

    /// Frame `payload` with an externally computed header length.
    ///
    /// Fails if the header would disagree with the payload actually written,
    /// which is how a bad length patch surfaces.
    pub fn build(sequence_id: u8, payload: &[u8], header_length: usize) -> Result<Self> {
        if header_length != payload.len() {
            return Err(Error::Protocol(format!(
                "malformed packet: header length {} does not match payload length {}",
                header_length,
                payload.len()
            )));
        }
        if header_length > MAX_PAYLOAD_LENGTH {
            return Err(Error::Protocol(format!(
                "payload length {} exceeds maximum {}",
                header_length, MAX_PAYLOAD_LENGTH
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_LENGTH + payload.len());
        buf.put_slice(&(header_length as u32).to_le_bytes()[..3]);
        buf.put_u8(sequence_id);
        buf.put_slice(payload);
        Ok(Self { buf })
    }

    /// Parse a complete frame (header included)
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_LENGTH {
            return Err(Error::Protocol("frame shorter than its header".into()));
        }
        let len = payload_length(&frame[..HEADER_LENGTH]);
        if frame.len() != HEADER_LENGTH + len {
            return Err(Error::Protocol(format!(
                "frame header announces {} payload bytes, found {}",
                len,
                frame.len() - HEADER_LENGTH
            )));
        }
        Ok(Self {
            buf: BytesMut::from(frame),
        })
    }

    /// Sequence id stamped in the header
    pub fn sequence_id(&self) -> u8 {
        self.buf[3]
    }

    /// Overwrite the sequence id in the header
    pub fn set_sequence_id(&mut self, sequence_id: u8) {
        self.buf[3] = sequence_id;
    }

    /// Payload length announced by the header
    pub fn payload_length(&self) -> usize {
        payload_length(&self.buf[..HEADER_LENGTH])
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_LENGTH..]
    }

    /// First payload byte, if any
    pub fn first_byte(&self) -> Option<u8> {
        self.payload().first().copied()
    }

    /// Whole frame, header included
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("sequence_id", &self.sequence_id())
            .field("payload_length", &self.payload_length())
            .finish()
    }
}

fn payload_length(header: &[u8]) -> usize {
    u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize
}

/// Which leg of the session a connection sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Socket accepted from the client
    Client,
    /// Socket dialed to the database
    Backend,
}

/// A socket plus its own sequence counter
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    sequence_id: u8,
    side: Side,
}

impl<S> Connection<S> {
    /// Wrap the client-facing socket
    pub fn client(stream: S) -> Self {
        Self::resume(Side::Client, stream, 0)
    }

    /// Wrap the backend socket
    pub fn backend(stream: S) -> Self {
        Self::resume(Side::Backend, stream, 0)
    }

    /// Rebuild a connection around a replaced stream, keeping its counter
    pub fn resume(side: Side, stream: S, sequence_id: u8) -> Self {
        Self {
            stream,
            sequence_id,
            side,
        }
    }

    /// Sequence id the next written frame will carry
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Which leg this is
    pub fn side(&self) -> Side {
        self.side
    }

    /// Borrow the socket
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Split into socket and counter
    pub fn into_parts(self) -> (S, u8) {
        (self.stream, self.sequence_id)
    }

    /// Release the socket
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn io_error(&self, err: std::io::Error) -> Error {
        match self.side {
            Side::Client => Error::from_client_io(err),
            Side::Backend => Error::from_backend_io(err),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Read one frame and adopt its sequence id
    pub async fn read_packet(&mut self) -> Result<Packet> {
        let mut header = [0u8; HEADER_LENGTH];
        if let Err(e) = self.stream.read_exact(&mut header).await {
            return Err(self.io_error(e));
        }

        let len = payload_length(&header);
        let mut buf = BytesMut::with_capacity(HEADER_LENGTH + len);
        buf.put_slice(&header);
        buf.resize(HEADER_LENGTH + len, 0);
        match self.stream.read_exact(&mut buf[HEADER_LENGTH..]).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::Protocol(format!(
                    "short read: expected {} payload bytes",
                    len
                )));
            }
            Err(e) => return Err(self.io_error(e)),
        }

        let packet = Packet { buf };
        self.sequence_id = packet.sequence_id().wrapping_add(1);
        tracing::trace!(
            side = ?self.side,
            seq = packet.sequence_id(),
            len,
            "read packet"
        );
        Ok(packet)
    }

    /// Stamp the connection's sequence id on `packet`, send it, advance the counter
    pub async fn write_packet(&mut self, packet: &mut Packet) -> Result<()> {
        packet.set_sequence_id(self.sequence_id);
        if let Err(e) = self.stream.write_all(packet.as_bytes()).await {
            return Err(self.io_error(e));
        }
        if let Err(e) = self.stream.flush().await {
            return Err(self.io_error(e));
        }
        tracing::trace!(
            side = ?self.side,
            seq = self.sequence_id,
            len = packet.payload_length(),
            "wrote packet"
        );
        self.sequence_id = self.sequence_id.wrapping_add(1);
        Ok(())
    }

    /// Read one frame from `self` and forward it unmodified to `dst`
    pub async fn proxy_packet<D>(&mut self, dst: &mut Connection<D>) -> Result<Packet>
    where
        D: AsyncRead + AsyncWrite + Unpin,
    {
        let mut packet = self.read_packet().await?;
        dst.write_packet(&mut packet).await?;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_packet_header_layout() {
        let packet = Packet::new(3, b"\x00\x00\x00\x02\x00\x00\x00").unwrap();
        assert_eq!(&packet.as_bytes()[..4], &[7, 0, 0, 3]);
        assert_eq!(packet.payload_length(), 7);
        assert_eq!(packet.first_byte(), Some(0));
    }

    #[test]
    fn test_build_rejects_mismatched_header() {
        assert!(matches!(
            Packet::build(0, b"abc", 4),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_from_frame_checks_length() {
        assert!(Packet::from_frame(&[2, 0, 0, 0, b'a', b'b']).is_ok());
        assert!(Packet::from_frame(&[3, 0, 0, 0, b'a', b'b']).is_err());
        assert!(Packet::from_frame(&[1, 0]).is_err());
    }

    #[tokio::test]
    async fn test_read_adopts_sequence_and_write_stamps_counter() {
        let stream = Builder::new()
            .read(&[1, 0, 0, 4, 0xAA])
            .write(&[1, 0, 0, 5, 0xBB])
            .build();
        let mut conn = Connection::backend(stream);

        let packet = conn.read_packet().await.unwrap();
        assert_eq!(packet.sequence_id(), 4);
        assert_eq!(packet.payload(), &[0xAA]);
        assert_eq!(conn.sequence_id(), 5);

        let mut reply = Packet::new(0, &[0xBB]).unwrap();
        conn.write_packet(&mut reply).await.unwrap();
        assert_eq!(reply.sequence_id(), 5);
        assert_eq!(conn.sequence_id(), 6);
    }

    #[tokio::test]
    async fn test_counters_are_independent() {
        let client_stream = Builder::new().write(&[1, 0, 0, 0, 0x0A]).build();
        let backend_stream = Builder::new().read(&[1, 0, 0, 0, 0x0A]).build();
        let mut client = Connection::client(client_stream);
        let mut backend = Connection::backend(backend_stream);

        backend.proxy_packet(&mut client).await.unwrap();
        assert_eq!(backend.sequence_id(), 1);
        assert_eq!(client.sequence_id(), 1);
    }

    #[tokio::test]
    async fn test_short_body_is_protocol_violation() {
        let stream = Builder::new().read(&[5, 0, 0, 0, 1, 2]).build();
        let mut conn = Connection::backend(stream);
        assert!(matches!(conn.read_packet().await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_client_eof_maps_to_client_closed() {
        let stream = Builder::new().build();
        let mut conn = Connection::client(stream);
        assert!(matches!(conn.read_packet().await, Err(Error::ClientClosed)));
    }

    #[tokio::test]
    async fn test_sequence_wraps() {
        let stream = Builder::new().read(&[0, 0, 0, 255]).build();
        let mut conn = Connection::backend(stream);
        conn.read_packet().await.unwrap();
        assert_eq!(conn.sequence_id(), 0);
    }
}
