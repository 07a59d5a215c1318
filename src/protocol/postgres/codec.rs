//! Framed reads and writes on a socket
//!
//! Reads pull exactly one frame off the socket, so nothing the backend sends
//! after `AuthenticationOk` is consumed before the pipe takes over.

use super::constants::{MAX_STARTUP_LENGTH, MIN_STARTUP_LENGTH};
use super::decode::{check_length, decode_body, decode_startup};
use super::message::{BackendMessage, StartupRequest};
use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read the client's untagged startup-phase packet
pub async fn read_startup<S>(stream: &mut S) -> Result<StartupRequest>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(Error::from_client_io)?;

    let len = i32::from_be_bytes(len_buf);
    if len < MIN_STARTUP_LENGTH as i32 || len as usize > MAX_STARTUP_LENGTH {
        return Err(Error::Protocol(format!("invalid startup packet length {}", len)));
    }

    let mut body = vec![0u8; len as usize - 4];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::Protocol("short read in startup packet".into())
            }
            _ => Error::from_client_io(e),
        })?;

    decode_startup(&body).map_err(|e| Error::Protocol(e.to_string()))
}

/// Read one tagged backend message
pub async fn read_message<S>(stream: &mut S) -> Result<BackendMessage>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    stream
        .read_exact(&mut header)
        .await
        .map_err(Error::from_backend_io)?;

    let tag = header[0];
    let len = check_length(i32::from_be_bytes([header[1], header[2], header[3], header[4]]))
        .map_err(|e| Error::Protocol(e.to_string()))?;

    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            Error::Protocol(format!("short read in message 0x{:02X}", tag))
        }
        _ => Error::from_backend_io(e),
    })?;

    decode_body(tag, &body).map_err(|e| Error::Protocol(e.to_string()))
}

/// Read the single-byte SSLRequest answer from the backend
pub async fn read_ssl_response<S>(stream: &mut S) -> Result<u8>
where
    S: AsyncRead + Unpin,
{
    stream.read_u8().await.map_err(Error::from_backend_io)
}

/// Write a frame to the client leg
pub async fn write_to_client<S>(stream: &mut S, bytes: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await.map_err(Error::from_client_io)?;
    stream.flush().await.map_err(Error::from_client_io)
}

/// Write a frame to the backend leg
pub async fn write_to_backend<S>(stream: &mut S, bytes: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await.map_err(Error::from_backend_io)?;
    stream.flush().await.map_err(Error::from_backend_io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::postgres::message::AuthenticationMessage;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_startup_ssl_request() {
        let mut stream = Builder::new()
            .read(&[0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F])
            .build();
        assert_eq!(
            read_startup(&mut stream).await.unwrap(),
            StartupRequest::SslRequest
        );
    }

    #[tokio::test]
    async fn test_read_startup_rejects_tiny_length() {
        let mut stream = Builder::new().read(&[0, 0, 0, 3]).build();
        assert!(matches!(
            read_startup(&mut stream).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_startup_client_gone() {
        let mut stream = Builder::new().build();
        assert!(matches!(
            read_startup(&mut stream).await,
            Err(Error::ClientClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_message_exact_frame() {
        let mut stream = Builder::new()
            .read(&[b'R', 0, 0, 0, 8, 0, 0, 0, 0])
            .build();
        let msg = read_message(&mut stream).await.unwrap();
        assert_eq!(msg, BackendMessage::Authentication(AuthenticationMessage::Ok));
    }

    #[tokio::test]
    async fn test_read_message_bad_length() {
        let mut stream = Builder::new().read(&[b'R', 0, 0, 0, 2]).build();
        assert!(matches!(
            read_message(&mut stream).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_message_truncated_body() {
        let mut stream = Builder::new().read(&[b'R', 0, 0, 0, 8, 0, 0]).build();
        assert!(matches!(
            read_message(&mut stream).await,
            Err(Error::Protocol(_))
        ));
    }
}
