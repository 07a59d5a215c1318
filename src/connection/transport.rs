//! Backend transport: a stream that is either plain or wrapped in TLS

use crate::connection::tls::{self, TlsPolicy};
use crate::Result;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Backend stream, plain or TLS-encrypted
#[allow(clippy::large_enum_variant)]
pub enum MaybeTlsStream<S> {
    /// Plaintext stream
    Plain(S),
    /// TLS-encrypted stream
    Tls(Box<tokio_rustls::client::TlsStream<S>>),
}

impl<S> std::fmt::Debug for MaybeTlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaybeTlsStream::Plain(_) => f.write_str("MaybeTlsStream::Plain"),
            MaybeTlsStream::Tls(_) => f.write_str("MaybeTlsStream::Tls"),
        }
    }
}

impl<S> MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Whether the stream is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, MaybeTlsStream::Tls(_))
    }

    /// Upgrade a plain stream to TLS according to `policy`.
    ///
    /// Upgrading a stream that is already encrypted is an error.
    pub async fn upgrade(self, policy: &TlsPolicy) -> Result<Self> {
        match self {
            MaybeTlsStream::Plain(stream) => {
                let tls_stream = tls::upgrade(stream, policy).await?;
                Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
            }
            MaybeTlsStream::Tls(_) => Err(crate::Error::Ssl(
                "backend stream is already TLS-encrypted".into(),
            )),
        }
    }

    /// `tls-server-end-point` channel binding data for the server's leaf
    /// certificate. `None` for plaintext streams.
    pub fn channel_binding_data(&self) -> Option<Vec<u8>> {
        match self {
            MaybeTlsStream::Plain(_) => None,
            MaybeTlsStream::Tls(stream) => {
                let (_, conn) = stream.get_ref();
                let server_cert = conn.peer_certificates()?.first()?;
                Some(tls::tls_server_end_point(server_cert.as_ref()))
            }
        }
    }
}

impl<S> AsyncRead for MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<S> AsyncWrite for MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
