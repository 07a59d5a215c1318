//! Post-authentication byte pipe

use crate::metrics::{counters, labels};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const CHUNK_SIZE: usize = 16 * 1024;

/// Direction of a piped chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to backend
    ClientToBackend,
    /// Backend to client
    BackendToClient,
}

impl Direction {
    /// Metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToBackend => labels::DIRECTION_UPSTREAM,
            Direction::BackendToClient => labels::DIRECTION_DOWNSTREAM,
        }
    }
}

/// Receives every chunk copied by [`pipe`]
pub trait TrafficObserver: Send + Sync {
    /// Called after `data` was written to the destination
    fn observe(&self, direction: Direction, data: &[u8]);
}

/// Observer that counts bytes through the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl TrafficObserver for MetricsObserver {
    fn observe(&self, direction: Direction, data: &[u8]) {
        counters::bytes_piped(direction.as_str(), data.len() as u64);
    }
}

/// Bytes copied per direction once the pipe closed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipeStats {
    /// Client to backend
    pub upstream: u64,
    /// Backend to client
    pub downstream: u64,
}

/// Copy bytes in both directions until either side finishes.
///
/// The first direction to hit EOF or an error ends the session; both streams
/// are dropped on return.
pub async fn pipe<C, B>(
    client: C,
    backend: B,
    observer: Option<Arc<dyn TrafficObserver>>,
) -> PipeStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);
    let mut stats = PipeStats::default();

    {
        let upstream = copy(
            &mut client_read,
            &mut backend_write,
            Direction::ClientToBackend,
            observer.as_deref(),
            &mut stats.upstream,
        );
        let downstream = copy(
            &mut backend_read,
            &mut client_write,
            Direction::BackendToClient,
            observer.as_deref(),
            &mut stats.downstream,
        );

        tokio::select! {
            res = upstream => debug!(?res, "client side finished"),
            res = downstream => debug!(?res, "backend side finished"),
        }
    }

    let _ = backend_write.shutdown().await;
    let _ = client_write.shutdown().await;
    stats
}

async fn copy<R, W>(
    reader: &mut R,
    writer: &mut W,
    direction: Direction,
    observer: Option<&dyn TrafficObserver>,
    total: &mut u64,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *total += n as u64;
        if let Some(observer) = observer {
            observer.observe(direction, &buf[..n]);
        }
    }
}
