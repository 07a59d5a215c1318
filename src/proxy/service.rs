//! Accept loop and per-session orchestration

use crate::connection::ConnectionDetails;
use crate::connector::{self, Dialer, Protocol, TcpDialer};
use crate::metrics::{counters, histograms};
use crate::proxy::pipe::{pipe, TrafficObserver};
use crate::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, Instrument};

/// Future returned by [`CredentialResolver::resolve`]
pub type ResolveFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HashMap<String, String>>> + Send + 'a>>;

/// Supplies the backend credential map for a new session
pub trait CredentialResolver: Send + Sync + 'static {
    /// Resolve credentials for a client connecting from `peer`
    fn resolve(&self, peer: SocketAddr) -> ResolveFuture<'_>;
}

/// Resolver returning the same map for every session
#[derive(Clone)]
pub struct StaticCredentials {
    credentials: HashMap<String, String>,
}

impl StaticCredentials {
    /// Wrap a fixed credential map
    pub fn new(credentials: HashMap<String, String>) -> Self {
        Self { credentials }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.credentials.keys().collect();
        keys.sort();
        f.debug_struct("StaticCredentials").field("keys", &keys).finish()
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, _peer: SocketAddr) -> ResolveFuture<'_> {
        Box::pin(async move { Ok(self.credentials.clone()) })
    }
}

/// Listener that authenticates each client's backend connection and then
/// pipes bytes until either side closes
pub struct ProxyService<R, D = TcpDialer> {
    protocol: Protocol,
    resolver: Arc<R>,
    dialer: Arc<D>,
    observer: Option<Arc<dyn TrafficObserver>>,
    next_id: Arc<AtomicU64>,
}

impl<R: CredentialResolver> ProxyService<R, TcpDialer> {
    /// Service dialing backends over plain TCP
    pub fn new(protocol: Protocol, resolver: R) -> Self {
        Self {
            protocol,
            resolver: Arc::new(resolver),
            dialer: Arc::new(TcpDialer),
            observer: None,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<R: CredentialResolver, D: Dialer + 'static> ProxyService<R, D> {
    /// Replace the backend dialer
    pub fn with_dialer<D2: Dialer + 'static>(self, dialer: D2) -> ProxyService<R, D2> {
        ProxyService {
            protocol: self.protocol,
            resolver: self.resolver,
            dialer: Arc::new(dialer),
            observer: self.observer,
            next_id: self.next_id,
        }
    }

    /// Report piped traffic to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn TrafficObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Protocol served
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Accept clients until `shutdown` resolves.
    ///
    /// Sessions already running keep going after shutdown.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(protocol = %self.protocol, %local, "proxy listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(protocol = %self.protocol, "shutdown requested, no longer accepting");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "could not set TCP_NODELAY on client socket");
                    }
                    self.spawn_session(stream, peer);
                }
            }
        }
    }

    fn spawn_session<C>(&self, client: C, peer: SocketAddr)
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!("session", protocol = %self.protocol, %peer, id);
        let session = Session {
            protocol: self.protocol,
            resolver: Arc::clone(&self.resolver),
            dialer: Arc::clone(&self.dialer),
            observer: self.observer.clone(),
        };
        tokio::spawn(session.run(client, peer).instrument(span));
    }

    /// Run a single session on an already-accepted client stream
    pub async fn handle<C>(&self, client: C, peer: SocketAddr)
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = Session {
            protocol: self.protocol,
            resolver: Arc::clone(&self.resolver),
            dialer: Arc::clone(&self.dialer),
            observer: self.observer.clone(),
        };
        session.run(client, peer).await
    }
}

struct Session<R, D> {
    protocol: Protocol,
    resolver: Arc<R>,
    dialer: Arc<D>,
    observer: Option<Arc<dyn TrafficObserver>>,
}

impl<R: CredentialResolver, D: Dialer> Session<R, D> {
    async fn run<C>(self, mut client: C, peer: SocketAddr)
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let start = Instant::now();
        counters::session_accepted(self.protocol.name());
        info!("client connected");

        let details = match self.details(peer).await {
            Ok(details) => details,
            Err(err) => {
                error!(error = %err, "could not resolve backend credentials");
                if let Err(e) = connector::reject(self.protocol, &mut client, &err).await {
                    debug!(error = %e, "could not deliver error to client");
                }
                return;
            }
        };

        let backend =
            match connector::connect(self.protocol, &mut client, &details, self.dialer.as_ref())
                .await
            {
                Ok(backend) => backend,
                Err(_) => return,
            };
        drop(details);

        info!(tls = backend.is_tls(), "backend authenticated, piping");
        let stats = pipe(client, backend, self.observer).await;

        let elapsed = start.elapsed();
        histograms::session_duration(self.protocol.name(), elapsed.as_millis() as u64);
        info!(
            upstream = stats.upstream,
            downstream = stats.downstream,
            elapsed_ms = elapsed.as_millis() as u64,
            "session closed"
        );
    }

    async fn details(&self, peer: SocketAddr) -> Result<ConnectionDetails> {
        let credentials = self.resolver.resolve(peer).await?;
        ConnectionDetails::from_credentials(self.protocol, &credentials)
            .map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("resolved credentials: {}", msg)),
                other => other,
            })
    }
}
