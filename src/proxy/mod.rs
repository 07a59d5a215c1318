//! Client-facing listener and the transparent pipe

mod pipe;
mod service;

pub use pipe::{pipe, Direction, MetricsObserver, PipeStats, TrafficObserver};
pub use service::{CredentialResolver, ProxyService, ResolveFuture, StaticCredentials};
