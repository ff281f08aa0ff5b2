//! Core of a room-based real-time server.
//!
//! - [`Hub`] keeps track of which [`User`] is in which [`Room`].
//! - [`WsServer`] accepts WebSocket connections and runs one [`Agent`] per client.
//! - [`Processor`] decodes `{"Tag": payload}` envelopes and routes them to the
//!   handler registered for that type.

pub mod agent;
pub mod config;
pub mod conn;
pub mod error;
pub mod hooks;
pub mod hub;
pub mod id;
pub mod processor;
pub mod server;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentState};
pub use config::{HubSettings, ServerConfig};
pub use conn::{Conn, WsConn};
pub use error::{Entity, Error, Result};
pub use hooks::{Hook, Hooks};
pub use hub::{Hub, HubSnapshot, MessageSink, Room, User};
pub use id::{IdGenerator, RoomId, UserId, UuidGenerator};
pub use processor::{AnyMessage, Processor};
pub use server::WsServer;

use async_trait::async_trait;
use std::{future::Future, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
  let _ = tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{}=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into()
      }),
    )
    .with(tracing_subscriber::fmt::layer())
    .try_init();
}

/// Something [`run`] can start and stop.
#[async_trait]
pub trait Service: Send + Sync {
  fn name(&self) -> String;

  /// Start in the background. Must not block until shutdown.
  async fn start(&self) -> Result<()>;

  async fn stop(&self) -> Result<()>;
}

#[async_trait]
impl Service for WsServer {
  fn name(&self) -> String {
    format!("ws://{}{}", self.config().addr, self.config().path)
  }

  async fn start(&self) -> Result<()> {
    WsServer::start(self).await.map(|_| ())
  }

  async fn stop(&self) -> Result<()> {
    WsServer::stop(self).await
  }
}

/// Start every service, wait for `shutdown`, then stop them in order.
pub async fn run<F>(services: &[Arc<dyn Service>], shutdown: F)
where
  F: Future<Output = ()>,
{
  for service in services {
    if let Err(e) = service.start().await {
      error!("Failed to start {}: {}", service.name(), e);
    }
  }

  shutdown.await;

  for (i, service) in services.iter().enumerate() {
    info!("Stopping server {}/{} ({})", i + 1, services.len(), service.name());
    if let Err(e) = service.stop().await {
      error!("Failed to stop {}: {}", service.name(), e);
    }
  }
  info!("All servers stopped!");
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!("Failed to listen for shutdown signal: {}", e);
  }
}
