//! Server-side actor owning one live connection.

use crate::{
  conn::Conn,
  error::Result,
  hooks::Hooks,
  hub::MessageSink,
  processor::Processor,
};
use std::{
  any::Any,
  collections::HashMap,
  sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
  },
};
use tokio::sync::RwLock;

/// Lifecycle of an [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  /// Read loop running, messages are dispatched
  Open,
  /// Read loop ended, disconnect hook pending or running
  Draining,
  /// Disconnect hook done and connection closed
  Closed,
}

impl AgentState {
  fn from_u8(value: u8) -> Self {
    match value {
      0 => AgentState::Open,
      1 => AgentState::Draining,
      _ => AgentState::Closed,
    }
  }
}

/// One connected client.
///
/// Reads are decoded and routed through the shared [`Processor`]; writes are
/// encoded by the same processor and queued on the connection.
pub struct Agent {
  id: String,
  conn: Arc<dyn Conn>,
  processor: Arc<Processor>,
  state: AtomicU8,
  served: AtomicBool,
  values: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Agent {
  pub fn new(id: String, conn: Arc<dyn Conn>, processor: Arc<Processor>) -> Self {
    Self {
      id,
      conn,
      processor,
      state: AtomicU8::new(AgentState::Open as u8),
      served: AtomicBool::new(false),
      values: RwLock::new(HashMap::new()),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn conn(&self) -> &Arc<dyn Conn> {
    &self.conn
  }

  pub fn processor(&self) -> &Arc<Processor> {
    &self.processor
  }

  pub fn state(&self) -> AgentState {
    AgentState::from_u8(self.state.load(Ordering::SeqCst))
  }

  /// Close the underlying connection. The read loop ends on its next read.
  pub fn close(&self) {
    self.conn.close();
  }

  /// Encode `msg` and queue it on the connection.
  pub fn send<M: Any + Send + Sync>(&self, msg: &M) -> Result<()> {
    let bytes = self.processor.marshal(msg)?;
    self.conn.write(bytes);
    Ok(())
  }

  /// Attach an arbitrary value to this agent under `key`, replacing any previous one.
  pub async fn set_value<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
    self.values.write().await.insert(key.into(), Arc::new(value));
  }

  /// Value stored under `key`, if present and of type `T`.
  pub async fn value<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
    let value = self.values.read().await.get(key).cloned()?;
    value.downcast::<T>().ok()
  }

  pub async fn remove_value(&self, key: &str) -> bool {
    self.values.write().await.remove(key).is_some()
  }

  /// Read, decode and route messages until the connection fails.
  ///
  /// Bad envelopes and routing failures are logged and skipped; only a read
  /// error ends the loop.
  pub async fn run(self: &Arc<Self>) {
    loop {
      let data = match self.conn.read().await {
        Ok(data) => data,
        Err(e) => {
          tracing::debug!("Agent {} stopped reading: {}", self.id, e);
          break;
        }
      };

      let msg = match self.processor.unmarshal(&data) {
        Ok(msg) => msg,
        Err(e) => {
          tracing::warn!("Failed to decode message from {}: {}", self.id, e);
          continue;
        }
      };

      if let Err(e) = self.processor.route(self.clone(), msg).await {
        tracing::warn!("Failed to route message from {}: {}", self.id, e);
      }
    }
  }

  /// Full connection lifecycle: connect hook, read loop, disconnect hook, close.
  ///
  /// Only the first call does anything, so each hook runs at most once per agent.
  pub async fn serve(self: Arc<Self>, hooks: &Hooks) {
    if self.served.swap(true, Ordering::SeqCst) {
      tracing::warn!("Agent {} is already being served", self.id);
      return;
    }

    hooks.connected(self.clone()).await;
    self.run().await;

    self.state.store(AgentState::Draining as u8, Ordering::SeqCst);
    hooks.disconnected(self.clone()).await;

    self.conn.close();
    self.state.store(AgentState::Closed as u8, Ordering::SeqCst);
  }
}

impl MessageSink for Agent {
  fn write_msg(&self, msg: &(dyn Any + Send + Sync)) -> Result<()> {
    let bytes = self.processor.marshal_dyn(msg)?;
    self.conn.write(bytes);
    Ok(())
  }
}
