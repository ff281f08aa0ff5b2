//! In-memory doubles shared by the unit tests.

use crate::{
  agent::Agent,
  conn::Conn,
  error::{Error, Result},
  hub::MessageSink,
  processor::Processor,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
  any::Any,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
  },
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Greet {
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
  pub text: String,
}

/// Connection fed from the test through [`MemoryConn::push`], recording every write.
pub struct MemoryConn {
  inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
  inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
  written: Mutex<Vec<Vec<u8>>>,
  closed: AtomicBool,
  cancel: CancellationToken,
}

impl MemoryConn {
  pub fn new() -> Arc<Self> {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    Arc::new(Self {
      inbound_tx,
      inbound_rx: AsyncMutex::new(inbound_rx),
      written: Mutex::new(Vec::new()),
      closed: AtomicBool::new(false),
      cancel: CancellationToken::new(),
    })
  }

  pub fn push(&self, data: impl Into<Vec<u8>>) {
    self.inbound_tx.send(data.into()).ok();
  }

  pub fn written(&self) -> Vec<String> {
    self
      .written
      .lock()
      .unwrap()
      .iter()
      .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
      .collect()
  }
}

#[async_trait]
impl Conn for MemoryConn {
  async fn read(&self) -> Result<Vec<u8>> {
    let mut inbound = self.inbound_rx.lock().await;
    tokio::select! {
      next = inbound.recv() => next.ok_or_else(|| Error::Transport("peer hung up".into())),
      _ = self.cancel.cancelled() => Err(Error::Transport("connection closed".into())),
    }
  }

  fn write(&self, data: Vec<u8>) {
    if self.is_closed() {
      return;
    }
    self.written.lock().unwrap().push(data);
  }

  fn close(&self) {
    if !self.closed.swap(true, Ordering::SeqCst) {
      self.cancel.cancel();
    }
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }
}

pub fn test_agent(id: &str, processor: Arc<Processor>) -> (Arc<Agent>, Arc<MemoryConn>) {
  let conn = MemoryConn::new();
  let agent = Arc::new(Agent::new(id.to_string(), conn.clone(), processor));
  (agent, conn)
}

/// Sink that keeps every [`Chat`] it is handed.
#[derive(Default)]
pub struct RecordingSink {
  received: Mutex<Vec<Chat>>,
}

impl RecordingSink {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn received(&self) -> Vec<Chat> {
    self.received.lock().unwrap().clone()
  }
}

impl MessageSink for RecordingSink {
  fn write_msg(&self, msg: &(dyn Any + Send + Sync)) -> Result<()> {
    let chat = msg
      .downcast_ref::<Chat>()
      .ok_or_else(|| Error::Unregistered("expected Chat".into()))?;
    self.received.lock().unwrap().push(chat.clone());
    Ok(())
  }
}

/// Sink whose every write fails.
pub struct FaultySink;

impl MessageSink for FaultySink {
  fn write_msg(&self, _msg: &(dyn Any + Send + Sync)) -> Result<()> {
    Err(Error::Transport("sink is broken".into()))
  }
}
