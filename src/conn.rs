//! Connection primitive and its WebSocket implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::BoxStream, Sink, SinkExt, Stream, StreamExt};
use std::{
  fmt,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
  },
  time::Duration,
};
use tokio::sync::{
  mpsc::{self, error::TrySendError},
  Mutex as AsyncMutex,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// How long the writer waits for the peer to accept the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A bidirectional message stream owned by one [`Agent`](crate::Agent).
#[async_trait]
pub trait Conn: Send + Sync {
  /// Wait for the next inbound message. Any error ends the session.
  async fn read(&self) -> Result<Vec<u8>>;

  /// Queue `data` for delivery. Never blocks; writes are delivered in call
  /// order and silently dropped once the connection is closed.
  fn write(&self, data: Vec<u8>);

  /// Close the connection. Calling it again does nothing.
  fn close(&self);

  fn is_closed(&self) -> bool;
}

/// WebSocket connection with a bounded outbound queue.
///
/// A dedicated writer task drains the queue in order. When the queue is full
/// the client is considered too slow and is disconnected, so broadcasting
/// callers never wait on a single peer.
pub struct WsConn {
  reader: AsyncMutex<BoxStream<'static, std::result::Result<Message, String>>>,
  writer: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
  closed: AtomicBool,
  cancel: CancellationToken,
}

impl WsConn {
  /// Wrap an upgraded socket, spawning its writer on `tracker`.
  pub fn spawn(socket: WebSocket, capacity: usize, tracker: &TaskTracker) -> Arc<Self> {
    let (sink, stream) = socket.split();
    Self::from_parts(sink, stream, capacity, tracker)
  }

  /// Build a connection from a separate frame sink and frame stream.
  pub fn from_parts<Si, St, E>(sink: Si, stream: St, capacity: usize, tracker: &TaskTracker) -> Arc<Self>
  where
    Si: Sink<Message> + Send + Unpin + 'static,
    Si::Error: fmt::Display + Send,
    St: Stream<Item = std::result::Result<Message, E>> + Send + 'static,
    E: fmt::Display + 'static,
  {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancellationToken::new();

    tracker.spawn(write_loop(sink, rx, cancel.clone()));

    Arc::new(Self {
      reader: AsyncMutex::new(stream.map(|frame| frame.map_err(|e| e.to_string())).boxed()),
      writer: Mutex::new(Some(tx)),
      closed: AtomicBool::new(false),
      cancel,
    })
  }
}

#[async_trait]
impl Conn for WsConn {
  async fn read(&self) -> Result<Vec<u8>> {
    let mut reader = self.reader.lock().await;
    loop {
      let frame = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => return Err(Error::Transport("connection closed".into())),
        frame = reader.next() => frame,
      };

      match frame {
        Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
        Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
        Some(Ok(Message::Close(_))) => return Err(Error::Transport("closed by peer".into())),
        Some(Err(e)) => return Err(Error::Transport(e)),
        None => return Err(Error::Transport("stream ended".into())),
      }
    }
  }

  fn write(&self, data: Vec<u8>) {
    let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(tx) = writer.as_ref() else {
      return;
    };

    match tx.try_send(data) {
      Ok(()) => {}
      Err(TrySendError::Full(_)) => {
        drop(writer);
        tracing::warn!("Write queue full, disconnecting slow client");
        self.close();
      }
      Err(TrySendError::Closed(_)) => {
        drop(writer);
        self.close();
      }
    }
  }

  fn close(&self) {
    if self.closed.swap(true, Ordering::SeqCst) {
      return;
    }
    self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
    self.cancel.cancel();
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst) || self.cancel.is_cancelled()
  }
}

async fn write_loop<Si>(mut sink: Si, mut rx: mpsc::Receiver<Vec<u8>>, cancel: CancellationToken)
where
  Si: Sink<Message> + Send + Unpin + 'static,
  Si::Error: fmt::Display + Send,
{
  loop {
    let data = tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      next = rx.recv() => match next {
        Some(data) => data,
        None => break,
      },
    };

    let frame = match String::from_utf8(data) {
      Ok(text) => Message::Text(text.into()),
      Err(e) => Message::Binary(e.into_bytes().into()),
    };

    let sent = tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      sent = sink.send(frame) => sent.map_err(|e| e.to_string()),
    };
    if let Err(e) = sent {
      tracing::debug!("Writer stopped: {}", e);
      // wake the reader so the session unwinds
      cancel.cancel();
      break;
    }
  }

  if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
    tracing::debug!("Peer did not acknowledge close in time");
  }
  tracing::debug!("Writer closed");
}
