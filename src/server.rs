//! WebSocket server: accepts connections, wraps each in an [`Agent`] and
//! drains them all on shutdown.

use crate::{
  agent::Agent,
  config::ServerConfig,
  conn::{Conn, WsConn},
  error::{Error, Result},
  hooks::Hooks,
  id::{IdGenerator, UuidGenerator},
  processor::Processor,
};
use axum::{
  extract::{ws::WebSocket, State, WebSocketUpgrade},
  response::Response,
  routing::get,
  Router,
};
use std::{
  collections::HashMap,
  net::SocketAddr,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::trace::TraceLayer;

/// Connections currently served, kept for forced shutdown.
#[derive(Default)]
struct ConnSet {
  active: HashMap<u64, Arc<WsConn>>,
  stopping: bool,
}

/// State shared by every connection of one server run.
struct Shared {
  processor: Arc<Processor>,
  ids: Arc<dyn IdGenerator>,
  hooks: Hooks,
  write_queue_capacity: usize,
  conns: Mutex<ConnSet>,
  next_conn: AtomicU64,
  tracker: TaskTracker,
}

impl Shared {
  /// Track `conn`; refused once the server is stopping.
  async fn add_connection(&self, conn: Arc<WsConn>) -> Option<u64> {
    let mut conns = self.conns.lock().await;
    if conns.stopping {
      return None;
    }
    let key = self.next_conn.fetch_add(1, Ordering::Relaxed);
    conns.active.insert(key, conn);
    tracing::debug!("Added connection {} ({} active)", key, conns.active.len());
    Some(key)
  }

  async fn remove_connection(&self, key: u64) {
    let mut conns = self.conns.lock().await;
    if let Some(conn) = conns.active.remove(&key) {
      conn.close();
    }
    tracing::debug!("Removed connection {} ({} active)", key, conns.active.len());
  }

  /// Refuse new connections and close every tracked one.
  async fn close_all(&self) -> usize {
    let mut conns = self.conns.lock().await;
    conns.stopping = true;
    for conn in conns.active.values() {
      conn.close();
    }
    conns.active.len()
  }
}

struct Running {
  local_addr: SocketAddr,
  shutdown: CancellationToken,
  serve: JoinHandle<()>,
  shared: Arc<Shared>,
}

/// WebSocket server hosting one [`Agent`] per connection.
///
/// ## Example
/// ```no_run
/// use roomcast::{hooks, Hub, Processor, ServerConfig, WsServer};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> roomcast::Result<()> {
///   let hub = Hub::default();
///   let server = WsServer::new(ServerConfig::new("127.0.0.1:8081"), Arc::new(Processor::new()))
///     .with_hooks(hooks::default_hooks(&hub));
///
///   server.start().await?;
///   tokio::signal::ctrl_c().await?;
///   server.stop().await
/// }
/// ```
pub struct WsServer {
  config: ServerConfig,
  processor: Arc<Processor>,
  ids: Arc<dyn IdGenerator>,
  hooks: Hooks,
  running: Mutex<Option<Running>>,
}

impl WsServer {
  pub fn new(config: ServerConfig, processor: Arc<Processor>) -> Self {
    Self {
      config,
      processor,
      ids: Arc::new(UuidGenerator),
      hooks: Hooks::default(),
      running: Mutex::new(None),
    }
  }

  /// Use a custom source of agent ids.
  pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
    self.ids = Arc::new(ids);
    self
  }

  pub fn with_hooks(mut self, hooks: Hooks) -> Self {
    self.hooks = hooks;
    self
  }

  pub fn config(&self) -> &ServerConfig {
    &self.config
  }

  /// Bind the listener and accept connections in the background.
  ///
  /// Returns the bound address, which differs from the configured one when
  /// binding to port 0.
  pub async fn start(&self) -> Result<SocketAddr> {
    let mut running = self.running.lock().await;
    if running.is_some() {
      return Err(Error::AlreadyRunning);
    }
    if !self.config.path.starts_with('/') {
      return Err(Error::InvalidConfig(format!(
        "path must start with '/', got '{}'",
        self.config.path
      )));
    }

    let listener = TcpListener::bind(&self.config.addr).await?;
    let local_addr = listener.local_addr()?;

    let shared = Arc::new(Shared {
      processor: self.processor.clone(),
      ids: self.ids.clone(),
      hooks: self.hooks.clone(),
      write_queue_capacity: self.config.write_queue_capacity,
      conns: Mutex::new(ConnSet::default()),
      next_conn: AtomicU64::new(0),
      tracker: TaskTracker::new(),
    });

    let app = Router::new()
      .route(&self.config.path, get(upgrade))
      .layer(TraceLayer::new_for_http())
      .with_state(shared.clone());

    let shutdown = CancellationToken::new();
    let serve = tokio::spawn({
      let shutdown = shutdown.clone();
      async move {
        let result = axum::serve(listener, app)
          .with_graceful_shutdown(async move { shutdown.cancelled().await })
          .await;
        if let Err(e) = result {
          tracing::error!("Server on {} failed: {}", local_addr, e);
        }
      }
    });

    tracing::info!("WebSocket server listening on {}{}", local_addr, self.config.path);
    *running = Some(Running {
      local_addr,
      shutdown,
      serve,
      shared,
    });
    Ok(local_addr)
  }

  /// Stop accepting, close every connection and wait until each one has run
  /// its disconnect hook.
  pub async fn stop(&self) -> Result<()> {
    let Running {
      local_addr,
      shutdown,
      serve,
      shared,
    } = self.running.lock().await.take().ok_or(Error::NotRunning)?;

    shutdown.cancel();

    let closing = shared.close_all().await;
    tracing::info!("Closing {} connections on {}", closing, local_addr);

    if let Err(e) = serve.await {
      tracing::error!("Server task on {} panicked: {}", local_addr, e);
    }

    shared.tracker.close();
    shared.tracker.wait().await;

    tracing::info!("Server on {} stopped", local_addr);
    Ok(())
  }

  pub async fn local_addr(&self) -> Option<SocketAddr> {
    self.running.lock().await.as_ref().map(|r| r.local_addr)
  }

  pub async fn is_running(&self) -> bool {
    self.running.lock().await.is_some()
  }

  /// Number of connections currently being served.
  pub async fn active_connections(&self) -> usize {
    let shared = match self.running.lock().await.as_ref() {
      Some(running) => running.shared.clone(),
      None => return 0,
    };
    let conns = shared.conns.lock().await;
    conns.active.len()
  }
}

async fn upgrade(State(shared): State<Arc<Shared>>, ws: WebSocketUpgrade) -> Response {
  // Held until the session ends so `stop` waits for it
  let token = shared.tracker.token();
  ws.on_upgrade(move |socket| async move {
    serve_connection(shared, socket).await;
    drop(token);
  })
}

async fn serve_connection(shared: Arc<Shared>, socket: WebSocket) {
  let conn = WsConn::spawn(socket, shared.write_queue_capacity, &shared.tracker);

  let Some(key) = shared.add_connection(conn.clone()).await else {
    tracing::debug!("Rejecting connection, server is stopping");
    conn.close();
    return;
  };

  let agent = Arc::new(Agent::new(
    shared.ids.generate(),
    conn,
    shared.processor.clone(),
  ));
  agent.clone().serve(&shared.hooks).await;

  shared.remove_connection(key).await;
}
