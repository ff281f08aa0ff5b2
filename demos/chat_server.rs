//! Chat server: every client lands in the default room and sees everyone
//! else's messages.
//!
//! Run with `cargo run --example chat_server`, then connect to
//! `ws://localhost:3000/ws` and send `{"Say":{"text":"hello"}}`.

use roomcast::{hooks, Agent, Hub, Processor, ServerConfig, Service, WsServer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Say {
  text: String,
}

/// Sent to everyone else in the room
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Said {
  from: String,
  text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Members {
  room: String,
  count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WhoIsHere {}

fn processor(hub: &Hub) -> anyhow::Result<Processor> {
  let mut processor = Processor::new();

  let chat_hub = hub.clone();
  processor.register(move |agent: Arc<Agent>, say: Say| {
    let hub = chat_hub.clone();
    async move {
      let Ok(Some(room)) = hub.room_of(agent.id()).await else {
        return;
      };
      let said = Said {
        from: agent.id().to_string(),
        text: say.text,
      };
      let delivered = room.broadcast_except_one(agent.id(), &said).await;
      tracing::debug!("{} reached {} members of {}", agent.id(), delivered, room.id());
    }
  })?;

  let info_hub = hub.clone();
  processor.register(move |agent: Arc<Agent>, _: WhoIsHere| {
    let hub = info_hub.clone();
    async move {
      if let Ok(Some(room)) = hub.room_of(agent.id()).await {
        let members = Members {
          room: room.id().to_string(),
          count: room.len().await,
        };
        if let Err(e) = agent.send(&members) {
          tracing::warn!("Failed to answer {}: {}", agent.id(), e);
        }
      }
    }
  })?;

  processor.register_outbound::<Said>()?;
  processor.register_outbound::<Members>()?;
  Ok(processor)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  roomcast::init_tracing();

  let hub = Hub::default();
  let config = ServerConfig::from_env()?;
  let server = WsServer::new(config, Arc::new(processor(&hub)?)).with_hooks(hooks::default_hooks(&hub));

  let services: Vec<Arc<dyn Service>> = vec![Arc::new(server)];
  roomcast::run(&services, roomcast::shutdown_signal()).await;
  Ok(())
}
