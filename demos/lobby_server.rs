//! Lobby server: clients start in the lobby and can create and switch rooms.
//!
//! Messages understood:
//! - `{"JoinRoom":{"room":"tables-1"}}` creates the room if needed and moves there
//! - `{"Leave":{}}` returns to the lobby
//! - `{"Say":{"text":"..."}}` talks to the current room
//! - `{"ListRooms":{}}` replies with every room and its size

use roomcast::{hooks, Agent, Hub, HubSettings, Processor, RoomId, ServerConfig, Service, WsServer};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JoinRoom {
  room: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Leave {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Say {
  text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListRooms {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Said {
  from: String,
  text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Joined {
  user: String,
  room: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Left {
  user: String,
  room: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Rooms {
  rooms: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Failed {
  reason: String,
}

/// Move the agent's user to `target`, creating it if needed, and tell both rooms.
async fn switch_room(hub: &Hub, agent: &Agent, target: &RoomId) {
  let user = agent.id().to_string();
  let previous = hub.room_of(&user).await.ok().flatten();

  if let Err(e) = hub.user_to_room_or_create(&user, target.clone()).await {
    agent.send(&Failed { reason: e.to_string() }).ok();
    return;
  }

  if let Some(previous) = previous.filter(|room| room.id() != target) {
    previous
      .broadcast(&Left {
        user: user.clone(),
        room: previous.id().to_string(),
      })
      .await;
  }
  if let Ok(room) = hub.room(target).await {
    room
      .broadcast(&Joined {
        user,
        room: target.to_string(),
      })
      .await;
  }
}

fn processor(hub: &Hub) -> anyhow::Result<Processor> {
  let mut processor = Processor::new();

  let join_hub = hub.clone();
  processor.register(move |agent: Arc<Agent>, join: JoinRoom| {
    let hub = join_hub.clone();
    async move {
      switch_room(&hub, &agent, &RoomId::from(join.room)).await;
    }
  })?;

  let leave_hub = hub.clone();
  processor.register(move |agent: Arc<Agent>, _: Leave| {
    let hub = leave_hub.clone();
    async move {
      let lobby = hub.default_room_id().clone();
      switch_room(&hub, &agent, &lobby).await;
    }
  })?;

  let say_hub = hub.clone();
  processor.register(move |agent: Arc<Agent>, say: Say| {
    let hub = say_hub.clone();
    async move {
      if let Ok(Some(room)) = hub.room_of(agent.id()).await {
        let said = Said {
          from: agent.id().to_string(),
          text: say.text,
        };
        room.broadcast_except_one(agent.id(), &said).await;
      }
    }
  })?;

  let list_hub = hub.clone();
  processor.register(move |agent: Arc<Agent>, _: ListRooms| {
    let hub = list_hub.clone();
    async move {
      let snapshot = hub.snapshot().await;
      let rooms = snapshot
        .rooms
        .into_iter()
        .map(|(id, users)| (id.to_string(), users.len()))
        .collect();
      agent.send(&Rooms { rooms }).ok();
    }
  })?;

  processor.register_outbound::<Said>()?;
  processor.register_outbound::<Joined>()?;
  processor.register_outbound::<Left>()?;
  processor.register_outbound::<Rooms>()?;
  processor.register_outbound::<Failed>()?;
  Ok(processor)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  roomcast::init_tracing();

  let hub = Hub::new(HubSettings {
    default_room: RoomId::from("lobby"),
    remove_empty_rooms: true,
  });
  let config = ServerConfig::from_env()?;
  let server = WsServer::new(config, Arc::new(processor(&hub)?)).with_hooks(hooks::default_hooks(&hub));

  let services: Vec<Arc<dyn Service>> = vec![Arc::new(server)];
  roomcast::run(&services, roomcast::shutdown_signal()).await;

  tracing::info!("Rooms at shutdown: {:?}", hub.room_ids().await);
  Ok(())
}
