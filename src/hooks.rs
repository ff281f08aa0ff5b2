//! Connection lifecycle callbacks.
//!
//! [`Hooks`] run once per connection: `on_connect` before the agent starts
//! reading, `on_disconnect` after its read loop has ended. The helpers in this
//! module wire agents into a [`Hub`] the usual way: join the default room on
//! connect, leave the hub on disconnect.

use crate::{
  agent::Agent,
  hub::{Hub, User},
  id::RoomId,
};
use futures::{future::BoxFuture, FutureExt};
use std::{future::Future, sync::Arc};

/// Agent metadata key holding the [`RoomId`] joined on connect.
pub const ROOM_KEY: &str = "room";

/// A lifecycle callback.
pub type Hook = Arc<dyn Fn(Arc<Agent>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Optional connect and disconnect callbacks.
#[derive(Clone, Default)]
pub struct Hooks {
  on_connect: Option<Hook>,
  on_disconnect: Option<Hook>,
}

impl Hooks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the callback run after a connection is accepted.
  pub fn on_connect<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(Arc<Agent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.on_connect = Some(Arc::new(move |agent: Arc<Agent>| f(agent).boxed()));
    self
  }

  /// Set the callback run once the connection's read loop has ended.
  pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(Arc<Agent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.on_disconnect = Some(Arc::new(move |agent: Arc<Agent>| f(agent).boxed()));
    self
  }

  pub fn with_connect_hook(mut self, hook: Hook) -> Self {
    self.on_connect = Some(hook);
    self
  }

  pub fn with_disconnect_hook(mut self, hook: Hook) -> Self {
    self.on_disconnect = Some(hook);
    self
  }

  pub(crate) async fn connected(&self, agent: Arc<Agent>) {
    if let Some(hook) = &self.on_connect {
      hook(agent).await;
    }
  }

  pub(crate) async fn disconnected(&self, agent: Arc<Agent>) {
    if let Some(hook) = &self.on_disconnect {
      hook(agent).await;
    }
  }
}

/// Register each new agent as a user of `hub` in its default room.
///
/// If the agent cannot join, its connection is closed. On success the room id
/// is stored in the agent's metadata under [`ROOM_KEY`].
pub fn join_default_room(hub: Hub) -> Hook {
  Arc::new(move |agent: Arc<Agent>| {
    let hub = hub.clone();
    async move {
      tracing::info!("Agent connected {}", agent.id());
      let room_id = hub.default_room_id().clone();
      let user = User::new(agent.id(), agent.clone());

      match hub.add_user(user, &room_id).await {
        Ok(_) => agent.set_value(ROOM_KEY, room_id).await,
        Err(e) => {
          tracing::warn!("Agent {} could not join {}: {}", agent.id(), room_id, e);
          agent.close();
        }
      }
    }
    .boxed()
  })
}

/// Remove each disconnecting agent's user from `hub`.
pub fn leave_hub(hub: Hub) -> Hook {
  Arc::new(move |agent: Arc<Agent>| {
    let hub = hub.clone();
    async move {
      tracing::info!("Agent disconnected {}", agent.id());
      if let Err(e) = hub.remove_user(agent.id()).await {
        tracing::warn!("Failed to remove user {}: {}", agent.id(), e);
      }
    }
    .boxed()
  })
}

/// [`join_default_room`] on connect and [`leave_hub`] on disconnect.
pub fn default_hooks(hub: &Hub) -> Hooks {
  Hooks::new()
    .with_connect_hook(join_default_room(hub.clone()))
    .with_disconnect_hook(leave_hub(hub.clone()))
}

/// Room the agent joined through [`join_default_room`], if any.
pub async fn joined_room(agent: &Agent) -> Option<RoomId> {
  agent.value::<RoomId>(ROOM_KEY).await.map(|id| (*id).clone())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    conn::Conn,
    processor::Processor,
    testing::{test_agent, Chat},
  };
  use std::time::Duration;

  fn chat_processor() -> Arc<Processor> {
    let mut processor = Processor::new();
    processor.register_outbound::<Chat>().unwrap();
    Arc::new(processor)
  }

  #[tokio::test]
  async fn connect_joins_default_room_and_disconnect_leaves() {
    let hub = Hub::default();
    let hooks = default_hooks(&hub);
    let (agent, conn) = test_agent("a1", chat_processor());

    hooks.connected(agent.clone()).await;
    assert!(hub.default_room().contains("a1").await);
    assert_eq!(joined_room(&agent).await, Some(RoomId::from("default")));

    // the user writes through the agent
    hub.default_room().broadcast(&Chat { text: "hi".into() }).await;
    assert_eq!(conn.written(), vec![r#"{"Chat":{"text":"hi"}}"#]);

    hooks.disconnected(agent.clone()).await;
    assert!(hub.user("a1").await.is_err());
    assert!(hub.default_room().is_empty().await);
  }

  #[tokio::test]
  async fn failed_join_closes_the_connection() {
    let hub = Hub::default();
    let hooks = default_hooks(&hub);
    let (first, _) = test_agent("dup", chat_processor());
    let (second, conn) = test_agent("dup", chat_processor());

    hooks.connected(first).await;
    hooks.connected(second.clone()).await;

    assert!(conn.is_closed());
    assert!(joined_room(&second).await.is_none());
    assert!(tokio::time::timeout(Duration::from_secs(1), second.run()).await.is_ok());
  }

  #[tokio::test]
  async fn empty_hooks_do_nothing() {
    let hooks = Hooks::new();
    let (agent, conn) = test_agent("a1", chat_processor());
    hooks.connected(agent.clone()).await;
    hooks.disconnected(agent).await;
    assert!(!conn.is_closed());
  }
}
