use super::{Directory, User};
use crate::id::RoomId;
use std::{any::Any, sync::Arc};
use tokio::sync::RwLock;

/// Handle to a room in a [`Hub`](super::Hub).
///
/// The hub owns the membership; a `Room` only names it. Every read takes a
/// fresh point-in-time copy, and once the room is removed the handle sees an
/// empty membership.
#[derive(Clone)]
pub struct Room {
  id: RoomId,
  directory: Arc<RwLock<Directory>>,
}

impl Room {
  pub(crate) fn new(id: RoomId, directory: Arc<RwLock<Directory>>) -> Self {
    Self { id, directory }
  }

  pub fn id(&self) -> &RoomId {
    &self.id
  }

  /// Copy of the current membership.
  pub async fn users(&self) -> Vec<Arc<User>> {
    self
      .directory
      .read()
      .await
      .rooms
      .get(&self.id)
      .map(|members| members.values().cloned().collect())
      .unwrap_or_default()
  }

  pub async fn user(&self, user_id: impl AsRef<str>) -> Option<Arc<User>> {
    self
      .directory
      .read()
      .await
      .rooms
      .get(&self.id)
      .and_then(|members| members.get(user_id.as_ref()).cloned())
  }

  pub async fn contains(&self, user_id: impl AsRef<str>) -> bool {
    self.user(user_id).await.is_some()
  }

  pub async fn len(&self) -> usize {
    self
      .directory
      .read()
      .await
      .rooms
      .get(&self.id)
      .map_or(0, |members| members.len())
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  /// Whether the room is still registered in the hub.
  pub async fn exists(&self) -> bool {
    self.directory.read().await.rooms.contains_key(&self.id)
  }

  /// Send `msg` to every member. Returns how many deliveries succeeded.
  pub async fn broadcast<M: Any + Send + Sync>(&self, msg: &M) -> usize {
    self.deliver(msg, None).await
  }

  /// Send `msg` to every member except `excluded`, typically the sender.
  pub async fn broadcast_except_one<M: Any + Send + Sync>(
    &self,
    excluded: impl AsRef<str>,
    msg: &M,
  ) -> usize {
    self.deliver(msg, Some(excluded.as_ref())).await
  }

  async fn deliver(&self, msg: &(dyn Any + Send + Sync), skip: Option<&str>) -> usize {
    // Snapshot first so no hub lock is held while writing to sinks
    let members = self.users().await;

    let mut delivered = 0;
    for user in members {
      if skip == Some(user.id().as_str()) {
        continue;
      }
      match user.write_dyn(msg) {
        Ok(()) => delivered += 1,
        Err(e) => tracing::warn!(
          "Failed to deliver message to {} in room {}: {}",
          user.id(),
          self.id,
          e
        ),
      }
    }
    delivered
  }
}

impl std::fmt::Debug for Room {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Room").field("id", &self.id).finish()
  }
}
