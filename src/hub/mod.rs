//! Concurrency-safe directory of rooms and users.
//!
//! The [`Hub`] owns every room's membership and every registered user behind
//! a single lock. Each mutating operation is one critical section, so no
//! caller can observe a user in two rooms, or registered but in no room.
//!
//! ## Example Usage
//! ```no_run
//! use roomcast::{Hub, HubSettings, User};
//! # use roomcast::hub::MessageSink;
//! # use std::{any::Any, sync::Arc};
//! # struct Nowhere;
//! # impl MessageSink for Nowhere {
//! #   fn write_msg(&self, _: &(dyn Any + Send + Sync)) -> roomcast::Result<()> { Ok(()) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> roomcast::Result<()> {
//!   let hub = Hub::new(HubSettings::default());
//!   hub.add_room("lobby").await?;
//!   hub.add_user(User::new("alice", Arc::new(Nowhere)), "default").await?;
//!   hub.user_to_room("alice", "lobby").await?;
//!   assert_eq!(hub.user("alice").await?.room().unwrap().as_str(), "lobby");
//!   Ok(())
//! }
//! ```

use crate::{
  config::HubSettings,
  error::{Entity, Error, Result},
  id::{RoomId, UserId},
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

mod room;
mod user;

pub use room::Room;
pub use user::{MessageSink, User};

type Members = HashMap<UserId, Arc<User>>;

pub(crate) struct Directory {
  pub(crate) rooms: HashMap<RoomId, Members>,
  pub(crate) users: HashMap<UserId, Arc<User>>,
}

impl Directory {
  fn attach(&mut self, user: &Arc<User>, room_id: &RoomId) -> Result<()> {
    let members = self
      .rooms
      .get_mut(room_id)
      .ok_or_else(|| Error::NotFound(Entity::Room, room_id.to_string()))?;
    members.insert(user.id().clone(), user.clone());
    user.set_room(Some(room_id.clone()));
    Ok(())
  }

  /// Detach from the current room and attach to `target`; a no-op if already there.
  fn relocate(&mut self, user: &Arc<User>, target: RoomId, settings: &HubSettings) -> Result<()> {
    let current = user.room();
    if current.as_ref() == Some(&target) {
      return Ok(());
    }

    self.detach(user, settings);
    self.attach(user, &target)?;

    tracing::debug!(
      "User {} moved from {} to {}",
      user.id(),
      current.map_or_else(|| String::from("nowhere"), |id| id.to_string()),
      target
    );
    Ok(())
  }

  fn detach(&mut self, user: &User, settings: &HubSettings) {
    let Some(room_id) = user.room() else {
      return;
    };

    let now_empty = match self.rooms.get_mut(&room_id) {
      Some(members) => {
        members.remove(user.id());
        members.is_empty()
      }
      None => false,
    };
    user.set_room(None);

    if now_empty && settings.remove_empty_rooms && room_id != settings.default_room {
      self.rooms.remove(&room_id);
      tracing::debug!("Removed empty room {}", room_id);
    }
  }
}

/// Consistent point-in-time copy of the hub, taken under one lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubSnapshot {
  /// Room id -> sorted member ids
  pub rooms: HashMap<RoomId, Vec<UserId>>,
  /// User id -> the room the user points at
  pub users: HashMap<UserId, Option<RoomId>>,
}

impl HubSnapshot {
  /// Rooms whose membership lists `user_id`.
  pub fn rooms_containing(&self, user_id: &str) -> Vec<&RoomId> {
    self
      .rooms
      .iter()
      .filter(|(_, members)| members.iter().any(|id| id.as_str() == user_id))
      .map(|(room_id, _)| room_id)
      .collect()
  }
}

/// Directory of all rooms and users.
///
/// Cloning is cheap; clones share the same directory.
#[derive(Clone)]
pub struct Hub {
  directory: Arc<RwLock<Directory>>,
  settings: Arc<HubSettings>,
}

impl Hub {
  /// Create a hub holding only the (protected) default room.
  pub fn new(settings: HubSettings) -> Self {
    let mut rooms = HashMap::new();
    rooms.insert(settings.default_room.clone(), Members::new());

    Self {
      directory: Arc::new(RwLock::new(Directory {
        rooms,
        users: HashMap::new(),
      })),
      settings: Arc::new(settings),
    }
  }

  pub fn settings(&self) -> &HubSettings {
    &self.settings
  }

  pub fn default_room_id(&self) -> &RoomId {
    &self.settings.default_room
  }

  pub fn default_room(&self) -> Room {
    self.handle(self.settings.default_room.clone())
  }

  fn handle(&self, id: RoomId) -> Room {
    Room::new(id, self.directory.clone())
  }

  pub async fn add_room(&self, id: impl Into<RoomId>) -> Result<Room> {
    let id = id.into();
    let mut directory = self.directory.write().await;
    if directory.rooms.contains_key(&id) {
      return Err(Error::AlreadyExists(Entity::Room, id.to_string()));
    }
    directory.rooms.insert(id.clone(), Members::new());
    tracing::debug!("Created room {}", id);
    Ok(self.handle(id))
  }

  /// Look up a room, creating it if it does not exist yet.
  pub async fn get_or_create_room(&self, id: impl Into<RoomId>) -> Room {
    let id = id.into();
    {
      let directory = self.directory.read().await;
      if directory.rooms.contains_key(&id) {
        return self.handle(id);
      }
    }

    let mut directory = self.directory.write().await;
    // Double-check after acquiring write lock
    if !directory.rooms.contains_key(&id) {
      directory.rooms.insert(id.clone(), Members::new());
      tracing::debug!("Created room {}", id);
    }
    self.handle(id)
  }

  /// Remove an empty room.
  ///
  /// Occupied rooms and the default room are never removed, so no user is
  /// ever left pointing at a room that no longer exists.
  pub async fn remove_room(&self, id: impl AsRef<str>) -> Result<()> {
    let id = id.as_ref();
    let mut directory = self.directory.write().await;

    let members = directory
      .rooms
      .get(id)
      .ok_or_else(|| Error::NotFound(Entity::Room, id.to_string()))?;
    if self.settings.default_room.as_str() == id {
      return Err(Error::ProtectedRoom(id.to_string()));
    }
    if !members.is_empty() {
      return Err(Error::RoomNotEmpty(id.to_string()));
    }

    directory.rooms.remove(id);
    tracing::debug!("Removed room {}", id);
    Ok(())
  }

  pub async fn room(&self, id: impl AsRef<str>) -> Result<Room> {
    let id = id.as_ref();
    let directory = self.directory.read().await;
    match directory.rooms.get_key_value(id) {
      Some((id, _)) => Ok(self.handle(id.clone())),
      None => Err(Error::NotFound(Entity::Room, id.to_string())),
    }
  }

  pub async fn user(&self, id: impl AsRef<str>) -> Result<Arc<User>> {
    let id = id.as_ref();
    self
      .directory
      .read()
      .await
      .users
      .get(id)
      .cloned()
      .ok_or_else(|| Error::NotFound(Entity::User, id.to_string()))
  }

  /// Register `user` and place it in `room_id` in one step.
  pub async fn add_user(&self, user: User, room_id: impl AsRef<str>) -> Result<Arc<User>> {
    let room_id = room_id.as_ref();
    let mut directory = self.directory.write().await;

    if directory.users.contains_key(user.id()) {
      return Err(Error::AlreadyExists(Entity::User, user.id().to_string()));
    }
    let room_id = directory
      .rooms
      .get_key_value(room_id)
      .map(|(id, _)| id.clone())
      .ok_or_else(|| Error::NotFound(Entity::Room, room_id.to_string()))?;

    let user = Arc::new(user);
    directory.attach(&user, &room_id)?;
    directory.users.insert(user.id().clone(), user.clone());

    tracing::debug!("User {} joined room {}", user.id(), room_id);
    Ok(user)
  }

  /// Move a registered user into `room_id`, leaving its current room.
  ///
  /// Moving a user into the room it is already in succeeds without change.
  pub async fn user_to_room(&self, user_id: impl AsRef<str>, room_id: impl AsRef<str>) -> Result<()> {
    let (user_id, room_id) = (user_id.as_ref(), room_id.as_ref());
    let mut directory = self.directory.write().await;

    let user = directory
      .users
      .get(user_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(Entity::User, user_id.to_string()))?;
    let target = directory
      .rooms
      .get_key_value(room_id)
      .map(|(id, _)| id.clone())
      .ok_or_else(|| Error::NotFound(Entity::Room, room_id.to_string()))?;

    directory.relocate(&user, target, &self.settings)
  }

  /// Move a registered user into `room_id`, creating the room if it does not exist.
  ///
  /// Creation and the move share one critical section, so the room cannot be
  /// pruned in between. An unknown user fails with `NotFound` and creates nothing.
  pub async fn user_to_room_or_create(
    &self,
    user_id: impl AsRef<str>,
    room_id: impl Into<RoomId>,
  ) -> Result<()> {
    let (user_id, room_id) = (user_id.as_ref(), room_id.into());
    let mut directory = self.directory.write().await;

    let user = directory
      .users
      .get(user_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(Entity::User, user_id.to_string()))?;

    if !directory.rooms.contains_key(&room_id) {
      directory.rooms.insert(room_id.clone(), Members::new());
      tracing::debug!("Created room {}", room_id);
    }

    directory.relocate(&user, room_id, &self.settings)
  }

  /// Take a user out of its room and out of the hub.
  pub async fn remove_user(&self, user_id: impl AsRef<str>) -> Result<Arc<User>> {
    let user_id = user_id.as_ref();
    let mut directory = self.directory.write().await;

    let user = directory
      .users
      .remove(user_id)
      .ok_or_else(|| Error::NotFound(Entity::User, user_id.to_string()))?;
    directory.detach(&user, &self.settings);

    tracing::debug!("User {} removed", user_id);
    Ok(user)
  }

  /// Room the user is currently in.
  pub async fn room_of(&self, user_id: impl AsRef<str>) -> Result<Option<Room>> {
    let user = self.user(user_id).await?;
    Ok(user.room().map(|id| self.handle(id)))
  }

  pub async fn room_ids(&self) -> Vec<RoomId> {
    let mut ids: Vec<RoomId> = self.directory.read().await.rooms.keys().cloned().collect();
    ids.sort();
    ids
  }

  pub async fn user_count(&self) -> usize {
    self.directory.read().await.users.len()
  }

  pub async fn snapshot(&self) -> HubSnapshot {
    let directory = self.directory.read().await;

    let rooms = directory
      .rooms
      .iter()
      .map(|(id, members)| {
        let mut members: Vec<UserId> = members.keys().cloned().collect();
        members.sort();
        (id.clone(), members)
      })
      .collect();
    let users = directory
      .users
      .iter()
      .map(|(id, user)| (id.clone(), user.room()))
      .collect();

    HubSnapshot { rooms, users }
  }
}

impl Default for Hub {
  fn default() -> Self {
    Self::new(HubSettings::default())
  }
}
