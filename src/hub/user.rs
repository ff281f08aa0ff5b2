use crate::{
  error::Result,
  id::{RoomId, UserId},
};
use std::{
  any::Any,
  fmt,
  sync::{Arc, PoisonError, RwLock},
};

/// Capability to deliver an outbound message to one participant.
///
/// [`Agent`](crate::Agent) implements this by encoding the message and
/// queueing it on its connection.
pub trait MessageSink: Send + Sync {
  fn write_msg(&self, msg: &(dyn Any + Send + Sync)) -> Result<()>;
}

/// A participant registered in the [`Hub`](super::Hub).
///
/// The current room is held by id only; the hub owns both sides of the
/// relation and updates it inside its own critical sections.
pub struct User {
  id: UserId,
  room: RwLock<Option<RoomId>>,
  sink: Arc<dyn MessageSink>,
}

impl User {
  pub fn new(id: impl Into<UserId>, sink: Arc<dyn MessageSink>) -> Self {
    Self {
      id: id.into(),
      room: RwLock::new(None),
      sink,
    }
  }

  pub fn id(&self) -> &UserId {
    &self.id
  }

  /// Room the user currently belongs to.
  pub fn room(&self) -> Option<RoomId> {
    self.room.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub(crate) fn set_room(&self, room: Option<RoomId>) {
    *self.room.write().unwrap_or_else(PoisonError::into_inner) = room;
  }

  pub fn write_msg<M: Any + Send + Sync>(&self, msg: &M) -> Result<()> {
    self.write_dyn(msg)
  }

  pub(crate) fn write_dyn(&self, msg: &(dyn Any + Send + Sync)) -> Result<()> {
    self.sink.write_msg(msg)
  }
}

impl fmt::Debug for User {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("User")
      .field("id", &self.id)
      .field("room", &self.room())
      .finish_non_exhaustive()
  }
}
