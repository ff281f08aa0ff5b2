use std::fmt;
use thiserror::Error;

/// The kind of directory entry an [`Error`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
  Room,
  User,
  Message,
}

impl fmt::Display for Entity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Entity::Room => f.write_str("room"),
      Entity::User => f.write_str("user"),
      Entity::Message => f.write_str("message"),
    }
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0} '{1}' already exists")]
  AlreadyExists(Entity, String),

  #[error("{0} '{1}' not found")]
  NotFound(Entity, String),

  #[error("Malformed envelope: {0}")]
  MalformedEnvelope(String),

  #[error("Message '{0}' is not registered")]
  Unregistered(String),

  #[error("Transport error: {0}")]
  Transport(String),

  #[error("Serialization error: {0}")]
  Codec(#[from] serde_json::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Room '{0}' still has members")]
  RoomNotEmpty(String),

  #[error("Room '{0}' is protected and cannot be removed")]
  ProtectedRoom(String),

  #[error("Invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("Server is already running")]
  AlreadyRunning,

  #[error("Server is not running")]
  NotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;
