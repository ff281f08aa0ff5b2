//! Identifiers for rooms, users and connections.

use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt};

macro_rules! string_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(String);

    impl $name {
      pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
      }

      pub fn as_str(&self) -> &str {
        &self.0
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
      }
    }

    impl From<&str> for $name {
      fn from(id: &str) -> Self {
        Self(id.to_string())
      }
    }

    impl From<String> for $name {
      fn from(id: String) -> Self {
        Self(id)
      }
    }

    impl From<&String> for $name {
      fn from(id: &String) -> Self {
        Self(id.clone())
      }
    }

    impl AsRef<str> for $name {
      fn as_ref(&self) -> &str {
        &self.0
      }
    }

    impl Borrow<str> for $name {
      fn borrow(&self) -> &str {
        &self.0
      }
    }
  };
}

string_id!(
  /// Identity of a room. Never changes once the room exists.
  RoomId
);

string_id!(
  /// Identity of a user. Derived from the agent id when joining through the hooks.
  UserId
);

/// Source of connection ids.
///
/// Implementations must never hand out the same value twice during the
/// lifetime of the process.
pub trait IdGenerator: Send + Sync {
  fn generate(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
  fn generate(&self) -> String {
    uuid::Uuid::new_v4().to_string()
  }
}
