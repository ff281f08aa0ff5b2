//! Server and hub configuration.

use crate::id::RoomId;
use anyhow::{Context, Result};
use dotenv::dotenv;

/// Configuration for a [`WsServer`](crate::WsServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
  /// Socket address to bind, e.g. `0.0.0.0:3000`
  pub addr: String,
  /// HTTP path that accepts WebSocket upgrades
  pub path: String,
  /// Outbound messages buffered per connection before the client is
  /// considered too slow and disconnected
  pub write_queue_capacity: usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      addr: String::from("0.0.0.0:3000"),
      path: String::from("/ws"),
      write_queue_capacity: 64,
    }
  }
}

impl ServerConfig {
  pub fn new(addr: impl Into<String>) -> Self {
    Self {
      addr: addr.into(),
      ..Self::default()
    }
  }

  pub fn with_path(mut self, path: impl Into<String>) -> Self {
    self.path = path.into();
    self
  }

  /// Minimum capacity is 1.
  pub fn with_write_queue_capacity(mut self, capacity: usize) -> Self {
    self.write_queue_capacity = capacity.max(1);
    self
  }

  /// Build a config from the process environment (and `.env`, if present).
  ///
  /// Recognised variables:
  /// - `PORT`: listen on `0.0.0.0:{PORT}`
  /// - `BIND_ADDR`: full socket address, takes precedence over `PORT`
  /// - `WS_PATH`: upgrade path
  /// - `WRITE_QUEUE_CAPACITY`: per-connection outbound buffer
  pub fn from_env() -> Result<Self> {
    dotenv().ok();
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let mut config = Self::default();

    if let Some(port) = lookup("PORT") {
      let port: u16 = port
        .parse()
        .with_context(|| format!("PORT must be a valid port number, got '{}'", port))?;
      config.addr = format!("0.0.0.0:{}", port);
    }

    if let Some(addr) = lookup("BIND_ADDR") {
      config.addr = addr;
    }

    if let Some(path) = lookup("WS_PATH") {
      if !path.starts_with('/') {
        anyhow::bail!("WS_PATH must start with '/', got '{}'", path);
      }
      config.path = path;
    }

    if let Some(capacity) = lookup("WRITE_QUEUE_CAPACITY") {
      let capacity: usize = capacity
        .parse()
        .with_context(|| format!("WRITE_QUEUE_CAPACITY must be a number, got '{}'", capacity))?;
      config.write_queue_capacity = capacity.max(1);
    }

    Ok(config)
  }
}

/// Policy knobs for a [`Hub`](crate::Hub).
#[derive(Debug, Clone)]
pub struct HubSettings {
  /// Room created eagerly with the hub. It can never be removed.
  pub default_room: RoomId,
  /// Delete a room as soon as its last member leaves (the default room excepted)
  pub remove_empty_rooms: bool,
}

impl Default for HubSettings {
  fn default() -> Self {
    Self {
      default_room: RoomId::from("default"),
      remove_empty_rooms: false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key| vars.get(key).cloned()
  }

  #[test]
  fn defaults_without_env() {
    let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config.addr, "0.0.0.0:3000");
    assert_eq!(config.path, "/ws");
    assert_eq!(config.write_queue_capacity, 64);
  }

  #[test]
  fn bind_addr_overrides_port() {
    let config = ServerConfig::from_lookup(lookup(&[
      ("PORT", "8081"),
      ("BIND_ADDR", "127.0.0.1:9000"),
    ]))
    .unwrap();
    assert_eq!(config.addr, "127.0.0.1:9000");

    let config = ServerConfig::from_lookup(lookup(&[("PORT", "8081")])).unwrap();
    assert_eq!(config.addr, "0.0.0.0:8081");
  }

  #[test]
  fn rejects_bad_values() {
    assert!(ServerConfig::from_lookup(lookup(&[("PORT", "not-a-port")])).is_err());
    assert!(ServerConfig::from_lookup(lookup(&[("WS_PATH", "ws")])).is_err());
    assert!(ServerConfig::from_lookup(lookup(&[("WRITE_QUEUE_CAPACITY", "-1")])).is_err());
  }

  #[test]
  fn zero_capacity_is_clamped() {
    let config = ServerConfig::from_lookup(lookup(&[("WRITE_QUEUE_CAPACITY", "0")])).unwrap();
    assert_eq!(config.write_queue_capacity, 1);
    assert_eq!(ServerConfig::default().with_write_queue_capacity(0).write_queue_capacity, 1);
  }
}
