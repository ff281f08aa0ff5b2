//! Type-tagged message registry, envelope codec and dispatcher.
//!
//! Every message travels inside a single-key JSON envelope whose key names the
//! message type and whose value is the payload:
//!
//! ```text
//! {"Greet": {"name": "Alice"}}
//! ```
//!
//! Types are registered once at startup, each with its own handler, so there
//! is no central enum of every message the server understands.
//!
//! ## Example Usage
//! ```no_run
//! use roomcast::Processor;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Greet { name: String }
//!
//! let mut processor = Processor::new();
//! processor
//!   .register(|agent, greet: Greet| async move {
//!     tracing::info!("{} says hello as {}", agent.id(), greet.name);
//!   })
//!   .unwrap();
//!
//! let bytes = processor.marshal(&Greet { name: "Alice".into() }).unwrap();
//! assert_eq!(bytes, br#"{"Greet":{"name":"Alice"}}"#);
//! ```

use crate::{
  agent::Agent,
  error::{Entity, Error, Result},
};
use futures::{future::BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::{
  any::{type_name, Any, TypeId},
  collections::HashMap,
  future::Future,
  sync::Arc,
};

/// A decoded message whose concrete type is only known to the registry.
pub type AnyMessage = Box<dyn Any + Send + Sync>;

type Handler = Arc<dyn Fn(Arc<Agent>, AnyMessage) -> BoxFuture<'static, ()> + Send + Sync>;
type Encoder = fn(&(dyn Any + Send + Sync)) -> Result<Value>;
type Decoder = fn(Value) -> Result<AnyMessage>;

struct Registration {
  type_name: &'static str,
  encode: Encoder,
  decode: Decoder,
  handler: Option<Handler>,
}

/// Registry mapping wire tags to message types and their handlers.
///
/// Registration takes `&mut self`, so the registry is frozen once the
/// processor is shared behind an `Arc`.
#[derive(Default)]
pub struct Processor {
  registry: HashMap<String, Registration>,
  tags: HashMap<TypeId, String>,
}

impl Processor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `M` under a tag derived from its type name and route inbound
  /// `M` messages to `handler`.
  pub fn register<M, F, Fut>(&mut self, handler: F) -> Result<()>
  where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(Arc<Agent>, M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.register_as(derive_tag::<M>(), handler)
  }

  /// Same as [`register`](Self::register) with an explicit wire tag.
  pub fn register_as<M, F, Fut>(&mut self, tag: impl Into<String>, handler: F) -> Result<()>
  where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(Arc<Agent>, M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let handler: Handler = Arc::new(
      move |agent: Arc<Agent>, msg: AnyMessage| -> BoxFuture<'static, ()> {
        match msg.downcast::<M>() {
          Ok(msg) => handler(agent, *msg).boxed(),
          Err(_) => futures::future::ready(()).boxed(),
        }
      },
    );
    self.insert::<M>(tag.into(), Some(handler))
  }

  /// Register `M` for encoding only. Messages the server sends but never
  /// expects to receive go here.
  pub fn register_outbound<M>(&mut self) -> Result<()>
  where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
  {
    self.insert::<M>(derive_tag::<M>().to_string(), None)
  }

  fn insert<M>(&mut self, tag: String, handler: Option<Handler>) -> Result<()>
  where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
  {
    if self.registry.contains_key(&tag) {
      return Err(Error::AlreadyExists(Entity::Message, tag));
    }
    if let Some(existing) = self.tags.get(&TypeId::of::<M>()) {
      return Err(Error::AlreadyExists(Entity::Message, existing.clone()));
    }

    tracing::info!("Registering message {} as '{}'", type_name::<M>(), tag);

    self.tags.insert(TypeId::of::<M>(), tag.clone());
    self.registry.insert(
      tag,
      Registration {
        type_name: type_name::<M>(),
        encode: encode::<M>,
        decode: decode::<M>,
        handler,
      },
    );
    Ok(())
  }

  /// Wire tag registered for `M`, if any.
  pub fn tag_of<M: 'static>(&self) -> Option<&str> {
    self.tags.get(&TypeId::of::<M>()).map(String::as_str)
  }

  /// All registered tags, in no particular order.
  pub fn tags(&self) -> Vec<&str> {
    self.registry.keys().map(String::as_str).collect()
  }

  /// Encode `msg` as a `{tag: payload}` envelope.
  pub fn marshal<M: Any + Send + Sync>(&self, msg: &M) -> Result<Vec<u8>> {
    self.marshal_dyn(msg).map_err(|e| match e {
      Error::Unregistered(_) => Error::Unregistered(type_name::<M>().to_string()),
      other => other,
    })
  }

  /// Type-erased [`marshal`](Self::marshal), used by write sinks.
  pub fn marshal_dyn(&self, msg: &(dyn Any + Send + Sync)) -> Result<Vec<u8>> {
    let (tag, registration) = self
      .tags
      .get(&msg.type_id())
      .and_then(|tag| self.registry.get(tag).map(|r| (tag, r)))
      .ok_or_else(|| Error::Unregistered(String::from("unknown message type")))?;

    let payload = (registration.encode)(msg)?;
    let mut envelope = Map::with_capacity(1);
    envelope.insert(tag.clone(), payload);
    Ok(serde_json::to_vec(&envelope)?)
  }

  /// Decode a `{tag: payload}` envelope into a fresh instance of the
  /// registered type.
  pub fn unmarshal(&self, data: &[u8]) -> Result<AnyMessage> {
    let envelope: Map<String, Value> =
      serde_json::from_slice(data).map_err(|e| Error::MalformedEnvelope(e.to_string()))?;

    if envelope.len() != 1 {
      return Err(Error::MalformedEnvelope(format!(
        "expected exactly one top-level key, found {}",
        envelope.len()
      )));
    }

    let (tag, payload) = envelope
      .into_iter()
      .next()
      .ok_or_else(|| Error::MalformedEnvelope(String::from("empty envelope")))?;

    let registration = self
      .registry
      .get(&tag)
      .ok_or_else(|| Error::Unregistered(tag.clone()))?;

    (registration.decode)(payload)
  }

  /// Hand a decoded message to the handler registered for its type.
  pub async fn route(&self, agent: Arc<Agent>, msg: AnyMessage) -> Result<()> {
    let tag = self
      .tags
      .get(&(*msg).type_id())
      .ok_or_else(|| Error::Unregistered(String::from("unknown message type")))?;

    let registration = self
      .registry
      .get(tag)
      .ok_or_else(|| Error::Unregistered(tag.clone()))?;

    let handler = registration
      .handler
      .clone()
      .ok_or_else(|| Error::Unregistered(tag.clone()))?;

    tracing::debug!("Routing {} from agent {}", registration.type_name, agent.id());
    handler(agent, msg).await;
    Ok(())
  }
}

/// Last path segment of the type name, generics stripped: `app::msg::Greet<T>` becomes `Greet`.
fn derive_tag<M>() -> &'static str {
  let name = type_name::<M>();
  let name = name.split('<').next().unwrap_or(name);
  name.rsplit("::").next().unwrap_or(name)
}

fn encode<M: Serialize + 'static>(msg: &(dyn Any + Send + Sync)) -> Result<Value> {
  let msg = msg
    .downcast_ref::<M>()
    .ok_or_else(|| Error::Unregistered(type_name::<M>().to_string()))?;
  Ok(serde_json::to_value(msg)?)
}

fn decode<M: DeserializeOwned + Send + Sync + 'static>(payload: Value) -> Result<AnyMessage> {
  let msg: M = serde_json::from_value(payload)?;
  Ok(Box::new(msg))
}
