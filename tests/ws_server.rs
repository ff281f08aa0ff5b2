use futures::{SinkExt, StreamExt};
use roomcast::{hooks, Agent, Hooks, Hub, Processor, ServerConfig, WsServer};
use serde::{Deserialize, Serialize};
use std::{
  net::SocketAddr,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
  time::Duration,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize, Deserialize)]
struct Echo {
  text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Echoed {
  text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Say {
  text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Said {
  from: String,
  text: String,
}

fn processor(hub: &Hub) -> Arc<Processor> {
  let mut processor = Processor::new();
  processor
    .register(|agent, echo: Echo| async move {
      agent.send(&Echoed { text: echo.text }).ok();
    })
    .unwrap();
  processor
    .register({
      let hub = hub.clone();
      move |agent: Arc<Agent>, say: Say| {
        let hub = hub.clone();
        async move {
          if let Ok(Some(room)) = hub.room_of(agent.id()).await {
            let said = Said {
              from: agent.id().to_string(),
              text: say.text,
            };
            room.broadcast_except_one(agent.id(), &said).await;
          }
        }
      }
    })
    .unwrap();
  processor.register_outbound::<Echoed>().unwrap();
  processor.register_outbound::<Said>().unwrap();
  Arc::new(processor)
}

async fn start(hub: &Hub, hooks: Hooks) -> (WsServer, SocketAddr) {
  let server = WsServer::new(ServerConfig::new("127.0.0.1:0"), processor(hub)).with_hooks(hooks);
  let addr = server.start().await.unwrap();
  (server, addr)
}

async fn connect(addr: SocketAddr) -> Client {
  let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
  client
}

async fn send(client: &mut Client, text: &str) {
  client.send(Message::Text(text.into())).await.unwrap();
}

async fn recv(client: &mut Client) -> String {
  loop {
    let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
      .await
      .expect("timed out waiting for a message")
      .expect("connection ended")
      .unwrap();
    if let Message::Text(text) = frame {
      return text.as_str().to_string();
    }
  }
}

async fn wait_for_users(hub: &Hub, count: usize) {
  tokio::time::timeout(Duration::from_secs(2), async {
    while hub.user_count().await != count {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("users never joined");
}

#[tokio::test]
async fn routes_messages_to_their_handler() {
  let hub = Hub::default();
  let (server, addr) = start(&hub, hooks::default_hooks(&hub)).await;

  let mut client = connect(addr).await;
  send(&mut client, r#"{"Echo":{"text":"hello"}}"#).await;
  assert_eq!(recv(&mut client).await, r#"{"Echoed":{"text":"hello"}}"#);

  server.stop().await.unwrap();
}

#[tokio::test]
async fn bad_messages_do_not_end_the_session() {
  let hub = Hub::default();
  let (server, addr) = start(&hub, hooks::default_hooks(&hub)).await;

  let mut client = connect(addr).await;
  send(&mut client, "not json").await;
  send(&mut client, r#"{"Unknown":{}}"#).await;
  send(&mut client, r#"{"Echo":{"text":1}}"#).await;
  send(&mut client, r#"{"Echo":{"text":"still here"}}"#).await;
  assert_eq!(recv(&mut client).await, r#"{"Echoed":{"text":"still here"}}"#);

  server.stop().await.unwrap();
}

#[tokio::test]
async fn broadcast_reaches_everyone_but_the_sender() {
  let hub = Hub::default();
  let (server, addr) = start(&hub, hooks::default_hooks(&hub)).await;

  let mut alice = connect(addr).await;
  let mut bob = connect(addr).await;
  let mut carol = connect(addr).await;
  wait_for_users(&hub, 3).await;

  send(&mut alice, r#"{"Say":{"text":"hi all"}}"#).await;

  for client in [&mut bob, &mut carol] {
    let said: serde_json::Value = serde_json::from_str(&recv(client).await).unwrap();
    assert_eq!(said["Said"]["text"], "hi all");
  }

  // alice only sees her own echo, not her broadcast
  send(&mut alice, r#"{"Echo":{"text":"me"}}"#).await;
  assert_eq!(recv(&mut alice).await, r#"{"Echoed":{"text":"me"}}"#);

  server.stop().await.unwrap();
}

#[tokio::test]
async fn client_disconnect_leaves_the_hub() {
  let hub = Hub::default();
  let (server, addr) = start(&hub, hooks::default_hooks(&hub)).await;

  let mut client = connect(addr).await;
  wait_for_users(&hub, 1).await;

  client.close(None).await.unwrap();
  wait_for_users(&hub, 0).await;
  assert!(hub.default_room().is_empty().await);

  server.stop().await.unwrap();
}

#[tokio::test]
async fn stop_waits_for_every_disconnect_hook() {
  let hub = Hub::default();
  let finished = Arc::new(AtomicUsize::new(0));

  let leave = hooks::leave_hub(hub.clone());
  let hooks = Hooks::new()
    .with_connect_hook(hooks::join_default_room(hub.clone()))
    .on_disconnect({
      let finished = finished.clone();
      move |agent: Arc<Agent>| {
        let leave = leave.clone();
        let finished = finished.clone();
        async move {
          tokio::time::sleep(Duration::from_millis(50)).await;
          leave(agent).await;
          finished.fetch_add(1, Ordering::SeqCst);
        }
      }
    });
  let (server, addr) = start(&hub, hooks).await;

  let mut clients = Vec::new();
  for _ in 0..5 {
    clients.push(connect(addr).await);
  }
  wait_for_users(&hub, 5).await;
  assert_eq!(server.active_connections().await, 5);

  server.stop().await.unwrap();

  assert_eq!(finished.load(Ordering::SeqCst), 5);
  assert_eq!(hub.user_count().await, 0);
  assert_eq!(server.active_connections().await, 0);

  // every client sees its connection end
  for mut client in clients {
    let end = tokio::time::timeout(Duration::from_secs(2), async {
      while let Some(Ok(frame)) = client.next().await {
        if frame.is_close() {
          break;
        }
      }
    })
    .await;
    assert!(end.is_ok());
  }
}

#[tokio::test]
async fn custom_path_is_served() {
  let hub = Hub::default();
  let config = ServerConfig::new("127.0.0.1:0").with_path("/game");
  let server = WsServer::new(config, processor(&hub)).with_hooks(hooks::default_hooks(&hub));
  let addr = server.start().await.unwrap();

  assert!(connect_async(format!("ws://{}/ws", addr)).await.is_err());
  let (mut client, _) = connect_async(format!("ws://{}/game", addr)).await.unwrap();
  send(&mut client, r#"{"Echo":{"text":"x"}}"#).await;
  assert_eq!(recv(&mut client).await, r#"{"Echoed":{"text":"x"}}"#);

  server.stop().await.unwrap();
}
