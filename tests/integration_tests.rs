//! Integration tests for the relay server
//!
//! These tests run a real server on an ephemeral port and talk to it over
//! WebSocket connections, the same way game clients do.

use futures_util::{SinkExt, StreamExt};
use server::config::ServerConfig;
use server::network::{Server, ServerEvent};
use shared::{
    Attack, ClientMessage, Hit, Movement, PlayerId, Projectile, ServerMessage, Vec3, DEFAULT_MODE,
    DEFAULT_VITALITY,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(150);

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> (SocketAddr, mpsc::Sender<ServerEvent>) {
    let server = Server::bind(config).await.expect("Failed to bind server");
    let addr = server.local_addr().unwrap();
    let events = server.event_sender();
    tokio::spawn(server.run());
    (addr, events)
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}", addr))
        .await
        .expect("Failed to connect");
    ws
}

/// Next data frame, skipping heartbeat control frames.
async fn recv_frame(ws: &mut Ws) -> Message {
    loop {
        let frame = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Connection ended")
            .expect("Read error");
        match frame {
            Message::Ping(_) | Message::Pong(_) => continue,
            frame => return frame,
        }
    }
}

async fn recv(ws: &mut Ws) -> ServerMessage {
    match recv_frame(ws).await {
        Message::Text(text) => shared::decode_json(&text).unwrap(),
        Message::Binary(bytes) => shared::decode_binary(&bytes).unwrap(),
        other => panic!("Unexpected frame: {:?}", other),
    }
}

/// Asserts nothing but control frames arrive for a short while.
async fn assert_quiet(ws: &mut Ws) {
    let result = timeout(QUIET_PERIOD, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    assert!(result.is_err(), "Expected silence, got {:?}", result);
}

async fn send(ws: &mut Ws, message: &ClientMessage) {
    let text = shared::encode_json(message).unwrap();
    ws.send(Message::Text(text)).await.unwrap();
}

/// Connects and consumes the welcome, returning the assigned id and roster size.
async fn join(addr: SocketAddr) -> (Ws, PlayerId, usize) {
    let mut ws = connect(addr).await;
    let id = match recv(&mut ws).await {
        ServerMessage::Connected { id } => id,
        other => panic!("Expected connected, got {:?}", other),
    };
    let roster = match recv(&mut ws).await {
        ServerMessage::CurrentPlayers(players) => {
            assert!(!players.contains_key(&id));
            players.len()
        }
        other => panic!("Expected currentPlayers, got {:?}", other),
    };
    (ws, id, roster)
}

fn movement(x: f32) -> ClientMessage {
    ClientMessage::PlayerMovement(Movement {
        position: Vec3::new(x, 0.0, 0.0),
        rotation_y: None,
        motion: None,
        mode: None,
    })
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Walks through join, movement, a lethal hit and a departure.
    #[tokio::test]
    async fn full_session_flow() {
        let (addr, _events) = start_server(test_config()).await;

        let (mut a, a_id, roster) = join(addr).await;
        assert_eq!(roster, 0);

        let (mut b, b_id, roster) = join(addr).await;
        assert_eq!(roster, 1);
        match recv(&mut a).await {
            ServerMessage::NewPlayer(player) => {
                assert_eq!(player.id, b_id);
                assert_eq!(player.health, DEFAULT_VITALITY);
                assert_eq!(player.position, Vec3::ZERO);
            }
            other => panic!("Expected newPlayer, got {:?}", other),
        }

        let (mut c, c_id, roster) = join(addr).await;
        assert_eq!(roster, 2);
        assert!(matches!(recv(&mut a).await, ServerMessage::NewPlayer(p) if p.id == c_id));
        assert!(matches!(recv(&mut b).await, ServerMessage::NewPlayer(p) if p.id == c_id));

        send(&mut a, &movement(1.0)).await;
        for ws in [&mut b, &mut c] {
            match recv(ws).await {
                ServerMessage::PlayerMoved(player) => {
                    assert_eq!(player.id, a_id);
                    assert_eq!(player.position.x, 1.0);
                }
                other => panic!("Expected playerMoved, got {:?}", other),
            }
        }

        send(
            &mut c,
            &ClientMessage::HitPlayer(Hit {
                target_id: a_id.clone(),
                damage: 150,
            }),
        )
        .await;
        assert_eq!(
            recv(&mut a).await,
            ServerMessage::TookDamage {
                damage: 150,
                from_id: c_id.clone(),
                new_health: DEFAULT_VITALITY,
            }
        );
        assert_eq!(
            recv(&mut a).await,
            ServerMessage::PlayerDied {
                killer_id: c_id.clone()
            }
        );
        assert_eq!(
            recv(&mut c).await,
            ServerMessage::DamageDealt {
                target_id: a_id.clone(),
                damage: 150,
            }
        );

        b.close(None).await.unwrap();
        let departure = ServerMessage::PlayerDisconnected(b_id.clone());
        assert_eq!(recv(&mut a).await, departure);
        assert_eq!(recv(&mut c).await, departure);

        // Hits on a departed player do nothing
        send(
            &mut c,
            &ClientMessage::HitPlayer(Hit {
                target_id: b_id,
                damage: 10,
            }),
        )
        .await;
        send(
            &mut c,
            &ClientMessage::HitPlayer(Hit {
                target_id: a_id,
                damage: 10,
            }),
        )
        .await;
        assert_eq!(
            recv(&mut a).await,
            ServerMessage::TookDamage {
                damage: 10,
                from_id: c_id,
                new_health: DEFAULT_VITALITY - 10,
            }
        );
    }

    /// A full server refuses the connection instead of registering it.
    #[tokio::test]
    async fn capacity_limit_rejects_connection() {
        let (addr, _events) = start_server(ServerConfig {
            max_clients: 1,
            ..test_config()
        })
        .await;

        let (mut a, _a_id, _) = join(addr).await;
        let mut b = connect(addr).await;

        assert_eq!(
            recv(&mut b).await,
            ServerMessage::Rejected {
                reason: "Server full".to_string()
            }
        );
        let end = timeout(RECV_TIMEOUT, b.next()).await.unwrap();
        assert!(matches!(end, Some(Ok(Message::Close(_))) | None | Some(Err(_))));

        assert_quiet(&mut a).await;
    }

    /// A client that never answers pings is dropped and announced.
    #[tokio::test]
    async fn silent_client_times_out() {
        let (addr, _events) = start_server(ServerConfig {
            heartbeat_interval: Duration::from_millis(50),
            client_timeout: Duration::from_millis(300),
            ..test_config()
        })
        .await;

        let (mut a, _a_id, _) = join(addr).await;
        let (silent, silent_id, _) = join(addr).await;
        assert!(matches!(recv(&mut a).await, ServerMessage::NewPlayer(_)));

        // `a` keeps reading, which answers pings; `silent` never does
        let departure = timeout(Duration::from_secs(3), recv(&mut a)).await.unwrap();
        assert_eq!(departure, ServerMessage::PlayerDisconnected(silent_id));
        drop(silent);
    }

    #[tokio::test]
    async fn shutdown_event_stops_server() {
        let server = Server::bind(test_config()).await.unwrap();
        let events = server.event_sender();
        let handle = tokio::spawn(server.run());

        events.send(ServerEvent::Shutdown).await.unwrap();
        let result = timeout(RECV_TIMEOUT, handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}

/// ROUTING TESTS
mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn attack_flag_expires_after_window() {
        let (addr, _events) = start_server(ServerConfig {
            action_window: Duration::from_millis(100),
            ..test_config()
        })
        .await;

        let (mut a, a_id, _) = join(addr).await;
        let (mut b, _b_id, _) = join(addr).await;
        recv(&mut a).await;

        send(
            &mut a,
            &ClientMessage::PlayerAttack(Attack {
                position: Vec3::new(2.0, 0.0, 3.0),
                rotation_y: Some(1.5),
                direction: Vec3::new(0.0, 0.0, 1.0),
                mode: 2,
                motion: "slash".to_string(),
            }),
        )
        .await;
        match recv(&mut b).await {
            ServerMessage::PlayerAttacked(event) => {
                assert_eq!(event.id, a_id);
                assert_eq!(event.mode, 2);
                assert_eq!(event.motion, "slash");
                assert_eq!(event.rotation_y, 1.5);
            }
            other => panic!("Expected playerAttacked, got {:?}", other),
        }

        send(&mut a, &movement(2.0)).await;
        match recv(&mut b).await {
            ServerMessage::PlayerMoved(player) => assert!(player.is_attacking),
            other => panic!("Expected playerMoved, got {:?}", other),
        }

        sleep(Duration::from_millis(300)).await;
        send(&mut a, &movement(2.0)).await;
        match recv(&mut b).await {
            ServerMessage::PlayerMoved(player) => {
                assert!(!player.is_attacking);
                // Attacks do not change the stored stance
                assert_eq!(player.mode, DEFAULT_MODE);
            }
            other => panic!("Expected playerMoved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn projectile_reaches_everyone_but_owner() {
        let (addr, _events) = start_server(test_config()).await;
        let (mut a, a_id, _) = join(addr).await;
        let (mut b, _b_id, _) = join(addr).await;
        recv(&mut a).await;

        send(
            &mut a,
            &ClientMessage::MagicProjectile(Projectile {
                position: Vec3::new(1.0, 1.0, 1.0),
                direction: Vec3::new(1.0, 0.0, 0.0),
            }),
        )
        .await;

        assert_eq!(
            recv(&mut b).await,
            ServerMessage::NewMagicProjectile {
                owner_id: a_id,
                position: Vec3::new(1.0, 1.0, 1.0),
                direction: Vec3::new(1.0, 0.0, 0.0),
            }
        );
        assert_quiet(&mut a).await;
    }

    /// Replies follow the encoding the client last used.
    #[tokio::test]
    async fn binary_client_gets_binary_replies() {
        let (addr, _events) = start_server(test_config()).await;
        let (mut a, a_id, _) = join(addr).await;
        let (mut b, b_id, _) = join(addr).await;
        recv(&mut a).await;

        let hit = ClientMessage::HitPlayer(Hit {
            target_id: a_id.clone(),
            damage: 30,
        });
        b.send(Message::Binary(shared::encode_binary(&hit).unwrap()))
            .await
            .unwrap();

        match recv_frame(&mut b).await {
            Message::Binary(bytes) => {
                let reply: ServerMessage = shared::decode_binary(&bytes).unwrap();
                assert_eq!(
                    reply,
                    ServerMessage::DamageDealt {
                        target_id: a_id,
                        damage: 30,
                    }
                );
            }
            other => panic!("Expected a binary frame, got {:?}", other),
        }

        match recv_frame(&mut a).await {
            Message::Text(text) => {
                let reply: ServerMessage = shared::decode_json(&text).unwrap();
                assert_eq!(
                    reply,
                    ServerMessage::TookDamage {
                        damage: 30,
                        from_id: b_id,
                        new_health: DEFAULT_VITALITY - 30,
                    }
                );
            }
            other => panic!("Expected a text frame, got {:?}", other),
        }
    }

    /// Bad frames are dropped without closing the connection.
    #[tokio::test]
    async fn malformed_messages_are_ignored() {
        let (addr, _events) = start_server(test_config()).await;
        let (mut a, a_id, _) = join(addr).await;
        let (mut b, _b_id, _) = join(addr).await;
        recv(&mut a).await;

        let junk = [
            "not json",
            r#"{"teleport":{"x":1}}"#,
            r#"{"hitPlayer":{"targetId":"","damage":5}}"#,
            r#"{"hitPlayer":{"targetId":"someone","damage":-5}}"#,
            r#"{"playerMovement":{"position":{"x":1.0}}}"#,
        ];
        for text in junk {
            a.send(Message::Text(text.to_string())).await.unwrap();
        }
        assert_quiet(&mut b).await;

        send(&mut a, &movement(4.0)).await;
        match recv(&mut b).await {
            ServerMessage::PlayerMoved(player) => {
                assert_eq!(player.id, a_id);
                assert_eq!(player.position.x, 4.0);
            }
            other => panic!("Expected playerMoved, got {:?}", other),
        }
    }

    /// JSON field names match what browser clients send.
    #[tokio::test]
    async fn accepts_handwritten_json() {
        let (addr, _events) = start_server(test_config()).await;
        let (mut a, _a_id, _) = join(addr).await;
        let (mut b, _b_id, _) = join(addr).await;
        recv(&mut a).await;

        let text = r#"{"playerMovement":{"position":{"x":1.0,"y":2.0,"z":3.0},"rotationY":0.5,"motion":"walk"}}"#;
        a.send(Message::Text(text.to_string())).await.unwrap();

        match recv_frame(&mut b).await {
            Message::Text(reply) => {
                let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
                let moved = &value["playerMoved"];
                assert_eq!(moved["position"]["y"], 2.0);
                assert_eq!(moved["rotationY"], 0.5);
                assert_eq!(moved["motion"], "walk");
                assert_eq!(moved["isAttacking"], false);
            }
            other => panic!("Expected a text frame, got {:?}", other),
        }
    }
}
