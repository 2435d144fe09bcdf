//! Scripted bot for exercising a running relay server by hand.
//!
//! Connects over WebSocket, walks in a circle, attacks and fires a
//! projectile every few steps, and logs everything the server sends back.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use shared::{Attack, ClientMessage, Movement, Projectile, ServerMessage, Vec3};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay server test bot")]
struct Args {
    /// WebSocket URL of the server
    #[arg(short, long, default_value = "ws://127.0.0.1:3000")]
    server: String,

    /// Number of movement steps before disconnecting
    #[arg(long, default_value = "100")]
    steps: u32,

    /// Milliseconds between steps
    #[arg(long, default_value = "50")]
    step_ms: u64,

    /// Send bincode binary frames instead of JSON text
    #[arg(short, long)]
    binary: bool,
}

fn encode(message: &ClientMessage, binary: bool) -> Result<Message, shared::ProtocolError> {
    if binary {
        Ok(Message::Binary(shared::encode_binary(message)?))
    } else {
        Ok(Message::Text(shared::encode_json(message)?))
    }
}

fn decode(frame: &Message) -> Option<ServerMessage> {
    match frame {
        Message::Text(text) => shared::decode_json(text).ok(),
        Message::Binary(bytes) => shared::decode_binary(bytes).ok(),
        _ => None,
    }
}

fn script(step: u32) -> Vec<ClientMessage> {
    let angle = step as f32 * 0.1;
    let position = Vec3::new(angle.cos() * 5.0, 0.0, angle.sin() * 5.0);
    let facing = Vec3::new(-angle.sin(), 0.0, angle.cos());

    let mut messages = vec![ClientMessage::PlayerMovement(Movement {
        position,
        rotation_y: Some(angle),
        motion: Some("run".to_string()),
        mode: None,
    })];

    if step % 20 == 10 {
        messages.push(ClientMessage::PlayerAttack(Attack {
            position,
            rotation_y: Some(angle),
            direction: facing,
            mode: 1,
            motion: "slash".to_string(),
        }));
    }
    if step % 20 == 0 {
        messages.push(ClientMessage::MagicProjectile(Projectile {
            position,
            direction: facing,
        }));
    }

    messages
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let args = Args::parse();

    info!("Connecting to {}", args.server);
    let (ws_stream, _) = connect_async(args.server.as_str()).await?;
    let (mut sink, mut source) = ws_stream.split();

    let mut ticker = interval(Duration::from_millis(args.step_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut step = 0;

    while step < args.steps {
        tokio::select! {
            _ = ticker.tick() => {
                for message in script(step) {
                    sink.send(encode(&message, args.binary)?).await?;
                }
                step += 1;
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("Server closed the connection");
                        return Ok(());
                    }
                    Some(Ok(frame)) => {
                        if let Some(message) = decode(&frame) {
                            info!("Received: {:?}", message);
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }

    info!("Finished {} steps, disconnecting", args.steps);
    sink.close().await?;
    Ok(())
}
