use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_VITALITY: i32 = 100;
pub const DEFAULT_MODE: i32 = 1;
pub const DEFAULT_MOTION: &str = "idle";
pub const ACTION_WINDOW_MS: u64 = 800;

/// Opaque per-connection identifier. Never reused within a server process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        PlayerId(value.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Server-side state of one connected player, as seen by every peer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub position: Vec3,
    pub rotation_y: f32,
    pub mode: i32,
    pub motion: String,
    pub health: i32,
    pub is_attacking: bool,
}

impl Player {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            position: Vec3::ZERO,
            rotation_y: 0.0,
            mode: DEFAULT_MODE,
            motion: DEFAULT_MOTION.to_string(),
            health: DEFAULT_VITALITY,
            is_attacking: false,
        }
    }
}

/// Transform update sent continuously while a player moves.
///
/// Optional fields that are absent keep the value already stored on the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub position: Vec3,
    #[serde(default)]
    pub rotation_y: Option<f32>,
    #[serde(default)]
    pub motion: Option<String>,
    #[serde(default)]
    pub mode: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attack {
    pub position: Vec3,
    #[serde(default)]
    pub rotation_y: Option<f32>,
    pub direction: Vec3,
    pub mode: i32,
    pub motion: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Projectile {
    pub position: Vec3,
    pub direction: Vec3,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub target_id: PlayerId,
    pub damage: i32,
}

/// Messages a client may send.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    PlayerMovement(Movement),
    PlayerAttack(Attack),
    MagicProjectile(Projectile),
    HitPlayer(Hit),
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::PlayerMovement(_) => "playerMovement",
            ClientMessage::PlayerAttack(_) => "playerAttack",
            ClientMessage::MagicProjectile(_) => "magicProjectile",
            ClientMessage::HitPlayer(_) => "hitPlayer",
        }
    }

    /// Rejects payloads the router must never act on.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientMessage::PlayerMovement(movement) => {
                check_vec("position", &movement.position)?;
                check_angle(movement.rotation_y)
            }
            ClientMessage::PlayerAttack(attack) => {
                check_vec("position", &attack.position)?;
                check_vec("direction", &attack.direction)?;
                check_angle(attack.rotation_y)
            }
            ClientMessage::MagicProjectile(projectile) => {
                check_vec("position", &projectile.position)?;
                check_vec("direction", &projectile.direction)
            }
            ClientMessage::HitPlayer(hit) => {
                if hit.target_id.0.is_empty() {
                    return Err(ProtocolError::Invalid("targetId is empty".to_string()));
                }
                if hit.damage < 0 {
                    return Err(ProtocolError::Invalid(format!(
                        "damage {} is negative",
                        hit.damage
                    )));
                }
                Ok(())
            }
        }
    }
}

fn check_vec(field: &str, value: &Vec3) -> Result<(), ProtocolError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ProtocolError::Invalid(format!("{} is not finite", field)))
    }
}

fn check_angle(value: Option<f32>) -> Result<(), ProtocolError> {
    match value {
        Some(angle) if !angle.is_finite() => {
            Err(ProtocolError::Invalid("rotationY is not finite".to_string()))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttackEvent {
    pub id: PlayerId,
    pub position: Vec3,
    pub rotation_y: f32,
    pub direction: Vec3,
    pub mode: i32,
    pub motion: String,
}

/// Messages the server sends.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    Connected {
        id: PlayerId,
    },
    Rejected {
        reason: String,
    },
    CurrentPlayers(HashMap<PlayerId, Player>),
    NewPlayer(Player),
    PlayerMoved(Player),
    PlayerAttacked(AttackEvent),
    #[serde(rename_all = "camelCase")]
    NewMagicProjectile {
        owner_id: PlayerId,
        position: Vec3,
        direction: Vec3,
    },
    #[serde(rename_all = "camelCase")]
    TookDamage {
        damage: i32,
        from_id: PlayerId,
        new_health: i32,
    },
    #[serde(rename_all = "camelCase")]
    DamageDealt {
        target_id: PlayerId,
        damage: i32,
    },
    #[serde(rename_all = "camelCase")]
    PlayerDied {
        killer_id: PlayerId,
    },
    PlayerDisconnected(PlayerId),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed binary payload: {0}")]
    Binary(#[from] bincode::Error),
    #[error("invalid payload: {0}")]
    Invalid(String),
}

pub fn encode_json<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode_json<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_binary<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(message)?)
}

pub fn decode_binary<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(bincode::deserialize(bytes)?)
}
