//! Event routing: turns one inbound event into registry mutations plus the
//! fan-out that follows from them.
//!
//! The router never touches sockets. Every handler returns a list of
//! [`Outbound`] instructions built from the registry state *after* the
//! mutation, and the network layer delivers them.

use crate::network::ServerEvent;
use crate::registry::SessionRegistry;
use log::{debug, info};
use shared::{
    Attack, AttackEvent, ClientMessage, Hit, Movement, PlayerId, Projectile, ServerMessage,
};
use std::time::Duration;
use tokio::sync::mpsc;

/// Delivery instruction produced by the router.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Unicast to one connection.
    Send { to: PlayerId, message: ServerMessage },
    /// Every connection, minus `exclude` when set.
    Broadcast {
        message: ServerMessage,
        exclude: Option<PlayerId>,
    },
}

pub struct EventRouter {
    registry: SessionRegistry,
    events: mpsc::Sender<ServerEvent>,
    action_window: Duration,
}

impl EventRouter {
    /// `events` is where attack-window timers report their expiry.
    pub fn new(events: mpsc::Sender<ServerEvent>, action_window: Duration) -> Self {
        Self {
            registry: SessionRegistry::new(),
            events,
            action_window,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Registers a new player, hands it the current roster and announces it.
    pub fn connect(&mut self, id: &PlayerId) -> Vec<Outbound> {
        let others = self.registry.snapshot();
        let Some(player) = self.registry.register(id.clone()) else {
            return Vec::new();
        };

        vec![
            Outbound::Send {
                to: id.clone(),
                message: ServerMessage::Connected { id: id.clone() },
            },
            Outbound::Send {
                to: id.clone(),
                message: ServerMessage::CurrentPlayers(others),
            },
            Outbound::Broadcast {
                message: ServerMessage::NewPlayer(player.clone()),
                exclude: Some(id.clone()),
            },
        ]
    }

    pub fn handle(&mut self, source: &PlayerId, message: ClientMessage) -> Vec<Outbound> {
        match message {
            ClientMessage::PlayerMovement(movement) => self.on_movement(source, movement),
            ClientMessage::PlayerAttack(attack) => self.on_attack(source, attack),
            ClientMessage::MagicProjectile(projectile) => self.on_projectile(source, projectile),
            ClientMessage::HitPlayer(hit) => self.on_hit(source, hit),
        }
    }

    fn on_movement(&mut self, source: &PlayerId, movement: Movement) -> Vec<Outbound> {
        match self.registry.update_transform(source, &movement) {
            Some(player) => vec![Outbound::Broadcast {
                message: ServerMessage::PlayerMoved(player.clone()),
                exclude: Some(source.clone()),
            }],
            None => Vec::new(),
        }
    }

    fn on_attack(&mut self, source: &PlayerId, attack: Attack) -> Vec<Outbound> {
        let Some(generation) = self.registry.begin_action(source) else {
            return Vec::new();
        };
        self.arm_action_timer(source, generation);

        let stored_facing = self
            .registry
            .get(source)
            .map(|player| player.rotation_y)
            .unwrap_or_default();

        vec![Outbound::Broadcast {
            message: ServerMessage::PlayerAttacked(AttackEvent {
                id: source.clone(),
                position: attack.position,
                rotation_y: attack.rotation_y.unwrap_or(stored_facing),
                direction: attack.direction,
                mode: attack.mode,
                motion: attack.motion,
            }),
            exclude: Some(source.clone()),
        }]
    }

    fn arm_action_timer(&mut self, id: &PlayerId, generation: u64) {
        let events = self.events.clone();
        let window = self.action_window;
        let owner = id.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = events
                .send(ServerEvent::ActionExpired {
                    id: owner,
                    generation,
                })
                .await;
        });

        self.registry
            .attach_action_timer(id, generation, timer.abort_handle());
    }

    /// Closes an attack window if `generation` is still the current one.
    pub fn expire_action(&mut self, id: &PlayerId, generation: u64) -> bool {
        let closed = self.registry.end_action(id, generation);
        if closed {
            debug!("Attack window {} of {} closed", generation, id);
        }
        closed
    }

    fn on_projectile(&mut self, source: &PlayerId, projectile: Projectile) -> Vec<Outbound> {
        vec![Outbound::Broadcast {
            message: ServerMessage::NewMagicProjectile {
                owner_id: source.clone(),
                position: projectile.position,
                direction: projectile.direction,
            },
            exclude: Some(source.clone()),
        }]
    }

    fn on_hit(&mut self, source: &PlayerId, hit: Hit) -> Vec<Outbound> {
        let Some(outcome) = self.registry.apply_damage(&hit.target_id, hit.damage) else {
            debug!("Hit from {} on absent player {} ignored", source, hit.target_id);
            return Vec::new();
        };

        let mut outbound = vec![
            Outbound::Send {
                to: hit.target_id.clone(),
                message: ServerMessage::TookDamage {
                    damage: hit.damage,
                    from_id: source.clone(),
                    new_health: outcome.health,
                },
            },
            Outbound::Send {
                to: source.clone(),
                message: ServerMessage::DamageDealt {
                    target_id: hit.target_id.clone(),
                    damage: hit.damage,
                },
            },
        ];

        if outcome.defeated {
            info!("Player {} defeated by {}", hit.target_id, source);
            outbound.push(Outbound::Send {
                to: hit.target_id,
                message: ServerMessage::PlayerDied {
                    killer_id: source.clone(),
                },
            });
        }

        outbound
    }

    /// Removes the player and tells everyone still connected.
    pub fn disconnect(&mut self, id: &PlayerId) -> Vec<Outbound> {
        match self.registry.remove(id) {
            Some(_) => vec![Outbound::Broadcast {
                message: ServerMessage::PlayerDisconnected(id.clone()),
                exclude: None,
            }],
            None => Vec::new(),
        }
    }
}
