//! Session registry: the authoritative record of every connected player.
//!
//! Registry membership is the only notion of "connected" the game logic
//! has. Every mutation path treats a missing record as a no-op, which keeps
//! late messages racing a disconnect harmless.
//!
//! Each record also owns its attack window: a generation counter plus the
//! abort handle of the timer that will close the window. Starting a new
//! window cancels the previous timer, and removing the record cancels
//! whatever timer is still pending.

use log::{debug, info};
use shared::{Movement, Player, PlayerId, DEFAULT_VITALITY};
use std::collections::HashMap;
use tokio::task::AbortHandle;

#[derive(Debug, Default)]
struct ActionWindow {
    generation: u64,
    timer: Option<AbortHandle>,
}

impl ActionWindow {
    fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// A player plus the server-only bookkeeping attached to it.
#[derive(Debug)]
pub struct PlayerRecord {
    pub player: Player,
    action: ActionWindow,
}

impl PlayerRecord {
    fn new(id: PlayerId) -> Self {
        Self {
            player: Player::new(id),
            action: ActionWindow::default(),
        }
    }
}

/// Result of applying damage to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageOutcome {
    /// Vitality after the hit, already reset if the hit was lethal.
    pub health: i32,
    /// The hit took vitality to zero or below.
    pub defeated: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    records: HashMap<PlayerId, PlayerRecord>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record with default state.
    ///
    /// Returns `None` without touching the existing record if the id is
    /// already registered.
    pub fn register(&mut self, id: PlayerId) -> Option<&Player> {
        if self.records.contains_key(&id) {
            debug!("Player {} already registered", id);
            return None;
        }

        info!("Registered player {}", id);
        let record = self
            .records
            .entry(id.clone())
            .or_insert_with(|| PlayerRecord::new(id));
        Some(&record.player)
    }

    pub fn get(&self, id: &PlayerId) -> Option<&Player> {
        self.records.get(id).map(|record| &record.player)
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.records.contains_key(id)
    }

    /// Deletes the record and cancels its pending action timer, if any.
    pub fn remove(&mut self, id: &PlayerId) -> Option<Player> {
        let mut record = self.records.remove(id)?;
        record.action.cancel();
        info!("Removed player {}", id);
        Some(record.player)
    }

    /// Point-in-time copy of every player.
    pub fn snapshot(&self) -> HashMap<PlayerId, Player> {
        self.records
            .iter()
            .map(|(id, record)| (id.clone(), record.player.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Overwrites the transform fields present in `movement`.
    pub fn update_transform(&mut self, id: &PlayerId, movement: &Movement) -> Option<&Player> {
        let record = self.records.get_mut(id)?;
        let player = &mut record.player;

        player.position = movement.position;
        if let Some(rotation_y) = movement.rotation_y {
            player.rotation_y = rotation_y;
        }
        if let Some(motion) = &movement.motion {
            player.motion.clone_from(motion);
        }
        if let Some(mode) = movement.mode {
            player.mode = mode;
        }

        Some(&*player)
    }

    /// Opens a fresh attack window and returns its generation.
    ///
    /// Any timer armed for an earlier window is aborted; the caller is
    /// expected to arm a new one with [`attach_action_timer`].
    ///
    /// [`attach_action_timer`]: SessionRegistry::attach_action_timer
    pub fn begin_action(&mut self, id: &PlayerId) -> Option<u64> {
        let record = self.records.get_mut(id)?;
        record.action.cancel();
        record.action.generation += 1;
        record.player.is_attacking = true;
        Some(record.action.generation)
    }

    /// Stores the timer that will close window `generation`.
    ///
    /// If the record is gone or a newer window has started, the timer is
    /// aborted on the spot and `false` is returned.
    pub fn attach_action_timer(
        &mut self,
        id: &PlayerId,
        generation: u64,
        timer: AbortHandle,
    ) -> bool {
        match self.records.get_mut(id) {
            Some(record) if record.action.generation == generation => {
                record.action.cancel();
                record.action.timer = Some(timer);
                true
            }
            _ => {
                timer.abort();
                false
            }
        }
    }

    /// Closes window `generation`. Stale generations are ignored.
    pub fn end_action(&mut self, id: &PlayerId, generation: u64) -> bool {
        match self.records.get_mut(id) {
            Some(record) if record.action.generation == generation => {
                record.action.timer = None;
                record.player.is_attacking = false;
                true
            }
            _ => false,
        }
    }

    pub fn action_generation(&self, id: &PlayerId) -> Option<u64> {
        self.records.get(id).map(|record| record.action.generation)
    }

    /// Subtracts `amount` from the target's vitality.
    ///
    /// A hit that leaves vitality at or below zero resets it to the default
    /// before returning, so callers never observe a non-positive value.
    pub fn apply_damage(&mut self, id: &PlayerId, amount: i32) -> Option<DamageOutcome> {
        let player = &mut self.records.get_mut(id)?.player;

        player.health = player.health.saturating_sub(amount);
        let defeated = player.health <= 0;
        if defeated {
            player.health = DEFAULT_VITALITY;
        }

        Some(DamageOutcome {
            health: player.health,
            defeated,
        })
    }
}
