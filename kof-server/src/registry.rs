// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Per-game player roster with its port and pid indexes.
//!
//! All three maps live behind one mutex so registration, command issue and
//! score updates never observe a half-updated index. The lock is never held
//! across an await point.

use std::{
    collections::HashMap,
    ops::RangeInclusive,
    sync::{Mutex, MutexGuard, PoisonError},
};

use kof_common::{NO_PID, PlayerInfo};
use rand::Rng;
use tracing::error;

use crate::error::GameError;

pub const MAX_PORT_ATTEMPTS: usize = 1_000_000;

/// Source of candidate player ports.
pub trait PortPicker: Send + Sync {
    fn pick(&self, range: &RangeInclusive<u16>) -> u16;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPortPicker;

impl PortPicker for RandomPortPicker {
    fn pick(&self, range: &RangeInclusive<u16>) -> u16 {
        rand::rng().random_range(range.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub port: u16,
    pub pid: i32,
    pub port_up: bool,
    pub pid_up: bool,
    pub port_uptime: u64,
    pub port_score: u64,
    pub pid_uptime: u64,
    pub pid_score: u64,
}

impl PlayerRecord {
    fn new(port: u16) -> Self {
        Self {
            port,
            pid: NO_PID,
            port_up: false,
            pid_up: false,
            port_uptime: 0,
            port_score: 0,
            pid_uptime: 0,
            pid_score: 0,
        }
    }

    fn info(&self, player_name: &str) -> PlayerInfo {
        PlayerInfo {
            player_name: player_name.to_string(),
            port: self.port,
            pid: self.pid,
            port_up: self.port_up,
            pid_up: self.pid_up,
            port_uptime: self.port_uptime,
            port_score: self.port_score,
            pid_uptime: self.pid_uptime,
            pid_score: self.pid_score,
            total_score: self.port_score + self.pid_score,
        }
    }
}

/// What the scorer needs to probe one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessTarget {
    pub player_name: String,
    pub port: u16,
    pub pid: i32,
}

/// Points awarded per scoring pass for each signal that is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub port_points: u64,
    pub pid_points: u64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            port_points: 1,
            pid_points: 1,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    players: HashMap<String, PlayerRecord>,
    port_to_player: HashMap<u16, String>,
    pid_to_player: HashMap<i32, String>,
}

pub struct PlayerRegistry {
    ports: RangeInclusive<u16>,
    picker: Box<dyn PortPicker>,
    inner: Mutex<RegistryInner>,
}

impl PlayerRegistry {
    pub fn new(ports: RangeInclusive<u16>, picker: Box<dyn PortPicker>) -> Self {
        Self {
            ports,
            picker,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn with_random_ports(ports: RangeInclusive<u16>) -> Self {
        Self::new(ports, Box::new(RandomPortPicker))
    }

    /// Nothing panics between paired index updates, so a poisoned guard
    /// still holds consistent maps.
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool_size(&self) -> usize {
        if self.ports.is_empty() {
            0
        } else {
            usize::from(*self.ports.end() - *self.ports.start()) + 1
        }
    }

    /// Registers `player_name` and returns the port allocated to it.
    pub fn register(&self, player_name: &str) -> Result<u16, GameError> {
        if player_name.is_empty() {
            return Err(GameError::InvalidPlayerName);
        }

        let mut inner = self.lock();
        if inner.players.contains_key(player_name) {
            return Err(GameError::AlreadyRegistered(player_name.to_string()));
        }

        let port = self.allocate_port(&inner)?;
        inner
            .players
            .insert(player_name.to_string(), PlayerRecord::new(port));
        inner.port_to_player.insert(port, player_name.to_string());
        Ok(port)
    }

    fn allocate_port(&self, inner: &RegistryInner) -> Result<u16, GameError> {
        if inner.port_to_player.len() >= self.pool_size() {
            error!(
                port_start = *self.ports.start(),
                port_end = *self.ports.end(),
                allocated = inner.port_to_player.len(),
                "player port pool is exhausted"
            );
            return Err(GameError::NoPortAvailable { attempts: 0 });
        }

        for _ in 0..MAX_PORT_ATTEMPTS {
            let candidate = self.picker.pick(&self.ports);
            if self.ports.contains(&candidate) && !inner.port_to_player.contains_key(&candidate) {
                return Ok(candidate);
            }
        }

        error!(
            attempts = MAX_PORT_ATTEMPTS,
            allocated = inner.port_to_player.len(),
            "gave up drawing a free player port"
        );
        Err(GameError::NoPortAvailable {
            attempts: MAX_PORT_ATTEMPTS,
        })
    }

    /// Records the pid of the player's latest command. Earlier pids stay in
    /// the reverse index.
    pub fn set_player_pid(&self, player_name: &str, pid: i32) -> Result<(), GameError> {
        let mut inner = self.lock();
        let record = inner
            .players
            .get_mut(player_name)
            .ok_or_else(|| GameError::PlayerNotRegistered(player_name.to_string()))?;
        record.pid = pid;
        inner.pid_to_player.insert(pid, player_name.to_string());
        Ok(())
    }

    pub fn contains(&self, player_name: &str) -> bool {
        self.lock().players.contains_key(player_name)
    }

    /// Snapshot of one player, or of every player (sorted by name) when
    /// `player_name` is empty.
    pub fn player_info(&self, player_name: &str) -> Result<Vec<PlayerInfo>, GameError> {
        let inner = self.lock();
        if player_name.is_empty() {
            let mut all: Vec<PlayerInfo> = inner
                .players
                .iter()
                .map(|(name, record)| record.info(name))
                .collect();
            all.sort_by(|a, b| a.player_name.cmp(&b.player_name));
            return Ok(all);
        }

        inner
            .players
            .get(player_name)
            .map(|record| vec![record.info(player_name)])
            .ok_or_else(|| GameError::PlayerNotRegistered(player_name.to_string()))
    }

    /// Last player known to have launched `pid`. May be stale.
    pub fn player_for_pid(&self, pid: i32) -> Option<String> {
        self.lock().pid_to_player.get(&pid).cloned()
    }

    pub fn liveness_targets(&self) -> Vec<LivenessTarget> {
        let inner = self.lock();
        inner
            .players
            .iter()
            .map(|(name, record)| LivenessTarget {
                player_name: name.clone(),
                port: record.port,
                pid: record.pid,
            })
            .collect()
    }

    /// Stores one scoring observation and credits the player for each live signal.
    pub fn record_liveness(
        &self,
        player_name: &str,
        port_up: bool,
        pid_up: bool,
        weights: ScoreWeights,
    ) {
        let mut inner = self.lock();
        let Some(record) = inner.players.get_mut(player_name) else {
            return;
        };
        record.port_up = port_up;
        record.pid_up = pid_up;
        if port_up {
            record.port_uptime += 1;
            record.port_score += weights.port_points;
        }
        if pid_up {
            record.pid_uptime += 1;
            record.pid_score += weights.pid_points;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn assert_indexes_consistent(&self) {
        let inner = self.lock();
        assert_eq!(inner.players.len(), inner.port_to_player.len());
        for (name, record) in &inner.players {
            assert_eq!(inner.port_to_player.get(&record.port), Some(name));
            assert!(self.ports.contains(&record.port));
        }
    }
}
