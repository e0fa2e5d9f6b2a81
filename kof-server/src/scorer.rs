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

use std::{
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use kof_common::NO_PID;
use tokio::{net::TcpStream, time::Instant};
use tracing::{debug, info};

use crate::{
    agent::GuestAgent,
    registry::{LivenessTarget, PlayerRegistry, ScoreWeights},
};

#[async_trait]
pub trait Scorer: Send + Sync {
    /// Called once when the game enters RUNNING.
    async fn notify_game_started(&self);
    /// Returns whether a scoring pass actually ran.
    async fn try_score_players(&self) -> bool;
}

#[derive(Default)]
struct ScoringClock {
    started_at: Option<Instant>,
    last_pass: Option<Instant>,
}

/// Awards points for each player whose port accepts connections and whose
/// last command is still alive in the guest.
pub struct LivenessScorer {
    registry: Arc<PlayerRegistry>,
    agent: Arc<dyn GuestAgent>,
    guest_ip: IpAddr,
    interval: Duration,
    probe_timeout: Duration,
    weights: ScoreWeights,
    clock: Mutex<ScoringClock>,
}

impl LivenessScorer {
    pub fn new(
        registry: Arc<PlayerRegistry>,
        agent: Arc<dyn GuestAgent>,
        guest_ip: IpAddr,
        interval: Duration,
        probe_timeout: Duration,
        weights: ScoreWeights,
    ) -> Self {
        Self {
            registry,
            agent,
            guest_ip,
            interval,
            probe_timeout,
            weights,
            clock: Mutex::new(ScoringClock::default()),
        }
    }

    /// Claims the next scoring slot if one is due.
    fn claim_pass(&self) -> bool {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if clock.started_at.is_none() {
            return false;
        }
        let now = Instant::now();
        let due = clock
            .last_pass
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if !due {
            return false;
        }
        clock.last_pass = Some(now);
        true
    }

    async fn port_up(&self, port: u16) -> bool {
        let addr = SocketAddr::new(self.guest_ip, port);
        matches!(
            tokio::time::timeout(self.probe_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    async fn pid_up(&self, target: &LivenessTarget) -> bool {
        if target.pid == NO_PID {
            return false;
        }
        match self.agent.query_pid(target.pid).await {
            Ok(alive) => alive,
            Err(error) => {
                debug!(
                    player = %target.player_name,
                    pid = target.pid,
                    error = %error,
                    "pid probe failed"
                );
                false
            }
        }
    }
}

#[async_trait]
impl Scorer for LivenessScorer {
    async fn notify_game_started(&self) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if clock.started_at.is_none() {
            clock.started_at = Some(Instant::now());
            info!(guest = %self.guest_ip, players = self.registry.len(), "scoring started");
        }
    }

    async fn try_score_players(&self) -> bool {
        if !self.claim_pass() {
            return false;
        }

        for target in self.registry.liveness_targets() {
            let port_up = self.port_up(target.port).await;
            let pid_up = self.pid_up(&target).await;
            self.registry
                .record_liveness(&target.player_name, port_up, pid_up, self.weights);
            debug!(
                player = %target.player_name,
                port = target.port,
                port_up,
                pid = target.pid,
                pid_up,
                "scored player"
            );
        }
        true
    }
}
