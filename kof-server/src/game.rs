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

//! One game: a background loop that walks the VM, the guest agent and the
//! scorer through the game's lifecycle, plus the operator and player entry
//! points that run on request handlers.
//!
//! The state field has one writer per epoch. Operators hand the game off with
//! `start()` and `destroy()`; every other transition is made by the loop, and
//! always as a compare-and-swap from the state the current tick observed.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use kof_common::{GameDescriptor, GameState, PlayerInfo};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    agent::GuestAgent,
    error::GameError,
    provision::GameParts,
    registry::PlayerRegistry,
    scenario::Scenario,
    scorer::Scorer,
    vm::{VirtualMachine, VmState},
};

struct AtomicGameState(AtomicU8);

impl AtomicGameState {
    fn new(state: GameState) -> Self {
        Self(AtomicU8::new(Self::encode(state)))
    }

    fn encode(state: GameState) -> u8 {
        GameState::ALL
            .iter()
            .position(|candidate| *candidate == state)
            .unwrap_or(0) as u8
    }

    fn decode(raw: u8) -> GameState {
        GameState::ALL
            .get(usize::from(raw))
            .copied()
            .unwrap_or(GameState::Error)
    }

    fn load(&self) -> GameState {
        Self::decode(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: GameState) {
        self.0.store(Self::encode(state), Ordering::Release);
    }

    /// Returns the state found when the swap did not happen.
    fn compare_exchange(&self, current: GameState, next: GameState) -> Result<(), GameState> {
        self.0
            .compare_exchange(
                Self::encode(current),
                Self::encode(next),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(Self::decode)
    }
}

enum Tick {
    Busy,
    Idle,
}

struct GameInner {
    name: String,
    scenario_name: String,
    scenario: Scenario,
    state: AtomicGameState,
    exit: AtomicBool,
    wake: Notify,
    backoff: Duration,
    registry: Arc<PlayerRegistry>,
    vm: Arc<dyn VirtualMachine>,
    agent: Arc<dyn GuestAgent>,
    scorer: Arc<dyn Scorer>,
    created_at: DateTime<Utc>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

pub struct Game {
    inner: Arc<GameInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Game {
    /// Builds the game in `CREATED` and spawns its loop on the current runtime.
    pub fn new(
        name: impl Into<String>,
        scenario_name: impl Into<String>,
        scenario: Scenario,
        parts: GameParts,
        backoff: Duration,
    ) -> Self {
        let inner = Arc::new(GameInner {
            name: name.into(),
            scenario_name: scenario_name.into(),
            scenario,
            state: AtomicGameState::new(GameState::Created),
            exit: AtomicBool::new(false),
            wake: Notify::new(),
            backoff,
            registry: parts.registry,
            vm: parts.vm,
            agent: parts.agent,
            scorer: parts.scorer,
            created_at: Utc::now(),
            started_at: Mutex::new(None),
        });

        let task = tokio::spawn(supervise(inner.clone()));
        info!(game = %inner.name, scenario = %inner.scenario_name, "game created");
        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> GameState {
        self.inner.state.load()
    }

    pub fn start(&self) -> Result<(), GameError> {
        self.inner
            .state
            .compare_exchange(GameState::Created, GameState::StartingVm)
            .map_err(|state| GameError::InvalidGameState {
                action: "start",
                state,
            })?;
        *self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        self.inner.wake.notify_one();
        info!(game = %self.inner.name, "game start requested");
        Ok(())
    }

    pub fn destroy(&self) -> Result<(), GameError> {
        let mut current = self.inner.state.load();
        loop {
            if matches!(
                current,
                GameState::Destroying | GameState::Destroyed | GameState::Error
            ) {
                return Err(GameError::InvalidGameState {
                    action: "destroy",
                    state: current,
                });
            }
            match self
                .inner
                .state
                .compare_exchange(current, GameState::Destroying)
            {
                Ok(()) => break,
                Err(observed) => current = observed,
            }
        }
        self.inner.wake.notify_one();
        info!(game = %self.inner.name, from = %current, "game destroy requested");
        Ok(())
    }

    /// Settles the game in a terminal state so it can be forgotten. A game
    /// that never started goes straight to `DESTROYED` and can no longer be
    /// started by a caller still holding it.
    pub fn retire(&self) -> Result<GameState, GameError> {
        match self
            .inner
            .state
            .compare_exchange(GameState::Created, GameState::Destroyed)
        {
            Ok(()) => {
                self.inner.wake.notify_one();
                info!(game = %self.inner.name, "unstarted game retired");
                Ok(GameState::Destroyed)
            }
            Err(state) if state.is_terminal() => Ok(state),
            Err(state) => Err(GameError::InvalidGameState {
                action: "remove",
                state,
            }),
        }
    }

    pub fn register_player(&self, player_name: &str) -> Result<u16, GameError> {
        let port = self.inner.registry.register(player_name)?;
        info!(game = %self.inner.name, player = %player_name, port, "player registered");
        Ok(port)
    }

    pub async fn player_issue_cmd(&self, player_name: &str, cmd: &str) -> Result<i32, GameError> {
        let state = self.inner.state.load();
        if state != GameState::Running {
            return Err(GameError::GameNotRunning(state));
        }
        if !self.inner.scenario.allow_command {
            return Err(GameError::CommandsNotAllowed);
        }
        if !self.inner.registry.contains(player_name) {
            return Err(GameError::PlayerNotRegistered(player_name.to_string()));
        }

        let pid = self.inner.agent.run_cmd(cmd).await.map_err(|error| {
            warn!(
                game = %self.inner.name,
                player = %player_name,
                error = %error,
                "player command failed in guest"
            );
            GameError::AgentProblem(error)
        })?;

        if let Some(previous) = self.inner.registry.player_for_pid(pid) {
            if previous != player_name {
                debug!(game = %self.inner.name, pid, previous = %previous, "guest reused a pid");
            }
        }
        self.inner.registry.set_player_pid(player_name, pid)?;
        info!(game = %self.inner.name, player = %player_name, pid, "player command started");
        Ok(pid)
    }

    pub fn query_player_info(&self, player_name: &str) -> Result<Vec<PlayerInfo>, GameError> {
        self.inner.registry.player_info(player_name)
    }

    pub fn player_for_pid(&self, pid: i32) -> Option<String> {
        self.inner.registry.player_for_pid(pid)
    }

    pub fn descriptor(&self) -> GameDescriptor {
        GameDescriptor {
            name: self.inner.name.clone(),
            scenario_name: self.inner.scenario_name.clone(),
            state: self.inner.state.load(),
            created_at: self.inner.created_at,
            started_at: *self
                .inner
                .started_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            player_count: self.inner.registry.len(),
        }
    }

    /// Asks the loop to exit and waits for it. Must not be called from the
    /// loop task itself.
    pub async fn stop(&self) {
        self.inner.exit.store(true, Ordering::Release);
        self.inner.wake.notify_one();

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(game = %self.inner.name, error = %error, "game supervisor did not finish cleanly");
            }
        }
    }
}

impl Drop for Game {
    fn drop(&mut self) {
        self.inner.exit.store(true, Ordering::Release);
        self.inner.wake.notify_one();
    }
}

/// Runs the loop in its own task so a panic surfaces here as a `JoinError`.
async fn supervise(inner: Arc<GameInner>) {
    let result = tokio::spawn(run(inner.clone())).await;
    match result {
        Ok(Ok(())) => debug!(game = %inner.name, state = %inner.state.load(), "game loop finished"),
        Ok(Err(error)) => {
            error!(game = %inner.name, state = %inner.state.load(), error = %error, "game loop aborted")
        }
        Err(join_error) => {
            inner.state.store(GameState::Error);
            error!(game = %inner.name, error = %join_error, "game loop panicked");
        }
    }
}

async fn run(inner: Arc<GameInner>) -> anyhow::Result<()> {
    loop {
        if inner.exit.load(Ordering::Acquire) {
            info!(game = %inner.name, "game loop exit requested");
            return Ok(());
        }

        let observed = inner.state.load();
        if observed.is_terminal() {
            info!(game = %inner.name, state = %observed, "game reached terminal state");
            return Ok(());
        }

        match inner.tick(observed).await? {
            Tick::Busy => tokio::task::yield_now().await,
            Tick::Idle => {
                tokio::select! {
                    _ = tokio::time::sleep(inner.backoff) => {}
                    _ = inner.wake.notified() => {}
                }
            }
        }
    }
}

impl GameInner {
    async fn tick(&self, observed: GameState) -> anyhow::Result<Tick> {
        match observed {
            GameState::Created => Ok(Tick::Idle),
            GameState::StartingVm => Ok(self.tick_starting_vm().await),
            GameState::StartingAgent => Ok(self.tick_starting_agent().await),
            GameState::Running => {
                if self.scorer.try_score_players().await {
                    Ok(Tick::Busy)
                } else {
                    Ok(Tick::Idle)
                }
            }
            GameState::Rebooting => {
                self.transition(GameState::Rebooting, GameState::Error);
                anyhow::bail!("game {} entered REBOOTING, which is not supported", self.name)
            }
            GameState::Destroying => Ok(self.tick_destroying().await),
            GameState::Destroyed | GameState::Error => Ok(Tick::Idle),
        }
    }

    async fn tick_starting_vm(&self) -> Tick {
        let from = GameState::StartingVm;
        match self.vm.state().await {
            VmState::Created => {
                if let Err(error) = self.vm.init().await {
                    self.fail(from, "vm init", &error);
                } else if let Err(error) = self.vm.boot().await {
                    self.fail(from, "vm boot", &error);
                }
                Tick::Busy
            }
            VmState::Ready => {
                if let Err(error) = self.vm.boot().await {
                    self.fail(from, "vm boot", &error);
                }
                Tick::Busy
            }
            VmState::Running => {
                self.transition(from, GameState::StartingAgent);
                Tick::Busy
            }
            vm_state @ (VmState::Destroyed | VmState::Error) => {
                error!(game = %self.name, vm_state = ?vm_state, "vm unusable while starting");
                self.transition(from, GameState::Error);
                Tick::Busy
            }
        }
    }

    async fn tick_starting_agent(&self) -> Tick {
        if !self.agent.ensure_connection().await {
            debug!(game = %self.name, "guest agent not ready yet");
            return Tick::Idle;
        }
        if self.transition(GameState::StartingAgent, GameState::Running) {
            self.scorer.notify_game_started().await;
        }
        Tick::Busy
    }

    async fn tick_destroying(&self) -> Tick {
        let from = GameState::Destroying;
        self.agent.reset_connection().await;

        match self.vm.state().await {
            VmState::Running => {
                if let Err(error) = self.vm.shutdown().await {
                    self.fail(from, "vm shutdown", &error);
                }
            }
            VmState::Ready | VmState::Created => match self.vm.destroy().await {
                Ok(()) => {
                    self.transition(from, GameState::Destroyed);
                }
                Err(error) => self.fail(from, "vm destroy", &error),
            },
            VmState::Destroyed => {
                self.transition(from, GameState::Destroyed);
            }
            VmState::Error => {
                error!(game = %self.name, "vm in error state during teardown");
                self.transition(from, GameState::Error);
            }
        }
        Tick::Busy
    }

    /// Moves `from -> to` unless someone else changed the state first.
    fn transition(&self, from: GameState, to: GameState) -> bool {
        match self.state.compare_exchange(from, to) {
            Ok(()) => {
                info!(game = %self.name, from = %from, to = %to, "game state changed");
                true
            }
            Err(current) => {
                debug!(
                    game = %self.name,
                    from = %from,
                    to = %to,
                    current = %current,
                    "state changed under the loop, transition skipped"
                );
                false
            }
        }
    }

    fn fail(&self, from: GameState, step: &str, error: &anyhow::Error) {
        error!(game = %self.name, step, error = %error, "game step failed");
        self.transition(from, GameState::Error);
    }
}
