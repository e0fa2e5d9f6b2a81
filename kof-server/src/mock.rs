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

//! Test doubles for the game's collaborators.

use std::{
    collections::HashMap,
    ops::RangeInclusive,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use kof_common::GameState;

use crate::{
    agent::GuestAgent,
    game::Game,
    provision::{GameParts, Provisioner},
    registry::{PlayerRegistry, PortPicker},
    scenario::{Scenario, ScenarioError, ScenarioSource},
    scorer::Scorer,
    vm::{VirtualMachine, VmState},
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

fn record(calls: &CallLog, entry: &str) {
    calls.lock().unwrap().push(entry.to_string());
}

pub async fn wait_for_state(game: &Game, target: GameState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let state = game.state();
        if state == target {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("game never reached {target}, stuck in {state}");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Hands out the range in order, wrapping around.
#[derive(Default)]
pub struct SequentialPortPicker {
    next: AtomicUsize,
}

impl PortPicker for SequentialPortPicker {
    fn pick(&self, range: &RangeInclusive<u16>) -> u16 {
        let size = usize::from(*range.end() - *range.start()) + 1;
        let offset = self.next.fetch_add(1, Ordering::SeqCst) % size;
        *range.start() + offset as u16
    }
}

pub struct FixedPortPicker(pub u16);

impl PortPicker for FixedPortPicker {
    fn pick(&self, _range: &RangeInclusive<u16>) -> u16 {
        self.0
    }
}

/// In-memory VM that follows the real state graph and logs each call.
pub struct RecordingVm {
    state: Mutex<VmState>,
    calls: CallLog,
    failing: Option<&'static str>,
    slow: Option<(&'static str, Duration)>,
}

impl RecordingVm {
    pub fn new() -> Self {
        Self::in_state(VmState::Created)
    }

    pub fn in_state(state: VmState) -> Self {
        Self {
            state: Mutex::new(state),
            calls: CallLog::default(),
            failing: None,
            slow: None,
        }
    }

    pub fn failing(mut self, method: &'static str) -> Self {
        self.failing = Some(method);
        self
    }

    /// `method` is logged on entry and only takes effect after `delay`.
    pub fn slow(mut self, method: &'static str, delay: Duration) -> Self {
        self.slow = Some((method, delay));
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    async fn step(&self, method: &'static str, next: VmState) -> anyhow::Result<()> {
        record(&self.calls, &format!("vm.{method}"));
        if let Some((slow_method, delay)) = self.slow {
            if slow_method == method {
                tokio::time::sleep(delay).await;
            }
        }
        let mut state = self.state.lock().unwrap();
        if self.failing == Some(method) {
            *state = VmState::Error;
            anyhow::bail!("{method} failed");
        }
        *state = next;
        Ok(())
    }
}

#[async_trait]
impl VirtualMachine for RecordingVm {
    async fn init(&self) -> anyhow::Result<()> {
        self.step("init", VmState::Ready).await
    }

    async fn boot(&self) -> anyhow::Result<()> {
        self.step("boot", VmState::Running).await
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.step("shutdown", VmState::Ready).await
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.step("destroy", VmState::Destroyed).await
    }

    async fn state(&self) -> VmState {
        *self.state.lock().unwrap()
    }
}

pub struct RecordingAgent {
    calls: CallLog,
    ready_after: Option<usize>,
    probes: AtomicUsize,
    connected: AtomicBool,
    next_pid: AtomicI32,
    live_pids: Vec<i32>,
    fail_commands: bool,
    fail_queries: bool,
    commands: Mutex<Vec<String>>,
    queried: Mutex<Vec<i32>>,
}

impl RecordingAgent {
    fn with_readiness(ready_after: Option<usize>) -> Self {
        Self {
            calls: CallLog::default(),
            ready_after,
            probes: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            next_pid: AtomicI32::new(1000),
            live_pids: Vec::new(),
            fail_commands: false,
            fail_queries: false,
            commands: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
        }
    }

    pub fn ready() -> Self {
        Self::with_readiness(Some(1))
    }

    /// Answers on the `probes`-th connection attempt.
    pub fn ready_after(probes: usize) -> Self {
        Self::with_readiness(Some(probes))
    }

    pub fn never_ready() -> Self {
        Self::with_readiness(None)
    }

    pub fn with_calls(mut self, calls: CallLog) -> Self {
        self.calls = calls;
        self
    }

    pub fn with_live_pids(mut self, pids: &[i32]) -> Self {
        self.live_pids = pids.to_vec();
        self
    }

    pub fn failing_commands(mut self) -> Self {
        self.fail_commands = true;
        self
    }

    pub fn failing_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn queried_pids(&self) -> Vec<i32> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl GuestAgent for RecordingAgent {
    async fn ensure_connection(&self) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            return true;
        }
        let probe = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = self.ready_after.is_some_and(|after| probe >= after);
        if ready {
            self.connected.store(true, Ordering::SeqCst);
        }
        ready
    }

    async fn reset_connection(&self) {
        record(&self.calls, "agent.reset");
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn run_cmd(&self, cmd: &str) -> anyhow::Result<i32> {
        record(&self.calls, "agent.run_cmd");
        self.commands.lock().unwrap().push(cmd.to_string());
        if self.fail_commands {
            anyhow::bail!("agent unreachable");
        }
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    async fn query_pid(&self, pid: i32) -> anyhow::Result<bool> {
        self.queried.lock().unwrap().push(pid);
        if self.fail_queries {
            anyhow::bail!("agent unreachable");
        }
        Ok(self.live_pids.contains(&pid))
    }
}

pub struct RecordingScorer {
    calls: CallLog,
}

impl RecordingScorer {
    pub fn new(calls: CallLog) -> Self {
        Self { calls }
    }
}

#[async_trait]
impl Scorer for RecordingScorer {
    async fn notify_game_started(&self) {
        record(&self.calls, "scorer.notify");
    }

    async fn try_score_players(&self) -> bool {
        record(&self.calls, "scorer.score");
        false
    }
}

/// Panics on the first scoring pass, like a scorer bug would.
pub struct PanickingScorer;

#[async_trait]
impl Scorer for PanickingScorer {
    async fn notify_game_started(&self) {}

    async fn try_score_players(&self) -> bool {
        panic!("scoring pass blew up");
    }
}

#[derive(Default)]
pub struct StaticScenarioSource {
    scenarios: HashMap<String, Scenario>,
}

impl StaticScenarioSource {
    pub fn with(mut self, name: &str, scenario: Scenario) -> Self {
        self.scenarios.insert(name.to_string(), scenario);
        self
    }
}

impl ScenarioSource for StaticScenarioSource {
    fn load(&self, scenario_name: &str) -> Result<Scenario, ScenarioError> {
        self.scenarios
            .get(scenario_name)
            .cloned()
            .ok_or_else(|| ScenarioError::NotFound(scenario_name.to_string()))
    }
}

/// Builds recording parts and keeps the agents it handed out.
#[derive(Default)]
pub struct RecordingProvisioner {
    pub provisioned: Mutex<Vec<String>>,
    pub agents: Mutex<Vec<Arc<RecordingAgent>>>,
    pub fail: bool,
    pub ports: Option<RangeInclusive<u16>>,
}

impl Provisioner for RecordingProvisioner {
    fn provision(&self, game_name: &str, _scenario: &Scenario) -> anyhow::Result<GameParts> {
        if self.fail {
            anyhow::bail!("hypervisor unavailable");
        }
        self.provisioned
            .lock()
            .unwrap()
            .push(game_name.to_string());

        let vm = RecordingVm::new();
        let calls = vm.calls();
        let agent = Arc::new(RecordingAgent::ready().with_calls(calls.clone()));
        self.agents.lock().unwrap().push(agent.clone());
        let ports = self.ports.clone().unwrap_or(30000..=30010);
        Ok(GameParts {
            registry: Arc::new(PlayerRegistry::new(
                ports,
                Box::new(SequentialPortPicker::default()),
            )),
            vm: Arc::new(vm),
            agent,
            scorer: Arc::new(RecordingScorer::new(calls)),
        })
    }
}
