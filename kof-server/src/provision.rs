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

use std::sync::Arc;

use tracing::info;

use crate::{
    agent::{GuestAgent, HttpGuestAgent},
    config::ServerConfig,
    registry::{PlayerRegistry, ScoreWeights},
    scenario::Scenario,
    scorer::{LivenessScorer, Scorer},
    vm::{VBoxVm, VirtualMachine},
};

/// Collaborators owned by one game.
pub struct GameParts {
    pub registry: Arc<PlayerRegistry>,
    pub vm: Arc<dyn VirtualMachine>,
    pub agent: Arc<dyn GuestAgent>,
    pub scorer: Arc<dyn Scorer>,
}

pub trait Provisioner: Send + Sync {
    fn provision(&self, game_name: &str, scenario: &Scenario) -> anyhow::Result<GameParts>;
}

/// VirtualBox VM, HTTP guest agent and liveness scorer, wired from config.
pub struct DefaultProvisioner {
    config: ServerConfig,
}

impl DefaultProvisioner {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }
}

impl Provisioner for DefaultProvisioner {
    fn provision(&self, game_name: &str, scenario: &Scenario) -> anyhow::Result<GameParts> {
        if game_name.trim().is_empty() {
            anyhow::bail!("game name must not be empty");
        }

        let registry = Arc::new(PlayerRegistry::with_random_ports(self.config.port_range()));
        let vbox = VBoxVm::new(
            self.config.vboxmanage.clone(),
            scenario.vm_path.clone(),
            game_name,
        );
        info!(game = %game_name, vm = %vbox.name(), template = %scenario.vm_path, "provisioned game vm");
        let vm: Arc<dyn VirtualMachine> = Arc::new(vbox);
        let agent: Arc<dyn GuestAgent> = Arc::new(HttpGuestAgent::new(
            scenario.ip,
            self.config.agent_port,
            self.config.agent_connect_timeout,
        ));
        let scorer: Arc<dyn Scorer> = Arc::new(LivenessScorer::new(
            registry.clone(),
            agent.clone(),
            scenario.ip,
            self.config.score_interval,
            self.config.port_probe_timeout,
            ScoreWeights {
                port_points: self.config.port_points,
                pid_points: self.config.pid_points,
            },
        ));

        Ok(GameParts {
            registry,
            vm,
            agent,
            scorer,
        })
    }
}
