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

//! Scenario descriptors: which VM template a game clones, where its guest
//! agent listens, and whether players may run commands.

use std::{io::ErrorKind, net::IpAddr, path::PathBuf};

use kof_common::{ErrorCode, expand_env_vars};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const SCENARIO_FILE_NAME: &str = "scenario.yml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub vm_path: String,
    pub ip: IpAddr,
    #[serde(default)]
    pub allow_command: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("scenario {0:?} not found")]
    NotFound(String),
    #[error("scenario {name:?} is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

impl ScenarioError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ScenarioError::NotFound(_) => ErrorCode::ScenarioNotFound,
            ScenarioError::Invalid { .. } => ErrorCode::InvalidScenario,
        }
    }

    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ScenarioError::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub trait ScenarioSource: Send + Sync {
    fn load(&self, scenario_name: &str) -> Result<Scenario, ScenarioError>;
}

/// Reads `<dir>/<scenario_name>/scenario.yml`.
#[derive(Debug, Clone)]
pub struct FileScenarioSource {
    dir: PathBuf,
}

impl FileScenarioSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn scenario_path(&self, scenario_name: &str) -> Result<PathBuf, ScenarioError> {
        let unsafe_name = scenario_name.is_empty()
            || scenario_name == "."
            || scenario_name == ".."
            || scenario_name.contains(['/', '\\']);
        if unsafe_name {
            return Err(ScenarioError::invalid(
                scenario_name,
                "name must be a single path component",
            ));
        }
        Ok(self.dir.join(scenario_name).join(SCENARIO_FILE_NAME))
    }
}

impl ScenarioSource for FileScenarioSource {
    fn load(&self, scenario_name: &str) -> Result<Scenario, ScenarioError> {
        let path = self.scenario_path(scenario_name)?;

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "scenario file does not exist");
                return Err(ScenarioError::NotFound(scenario_name.to_string()));
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to read scenario file");
                return Err(ScenarioError::invalid(scenario_name, error.to_string()));
            }
        };

        let scenario = parse_scenario(scenario_name, &raw)?;
        info!(
            scenario = %scenario_name,
            vm_path = %scenario.vm_path,
            ip = %scenario.ip,
            allow_command = scenario.allow_command,
            "loaded scenario"
        );
        Ok(scenario)
    }
}

pub fn parse_scenario(scenario_name: &str, raw: &str) -> Result<Scenario, ScenarioError> {
    if raw.trim().is_empty() {
        return Err(ScenarioError::invalid(scenario_name, "scenario file is empty"));
    }

    let expanded = expand_env_vars(raw);
    let scenario = serde_yaml::from_str::<Scenario>(&expanded).map_err(|error| {
        warn!(scenario = %scenario_name, error = %error, "failed to parse scenario yaml");
        ScenarioError::invalid(scenario_name, error.to_string())
    })?;

    if scenario.vm_path.trim().is_empty() {
        return Err(ScenarioError::invalid(scenario_name, "vmPath is empty"));
    }

    Ok(scenario)
}
