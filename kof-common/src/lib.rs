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

use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:29110";
pub const DEFAULT_PORT_START: u16 = 30000;
pub const DEFAULT_PORT_END: u16 = 30999;
pub const DEFAULT_AGENT_PORT: u16 = 29120;

/// Pid reported for a player that has not issued a command yet.
pub const NO_PID: i32 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    Created,
    StartingVm,
    StartingAgent,
    Running,
    Rebooting,
    Destroying,
    Destroyed,
    Error,
}

impl GameState {
    pub const ALL: [GameState; 8] = [
        GameState::Created,
        GameState::StartingVm,
        GameState::StartingAgent,
        GameState::Running,
        GameState::Rebooting,
        GameState::Destroying,
        GameState::Destroyed,
        GameState::Error,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, GameState::Destroyed | GameState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameState::Created => "CREATED",
            GameState::StartingVm => "STARTING_VM",
            GameState::StartingAgent => "STARTING_AGENT",
            GameState::Running => "RUNNING",
            GameState::Rebooting => "REBOOTING",
            GameState::Destroying => "DESTROYING",
            GameState::Destroyed => "DESTROYED",
            GameState::Error => "ERROR",
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome code carried by every control-plane response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    None,
    GameNotFound,
    GameAlreadyExists,
    ScenarioNotFound,
    InvalidScenario,
    ProvisionFailed,
    InvalidGameState,
    InvalidPlayerName,
    AlreadyRegistered,
    PlayerNotRegistered,
    GameNotRunning,
    CommandsNotAllowed,
    AgentProblem,
    NoPortAvailable,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        self == ErrorCode::None
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCode::None => "NONE",
            ErrorCode::GameNotFound => "GAME_NOT_FOUND",
            ErrorCode::GameAlreadyExists => "GAME_ALREADY_EXISTS",
            ErrorCode::ScenarioNotFound => "SCENARIO_NOT_FOUND",
            ErrorCode::InvalidScenario => "INVALID_SCENARIO",
            ErrorCode::ProvisionFailed => "PROVISION_FAILED",
            ErrorCode::InvalidGameState => "INVALID_GAME_STATE",
            ErrorCode::InvalidPlayerName => "INVALID_PLAYER_NAME",
            ErrorCode::AlreadyRegistered => "ALREADY_REGISTERED",
            ErrorCode::PlayerNotRegistered => "PLAYER_NOT_REGISTERED",
            ErrorCode::GameNotRunning => "GAME_NOT_RUNNING",
            ErrorCode::CommandsNotAllowed => "COMMANDS_NOT_ALLOWED",
            ErrorCode::AgentProblem => "AGENT_PROBLEM",
            ErrorCode::NoPortAvailable => "NO_PORT_AVAILABLE",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerInfo {
    pub player_name: String,
    pub port: u16,
    pub pid: i32,
    pub port_up: bool,
    pub pid_up: bool,
    #[serde(default)]
    pub port_uptime: u64,
    #[serde(default)]
    pub port_score: u64,
    #[serde(default)]
    pub pid_uptime: u64,
    #[serde(default)]
    pub pid_score: u64,
    #[serde(default)]
    pub total_score: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameDescriptor {
    pub name: String,
    pub scenario_name: String,
    pub state: GameState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub player_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGameRequest {
    pub game_name: String,
    pub scenario_name: String,
}

/// Response for operations whose only result is the outcome code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub error: ErrorCode,
    #[serde(default)]
    pub state: Option<GameState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryGameResponse {
    pub error: ErrorCode,
    pub games: Vec<GameDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPlayerRequest {
    pub player_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPlayerResponse {
    pub error: ErrorCode,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueCommandRequest {
    pub cmd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueCommandResponse {
    pub error: ErrorCode,
    #[serde(default)]
    pub pid: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryScoreResponse {
    pub error: ErrorCode,
    pub players: Vec<PlayerInfo>,
}

/// Body of `POST /v1/commands` on the guest agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunCmdRequest {
    pub cmd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunCmdResponse {
    #[serde(default)]
    pub pid: Option<i32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProcessResponse {
    pub pid: i32,
    pub alive: bool,
}

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_state_uses_screaming_snake_case_on_the_wire() {
        for state in GameState::ALL {
            let encoded = serde_json::to_string(&state).unwrap();
            assert_eq!(encoded, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn only_destroyed_and_error_are_terminal() {
        let terminal: Vec<GameState> = GameState::ALL
            .into_iter()
            .filter(|state| state.is_terminal())
            .collect();
        assert_eq!(terminal, vec![GameState::Destroyed, GameState::Error]);
    }

    #[test]
    fn error_code_display_matches_wire_name() {
        let codes = [
            ErrorCode::None,
            ErrorCode::AlreadyRegistered,
            ErrorCode::PlayerNotRegistered,
            ErrorCode::GameNotRunning,
            ErrorCode::CommandsNotAllowed,
            ErrorCode::AgentProblem,
            ErrorCode::NoPortAvailable,
            ErrorCode::InvalidGameState,
        ];
        for code in codes {
            let encoded = serde_json::to_string(&code).unwrap();
            assert_eq!(encoded, format!("\"{code}\""));
        }
        assert!(ErrorCode::None.is_ok());
        assert!(!ErrorCode::AgentProblem.is_ok());
    }

    #[test]
    fn status_response_without_state_parses() {
        let parsed: StatusResponse =
            serde_json::from_str(r#"{"error":"GAME_NOT_FOUND"}"#).unwrap();
        assert_eq!(parsed.error, ErrorCode::GameNotFound);
        assert_eq!(parsed.state, None);
    }

    #[test]
    fn agent_run_cmd_response_accepts_error_only_payload() {
        let parsed: AgentRunCmdResponse =
            serde_json::from_str(r#"{"error":"fork failed"}"#).unwrap();
        assert_eq!(parsed.pid, None);
        assert_eq!(parsed.error.as_deref(), Some("fork failed"));
    }

    #[test]
    fn expand_env_vars_replaces_unset_with_empty() {
        let expanded = expand_env_vars("ip: ${KOF_COMMON_TEST_SURELY_UNSET_VAR}");
        assert_eq!(expanded, "ip: ");
    }

    #[test]
    fn expand_env_vars_keeps_plain_text() {
        assert_eq!(expand_env_vars("vmPath: kof-base"), "vmPath: kof-base");
    }
}
