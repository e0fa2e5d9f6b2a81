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

use kof_common::{ErrorCode, GameState};

/// Failures a game reports synchronously to operators and players.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("cannot {action} a game in state {state}")]
    InvalidGameState {
        action: &'static str,
        state: GameState,
    },
    #[error("player name must not be empty")]
    InvalidPlayerName,
    #[error("player {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("player {0:?} is not registered")]
    PlayerNotRegistered(String),
    #[error("game is {0}, not RUNNING")]
    GameNotRunning(GameState),
    #[error("scenario does not allow player commands")]
    CommandsNotAllowed,
    #[error("guest agent problem: {0:#}")]
    AgentProblem(anyhow::Error),
    /// The port pool is exhausted. Never expected in a sane deployment.
    #[error("no player port available after {attempts} attempts")]
    NoPortAvailable { attempts: usize },
}

impl GameError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GameError::InvalidGameState { .. } => ErrorCode::InvalidGameState,
            GameError::InvalidPlayerName => ErrorCode::InvalidPlayerName,
            GameError::AlreadyRegistered(_) => ErrorCode::AlreadyRegistered,
            GameError::PlayerNotRegistered(_) => ErrorCode::PlayerNotRegistered,
            GameError::GameNotRunning(_) => ErrorCode::GameNotRunning,
            GameError::CommandsNotAllowed => ErrorCode::CommandsNotAllowed,
            GameError::AgentProblem(_) => ErrorCode::AgentProblem,
            GameError::NoPortAvailable { .. } => ErrorCode::NoPortAvailable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, GameError::NoPortAvailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_port_exhaustion_is_fatal() {
        assert!(GameError::NoPortAvailable { attempts: 3 }.is_fatal());
        assert!(!GameError::CommandsNotAllowed.is_fatal());
        assert!(!GameError::AgentProblem(anyhow::anyhow!("down")).is_fatal());
    }

    #[test]
    fn agent_problem_keeps_context_chain() {
        let error = GameError::AgentProblem(
            anyhow::anyhow!("connection refused").context("failed to call guest agent"),
        );
        assert_eq!(error.code(), ErrorCode::AgentProblem);
        assert_eq!(
            error.to_string(),
            "guest agent problem: failed to call guest agent: connection refused"
        );
    }

    #[test]
    fn messages_name_the_state() {
        let error = GameError::GameNotRunning(GameState::StartingAgent);
        assert_eq!(error.to_string(), "game is STARTING_AGENT, not RUNNING");
        assert_eq!(error.code(), ErrorCode::GameNotRunning);
    }
}
