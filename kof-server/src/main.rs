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

mod agent;
mod config;
mod error;
mod game;
#[cfg(test)]
mod mock;
mod provision;
mod registry;
mod scenario;
mod scorer;
mod vm;

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use kof_common::{
    CreateGameRequest, ErrorCode, GameState, IssueCommandRequest, IssueCommandResponse,
    QueryGameResponse, QueryScoreResponse, RegisterPlayerRequest, RegisterPlayerResponse,
    StatusResponse,
};
use serde::Deserialize;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::{
    config::ServerConfig,
    error::GameError,
    game::Game,
    provision::{DefaultProvisioner, Provisioner},
    scenario::{FileScenarioSource, ScenarioSource},
};

#[derive(Clone)]
struct AppState {
    store: Arc<RwLock<InMemoryStore>>,
    scenarios: Arc<dyn ScenarioSource>,
    provisioner: Arc<dyn Provisioner>,
    loop_backoff: Duration,
}

#[derive(Default)]
struct InMemoryStore {
    games: HashMap<String, Arc<Game>>,
}

#[derive(Debug, Default, Deserialize)]
struct ScoreQuery {
    #[serde(default)]
    player: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "kof_server=debug,tower_http=info".to_string()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(
        scenario_dir = %config.scenario_dir.display(),
        port_start = config.port_start,
        port_end = config.port_end,
        agent_port = config.agent_port,
        "loaded kof-server config"
    );

    let state = AppState {
        store: Arc::new(RwLock::new(InMemoryStore::default())),
        scenarios: Arc::new(FileScenarioSource::new(config.scenario_dir.clone())),
        provisioner: Arc::new(DefaultProvisioner::new(config.clone())),
        loop_backoff: config.loop_backoff,
    };

    let app = build_router(state.clone());
    info!(bind_addr = %config.bind_addr, "kof-server listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(error = %error, "failed to listen for shutdown signal");
            }
        })
        .await?;

    let games: Vec<Arc<Game>> = state.store.write().await.games.drain().map(|(_, g)| g).collect();
    for game in games {
        game.stop().await;
    }
    info!("kof-server shut down");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/games", post(create_game_handler).get(list_games_handler))
        .route(
            "/v1/games/{game}",
            get(get_game_handler).delete(remove_game_handler),
        )
        .route("/v1/games/{game}/start", post(start_game_handler))
        .route("/v1/games/{game}/destroy", post(destroy_game_handler))
        .route("/v1/games/{game}/players", post(register_player_handler))
        .route(
            "/v1/games/{game}/players/{player}/commands",
            post(issue_command_handler),
        )
        .route("/v1/games/{game}/scores", get(query_score_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "kof-server"}))
}

async fn find_game(state: &AppState, game_name: &str) -> Option<Arc<Game>> {
    state.store.read().await.games.get(game_name).cloned()
}

/// Maps a game failure to its reply code. Only the fatal path escapes as an
/// HTTP error.
fn domain_code(error: GameError) -> Result<ErrorCode, ApiError> {
    let code = error.code();
    if error.is_fatal() {
        error!(code = %code, error = %error, "fatal game failure");
        return Err(ApiError::fatal(code, error.to_string()));
    }
    info!(code = %code, error = %error, "request rejected");
    Ok(code)
}

fn status(error: ErrorCode, state: Option<GameState>) -> Json<StatusResponse> {
    Json(StatusResponse { error, state })
}

async fn create_game_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateGameRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    if state.store.read().await.games.contains_key(&request.game_name) {
        return Ok(status(ErrorCode::GameAlreadyExists, None));
    }

    let scenario = match state.scenarios.load(&request.scenario_name) {
        Ok(scenario) => scenario,
        Err(error) => {
            warn!(
                game = %request.game_name,
                scenario = %request.scenario_name,
                error = %error,
                "failed to load scenario"
            );
            return Ok(status(error.code(), None));
        }
    };

    let parts = match state.provisioner.provision(&request.game_name, &scenario) {
        Ok(parts) => parts,
        Err(error) => {
            warn!(game = %request.game_name, error = %error, "failed to provision game");
            return Ok(status(ErrorCode::ProvisionFailed, None));
        }
    };

    let mut store = state.store.write().await;
    if store.games.contains_key(&request.game_name) {
        debug!(game = %request.game_name, "game created concurrently, provisioned parts discarded");
        return Ok(status(ErrorCode::GameAlreadyExists, None));
    }
    let game = Game::new(
        request.game_name.clone(),
        request.scenario_name.clone(),
        scenario,
        parts,
        state.loop_backoff,
    );
    let game_state = game.state();
    store.games.insert(request.game_name, Arc::new(game));
    Ok(status(ErrorCode::None, Some(game_state)))
}

async fn start_game_handler(
    State(state): State<AppState>,
    Path(game_name): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Some(game) = find_game(&state, &game_name).await else {
        return Ok(status(ErrorCode::GameNotFound, None));
    };
    match game.start() {
        Ok(()) => Ok(status(ErrorCode::None, Some(game.state()))),
        Err(error) => Ok(status(domain_code(error)?, Some(game.state()))),
    }
}

async fn destroy_game_handler(
    State(state): State<AppState>,
    Path(game_name): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Some(game) = find_game(&state, &game_name).await else {
        return Ok(status(ErrorCode::GameNotFound, None));
    };
    match game.destroy() {
        Ok(()) => Ok(status(ErrorCode::None, Some(game.state()))),
        Err(error) => Ok(status(domain_code(error)?, Some(game.state()))),
    }
}

async fn remove_game_handler(
    State(state): State<AppState>,
    Path(game_name): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let game = {
        let mut store = state.store.write().await;
        let Some(game) = store.games.get(&game_name) else {
            return Ok(status(ErrorCode::GameNotFound, None));
        };
        if let Err(error) = game.retire() {
            let game_state = game.state();
            return Ok(status(domain_code(error)?, Some(game_state)));
        }
        store.games.remove(&game_name)
    };

    let Some(game) = game else {
        return Ok(status(ErrorCode::GameNotFound, None));
    };
    let final_state = game.state();
    game.stop().await;
    info!(game = %game_name, state = %final_state, "game removed");
    Ok(status(ErrorCode::None, Some(final_state)))
}

async fn list_games_handler(State(state): State<AppState>) -> Json<QueryGameResponse> {
    let store = state.store.read().await;
    let mut games: Vec<_> = store.games.values().map(|game| game.descriptor()).collect();
    games.sort_by(|a, b| a.name.cmp(&b.name));
    Json(QueryGameResponse {
        error: ErrorCode::None,
        games,
    })
}

async fn get_game_handler(
    State(state): State<AppState>,
    Path(game_name): Path<String>,
) -> Json<QueryGameResponse> {
    match find_game(&state, &game_name).await {
        Some(game) => Json(QueryGameResponse {
            error: ErrorCode::None,
            games: vec![game.descriptor()],
        }),
        None => Json(QueryGameResponse {
            error: ErrorCode::GameNotFound,
            games: Vec::new(),
        }),
    }
}

async fn register_player_handler(
    State(state): State<AppState>,
    Path(game_name): Path<String>,
    Json(request): Json<RegisterPlayerRequest>,
) -> Result<Json<RegisterPlayerResponse>, ApiError> {
    let Some(game) = find_game(&state, &game_name).await else {
        return Ok(Json(RegisterPlayerResponse {
            error: ErrorCode::GameNotFound,
            port: None,
        }));
    };
    match game.register_player(&request.player_name) {
        Ok(port) => Ok(Json(RegisterPlayerResponse {
            error: ErrorCode::None,
            port: Some(port),
        })),
        Err(error) => Ok(Json(RegisterPlayerResponse {
            error: domain_code(error)?,
            port: None,
        })),
    }
}

async fn issue_command_handler(
    State(state): State<AppState>,
    Path((game_name, player_name)): Path<(String, String)>,
    Json(request): Json<IssueCommandRequest>,
) -> Result<Json<IssueCommandResponse>, ApiError> {
    let Some(game) = find_game(&state, &game_name).await else {
        return Ok(Json(IssueCommandResponse {
            error: ErrorCode::GameNotFound,
            pid: None,
        }));
    };
    match game.player_issue_cmd(&player_name, &request.cmd).await {
        Ok(pid) => Ok(Json(IssueCommandResponse {
            error: ErrorCode::None,
            pid: Some(pid),
        })),
        Err(error) => Ok(Json(IssueCommandResponse {
            error: domain_code(error)?,
            pid: None,
        })),
    }
}

async fn query_score_handler(
    State(state): State<AppState>,
    Path(game_name): Path<String>,
    Query(query): Query<ScoreQuery>,
) -> Result<Json<QueryScoreResponse>, ApiError> {
    let Some(game) = find_game(&state, &game_name).await else {
        return Ok(Json(QueryScoreResponse {
            error: ErrorCode::GameNotFound,
            players: Vec::new(),
        }));
    };
    let player_name = query.player.unwrap_or_default();
    match game.query_player_info(&player_name) {
        Ok(players) => Ok(Json(QueryScoreResponse {
            error: ErrorCode::None,
            players,
        })),
        Err(error) => Ok(Json(QueryScoreResponse {
            error: domain_code(error)?,
            players: Vec::new(),
        })),
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl ApiError {
    fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, code = %self.code, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.code, "message": self.message})),
        )
            .into_response()
    }
}
