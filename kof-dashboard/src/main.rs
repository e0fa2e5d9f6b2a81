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

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use kof_common::{DEFAULT_SERVER_URL, ErrorCode, PlayerInfo, QueryScoreResponse};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    scores: Arc<dyn ScoreSource>,
}

#[async_trait]
trait ScoreSource: Send + Sync {
    async fn fetch_scores(&self, game_name: &str) -> anyhow::Result<QueryScoreResponse>;
}

struct ServerScoreSource {
    client: reqwest::Client,
    base_url: String,
}

impl ServerScoreSource {
    fn from_env() -> Self {
        let base_url = std::env::var("KOF_SERVER_URL")
            .ok()
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid KOF_SERVER_URL {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("KOF_SERVER_URL {} cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ScoreSource for ServerScoreSource {
    async fn fetch_scores(&self, game_name: &str) -> anyhow::Result<QueryScoreResponse> {
        let response = self
            .client
            .get(self.endpoint(&["v1", "games", game_name, "scores"])?)
            .send()
            .await
            .context("failed to call kof-server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_string());
            anyhow::bail!("kof-server returned {status}: {body}");
        }

        response
            .json::<QueryScoreResponse>()
            .await
            .context("invalid kof-server score payload")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ScoreboardRow {
    rank: usize,
    player_name: String,
    port_uptime: u64,
    port_score: u64,
    pid_uptime: u64,
    pid_score: u64,
    total_score: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScoreboardResponse {
    game_name: String,
    error: ErrorCode,
    rows: Vec<ScoreboardRow>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "kof_dashboard=debug,tower_http=info".to_string()),
        )
        .init();

    let state = AppState {
        scores: Arc::new(ServerScoreSource::from_env()),
    };

    let app = build_router(state);
    let bind_addr = parse_bind_addr("KOF_DASHBOARD_BIND", "0.0.0.0:29111")?;
    info!(%bind_addr, "kof-dashboard listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/scoreboard/{game}", get(scoreboard_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "kof-dashboard"}))
}

async fn scoreboard_handler(
    State(state): State<AppState>,
    Path(game_name): Path<String>,
) -> Result<Json<ScoreboardResponse>, ApiError> {
    let scores = state
        .scores
        .fetch_scores(&game_name)
        .await
        .map_err(|error| ApiError::bad_gateway(format!("failed to fetch scores: {error:#}")))?;

    Ok(Json(ScoreboardResponse {
        game_name,
        error: scores.error,
        rows: rank(scores.players),
    }))
}

/// Highest total first; ties share a rank and are listed by name.
fn rank(mut players: Vec<PlayerInfo>) -> Vec<ScoreboardRow> {
    players.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then_with(|| a.player_name.cmp(&b.player_name))
    });

    let mut rows: Vec<ScoreboardRow> = Vec::with_capacity(players.len());
    for (index, player) in players.into_iter().enumerate() {
        let rank = match rows.last() {
            Some(previous) if previous.total_score == player.total_score => previous.rank,
            _ => index + 1,
        };
        rows.push(ScoreboardRow {
            rank,
            player_name: player.player_name,
            port_uptime: player.port_uptime,
            port_score: player.port_score,
            pid_uptime: player.pid_uptime,
            pid_score: player.pid_score,
            total_score: player.total_score,
        });
    }
    rows
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
