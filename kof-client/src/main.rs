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

use anyhow::Context;
use clap::{Parser, Subcommand};
use kof_common::{
    CreateGameRequest, DEFAULT_SERVER_URL, ErrorCode, GameDescriptor, IssueCommandRequest,
    IssueCommandResponse, PlayerInfo, QueryGameResponse, QueryScoreResponse,
    RegisterPlayerRequest, RegisterPlayerResponse, StatusResponse,
};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "kof-client")]
#[command(about = "Operator client for the King-of-the-Flag control plane")]
struct Cli {
    /// Base URL of kof-server.
    #[arg(long, env = "KOF_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Create a game from a scenario
    CreateGame {
        game_name: String,
        #[arg(long)]
        scenario: String,
    },
    /// Start a created game
    StartGame { game_name: String },
    /// Tear a game's VM down
    DestroyGame { game_name: String },
    /// Forget a game that is CREATED, DESTROYED or ERROR
    RemoveGame { game_name: String },
    /// Show one game, or every game when no name is given
    QueryGame { game_name: Option<String> },
    /// Register a player and print the allocated port
    PlayerReg {
        game_name: String,
        #[arg(long)]
        player: String,
    },
    /// Run a command in the guest on a player's behalf
    PlayerIssueCmd {
        game_name: String,
        #[arg(long)]
        player: String,
        #[arg(long)]
        cmd: String,
    },
    /// Show one player's score, or everyone's when no player is given
    QueryScore {
        game_name: String,
        #[arg(long)]
        player: Option<String>,
    },
}

struct KofClient {
    client: reqwest::Client,
    base_url: String,
}

impl KofClient {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid kof-server url {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("kof-server url {} cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> anyhow::Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach kof-server at {}", self.base_url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read kof-server response")?;
        debug!(%status, body = %body, "kof-server replied");

        if !status.is_success() {
            let detail = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|value| {
                    let code = value.get("error")?.as_str()?.to_string();
                    let message = value.get("message").and_then(|m| m.as_str()).unwrap_or("");
                    Some(format!("{code}: {message}"))
                })
                .unwrap_or(body);
            anyhow::bail!("kof-server returned {status}: {detail}");
        }

        serde_json::from_str(&body).context("invalid kof-server payload")
    }

    async fn run(&self, command: &Command) -> anyhow::Result<ErrorCode> {
        match command {
            Command::CreateGame {
                game_name,
                scenario,
            } => {
                let reply: StatusResponse = self
                    .send(
                        self.client
                            .post(self.endpoint(&["v1", "games"])?)
                            .json(&CreateGameRequest {
                                game_name: game_name.clone(),
                                scenario_name: scenario.clone(),
                            }),
                    )
                    .await?;
                report("Create game", reply.error, None);
                Ok(reply.error)
            }
            Command::StartGame { game_name } => {
                let reply: StatusResponse = self
                    .send(
                        self.client
                            .post(self.endpoint(&["v1", "games", game_name.as_str(), "start"])?),
                    )
                    .await?;
                report("Start game", reply.error, None);
                Ok(reply.error)
            }
            Command::DestroyGame { game_name } => {
                let reply: StatusResponse = self
                    .send(
                        self.client
                            .post(self.endpoint(&["v1", "games", game_name.as_str(), "destroy"])?),
                    )
                    .await?;
                report("Destroy game", reply.error, None);
                Ok(reply.error)
            }
            Command::RemoveGame { game_name } => {
                let reply: StatusResponse = self
                    .send(
                        self.client
                            .delete(self.endpoint(&["v1", "games", game_name.as_str()])?),
                    )
                    .await?;
                report("Remove game", reply.error, None);
                Ok(reply.error)
            }
            Command::QueryGame { game_name } => {
                let url = match game_name.as_deref().filter(|name| !name.is_empty()) {
                    Some(name) => self.endpoint(&["v1", "games", name])?,
                    None => self.endpoint(&["v1", "games"])?,
                };
                let reply: QueryGameResponse = self.send(self.client.get(url)).await?;
                report("Query game", reply.error, Some(render_games(&reply.games)));
                Ok(reply.error)
            }
            Command::PlayerReg { game_name, player } => {
                let reply: RegisterPlayerResponse = self
                    .send(
                        self.client
                            .post(self.endpoint(&["v1", "games", game_name.as_str(), "players"])?)
                            .json(&RegisterPlayerRequest {
                                player_name: player.clone(),
                            }),
                    )
                    .await?;
                let detail = reply.port.map(|port| format!("port: {port}"));
                report("Player register", reply.error, detail);
                Ok(reply.error)
            }
            Command::PlayerIssueCmd {
                game_name,
                player,
                cmd,
            } => {
                let url = self.endpoint(&[
                    "v1",
                    "games",
                    game_name.as_str(),
                    "players",
                    player.as_str(),
                    "commands",
                ])?;
                let reply: IssueCommandResponse = self
                    .send(
                        self.client
                            .post(url)
                            .json(&IssueCommandRequest { cmd: cmd.clone() }),
                    )
                    .await?;
                let detail = reply.pid.map(|pid| format!("pid: {pid}"));
                report("Player issue command", reply.error, detail);
                Ok(reply.error)
            }
            Command::QueryScore { game_name, player } => {
                let reply: QueryScoreResponse = self
                    .send(
                        self.client
                            .get(self.endpoint(&["v1", "games", game_name.as_str(), "scores"])?)
                            .query(&[("player", player.clone().unwrap_or_default())]),
                    )
                    .await?;
                report("Query score", reply.error, Some(render_players(&reply.players)));
                Ok(reply.error)
            }
        }
    }
}

fn report(action: &str, error: ErrorCode, detail: Option<String>) {
    if error.is_ok() {
        println!("{action} successful");
        if let Some(detail) = detail {
            println!("{detail}");
        }
    } else {
        println!("{action} failed: {error}");
    }
}

fn render_games(games: &[GameDescriptor]) -> String {
    games
        .iter()
        .map(|game| {
            format!(
                "{}\tscenario={}\tstate={}\tplayers={}\tcreated={}",
                game.name,
                game.scenario_name,
                game.state,
                game.player_count,
                game.created_at.to_rfc3339()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_players(players: &[PlayerInfo]) -> String {
    players
        .iter()
        .map(|player| {
            format!(
                "{}\tport={} ({})\tpid={} ({})\tscore={}",
                player.player_name,
                player.port,
                if player.port_up { "up" } else { "down" },
                player.pid,
                if player.pid_up { "up" } else { "down" },
                player.total_score
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "kof_client=warn".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = KofClient::new(cli.server);
    let error = client.run(&cli.command).await?;
    if !error.is_ok() {
        anyhow::bail!("kof-server answered {error}");
    }
    Ok(())
}
