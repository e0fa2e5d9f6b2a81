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
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use kof_common::{AgentProcessResponse, AgentRunCmdRequest, AgentRunCmdResponse};
use tracing::{debug, info};

const AGENT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Client side of the agent running inside a game's guest VM.
#[async_trait]
pub trait GuestAgent: Send + Sync {
    /// Bounded-time readiness probe. Cheap once connected; never errors.
    async fn ensure_connection(&self) -> bool;
    /// Forgets any cached connection so the next probe starts from scratch.
    async fn reset_connection(&self);
    /// Starts `cmd` in the guest and returns its pid.
    async fn run_cmd(&self, cmd: &str) -> anyhow::Result<i32>;
    /// Whether `pid` is still alive in the guest.
    async fn query_pid(&self, pid: i32) -> anyhow::Result<bool>;
}

pub struct HttpGuestAgent {
    client: reqwest::Client,
    base_url: String,
    connect_timeout: Duration,
    connected: AtomicBool,
}

impl HttpGuestAgent {
    pub fn new(ip: IpAddr, port: u16, connect_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{}", SocketAddr::new(ip, port)),
            connect_timeout,
            connected: AtomicBool::new(false),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn error_body(response: reqwest::Response) -> String {
        response
            .text()
            .await
            .unwrap_or_else(|_| "<response body unavailable>".to_string())
    }
}

#[async_trait]
impl GuestAgent for HttpGuestAgent {
    async fn ensure_connection(&self) -> bool {
        if self.connected.load(Ordering::Acquire) {
            return true;
        }

        let probe = self
            .client
            .get(self.endpoint("health"))
            .timeout(self.connect_timeout)
            .send()
            .await;

        match probe {
            Ok(response) if response.status().is_success() => {
                self.connected.store(true, Ordering::Release);
                info!(agent = %self.base_url, "guest agent connected");
                true
            }
            Ok(response) => {
                debug!(agent = %self.base_url, status = %response.status(), "guest agent not ready");
                false
            }
            Err(error) => {
                debug!(agent = %self.base_url, error = %error, "guest agent unreachable");
                false
            }
        }
    }

    async fn reset_connection(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!(agent = %self.base_url, "guest agent connection reset");
        }
    }

    async fn run_cmd(&self, cmd: &str) -> anyhow::Result<i32> {
        let response = self
            .client
            .post(self.endpoint("v1/commands"))
            .timeout(AGENT_RPC_TIMEOUT)
            .json(&AgentRunCmdRequest {
                cmd: cmd.to_string(),
            })
            .send()
            .await
            .context("failed to call guest agent")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = Self::error_body(response).await;
            anyhow::bail!("guest agent returned {status}: {body}");
        }

        let reply = response
            .json::<AgentRunCmdResponse>()
            .await
            .context("invalid guest agent command payload")?;
        if let Some(error) = reply.error {
            anyhow::bail!("guest agent refused command: {error}");
        }
        reply
            .pid
            .ok_or_else(|| anyhow::anyhow!("guest agent reply carried no pid"))
    }

    async fn query_pid(&self, pid: i32) -> anyhow::Result<bool> {
        let response = self
            .client
            .get(self.endpoint(&format!("v1/processes/{pid}")))
            .timeout(AGENT_RPC_TIMEOUT)
            .send()
            .await
            .context("failed to query guest agent")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = Self::error_body(response).await;
            anyhow::bail!("guest agent returned {status}: {body}");
        }

        let reply = response
            .json::<AgentProcessResponse>()
            .await
            .context("invalid guest agent process payload")?;
        Ok(reply.alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use std::{
        net::Ipv4Addr,
        sync::{Arc, atomic::AtomicUsize},
    };

    const LIVE_PID: i32 = 4242;

    #[derive(Clone, Default)]
    struct FakeAgent {
        health_hits: Arc<AtomicUsize>,
    }

    async fn health(State(agent): State<FakeAgent>) -> Json<serde_json::Value> {
        agent.health_hits.fetch_add(1, Ordering::SeqCst);
        Json(serde_json::json!({"ok": true}))
    }

    async fn run_command(Json(request): Json<AgentRunCmdRequest>) -> Response {
        match request.cmd.as_str() {
            "explode" => (StatusCode::INTERNAL_SERVER_ERROR, "agent crashed").into_response(),
            "refuse" => Json(AgentRunCmdResponse {
                pid: None,
                error: Some("fork failed".to_string()),
            })
            .into_response(),
            _ => Json(AgentRunCmdResponse {
                pid: Some(LIVE_PID),
                error: None,
            })
            .into_response(),
        }
    }

    async fn process(Path(pid): Path<i32>) -> Json<AgentProcessResponse> {
        Json(AgentProcessResponse {
            pid,
            alive: pid == LIVE_PID,
        })
    }

    async fn spawn_fake_agent() -> (u16, FakeAgent) {
        let agent = FakeAgent::default();
        let app = Router::new()
            .route("/health", get(health))
            .route("/v1/commands", post(run_command))
            .route("/v1/processes/{pid}", get(process))
            .with_state(agent.clone());
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (port, agent)
    }

    fn client(port: u16) -> HttpGuestAgent {
        HttpGuestAgent::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            Duration::from_millis(500),
        )
    }

    async fn unused_port() -> u16 {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn ensure_connection_caches_until_reset() {
        let (port, fake) = spawn_fake_agent().await;
        let agent = client(port);

        assert!(agent.ensure_connection().await);
        assert!(agent.ensure_connection().await);
        assert_eq!(fake.health_hits.load(Ordering::SeqCst), 1);

        agent.reset_connection().await;
        assert!(agent.ensure_connection().await);
        assert_eq!(fake.health_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ensure_connection_is_false_when_agent_is_down() {
        let agent = client(unused_port().await);
        assert!(!agent.ensure_connection().await);
        assert!(!agent.ensure_connection().await);
    }

    #[tokio::test]
    async fn run_cmd_returns_pid() {
        let (port, _) = spawn_fake_agent().await;
        let pid = client(port).run_cmd("nc -lk 30001").await.unwrap();
        assert_eq!(pid, LIVE_PID);
    }

    #[tokio::test]
    async fn run_cmd_surfaces_agent_refusal() {
        let (port, _) = spawn_fake_agent().await;
        let error = client(port).run_cmd("refuse").await.unwrap_err();
        assert!(error.to_string().contains("fork failed"));
    }

    #[tokio::test]
    async fn run_cmd_surfaces_http_failure() {
        let (port, _) = spawn_fake_agent().await;
        let error = client(port).run_cmd("explode").await.unwrap_err();
        assert!(error.to_string().contains("500"));
    }

    #[tokio::test]
    async fn run_cmd_fails_when_agent_unreachable() {
        let error = client(unused_port().await)
            .run_cmd("id")
            .await
            .unwrap_err();
        assert!(error.to_string().contains("failed to call guest agent"));
    }

    #[tokio::test]
    async fn query_pid_reports_liveness() {
        let (port, _) = spawn_fake_agent().await;
        let agent = client(port);
        assert!(agent.query_pid(LIVE_PID).await.unwrap());
        assert!(!agent.query_pid(7).await.unwrap());
    }
}
