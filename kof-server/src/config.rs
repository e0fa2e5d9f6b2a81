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
    fmt::Display, net::SocketAddr, ops::RangeInclusive, path::PathBuf, str::FromStr,
    time::Duration,
};

use anyhow::Context;
use kof_common::{DEFAULT_AGENT_PORT, DEFAULT_PORT_END, DEFAULT_PORT_START};

/// Process-wide settings for the control plane, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub port_start: u16,
    pub port_end: u16,
    pub scenario_dir: PathBuf,
    pub agent_port: u16,
    pub agent_connect_timeout: Duration,
    pub loop_backoff: Duration,
    pub score_interval: Duration,
    pub port_probe_timeout: Duration,
    pub port_points: u64,
    pub pid_points: u64,
    pub vboxmanage: String,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; unset or blank variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let config = Self {
            bind_addr: parse_or(
                read("KOF_SERVER_BIND"),
                "KOF_SERVER_BIND",
                SocketAddr::from(([0, 0, 0, 0], 29110)),
            )?,
            port_start: parse_or(read("KOF_PORT_START"), "KOF_PORT_START", DEFAULT_PORT_START)?,
            port_end: parse_or(read("KOF_PORT_END"), "KOF_PORT_END", DEFAULT_PORT_END)?,
            scenario_dir: read("KOF_SCENARIO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("scenarios")),
            agent_port: parse_or(read("KOF_AGENT_PORT"), "KOF_AGENT_PORT", DEFAULT_AGENT_PORT)?,
            agent_connect_timeout: millis_or(
                read("KOF_AGENT_CONNECT_TIMEOUT_MS"),
                "KOF_AGENT_CONNECT_TIMEOUT_MS",
                2000,
            )?,
            loop_backoff: millis_or(read("KOF_LOOP_BACKOFF_MS"), "KOF_LOOP_BACKOFF_MS", 500)?,
            score_interval: millis_or(
                read("KOF_SCORE_INTERVAL_MS"),
                "KOF_SCORE_INTERVAL_MS",
                1000,
            )?,
            port_probe_timeout: millis_or(
                read("KOF_PORT_PROBE_TIMEOUT_MS"),
                "KOF_PORT_PROBE_TIMEOUT_MS",
                500,
            )?,
            port_points: parse_or(read("KOF_PORT_POINTS"), "KOF_PORT_POINTS", 1)?,
            pid_points: parse_or(read("KOF_PID_POINTS"), "KOF_PID_POINTS", 1)?,
            vboxmanage: read("KOF_VBOXMANAGE").unwrap_or_else(|| "VBoxManage".to_string()),
        };

        if config.port_start > config.port_end {
            anyhow::bail!(
                "invalid player port range {}..={}: start is above end",
                config.port_start,
                config.port_end
            );
        }

        Ok(config)
    }

    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_start..=self.port_end
    }
}

fn parse_or<T>(value: Option<String>, var_name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display + Send + Sync + std::error::Error + 'static,
{
    match value {
        Some(raw) => raw.parse().context(format!("invalid {var_name}")),
        None => Ok(default),
    }
}

fn millis_or(value: Option<String>, var_name: &str, default_ms: u64) -> anyhow::Result<Duration> {
    parse_or(value, var_name, default_ms).map(Duration::from_millis)
}
