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

use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Created,
    Ready,
    Running,
    Destroyed,
    Error,
}

/// One virtual machine owned by a single game.
///
/// Calls block the caller's task until the hypervisor answers; any timeout
/// is the implementation's responsibility.
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    /// Materialises the VM from its template. `Created` to `Ready`.
    async fn init(&self) -> anyhow::Result<()>;
    /// `Ready` to `Running`.
    async fn boot(&self) -> anyhow::Result<()>;
    /// `Running` to `Ready`.
    async fn shutdown(&self) -> anyhow::Result<()>;
    /// Releases every hypervisor resource. Ends in `Destroyed`.
    async fn destroy(&self) -> anyhow::Result<()>;
    async fn state(&self) -> VmState;
}

/// VirtualBox driver: clones the scenario template into a per-game VM and
/// drives it with `VBoxManage`.
pub struct VBoxVm {
    vboxmanage: String,
    template: String,
    name: String,
    state: Mutex<VmState>,
}

impl VBoxVm {
    pub fn new(
        vboxmanage: impl Into<String>,
        template: impl Into<String>,
        game_name: &str,
    ) -> Self {
        Self {
            vboxmanage: vboxmanage.into(),
            template: template.into(),
            name: format!("kof-{game_name}-{}", Uuid::new_v4().simple()),
            state: Mutex::new(VmState::Created),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn current(&self) -> VmState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: VmState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn expect_state(&self, expected: VmState, action: &str) -> anyhow::Result<()> {
        let current = self.current();
        if current != expected {
            anyhow::bail!(
                "cannot {action} vm {} in state {current:?}, expected {expected:?}",
                self.name
            );
        }
        Ok(())
    }

    async fn vboxmanage(&self, args: &[&str]) -> anyhow::Result<()> {
        let output = Command::new(&self.vboxmanage)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.vboxmanage))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} {} exited with {}: {}",
                self.vboxmanage,
                args.join(" "),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }

    /// Runs one hypervisor step; a failed command parks the VM in `Error`.
    async fn transition(&self, args: &[&str], next: VmState) -> anyhow::Result<()> {
        match self.vboxmanage(args).await {
            Ok(()) => {
                self.set(next);
                info!(vm = %self.name, state = ?next, "vm transitioned");
                Ok(())
            }
            Err(error) => {
                self.set(VmState::Error);
                warn!(vm = %self.name, error = %error, "vm command failed");
                Err(error)
            }
        }
    }
}

#[async_trait]
impl VirtualMachine for VBoxVm {
    async fn init(&self) -> anyhow::Result<()> {
        self.expect_state(VmState::Created, "init")?;
        self.transition(
            &[
                "clonevm",
                self.template.as_str(),
                "--name",
                self.name.as_str(),
                "--register",
                "--mode",
                "machine",
            ],
            VmState::Ready,
        )
        .await
    }

    async fn boot(&self) -> anyhow::Result<()> {
        self.expect_state(VmState::Ready, "boot")?;
        self.transition(
            &["startvm", self.name.as_str(), "--type", "headless"],
            VmState::Running,
        )
        .await
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.expect_state(VmState::Running, "shut down")?;
        self.transition(&["controlvm", self.name.as_str(), "poweroff"], VmState::Ready)
            .await
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        match self.current() {
            VmState::Destroyed => Ok(()),
            VmState::Created => {
                // Never cloned, nothing registered with the hypervisor.
                self.set(VmState::Destroyed);
                Ok(())
            }
            VmState::Ready | VmState::Error => {
                self.transition(
                    &["unregistervm", self.name.as_str(), "--delete"],
                    VmState::Destroyed,
                )
                .await
            }
            VmState::Running => anyhow::bail!("cannot destroy running vm {}", self.name),
        }
    }

    async fn state(&self) -> VmState {
        self.current()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_lifecycle_with_succeeding_hypervisor() {
        let vm = VBoxVm::new("true", "kof-template", "game1");
        assert!(vm.name().starts_with("kof-game1-"));
        assert_eq!(vm.state().await, VmState::Created);

        vm.init().await.unwrap();
        assert_eq!(vm.state().await, VmState::Ready);
        vm.boot().await.unwrap();
        assert_eq!(vm.state().await, VmState::Running);
        vm.shutdown().await.unwrap();
        assert_eq!(vm.state().await, VmState::Ready);
        vm.destroy().await.unwrap();
        assert_eq!(vm.state().await, VmState::Destroyed);

        vm.destroy().await.unwrap();
        assert_eq!(vm.state().await, VmState::Destroyed);
    }

    #[tokio::test]
    async fn failing_command_moves_vm_to_error() {
        let vm = VBoxVm::new("false", "kof-template", "game1");
        let error = vm.init().await.unwrap_err();
        assert!(error.to_string().contains("clonevm"));
        assert_eq!(vm.state().await, VmState::Error);
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let vm = VBoxVm::new("/nonexistent/VBoxManage", "kof-template", "game1");
        let error = vm.init().await.unwrap_err();
        assert!(error.to_string().contains("failed to spawn"));
        assert_eq!(vm.state().await, VmState::Error);
    }

    #[tokio::test]
    async fn boot_requires_init_first() {
        let vm = VBoxVm::new("true", "kof-template", "game1");
        let error = vm.boot().await.unwrap_err();
        assert!(error.to_string().contains("expected Ready"));
        assert_eq!(vm.state().await, VmState::Created);
    }

    #[tokio::test]
    async fn destroying_uninitialised_vm_skips_hypervisor() {
        let vm = VBoxVm::new("false", "kof-template", "game1");
        vm.destroy().await.unwrap();
        assert_eq!(vm.state().await, VmState::Destroyed);
    }

    #[tokio::test]
    async fn running_vm_cannot_be_destroyed() {
        let vm = VBoxVm::new("true", "kof-template", "game1");
        vm.init().await.unwrap();
        vm.boot().await.unwrap();
        assert!(vm.destroy().await.is_err());
        assert_eq!(vm.state().await, VmState::Running);
    }
}
