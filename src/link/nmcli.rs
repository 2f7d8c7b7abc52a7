//! NetworkManager-backed Wi-Fi link, and a static link for wired hosts

use super::traits::NetworkLink;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Joins a Wi-Fi network through `nmcli`
pub struct NmcliLink {
    interface: String,
    ssid: String,
    password: String,
    /// The `nmcli device wifi connect` invocation of the current join, if any
    pending: Mutex<Option<Child>>,
}

impl NmcliLink {
    pub fn new(interface: impl Into<String>, ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ssid: ssid.into(),
            password: password.into(),
            pending: Mutex::new(None),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

/// Run `nmcli` and capture stdout. Arguments are never logged (they can hold the password).
async fn nmcli(args: &[&str]) -> Result<String> {
    let output = Command::new("nmcli")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(anyhow!(
            "nmcli {} exited with {}: {}",
            args.first().copied().unwrap_or_default(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Collect a join process that has exited so it does not linger as a zombie
fn reap_finished(pending: &mut Option<Child>) -> Option<ExitStatus> {
    let child = pending.as_mut()?;
    match child.try_wait() {
        Ok(Some(status)) => {
            *pending = None;
            Some(status)
        }
        Ok(None) => None,
        Err(e) => {
            debug!("[LINK] Could not poll join process: {}", e);
            *pending = None;
            None
        }
    }
}

/// Whether `interface` is listed as connected in `nmcli -t -f DEVICE,STATE device` output
fn device_connected(output: &str, interface: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .any(|(device, state)| device == interface && state.trim() == "connected")
}

#[async_trait]
impl NetworkLink for NmcliLink {
    async fn is_connected(&self) -> bool {
        if let Some(status) = reap_finished(&mut *self.pending.lock().await) {
            debug!("[LINK] Join process exited with {}", status);
        }

        match nmcli(&["-t", "-f", "DEVICE,STATE", "device"]).await {
            Ok(output) => device_connected(&output, &self.interface),
            Err(e) => {
                debug!("[LINK] Status query failed: {}", e);
                false
            }
        }
    }

    async fn begin_join(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if let Some(mut previous) = pending.take() {
            let _ = previous.start_kill();
        }

        info!("[LINK] Joining {:?} on {}", self.ssid, self.interface);
        let child = Command::new("nmcli")
            .args(["device", "wifi", "connect", self.ssid.as_str()])
            .args(["password", self.password.as_str()])
            .args(["ifname", self.interface.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        *pending = Some(child);
        Ok(())
    }

    async fn abort_join(&self) {
        if let Some(mut child) = self.pending.lock().await.take() {
            let _ = child.start_kill();
        }

        if let Err(e) = nmcli(&["device", "disconnect", self.interface.as_str()]).await {
            debug!("[LINK] Disconnect after aborted join failed: {}", e);
        }
    }

    fn name(&self) -> &'static str {
        "Wi-Fi"
    }
}

/// A link that is always up (wired or pre-provisioned hosts)
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticLink;

#[async_trait]
impl NetworkLink for StaticLink {
    async fn is_connected(&self) -> bool {
        true
    }

    async fn begin_join(&self) -> Result<()> {
        Ok(())
    }

    async fn abort_join(&self) {}

    fn name(&self) -> &'static str {
        "Static"
    }
}
