//! Fire-time delivery adapters: platform notification first, then an
//! audible tone, then the terminal bell.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::info;
use tokio::process::Command;

use crate::models::NotificationPermission;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn request_permission(&self) -> NotificationPermission;
    async fn notify(&self, title: &str, body: &str) -> Result<()>;
}

/// Plays the fallback tone. Called from a blocking thread.
pub trait ToneFallback: Send + Sync {
    fn play_alarm_tone(&self) -> Result<()>;
}

#[cfg(target_os = "macos")]
const NOTIFY_PROGRAM: &str = "osascript";
#[cfg(not(target_os = "macos"))]
const NOTIFY_PROGRAM: &str = "notify-send";

/// Shells out to the desktop notification helper found on `PATH`.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: Option<PathBuf>,
}

impl DesktopNotifier {
    pub fn detect() -> Self {
        let program = which::which(NOTIFY_PROGRAM).ok();
        match &program {
            Some(path) => info!("Desktop notifications via {}", path.display()),
            None => info!("{NOTIFY_PROGRAM} not found; notifications unavailable"),
        }
        Self { program }
    }

    fn command(&self, program: &Path, title: &str, body: &str) -> Command {
        let mut command = Command::new(program);
        command.kill_on_drop(true);
        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification {} with title {} sound name \"default\"",
                applescript_string(body),
                applescript_string(title)
            );
            command.arg("-e").arg(script);
        } else {
            command
                .arg("--urgency=critical")
                .arg("--app-name=wakecycle")
                .arg(title)
                .arg(body);
        }
        command
    }
}

fn applescript_string(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn request_permission(&self) -> NotificationPermission {
        if self.program.is_some() {
            NotificationPermission::Granted
        } else {
            NotificationPermission::Denied
        }
    }

    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        let Some(program) = &self.program else {
            bail!("{NOTIFY_PROGRAM} is not installed");
        };
        let status = self
            .command(program, title, body)
            .status()
            .await
            .with_context(|| format!("failed to run {}", program.display()))?;
        if !status.success() {
            bail!("{} exited with {status}", program.display());
        }
        Ok(())
    }
}

/// Last resort: ASCII BEL on stderr.
pub fn ring_terminal_bell() -> Result<()> {
    let mut stderr = std::io::stderr();
    stderr
        .write_all(b"\x07")
        .and_then(|_| stderr.flush())
        .context("failed to ring terminal bell")
}
