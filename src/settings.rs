use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::RwLock,
    time::Duration,
};

use crate::models::SleepGoal;

const DEBUG_HEALTH_CHECK_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    pub health_check_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub notify_timeout_ms: u64,
    pub missed_alarm_grace_secs: u64,
    pub history_window_days: u32,
    pub poll_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 60,
            request_timeout_ms: 5_000,
            notify_timeout_ms: 3_000,
            missed_alarm_grace_secs: 600,
            history_window_days: 30,
            poll_interval_ms: 1_000,
        }
    }
}

impl SchedulerSettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    /// Bounded below the request timeout: a stuck notification helper holds
    /// up every queued request while it runs.
    pub fn notify_timeout(&self) -> Duration {
        let ceiling = self.request_timeout_ms.max(2) / 2;
        Duration::from_millis(self.notify_timeout_ms.clamp(1, ceiling))
    }

    pub fn missed_alarm_grace(&self) -> Duration {
        Duration::from_secs(self.missed_alarm_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    sleep_goal: SleepGoal,
    scheduler: SchedulerSettings,
}

/// JSON-file backed user settings. One sleep goal per user.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring malformed settings at {} ({err}); using defaults",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn sleep_goal(&self) -> Result<SleepGoal> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.sleep_goal.clone())
    }

    pub fn update_sleep_goal(&self, goal: SleepGoal) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        guard.sleep_goal = goal;
        self.persist(&guard)
    }

    pub fn scheduler(&self) -> Result<SchedulerSettings> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.scheduler.clone())
    }

    pub fn update_scheduler(&self, scheduler: SchedulerSettings) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        guard.scheduler = scheduler;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

/// Process-level configuration read from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub debug: bool,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var_os("WAKECYCLE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .ok_or_else(|| anyhow!("no platform data directory; set WAKECYCLE_DATA_DIR"))?
                .join("wakecycle"),
        };

        let debug = std::env::var("WAKECYCLE_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self { data_dir, debug })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn registry_db_path(&self) -> PathBuf {
        self.data_dir.join("registry.sqlite3")
    }

    pub fn schedule_db_path(&self) -> PathBuf {
        self.data_dir.join("schedule.sqlite3")
    }

    /// Applies the debug override on top of the stored scheduler settings.
    pub fn effective_scheduler(&self, stored: SchedulerSettings) -> SchedulerSettings {
        if self.debug {
            SchedulerSettings {
                health_check_interval_secs: DEBUG_HEALTH_CHECK_INTERVAL_SECS,
                ..stored
            }
        } else {
            stored
        }
    }
}
