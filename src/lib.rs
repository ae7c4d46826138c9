pub mod agent;
pub mod analysis;
pub mod audio;
pub mod db;
pub mod error;
pub mod models;
pub mod optimizer;
pub mod reconcile;
pub mod registry;
pub mod settings;
mod utils;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use agent::{
    AgentDeps, AgentTimings, DesktopNotifier, SqliteScheduleStore, SupervisedAgent, SystemClock,
};
use analysis::ScheduleAnalyzer;
use audio::ToneEngineHandle;
use db::{Database, Schema};
use optimizer::WakeTimeOptimizer;
use reconcile::{ReconcileController, ReconcileState};
use registry::AlarmRegistry;
use settings::{EngineConfig, SettingsStore};

/// Composition root: every long-lived service is built here once and
/// handed to whoever needs it.
pub struct AlarmEngine {
    pub registry: AlarmRegistry,
    pub reconcile: ReconcileController,
    pub settings: Arc<SettingsStore>,
    agent: Arc<SupervisedAgent>,
}

impl AlarmEngine {
    pub async fn start(config: &EngineConfig) -> Result<Self> {
        Self::start_with(config, |schedule_db| AgentDeps {
            store: Arc::new(SqliteScheduleStore::new(schedule_db)),
            notifier: Arc::new(DesktopNotifier::detect()),
            tone: Arc::new(ToneEngineHandle::new()),
            clock: Arc::new(SystemClock),
        })
        .await
    }

    /// Like [`start`](Self::start) with caller-supplied agent dependencies
    /// built over the schedule database.
    pub async fn start_with(
        config: &EngineConfig,
        deps: impl FnOnce(Database) -> AgentDeps,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data directory {}", config.data_dir.display())
        })?;

        let settings = Arc::new(SettingsStore::new(config.settings_path())?);
        let scheduler = config.effective_scheduler(settings.scheduler()?);

        let registry_db = Database::new(config.registry_db_path(), Schema::Registry)?;
        let schedule_db = Database::new(config.schedule_db_path(), Schema::Schedule)?;

        let registry = AlarmRegistry::load(
            registry_db,
            settings.clone(),
            ScheduleAnalyzer::default(),
            WakeTimeOptimizer::default(),
        )
        .await?;
        // Suggestions depend on the date (seasonal rule) and on history
        // recorded while the engine was down.
        registry.refresh_smart_schedules().await?;

        let agent = Arc::new(SupervisedAgent::start(
            deps(schedule_db),
            AgentTimings::from(&scheduler),
        ));
        let reconcile = ReconcileController::new(
            agent.clone(),
            registry.clone(),
            scheduler.health_check_interval(),
        );

        let state = reconcile.start().await;
        match &state.last_error {
            Some(err) => warn!("Engine started {:?}: {err}", state.status),
            None => info!("Engine started {:?}", state.status),
        }

        Ok(Self {
            registry,
            reconcile,
            settings,
            agent,
        })
    }

    pub async fn status(&self) -> ReconcileState {
        self.reconcile.state().await
    }

    pub fn agent(&self) -> &Arc<SupervisedAgent> {
        &self.agent
    }

    pub async fn shutdown(self) {
        self.reconcile.shutdown().await;
        self.agent.shutdown().await;
        info!("Engine stopped");
    }
}

/// Runs the engine until Ctrl-C.
pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = EngineConfig::from_env()?;
    info!(
        "wakecycle starting up (data dir {}, debug {})",
        config.data_dir.display(),
        config.debug
    );

    let engine = AlarmEngine::start(&config).await?;
    info!(
        "{} alarm(s) enabled; waiting for Ctrl-C",
        engine.registry.enabled_count().await
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down...");
    engine.shutdown().await;
    Ok(())
}
