pub mod signals;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigLoader};
use crate::engine::{EngineReport, EngineSettings, SyncEngine};
use crate::system::{AudioSystemInterface, FileSystemInterface};

pub use signals::{SignalHandler, SignalType};

/// Long-running daemon: owns the engine, keeps it subscribed to the audio
/// system and reacts to process signals
pub struct PriorityService<A: AudioSystemInterface, F: FileSystemInterface> {
    engine: SyncEngine<A, F>,
    config_loader: ConfigLoader<F>,
    config: Config,
}

impl<A: AudioSystemInterface, F: FileSystemInterface> PriorityService<A, F> {
    pub fn new(engine: SyncEngine<A, F>, config_loader: ConfigLoader<F>, config: Config) -> Self {
        Self {
            engine,
            config_loader,
            config,
        }
    }

    /// Run until SIGTERM or SIGINT
    pub async fn run(&mut self) -> Result<()> {
        let (signal_handler, signals) = SignalHandler::channel();
        tokio::spawn(async move {
            if let Err(e) = signal_handler.listen_for_signals().await {
                error!("Signal handler error: {:#}", e);
            }
        });

        self.run_until(signals).await
    }

    /// Start the engine and process signals from `signals` until a shutdown
    /// request arrives or the channel closes
    pub async fn run_until(&mut self, mut signals: mpsc::UnboundedReceiver<SignalType>) -> Result<()> {
        info!("Starting audio priority service");

        let report = self
            .engine
            .start()
            .context("Failed to start the sync engine")?;
        log_report("Initial sync", &report);
        info!(
            "Audio priority service running in {} mode",
            if self.engine.is_auto_mode() {
                "auto"
            } else {
                "manual"
            }
        );

        while let Some(signal) = signals.recv().await {
            match signal {
                SignalType::Shutdown => break,
                SignalType::Reload => {
                    if let Err(e) = self.reload_config() {
                        error!("Failed to reload configuration: {:#}", e);
                    }
                }
            }
        }

        self.engine.shutdown();
        info!("Audio priority service stopped");
        Ok(())
    }

    /// Reload configuration and apply the new timing to the engine
    pub fn reload_config(&mut self) -> Result<()> {
        info!(
            "Reloading configuration from {}",
            self.config_loader.config_path().display()
        );
        let new_config = self.config_loader.load_config()?;

        if new_config.general.state_dir != self.config.general.state_dir {
            warn!("state_dir changes take effect after a restart");
        }
        self.engine
            .update_settings(EngineSettings::from(&new_config.engine));
        self.config = new_config;

        info!("Configuration reloaded successfully");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &SyncEngine<A, F> {
        &self.engine
    }
}

fn log_report(context: &str, report: &EngineReport) {
    for switch in &report.switches {
        info!(
            "{}: default {} device is now {} ({})",
            context,
            switch.device_type.as_str(),
            switch.name,
            switch.uid
        );
    }
    for warning in &report.warnings {
        warn!("{}: {}", context, warning);
    }
}
