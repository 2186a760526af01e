//! CLI command implementations.

pub mod check;
pub mod clean;
pub mod config;
pub mod init;
pub mod update;
pub mod verify;

use std::path::Path;
use std::sync::Arc;

use modupdater::logging::{self, LoggingGuard};
use modupdater::{ReqwestTransport, UpdateOrchestrator, UpdaterConfig, UserSignals};

use crate::error::CliError;

/// Loaded configuration plus the logging guard, shared by the commands that
/// touch the network or the device.
pub struct Context {
    pub config: UpdaterConfig,
    _logging: LoggingGuard,
}

impl Context {
    /// Load the config file and start logging.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the log directory
    /// cannot be set up.
    pub fn load(config_path: &Path, verbose: bool) -> Result<Self, CliError> {
        let config = UpdaterConfig::load_from(config_path)?;
        let logging = logging::init(&config.logging, verbose)?;
        tracing::debug!(path = %config_path.display(), "Loaded configuration");
        Ok(Self {
            config,
            _logging: logging,
        })
    }

    /// Orchestrator over the real HTTP transport.
    pub fn orchestrator(
        &self,
        config: UpdaterConfig,
        signals: Arc<UserSignals>,
    ) -> Result<UpdateOrchestrator<ReqwestTransport>, CliError> {
        let transport = Arc::new(ReqwestTransport::new(&config.network)?);
        Ok(UpdateOrchestrator::new(config, transport, signals))
    }
}
