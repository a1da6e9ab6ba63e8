use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::auth::{OrchestratorConfig, RestartConfig};
use crate::sensors::{default_sensors, SensorConfig};

/// Lockout persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Keep lockouts across process restarts (data dir `lockout.json`)
    pub persist: bool,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self { persist: true }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            restart: RestartConfig::default(),
            lockout: LockoutConfig::default(),
            sensors: default_sensors(),
        }
    }
}

impl AppConfig {
    /// Load config from file or create default
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?;
            config.validate()?;
            log::info!("Config loaded from: {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            log::info!("Default config created at: {}", path.display());
            Ok(config)
        }
    }

    /// Write the config with owner-only permissions
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, toml_str)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600); // Owner read/write only
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.orchestrator
            .validate()
            .context("Invalid [orchestrator] section")?;
        self.restart.validate().context("Invalid [restart] section")?;
        for sensor in &self.sensors {
            sensor.validate()?;
        }
        Ok(())
    }
}
