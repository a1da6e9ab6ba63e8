use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

/// Application paths following OS conventions
#[derive(Clone, Debug)]
pub struct AppPaths {
    /// Configuration directory (config.toml)
    pub config: PathBuf,
    /// Data directory (lockout.json)
    pub data: PathBuf,
    /// Cache directory (logs)
    pub cache: PathBuf,
}

impl AppPaths {
    /// Resolve OS-specific paths for Biogate
    ///
    /// # Platform Paths
    ///
    /// ## Linux
    /// - Config: `~/.config/Biogate/`
    /// - Data: `~/.local/share/Biogate/` → lockout.json
    /// - Cache: `~/.cache/Biogate/` → logs/
    ///
    /// ## macOS
    /// - Config: `~/Library/Preferences/Biogate/`
    /// - Data: `~/Library/Application Support/Biogate/`
    /// - Cache: `~/Library/Caches/Biogate/`
    ///
    /// ## Windows
    /// - Config: `%APPDATA%\Biogate\config\`
    /// - Data: `%LOCALAPPDATA%\Biogate\`
    /// - Cache: `%LOCALAPPDATA%\Biogate\Cache\`
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "LotusEmberLabs", "Biogate")
            .context("Failed to determine project directories")?;

        Ok(Self {
            config: proj_dirs.config_dir().to_path_buf(),
            data: proj_dirs.data_dir().to_path_buf(),
            cache: proj_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Keep everything under one directory (tests, `--root`)
    pub fn from_root(root: &Path) -> Self {
        Self {
            config: root.join("config"),
            data: root.join("data"),
            cache: root.join("cache"),
        }
    }

    /// Create all necessary directories
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.config).context("Failed to create config directory")?;
        fs::create_dir_all(&self.data).context("Failed to create data directory")?;
        fs::create_dir_all(self.logs_dir()).context("Failed to create logs directory")?;

        log::debug!("Application directories initialized");
        log::debug!("  Config: {}", self.config.display());
        log::debug!("  Data:   {}", self.data.display());
        log::debug!("  Cache:  {}", self.cache.display());

        Ok(())
    }

    /// Get path to config file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Get path to persisted lockout state
    pub fn lockout_file(&self) -> PathBuf {
        self.data.join("lockout.json")
    }

    /// Get path to logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.cache.join("logs")
    }
}
