// Settings load/save and the values the core reads from them

use crate::attribution::CaptureDirection;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "nettop";
const CONFIG_FILE: &str = "settings.json";

pub const MIN_REFRESH_SECS: u64 = 1;
pub const MAX_REFRESH_SECS: u64 = 60;

/// Ordering of processes and hosts by traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub fn compare(&self, lhs: u64, rhs: u64) -> Ordering {
        match self {
            SortOrder::Ascending => lhs.cmp(&rhs),
            SortOrder::Descending => rhs.cmp(&lhs),
        }
    }
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub refresh_secs: u64,
    pub capture: CaptureDirection,
    pub order: SortOrder,
    /// Hide processes with no traffic in the cycle
    pub filter_zero: bool,
    /// Show the TCP/UDP split per host
    pub tcp_udp_split: bool,
    pub no_resolve: bool,
    /// Where unattributed packet events are appended
    pub async_log_file: Option<PathBuf>,
    /// Max host rows per process, 0 for no limit
    pub limit_hosts_rows: usize,
    /// Capture device, "any" for all interfaces
    pub device: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_secs: 3,
            capture: CaptureDirection::Both,
            order: SortOrder::Descending,
            filter_zero: false,
            tcp_udp_split: false,
            no_resolve: false,
            async_log_file: None,
            limit_hosts_rows: 0,
            device: "any".to_string(),
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine config directory")?;
        Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Settings file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        let mut settings: Settings =
            serde_json::from_str(&contents).context("Failed to parse settings file")?;
        settings.clamp();

        log::info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings file: {:?}", path))?;

        log::info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Keep the refresh interval within the supported range
    pub fn clamp(&mut self) {
        self.refresh_secs = self.refresh_secs.clamp(MIN_REFRESH_SECS, MAX_REFRESH_SECS);
    }
}
