use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_OVERSCAN: usize = 3;
pub const MAX_OVERSCAN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    /// Rows per remote page. Scroll granularity never changes fetch granularity.
    pub chunk_size: usize,
    pub overscan: usize,
    pub estimated_row_height: f64,
    pub max_undo_depth: usize,
    /// Scroll requests further than this many viewports are instant jumps.
    pub smooth_scroll_max_distance: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overscan: 8,
            estimated_row_height: 28.0,
            max_undo_depth: 500,
            smooth_scroll_max_distance: 1.0,
        }
    }
}

impl GridConfig {
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self.overscan = self.overscan.clamp(MIN_OVERSCAN, MAX_OVERSCAN);
        if !self.estimated_row_height.is_finite() || self.estimated_row_height <= 0.0 {
            self.estimated_row_height = Self::default().estimated_row_height;
        }
        self.max_undo_depth = self.max_undo_depth.max(1);
        if !self.smooth_scroll_max_distance.is_finite() || self.smooth_scroll_max_distance < 0.0 {
            self.smooth_scroll_max_distance = 0.0;
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read grid config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse grid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize grid config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write grid config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileGridConfigStore {
    path: PathBuf,
    config: GridConfig,
}

impl FileGridConfigStore {
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_from_path(default_config_path()?)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                config: GridConfig::default(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                config: GridConfig::default(),
            });
        }

        let config: GridConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            config: config.normalized(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GridConfig) {
        self.config = config.normalized();
    }

    pub fn persist(&self) -> Result<(), ConfigError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ConfigError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(&self.config)
            .map_err(|source| ConfigError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = if let Some(custom) = env::var_os("SQLGRID_CONFIG_DIR") {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("sqlgrid"))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join("grid.toml"))
}
