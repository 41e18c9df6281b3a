//! Dashboard configuration: dataset locations, wave windows and pipeline
//! defaults, read from a TOML file.

use crate::data::DateWindow;
use crate::stats::{AGE_GROUP_SCALE, DEFAULT_WINDOW};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Unknown wave {0:?}")]
    UnknownWave(String),
    #[error("Wave {name:?} ends before it starts")]
    InvertedWave { name: String },
}

/// Input files, all read fresh on every view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    /// Semicolon separated national tests file.
    pub national_tests: PathBuf,
    /// Semicolon separated department emergency visits file.
    pub emergency_visits: PathBuf,
    /// Comma separated department names.
    pub department_names: PathBuf,
    /// GeoJSON department boundaries.
    pub boundaries: PathBuf,
    pub names_code_column: String,
    pub names_name_column: String,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            national_tests: PathBuf::from("data/sp-pos-quot-fra.csv"),
            emergency_visits: PathBuf::from("data/sursaud-covid19-departement.csv"),
            department_names: PathBuf::from("data/departements-france.csv"),
            boundaries: PathBuf::from("data/departements.geojson"),
            names_code_column: "code_departement".to_string(),
            names_name_column: "nom_departement".to_string(),
        }
    }
}

/// A named epidemic surge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Wave {
    fn new(name: &str, start: (i32, u32, u32), end: (i32, u32, u32)) -> Self {
        let date = |(y, m, d): (i32, u32, u32)| {
            NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
        };
        Self {
            name: name.to_string(),
            start: date(start),
            end: date(end),
        }
    }

    pub fn window(&self) -> DateWindow {
        DateWindow::new(self.start, self.end)
    }
}

fn default_waves() -> Vec<Wave> {
    vec![
        Wave::new("wave-1", (2020, 3, 1), (2020, 5, 31)),
        Wave::new("wave-2", (2020, 9, 1), (2020, 12, 31)),
        Wave::new("wave-3", (2021, 1, 1), (2021, 5, 31)),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub data: DataPaths,
    /// Trailing average length, in days.
    pub rolling_window: usize,
    /// Scale applied to age-group shares.
    pub share_scale: f64,
    /// Length of the zoomable national window, in months.
    pub zoom_months: u32,
    pub waves: Vec<Wave>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data: DataPaths::default(),
            rolling_window: DEFAULT_WINDOW,
            share_scale: AGE_GROUP_SCALE,
            zoom_months: 9,
            waves: default_waves(),
        }
    }
}

impl DashboardConfig {
    /// Read a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.waves.iter().find(|w| w.end < w.start) {
            Some(wave) => Err(ConfigError::InvertedWave {
                name: wave.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Look a wave up by name, or by its 1-based number.
    pub fn wave(&self, name: &str) -> Result<&Wave, ConfigError> {
        let by_index = name
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.waves.get(i));

        by_index
            .or_else(|| self.waves.iter().find(|w| w.name.eq_ignore_ascii_case(name)))
            .ok_or_else(|| ConfigError::UnknownWave(name.to_string()))
    }
}
