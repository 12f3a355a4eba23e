use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::geometry::AdjustMode;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub adjust_mode: AdjustMode,
    pub layout: LayoutSettings,
    pub zoom: ZoomSettings,
    pub render: RenderSettings,
    pub navigation: NavigationSettings,
}

/// Raw layout values; clamped when applied, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    pub padding: i64,
    pub pages_per_row: i64,
    pub first_page_column: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomSettings {
    pub default: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Worker threads; 0 means one per CPU.
    pub workers: usize,
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationSettings {
    /// How long a page jump waits for the layout to settle after the index
    /// panel closes.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "settle_delay_ms")]
    pub settle_delay: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            adjust_mode: AdjustMode::None,
            layout: LayoutSettings::default(),
            zoom: ZoomSettings::default(),
            render: RenderSettings::default(),
            navigation: NavigationSettings::default(),
        }
    }
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            padding: 1,
            pages_per_row: 1,
            first_page_column: 1,
        }
    }
}

impl Default for ZoomSettings {
    fn default() -> Self {
        Self {
            default: 1.0,
            min: 0.1,
            max: 10.0,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(50),
        }
    }
}

impl ZoomSettings {
    /// Limits `scale` to `[min, max]`. A reversed range is read the other
    /// way round. NaN passes through so the geometry can reject it.
    pub fn clamp(&self, scale: f64) -> f64 {
        let (low, high) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        if scale.is_nan() {
            scale
        } else {
            scale.max(low).min(high)
        }
    }
}

impl ViewerConfig {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "pageflow", "pageflow")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid viewer configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("failed to parse config file {:?}", path))
    }

    /// Loads `explicit` if given, otherwise the platform config file when it
    /// exists, otherwise defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to encode viewer configuration")
    }
}
