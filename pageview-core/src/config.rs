use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::presentation::ZoomBounds;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub scheduler: SchedulerConfig,
    pub search: SearchConfig,
    pub zoom: ZoomConfig,
    pub fetch: FetchConfig,
    pub engine: EngineConfig,
}

impl ViewerConfig {
    /// Reads `path` if it exists; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.burst_pages == 0 {
            bail!("scheduler.burst_pages must be at least 1");
        }
        if self.scheduler.publish_every == 0 {
            bail!("scheduler.publish_every must be at least 1");
        }
        if !(self.scheduler.render_scale.is_finite() && self.scheduler.render_scale > 0.0) {
            bail!("scheduler.render_scale must be a positive number");
        }
        self.zoom
            .single_page
            .validate()
            .context("zoom.single_page")?;
        self.zoom.flip_book.validate().context("zoom.flip_book")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pages rendered before the document is shown.
    pub burst_pages: usize,
    /// Background pages completed between two snapshot publications.
    pub publish_every: usize,
    pub render_scale: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            burst_pages: 4,
            publish_every: 2,
            render_scale: 1.5,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "debounce_ms")]
    pub debounce: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub single_page: ZoomBounds,
    pub flip_book: ZoomBounds,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            single_page: ZoomBounds::new(0.5, 3.0, 0.25),
            flip_book: ZoomBounds::new(0.25, 5.0, 0.25),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub connect_timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(30),
            user_agent: format!("pageview/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Decode engine binding. Applied once per process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub library_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ViewerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scheduler.burst_pages, 4);
        assert_eq!(config.scheduler.publish_every, 2);
        assert_eq!(config.search.debounce, Duration::from_millis(300));
        assert_eq!(config.zoom.single_page.min, 0.5);
        assert_eq!(config.zoom.single_page.max, 3.0);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[search]\ndebounce_ms = 120\n\n[zoom.flip_book]\nmin = 0.5\nmax = 4.0\nstep = 0.5\n",
        )
        .unwrap();

        let config = ViewerConfig::load(&path).unwrap();
        assert_eq!(config.search.debounce, Duration::from_millis(120));
        assert_eq!(config.zoom.flip_book.max, 4.0);
        assert_eq!(config.zoom.single_page.max, 3.0);
        assert_eq!(config.scheduler.burst_pages, 4);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(ViewerConfig::from_toml_str("[scheduler]\npublish_every = 0\n").is_err());
        assert!(
            ViewerConfig::from_toml_str("[zoom.single_page]\nmin = 2.0\nmax = 1.0\nstep = 0.1\n")
                .is_err()
        );
    }
}
