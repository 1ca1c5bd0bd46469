//! Layered settings for `wfs-daq`.
//!
//! Precedence, lowest first: built-in defaults, the TOML file given with
//! `--config`, then `WFS_DAQ_*` environment variables with `__` separating
//! nesting levels (`WFS_DAQ_SENSOR__ZERNIKE_ORDER=6`). Command line flags
//! are applied on top by the caller.

use anyhow::{Context, Result};
use daq_core::capabilities::TableSink;
use daq_driver_thorlabs_wfs::WfsConfig;
use daq_storage::{Hdf5TableSink, JsonLinesSink};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ENV_PREFIX: &str = "WFS_DAQ_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Hdf5,
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub path: PathBuf,
    pub format: OutputFormat,
    /// Group name the run is stored under.
    pub group: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("WFSdata.txt"),
            format: OutputFormat::Jsonl,
            group: "wavefront_sensor".to_string(),
        }
    }
}

impl OutputSettings {
    pub fn open_sink(&self) -> Result<Arc<dyn TableSink>> {
        Ok(match self.format {
            OutputFormat::Hdf5 => Arc::new(
                Hdf5TableSink::new(&self.path)
                    .with_context(|| format!("HDF5 output {}", self.path.display()))?,
            ),
            OutputFormat::Jsonl => Arc::new(JsonLinesSink::new(&self.path)),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sensor: WfsConfig,
    pub output: OutputSettings,
}

impl Settings {
    pub fn figment(config: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = config {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate the sensor configuration.
    pub fn load(config: Option<&Path>) -> Result<Self> {
        if let Some(path) = config {
            anyhow::ensure!(path.exists(), "config file {} not found", path.display());
        }
        let settings: Settings = Self::figment(config)
            .extract()
            .context("failed to load settings")?;
        settings
            .sensor
            .validate()
            .context("invalid sensor configuration")?;
        Ok(settings)
    }
}
