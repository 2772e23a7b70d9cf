//! Process configuration. Every field can come from a flag, the environment
//! (including a `.env` file loaded by the binaries) or its default.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::brain::DEFAULT_MODEL;
use crate::error::StoreError;
use crate::store::Store;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DEBUG_PORT: u16 = 9222;
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SURFACE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Model name sent with every generate request
    #[arg(long, env = "PAGE_PILOT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Where settings, profile and history live
    #[arg(long, env = "PAGE_PILOT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// First port tried by the web UI
    #[arg(long, env = "PAGE_PILOT_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, env = "PAGE_PILOT_MODEL_TIMEOUT_SECS", default_value_t = DEFAULT_MODEL_TIMEOUT_SECS)]
    pub model_timeout_secs: u64,

    #[arg(long, env = "PAGE_PILOT_SURFACE_TIMEOUT_SECS", default_value_t = DEFAULT_SURFACE_TIMEOUT_SECS)]
    pub surface_timeout_secs: u64,

    /// Chrome binary to launch when no running browser can be attached
    #[arg(long, env = "PAGE_PILOT_CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Remote debugging port of an already running Chrome
    #[arg(long, env = "PAGE_PILOT_DEBUG_PORT", default_value_t = DEFAULT_DEBUG_PORT)]
    pub debug_port: u16,

    /// Launch Chrome without a window
    #[arg(long, env = "PAGE_PILOT_HEADLESS")]
    pub headless: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            data_dir: None,
            port: DEFAULT_PORT,
            model_timeout_secs: DEFAULT_MODEL_TIMEOUT_SECS,
            surface_timeout_secs: DEFAULT_SURFACE_TIMEOUT_SECS,
            chrome_path: None,
            debug_port: DEFAULT_DEBUG_PORT,
            headless: false,
        }
    }
}

impl Config {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn surface_timeout(&self) -> Duration {
        Duration::from_secs(self.surface_timeout_secs)
    }

    /// The configured data directory, or the platform default.
    pub fn data_dir(&self) -> Result<PathBuf, StoreError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Store::default_dir(),
        }
    }

    pub fn open_store(&self) -> Result<Store, StoreError> {
        Store::open(self.data_dir()?)
    }
}
