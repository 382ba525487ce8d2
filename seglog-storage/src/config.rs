use std::{fs, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};
use seglog_core::common::error::{Error, Result};

use crate::segment::index::ENTRY_WIDTH;

pub const DEFAULT_CONFIG_FILE: &str = "seglog.yml";

const DEFAULT_MAX_STORE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_INDEX_BYTES: u64 = 1024 * 1024 * ENTRY_WIDTH;

#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub struct Config {
    /// Where segment files live, `~/.seglog` when unset
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub segment: SegmentConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SegmentConfig {
    /// Advisory: a segment whose store reached it reports itself maxed.
    pub max_store_bytes: u64,
    /// Hard index capacity, a multiple of 12.
    pub max_index_bytes: u64,
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            max_store_bytes: DEFAULT_MAX_STORE_BYTES,
            max_index_bytes: DEFAULT_MAX_INDEX_BYTES,
            initial_offset: 0,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn from_file<P: AsRef<Path>>(cfg_file: P) -> Result<Self> {
        let cfg_file = cfg_file.as_ref();
        let cfg = fs::read_to_string(cfg_file).map_err(|error| {
            Error::new_config(
                Some(error.into()),
                Some(format!("read {} is failed", cfg_file.display())),
            )
        })?;

        let config: Config = serde_yaml::from_str(&cfg).map_err(|error| {
            Error::new_config(
                Some(error.into()),
                Some(format!("parse {} is failed", cfg_file.display())),
            )
        })?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.segment.validate()
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(data_dir) => Ok(data_dir.clone()),
            None => home::home_dir()
                .map(|home| home.join(".seglog"))
                .ok_or_else(|| Error::new_config(None, Some("no home dir for data_dir".to_owned()))),
        }
    }
}

impl SegmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_index_bytes == 0 || self.max_index_bytes % ENTRY_WIDTH != 0 {
            Err(Error::new_config(
                None,
                Some(format!(
                    "max_index_bytes {} must be a non-zero multiple of {ENTRY_WIDTH}",
                    self.max_index_bytes
                )),
            ))?
        }

        Ok(())
    }
}
