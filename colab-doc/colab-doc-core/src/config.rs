//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "COLAB_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding one snapshot file per document
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File extension of snapshot files
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Persist a document every time a local commit produces changes
    #[serde(default = "default_true")]
    pub save_on_commit: bool,

    /// Events a slow subscriber may fall behind before it starts missing them
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            extension: default_extension(),
            save_on_commit: true,
            event_capacity: default_event_capacity(),
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults, with the data directory taken from `COLAB_DATA_DIR` when set.
    pub fn from_env() -> Self {
        match std::env::var(DATA_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::default(),
        }
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn with_save_on_commit(mut self, save_on_commit: bool) -> Self {
        self.save_on_commit = save_on_commit;
        self
    }

    pub(crate) fn snapshot_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.{}", name, self.extension))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_extension() -> String {
    "bin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    100
}
