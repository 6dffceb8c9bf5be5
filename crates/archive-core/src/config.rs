//! Archiver configuration types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Default name of the background archive thread
pub const DEFAULT_WORKER_THREAD_NAME: &str = "tar-checkpoints-writer";

/// Configuration for one archiving session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    /// Destination tar file, created if missing and appended to otherwise
    pub archive_path: PathBuf,

    /// Flush the archive to disk after every task
    pub sync_each_task: bool,

    /// Upper bound on the drain wait at deactivation (unbounded if unset)
    #[serde(with = "optional_millis")]
    pub drain_timeout: Option<Duration>,

    /// Name given to the background archive thread
    pub worker_thread_name: String,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            archive_path: PathBuf::from("checkpoints.tar"),
            sync_each_task: false,
            drain_timeout: None,
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

impl ArchiverConfig {
    /// Default configuration writing to `archive_path`
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Check the configuration for values the archiver cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.archive_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig {
                message: "archive_path must not be empty".to_string(),
            });
        }
        if self.archive_path.file_name().is_none() {
            return Err(Error::InvalidConfig {
                message: format!("archive_path {} has no file name", self.archive_path.display()),
            });
        }
        if self.worker_thread_name.contains('\0') {
            return Err(Error::InvalidConfig {
                message: "worker_thread_name must not contain NUL bytes".to_string(),
            });
        }
        if self.drain_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig {
                message: "drain_timeout must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    /// Set the drain timeout
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Flush the archive to disk after every task
    pub fn with_sync_each_task(mut self, sync: bool) -> Self {
        self.sync_each_task = sync;
        self
    }
}

/// Optional duration serialized as milliseconds
mod optional_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
