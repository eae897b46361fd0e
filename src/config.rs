use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::radio::SPP_UUID;

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_READ_BUFFER: usize = 1024;
const DEFAULT_UUID_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LINE_DELIMITERS: [u8; 2] = [b'\r', b'\n'];

/// Tunables for a [`crate::BluetoothSession`].
///
/// Every field has a default, so a configuration file only needs the keys it
/// changes:
///
/// ```json
/// { "uuid_timeout_ms": 5000, "line_delimiters": [10] }
/// ```
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Read buffer size of a duplex connection.
    #[builder(default = DEFAULT_READ_BUFFER)]
    read_buffer: usize,
    #[serde(rename = "uuid_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_UUID_TIMEOUT)]
    uuid_timeout: Duration,
    #[serde(rename = "connect_timeout_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    connect_timeout: Option<Duration>,
    #[serde(rename = "accept_timeout_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    accept_timeout: Option<Duration>,
    /// Bytes that end a line on a line stream.
    #[builder(default = DEFAULT_LINE_DELIMITERS.to_vec())]
    line_delimiters: Vec<u8>,
    #[builder(default = SPP_UUID)]
    default_service_id: Uuid,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    /// Loads the configuration file.
    ///
    /// With no explicit path, the per-user file is read if it exists and the
    /// defaults are used otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, unreadable, or not
    /// valid JSON.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::load_from_path(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    #[must_use]
    pub fn with_uuid_timeout(mut self, timeout: Duration) -> Self {
        self.uuid_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn read_buffer(&self) -> usize {
        self.read_buffer.max(1)
    }

    #[must_use]
    pub fn uuid_timeout(&self) -> Duration {
        self.uuid_timeout
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    #[must_use]
    pub fn accept_timeout(&self) -> Option<Duration> {
        self.accept_timeout
    }

    /// Returns the line delimiters, falling back to CR and LF when none are set.
    #[must_use]
    pub fn line_delimiters(&self) -> &[u8] {
        if self.line_delimiters.is_empty() {
            &DEFAULT_LINE_DELIMITERS
        } else {
            &self.line_delimiters
        }
    }

    #[must_use]
    pub fn default_service_id(&self) -> Uuid {
        self.default_service_id
    }
}

fn default_config_path() -> PathBuf {
    let Some(project_dirs) = ProjectDirs::from("dev", "btsession", "btsession") else {
        return std::env::temp_dir().join("btsession").join(CONFIG_FILE_NAME);
    };
    project_dirs.config_dir().join(CONFIG_FILE_NAME)
}
