use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime settings for the supervisor.
///
/// Every field has a default, so an empty document (`{}`) is a valid
/// configuration.
///
/// # JSON Schema
///
/// ```json
/// {
///   "consoleCapacity": 100,
///   "subscriberCapacity": 100,
///   "envDir": "env",
///   "launchScript": "start.sh",
///   "jarLinkName": "server.jar",
///   "modsLinkName": "mods",
///   "restartTimeoutSecs": 30
/// }
/// ```
///
/// # Examples
///
/// ```
/// use gameserver_runner::config::Config;
///
/// let config = Config::parse_from_str(r#"{ "consoleCapacity": 256 }"#).unwrap();
/// assert_eq!(config.console_capacity, 256);
/// assert_eq!(config.env_dir, "env");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Bound of each process handle's internal console channel.
    /// A full channel stalls the line reader until the broadcaster drains it.
    pub console_capacity: usize,

    /// Bound of each subscriber channel. Lines are dropped for a subscriber
    /// whose channel is full.
    pub subscriber_capacity: usize,

    /// Working directory of the process, relative to the server's root path.
    pub env_dir: String,

    /// Name of the launch script written into the env directory.
    pub launch_script: String,

    /// Name of the symlink pointing at the server jar.
    pub jar_link_name: String,

    /// Name of the symlink pointing at the mod pack.
    pub mods_link_name: String,

    /// How long a restart waits for the old process to exit.
    pub restart_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            console_capacity: 100,
            subscriber_capacity: 100,
            env_dir: "env".to_string(),
            launch_script: "start.sh".to_string(),
            jar_link_name: "server.jar".to_string(),
            mods_link_name: "mods".to_string(),
            restart_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, anything else
    /// as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON/YAML
    /// * The document does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::parse_yaml_str(&content),
            _ => Self::parse_from_str(&content),
        }
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Parses a configuration from a YAML string.
    pub fn parse_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
    }

    /// Restart wait bound as a [`Duration`].
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_secs)
    }
}
