//! Instance configuration from the user config file and environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "adminadmin";
pub const DEFAULT_CHECK_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 8;
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 15;
pub const DEFAULT_FOLDER_RETRY_DELAY_SECONDS: u64 = 45;
pub const DEFAULT_CONNECTION_TIMEOUT_SECONDS: u64 = 30;

/// Shortest allowed poll interval.
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Path to the user config file: `$HOME/.config/qbit-cleaner.toml`
///
/// Returns `None` if the home directory cannot be determined.
pub static CONFIG_PATH: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
    let home_dir = dirs::home_dir()?;
    Some(home_dir.join(".config").join(format!("{PROJECT_NAME}.toml")))
});

/// Settings for one monitored qBittorrent instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Friendly name used in log output.
    pub name: String,
    /// Base URL of the `WebUI`, for example `http://localhost:8080`.
    pub url: String,
    pub username: String,
    pub password: String,
    /// Time to sleep between polls.
    pub check_interval: Duration,
    /// Maximum number of attempts for a single rename.
    pub max_retries: u32,
    /// Delay between file rename attempts.
    pub retry_delay: Duration,
    /// Delay between folder rename attempts.
    pub folder_retry_delay: Duration,
    /// Request timeout for API calls.
    pub connection_timeout: Duration,
    /// Only log planned renames.
    pub dryrun: bool,
}

/// Instance section from the user config file.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct InstanceEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Poll interval in seconds.
    #[serde(default)]
    pub check_interval: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Seconds between file rename attempts.
    #[serde(default)]
    pub retry_delay: Option<u64>,
    /// Seconds between folder rename attempts.
    #[serde(default)]
    pub folder_retry_delay: Option<u64>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub connection_timeout: Option<u64>,
}

/// Config from the user config file.
#[derive(Debug, Default, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub dryrun: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default, rename = "instance")]
    pub instances: Vec<InstanceEntry>,
}

/// Wrapper needed for parsing the config file section.
#[derive(Debug, Default, Deserialize)]
struct UserConfig {
    #[serde(default)]
    monitor: MonitorConfig,
}

impl InstanceConfig {
    /// Create an instance config with default credentials and timings.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: normalize_url(&url.into()),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECONDS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECONDS),
            folder_retry_delay: Duration::from_secs(DEFAULT_FOLDER_RETRY_DELAY_SECONDS),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECONDS),
            dryrun: false,
        }
    }
}

impl InstanceEntry {
    /// Convert to the final instance config.
    /// Instances without a name are called `qbit-<index>`.
    ///
    /// # Errors
    /// Returns an error if the URL is empty.
    pub fn into_instance(self, index: usize) -> Result<InstanceConfig> {
        if self.url.trim().is_empty() {
            anyhow::bail!("Instance {index} has an empty url");
        }
        let defaults = InstanceConfig::new(
            self.name.unwrap_or_else(|| format!("qbit-{index}")),
            self.url,
        );
        Ok(InstanceConfig {
            username: self.username.unwrap_or_else(|| defaults.username.clone()),
            password: self.password.unwrap_or_else(|| defaults.password.clone()),
            check_interval: self
                .check_interval
                .map_or(defaults.check_interval, Duration::from_secs)
                .max(MIN_CHECK_INTERVAL),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries).max(1),
            retry_delay: self.retry_delay.map_or(defaults.retry_delay, Duration::from_secs),
            folder_retry_delay: self
                .folder_retry_delay
                .map_or(defaults.folder_retry_delay, Duration::from_secs),
            connection_timeout: self
                .connection_timeout
                .map_or(defaults.connection_timeout, Duration::from_secs),
            ..defaults
        })
    }
}

impl MonitorConfig {
    /// Try to read user config from the file if it exists.
    /// Otherwise, fall back to default config.
    ///
    /// # Errors
    /// Returns an error if config file exists but cannot be read or parsed.
    pub fn get_user_config() -> Result<Self> {
        let Some(path) = CONFIG_PATH.as_deref() else {
            return Ok(Self::default());
        };
        Self::from_path(path)
    }

    /// Read config from the given file. A missing file gives the default config.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => {
                Err(error).with_context(|| format!("Failed to read config file {}", path.display()))
            }
        }
    }

    /// Parse config from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the TOML string is invalid.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str::<UserConfig>(toml_str)
            .map(|config| config.monitor)
            .context("Failed to parse config TOML")
    }

    /// Convert the configured instance sections to instance configs.
    ///
    /// # Errors
    /// Returns an error if any instance is invalid.
    pub fn instance_configs(&self) -> Result<Vec<InstanceConfig>> {
        self.instances
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, entry)| entry.into_instance(index))
            .collect()
    }
}

/// Read instances from `QBITTORRENT_<N>_*` environment variables.
///
/// Indices are read from zero until the first missing `QBITTORRENT_<N>_URL`.
/// The lookup function receives the full variable name, for example `QBITTORRENT_0_URL`.
///
/// # Errors
/// Returns an error if a numeric variable cannot be parsed.
pub fn instances_from_env<F>(lookup: F) -> Result<Vec<InstanceConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut instances = Vec::new();
    for index in 0.. {
        let var = |property: &str| lookup(&format!("QBITTORRENT_{index}_{property}"));
        let Some(url) = var("URL") else {
            break;
        };

        let entry = InstanceEntry {
            name: var("NAME"),
            url,
            username: var("USERNAME"),
            password: var("PASSWORD"),
            check_interval: parse_env_number(index, "CHECK_INTERVAL", var("CHECK_INTERVAL"))?,
            max_retries: parse_env_number(index, "MAX_RETRIES", var("MAX_RETRIES"))?,
            retry_delay: parse_env_number(index, "RETRY_DELAY", var("RETRY_DELAY"))?,
            folder_retry_delay: parse_env_number(index, "FOLDER_RETRY_DELAY", var("FOLDER_RETRY_DELAY"))?,
            connection_timeout: parse_env_number(index, "CONNECTION_TIMEOUT", var("CONNECTION_TIMEOUT"))?,
        };
        instances.push(entry.into_instance(index)?);
    }
    Ok(instances)
}

fn parse_env_number<T>(index: usize, property: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for QBITTORRENT_{index}_{property}: '{value}'"))
        })
        .transpose()
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}


#[cfg(test)]
mod from_toml_str_tests {
    use super::*;

    #[test]
    fn parses_instances() {
        let toml = r#"
            [monitor]
            verbose = true
            log_file = "/tmp/qbit.log"

            [[monitor.instance]]
            name = "seedbox"
            url = "https://seedbox.example:8443"
            username = "user"
            password = "secret"
            check_interval = 60
            max_retries = 3

            [[monitor.instance]]
            url = "http://localhost:8080"
        "#;
        let config = MonitorConfig::from_toml_str(toml).unwrap();
        assert!(config.verbose);
        assert!(!config.dryrun);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/qbit.log")));

        let instances = config.instance_configs().unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].name, "seedbox");
        assert_eq!(instances[0].check_interval, Duration::from_secs(60));
        assert_eq!(instances[0].max_retries, 3);
        assert_eq!(instances[1].name, "qbit-1");
    }

    #[test]
    fn empty_string_gives_defaults() {
        let config = MonitorConfig::from_toml_str("").unwrap();
        assert!(config.instances.is_empty());
        assert!(config.log_file.is_none());
    }

    #[test]
    fn missing_url_is_an_error() {
        let toml = r#"
            [[monitor.instance]]
            name = "broken"
        "#;
        assert!(MonitorConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn other_sections_are_ignored() {
        let toml = r#"
            [qtorrent]
            host = "localhost"

            [monitor]
            dryrun = true
        "#;
        let config = MonitorConfig::from_toml_str(toml).unwrap();
        assert!(config.dryrun);
    }
}

#[cfg(test)]
mod instances_from_env_tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_consecutive_instances() {
        let vars = lookup(&[
            ("QBITTORRENT_0_URL", "http://one:8080"),
            ("QBITTORRENT_0_NAME", "one"),
            ("QBITTORRENT_0_RETRY_DELAY", "5"),
            ("QBITTORRENT_1_URL", "http://two:8080"),
            ("QBITTORRENT_1_PASSWORD", "hunter2"),
            // Gap at index 2 stops the scan
            ("QBITTORRENT_3_URL", "http://four:8080"),
        ]);
        let instances = instances_from_env(vars).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].name, "one");
        assert_eq!(instances[0].retry_delay, Duration::from_secs(5));
        assert_eq!(instances[1].name, "qbit-1");
        assert_eq!(instances[1].password, "hunter2");
        assert_eq!(instances[1].username, DEFAULT_USERNAME);
    }

    #[test]
    fn no_variables_gives_no_instances() {
        assert!(instances_from_env(lookup(&[])).unwrap().is_empty());
    }

    #[test]
    fn invalid_number_is_an_error() {
        let vars = lookup(&[
            ("QBITTORRENT_0_URL", "http://one:8080"),
            ("QBITTORRENT_0_MAX_RETRIES", "many"),
        ]);
        let error = instances_from_env(vars).unwrap_err();
        assert!(error.to_string().contains("QBITTORRENT_0_MAX_RETRIES"));
    }
}
