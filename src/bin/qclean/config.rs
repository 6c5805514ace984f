//! Configuration module for qclean.
//!
//! Combines instances from the user config file, environment variables and CLI arguments.

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use qbit_cleaner::config::{CONFIG_PATH, InstanceConfig, InstanceEntry, MonitorConfig, instances_from_env};

use crate::QcleanArgs;

/// Final config combined from CLI arguments, environment and user config file.
#[derive(Debug)]
pub struct Config {
    /// Instances to monitor, in config file, environment, CLI order.
    pub instances: Vec<InstanceConfig>,
    /// Only log changes.
    pub dryrun: bool,
    /// Run a single pass and exit.
    pub once: bool,
    /// Verbose output.
    pub verbose: bool,
    /// Optional log file.
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Create config from given command line args, user config file and environment.
    ///
    /// # Errors
    /// Returns an error if an instance is invalid or no instances are configured.
    pub fn try_from_args(args: QcleanArgs, user_config: MonitorConfig) -> Result<Self> {
        Self::from_sources(args, user_config, |key| env::var(key).ok())
    }

    fn from_sources<F>(args: QcleanArgs, user_config: MonitorConfig, env_lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dryrun = args.dryrun || user_config.dryrun;
        let verbose = args.verbose || user_config.verbose;
        let log_file = args.log_file.or_else(|| user_config.log_file.clone());

        let mut instances = user_config.instance_configs()?;
        instances.extend(instances_from_env(env_lookup)?);

        if let Some(url) = args.url {
            let entry = InstanceEntry {
                name: args.name,
                url,
                username: args.username,
                password: args.password,
                ..InstanceEntry::default()
            };
            instances.push(entry.into_instance(instances.len())?);
        }

        if instances.is_empty() {
            let config_path = CONFIG_PATH
                .as_deref()
                .map_or_else(|| "the config file".to_string(), |path| path.display().to_string());
            anyhow::bail!(
                "No qBittorrent instances configured.\nAdd [[monitor.instance]] sections to {config_path}, set QBITTORRENT_0_URL, or use --url"
            );
        }

        for instance in &mut instances {
            instance.dryrun |= dryrun;
        }

        Ok(Self {
            instances,
            dryrun,
            once: args.once,
            verbose,
            log_file,
        })
    }
}
