//! Runs one monitor task per configured qBittorrent instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::task::JoinSet;

use qbit_cleaner::config::MonitorConfig;
use qbit_cleaner::logging::init_logging;
use qbit_cleaner::print_warning;
use qbit_cleaner::qbittorrent::QBittorrentClient;
use qbit_cleaner::worker::InstanceWorker;

use crate::QcleanArgs;
use crate::config::Config;

/// Main handler for monitoring all instances.
pub struct Monitor {
    config: Config,
}

impl Monitor {
    /// Create the monitor from CLI arguments, the user config file and environment.
    ///
    /// # Errors
    /// Returns an error if the config file is invalid or no instances are configured.
    pub fn new(args: QcleanArgs) -> Result<Self> {
        let user_config = MonitorConfig::get_user_config()?;
        let config = Config::try_from_args(args, user_config)?;
        Ok(Self { config })
    }

    /// Start all instance workers and wait until they have stopped.
    ///
    /// # Errors
    /// Returns an error if logging or the Ctrl+C handler cannot be set up.
    pub async fn run(self) -> Result<()> {
        let _guard = init_logging(self.config.verbose, self.config.log_file.as_deref())?;

        let running = Arc::new(AtomicBool::new(true));
        let running_handler = Arc::clone(&running);
        ctrlc::set_handler(move || {
            if !running_handler.load(Ordering::SeqCst) {
                // Second Ctrl+C - force exit
                std::process::exit(130);
            }
            print_warning!("\nReceived Ctrl+C, stopping monitors...");
            running_handler.store(false, Ordering::SeqCst);
        })
        .context("Failed to set Ctrl+C handler")?;

        let instance_count = self.config.instances.len();
        if self.config.once {
            tracing::info!("Running a single pass for {instance_count} instance(s)");
        } else {
            tracing::info!("Starting monitor for {instance_count} instance(s)");
        }
        if self.config.dryrun {
            tracing::info!("Dry run enabled, nothing will be renamed");
        }

        let mut tasks = JoinSet::new();
        for instance in self.config.instances {
            let client = match QBittorrentClient::new(&instance) {
                Ok(client) => client,
                Err(error) => {
                    tracing::error!("Skipping instance {}: {error:#}", instance.name);
                    continue;
                }
            };
            let mut worker = InstanceWorker::new(instance, client, Arc::clone(&running));
            let once = self.config.once;
            tasks.spawn(async move {
                if once {
                    worker.run_once().await;
                } else {
                    worker.run().await;
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                tracing::error!("Monitor task failed: {error}");
            }
        }

        tracing::info!("All monitors stopped");
        Ok(())
    }
}
