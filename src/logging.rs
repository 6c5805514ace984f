use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup logging to stderr and optionally to a log file.
///
/// `RUST_LOG` overrides the default level,
/// which is `info`, or `debug` when `verbose` is set.
///
/// # Returns
/// A guard for the file writer that must be held for the duration of the program,
/// or `None` when only logging to stderr.
///
/// # Errors
/// Returns an error if the log directory cannot be created or logging was already initialized.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (directory, file_name) = split_log_path(path)?;
            fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;

            let (non_blocking, guard) = tracing_appender::non_blocking(rolling::never(directory, file_name));
            let layer = fmt::layer()
                .with_writer(non_blocking)
                // No ANSI codes in log files
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    if let Some(path) = log_file {
        tracing::debug!("Logging to {}", path.display());
    }

    Ok(guard)
}

const fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Split the log file path into the directory and file name.
/// A bare file name is placed in the current directory.
fn split_log_path(path: &Path) -> Result<(&Path, &OsStr)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((directory, file_name))
}

#[cfg(test)]
mod logging_tests {
    use super::*;

    #[test]
    fn verbose_enables_debug() {
        assert_eq!(default_level(true), "debug");
        assert_eq!(default_level(false), "info");
    }

    #[test]
    fn splits_directory_and_file_name() {
        let (directory, file_name) = split_log_path(Path::new("/var/log/qbit-cleaner.log")).unwrap();
        assert_eq!(directory, Path::new("/var/log"));
        assert_eq!(file_name, "qbit-cleaner.log");
    }

    #[test]
    fn bare_file_name_uses_current_directory() {
        let (directory, file_name) = split_log_path(Path::new("monitor.log")).unwrap();
        assert_eq!(directory, Path::new("."));
        assert_eq!(file_name, "monitor.log");
    }

    #[test]
    fn root_has_no_file_name() {
        assert!(split_log_path(Path::new("/")).is_err());
    }
}
