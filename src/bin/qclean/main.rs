//! qclean - Remove advertising domains from torrent names in qBittorrent.
//!
//! Monitors one or more qBittorrent instances through the `WebUI` API and renames
//! torrents, folders and files that contain embedded site addresses.

mod config;
mod monitor;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

use qbit_cleaner::print_error;

use crate::monitor::Monitor;

/// Remove advertising domains from torrent, folder and file names in qBittorrent.
///
/// Instances are read from the user config file, `QBITTORRENT_<N>_URL` environment variables,
/// and the `--url` option.
/// Each instance is polled in its own task until interrupted with Ctrl+C.
#[derive(Parser)]
#[command(
    author,
    version,
    name = env!("CARGO_BIN_NAME"),
    about = "Remove advertising domains from torrent names in qBittorrent"
)]
pub struct QcleanArgs {
    /// qBittorrent `WebUI` URL for an additional instance
    #[arg(short = 'u', long, name = "URL")]
    url: Option<String>,

    /// Name for the `--url` instance
    #[arg(short = 'n', long, name = "NAME", requires = "URL")]
    name: Option<String>,

    /// qBittorrent `WebUI` username for the `--url` instance
    #[arg(short = 'U', long, name = "USER", requires = "URL")]
    username: Option<String>,

    /// qBittorrent `WebUI` password for the `--url` instance
    #[arg(short = 'w', long, name = "PASS", requires = "URL")]
    password: Option<String>,

    /// Only print changes without renaming anything
    #[arg(short = 'p', long)]
    dryrun: bool,

    /// Run a single pass over all torrents and exit
    #[arg(short = 'o', long)]
    once: bool,

    /// Also write log output to this file
    #[arg(short = 'f', long, name = "FILE", value_hint = clap::ValueHint::FilePath)]
    log_file: Option<PathBuf>,

    /// Generate shell completion
    #[arg(short = 'l', long, name = "SHELL")]
    completion: Option<Shell>,

    /// Print verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = QcleanArgs::parse();

    // Handle shell completion generation
    if let Some(ref shell) = args.completion {
        qbit_cleaner::generate_shell_completion(*shell, QcleanArgs::command(), true, env!("CARGO_BIN_NAME"))
    } else {
        match Monitor::new(args) {
            Ok(monitor) => monitor.run().await,
            Err(error) => {
                print_error!("{error:#}");
                std::process::exit(1);
            }
        }
    }
}
