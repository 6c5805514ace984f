//! Advertising domain detection and name cleaning.
//!
//! Torrent, folder and file names often carry the address of the site they were
//! uploaded to, for example `Movie.2024.1080p-examplesite.com.mkv`.
//! This module finds such domains and strips them while keeping file extensions
//! and directory structure intact.

mod clean;
mod domain;

pub use clean::{clean_name, is_file_name};
pub use domain::extract_domain;
