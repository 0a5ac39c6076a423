//! Command line and environment configuration.

use std::path::PathBuf;

use clap::Parser;

use crate::capture::ScriptRunner;
use crate::marker::{DEFAULT_MARKER_NAME, DEFAULT_MARKER_VALUE, Marker};

pub const DEFAULT_ROOTDIR: &str = "/";
pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_LOG_FILE: &str = "/tmp/viewfs.log";

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    author,
    version,
    about = "Mirror a directory, serving marked files as the output of running them"
)]
pub struct Config {
    /// Path to mount point
    pub mountpoint: PathBuf,
    /// Directory exposed at the mount root
    #[arg(long, env = "VIEWFS_ROOTDIR", default_value = DEFAULT_ROOTDIR)]
    pub rootdir: PathBuf,
    /// Extended attribute that marks a file as virtual
    #[arg(long, env = "VIEWFS_MARKER_NAME", default_value = DEFAULT_MARKER_NAME)]
    pub marker_name: String,
    /// Attribute value that enables the marker
    #[arg(long, env = "VIEWFS_MARKER_VALUE", default_value = DEFAULT_MARKER_VALUE)]
    pub marker_value: String,
    /// Interpreter used to run marked files
    #[arg(long, env = "VIEWFS_SHELL", default_value = DEFAULT_SHELL)]
    pub shell: PathBuf,
    /// Log destination, `-` for stderr
    #[arg(long, env = "VIEWFS_LOG_FILE", default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
    /// Mount directly instead of going through fusermount3
    #[arg(long, default_value_t = false)]
    pub privileged: bool,
    /// Let other users access the mount
    #[arg(long, default_value_t = false)]
    pub allow_other: bool,
}

impl Config {
    /// All defaults, mounted at `mountpoint`.
    pub fn default_for(mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            rootdir: DEFAULT_ROOTDIR.into(),
            marker_name: DEFAULT_MARKER_NAME.to_string(),
            marker_value: DEFAULT_MARKER_VALUE.to_string(),
            shell: DEFAULT_SHELL.into(),
            log_file: DEFAULT_LOG_FILE.into(),
            privileged: false,
            allow_other: false,
        }
    }

    pub fn marker(&self) -> Marker {
        Marker::new(self.marker_name.clone(), self.marker_value.as_bytes())
    }

    pub fn runner(&self) -> ScriptRunner {
        ScriptRunner::new(&self.shell)
    }
}
