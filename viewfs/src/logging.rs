//! Log setup for the daemon.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use env_logger::{Env, Target};

/// Route `log` output to `log_file`, truncating it. `-` keeps stderr.
/// The level comes from `RUST_LOG`, defaulting to `info`.
pub fn init(log_file: &Path) -> io::Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if log_file != Path::new("-") {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_file)?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.try_init().map_err(io::Error::other)
}
