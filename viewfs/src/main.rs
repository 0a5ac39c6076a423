use clap::Parser;
use log::{error, info};
use tokio::signal;
use viewfs::config::Config;
use viewfs::fuse::ViewFs;
use viewfs::fuse::mount::mount;
use viewfs::logging;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = logging::init(&config.log_file) {
        eprintln!("cannot open log file {}: {e}", config.log_file.display());
        std::process::exit(1);
    }

    let fs = match ViewFs::from_config(&config) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("invalid root directory {}: {e}", config.rootdir.display());
            std::process::exit(1);
        }
    };

    let mut mount_handle = match mount(fs, &config).await {
        Ok(h) => h,
        Err(e) => {
            error!("mount failed: {e}");
            eprintln!(
                "mount failed: {e}\n\nHint: ensure you are on Linux with FUSE (fusermount3) available."
            );
            std::process::exit(1);
        }
    };
    info!(
        "mounted {} at {}",
        config.rootdir.display(),
        config.mountpoint.display()
    );

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => {
            if let Err(e) = res {
                error!("session ended with error: {e}");
            }
        }
        _ = signal::ctrl_c() => {
            info!("unmounting {}", config.mountpoint.display());
            if let Err(e) = mount_handle.unmount().await {
                error!("unmount error: {e}");
            }
        }
    }
}
