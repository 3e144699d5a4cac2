use clap::Parser;

use conduit::config::Options;
use conduit::server::worker;

fn main() -> anyhow::Result<()> {
    let options = Options::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(if options.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let cfg = options.resolve();

    if cfg.daemonize {
        daemonize(cfg.verbose)?;
    }

    tracing::info!(
        port = cfg.port,
        accept_threads = cfg.accept_threads,
        worker_threads = cfg.worker_threads,
        accept_capacity = cfg.accept_capacity,
        name_cache = cfg.name_cache,
        "starting proxy"
    );

    worker::run(cfg)
}

#[cfg(unix)]
fn daemonize(keep_stdio: bool) -> anyhow::Result<()> {
    let noclose = i32::from(keep_stdio);
    // SAFETY: called before any worker thread exists; daemon(3) forks and
    // detaches the process from its controlling terminal
    let rc = unsafe { libc::daemon(1, noclose) };
    if rc != 0 {
        return Err(anyhow::anyhow!(
            "daemon: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn daemonize(_keep_stdio: bool) -> anyhow::Result<()> {
    anyhow::bail!("--daemonize is not supported on this platform")
}
