use clap::Parser;

/// Command-line surface of the proxy.
#[derive(Parser, Debug)]
#[command(name = "conduit", version, about = "Forward HTTP/1.1 proxy")]
pub struct Options {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Accept worker count; defaults to the hardware thread count.
    #[arg(long)]
    pub accept_threads: Option<usize>,

    /// Blocking-thread budget per worker; defaults to the accept worker
    /// count.
    #[arg(long)]
    pub worker_threads: Option<usize>,

    /// Session pool capacity per accept worker.
    #[arg(long, default_value_t = 1024)]
    pub accept_capacity: usize,

    /// Per-worker name cache capacity; 0 disables caching.
    #[arg(long, default_value_t = 1024)]
    pub name_cache: usize,

    /// Seconds a cached name stays valid.
    #[arg(long, default_value_t = 300)]
    pub cache_lifetime: u64,

    /// Detach from the controlling terminal.
    #[arg(long)]
    pub daemonize: bool,

    /// Enable debug logging.
    #[arg(long, short)]
    pub verbose: bool,
}

/// Runtime configuration with all defaults resolved.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub accept_threads: usize,
    pub worker_threads: usize,
    pub accept_capacity: usize,
    pub name_cache: usize,
    pub cache_lifetime: u64,
    pub daemonize: bool,
    pub verbose: bool,
}

impl Options {
    pub fn resolve(self) -> Config {
        let hardware = thread_count();
        // without socket address sharing a single worker must do all the
        // accepting
        let accept_threads = if cfg!(unix) {
            self.accept_threads.unwrap_or(hardware).max(1)
        } else {
            if self.accept_threads.is_some_and(|n| n > 1) {
                tracing::warn!("SO_REUSEPORT is unavailable; forcing one accept worker");
            }
            1
        };
        let worker_threads = self.worker_threads.unwrap_or(accept_threads).max(1);
        Config {
            port: self.port,
            accept_threads,
            worker_threads,
            accept_capacity: self.accept_capacity.max(1),
            name_cache: self.name_cache,
            cache_lifetime: self.cache_lifetime,
            daemonize: self.daemonize,
            verbose: self.verbose,
        }
    }
}

fn thread_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
