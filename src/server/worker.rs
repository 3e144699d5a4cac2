//! Accept workers.
//!
//! Every worker is one OS thread running its own single-threaded runtime
//! and local task set. Each binds its own listening socket on the shared
//! address with `SO_REUSEPORT`, so the kernel spreads incoming
//! connections across workers and nothing is ever shared between them:
//! the session pool and the name cache are worker-private. The calling
//! thread doubles as worker 0 and owns the shutdown signal.

use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::proxy::pool::SessionPool;
use crate::proxy::resolver::Resolver;
use crate::proxy::session::Session;

const LISTEN_BACKLOG: u32 = 1024;

/// Spawns the accept workers and runs worker 0 on the calling thread
/// until a shutdown signal arrives.
pub fn run(cfg: Config) -> anyhow::Result<()> {
    for index in 1..cfg.accept_threads {
        let cfg = cfg.clone();
        thread::Builder::new()
            .name(format!("accept-{index}"))
            .spawn(move || {
                if let Err(e) = run_worker(&cfg, index, false) {
                    tracing::error!(worker = index, error = %e, "accept worker failed");
                }
            })?;
    }
    run_worker(&cfg, 0, true)
}

fn run_worker(cfg: &Config, index: usize, handle_signals: bool) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(cfg.worker_threads)
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async {
        let listener = bind_listener(cfg.port)?;
        info!(worker = index, port = cfg.port, "listening");
        let pool = SessionPool::new(cfg.accept_capacity);
        let resolver = Rc::new(Resolver::new(
            cfg.name_cache,
            Duration::from_secs(cfg.cache_lifetime),
        ));
        if handle_signals {
            tokio::select! {
                res = serve(listener, pool, resolver) => res,
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    Ok(())
                }
            }
        } else {
            serve(listener, pool, resolver).await
        }
    })
}

/// Accepts connections and hands each one to a session task, rejecting
/// the connection outright when the pool has no free slot.
pub async fn serve(
    listener: TcpListener,
    pool: Rc<SessionPool>,
    resolver: Rc<Resolver>,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let permit = match pool.acquire() {
            Ok(permit) => permit,
            Err(e) => {
                // dropping the stream closes the freshly accepted socket
                warn!(%peer, error = %e, "rejecting connection");
                continue;
            }
        };
        debug!(%peer, free_slots = pool.free_slots(), "accepted connection");
        match Session::new(stream, Rc::clone(&resolver), permit) {
            Ok(session) => {
                tokio::task::spawn_local(session.run());
            }
            Err(e) => debug!(%peer, error = %e, "session setup failed"),
        }
    }
}

/// Binds this worker's own listening socket on the shared port.
pub fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from(([0, 0, 0, 0], port)))?;
    socket.listen(LISTEN_BACKLOG)
}
