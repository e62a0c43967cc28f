//! `kestreld` - the kestrel server binary: CLI parsing, TOML config loading,
//! logging, per-worker listener sockets, and the worker thread pool itself.
//! The `kestrel` library crate never touches argv, a config file, a socket,
//! or a signal handler (see `kestrel::lib` module docs) - all of that is
//! drawn together here, the same shape as `hdds-router/src/main.rs` draws
//! together `clap` parsing, config loading, and run-loop startup for its
//! binary.

mod config_file;
mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use kestrel::config::Config;
use kestrel::Services;

/// kestrel - a sharded, multi-core in-memory key-value store
#[derive(Parser, Debug)]
#[command(name = "kestreld")]
#[command(about = "kestrel server - a Redis wire-compatible in-memory key-value store")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind to, overrides the config file
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// Number of worker threads, overrides the config file
    #[arg(long)]
    workers: Option<usize>,

    /// Require this password for AUTH, overrides the config file
    #[arg(long)]
    password: Option<String>,

    /// Log level passed through to `env_logger` (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", &args.log_level);
    }
    env_logger::init();

    let config = Arc::new(build_config(&args)?);
    config.validate()?;

    log::info!(
        "kestrel {} starting: bind_addr={} workers={} databases={}",
        kestrel::VERSION,
        config.bind_addr,
        config.workers,
        config.databases
    );

    let services = Arc::new(Services::new(Arc::clone(&config)));
    let shutdown = Arc::new(AtomicBool::new(false));

    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            log::info!("received shutdown signal");
            shutdown.store(true, Ordering::Relaxed);
        })?;
    }

    // One listener per worker, all bound to the same address with
    // SO_REUSEPORT: the kernel load-balances accepts across them instead of
    // funneling every connection through a single shared fd.
    let mut handles = Vec::with_capacity(config.workers);
    for worker_index in 0..config.workers as u16 {
        let listener_fd = kestrel::net::bind_reuseport(config.bind_addr, 1024)?;
        let services = Arc::clone(&services);
        let shutdown = Arc::clone(&shutdown);
        handles.push(std::thread::spawn(move || {
            if let Err(e) = worker::run(worker_index, services, listener_fd, shutdown) {
                log::error!("[worker {worker_index}] exited with error: {e}");
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    log::info!("kestrel shut down");
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => config_file::FileConfig::load(path)?.apply(Config::default())?,
        None => Config::default(),
    };

    if let Some(addr) = args.bind_addr {
        config.bind_addr = addr;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(password) = &args.password {
        config.auth = kestrel::config::AuthMode::Password(password.clone());
    }

    Ok(config)
}
