//! Process bootstrap: reads configuration, loads the statement registry,
//! constructs the worker pool and dispatcher, and starts them.
//!
//! Mirrors the original `main.cpp`'s sequence (read config, validate
//! backend db, init statements, start the pool) but returns `anyhow::Result`
//! instead of calling `exit()` directly, leaving that to `main`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::Context as _;
use mysql::{Conn, Opts, OptsBuilder};

use crate::config::{AppConfig, RawConfig};
use crate::dispatcher::Dispatcher;
use crate::driver::WorkerConnection;
use crate::registry;
use crate::sequencer::Sequencer;
use crate::worker::Worker;

const CONFIG_RELATIVE_PATH: &str = "etc/mysqlcp.conf";
const STMTS_SUBDIR: &str = "etc";

fn backend_opts(cfg: &AppConfig) -> Opts {
    let timeout = Some(cfg.mysql_conn_timeout);
    OptsBuilder::new()
        .ip_or_hostname(Some(cfg.backend_host.clone()))
        .tcp_port(cfg.backend_port)
        .user(Some(cfg.backend_user.clone()))
        .pass(Some(cfg.backend_password.clone()))
        .db_name(Some(cfg.backend_db.clone()))
        .read_timeout(timeout)
        .write_timeout(timeout)
        .tcp_connect_timeout(timeout)
        .into()
}

/// Run the gateway: load configuration and the statement registry, then
/// start the worker pool and dispatcher. Blocks forever servicing clients.
///
/// # Errors
/// Returns an error if configuration cannot be read or is invalid, the
/// initial database connection or statement registry load fails, or the
/// ZeroMQ sockets cannot be created/bound.
pub fn run(working_dir: &Path) -> anyhow::Result<()> {
    let config_path = working_dir.join(CONFIG_RELATIVE_PATH);
    let text = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config file: {}", config_path.display()))?;
    let raw = RawConfig::parse(&text);
    let cfg = AppConfig::from_raw(&raw).context("invalid configuration")?;

    tracing::info!(listen = %cfg.listen_address, "listening at");
    tracing::info!(
        host = %cfg.backend_host,
        port = cfg.backend_port,
        user = %cfg.backend_user,
        db = %cfg.backend_db,
        "connecting to backend db"
    );
    tracing::info!(sql_file = %cfg.sql_file, "reading statements from file");
    tracing::info!(timeout = ?cfg.mysql_conn_timeout, "setting mysql connection timeout");
    tracing::info!(capacity = cfg.conn_pool_capacity, "setting connection pool capacity");
    tracing::info!(timeout = ?cfg.txn_idle_timeout, "setting transaction idle timeout");

    let opts = backend_opts(&cfg);
    let mut probe_conn = Conn::new(opts.clone()).context("failed to connect to backend db for statement probing")?;

    let stmts_dir: PathBuf = working_dir.join(STMTS_SUBDIR);
    let stmts = registry::load(&stmts_dir, &cfg.sql_file, &mut probe_conn, &opts, |name| raw.find_db(name))
        .context("failed to load statement registry")?;
    drop(probe_conn);

    let registry = Arc::new(stmts);
    let sequencer = Arc::new(Sequencer::new());

    let ctx = zmq::Context::new();
    let dispatcher = Dispatcher::bind(&ctx, &cfg.listen_address).context("failed to bind dispatcher sockets")?;

    let mut handles = Vec::with_capacity(cfg.conn_pool_capacity);
    for id in 0..cfg.conn_pool_capacity {
        let worker_ctx = ctx.clone();
        let worker_registry = Arc::clone(&registry);
        let worker_sequencer = Arc::clone(&sequencer);
        let idle_timeout = cfg.txn_idle_timeout;
        let opts = opts.clone();
        handles.push(thread::spawn(move || {
            let conn = WorkerConnection::new(opts);
            let worker = Worker::new(id, conn, worker_registry, worker_sequencer, idle_timeout);
            if let Err(e) = worker.run(&worker_ctx) {
                tracing::error!(worker = id, error = %e, "worker exited");
            }
        }));
    }

    tracing::info!(workers = handles.len(), "worker pool started");

    dispatcher.run().context("dispatcher exited")?;

    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}
