//! `mysqlcp` binary entry point: parses the optional working-directory
//! argument, initializes logging, and hands off to [`mysqlcp::bootstrap`].

use std::path::{Path, PathBuf};

use clap::Parser;

/// A network-facing MySQL connection pool and SQL gateway.
#[derive(Debug, Parser)]
#[command(name = "mysqlcp", about)]
struct Cli {
    /// Working directory; configuration is read from `<dir>/etc/mysqlcp.conf`.
    /// Defaults to the parent of the binary's own directory.
    working_dir: Option<PathBuf>,
}

fn default_working_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn main() -> anyhow::Result<()> {
    mysqlcp::logging::init();

    let cli = Cli::parse();
    let working_dir = cli.working_dir.unwrap_or_else(default_working_dir);

    if let Err(e) = mysqlcp::bootstrap::run(&working_dir) {
        tracing::error!(error = %e, "startup failed");
        return Err(e);
    }

    Ok(())
}
