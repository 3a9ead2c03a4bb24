//! Command line of the adapter binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// TCP address the adapter accepts IDE connections on.
    #[clap(long, default_value = "127.0.0.1:4711")]
    pub listen: SocketAddr,

    /// Unix socket where the analyzer answers ARG queries.
    #[clap(short, long, value_name = "SOCKET")]
    pub oracle: PathBuf,

    /// Serve a single debug session, then exit.
    #[clap(long)]
    pub oneshot: bool,

    /// Redirect adapter logs into this file instead of stderr.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Also log the raw DAP traffic (very verbose).
    #[clap(long)]
    pub trace_dap: bool,
}
