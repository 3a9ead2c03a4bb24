//! argdap - abstract debugging DAP server.
//!
//! Answers Debug Adapter Protocol requests from the abstract reachability
//! graph of a static analyzer instead of a live process. The analyzer is
//! reached over a Unix socket; IDE clients connect over TCP.

mod cli;

use std::fs::OpenOptions;
use std::net::TcpListener;

use anyhow::Context;
use clap::Parser;

use argdap::dap::io;
use argdap::dap::session::DebugSession;
use cli::Args;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let listener = TcpListener::bind(args.listen)
        .with_context(|| format!("listen on {}", args.listen))?;
    log::info!(target: "dap", "waiting for DAP clients on {}", args.listen);

    // A debug client owns the adapter for the lifetime of its connection;
    // further clients queue up behind it.
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!(target: "dap", "dropped incoming connection: {err:#}");
                continue;
            }
        };
        match stream.peer_addr() {
            Ok(peer) => log::info!(target: "dap", "session opened by {peer}"),
            Err(_) => log::info!(target: "dap", "session opened"),
        }

        let session = match io::split(stream) {
            Ok((reader, out)) => DebugSession::new(reader, out, args.oracle.clone()),
            Err(err) => {
                log::warn!(target: "dap", "connection setup failed: {err:#}");
                continue;
            }
        };
        match session.run() {
            Ok(()) => log::info!(target: "dap", "session closed"),
            Err(err) => log::warn!(target: "dap", "session aborted: {err:#}"),
        }

        if args.oneshot {
            break;
        }
    }
    Ok(())
}

/// `RUST_LOG` stays authoritative; the flags only route the output and opt
/// into wire tracing.
fn init_logging(args: &Args) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if args.trace_dap {
        builder.filter(Some("dap"), log::LevelFilter::Trace);
    }
    if let Some(path) = &args.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}
