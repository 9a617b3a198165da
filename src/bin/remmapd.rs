//! remmapd: mapping daemon.
//!
//! Serves the handoff protocol on a unix rendezvous socket and, when asked,
//! the remote-object RPC protocol on a TCP address.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::Parser;

use remmap::{run_daemon, PrefillEngine, RpcServer, ServerContext};

#[derive(Parser, Debug)]
#[command(name = "remmapd", about = "remote memory-mapping daemon")]
struct Cli {
    /// Rendezvous socket path clients connect to.
    #[arg(long, default_value = "/tmp/remmap.sock")]
    socket: PathBuf,

    /// TCP listen address for the remote-object RPC service.
    #[arg(long)]
    rpc_listen: Option<String>,

    /// Objects to publish on the RPC service, as id=size pairs.
    #[arg(long)]
    publish: Vec<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(addr) = &cli.rpc_listen {
        let server = Arc::new(RpcServer::new());
        for entry in &cli.publish {
            match parse_publish(entry) {
                Ok((id, size)) => server.publish(&id, size),
                Err(msg) => {
                    eprintln!("remmapd: bad --publish {:?}: {}", entry, msg);
                    std::process::exit(2);
                }
            }
        }
        let listener = match TcpListener::bind(addr) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("remmapd: cannot listen on {}: {}", addr, e);
                std::process::exit(1);
            }
        };
        thread::spawn(move || {
            if let Err(e) = server.serve(listener) {
                log::error!("rpc service stopped: {}", e);
            }
        });
    } else if !cli.publish.is_empty() {
        eprintln!("remmapd: --publish requires --rpc-listen");
        std::process::exit(2);
    }

    let ctx = Arc::new(ServerContext::new(PrefillEngine));
    if let Err(e) = run_daemon(ctx, &cli.socket) {
        eprintln!("remmapd: {}", e);
        std::process::exit(1);
    }
}

fn parse_publish(entry: &str) -> Result<(String, u64), String> {
    let (id, size) = entry
        .split_once('=')
        .ok_or_else(|| "expected id=size".to_string())?;
    if id.is_empty() {
        return Err("empty object id".to_string());
    }
    let size: u64 = size.parse().map_err(|e| format!("bad size: {}", e))?;
    if size == 0 {
        return Err("size must be nonzero".to_string());
    }
    Ok((id.to_string(), size))
}
