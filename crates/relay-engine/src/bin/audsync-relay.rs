//! AudSync relay binary.
//!
//! Binds the relay and exposes a small status shell on stdin.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

use audsync_relay_engine::{RelayConfig, RelayServer};

#[derive(Parser, Debug)]
#[command(name = "audsync-relay", about = "AudSync voice streaming relay")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = audsync_wire_core::DEFAULT_PORT)]
    port: u16,

    /// Per-client outbound queue depth, in frames.
    #[arg(long, default_value_t = 64)]
    outbound_queue: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = RelayConfig {
        bind_addr: args.bind,
        port: args.port,
        outbound_queue: args.outbound_queue,
    };

    let server = RelayServer::bind(config).await.context("startup failed")?;

    println!(
        "audsync relay listening on {}; type 'status' or 'quit'",
        server.local_addr()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("stdin error: {e}");
                break;
            }
        };
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("status") => {
                let stats = server.stats();
                println!(
                    "clients={} received={} forwarded={} echoed={} errored={}",
                    server.connected_clients(),
                    stats.messages_received,
                    stats.frames_forwarded,
                    stats.heartbeats_echoed,
                    stats.clients_errored,
                );
                for client in server.snapshot() {
                    let config = client
                        .config
                        .map(|c| {
                            format!(
                                "{} Hz / {} ch / {} frames",
                                c.sample_rate, c.channels, c.frames_per_buffer
                            )
                        })
                        .unwrap_or_else(|| "unconfigured".to_string());
                    println!(
                        "  {} {} [{}] {} (dropped {})",
                        client.id, client.addr, client.phase, config, client.dropped_outbound,
                    );
                }
            }
            Some("logon") => {
                let path = parts
                    .next()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("audsync-relay.log"));
                match server.session_log().enable(&path) {
                    Ok(()) => println!("logging to {}", path.display()),
                    Err(e) => println!("logging failed: {e}"),
                }
            }
            Some("logoff") => {
                server.session_log().disable();
                println!("logging off");
            }
            Some("recstart") | Some("recstop") => {
                // The relay never assumes an audio format, so it cannot
                // record a meaningful file; recording lives on endpoints.
                println!("recording is endpoint-side; use recstart on a client");
            }
            Some("quit") | Some("exit") => break,
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
    }

    server.shutdown().await;
    Ok(())
}
