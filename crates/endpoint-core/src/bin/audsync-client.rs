//! AudSync endpoint binary.
//!
//! Connects to a relay, starts the capture/render pipeline, and drives it
//! from an interactive command shell on stdin.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use audsync_endpoint_core::device;
use audsync_endpoint_core::{Endpoint, EndpointConfig, EndpointStats};

#[derive(Parser, Debug)]
#[command(name = "audsync-client", about = "AudSync voice streaming endpoint")]
struct Args {
    /// Relay hostname or address.
    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    /// Relay TCP port.
    #[arg(long, default_value_t = audsync_wire_core::DEFAULT_PORT)]
    port: u16,

    /// Sample rate in Hz.
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,

    /// Channel count (1 = mono, 2 = stereo).
    #[arg(long, default_value_t = 1)]
    channels: u16,

    /// Frames per buffer.
    #[arg(long, default_value_t = 256)]
    frames: u32,

    /// Input device name (default device when omitted).
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name (default device when omitted).
    #[arg(long)]
    output_device: Option<String>,

    /// Target jitter buffer size in milliseconds.
    #[arg(long, default_value_t = 50)]
    jitter_target_ms: u32,

    /// Enable the receive-side post-filter chain.
    #[arg(long)]
    post_filters: bool,

    /// List audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

fn print_devices() {
    println!("input devices:");
    for dev in device::list_input_devices() {
        let marker = if dev.is_default { " (default)" } else { "" };
        println!("  {}{}", dev.name, marker);
    }
    println!("output devices:");
    for dev in device::list_output_devices() {
        let marker = if dev.is_default { " (default)" } else { "" };
        println!("  {}{}", dev.name, marker);
    }
}

fn print_stats(stats: &EndpointStats) {
    println!("capture:  blocks={} samples={} dropped={} errors={}",
        stats.capture.blocks_captured,
        stats.capture.samples_captured,
        stats.capture.blocks_dropped,
        stats.capture.device_errors,
    );
    println!("send:     packets={} bytes={} heartbeats={} connected={}",
        stats.sender.packets_sent,
        stats.sender.bytes_sent,
        stats.sender.heartbeats_sent,
        stats.sender.is_connected,
    );
    let j = &stats.receiver.jitter;
    println!("receive:  packets={} lost={} dropped={} dup={} silence={} mismatched={}",
        j.packets_received,
        j.packets_lost,
        j.packets_dropped,
        j.duplicates,
        j.silence_inserted,
        stats.receiver.format_mismatches,
    );
    println!("jitter:   buffered={} target={}ms avg={:.2}ms ready={}",
        j.buffered_packets, j.target_buffer_ms, j.average_jitter_ms, j.is_ready,
    );
    println!("render:   played={} underruns={} dropped={} queued={} ({} ms) volume={:.2} muted={}",
        stats.render.samples_played,
        stats.render.underruns,
        stats.render.dropped_samples,
        stats.render.queued_samples,
        stats.render.queued_ms,
        stats.render.volume,
        stats.render.muted,
    );
}

fn print_help() {
    println!("commands:");
    println!("  start            start audio streaming");
    println!("  stop             stop audio streaming (stay connected)");
    println!("  volume <x>       set output gain, 0.0..1.0");
    println!("  mute on|off      mute or unmute output");
    println!("  logon [path]     start session logging");
    println!("  logoff           stop session logging");
    println!("  recstart [path]  record capture to a WAV file");
    println!("  recstop          stop recording");
    println!("  stats            print pipeline statistics");
    println!("  disconnect       close the relay connection");
    println!("  quit             shut down and exit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let mut config = EndpointConfig {
        input_device: args.input_device,
        output_device: args.output_device,
        sample_rate: args.sample_rate,
        channels: args.channels,
        frames_per_buffer: args.frames,
        enable_post_filters: args.post_filters,
        ..EndpointConfig::default()
    };
    config.net.server_host = args.server;
    config.net.server_port = args.port;
    config.jitter.target_buffer_ms = args.jitter_target_ms;

    let mut endpoint = Endpoint::new(config).context("invalid configuration")?;

    // Connect and device-open failures at startup are fatal; once the
    // pipeline is up, failures become events and reconnects.
    endpoint.connect().await.context("startup failed")?;
    endpoint.start().context("startup failed")?;

    // Pump pipeline events into tracing and the session log.
    if let Some(mut events) = endpoint.take_events() {
        let session_log = endpoint.session_log();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                info!("{event}");
                session_log.log(&event.to_string());
            }
        });
    }

    println!("audsync client ready; type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break, // stdin closed
            Err(e) => {
                error!("stdin error: {e}");
                break;
            }
        };
        let mut parts = line.split_whitespace();
        let command = match parts.next() {
            Some(c) => c,
            None => continue,
        };

        match command {
            "start" => match endpoint.start() {
                Ok(()) => println!("streaming"),
                Err(e) => println!("start failed: {e}"),
            },
            "stop" => {
                endpoint.stop();
                println!("stopped");
            }
            "volume" => match parts.next().and_then(|v| v.parse::<f32>().ok()) {
                Some(v) => match endpoint.set_volume(v) {
                    Ok(()) => println!("volume {v:.2}"),
                    Err(e) => println!("{e}"),
                },
                None => println!("usage: volume <0.0..1.0>"),
            },
            "mute" => match parts.next() {
                Some("on") => {
                    endpoint.set_muted(true);
                    println!("muted");
                }
                Some("off") => {
                    endpoint.set_muted(false);
                    println!("unmuted");
                }
                _ => println!("usage: mute on|off"),
            },
            "logon" => {
                let path = parts
                    .next()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("audsync-session.log"));
                match endpoint.start_logging(&path) {
                    Ok(()) => println!("logging to {}", path.display()),
                    Err(e) => println!("logging failed: {e}"),
                }
            }
            "logoff" => {
                endpoint.stop_logging();
                println!("logging off");
            }
            "recstart" => {
                let path = parts
                    .next()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("audsync-capture.wav"));
                match endpoint.start_recording(&path) {
                    Ok(()) => println!("recording to {}", path.display()),
                    Err(e) => println!("recording failed: {e}"),
                }
            }
            "recstop" => match endpoint.stop_recording() {
                Ok(()) => println!("recording stopped"),
                Err(e) => println!("recstop failed: {e}"),
            },
            "stats" => print_stats(&endpoint.stats()),
            "disconnect" => {
                endpoint.disconnect().await;
                println!("disconnected");
            }
            "quit" | "exit" => break,
            "help" => print_help(),
            other => println!("unknown command: {other} (try 'help')"),
        }
    }

    endpoint.shutdown().await;
    Ok(())
}
