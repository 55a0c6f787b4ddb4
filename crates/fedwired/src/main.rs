//! fedwired — federated tensor exchange daemon.
//!
//!   fedwired receive [--out PATH]   merge incoming chunks until Ctrl-C
//!   fedwired send FILE PEER         send a little-endian f32 tensor file

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use fedwire_core::FedwireConfig;
use fedwire_services::{MlBuffer, SharedMlBuffer};

mod delivery;
mod receive;
mod send;
mod tensor_file;
mod udp_host;

fn print_usage() {
    println!("fedwired — federated tensor exchange over UDP");
    println!();
    println!("Usage:");
    println!("  fedwired receive [--out PATH]   Merge incoming chunks; write the result on Ctrl-C");
    println!("  fedwired send FILE PEER         Send a little-endian f32 file to PEER (host:port)");
    println!();
    println!("Config: {}", FedwireConfig::file_path().display());
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = FedwireConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = FedwireConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FedwireConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["receive"] => cmd_receive(config, None).await,
        ["receive", "--out", path] => cmd_receive(config, Some(PathBuf::from(path))).await,
        ["send", file, peer] => {
            let peer: SocketAddr = peer
                .parse()
                .with_context(|| format!("invalid peer address: {peer}"))?;
            cmd_send(config, PathBuf::from(file), peer).await
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

async fn cmd_receive(config: FedwireConfig, out: Option<PathBuf>) -> Result<()> {
    let bind_addr: SocketAddr = config
        .network
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.network.bind_addr))?;
    let socket = Arc::new(
        udp_host::bind_socket(bind_addr, config.network.recv_buffer_bytes)
            .context("failed to bind chunk socket")?,
    );
    tracing::info!(
        addr = %socket.local_addr()?,
        policy = ?config.receiver.policy,
        max_elements = config.receiver.max_elements,
        "fedwired receiving"
    );

    let buffer = SharedMlBuffer::from_buffer(MlBuffer::<f32>::with_max_elements(
        config.receiver.policy,
        config.receiver.max_elements,
    ));
    let tracker = delivery::DeliveryTracker::new();

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let receiver_task = tokio::spawn(
        receive::ChunkReceiver::new(
            socket,
            buffer.clone(),
            tracker.clone(),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let _report_task = match config.receiver.assemble_interval_secs {
        0 => None,
        secs => Some(tokio::spawn(receive::report_loop(
            buffer.clone(),
            tracker.clone(),
            Duration::from_secs(secs),
        ))),
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = receiver_task      => tracing::error!("chunk receiver exited: {:?}", r),
    }

    receive::log_snapshot(&buffer, &tracker).await;

    if let Some(path) = out {
        let tensor = buffer.assemble().await;
        tensor_file::write_tensor(&path, &tensor)?;
        tracing::info!(path = %path.display(), elements = tensor.size(), "assembled tensor written");
    }

    Ok(())
}

async fn cmd_send(config: FedwireConfig, file: PathBuf, peer: SocketAddr) -> Result<()> {
    tokio::select! {
        r = send::send_file(&config.sender, &file, peer) => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("send interrupted");
            Ok(())
        }
    }
}
