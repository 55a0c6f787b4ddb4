//! Send side — ship one tensor file to a peer.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use fedwire_core::config::SenderConfig;
use fedwire_services::{ChunkSender, SendHandle};

use crate::tensor_file::read_tensor;
use crate::udp_host::{bind_socket, ephemeral_for, UdpHost};

/// How often to check whether a paced send has dispatched its last chunk.
const PROGRESS_POLL: Duration = Duration::from_millis(20);

pub async fn send_file(config: &SenderConfig, file: &Path, peer: SocketAddr) -> Result<()> {
    let tensor = read_tensor(file)?;

    let socket = Arc::new(
        bind_socket(ephemeral_for(peer), 0).context("failed to bind send socket")?,
    );
    let host = Arc::new(UdpHost::new(socket, peer));
    let sender = ChunkSender::new(host.clone());

    if config.data_rate.is_none() {
        tracing::warn!("no data_rate configured, sending unpaced; chunks may be dropped locally");
    }

    let handle = sender
        .send(&tensor, config.max_payload_elements, config.data_rate)
        .context("failed to start send")?;

    tracing::info!(
        %peer,
        file = %file.display(),
        elements = tensor.size(),
        chunks = handle.chunk_count(),
        last_chunk_len = handle.last_chunk_len(),
        rate = ?config.data_rate.map(|r| r.to_string()),
        "sending tensor"
    );

    wait_until_complete(&handle).await;

    tracing::info!(
        peer = %host.peer(),
        chunks = handle.dispatched(),
        dropped = host.dropped(),
        "send finished"
    );
    Ok(())
}

async fn wait_until_complete(handle: &SendHandle) {
    while !handle.is_complete() {
        tokio::time::sleep(PROGRESS_POLL).await;
    }
}
