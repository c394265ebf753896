//! Periodic announcement of this node to the multicast group.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time;
use zerocopy::AsBytes;

use meshbridge_core::wire::Announcement;

use super::{make_sender_socket, MulticastGroup};

/// Send `announcement` every `interval` until shutdown.
pub async fn announce_loop(
    announcement: Announcement,
    group: MulticastGroup,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = make_sender_socket().context("failed to create multicast sender socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
    let dest = group.dest();

    let mesh_port = announcement.mesh_port();
    tracing::info!(
        group = %dest,
        mesh_port,
        interval_secs = interval.as_secs(),
        "local announcements starting"
    );

    let mut ticker = time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("local announcements stopping");
                return Ok(());
            }
            _ = ticker.tick() => {
                match socket.send_to(announcement.as_bytes(), dest).await {
                    Ok(n) => tracing::trace!(bytes = n, "announcement sent"),
                    Err(e) => tracing::warn!(error = %e, "announcement send failed"),
                }
            }
        }
    }
}
