use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::protocol;

// Cadence of advertisement rebroadcasts while waiting for replies.
const REBROADCAST_INTERVAL: Duration = Duration::from_secs(5);

/// Find inverters on the local network by broadcasting the advertisement
/// frame and collecting the addresses that answer.
///
/// Returns once `count` distinct inverters replied or `window` elapsed,
/// whichever comes first; a short fleet is the caller's problem to tolerate.
pub fn discover(bind_ip: Option<IpAddr>, count: usize, window: Duration) -> Result<Vec<IpAddr>> {
    let local = SocketAddr::new(bind_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), 0);
    let socket = UdpSocket::bind(local)
        .with_context(|| format!("failed to bind discovery socket to {local}"))?;
    socket
        .set_broadcast(true)
        .context("failed to enable broadcast on the discovery socket")?;

    let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), protocol::BROADCAST_PORT);
    let deadline = Instant::now() + window;
    let mut found: Vec<IpAddr> = Vec::new();
    let mut buf = [0u8; 256];

    info!("Searching for {count} inverter(s) on the local network");
    while found.len() < count && Instant::now() < deadline {
        debug!("Broadcasting advertisement to {target}");
        socket
            .send_to(&protocol::DISCOVERY, target)
            .context("failed to send discovery broadcast")?;

        // Collect replies until the next rebroadcast is due.
        let rebroadcast_at = Instant::now() + REBROADCAST_INTERVAL;
        while found.len() < count {
            let now = Instant::now();
            let wait_until = rebroadcast_at.min(deadline);
            if now >= wait_until {
                break;
            }
            socket
                .set_read_timeout(Some(wait_until - now))
                .context("failed to set discovery read timeout")?;
            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    if len >= 2 && buf[..2] == protocol::MAGIC {
                        if !found.contains(&peer.ip()) {
                            info!("Inverter discovered at {}", peer.ip());
                            found.push(peer.ip());
                        }
                    } else {
                        debug!("Ignoring datagram from {peer}");
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(e) => return Err(e).context("discovery socket read failed"),
            }
        }
    }

    if found.len() < count {
        warn!(
            "Discovered {} of {count} inverter(s) within {window:?}",
            found.len()
        );
    }
    // Address order is our device order; keep it stable across runs.
    found.sort();
    Ok(found)
}
