//! Operator console.
//!
//! Single-key commands read line by line from the control input:
//!
//! | Key | Output |
//! |-----|--------|
//! | `t` | per-venue transport stats (router id, transports, producers, consumers) |
//! | `c` | entity counts (loaded venues, cameras, receivers, publishers, connections) |
//! | `h` | help |
//!
//! A debugging aid only; nothing here is reachable from the client protocol.

use crate::actors::{ControllerStatus, VenueControllerHandle, VenueStats};
use crate::errors::VenueError;
use std::fmt::Write as _;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HELP: &str = "commands: t = transport stats, c = entity counts, h = help\n";

/// Read commands from `input` until it closes or `cancel_token` fires.
pub async fn run_console<R, W>(
    input: R,
    mut output: W,
    controller: VenueControllerHandle,
    cancel_token: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!(target: "venue.ops", "Operator console ready (h for help)");
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let command = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(target: "venue.ops", "Control input closed");
                break;
            }
            Err(e) => {
                warn!(target: "venue.ops", error = %e, "Failed to read control input");
                break;
            }
        };

        let text = match execute(command.trim(), &controller).await {
            Ok(text) => text,
            Err(e) => format!("error: {e}\n"),
        };
        if output.write_all(text.as_bytes()).await.is_err() || output.flush().await.is_err() {
            break;
        }
    }
}

async fn execute(command: &str, controller: &VenueControllerHandle) -> Result<String, VenueError> {
    match command {
        "t" => Ok(render_transport_stats(&venue_stats(controller).await?)),
        "c" => {
            let status = controller.status().await?;
            Ok(render_counts(&status, &venue_stats(controller).await?))
        }
        "h" | "?" => Ok(HELP.to_string()),
        "" => Ok(String::new()),
        other => Ok(format!("unknown command '{other}'\n{HELP}")),
    }
}

/// Stats of every loaded venue. Venues that unload mid-query are skipped.
async fn venue_stats(controller: &VenueControllerHandle) -> Result<Vec<VenueStats>, VenueError> {
    let mut stats = Vec::new();
    for handle in controller.loaded_handles().await? {
        if let Ok(venue) = handle.stats().await {
            stats.push(venue);
        }
    }
    stats.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(stats)
}

#[must_use]
pub fn render_transport_stats(stats: &[VenueStats]) -> String {
    if stats.is_empty() {
        return "no venues loaded\n".to_string();
    }
    let mut out = String::new();
    for venue in stats {
        let _ = writeln!(
            out,
            "{} ({}) router={} transports={} producers={} consumers={}",
            venue.name,
            venue.venue_id,
            venue.router_id,
            venue.transports,
            venue.producers,
            venue.consumers
        );
    }
    out
}

#[must_use]
pub fn render_counts(status: &ControllerStatus, stats: &[VenueStats]) -> String {
    let cameras: usize = stats.iter().map(|v| v.cameras).sum();
    let receivers: usize = stats.iter().map(|v| v.receivers).sum();
    let publishers: usize = stats.iter().map(|v| v.publishers).sum();
    format!(
        "venues loaded={} loading={} unloading={}\ncameras={cameras} receivers={receivers} publishers={publishers} connections={}\n",
        status.loaded, status.loading, status.unloading, status.connections
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, Requester};
    use crate::media::mock::MockMediaTransport;
    use crate::media::MediaTransport;
    use crate::store::memory::InMemoryVenueStore;
    use crate::store::VenueStore;
    use common::types::{Role, UserId, VenueId};
    use std::sync::Arc;

    fn stats(name: &str) -> VenueStats {
        VenueStats {
            venue_id: VenueId::new(),
            name: name.to_string(),
            router_id: "router-1".to_string(),
            cameras: 2,
            receivers: 3,
            publishers: 1,
            transports: 4,
            producers: 1,
            consumers: 3,
        }
    }

    #[test]
    fn test_render_transport_stats() {
        assert_eq!(render_transport_stats(&[]), "no venues loaded\n");
        let text = render_transport_stats(&[stats("hall")]);
        assert!(text.starts_with("hall ("));
        assert!(text.contains("router=router-1 transports=4 producers=1 consumers=3"));
    }

    #[test]
    fn test_render_counts() {
        let status = ControllerStatus {
            loaded: 2,
            loading: 0,
            unloading: 1,
            connections: 7,
            mailbox_depth: 0,
        };
        let text = render_counts(&status, &[stats("a"), stats("b")]);
        assert!(text.contains("venues loaded=2 loading=0 unloading=1"));
        assert!(text.contains("cameras=4 receivers=6 publishers=2 connections=7"));
    }

    #[tokio::test]
    async fn test_console_commands() {
        let store = Arc::new(InMemoryVenueStore::new());
        let owner = UserId::new();
        let venue_id = store.create_venue("hall", owner).await.unwrap();
        let controller = VenueControllerHandle::new(
            "ops-test".to_string(),
            Arc::clone(&store) as Arc<dyn VenueStore>,
            Arc::new(MockMediaTransport::accepting()) as Arc<dyn MediaTransport>,
            ActorMetrics::new(),
        );
        controller
            .load_venue(
                venue_id,
                Requester {
                    user_id: owner,
                    role: Role::User,
                },
            )
            .await
            .unwrap();

        let input: &[u8] = b"h\nt\nc\nx\n";
        let mut output = Vec::new();
        run_console(input, &mut output, controller, CancellationToken::new()).await;

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("commands:"));
        assert!(text.contains("hall ("));
        assert!(text.contains("venues loaded=1"));
        assert!(text.contains("unknown command 'x'"));
    }
}
