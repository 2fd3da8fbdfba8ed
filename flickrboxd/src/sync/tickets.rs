use std::time::Duration;

use flickr_core::{FlickrClient, TicketId, TicketState, TicketStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Channels connecting the sync engine to a running ticket poller.
pub struct TicketPoller {
    /// Tickets to watch. Dropping it lets the poller finish once drained.
    pub intake: mpsc::UnboundedSender<TicketId>,
    /// Completed, failed or invalid tickets; closes when the poller exits.
    pub resolved: mpsc::UnboundedReceiver<TicketStatus>,
    pub handle: JoinHandle<()>,
}

/// Starts the background loop that checks outstanding upload tickets.
///
/// The poller owns only ticket ids. Every resolution is sent back so the
/// engine stays the single writer of the registry.
pub fn spawn_ticket_poller(client: FlickrClient, interval: Duration) -> TicketPoller {
    let (intake_tx, intake_rx) = mpsc::unbounded_channel();
    let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(poll_tickets(client, interval, intake_rx, resolved_tx));
    TicketPoller {
        intake: intake_tx,
        resolved: resolved_rx,
        handle,
    }
}

async fn poll_tickets(
    client: FlickrClient,
    interval: Duration,
    mut intake: mpsc::UnboundedReceiver<TicketId>,
    resolved: mpsc::UnboundedSender<TicketStatus>,
) {
    let mut outstanding: Vec<TicketId> = Vec::new();
    loop {
        if outstanding.is_empty() {
            match intake.recv().await {
                Some(ticket) => outstanding.push(ticket),
                None => break,
            }
        }
        tokio::time::sleep(interval).await;
        while let Ok(ticket) = intake.try_recv() {
            outstanding.push(ticket);
        }

        let statuses = match client.check_tickets(&outstanding).await {
            Ok(statuses) => statuses,
            Err(err) => {
                warn!(error = %err, outstanding = outstanding.len(), "ticket check failed");
                continue;
            }
        };
        for status in statuses {
            if status.state == TicketState::Pending {
                continue;
            }
            outstanding.retain(|ticket| *ticket != status.id);
            debug!(ticket = %status.id, state = ?status.state, "ticket resolved");
            if resolved.send(status).is_err() {
                return;
            }
        }
    }
    debug!("ticket poller stopped");
}
