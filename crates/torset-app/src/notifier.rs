//! Turns run events into operator-facing log lines.
//!
//! Delivery to chat or mail services is left to whoever reads the log
//! stream; this task only renders and logs.

use std::fmt::Write as _;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use torset_events::{Event, EventBus};
use tracing::{info, warn};

/// Subscribe to `events` and log a message per noteworthy event until `stop`
/// is cancelled. Events already queued when `stop` fires are still drained.
#[must_use]
pub fn spawn_notifier(events: &EventBus, stop: CancellationToken) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                next = stream.next() => next,
                () = stop.cancelled() => break,
            };
            let Some(envelope) = next else {
                break;
            };
            let Some(message) = render(&envelope.event) else {
                continue;
            };
            let kind = envelope.event.kind();
            if matches!(envelope.event, Event::RunAborted { .. }) {
                warn!(target: "torset::notify", event = kind, "{message}");
            } else {
                info!(target: "torset::notify", event = kind, "{message}");
            }
        }
    })
}

/// Human-readable message for `event`, or `None` when there is nothing to say.
#[must_use]
pub fn render(event: &Event) -> Option<String> {
    match event {
        Event::RunCompleted { summary } if !summary.is_quiet() => {
            let mut message = format!(
                "torrent transfer finished: {} matched, {} transferred, {} failed",
                summary.matched_count, summary.acted_count, summary.failed_count
            );
            for failure in &summary.failures {
                let _ = write!(message, "\n{}: {}", failure.torrent_id, failure.reason);
            }
            Some(message)
        }
        Event::RunAborted { reason, .. } => Some(format!("torrent transfer aborted: {reason}")),
        _ => None,
    }
}
