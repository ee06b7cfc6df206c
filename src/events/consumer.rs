//! Event consumer loop
//!
//! Drains lifecycle events one at a time, in delivery order. A failing event
//! is logged and skipped; the loop only stops when the stream ends or the
//! shutdown token fires.

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::events::{EventHandler, LifecycleEvent};
use crate::utils::{Error, Result};

pub const CONSUMER_ID: &str = "event-consumer";

pub type EventStream = BoxStream<'static, Result<LifecycleEvent>>;

/// Subscribes to `subject` on the bus and decodes every delivery as a
/// JSON lifecycle event.
pub fn from_bus(broker: &Broker, subject: &str) -> EventStream {
    let rx = broker.attach(CONSUMER_ID, subject);
    stream::unfold(rx, |mut rx| async move {
        let delivery = rx.recv().await?;
        Some((LifecycleEvent::from_json(&delivery.payload), rx))
    })
    .boxed()
}

/// Returns the number of events applied successfully.
pub async fn run(
    mut events: EventStream,
    handler: &EventHandler,
    shutdown: CancellationToken,
) -> usize {
    info!("event consumer started");
    let mut applied = 0;

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = events.next() => match next {
                Some(event) => event,
                None => break,
            },
        };

        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping undecodable event");
                continue;
            }
        };
        match handler.handle(&event) {
            Ok(()) => applied += 1,
            Err(e) => log_failure(&event.operation, &event.id, &e),
        }
    }

    info!(applied, "event consumer stopped");
    applied
}

fn log_failure(operation: &str, id: &str, err: &Error) {
    match err {
        Error::RouteNotFound => debug!(operation, id, "event refers to an unmapped entity"),
        _ => warn!(operation, id, error = %err, "failed to apply event"),
    }
}
