//! Event dispatch loop: the only place the address table is mutated.

use std::time::Duration;

use anyhow::anyhow;
use log::{debug, error, warn};
use tokio::time::{interval, MissedTickBehavior};

use crate::runtime::EventSource;
use crate::state::StateTracker;

/// Feed events into the tracker until the event source fails.
///
/// Tracker errors are logged and the event is dropped.  An error on the
/// source's error channel, or either channel closing, ends the loop with an
/// error since the table can no longer be trusted to stay current.
pub async fn run_dispatch_loop(
    tracker: StateTracker,
    mut source: EventSource,
    status_interval: Duration,
) -> anyhow::Result<()> {
    let mut status = interval(status_interval);
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            err = source.errors.recv() => {
                let err = err.unwrap_or_else(|| anyhow!("event error channel closed"));
                error!("Event source failed: {}", err);
                return Err(err);
            }
            event = source.events.recv() => {
                let Some(event) = event else {
                    return Err(anyhow!("event channel closed"));
                };
                debug!("Applying {} event", event.action());
                let action = event.action().to_string();
                if let Err(e) = tracker.apply_event(event).await {
                    warn!("Network {} handler error: {}", action, e);
                }
            }
            _ = status.tick() => {
                tracker.table().print_status().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{endpoint, StaticInspector};
    use crate::state::AddressTable;
    use crate::types::NetworkEvent;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn setup() -> (
        StateTracker,
        Arc<StaticInspector>,
        mpsc::Sender<NetworkEvent>,
        mpsc::Sender<anyhow::Error>,
        EventSource,
    ) {
        let inspector = Arc::new(StaticInspector::default());
        let tracker = StateTracker::new(AddressTable::new(), inspector.clone());
        let (event_tx, events) = mpsc::channel(16);
        let (error_tx, errors) = mpsc::channel(1);
        (
            tracker,
            inspector,
            event_tx,
            error_tx,
            EventSource { events, errors },
        )
    }

    #[tokio::test]
    async fn tracker_errors_do_not_stop_the_loop() {
        let (tracker, inspector, event_tx, error_tx, source) = setup();
        inspector.attach("net1", endpoint("c1", "web", Some([10, 0, 0, 2])));
        let table = tracker.table().clone();
        let handle = tokio::spawn(run_dispatch_loop(
            tracker,
            source,
            Duration::from_secs(3600),
        ));

        // Connect before the network exists fails, then succeeds once it does.
        for event in [
            NetworkEvent::Connect {
                network_id: "net1".into(),
                container_id: "c1".into(),
            },
            NetworkEvent::Unknown {
                action: "prune".into(),
            },
            NetworkEvent::Create {
                network_id: "net1".into(),
                name: "backend".into(),
            },
            NetworkEvent::Connect {
                network_id: "net1".into(),
                container_id: "c1".into(),
            },
        ] {
            event_tx.send(event).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while table.endpoint_count().await != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connect is applied after the failed one");
        assert!(!handle.is_finished());

        error_tx.send(anyhow!("stream reset")).await.unwrap();
        let result = handle.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn source_error_is_fatal() {
        let (tracker, _, _event_tx, error_tx, source) = setup();
        error_tx.send(anyhow!("connection lost")).await.unwrap();

        let err = run_dispatch_loop(tracker, source, Duration::from_secs(3600))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection lost"));
    }

    #[tokio::test]
    async fn closed_event_channel_is_fatal() {
        let (tracker, _, event_tx, _error_tx, source) = setup();
        drop(event_tx);

        let result = run_dispatch_loop(tracker, source, Duration::from_secs(3600)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn status_tick_does_not_mutate() {
        let (tracker, _, event_tx, error_tx, source) = setup();
        let table = tracker.table().clone();
        event_tx
            .send(NetworkEvent::Create {
                network_id: "net1".into(),
                name: "backend".into(),
            })
            .await
            .unwrap();
        let handle = tokio::spawn(run_dispatch_loop(
            tracker,
            source,
            Duration::from_millis(10),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(table.network_count().await, 1);

        error_tx.send(anyhow!("done")).await.unwrap();
        assert!(handle.await.unwrap().is_err());
    }
}
