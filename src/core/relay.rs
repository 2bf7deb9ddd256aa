use crate::core::{
    error::Error,
    events::{ChainEvent, Correlator, PacketEvent},
    packets::{lifecycle::PacketTracker, types::NetworkId},
};
use crate::primitives::{EventSource, NetworkRegistry, PacketStore};
use crate::process_chain_event;
use futures::StreamExt;
use std::sync::Arc;

/// Core ingestion loop. Every source stream is drained on its own task; the
/// loop returns once all streams have closed, or as soon as one of them hits
/// an identity collision, in which case the other tasks are aborted.
pub async fn track<S, R>(
    tracker: Arc<PacketTracker<S>>,
    correlator: Arc<Correlator<R>>,
    sources: Vec<Arc<dyn EventSource>>,
) -> Result<(), anyhow::Error>
where
    S: PacketStore + 'static,
    R: NetworkRegistry + 'static,
{
    let mut handles = sources
        .into_iter()
        .map(|source| {
            let (tracker, correlator) = (tracker.clone(), correlator.clone());
            tokio::spawn(async move { drain(tracker, correlator, source).await })
        })
        .collect::<Vec<_>>();

    while !handles.is_empty() {
        let (result, _, remaining) = futures::future::select_all(handles).await;
        handles = remaining;
        let outcome = match result {
            Ok(outcome) => outcome.map_err(anyhow::Error::from),
            Err(join_error) => Err(anyhow::anyhow!("ingestion task failed: {}", join_error)),
        };
        if let Err(e) = outcome {
            for handle in &handles {
                handle.abort();
            }
            return Err(e);
        }
    }

    Ok(())
}

async fn drain<S, R>(
    tracker: Arc<PacketTracker<S>>,
    correlator: Arc<Correlator<R>>,
    source: Arc<dyn EventSource>,
) -> Result<(), Error>
where
    S: PacketStore,
    R: NetworkRegistry,
{
    log::info!(target: "packet-tracker", "📡 Tracking events from {} ({})", source.name(), source.network_id());
    let mut events = source.events().await;
    loop {
        let result = events.next().await;
        process_chain_event!(tracker, correlator, source, result)
    }
    Ok(())
}

/// Retries events that were waiting for the registry, then correlates and
/// applies one raw event observed on `host`. An event whose host still has
/// deferred events queues behind them. Returns how many records changed.
/// Only fatal errors are returned, everything else is logged and the event
/// dropped.
pub fn ingest_event<S, R>(
    tracker: &PacketTracker<S>,
    correlator: &Correlator<R>,
    host: &NetworkId,
    event: ChainEvent,
) -> Result<usize, Error>
where
    S: PacketStore,
    R: NetworkRegistry,
{
    let mut changed = correlator.retry_pending(|events| apply_all(tracker, events))?;
    let Some(event) = correlator.defer_behind(host, event) else {
        log::debug!(target: "packet-tracker", "⏳ Queued event from {} behind earlier deferred events", host);
        return Ok(changed);
    };
    changed += match correlator.correlate(host, &event) {
        Ok(events) => apply_all(tracker, events)?,
        Err(e) if e.is_retryable() => {
            log::warn!(target: "packet-tracker", "⏳ Deferring event from {}: {}", host, e);
            correlator.defer(host.clone(), event);
            0
        }
        Err(e) => {
            log::warn!(target: "packet-tracker", "Dropping event from {}: {}", host, e);
            0
        }
    };
    Ok(changed)
}

fn apply_all<S: PacketStore>(
    tracker: &PacketTracker<S>,
    events: Vec<PacketEvent>,
) -> Result<usize, Error> {
    let mut changed = 0;
    for event in events {
        match tracker.apply(event) {
            Ok(ids) => changed += ids.len(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e @ (Error::OutOfOrderHop { .. } | Error::HopOverflow { .. })) => {
                log::warn!(target: "packet-tracker", "Dropping hop update: {}", e)
            }
            Err(e) => log::warn!(target: "packet-tracker", "⚠️ Rejected event: {}", e),
        }
    }
    Ok(changed)
}
