/// Handles one item pulled from an [`EventSource`](crate::primitives::EventSource)
/// stream inside the ingestion loop. Breaks out of the loop when the stream
/// closes and returns from the enclosing task on a fatal error.
#[macro_export]
macro_rules! process_chain_event {
    ($tracker:expr, $correlator:expr, $source:ident, $result:ident) => {
        match $result {
            // stream closed
            None => {
                log::info!(target: "packet-tracker", "🛑 Event stream of {} closed", $source.name());
                break;
            }
            Some(event) => {
                let host = $source.network_id();
                match $crate::core::relay::ingest_event(&*$tracker, &*$correlator, &host, event) {
                    Ok(0) => {}
                    Ok(changed) => {
                        log::info!(target: "packet-tracker", "🧾 {} packet records updated from {}", changed, $source.name())
                    }
                    Err(err) => {
                        log::error!(target: "packet-tracker", "💥 Halting ingestion from {}: {}", $source.name(), err);
                        return Err(err);
                    }
                }
            }
        }
    };
}
