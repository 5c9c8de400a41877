//! Recurring command processing.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::HostAgent;

/// Wait `interval`, process every pending command, repeat until cancelled.
///
/// Cycles never overlap: the wait starts only after the previous cycle has
/// finished. Results are logged and dropped.
pub async fn run_monitor(agent: &HostAgent, interval: Duration, cancel: CancellationToken) -> u64 {
    let mut cycles = 0;
    info!(interval_secs = interval.as_secs(), "Monitoring for commands");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        cycles += 1;
        match agent.commands_process().await {
            Ok(outcome) => {
                let processed = outcome
                    .result
                    .as_ref()
                    .and_then(|r| r["commands_results"].as_object())
                    .map_or(0, serde_json::Map::len);
                info!(cycle = cycles, processed, "Monitor cycle complete");
            }
            Err(e) => warn!(cycle = cycles, error = %e, "Monitor cycle failed"),
        }
    }
    info!(cycles, "Monitor stopped");
    cycles
}
