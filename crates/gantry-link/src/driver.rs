//! Task-side driver for the transfer engine.
//!
//! The engine is polled, never blocked on: each pass calls
//! [`TransferEngine::is_ready`] and yields briefly when nothing
//! completed. All state transitions therefore happen from this task.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::info;

use gantry_core::Result;
use gantry_core::sbc::SpiBus;

use crate::transfer::TransferEngine;

/// Idle poll interval between bus completions.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Drive the engine until `shutdown` flips to true.
///
/// `on_transfer` runs with the engine in the processing phase: read the
/// received packets, queue outbound ones. The driver then starts the
/// next transfer.
pub async fn drive<B, F>(
    mut engine: TransferEngine<B>,
    mut on_transfer: F,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    B: SpiBus,
    F: FnMut(&mut TransferEngine<B>),
{
    info!("SBC link driver starting");

    loop {
        if *shutdown.borrow() {
            info!("SBC link driver stopping");
            return Ok(());
        }

        if engine.is_ready(Instant::now()) {
            on_transfer(&mut engine);
            engine.start_next_transfer();
        } else {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_test_utils::ScriptedSpiBus;

    #[tokio::test]
    async fn driver_stops_on_shutdown() {
        let engine = TransferEngine::new(ScriptedSpiBus::new(), Instant::now());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(drive(engine, |_| {}, rx));
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
