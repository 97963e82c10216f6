use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::document::DocumentCell;
use super::hub::Hub;

impl Hub {
    /// Write every dirty note to the store, concurrently.
    ///
    /// Returns how many notes were written. A note whose write fails stays
    /// dirty for the next sweep.
    pub async fn flush_dirty(&self) -> usize {
        let cells = self.documents.all().await;
        let results = join_all(cells.iter().map(|cell| self.flush_one(cell))).await;
        let written = results.into_iter().filter(|written| *written).count();
        if written > 0 {
            debug!("Flushed {} dirty notes", written);
        }
        written
    }

    async fn flush_one(&self, cell: &DocumentCell) -> bool {
        let _persist = cell.persist_gate.lock().await;

        let (body, revision) = {
            let doc = cell.state.lock().await;
            if doc.evicted || !doc.dirty {
                return false;
            }
            (doc.body.clone(), doc.revision)
        };

        if let Err(e) = self.write_note(&cell.id, &body).await {
            error!("Failed to flush note '{}': {}", cell.id, e);
            return false;
        }

        cell.state.lock().await.mark_persisted(revision);
        true
    }

    /// Run `flush_dirty` every `period` for the life of the process.
    pub fn spawn_flush_scheduler(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        info!("Flushing dirty notes every {:?}", period);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                hub.flush_dirty().await;
            }
        })
    }
}
