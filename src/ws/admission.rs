use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::document::{DocumentCell, LiveDocument};
use super::hub::Hub;
use crate::models::{InfoMessage, NotePermission, ServerEvent};
use crate::services::codec::CodecError;
use crate::services::note_service::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Referer does not name a valid note")]
    InvalidIdentifier,
    #[error("Note '{0}' could not be loaded: {1}")]
    NotFound(String, StoreError),
    #[error("Note '{0}' has an undecodable body: {1}")]
    Undecodable(String, CodecError),
    #[error("Session left before it was admitted")]
    SessionGone,
}

impl Hub {
    /// Admit a registered session into its note, loading the note on first use.
    ///
    /// Runs behind the connect gate: connects are handled one at a time, in
    /// arrival order, whatever their outcome.
    pub async fn connect(&self, session_id: &str) -> Result<(), AdmissionError> {
        let _turn = self.connect_gate.lock().await;

        let result = self.admit(session_id).await;
        match &result {
            Ok(()) => {}
            Err(AdmissionError::SessionGone) => {
                debug!("Session {} closed before admission", session_id);
            }
            Err(e) => {
                warn!("Rejecting session {}: {}", session_id, e);
                self.sessions
                    .send(session_id, ServerEvent::Info(InfoMessage { code: 404 }))
                    .await;
                self.sessions.close(session_id).await;
            }
        }
        self.log_status().await;
        result
    }

    async fn admit(&self, session_id: &str) -> Result<(), AdmissionError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or(AdmissionError::SessionGone)?;
        let note_id = session.note_id.ok_or(AdmissionError::InvalidIdentifier)?;

        loop {
            let cell = match self.documents.resolve(&note_id).await {
                Some(cell) => cell,
                None => self.load_document(&note_id).await?,
            };

            let mut doc = cell.state.lock().await;
            if doc.evicted {
                // the last session left while we waited; load it again
                continue;
            }

            if !self.sessions.contains(session_id).await {
                if doc.sessions.is_empty() {
                    doc.evicted = true;
                    self.documents.evict(&cell).await;
                }
                return Err(AdmissionError::SessionGone);
            }

            doc.attach(session_id, session.outbox.clone());
            if let Some(roster) = self.roster_event(&doc).await {
                doc.broadcast(&roster);
            }
            self.sessions.send(session_id, self.refresh_event(&doc)).await;

            info!(
                "Session {} joined note '{}' ({} attached)",
                session_id,
                note_id,
                doc.sessions.len()
            );
            return Ok(());
        }
    }

    async fn load_document(&self, note_id: &str) -> Result<Arc<DocumentCell>, AdmissionError> {
        let stored = self
            .services
            .store
            .read_document(note_id)
            .await
            .map_err(|e| {
                error!("Failed to read note '{}': {}", note_id, e);
                AdmissionError::NotFound(note_id.to_string(), e)
            })?;

        let body = match &stored.content {
            Some(content) => self
                .services
                .persisted
                .decode(content)
                .map_err(|e| AdmissionError::Undecodable(note_id.to_string(), e))?,
            None => String::new(),
        };

        let default_permission = NotePermission::default_for_owner(stored.owner.as_deref());
        let record = self
            .services
            .notes
            .find_or_create(note_id, default_permission)
            .await
            .map_err(|e| AdmissionError::NotFound(note_id.to_string(), e))?;

        let doc = LiveDocument::new(
            note_id,
            stored.owner,
            record.permission,
            body,
            stored.update_time.timestamp_millis(),
        );
        info!("Loaded note '{}' ({} bytes)", note_id, doc.body.len());
        Ok(self.documents.materialize(doc).await)
    }

    /// Detach a closed channel from its note, writing and evicting the note
    /// when it was the last one.
    ///
    /// Runs behind the disconnect gate, independently of connects.
    pub async fn disconnect(&self, session_id: &str) {
        let _turn = self.disconnect_gate.lock().await;

        let Some(session) = self.sessions.remove(session_id).await else {
            debug!("Session {} already disconnected", session_id);
            return;
        };
        info!("Session {} disconnected", session_id);

        let Some(note_id) = session.note_id else {
            return;
        };
        let Some(cell) = self.documents.resolve(&note_id).await else {
            return;
        };

        let _persist = cell.persist_gate.lock().await;
        let mut doc = cell.state.lock().await;
        if doc.evicted {
            return;
        }
        doc.detach(session_id);

        if doc.sessions.is_empty() {
            if doc.dirty {
                match self.write_note(&note_id, &doc.body).await {
                    Ok(()) => {
                        let revision = doc.revision;
                        doc.mark_persisted(revision);
                    }
                    Err(e) => error!(
                        "Failed to save note '{}' on last disconnect, {} bytes dropped: {}",
                        note_id,
                        doc.body.len(),
                        e
                    ),
                }
            }
            doc.evicted = true;
            self.documents.evict(&cell).await;
            info!("Note '{}' closed", note_id);
        } else if let Some(roster) = self.roster_event(&doc).await {
            doc.broadcast(&roster);
        }
        drop(doc);

        self.log_status().await;
    }
}
