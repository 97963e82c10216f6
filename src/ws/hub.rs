use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};
use url::Url;

use super::document::{DocumentCell, DocumentRegistry, LiveDocument};
use super::session::{Channel, Session, SessionRegistry};
use crate::config::Config;
use crate::models::{OnlineUsersMessage, RefreshMessage, ServerEvent, StatusResponse};
use crate::services::auth_service::{AuthContext, IdentityProvider};
use crate::services::codec::PayloadCodec;
use crate::services::note_service::{decode_note_id, DocumentStore, NoteDomain, StoreError};

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub features_note_name: String,
    pub app_version: String,
    pub max_color_retries: u32,
    pub auth_cookie_name: String,
}

impl From<&Config> for HubSettings {
    fn from(config: &Config) -> Self {
        Self {
            features_note_name: config.features_note_name.clone(),
            app_version: config.app_version.clone(),
            max_color_retries: config.max_color_retries,
            auth_cookie_name: config.auth_cookie_name.clone(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Collaborators the hub talks to
#[derive(Clone)]
pub struct HubServices {
    pub store: Arc<dyn DocumentStore>,
    pub notes: Arc<dyn NoteDomain>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Applied to payloads on the socket
    pub wire: Arc<dyn PayloadCodec>,
    /// Applied to bodies and titles in the store
    pub persisted: Arc<dyn PayloadCodec>,
}

/// Live counters for the diagnostics endpoint
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HubCounters {
    pub sessions: usize,
    pub notes: usize,
    pub dirty_notes: usize,
    pub channels: usize,
}

/// Owns every open note and connected session.
///
/// Connects and disconnects each run one at a time through their own gate,
/// so loading a note and attaching to it never interleave with another
/// connect. Each note carries its own lock; a note lock may be held while
/// the session registry is read, never the other way round.
pub struct Hub {
    pub(super) settings: HubSettings,
    pub(super) sessions: SessionRegistry,
    pub(super) documents: DocumentRegistry,
    pub(super) connect_gate: Mutex<()>,
    pub(super) disconnect_gate: Mutex<()>,
    pub(super) services: HubServices,
}

impl Hub {
    pub fn new(settings: HubSettings, services: HubServices) -> Self {
        Self {
            settings,
            sessions: SessionRegistry::new(),
            documents: DocumentRegistry::new(),
            connect_gate: Mutex::new(()),
            disconnect_gate: Mutex::new(()),
            services,
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.services.identity
    }

    /// Note id named by the first path segment of a referring URL.
    pub fn note_id_from_referer(&self, referer: Option<&str>) -> Option<String> {
        let referer = referer?;
        let url = Url::parse(referer)
            .or_else(|_| Url::parse("http://localhost/").and_then(|base| base.join(referer)))
            .ok()?;
        let segment = url.path_segments()?.next()?;
        if segment.is_empty() {
            return None;
        }
        if segment == self.settings.features_note_name {
            return Some(segment.to_string());
        }
        if !self.services.notes.is_valid_id(segment) {
            return None;
        }
        decode_note_id(segment)
    }

    /// Create the session for a newly opened channel.
    pub async fn register(&self, channel: Channel, auth: &AuthContext) -> Session {
        let note_id = self.note_id_from_referer(channel.referer.as_deref());
        let taken = match &note_id {
            Some(id) => self.colors_in_use(id).await,
            None => HashSet::new(),
        };
        self.sessions
            .register(channel, note_id, auth, &taken, self.settings.max_color_retries)
            .await
    }

    /// Colors of the sessions attached to a live note.
    pub(super) async fn colors_in_use(&self, note_id: &str) -> HashSet<String> {
        let Some(cell) = self.documents.resolve(note_id).await else {
            return HashSet::new();
        };
        let doc = cell.state.lock().await;
        self.sessions.colors_of(doc.sessions.iter()).await
    }

    /// The live note of a session, if it is open.
    pub(super) async fn document_of(&self, session_id: &str) -> Option<Arc<DocumentCell>> {
        let note_id = self.sessions.get(session_id).await?.note_id?;
        self.documents.resolve(&note_id).await
    }

    pub(super) fn encode_json<T: Serialize>(&self, value: &T) -> Option<String> {
        match serde_json::to_string(value) {
            Ok(json) => Some(self.services.wire.encode(&json)),
            Err(e) => {
                error!("Failed to serialize payload: {}", e);
                None
            }
        }
    }

    /// Encoded presence roster of everyone attached to `doc`.
    pub(super) async fn roster_event(&self, doc: &LiveDocument) -> Option<ServerEvent> {
        let users = self.sessions.user_outs(doc.roster_ids().iter()).await;
        self.encode_json(&OnlineUsersMessage { users })
            .map(ServerEvent::OnlineUsers)
    }

    pub(super) fn refresh_event(&self, doc: &LiveDocument) -> ServerEvent {
        ServerEvent::Refresh(RefreshMessage {
            owner: doc.owner.clone(),
            permission: doc.permission,
            body: self.services.wire.encode(&doc.body),
            otk: doc.otk.clone(),
            hash: doc.hash.clone(),
            updatetime: doc.update_time,
        })
    }

    /// Title and body of a note, encoded and written to the store.
    pub(super) async fn write_note(&self, id: &str, body: &str) -> Result<(), StoreError> {
        let title = self.services.notes.title_of(body);
        let persisted = &self.services.persisted;
        self.services
            .store
            .save_document(id, &persisted.encode(&title), &persisted.encode(body))
            .await
    }

    pub async fn status(&self) -> Result<StatusResponse, StoreError> {
        let (online_users, distinct_online_users, online_registered_users, distinct_online_registered_users) =
            self.sessions.presence_counts().await;
        let online_notes = self.documents.len().await;
        let notes_count = self.services.store.count_documents().await?;
        let registered_users = self.services.notes.count_users().await?;
        Ok(StatusResponse {
            online_notes,
            online_users,
            distinct_online_users,
            notes_count,
            registered_users,
            online_registered_users,
            distinct_online_registered_users,
        })
    }

    pub async fn counters(&self) -> HubCounters {
        let mut counters = HubCounters {
            sessions: self.sessions.len().await,
            ..HubCounters::default()
        };
        for cell in self.documents.all().await {
            let doc = cell.state.lock().await;
            if doc.evicted {
                continue;
            }
            counters.notes += 1;
            counters.channels += doc.channels.len();
            if doc.dirty {
                counters.dirty_notes += 1;
            }
        }
        counters
    }

    pub(super) async fn log_status(&self) {
        match self.status().await {
            Ok(status) => debug!("Status: {:?}", status),
            Err(e) => debug!("Status unavailable: {}", e),
        }
    }
}
