//! Fixtures shared by the hub tests.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use super::hub::{Hub, HubServices, HubSettings};
use super::session::{Channel, Outbound};
use crate::db::memory::MemoryNotes;
use crate::models::{NotePermission, NoteRecord, OnlineUsersMessage, ServerEvent, StoredNote, UserOut};
use crate::services::auth_service::{AuthContext, IdentityProvider};
use crate::services::codec::{Base64Codec, PayloadCodec};
use crate::services::note_service::{DocumentStore, NoteDomain, StoreError};

/// Memory store that records writes and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    pub memory: MemoryNotes,
    saves: Mutex<Vec<(String, String, String)>>,
    pub fail_saves: AtomicBool,
    pub fail_permission: AtomicBool,
    hold_reads: AtomicBool,
    /// Signalled when a held read reaches the store
    pub read_started: Notify,
    pub release_reads: Notify,
}

impl RecordingStore {
    /// (id, decoded title, decoded body) of every successful write
    pub fn saves(&self) -> Vec<(String, String, String)> {
        self.saves.lock().unwrap().clone()
    }

    pub fn saves_of(&self, id: &str) -> usize {
        self.saves().iter().filter(|(saved, _, _)| saved == id).count()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Park every read until `release_reads` is notified.
    pub fn set_hold_reads(&self, hold: bool) {
        self.hold_reads.store(hold, Ordering::SeqCst);
    }

    pub fn stored_body(&self, id: &str) -> Option<String> {
        let note = futures_util::FutureExt::now_or_never(self.memory.read_document(id))?.ok()?;
        Base64Codec.decode(&note.content?).ok()
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn read_document(&self, id: &str) -> Result<StoredNote, StoreError> {
        if self.hold_reads.load(Ordering::SeqCst) {
            self.read_started.notify_one();
            self.release_reads.notified().await;
        }
        self.memory.read_document(id).await
    }

    async fn save_document(&self, id: &str, title: &str, body: &str) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write refused".to_string()));
        }
        self.memory.save_document(id, title, body).await?;
        let decoded = (
            id.to_string(),
            Base64Codec.decode(title).unwrap(),
            Base64Codec.decode(body).unwrap(),
        );
        self.saves.lock().unwrap().push(decoded);
        Ok(())
    }

    async fn count_documents(&self) -> Result<i64, StoreError> {
        self.memory.count_documents().await
    }
}

#[async_trait]
impl NoteDomain for RecordingStore {
    async fn find_or_create(
        &self,
        id: &str,
        default_permission: NotePermission,
    ) -> Result<NoteRecord, StoreError> {
        self.memory.find_or_create(id, default_permission).await
    }

    async fn find(&self, id: &str) -> Result<Option<NoteRecord>, StoreError> {
        self.memory.find(id).await
    }

    async fn update_permission(
        &self,
        note: NoteRecord,
        permission: NotePermission,
    ) -> Result<NoteRecord, StoreError> {
        if self.fail_permission.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("permission write refused".to_string()));
        }
        self.memory.update_permission(note, permission).await
    }

    async fn count_users(&self) -> Result<i64, StoreError> {
        self.memory.count_users().await
    }
}

/// `token-<uid>` signs in as `<uid>`, anything else is a guest.
pub struct StaticIdentity;

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn resolve(&self, credentials: Option<&str>, _force_refresh: bool) -> AuthContext {
        match credentials.and_then(|c| c.strip_prefix("token-")) {
            Some(uid) => AuthContext::user(uid, format!("User {}", uid)),
            None => AuthContext::guest(),
        }
    }
}

pub fn test_hub() -> (Arc<Hub>, Arc<RecordingStore>) {
    let store = Arc::new(RecordingStore::default());
    let services = HubServices {
        store: store.clone(),
        notes: store.clone(),
        identity: Arc::new(StaticIdentity),
        wire: Arc::new(Base64Codec),
        persisted: Arc::new(Base64Codec),
    };
    (Arc::new(Hub::new(HubSettings::default(), services)), store)
}

/// Create a stored note and return its id.
pub fn seed_note(store: &RecordingStore, owner: Option<&str>, body: &str) -> String {
    let id = Uuid::new_v4().hyphenated().to_string();
    store.memory.insert_note(&id, owner, &Base64Codec.encode(body));
    id
}

pub fn referer_for(note_id: &str) -> String {
    format!("https://notes.example/{}", note_id)
}

pub fn encode(plain: &str) -> String {
    Base64Codec.encode(plain)
}

pub fn change_payload(op: Value) -> String {
    encode(&op.to_string())
}

pub struct TestClient {
    pub id: String,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl TestClient {
    /// Register a channel without admitting it.
    pub async fn open(hub: &Hub, referer: Option<String>, token: Option<&str>) -> Self {
        let (outbox, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();
        let credentials = token.map(str::to_string);
        let auth = hub.identity().resolve(credentials.as_deref(), false).await;
        let channel = Channel {
            id: id.clone(),
            outbox,
            address: "127.0.0.1".to_string(),
            user_agent: Some("test-agent".to_string()),
            referer,
            credentials,
        };
        hub.register(channel, &auth).await;
        Self { id, rx }
    }

    pub async fn join(hub: &Hub, note_id: &str) -> Self {
        let client = Self::open(hub, Some(referer_for(note_id)), None).await;
        hub.connect(&client.id).await.unwrap();
        client
    }

    pub async fn join_as(hub: &Hub, note_id: &str, token: &str) -> Self {
        let client = Self::open(hub, Some(referer_for(note_id)), Some(token)).await;
        hub.connect(&client.id).await.unwrap();
        client
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            out.push(item);
        }
        out
    }

    pub fn events(&mut self) -> Vec<ServerEvent> {
        self.drain()
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Event(event) => Some(event),
                Outbound::Close => None,
            })
            .collect()
    }

    pub fn changes(&mut self) -> Vec<Map<String, Value>> {
        self.events().iter().filter_map(decode_change).collect()
    }
}

pub fn decode_roster(event: &ServerEvent) -> Option<Vec<UserOut>> {
    match event {
        ServerEvent::OnlineUsers(encoded) => {
            let json = Base64Codec.decode(encoded).ok()?;
            let message: OnlineUsersMessage = serde_json::from_str(&json).ok()?;
            Some(message.users)
        }
        _ => None,
    }
}

pub fn decode_change(event: &ServerEvent) -> Option<Map<String, Value>> {
    match event {
        ServerEvent::Change(encoded) => {
            let json = Base64Codec.decode(encoded).ok()?;
            serde_json::from_str(&json).ok()
        }
        _ => None,
    }
}

pub fn roster_ids(event: &ServerEvent) -> Option<Vec<String>> {
    let mut ids: Vec<String> = decode_roster(event)?.into_iter().map(|u| u.id).collect();
    ids.sort();
    Some(ids)
}

pub async fn current_token(hub: &Hub, note_id: &str) -> String {
    let cell = hub.documents.resolve(note_id).await.expect("note is live");
    let token = cell.state.lock().await.otk.clone();
    token
}
