use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::session::{Outbound, Outbox};
use crate::models::{NotePermission, ServerEvent};

const TOKEN_LEN: usize = 10;

/// A fresh version token, distinct from `previous`.
pub fn new_token(previous: Option<&str>) -> String {
    loop {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        if Some(token.as_str()) != previous {
            return token;
        }
    }
}

pub fn content_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub session_id: String,
    pub outbox: Outbox,
}

/// In-memory authoritative state of an open note
#[derive(Debug)]
pub struct LiveDocument {
    pub id: String,
    pub owner: Option<String>,
    pub permission: NotePermission,
    pub body: String,
    pub hash: String,
    /// Milliseconds since the epoch
    pub update_time: i64,
    pub otk: String,
    pub dirty: bool,
    /// Bumped on every body change, lets a write tell whether it is still current
    pub revision: u64,
    pub sessions: HashSet<String>,
    pub channels: Vec<Attachment>,
    /// Set once the note left the registry; holders of a stale handle must re-resolve
    pub evicted: bool,
}

impl LiveDocument {
    pub fn new(
        id: impl Into<String>,
        owner: Option<String>,
        permission: NotePermission,
        body: String,
        update_time: i64,
    ) -> Self {
        Self {
            id: id.into(),
            owner,
            permission,
            hash: content_hash(&body),
            body,
            update_time,
            otk: new_token(None),
            dirty: false,
            revision: 0,
            sessions: HashSet::new(),
            channels: Vec::new(),
            evicted: false,
        }
    }

    /// Replace the body; false when it was already equal.
    pub fn replace_body(&mut self, body: String, now_ms: i64) -> bool {
        if self.body == body {
            return false;
        }
        self.hash = content_hash(&body);
        self.body = body;
        self.update_time = now_ms;
        self.dirty = true;
        self.revision += 1;
        true
    }

    /// Swap in a new version token, returning (previous, next).
    pub fn rotate_token(&mut self) -> (String, String) {
        let next = new_token(Some(&self.otk));
        let previous = std::mem::replace(&mut self.otk, next.clone());
        (previous, next)
    }

    /// Clear the dirty flag if nothing changed since `revision` was written.
    pub fn mark_persisted(&mut self, revision: u64) {
        if self.revision == revision {
            self.dirty = false;
        }
    }

    pub fn attach(&mut self, session_id: &str, outbox: Outbox) {
        self.sessions.insert(session_id.to_string());
        self.channels.push(Attachment {
            session_id: session_id.to_string(),
            outbox,
        });
    }

    pub fn detach(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        while let Some(index) = self.channels.iter().position(|c| c.session_id == session_id) {
            self.channels.remove(index);
        }
    }

    /// Attached session ids in join order.
    pub fn roster_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .filter(|c| self.sessions.contains(&c.session_id))
            .filter(|c| seen.insert(c.session_id.as_str()))
            .map(|c| c.session_id.clone())
            .collect()
    }

    pub fn broadcast(&self, event: &ServerEvent) {
        for channel in &self.channels {
            let _ = channel.outbox.send(Outbound::Event(event.clone()));
        }
    }

    pub fn broadcast_except(&self, sender: &str, event: &ServerEvent) {
        for channel in self.channels.iter().filter(|c| c.session_id != sender) {
            let _ = channel.outbox.send(Outbound::Event(event.clone()));
        }
    }
}

/// Registry slot of a live note
#[derive(Debug)]
pub struct DocumentCell {
    pub id: String,
    pub state: Mutex<LiveDocument>,
    /// Held for the whole of a store write of this note
    pub persist_gate: Mutex<()>,
}

#[derive(Default)]
pub struct DocumentRegistry {
    docs: RwLock<HashMap<String, Arc<DocumentCell>>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve(&self, id: &str) -> Option<Arc<DocumentCell>> {
        self.docs.read().await.get(id).cloned()
    }

    /// Insert `doc` unless a live note with its id already exists; either way
    /// return the note every caller must share.
    pub async fn materialize(&self, doc: LiveDocument) -> Arc<DocumentCell> {
        let mut docs = self.docs.write().await;
        docs.entry(doc.id.clone())
            .or_insert_with(|| {
                Arc::new(DocumentCell {
                    id: doc.id.clone(),
                    state: Mutex::new(doc),
                    persist_gate: Mutex::new(()),
                })
            })
            .clone()
    }

    /// Remove the note if `cell` is still the registered instance.
    pub async fn evict(&self, cell: &Arc<DocumentCell>) -> bool {
        let mut docs = self.docs.write().await;
        let is_current = docs
            .get(&cell.id)
            .is_some_and(|current| Arc::ptr_eq(current, cell));
        if is_current {
            docs.remove(&cell.id);
        }
        is_current
    }

    pub async fn all(&self) -> Vec<Arc<DocumentCell>> {
        self.docs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }
}
