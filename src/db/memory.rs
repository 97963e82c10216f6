use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::models::{NotePermission, NoteRecord, StoredNote};
use crate::services::note_service::{DocumentStore, NoteDomain, StoreError};

#[derive(Debug, Clone)]
struct NoteRow {
    owner: Option<String>,
    permission: NotePermission,
    title: Option<String>,
    content: Option<String>,
    update_time: DateTime<Utc>,
}

/// In-process note store, used when no database is configured.
#[derive(Default)]
pub struct MemoryNotes {
    notes: Mutex<HashMap<String, NoteRow>>,
    users: Mutex<HashSet<String>>,
}

impl MemoryNotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a note with an already encoded body.
    pub fn insert_note(&self, id: &str, owner: Option<&str>, content: &str) {
        let row = NoteRow {
            owner: owner.map(str::to_string),
            permission: NotePermission::default_for_owner(owner),
            title: None,
            content: Some(content.to_string()),
            update_time: Utc::now(),
        };
        self.lock_notes().insert(id.to_string(), row);
    }

    pub fn insert_user(&self, id: &str) {
        self.lock_users().insert(id.to_string());
    }

    pub fn title(&self, id: &str) -> Option<String> {
        self.lock_notes().get(id).and_then(|row| row.title.clone())
    }

    pub fn permission(&self, id: &str) -> Option<NotePermission> {
        self.lock_notes().get(id).map(|row| row.permission)
    }

    fn lock_notes(&self) -> std::sync::MutexGuard<'_, HashMap<String, NoteRow>> {
        self.notes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_users(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryNotes {
    async fn read_document(&self, id: &str) -> Result<StoredNote, StoreError> {
        let notes = self.lock_notes();
        let row = notes.get(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(StoredNote {
            id: id.to_string(),
            owner: row.owner.clone(),
            content: row.content.clone(),
            update_time: row.update_time,
        })
    }

    async fn save_document(&self, id: &str, title: &str, body: &str) -> Result<(), StoreError> {
        let mut notes = self.lock_notes();
        let row = notes.entry(id.to_string()).or_insert_with(|| NoteRow {
            owner: None,
            permission: NotePermission::Freely,
            title: None,
            content: None,
            update_time: Utc::now(),
        });
        row.title = Some(title.to_string());
        row.content = Some(body.to_string());
        row.update_time = Utc::now();
        Ok(())
    }

    async fn count_documents(&self) -> Result<i64, StoreError> {
        Ok(self.lock_notes().len() as i64)
    }
}

#[async_trait]
impl NoteDomain for MemoryNotes {
    async fn find_or_create(
        &self,
        id: &str,
        default_permission: NotePermission,
    ) -> Result<NoteRecord, StoreError> {
        let mut notes = self.lock_notes();
        let row = notes.entry(id.to_string()).or_insert_with(|| NoteRow {
            owner: None,
            permission: default_permission,
            title: None,
            content: None,
            update_time: Utc::now(),
        });
        Ok(NoteRecord {
            id: id.to_string(),
            owner: row.owner.clone(),
            permission: row.permission,
        })
    }

    async fn find(&self, id: &str) -> Result<Option<NoteRecord>, StoreError> {
        Ok(self.lock_notes().get(id).map(|row| NoteRecord {
            id: id.to_string(),
            owner: row.owner.clone(),
            permission: row.permission,
        }))
    }

    async fn update_permission(
        &self,
        note: NoteRecord,
        permission: NotePermission,
    ) -> Result<NoteRecord, StoreError> {
        let mut notes = self.lock_notes();
        let row = notes
            .get_mut(&note.id)
            .ok_or_else(|| StoreError::NotFound(note.id.clone()))?;
        row.permission = permission;
        Ok(NoteRecord {
            permission,
            ..note
        })
    }

    async fn count_users(&self) -> Result<i64, StoreError> {
        Ok(self.lock_users().len() as i64)
    }
}
