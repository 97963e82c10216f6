use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use uuid::Uuid;

use crate::models::{NotePermission, NoteRecord, StoredNote};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Note '{0}' not found")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable note storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a note. A note that was never created is `StoreError::NotFound`.
    async fn read_document(&self, id: &str) -> Result<StoredNote, StoreError>;

    /// Upsert title and body, both already in the persisted encoding.
    async fn save_document(&self, id: &str, title: &str, body: &str) -> Result<(), StoreError>;

    async fn count_documents(&self) -> Result<i64, StoreError>;
}

/// Note and user records owned by the application layer.
#[async_trait]
pub trait NoteDomain: Send + Sync {
    fn title_of(&self, body: &str) -> String {
        note_title(body)
    }

    fn is_valid_id(&self, candidate: &str) -> bool {
        decode_note_id(candidate).is_some()
    }

    async fn find_or_create(
        &self,
        id: &str,
        default_permission: NotePermission,
    ) -> Result<NoteRecord, StoreError>;

    async fn find(&self, id: &str) -> Result<Option<NoteRecord>, StoreError>;

    async fn update_permission(
        &self,
        note: NoteRecord,
        permission: NotePermission,
    ) -> Result<NoteRecord, StoreError>;

    async fn count_users(&self) -> Result<i64, StoreError>;
}

/// Title of a markdown note: the text of its first non-empty level-1 heading.
pub fn note_title(body: &str) -> String {
    let mut heading: Option<String> = None;
    for event in Parser::new(body) {
        match event {
            Event::Start(Tag::Heading { level: HeadingLevel::H1, .. }) => {
                heading = Some(String::new());
            }
            Event::End(TagEnd::Heading(HeadingLevel::H1)) => {
                let title = heading.take().unwrap_or_default();
                let title = title.trim();
                if !title.is_empty() {
                    return title.to_string();
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(heading) = heading.as_mut() {
                    heading.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(heading) = heading.as_mut() {
                    heading.push(' ');
                }
            }
            _ => {}
        }
    }
    "Untitled".to_string()
}

/// Canonical note id for a path segment, which is either a hyphenated UUID or
/// the unpadded base64url form of its 16 bytes.
pub fn decode_note_id(segment: &str) -> Option<String> {
    if let Ok(uuid) = Uuid::parse_str(segment) {
        if segment.len() == 36 {
            return Some(uuid.hyphenated().to_string());
        }
    }
    if segment.len() != 22 {
        return None;
    }
    let bytes = general_purpose::URL_SAFE_NO_PAD.decode(segment).ok()?;
    let uuid = Uuid::from_slice(&bytes).ok()?;
    Some(uuid.hyphenated().to_string())
}

/// Short link form of a note id, the inverse of [`decode_note_id`].
pub fn encode_note_id(id: &Uuid) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(id.as_bytes())
}
