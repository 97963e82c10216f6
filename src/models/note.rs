use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NotePermission;

/// Note row as read by the realtime loader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredNote {
    pub id: String,
    pub owner: Option<String>,
    /// Body in the store's persisted encoding
    pub content: Option<String>,
    pub update_time: DateTime<Utc>,
}

/// Note metadata record of the domain layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteRecord {
    pub id: String,
    pub owner: Option<String>,
    pub permission: NotePermission,
}
