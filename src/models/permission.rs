use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Who may edit a note
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NotePermission {
    /// Anyone may edit
    Freely,
    /// Signed-in users may edit
    Editable,
    /// Only the owner may edit
    Locked,
}

impl NotePermission {
    /// Policy for a note loaded without a stored permission.
    pub fn default_for_owner(owner: Option<&str>) -> Self {
        match owner {
            Some(owner) if !owner.is_empty() && owner != "null" => NotePermission::Editable,
            _ => NotePermission::Freely,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotePermission::Freely => "freely",
            NotePermission::Editable => "editable",
            NotePermission::Locked => "locked",
        }
    }
}

impl fmt::Display for NotePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotePermission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "freely" => Ok(NotePermission::Freely),
            "editable" => Ok(NotePermission::Editable),
            "locked" => Ok(NotePermission::Locked),
            other => Err(format!("Unknown note permission '{}'", other)),
        }
    }
}
