use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::NotePermission;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct UserStatusMessage {
    #[serde(default)]
    pub idle: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct UserChangedMessage {
    /// Replacement credential, when the client signed in or out
    #[serde(default)]
    pub token: Option<String>,
}

/// Events sent by a client on its channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "refresh")]
    Refresh,
    /// Whole body replacement, codec encoded
    #[serde(rename = "update")]
    Update(String),
    #[serde(rename = "user status")]
    UserStatus(Option<UserStatusMessage>),
    #[serde(rename = "permission")]
    Permission(String),
    #[serde(rename = "user changed")]
    UserChanged(Option<UserChangedMessage>),
    #[serde(rename = "online users")]
    OnlineUsers,
    #[serde(rename = "version")]
    Version,
    #[serde(rename = "cursor focus")]
    CursorFocus(Value),
    #[serde(rename = "cursor activity")]
    CursorActivity(Value),
    #[serde(rename = "cursor blur")]
    CursorBlur,
    /// Edit operation, codec encoded JSON object
    #[serde(rename = "change")]
    Change(String),
    #[serde(rename = "disconnect")]
    Disconnect,
}

impl ClientEvent {
    /// Parse a text frame. Frames without a `data` member are accepted for
    /// events that carry no payload.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        let mut frame: Value = serde_json::from_str(text)?;
        if let Value::Object(map) = &mut frame {
            map.entry("data").or_insert(Value::Null);
        }
        serde_json::from_value(frame)
    }
}

/// Public presence fields of a session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserOut {
    pub id: String,
    pub login: bool,
    pub userid: Option<String>,
    pub color: String,
    pub cursor: Option<Value>,
    pub name: String,
    pub idle: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OnlineUsersMessage {
    pub users: Vec<UserOut>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InfoMessage {
    pub code: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RefreshMessage {
    pub owner: Option<String>,
    pub permission: NotePermission,
    /// Codec encoded body
    pub body: String,
    pub otk: String,
    pub hash: String,
    pub updatetime: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckMessage {
    pub id: String,
    pub hash: String,
    pub updatetime: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PermissionMessage {
    pub permission: NotePermission,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CursorBlurMessage {
    pub id: String,
}

/// Events pushed to a client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "info")]
    Info(InfoMessage),
    #[serde(rename = "refresh")]
    Refresh(RefreshMessage),
    #[serde(rename = "check")]
    Check(CheckMessage),
    /// Codec encoded `OnlineUsersMessage`
    #[serde(rename = "online users")]
    OnlineUsers(String),
    #[serde(rename = "user status")]
    UserStatus(UserOut),
    #[serde(rename = "permission")]
    Permission(PermissionMessage),
    #[serde(rename = "version")]
    Version(String),
    #[serde(rename = "cursor focus")]
    CursorFocus(UserOut),
    #[serde(rename = "cursor activity")]
    CursorActivity(UserOut),
    #[serde(rename = "cursor blur")]
    CursorBlur(CursorBlurMessage),
    /// Codec encoded, stamped edit operation
    #[serde(rename = "change")]
    Change(String),
}
