use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Counters describing who is online right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub online_notes: usize,
    pub online_users: usize,
    pub distinct_online_users: usize,
    pub notes_count: i64,
    pub registered_users: i64,
    pub online_registered_users: usize,
    pub distinct_online_registered_users: usize,
}
