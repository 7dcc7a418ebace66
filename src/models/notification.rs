use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log record written alongside every pushed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    pub channel: String,
    pub event: String,
    pub message: String,
    pub order_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
