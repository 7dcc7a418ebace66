use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Role;

/// A message in the conversation between a shop and one customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub shop_id: String,
    pub customer_id: String,
    pub sender: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
