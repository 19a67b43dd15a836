use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub request_id: String,
    pub sender_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}
