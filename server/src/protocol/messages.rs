use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Wall-clock format the service expects in outbound payloads
const MESSAGE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outbound question payload, serialized to JSON and then encrypted by
/// the wire codec before hitting the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub connection_id: Option<String>,
    pub request_id: Uuid,
    pub client_code: Option<String>,
    pub request_to_generate_greeting_message: u8,
    pub language_code: String,
    pub user_message: String,
    /// Opaque attribute blob echoed back from the last server update;
    /// `{}` until the server has sent one.
    pub session_attributes: Value,
    /// UTC, formatted "YYYY-MM-DD HH:MM:SS"
    pub user_message_date_and_time: String,
    pub user_timezone: String,
    pub conversation_id: Uuid,
    pub course_id: String,
}

impl ChatRequest {
    /// Current UTC timestamp in the service's expected format
    pub fn now_timestamp() -> String {
        Utc::now().format(MESSAGE_TIMESTAMP_FORMAT).to_string()
    }
}

/// Inbound message, decrypted from the wire. The service streams
/// chunks; only the two fields below matter to the engine and all
/// others are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    /// When present, replaces the session's attribute blob wholesale
    #[serde(default)]
    pub session_attributes: Option<Value>,
    /// Terminal marker: the fully-formed answer text
    #[serde(default)]
    pub complete_response: Option<String>,
}
