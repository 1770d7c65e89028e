//! Database row types. These map directly to SQLite rows and convert into the
//! shared `parlor-types` models at the edge of this crate.

use chrono::{DateTime, NaiveDateTime, Utc};
use parlor_types::models::{Message, MessageType};
use tracing::warn;

/// Fixed-width UTC text, so ordering the column as text orders it by time.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        // Rows written by SQLite's datetime('now') have no fraction.
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map(|ndt| ndt.and_utc())
        .ok()
}

/// Everything the caller supplies for an insert. `id` and `timestamp` are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub username: String,
    pub user_color: String,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub ip_address: String,
}

impl NewMessage {
    pub fn text(username: &str, user_color: &str, content: &str, ip_address: &str) -> Self {
        Self {
            username: username.to_string(),
            user_color: user_color.to_string(),
            message_type: MessageType::Text,
            content: Some(content.to_string()),
            file_name: None,
            file_size: None,
            ip_address: ip_address.to_string(),
        }
    }

    /// An image or file message pointing at a stored attachment. An empty
    /// caption is stored as NULL.
    pub fn attachment(
        username: &str,
        user_color: &str,
        message_type: MessageType,
        caption: &str,
        file_name: &str,
        file_size: i64,
        ip_address: &str,
    ) -> Self {
        Self {
            username: username.to_string(),
            user_color: user_color.to_string(),
            message_type,
            content: (!caption.is_empty()).then(|| caption.to_string()),
            file_name: Some(file_name.to_string()),
            file_size: Some(file_size),
            ip_address: ip_address.to_string(),
        }
    }
}

pub struct MessageRow {
    pub id: i64,
    pub username: String,
    pub user_color: String,
    pub message_type: String,
    pub content: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub ip_address: Option<String>,
    pub timestamp: String,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        let message_type = self.message_type.parse().unwrap_or_else(|e| {
            warn!("Corrupt message_type on message {}: {}", self.id, e);
            MessageType::Text
        });
        let timestamp = parse_timestamp(&self.timestamp).unwrap_or_else(|| {
            warn!("Corrupt timestamp '{}' on message {}", self.timestamp, self.id);
            DateTime::default()
        });

        Message {
            id: self.id,
            username: self.username,
            user_color: self.user_color,
            message_type,
            content: self.content,
            file_name: self.file_name,
            file_size: self.file_size,
            ip_address: self.ip_address.unwrap_or_default(),
            timestamp,
        }
    }
}
