use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a message carries. Decides which of the optional fields are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    /// Attachments with an `image/*` MIME type render inline; everything else is a plain file.
    pub fn for_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

/// A single entry of the shared chat log. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub username: String,
    pub user_color: String,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    /// Kept for audit only; never sent to other clients.
    #[serde(skip_serializing, default)]
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
}

/// A user seen in the log within the presence window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub username: String,
    pub user_color: String,
    pub last_seen: DateTime<Utc>,
}
