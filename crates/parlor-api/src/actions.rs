//! The fixed action set and its dispatcher. Every outcome, good or bad,
//! leaves here as an [`Envelope`].

use std::collections::HashMap;
use std::num::IntErrorKind;
use std::str::FromStr;

use parlor_db::Database;
use parlor_db::models::NewMessage;
use parlor_db::queries::DEFAULT_PAGE_SIZE;
use parlor_types::api::Envelope;
use tracing::{debug, error, info};

use crate::attachments::Upload;
use crate::error::ChatError;
use crate::sanitize::{default_color, escape_html};
use crate::state::AppState;

/// Name used when a client sends no username at all.
pub const DEFAULT_USERNAME: &str = "Guest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SendMessage,
    GetMessages,
    GetOnlineUsers,
    ClearChat,
    Upload,
    Ping,
}

impl FromStr for Action {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_message" => Ok(Self::SendMessage),
            "get_messages" => Ok(Self::GetMessages),
            "get_online_users" => Ok(Self::GetOnlineUsers),
            "clear_chat" => Ok(Self::ClearChat),
            "upload" => Ok(Self::Upload),
            "ping" => Ok(Self::Ping),
            other => Err(ChatError::UnknownAction(other.to_string())),
        }
    }
}

/// One inbound call, already lifted off the transport.
#[derive(Debug, Default)]
pub struct ActionRequest {
    pub fields: HashMap<String, String>,
    pub file: Option<Upload>,
    pub ip_address: String,
}

impl ActionRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

pub async fn dispatch(state: &AppState, request: ActionRequest) -> Envelope {
    let name = request.field("action").unwrap_or_default().to_string();
    let result = match name.parse::<Action>() {
        Ok(action) => {
            debug!("Dispatching {:?} from {}", action, request.ip_address);
            run(state, action, request).await
        }
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        debug!("Action '{}' failed: {}", name, e);
        e.to_envelope()
    })
}

async fn run(state: &AppState, action: Action, request: ActionRequest) -> Result<Envelope, ChatError> {
    match action {
        Action::SendMessage => send_message(state, request).await,
        Action::GetMessages => get_messages(state, &request).await,
        Action::GetOnlineUsers => get_online_users(state).await,
        Action::ClearChat => clear_chat(state).await,
        Action::Upload => upload(state, request).await,
        Action::Ping => Ok(Envelope::ok().with("message", "pong")),
    }
}

struct Author {
    username: String,
    color: String,
}

impl Author {
    fn from_request(request: &ActionRequest) -> Result<Self, ChatError> {
        let username = request.field("username").unwrap_or(DEFAULT_USERNAME).trim();
        if username.is_empty() {
            return Err(ChatError::Validation("username must not be empty".into()));
        }

        let color = request
            .field("user_color")
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| default_color(username))
            .to_string();

        Ok(Self {
            username: escape_html(username),
            color,
        })
    }
}

/// Run blocking store work off the async runtime.
async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, ChatError>
where
    F: FnOnce(&Database) -> parlor_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Persistence("store task failed".into())
        })?
        .map_err(|e| {
            if !matches!(e, parlor_db::StoreError::Validation(_)) {
                error!("Store error: {}", e);
            }
            ChatError::from(e)
        })
}

async fn send_message(state: &AppState, request: ActionRequest) -> Result<Envelope, ChatError> {
    let author = Author::from_request(&request)?;
    let text = request.field("message").unwrap_or_default().trim();
    if text.is_empty() {
        return Err(ChatError::Validation("message must not be empty".into()));
    }

    let new = NewMessage::text(&author.username, &author.color, &escape_html(text), &request.ip_address);
    let stored = with_db(state, move |db| db.append(new)).await?;

    debug!("Message {} from {}", stored.id, stored.username);
    Ok(Envelope::ok().with("message", "sent").with("id", stored.id))
}

async fn get_messages(state: &AppState, request: &ActionRequest) -> Result<Envelope, ChatError> {
    let cursor = request.field("last_id").map(parse_cursor).unwrap_or(0);

    let messages = with_db(state, move |db| db.query_after(cursor, DEFAULT_PAGE_SIZE)).await?;
    Ok(Envelope::ok().with("messages", serde_json::to_value(&messages)?))
}

/// A cursor past the largest id means "nothing newer"; anything that is not a
/// number at all restarts from the beginning.
fn parse_cursor(raw: &str) -> i64 {
    match raw.trim().parse::<i64>() {
        Ok(cursor) => cursor,
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => i64::MAX,
        Err(_) => 0,
    }
}

async fn get_online_users(state: &AppState) -> Result<Envelope, ChatError> {
    let window = state.presence_window;
    let users = with_db(state, move |db| db.active_users(window)).await?;
    Ok(Envelope::ok().with("users", serde_json::to_value(&users)?))
}

async fn clear_chat(state: &AppState) -> Result<Envelope, ChatError> {
    with_db(state, |db| db.clear_all()).await?;
    info!("Chat history cleared");
    Ok(Envelope::ok().with("message", "chat cleared"))
}

/// File write and log append form one unit: if the append fails, the written
/// file is removed again.
async fn upload(state: &AppState, mut request: ActionRequest) -> Result<Envelope, ChatError> {
    let author = Author::from_request(&request)?;
    let caption = escape_html(request.field("message").unwrap_or_default().trim());

    let stored = state.attachments.store(request.file.take()).await?;

    let new = NewMessage::attachment(
        &author.username,
        &author.color,
        stored.message_type,
        &caption,
        &stored.stored_name,
        stored.size as i64,
        &request.ip_address,
    );

    match with_db(state, move |db| db.append(new)).await {
        Ok(message) => {
            info!("Upload {} attached to message {}", stored.stored_name, message.id);
            Ok(Envelope::ok()
                .with("message", "uploaded")
                .with("id", message.id)
                .with("file_path", stored.public_path()))
        }
        Err(e) => {
            if let Err(cleanup) = state.attachments.delete(&stored.stored_name).await {
                error!("Failed to remove orphaned attachment {}: {}", stored.stored_name, cleanup);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_actions() {
        assert_eq!("ping".parse::<Action>().unwrap(), Action::Ping);
        assert_eq!("get_online_users".parse::<Action>().unwrap(), Action::GetOnlineUsers);
        assert!(matches!("".parse::<Action>(), Err(ChatError::UnknownAction(ref a)) if a.is_empty()));
        assert!(matches!("PING".parse::<Action>(), Err(ChatError::UnknownAction(_))));
    }

    #[test]
    fn cursor_overflow_means_nothing_newer() {
        assert_eq!(parse_cursor("42"), 42);
        assert_eq!(parse_cursor(" 7 "), 7);
        assert_eq!(parse_cursor("99999999999999999999"), i64::MAX);
        assert_eq!(parse_cursor("-99999999999999999999"), 0);
        assert_eq!(parse_cursor("abc"), 0);
        assert_eq!(parse_cursor(""), 0);
    }

    fn request(fields: &[(&str, &str)]) -> ActionRequest {
        ActionRequest {
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn author_defaults_and_escapes() {
        let guest = Author::from_request(&request(&[])).unwrap();
        assert_eq!(guest.username, DEFAULT_USERNAME);
        assert_eq!(guest.color, default_color(DEFAULT_USERNAME));

        let named = Author::from_request(&request(&[("username", "  <i>x</i> "), ("user_color", "#abcdef")])).unwrap();
        assert_eq!(named.username, "&lt;i&gt;x&lt;/i&gt;");
        assert_eq!(named.color, "#abcdef");

        assert!(matches!(
            Author::from_request(&request(&[("username", "   ")])),
            Err(ChatError::Validation(_))
        ));
    }
}
