use std::sync::Arc;
use std::time::Duration;

use parlor_db::Database;

use crate::attachments::AttachmentStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub attachments: AttachmentStore,
    /// How far back a post still makes its author "online".
    pub presence_window: Duration,
}
