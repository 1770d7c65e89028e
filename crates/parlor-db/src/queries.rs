use chrono::{DateTime, SubsecRound, Utc};
use parlor_types::models::{Message, MessageType};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

use crate::models::{MessageRow, NewMessage, format_timestamp, parse_timestamp};
use crate::{Database, Result, StoreError};

/// Page size used when a caller has no reason to pick another.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

impl Database {
    // -- Messages --

    /// Insert a message, assigning its id and timestamp inside the write lock.
    pub fn append(&self, new: NewMessage) -> Result<Message> {
        self.append_at(new, Utc::now())
    }

    pub(crate) fn append_at(&self, new: NewMessage, now: DateTime<Utc>) -> Result<Message> {
        validate(&new)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let message = insert_message(&tx, new, now)?;
            tx.commit()?;
            Ok(message)
        })
    }

    /// Messages with `id > cursor`, oldest first, at most `limit` of them.
    pub fn query_after(&self, cursor: i64, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages_after(conn, cursor, limit))
    }

    /// Drop the whole log and restart the id sequence at 1.
    pub fn clear_all(&self) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM messages", [])?;
            tx.execute("DELETE FROM sqlite_sequence WHERE name = 'messages'", [])?;
            tx.commit()?;
            info!("Cleared chat log ({} messages removed)", removed);
            Ok(())
        })
    }

    pub fn message_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
        })
    }
}

fn validate(new: &NewMessage) -> Result<()> {
    if new.username.trim().is_empty() {
        return Err(StoreError::validation("username must not be empty"));
    }
    if new.message_type == MessageType::Text
        && new.content.as_deref().is_none_or(|c| c.trim().is_empty())
    {
        return Err(StoreError::validation("message must not be empty"));
    }
    Ok(())
}

fn insert_message(tx: &Transaction<'_>, new: NewMessage, now: DateTime<Utc>) -> Result<Message> {
    // Never stamp a row earlier than the newest one, even if the wall clock
    // stepped backwards, so id order and timestamp order agree.
    let newest: Option<String> =
        tx.query_row("SELECT MAX(timestamp) FROM messages", [], |row| row.get(0))?;
    let mut timestamp = now.trunc_subsecs(3);
    if let Some(newest) = newest.as_deref().and_then(parse_timestamp) {
        if newest > timestamp {
            timestamp = newest;
        }
    }

    tx.execute(
        "INSERT INTO messages (username, user_color, message_type, content, file_name, file_size, ip_address, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            new.username,
            new.user_color,
            new.message_type.as_str(),
            new.content,
            new.file_name,
            new.file_size,
            new.ip_address,
            format_timestamp(timestamp),
        ],
    )?;

    Ok(Message {
        id: tx.last_insert_rowid(),
        username: new.username,
        user_color: new.user_color,
        message_type: new.message_type,
        content: new.content,
        file_name: new.file_name,
        file_size: new.file_size,
        ip_address: new.ip_address,
        timestamp,
    })
}

fn query_messages_after(conn: &Connection, cursor: i64, limit: u32) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, user_color, message_type, content, file_name, file_size, ip_address, timestamp
         FROM messages
         WHERE id > ?1
         ORDER BY timestamp ASC, id ASC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![cursor, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                username: row.get(1)?,
                user_color: row.get(2)?,
                message_type: row.get(3)?,
                content: row.get(4)?,
                file_name: row.get(5)?,
                file_size: row.get(6)?,
                ip_address: row.get(7)?,
                timestamp: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(MessageRow::into_message).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn text(username: &str, content: &str) -> NewMessage {
        NewMessage::text(username, "#3366cc", content, "127.0.0.1")
    }

    #[test]
    fn ids_are_gap_free_from_one() {
        let db = Database::open_in_memory().unwrap();
        let ids: Vec<i64> = (0..5)
            .map(|i| db.append(text("alice", &format!("msg {}", i))).unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn append_then_query_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let stored = db.append(text("alice", "hi")).unwrap();

        let page = db.query_after(0, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content.as_deref(), Some("hi"));
        assert_eq!(page[0].message_type, MessageType::Text);
        assert_eq!(page[0], stored);

        db.clear_all().unwrap();
        assert!(db.query_after(0, DEFAULT_PAGE_SIZE).unwrap().is_empty());
    }

    #[test]
    fn rejects_blank_username_and_text() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.append(text("   ", "hello")), Err(StoreError::Validation(_))));
        assert!(matches!(db.append(text("alice", " \n ")), Err(StoreError::Validation(_))));

        let mut no_content = text("alice", "x");
        no_content.content = None;
        assert!(matches!(db.append(no_content), Err(StoreError::Validation(_))));

        assert_eq!(db.message_count().unwrap(), 0);
    }

    #[test]
    fn attachments_may_have_no_caption() {
        let db = Database::open_in_memory().unwrap();
        let msg = db
            .append(NewMessage::attachment("bob", "#dc3912", MessageType::File, "", "abc_1_doc.pdf", 2048, "::1"))
            .unwrap();
        assert_eq!(msg.file_name.as_deref(), Some("abc_1_doc.pdf"));
        assert!(msg.content.is_none());
    }

    #[test]
    fn query_after_respects_cursor_and_limit() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..10 {
            db.append(text("alice", &format!("m{}", i))).unwrap();
        }

        let page = db.query_after(4, 3).unwrap();
        let ids: Vec<i64> = page.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 6, 7]);

        assert!(db.query_after(10, 50).unwrap().is_empty());
        assert_eq!(db.query_after(-3, 50).unwrap().len(), 10);
        assert!(db.query_after(0, 0).unwrap().is_empty());
    }

    #[test]
    fn query_after_is_repeatable() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..4 {
            db.append(text("carol", &format!("m{}", i))).unwrap();
        }
        assert_eq!(db.query_after(1, 50).unwrap(), db.query_after(1, 50).unwrap());
    }

    #[test]
    fn page_is_capped_at_default_size() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..60 {
            db.append(text("dave", &format!("m{}", i))).unwrap();
        }
        let page = db.query_after(0, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(page.len(), 50);
        assert_eq!(page.first().unwrap().id, 1);
        assert_eq!(page.last().unwrap().id, 50);
    }

    #[test]
    fn clear_all_is_idempotent_and_resets_ids() {
        let db = Database::open_in_memory().unwrap();
        db.append(text("alice", "one")).unwrap();
        db.append(text("alice", "two")).unwrap();

        db.clear_all().unwrap();
        assert_eq!(db.message_count().unwrap(), 0);
        db.clear_all().unwrap();
        assert_eq!(db.message_count().unwrap(), 0);

        assert_eq!(db.append(text("alice", "fresh")).unwrap().id, 1);
    }

    #[test]
    fn clear_all_on_empty_log_succeeds() {
        let db = Database::open_in_memory().unwrap();
        db.clear_all().unwrap();
        assert_eq!(db.append(text("alice", "first")).unwrap().id, 1);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let db = Database::open_in_memory().unwrap();
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(30);

        let first = db.append_at(text("alice", "a"), later).unwrap();
        let second = db.append_at(text("alice", "b"), earlier).unwrap();

        assert!(second.id > first.id);
        assert_eq!(second.timestamp, first.timestamp);

        let page = db.query_after(0, 50).unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn concurrent_appends_get_distinct_ids() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let db = db.clone();
                thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            db.append(text(&format!("user{}", worker), &format!("m{}", i)))
                                .unwrap()
                                .id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=200).collect::<Vec<_>>());

        // Timestamp order must agree with id order.
        let mut cursor = 0;
        let mut previous = None;
        loop {
            let page = db.query_after(cursor, 50).unwrap();
            if page.is_empty() {
                break;
            }
            for m in &page {
                assert_eq!(m.id, cursor + 1);
                if let Some(prev) = previous {
                    assert!(m.timestamp >= prev);
                }
                previous = Some(m.timestamp);
                cursor = m.id;
            }
        }
        assert_eq!(cursor, 200);
    }
}
