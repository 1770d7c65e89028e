//! Online users, derived from the message log on every call.
//!
//! There is no presence table: a user is online if they posted within the
//! window. A message stamped exactly at `now - window` still counts.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parlor_types::models::OnlineUser;
use rusqlite::Connection;
use tracing::warn;

use crate::models::{format_timestamp, parse_timestamp};
use crate::{Database, Result};

pub const DEFAULT_PRESENCE_WINDOW: Duration = Duration::from_secs(120);

pub const MAX_ONLINE_USERS: u32 = 50;

impl Database {
    pub fn active_users(&self, window: Duration) -> Result<Vec<OnlineUser>> {
        self.active_users_at(Utc::now(), window)
    }

    /// Users whose latest message is at or after `now - window`, most recently
    /// active first. Each user appears once, with the colour of their latest row.
    pub fn active_users_at(&self, now: DateTime<Utc>, window: Duration) -> Result<Vec<OnlineUser>> {
        let cutoff = TimeDelta::from_std(window)
            .ok()
            .and_then(|delta| now.checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.with_conn(|conn| query_active_users(conn, &format_timestamp(cutoff), MAX_ONLINE_USERS))
    }
}

fn query_active_users(conn: &Connection, cutoff: &str, limit: u32) -> Result<Vec<OnlineUser>> {
    // id order equals timestamp order, so MAX(id) is each user's latest row.
    let mut stmt = conn.prepare(
        "SELECT m.username, m.user_color, m.timestamp
         FROM messages m
         JOIN (
             SELECT username, MAX(id) AS last_id
             FROM messages
             WHERE timestamp >= ?1
             GROUP BY username
         ) latest ON m.id = latest.last_id
         ORDER BY m.id DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![cutoff, limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(username, user_color, raw)| {
            let last_seen = parse_timestamp(&raw).unwrap_or_else(|| {
                warn!("Corrupt timestamp '{}' for user {}", raw, username);
                DateTime::default()
            });
            OnlineUser {
                username,
                user_color,
                last_seen,
            }
        })
        .collect())
}
