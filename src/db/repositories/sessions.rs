use anyhow::{Context, Result};
use log::debug;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{helpers::to_i32, models::SleepSession, Database};

const SESSION_COLUMNS: &str = "id, start_time_ms, end_time_ms, quality_rating";

fn row_to_session(row: &Row) -> Result<SleepSession> {
    let quality_rating: i64 = row.get("quality_rating")?;

    Ok(SleepSession {
        id: row.get("id")?,
        start_time_ms: row.get("start_time_ms")?,
        end_time_ms: row.get("end_time_ms")?,
        quality_rating: to_i32(quality_rating, "quality_rating")?,
    })
}

impl Database {
    /// Persists a new session and returns the id assigned by SQLite. The
    /// `id` field of `session` is ignored.
    pub async fn insert_session(&self, session: &SleepSession) -> Result<i64> {
        let record = session.clone();
        self.execute_write(move |conn, notify| {
            conn.execute(
                "INSERT INTO sleep_sessions (start_time_ms, end_time_ms, quality_rating)
                 VALUES (?1, ?2, ?3)",
                params![
                    record.start_time_ms,
                    record.end_time_ms,
                    record.quality_rating,
                ],
            )
            .context("failed to insert sleep session")?;
            notify();
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Overwrites every column of the row keyed by `session.id`. Updating a
    /// row that does not exist is a no-op.
    pub async fn update_session(&self, session: &SleepSession) -> Result<()> {
        let record = session.clone();
        self.execute_write(move |conn, notify| {
            let rows_affected = conn
                .execute(
                    "UPDATE sleep_sessions
                     SET start_time_ms = ?1,
                         end_time_ms = ?2,
                         quality_rating = ?3
                     WHERE id = ?4",
                    params![
                        record.start_time_ms,
                        record.end_time_ms,
                        record.quality_rating,
                        record.id,
                    ],
                )
                .context("failed to update sleep session")?;

            if rows_affected == 0 {
                debug!("Update skipped: sleep session {} not found", record.id);
            } else {
                notify();
            }
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Option<SleepSession>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sleep_sessions WHERE id = ?1"
            ))?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;

            Ok(session)
        })
        .await
    }

    /// Session with the highest id, i.e. the one inserted last.
    pub async fn get_most_recent_session(&self) -> Result<Option<SleepSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sleep_sessions ORDER BY id DESC LIMIT 1"
            ))?;

            let mut rows = stmt.query([])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    /// All sessions, newest id first. Pair with [`Database::subscribe_changes`]
    /// to follow the table as it changes.
    pub async fn list_sessions(&self) -> Result<Vec<SleepSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sleep_sessions ORDER BY id DESC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    pub async fn session_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM sleep_sessions", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    pub async fn clear_sessions(&self) -> Result<()> {
        self.execute_write(|conn, notify| {
            let removed = conn
                .execute("DELETE FROM sleep_sessions", [])
                .context("failed to clear sleep sessions")?;
            notify();
            debug!("Cleared {removed} sleep sessions");
            Ok(())
        })
        .await
    }
}
