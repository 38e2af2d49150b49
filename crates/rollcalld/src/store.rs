use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{AttendanceDecision, AttendanceOutcome, ReasonCode};
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("invalid stored outcome: {0}")]
    InvalidOutcome(String),
    #[error("invalid stored reason code: {0}")]
    InvalidReason(String),
    #[error("invalid stored timestamp: {0}")]
    InvalidTimestamp(String),
}

/// SQLite-backed attendance ledger.
///
/// Every decision is stored for audit, rejections included. Only accepted
/// decisions count as entries for the daily limit. Days are stored as
/// `YYYY-MM-DD` and timestamps as RFC 3339.
#[derive(Clone)]
pub struct AttendanceStore {
    conn: Connection,
}

impl AttendanceStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS decisions (
                     attempt_id TEXT PRIMARY KEY,
                     user TEXT,
                     day TEXT NOT NULL,
                     outcome TEXT NOT NULL,
                     reason TEXT,
                     confidence REAL NOT NULL,
                     blink_count INTEGER NOT NULL,
                     decided_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_decisions_user_day ON decisions(user, day);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Persist a decision. Decisions are immutable; a second write for the
    /// same attempt is rejected by the primary key.
    pub async fn record(&self, decision: &AttendanceDecision) -> Result<(), StoreError> {
        let attempt_id = decision.attempt_id.to_string();
        let user = decision.user_id.clone();
        let day = decision.date.to_string();
        let outcome = decision.outcome.as_str();
        let reason = decision.reason.map(ReasonCode::code);
        let confidence = f64::from(decision.confidence);
        let blink_count = decision.blink_count;
        let decided_at = decision.decided_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO decisions (attempt_id, user, day, outcome, reason, confidence, blink_count, decided_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        attempt_id,
                        user,
                        day,
                        outcome,
                        reason,
                        confidence,
                        blink_count,
                        decided_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Count accepted entries for `user` on `day`.
    pub async fn count_accepted(&self, user: &str, day: NaiveDate) -> Result<u32, StoreError> {
        let user = user.to_string();
        let day = day.to_string();
        self.conn
            .call(move |conn| {
                let count: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM decisions
                     WHERE user = ?1 AND day = ?2 AND outcome = 'accepted'",
                    [&user, &day],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    /// All decisions recorded for `user` on `day`, oldest first.
    pub async fn list_for_user(
        &self,
        user: &str,
        day: NaiveDate,
    ) -> Result<Vec<EntryInfo>, StoreError> {
        let user = user.to_string();
        let day_str = day.to_string();

        let rows: Vec<(String, String, Option<String>, f64, u32, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT attempt_id, outcome, reason, confidence, blink_count, decided_at
                     FROM decisions WHERE user = ?1 AND day = ?2 ORDER BY decided_at",
                )?;
                let rows = stmt.query_map([&user, &day_str], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (attempt_id, outcome, reason, confidence, blink_count, decided_at) in rows {
            let outcome = AttendanceOutcome::parse(&outcome)
                .ok_or_else(|| StoreError::InvalidOutcome(outcome.clone()))?;
            let reason = reason
                .map(|code| ReasonCode::parse(&code).ok_or(StoreError::InvalidReason(code)))
                .transpose()?;
            let decided_at = DateTime::parse_from_rfc3339(&decided_at)
                .map_err(|_| StoreError::InvalidTimestamp(decided_at.clone()))?
                .with_timezone(&Utc);
            entries.push(EntryInfo {
                attempt_id,
                day,
                outcome,
                reason,
                confidence,
                blink_count,
                decided_at,
            });
        }
        Ok(entries)
    }

    /// Count all stored decisions.
    pub async fn count_all(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }
}

/// A stored decision as reported back to clients.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntryInfo {
    pub attempt_id: String,
    pub day: NaiveDate,
    pub outcome: AttendanceOutcome,
    pub reason: Option<ReasonCode>,
    pub confidence: f64,
    pub blink_count: u32,
    pub decided_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn decision(user: Option<&str>, outcome: AttendanceOutcome) -> AttendanceDecision {
        AttendanceDecision {
            attempt_id: Uuid::new_v4(),
            user_id: user.map(str::to_string),
            date: day(),
            outcome,
            reason: match outcome {
                AttendanceOutcome::Accepted => None,
                AttendanceOutcome::RejectedDuplicate => Some(ReasonCode::RejectedDuplicate),
                AttendanceOutcome::RejectedLowConfidence => {
                    Some(ReasonCode::LowIdentityConfidence)
                }
                AttendanceOutcome::RejectedLivenessFailed => Some(ReasonCode::LivenessTimeout),
            },
            confidence: 0.9,
            blink_count: 2,
            decided_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_only_accepted_entries_count() {
        let store = AttendanceStore::open(Path::new(":memory:")).await.unwrap();

        store
            .record(&decision(Some("alice"), AttendanceOutcome::Accepted))
            .await
            .unwrap();
        store
            .record(&decision(
                Some("alice"),
                AttendanceOutcome::RejectedLivenessFailed,
            ))
            .await
            .unwrap();
        store
            .record(&decision(Some("alice"), AttendanceOutcome::RejectedDuplicate))
            .await
            .unwrap();

        assert_eq!(store.count_accepted("alice", day()).await.unwrap(), 1);
        assert_eq!(store.count_all().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_counts_are_per_user_and_day() {
        let store = AttendanceStore::open(Path::new(":memory:")).await.unwrap();

        store
            .record(&decision(Some("alice"), AttendanceOutcome::Accepted))
            .await
            .unwrap();
        let mut yesterday = decision(Some("bob"), AttendanceOutcome::Accepted);
        yesterday.date = day().pred_opt().unwrap();
        store.record(&yesterday).await.unwrap();

        assert_eq!(store.count_accepted("bob", day()).await.unwrap(), 0);
        assert_eq!(store.count_accepted("alice", day()).await.unwrap(), 1);
        assert_eq!(
            store
                .count_accepted("bob", day().pred_opt().unwrap())
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_face_is_stored_without_user() {
        let store = AttendanceStore::open(Path::new(":memory:")).await.unwrap();
        store
            .record(&decision(None, AttendanceOutcome::RejectedLowConfidence))
            .await
            .unwrap();
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_decision_written_once() {
        let store = AttendanceStore::open(Path::new(":memory:")).await.unwrap();
        let d = decision(Some("alice"), AttendanceOutcome::Accepted);
        store.record(&d).await.unwrap();
        assert!(store.record(&d).await.is_err());
        assert_eq!(store.count_accepted("alice", day()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_for_user() {
        let store = AttendanceStore::open(Path::new(":memory:")).await.unwrap();
        let first = decision(Some("alice"), AttendanceOutcome::Accepted);
        let mut second = decision(Some("alice"), AttendanceOutcome::RejectedDuplicate);
        second.decided_at = first.decided_at + chrono::Duration::minutes(5);
        store.record(&first).await.unwrap();
        store.record(&second).await.unwrap();
        store
            .record(&decision(Some("bob"), AttendanceOutcome::Accepted))
            .await
            .unwrap();

        let entries = store.list_for_user("alice", day()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attempt_id, first.attempt_id.to_string());
        assert_eq!(entries[0].outcome, AttendanceOutcome::Accepted);
        assert_eq!(entries[0].reason, None);
        assert_eq!(entries[1].outcome, AttendanceOutcome::RejectedDuplicate);
        assert_eq!(entries[1].reason, Some(ReasonCode::RejectedDuplicate));
        assert_eq!(entries[1].blink_count, 2);
    }
}
