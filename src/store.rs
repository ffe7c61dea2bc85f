use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::{
    SessionId, SessionStatus, SetFields, SetId, UserId, WorkoutSession, WorkoutSet,
};
use crate::summary::Feedback;
use crate::timer::{Clock, SystemClock};

/// Read side used to resume a session.
pub trait ActiveWorkoutRepository {
    /// The caller's `in_progress` session, if any.
    fn current_session(&self) -> Result<Option<WorkoutSession>, StoreError>;

    /// A session by id; fails with `Unauthorized` for another user's session.
    fn session(&self, id: SessionId) -> Result<WorkoutSession, StoreError>;

    /// Sets of a session in creation order.
    fn sets_for_session(&self, id: SessionId) -> Result<Vec<WorkoutSet>, StoreError>;
}

/// Write side driven by the session controller. Every call re-checks
/// ownership and input; nothing the client sends is trusted.
pub trait WorkoutStore {
    fn start_session(&self, title: Option<&str>) -> Result<WorkoutSession, StoreError>;

    fn add_set(&self, session_id: SessionId, fields: &SetFields) -> Result<SetId, StoreError>;

    /// Overwrites (never accumulates) the rest time, so repeats are harmless.
    fn update_set_rest_time(&self, set_id: SetId, rest_secs: u64) -> Result<(), StoreError>;

    fn finish_session(&self, session_id: SessionId) -> Result<WorkoutSession, StoreError>;

    fn list_sets(&self, session_id: SessionId) -> Result<Vec<WorkoutSet>, StoreError>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workout_sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_workout_sessions_user_status
    ON workout_sessions(user_id, status);

CREATE TABLE IF NOT EXISTS workout_sets (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES workout_sessions(id),
    user_id TEXT NOT NULL,
    exercise_name TEXT NOT NULL,
    set_number INTEGER NOT NULL,
    weight REAL NOT NULL,
    reps INTEGER NOT NULL,
    rpe INTEGER,
    duration_secs INTEGER NOT NULL DEFAULT 0,
    rest_secs INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workout_sets_session
    ON workout_sets(session_id);

CREATE TABLE IF NOT EXISTS workout_feedback (
    session_id TEXT PRIMARY KEY REFERENCES workout_sessions(id),
    feedback_text TEXT NOT NULL,
    score INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
"#;

const SESSION_COLUMNS: &str = "id, user_id, title, status, started_at, ended_at";
const SET_COLUMNS: &str = "id, session_id, exercise_name, set_number, weight, reps, rpe, \
                           duration_secs, rest_secs, created_at";

/// SQLite-backed store acting on behalf of one user.
pub struct SqliteWorkoutStore {
    conn: Connection,
    user: UserId,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqliteWorkoutStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteWorkoutStore")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl SqliteWorkoutStore {
    /// Open (creating if needed) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, user: UserId) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        // The UI thread and the store worker each hold a connection.
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!(path = %path.display(), "opened workout database");
        Self::with_connection(conn, user, Arc::new(SystemClock))
    }

    pub fn open_in_memory(user: UserId, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, user, clock)
    }

    pub fn with_connection(
        conn: Connection,
        user: UserId,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, user, clock })
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Whether `session_id` already has feedback stored.
    pub fn feedback_for(&self, session_id: SessionId) -> Result<Option<Feedback>, StoreError> {
        self.session(session_id)?;
        let feedback = self
            .conn
            .query_row(
                "SELECT feedback_text, score FROM workout_feedback WHERE session_id = ?1",
                [session_id.to_string()],
                |row| {
                    Ok(Feedback {
                        text: row.get(0)?,
                        score: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(feedback)
    }

    /// Store feedback for a completed session. The first write wins.
    pub fn save_feedback(
        &self,
        session_id: SessionId,
        feedback: &Feedback,
    ) -> Result<(), StoreError> {
        self.session(session_id)?;
        self.conn.execute(
            r#"
            INSERT OR IGNORE INTO workout_feedback (session_id, feedback_text, score, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                session_id.to_string(),
                feedback.text,
                feedback.score,
                timestamp(self.clock.now()),
            ],
        )?;
        Ok(())
    }

    /// All of the user's sessions, newest first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<WorkoutSession>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM workout_sessions WHERE user_id = ?1 \
             ORDER BY started_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![self.user.as_str(), limit as i64], session_from_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn owned_session(&self, id: SessionId) -> Result<WorkoutSession, StoreError> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM workout_sessions WHERE id = ?1"),
                [id.to_string()],
                session_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("session", id))?;

        if session.user_id != self.user {
            warn!(session_id = %id, user = %self.user, "rejected access to another user's session");
            return Err(StoreError::unauthorized("session", id));
        }
        Ok(session)
    }
}

impl ActiveWorkoutRepository for SqliteWorkoutStore {
    fn current_session(&self) -> Result<Option<WorkoutSession>, StoreError> {
        let session = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM workout_sessions \
                     WHERE user_id = ?1 AND status = ?2 \
                     ORDER BY started_at DESC LIMIT 1"
                ),
                params![self.user.as_str(), SessionStatus::InProgress.to_string()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn session(&self, id: SessionId) -> Result<WorkoutSession, StoreError> {
        self.owned_session(id)
    }

    fn sets_for_session(&self, id: SessionId) -> Result<Vec<WorkoutSet>, StoreError> {
        self.owned_session(id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SET_COLUMNS} FROM workout_sets WHERE session_id = ?1 \
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map([id.to_string()], set_from_row)?;

        let mut sets = Vec::new();
        for row in rows {
            sets.push(row?);
        }
        Ok(sets)
    }
}

impl WorkoutStore for SqliteWorkoutStore {
    fn start_session(&self, title: Option<&str>) -> Result<WorkoutSession, StoreError> {
        if let Some(existing) = self.current_session()? {
            return Err(StoreError::AlreadyInProgress(existing.id.to_string()));
        }

        let session = WorkoutSession {
            id: SessionId::new_v4(),
            user_id: self.user.clone(),
            title: title.map(str::trim).filter(|t| !t.is_empty()).map(String::from),
            status: SessionStatus::InProgress,
            started_at: self.clock.now(),
            ended_at: None,
        };

        self.conn.execute(
            r#"
            INSERT INTO workout_sessions (id, user_id, title, status, started_at, ended_at)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL)
            "#,
            params![
                session.id.to_string(),
                session.user_id.as_str(),
                session.title,
                session.status.to_string(),
                timestamp(session.started_at),
            ],
        )?;

        info!(session_id = %session.id, user = %self.user, "workout session started");
        Ok(session)
    }

    fn add_set(&self, session_id: SessionId, fields: &SetFields) -> Result<SetId, StoreError> {
        fields.validate()?;

        let session = self.owned_session(session_id)?;
        if !session.is_in_progress() {
            return Err(StoreError::SessionNotInProgress);
        }

        let id = SetId::new_v4();
        self.conn.execute(
            r#"
            INSERT INTO workout_sets
            (id, session_id, user_id, exercise_name, set_number, weight, reps, rpe,
             duration_secs, rest_secs, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)
            "#,
            params![
                id.to_string(),
                session_id.to_string(),
                self.user.as_str(),
                fields.exercise_name,
                fields.set_number,
                fields.weight,
                fields.reps,
                fields.rpe,
                fields.duration_secs,
                timestamp(self.clock.now()),
            ],
        )?;

        info!(
            session_id = %session_id,
            set_id = %id,
            exercise = %fields.exercise_name,
            set_number = fields.set_number,
            "set recorded"
        );
        Ok(id)
    }

    fn update_set_rest_time(&self, set_id: SetId, rest_secs: u64) -> Result<(), StoreError> {
        let owner: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM workout_sets WHERE id = ?1",
                [set_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match owner {
            None => return Err(StoreError::not_found("set", set_id)),
            Some(owner) if owner != self.user.as_str() => {
                warn!(set_id = %set_id, user = %self.user, "rejected rest update on another user's set");
                return Err(StoreError::unauthorized("set", set_id));
            }
            Some(_) => {}
        }

        self.conn.execute(
            "UPDATE workout_sets SET rest_secs = ?1 WHERE id = ?2",
            params![rest_secs, set_id.to_string()],
        )?;
        debug!(set_id = %set_id, rest_secs, "rest time updated");
        Ok(())
    }

    fn finish_session(&self, session_id: SessionId) -> Result<WorkoutSession, StoreError> {
        let mut session = self.owned_session(session_id)?;
        if !session.is_in_progress() {
            debug!(session_id = %session_id, "session already completed");
            return Ok(session);
        }

        let ended_at = self.clock.now();
        self.conn.execute(
            "UPDATE workout_sessions SET status = ?1, ended_at = ?2 WHERE id = ?3",
            params![
                SessionStatus::Completed.to_string(),
                timestamp(ended_at),
                session_id.to_string(),
            ],
        )?;

        session.status = SessionStatus::Completed;
        session.ended_at = Some(ended_at);
        info!(session_id = %session_id, "workout session finished");
        Ok(session)
    }

    fn list_sets(&self, session_id: SessionId) -> Result<Vec<WorkoutSet>, StoreError> {
        self.sets_for_session(session_id)
    }
}

/// Fixed-width UTC text so lexical and chronological order agree.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn session_from_row(row: &Row) -> rusqlite::Result<WorkoutSession> {
    let status: String = row.get(3)?;
    let status = status
        .parse::<SessionStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    let ended_at = match row.get::<_, Option<String>>(5)? {
        Some(_) => Some(parse_timestamp(row, 5)?),
        None => None,
    };

    Ok(WorkoutSession {
        id: parse_column(row, 0)?,
        user_id: UserId(row.get(1)?),
        title: row.get(2)?,
        status,
        started_at: parse_timestamp(row, 4)?,
        ended_at,
    })
}

fn set_from_row(row: &Row) -> rusqlite::Result<WorkoutSet> {
    Ok(WorkoutSet {
        id: parse_column(row, 0)?,
        session_id: parse_column(row, 1)?,
        exercise_name: row.get(2)?,
        set_number: row.get(3)?,
        weight: row.get(4)?,
        reps: row.get(5)?,
        rpe: row.get(6)?,
        duration_secs: row.get(7)?,
        rest_secs: row.get(8)?,
        created_at: parse_timestamp(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::timer::ManualClock;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap())
    }

    fn create_test_store(user: &str, clock: &ManualClock) -> SqliteWorkoutStore {
        SqliteWorkoutStore::open_in_memory(UserId::new(user), Arc::new(clock.clone())).unwrap()
    }

    fn squat(set_number: u32) -> SetFields {
        SetFields::new("Squat", set_number, 100.0, 5, Some(8), 20).unwrap()
    }

    #[test]
    fn test_start_session_creates_in_progress() {
        let clock = clock();
        let store = create_test_store("alice", &clock);

        let session = store.start_session(Some("  Leg day ")).unwrap();
        assert_eq!(session.status, SessionStatus::InProgress);
        assert_eq!(session.title.as_deref(), Some("Leg day"));
        assert_eq!(session.started_at, clock.now());
        assert_eq!(store.current_session().unwrap(), Some(session));
    }

    #[test]
    fn test_only_one_session_in_progress() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        store.start_session(None).unwrap();
        assert_matches!(
            store.start_session(None),
            Err(StoreError::AlreadyInProgress(_))
        );
    }

    #[test]
    fn test_add_and_list_round_trip() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        let session = store.start_session(None).unwrap();

        let fields = squat(1);
        let id = store.add_set(session.id, &fields).unwrap();

        let sets = store.list_sets(session.id).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].id, id);
        assert_eq!(sets[0].session_id, session.id);
        assert_eq!(sets[0].fields(), fields);
        assert_eq!(sets[0].rest_secs, 0);
        assert_eq!(sets[0].created_at, clock.now());
    }

    #[test]
    fn test_list_keeps_creation_order_for_same_instant() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        let session = store.start_session(None).unwrap();

        for n in 1..=4 {
            store.add_set(session.id, &squat(n)).unwrap();
        }
        let numbers: Vec<u32> = store
            .list_sets(session.id)
            .unwrap()
            .iter()
            .map(|s| s.set_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_add_set_revalidates() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        let session = store.start_session(None).unwrap();

        let bad = SetFields {
            reps: 0,
            ..squat(1)
        };
        assert_matches!(
            store.add_set(session.id, &bad),
            Err(StoreError::Validation(ValidationError::RepsTooLow(0)))
        );

        let bad = SetFields {
            exercise_name: String::new(),
            ..squat(1)
        };
        assert_matches!(
            store.add_set(session.id, &bad),
            Err(StoreError::Validation(ValidationError::EmptyExerciseName))
        );

        let bad = SetFields {
            weight: -1.0,
            ..squat(1)
        };
        assert_matches!(
            store.add_set(session.id, &bad),
            Err(StoreError::Validation(ValidationError::InvalidWeight(_)))
        );
        assert!(store.list_sets(session.id).unwrap().is_empty());
    }

    #[test]
    fn test_rest_update_is_idempotent() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        let session = store.start_session(None).unwrap();
        let id = store.add_set(session.id, &squat(1)).unwrap();

        store.update_set_rest_time(id, 45).unwrap();
        store.update_set_rest_time(id, 45).unwrap();

        assert_eq!(store.list_sets(session.id).unwrap()[0].rest_secs, 45);
    }

    #[test]
    fn test_rest_update_unknown_set() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        assert_matches!(
            store.update_set_rest_time(SetId::new_v4(), 30),
            Err(StoreError::NotFound { entity: "set", .. })
        );
    }

    #[test]
    fn test_other_users_cannot_touch_sets_or_sessions() {
        let clock = clock();
        let conn = Connection::open_in_memory().unwrap();
        let alice =
            SqliteWorkoutStore::with_connection(conn, UserId::new("alice"), Arc::new(clock.clone()))
                .unwrap();
        let session = alice.start_session(None).unwrap();
        let set_id = alice.add_set(session.id, &squat(1)).unwrap();

        // Same database, different acting user.
        let mallory = SqliteWorkoutStore {
            conn: alice.conn,
            user: UserId::new("mallory"),
            clock: Arc::new(clock.clone()),
        };

        assert_matches!(
            mallory.update_set_rest_time(set_id, 10),
            Err(StoreError::Unauthorized { entity: "set", .. })
        );
        assert_matches!(
            mallory.add_set(session.id, &squat(2)),
            Err(StoreError::Unauthorized { .. })
        );
        assert_matches!(
            mallory.finish_session(session.id),
            Err(StoreError::Unauthorized { .. })
        );
        assert_matches!(
            mallory.list_sets(session.id),
            Err(StoreError::Unauthorized { .. })
        );
        assert_eq!(mallory.current_session().unwrap(), None);
    }

    #[test]
    fn test_finish_session_sets_end_time() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        let session = store.start_session(None).unwrap();

        clock.advance_secs(3600);
        let finished = store.finish_session(session.id).unwrap();

        assert_eq!(finished.status, SessionStatus::Completed);
        assert_eq!(finished.ended_at, Some(clock.now()));
        assert_eq!(store.session(session.id).unwrap(), finished);
        assert_eq!(store.current_session().unwrap(), None);

        // Finishing twice leaves the original end time alone.
        clock.advance_secs(60);
        let again = store.finish_session(session.id).unwrap();
        assert_eq!(again.ended_at, finished.ended_at);
    }

    #[test]
    fn test_no_sets_after_finish() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        let session = store.start_session(None).unwrap();
        store.finish_session(session.id).unwrap();

        assert_matches!(
            store.add_set(session.id, &squat(1)),
            Err(StoreError::SessionNotInProgress)
        );
    }

    #[test]
    fn test_feedback_first_write_wins() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        let session = store.start_session(None).unwrap();
        assert_eq!(store.feedback_for(session.id).unwrap(), None);

        let first = Feedback {
            text: "Solid work".into(),
            score: 70,
        };
        store.save_feedback(session.id, &first).unwrap();
        store
            .save_feedback(
                session.id,
                &Feedback {
                    text: "Other".into(),
                    score: 10,
                },
            )
            .unwrap();

        assert_eq!(store.feedback_for(session.id).unwrap(), Some(first));
    }

    #[test]
    fn test_recent_sessions_newest_first() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        let first = store.start_session(Some("first")).unwrap();
        store.finish_session(first.id).unwrap();
        clock.advance_secs(86_400);
        let second = store.start_session(Some("second")).unwrap();

        let recent = store.recent_sessions(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
    }

    #[test]
    fn test_undecodable_rows_are_corrupt() {
        let clock = clock();
        let store = create_test_store("alice", &clock);
        let session = store.start_session(None).unwrap();
        store.add_set(session.id, &squat(1)).unwrap();

        store
            .conn
            .execute("UPDATE workout_sets SET created_at = 'yesterday'", [])
            .unwrap();
        assert_matches!(store.list_sets(session.id), Err(StoreError::Corrupt(_)));

        store
            .conn
            .execute("UPDATE workout_sessions SET status = 'paused'", [])
            .unwrap();
        assert_matches!(
            store.session(session.id),
            Err(StoreError::Corrupt(msg)) if msg.contains("paused")
        );
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("workouts.db");
        let store = SqliteWorkoutStore::open(&path, UserId::new("alice")).unwrap();
        store.start_session(None).unwrap();
        assert!(path.exists());
    }
}
