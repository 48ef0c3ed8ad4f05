#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lifequest_core::{
    apply_completion, format_rfc3339, level_for_xp, now_utc, parse_rfc3339_utc, progress_percent,
    CompletionInput, CompletionOutcome, Life, LifeProgress, Mission, MissionCompletion,
    QuestError, RewardGrant, User,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

const QUEST_SCHEMA_VERSION: i64 = 1;

const SCHEMA_QUEST_V1: &str = r"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  username TEXT NOT NULL UNIQUE CHECK (length(trim(username)) > 0)
);

CREATE TABLE IF NOT EXISTS lives (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL CHECK (length(trim(name)) > 0)
);

CREATE TABLE IF NOT EXISTS missions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  life_id INTEGER NOT NULL REFERENCES lives(id),
  level_number INTEGER NOT NULL CHECK (level_number >= 1),
  title TEXT NOT NULL CHECK (length(trim(title)) > 0),
  description TEXT NOT NULL DEFAULT '',
  points INTEGER NOT NULL DEFAULT 10 CHECK (points >= 1)
);

CREATE INDEX IF NOT EXISTS idx_missions_level
  ON missions(level_number, id);

CREATE TABLE IF NOT EXISTS user_life_progress (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id INTEGER NOT NULL REFERENCES users(id),
  life_id INTEGER NOT NULL REFERENCES lives(id),
  xp INTEGER NOT NULL DEFAULT 0 CHECK (xp >= 0),
  level INTEGER NOT NULL DEFAULT 1 CHECK (level >= 1),
  UNIQUE (user_id, life_id)
);

CREATE TRIGGER IF NOT EXISTS trg_user_life_progress_no_delete
BEFORE DELETE ON user_life_progress
BEGIN
  SELECT RAISE(FAIL, 'user_life_progress rows are never deleted');
END;

CREATE TRIGGER IF NOT EXISTS trg_user_life_progress_xp_monotonic
BEFORE UPDATE ON user_life_progress
WHEN NEW.xp < OLD.xp
BEGIN
  SELECT RAISE(FAIL, 'xp is monotonically non-decreasing');
END;

CREATE TABLE IF NOT EXISTS user_progress (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id INTEGER NOT NULL REFERENCES users(id),
  mission_id INTEGER NOT NULL REFERENCES missions(id),
  completed INTEGER NOT NULL DEFAULT 1 CHECK (completed IN (0, 1)),
  completed_at TEXT NOT NULL,
  user_photo_url TEXT,
  UNIQUE (user_id, mission_id)
);

CREATE TRIGGER IF NOT EXISTS trg_user_progress_no_update
BEFORE UPDATE ON user_progress
BEGIN
  SELECT RAISE(FAIL, 'user_progress is immutable once written');
END;

CREATE TRIGGER IF NOT EXISTS trg_user_progress_no_delete
BEFORE DELETE ON user_progress
BEGIN
  SELECT RAISE(FAIL, 'user_progress is immutable once written');
END;

CREATE INDEX IF NOT EXISTS idx_user_progress_user
  ON user_progress(user_id, mission_id);

CREATE TABLE IF NOT EXISTS user_rewards (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id INTEGER NOT NULL REFERENCES users(id),
  reward_name TEXT NOT NULL,
  rewarded_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_user_rewards_no_update
BEFORE UPDATE ON user_rewards
BEGIN
  SELECT RAISE(FAIL, 'user_rewards is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_user_rewards_no_delete
BEFORE DELETE ON user_rewards
BEGIN
  SELECT RAISE(FAIL, 'user_rewards is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_user_rewards_user
  ON user_rewards(user_id, id);
";

pub struct SqliteQuestStore {
    conn: Connection,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct MissionInput {
    pub life_id: i64,
    pub level_number: u32,
    pub title: String,
    pub description: String,
    pub points: i64,
}

impl MissionInput {
    pub fn validate(&self) -> Result<(), QuestError> {
        if self.life_id < 1 {
            return Err(QuestError::Validation("life_id MUST be >= 1".to_string()));
        }

        if self.level_number < 1 {
            return Err(QuestError::Validation(
                "level_number MUST be >= 1".to_string(),
            ));
        }

        if self.title.trim().is_empty() {
            return Err(QuestError::Validation(
                "title MUST be provided for every mission".to_string(),
            ));
        }

        if self.points < 1 {
            return Err(QuestError::Validation(
                "mission points MUST be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct AvailableMissions {
    pub user_id: i64,
    pub level: u32,
    pub missions: Vec<Mission>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: i64,
    pub life_id: i64,
    pub xp: i64,
    pub level: u32,
    pub progress_percent: u8,
}

impl SqliteQuestStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_QUEST_V1)
            .context("failed to apply quest schema")?;

        let now = format_rfc3339(now_utc())?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![QUEST_SCHEMA_VERSION, now],
            )
            .context("failed to register quest schema version")?;

        Ok(())
    }

    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let current_version = if table_exists(&self.conn, "schema_migrations")? {
            self.conn
                .query_row(
                    "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .context("failed to read schema_migrations")?
        } else {
            0
        };

        let pending_versions = ((current_version + 1)..=QUEST_SCHEMA_VERSION).collect();

        Ok(SchemaStatus {
            current_version,
            target_version: QUEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    pub fn insert_user(&self, username: &str) -> Result<User> {
        if username.trim().is_empty() {
            return Err(QuestError::Validation(
                "username MUST be provided".to_string(),
            )
            .into());
        }

        self.conn
            .execute(
                "INSERT INTO users(username) VALUES (?1)",
                params![username],
            )
            .with_context(|| format!("failed to insert user {username}"))?;

        Ok(User {
            id: self.conn.last_insert_rowid(),
            username: username.to_string(),
        })
    }

    pub fn insert_life(&self, name: &str) -> Result<Life> {
        if name.trim().is_empty() {
            return Err(QuestError::Validation(
                "life name MUST be provided".to_string(),
            )
            .into());
        }

        self.conn
            .execute("INSERT INTO lives(name) VALUES (?1)", params![name])
            .with_context(|| format!("failed to insert life {name}"))?;

        Ok(Life {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    pub fn insert_mission(&self, input: &MissionInput) -> Result<Mission> {
        input.validate()?;

        if self.get_life(input.life_id)?.is_none() {
            return Err(QuestError::NotFound(format!("life {} not found", input.life_id)).into());
        }

        self.conn
            .execute(
                "INSERT INTO missions(life_id, level_number, title, description, points)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    input.life_id,
                    i64::from(input.level_number),
                    input.title,
                    input.description,
                    input.points,
                ],
            )
            .with_context(|| format!("failed to insert mission {}", input.title))?;

        Ok(Mission {
            id: self.conn.last_insert_rowid(),
            life_id: input.life_id,
            level_number: input.level_number,
            title: input.title.clone(),
            description: input.description.clone(),
            points: input.points,
        })
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, username FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("failed to fetch user")
    }

    pub fn get_life(&self, life_id: i64) -> Result<Option<Life>> {
        self.conn
            .query_row(
                "SELECT id, name FROM lives WHERE id = ?1",
                params![life_id],
                |row| {
                    Ok(Life {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("failed to fetch life")
    }

    pub fn get_mission(&self, mission_id: i64) -> Result<Option<Mission>> {
        self.conn
            .query_row(
                "SELECT id, life_id, level_number, title, description, points
                 FROM missions WHERE id = ?1",
                params![mission_id],
                parse_mission_row,
            )
            .optional()
            .context("failed to fetch mission")
    }

    pub fn missions_for_level(&self, max_level: u32) -> Result<Vec<Mission>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, life_id, level_number, title, description, points
             FROM missions
             WHERE level_number <= ?1
             ORDER BY level_number ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![i64::from(max_level)], parse_mission_row)?;
        collect_rows(rows)
    }

    pub fn life_progress(&self, user_id: i64, life_id: i64) -> Result<Option<LifeProgress>> {
        self.conn
            .query_row(
                "SELECT id, user_id, life_id, xp, level
                 FROM user_life_progress
                 WHERE user_id = ?1 AND life_id = ?2",
                params![user_id, life_id],
                parse_progress_row,
            )
            .optional()
            .context("failed to fetch life progress")
    }

    /// The user's earliest progress row. The single-track HTTP surface keys
    /// profile and availability on this row.
    pub fn first_life_progress(&self, user_id: i64) -> Result<Option<LifeProgress>> {
        self.conn
            .query_row(
                "SELECT id, user_id, life_id, xp, level
                 FROM user_life_progress
                 WHERE user_id = ?1
                 ORDER BY id ASC
                 LIMIT 1",
                params![user_id],
                parse_progress_row,
            )
            .optional()
            .context("failed to fetch first life progress")
    }

    pub fn completions_for_user(&self, user_id: i64) -> Result<Vec<MissionCompletion>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, mission_id, completed, completed_at, user_photo_url
             FROM user_progress
             WHERE user_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![user_id], parse_completion_row)?;
        collect_rows(rows)
    }

    pub fn rewards_for_user(&self, user_id: i64) -> Result<Vec<RewardGrant>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, reward_name, rewarded_at
             FROM user_rewards
             WHERE user_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![user_id], parse_reward_row)?;
        collect_rows(rows)
    }

    /// Missions the user may attempt: every mission whose level requirement
    /// is at or below the level derived from the user's progress track.
    /// Completed missions stay listed; re-completion is rejected by
    /// [`SqliteQuestStore::complete_mission`].
    pub fn available_missions(&self, user_id: i64) -> Result<AvailableMissions> {
        let Some(progress) = self.first_life_progress(user_id)? else {
            return Err(
                QuestError::NotFound(format!("user {user_id} has no recorded progress")).into(),
            );
        };

        let level = level_for_xp(progress.xp);
        let missions = self.missions_for_level(level)?;

        if missions.is_empty() {
            return Err(
                QuestError::NotFound(format!("no missions available for level {level}")).into(),
            );
        }

        Ok(AvailableMissions {
            user_id,
            level,
            missions,
        })
    }

    /// Completes a mission for a user inside a single write transaction:
    /// the xp update, the optional reward grant, and the completion record
    /// commit together or not at all.
    pub fn complete_mission(&mut self, input: &CompletionInput) -> Result<CompletionOutcome> {
        input.validate()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start completion transaction")?;

        let user_exists = tx
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![input.user_id],
                |_| Ok(()),
            )
            .optional()
            .context("failed to check user existence")?
            .is_some();
        if !user_exists {
            return Err(QuestError::NotFound(format!("user {} not found", input.user_id)).into());
        }

        let mission = tx
            .query_row(
                "SELECT id, life_id, level_number, title, description, points
                 FROM missions WHERE id = ?1",
                params![input.mission_id],
                parse_mission_row,
            )
            .optional()
            .context("failed to fetch mission")?;
        let Some(mission) = mission else {
            return Err(
                QuestError::NotFound(format!("mission {} not found", input.mission_id)).into(),
            );
        };

        let already_done = tx
            .query_row(
                "SELECT 1 FROM user_progress WHERE user_id = ?1 AND mission_id = ?2",
                params![input.user_id, input.mission_id],
                |_| Ok(()),
            )
            .optional()
            .context("failed to check existing completion")?
            .is_some();
        if already_done {
            return Err(QuestError::AlreadyCompleted {
                user_id: input.user_id,
                mission_id: input.mission_id,
            }
            .into());
        }

        let progress = tx
            .query_row(
                "SELECT id, xp FROM user_life_progress WHERE user_id = ?1 AND life_id = ?2",
                params![input.user_id, mission.life_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .context("failed to fetch life progress")?;

        let (progress_id, xp) = match progress {
            Some(pair) => pair,
            None => {
                tx.execute(
                    "INSERT INTO user_life_progress(user_id, life_id, xp, level)
                     VALUES (?1, ?2, 0, 1)",
                    params![input.user_id, mission.life_id],
                )
                .context("failed to create life progress")?;
                (tx.last_insert_rowid(), 0)
            }
        };

        let outcome = apply_completion(xp, mission.points)?;

        tx.execute(
            "UPDATE user_life_progress SET xp = ?1, level = ?2 WHERE id = ?3",
            params![outcome.new_xp, i64::from(outcome.new_level), progress_id],
        )
        .context("failed to update life progress")?;

        let now = format_rfc3339(now_utc())?;

        if let Some(reward_name) = &outcome.reward {
            tx.execute(
                "INSERT INTO user_rewards(user_id, reward_name, rewarded_at)
                 VALUES (?1, ?2, ?3)",
                params![input.user_id, reward_name, now],
            )
            .context("failed to record reward grant")?;
        }

        tx.execute(
            "INSERT INTO user_progress(user_id, mission_id, completed, completed_at, user_photo_url)
             VALUES (?1, ?2, 1, ?3, ?4)",
            params![input.user_id, input.mission_id, now, input.user_photo_url],
        )
        .context("failed to record mission completion")?;

        tx.commit().context("failed to commit completion")?;

        Ok(outcome)
    }

    /// Profile of the user's progress track: xp, recomputed level, and
    /// progress toward the next threshold.
    pub fn profile(&self, user_id: i64) -> Result<UserProfile> {
        let Some(progress) = self.first_life_progress(user_id)? else {
            return Err(
                QuestError::NotFound(format!("user {user_id} has no recorded progress")).into(),
            );
        };

        let level = level_for_xp(progress.xp);

        Ok(UserProfile {
            user_id,
            life_id: progress.life_id,
            xp: progress.xp,
            level,
            progress_percent: progress_percent(progress.xp, level),
        })
    }
}

/// Cloneable, path-bound handle over the quest store. Each operation opens
/// its own connection and ensures the schema, so the handle can be shared
/// across request handlers and blocking tasks.
#[derive(Debug, Clone)]
pub struct QuestApi {
    db_path: PathBuf,
}

impl QuestApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn store(&self) -> Result<SqliteQuestStore> {
        let store = SqliteQuestStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<SchemaStatus> {
        let store = self.store()?;
        store.schema_status()
    }

    /// Reports the schema version without applying it; readiness checks use
    /// this to distinguish a current database from a missing or stale one.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteQuestStore::open(&self.db_path)?;
        store.schema_status()
    }

    pub fn add_user(&self, username: &str) -> Result<User> {
        self.store()?.insert_user(username)
    }

    pub fn add_life(&self, name: &str) -> Result<Life> {
        self.store()?.insert_life(name)
    }

    pub fn add_mission(&self, input: &MissionInput) -> Result<Mission> {
        self.store()?.insert_mission(input)
    }

    pub fn available_missions(&self, user_id: i64) -> Result<AvailableMissions> {
        self.store()?.available_missions(user_id)
    }

    pub fn complete_mission(&self, input: &CompletionInput) -> Result<CompletionOutcome> {
        self.store()?.complete_mission(input)
    }

    pub fn profile(&self, user_id: i64) -> Result<UserProfile> {
        self.store()?.profile(user_id)
    }

    pub fn rewards(&self, user_id: i64) -> Result<Vec<RewardGrant>> {
        self.store()?.rewards_for_user(user_id)
    }

    pub fn completions(&self, user_id: i64) -> Result<Vec<MissionCompletion>> {
        self.store()?.completions_for_user(user_id)
    }
}

fn parse_mission_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Mission> {
    let level_i64: i64 = row.get(2)?;

    Ok(Mission {
        id: row.get(0)?,
        life_id: row.get(1)?,
        level_number: parse_level_column(2, level_i64)?,
        title: row.get(3)?,
        description: row.get(4)?,
        points: row.get(5)?,
    })
}

fn parse_progress_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LifeProgress> {
    let level_i64: i64 = row.get(4)?;

    Ok(LifeProgress {
        id: row.get(0)?,
        user_id: row.get(1)?,
        life_id: row.get(2)?,
        xp: row.get(3)?,
        level: parse_level_column(4, level_i64)?,
    })
}

fn parse_completion_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MissionCompletion> {
    let completed_i64: i64 = row.get(3)?;
    let completed_at_raw: String = row.get(4)?;

    Ok(MissionCompletion {
        id: row.get(0)?,
        user_id: row.get(1)?,
        mission_id: row.get(2)?,
        completed: completed_i64 != 0,
        completed_at: parse_timestamp_column(4, &completed_at_raw)?,
        user_photo_url: row.get(5)?,
    })
}

fn parse_reward_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RewardGrant> {
    let rewarded_at_raw: String = row.get(3)?;

    Ok(RewardGrant {
        id: row.get(0)?,
        user_id: row.get(1)?,
        reward_name: row.get(2)?,
        rewarded_at: parse_timestamp_column(3, &rewarded_at_raw)?,
    })
}

fn parse_level_column(index: usize, value: i64) -> rusqlite::Result<u32> {
    u32::try_from(value).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid level value: {value}"),
            )),
        )
    })
}

fn parse_timestamp_column(index: usize, value: &str) -> rusqlite::Result<time::OffsetDateTime> {
    parse_rfc3339_utc(value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                err.to_string(),
            )),
        )
    })
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1
             LIMIT 1",
            params![table_name],
            |_| Ok(()),
        )
        .optional()
        .context("failed to query sqlite_master")?
        .is_some();

    Ok(exists)
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
