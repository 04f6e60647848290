//! SQLite-backed project store.
//!
//! # Schema
//!
//! ```text
//! users(id PK, is_admin)
//! projects(id PK, name UNIQUE, owner_id -> users.id, state, created_at_ms, updated_at_ms)
//! ```
//!
//! The `UNIQUE` constraint on `projects.name` covers staged rows too, so two
//! concurrent creates of the same name are decided here: the second insert
//! surfaces as [`StoreError::Conflict`], whether it is caught by the pre-check
//! or by the constraint at commit time.
//!
//! Reads (`find_*`, `list_all`, `list_by_owner`) only ever return `active`
//! rows. The staging methods (`stage`, `activate`, `discard`, `begin_delete`,
//! `restore`) move rows through the lifecycle one short transaction at a time;
//! no transaction is ever held open across a remote call.
//!
//! Every method blocks on SQLite. Async callers go through
//! [`ProjectStore::blocking`], which runs the closure on tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::StoreError;
use crate::types::{Project, ProjectId, ProjectName, ProjectState, User, UserId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id        TEXT PRIMARY KEY,
    is_admin  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS projects (
    id             TEXT PRIMARY KEY,
    name           TEXT NOT NULL UNIQUE,
    owner_id       TEXT NOT NULL REFERENCES users(id),
    state          TEXT NOT NULL,
    created_at_ms  INTEGER NOT NULL,
    updated_at_ms  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id);
CREATE INDEX IF NOT EXISTS idx_projects_state ON projects(state, updated_at_ms);
"#;

const PROJECT_COLUMNS: &str = "id, name, owner_id, state, created_at_ms";

/// Transactional project table plus the `users` table it references.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct ProjectStore {
    conn: Arc<Mutex<Connection>>,
}

impl ProjectStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
        Self::init(conn)
    }

    /// Private in-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute("PRAGMA foreign_keys=ON;", [])?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` against this store on the blocking thread pool.
    pub async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&ProjectStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Insert a user or update its admin flag.
    pub fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.lock().execute(
            "INSERT INTO users (id, is_admin) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET is_admin = excluded.is_admin",
            params![user.id.as_str(), user.is_admin],
        )?;
        Ok(())
    }

    pub fn find_user(&self, id: &UserId) -> Result<User, StoreError> {
        self.lock()
            .query_row(
                "SELECT id, is_admin FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(User {
                        id: UserId::from(row.get::<_, String>(0)?),
                        is_admin: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::user_not_found(id.as_str()))
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Insert an `active` project in one step.
    pub fn create(&self, name: &ProjectName, owner: &UserId) -> Result<Project, StoreError> {
        self.insert(name, owner, ProjectState::Active)
    }

    /// Insert a `provisioning` row that reserves `name` but is invisible to reads.
    pub fn stage(&self, name: &ProjectName, owner: &UserId) -> Result<Project, StoreError> {
        self.insert(name, owner, ProjectState::Provisioning)
    }

    fn insert(
        &self,
        name: &ProjectName,
        owner: &UserId,
        state: ProjectState,
    ) -> Result<Project, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE name = ?1)",
            params![name.as_str()],
            |row| row.get(0),
        )?;
        if taken {
            return Err(StoreError::Conflict {
                name: name.0.clone(),
            });
        }

        let owner_known: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![owner.as_str()],
            |row| row.get(0),
        )?;
        if !owner_known {
            return Err(StoreError::user_not_found(owner.as_str()));
        }

        let now_ms = now_ms();
        let project = Project {
            id: ProjectId::generate(),
            name: name.clone(),
            owner_id: owner.clone(),
            state,
            created_at: datetime_from_ms(now_ms),
        };

        tx.execute(
            "INSERT INTO projects (id, name, owner_id, state, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                project.id.as_str(),
                project.name.as_str(),
                project.owner_id.as_str(),
                state.as_str(),
                now_ms,
            ],
        )
        .map_err(|e| classify_insert_error(e, name, owner))?;
        tx.commit()
            .map_err(|e| classify_insert_error(e, name, owner))?;

        Ok(project)
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    /// `provisioning -> active`.
    pub fn activate(&self, id: &ProjectId) -> Result<(), StoreError> {
        self.transition(id, ProjectState::Provisioning, ProjectState::Active)
    }

    /// `deleting -> active`, used when a remote delete fails.
    pub fn restore(&self, id: &ProjectId) -> Result<(), StoreError> {
        self.transition(id, ProjectState::Deleting, ProjectState::Active)
    }

    /// Remove a staged row. Never touches `active` or `deleting` rows.
    pub fn discard(&self, id: &ProjectId) -> Result<(), StoreError> {
        let removed = self.lock().execute(
            "DELETE FROM projects WHERE id = ?1 AND state = ?2",
            params![id.as_str(), ProjectState::Provisioning.as_str()],
        )?;
        if removed == 0 {
            return Err(StoreError::project_not_found(id.as_str()));
        }
        Ok(())
    }

    /// `active -> deleting`, returning the row as it was claimed.
    ///
    /// Only one caller can claim a given row: a concurrent second caller sees
    /// `NotFound`, exactly as if the first delete had already completed.
    pub fn begin_delete(&self, id: &ProjectId) -> Result<Project, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let project = tx
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1 AND state = ?2"),
                params![id.as_str(), ProjectState::Active.as_str()],
                project_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::project_not_found(id.as_str()))?;

        tx.execute(
            "UPDATE projects SET state = ?2, updated_at_ms = ?3 WHERE id = ?1",
            params![id.as_str(), ProjectState::Deleting.as_str(), now_ms()],
        )?;
        tx.commit()?;

        Ok(Project {
            state: ProjectState::Deleting,
            ..project
        })
    }

    fn transition(
        &self,
        id: &ProjectId,
        from: ProjectState,
        to: ProjectState,
    ) -> Result<(), StoreError> {
        let updated = self.lock().execute(
            "UPDATE projects SET state = ?3, updated_at_ms = ?4 WHERE id = ?1 AND state = ?2",
            params![id.as_str(), from.as_str(), to.as_str(), now_ms()],
        )?;
        if updated == 0 {
            return Err(StoreError::project_not_found(id.as_str()));
        }
        tracing::debug!(project_id = %id, %from, %to, "project state transition");
        Ok(())
    }

    /// Remove a `deleting` row. Never touches `provisioning` or `active` rows.
    pub fn finish_delete(&self, id: &ProjectId) -> Result<(), StoreError> {
        let removed = self.lock().execute(
            "DELETE FROM projects WHERE id = ?1 AND state = ?2",
            params![id.as_str(), ProjectState::Deleting.as_str()],
        )?;
        if removed == 0 {
            return Err(StoreError::project_not_found(id.as_str()));
        }
        Ok(())
    }

    /// Remove the row regardless of state.
    pub fn delete(&self, id: &ProjectId) -> Result<(), StoreError> {
        let removed = self
            .lock()
            .execute("DELETE FROM projects WHERE id = ?1", params![id.as_str()])?;
        if removed == 0 {
            return Err(StoreError::project_not_found(id.as_str()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn find_by_id(&self, id: &ProjectId) -> Result<Project, StoreError> {
        self.find_active("id", id.as_str())?
            .ok_or_else(|| StoreError::project_not_found(id.as_str()))
    }

    pub fn find_by_name(&self, name: &ProjectName) -> Result<Project, StoreError> {
        self.find_active("name", name.as_str())?
            .ok_or_else(|| StoreError::project_not_found(name.as_str()))
    }

    fn find_active(&self, column: &str, key: &str) -> Result<Option<Project>, StoreError> {
        let sql =
            format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE {column} = ?1 AND state = ?2");
        Ok(self
            .lock()
            .query_row(
                &sql,
                params![key, ProjectState::Active.as_str()],
                project_from_row,
            )
            .optional()?)
    }

    /// Every active project, oldest first.
    pub fn list_all(&self) -> Result<Vec<Project>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE state = ?1
             ORDER BY created_at_ms, id"
        ))?;
        let rows = stmt.query_map(params![ProjectState::Active.as_str()], project_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Active projects owned by `owner`, oldest first.
    pub fn list_by_owner(&self, owner: &UserId) -> Result<Vec<Project>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE owner_id = ?1 AND state = ?2
             ORDER BY created_at_ms, id"
        ))?;
        let rows = stmt.query_map(
            params![owner.as_str(), ProjectState::Active.as_str()],
            project_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Rows stuck in `state` whose last transition happened before `older_than`.
    pub fn list_stale(
        &self,
        state: ProjectState,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Project>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE state = ?1 AND updated_at_ms < ?2
             ORDER BY updated_at_ms, id"
        ))?;
        let rows = stmt.query_map(
            params![state.as_str(), older_than.timestamp_millis()],
            project_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Ids of every row in any state.
    pub fn list_ids(&self) -> Result<Vec<ProjectId>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id FROM projects ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok(ProjectId::from(row.get::<_, String>(0)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let state: String = row.get(3)?;
    let state = state
        .parse::<ProjectState>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(Project {
        id: ProjectId::from(row.get::<_, String>(0)?),
        name: ProjectName::from(row.get::<_, String>(1)?),
        owner_id: UserId::from(row.get::<_, String>(2)?),
        state,
        created_at: datetime_from_ms(row.get(4)?),
    })
}

/// A `UNIQUE` violation means another create won the name; a `FOREIGN KEY`
/// violation means the owner vanished between the pre-check and the insert.
fn classify_insert_error(err: rusqlite::Error, name: &ProjectName, owner: &UserId) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            match failure.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                    return StoreError::Conflict {
                        name: name.0.clone(),
                    }
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return StoreError::user_not_found(owner.as_str())
                }
                _ => {}
            }
        }
    }
    StoreError::Sqlite(err)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn datetime_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_users() -> ProjectStore {
        let store = ProjectStore::open_in_memory().expect("open store");
        store.upsert_user(&User::new("u1", false)).expect("u1");
        store.upsert_user(&User::new("u2", false)).expect("u2");
        store
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let store = store_with_users();
        store
            .create(&ProjectName::from("alpha"), &UserId::from("u1"))
            .expect("first create");

        // Bypass the pre-check to exercise the constraint path directly.
        let err = store
            .lock()
            .execute(
                "INSERT INTO projects (id, name, owner_id, state, created_at_ms, updated_at_ms)
                 VALUES ('X', 'alpha', 'u2', 'active', 0, 0)",
                [],
            )
            .map_err(|e| {
                classify_insert_error(e, &ProjectName::from("alpha"), &UserId::from("u2"))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref name } if name == "alpha"), "got: {err}");
    }

    #[test]
    fn foreign_key_violation_maps_to_missing_user() {
        let store = store_with_users();
        let err = store
            .lock()
            .execute(
                "INSERT INTO projects (id, name, owner_id, state, created_at_ms, updated_at_ms)
                 VALUES ('X', 'beta', 'ghost', 'active', 0, 0)",
                [],
            )
            .map_err(|e| {
                classify_insert_error(e, &ProjectName::from("beta"), &UserId::from("ghost"))
            })
            .unwrap_err();
        assert!(
            matches!(err, StoreError::NotFound { entity: "user", .. }),
            "got: {err}"
        );
    }

    #[test]
    fn created_at_survives_a_reload() {
        let store = store_with_users();
        let created = store
            .create(&ProjectName::from("alpha"), &UserId::from("u1"))
            .expect("create");
        let loaded = store.find_by_id(&created.id).expect("find");
        assert_eq!(created, loaded);
    }
}
