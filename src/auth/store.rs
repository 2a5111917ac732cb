// Credential persistence
// SQLite key/value table for durable sessions, in-memory store for tests and cookie deployments

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use super::types::{Session, TokenGrant};

const KEY_ACCESS_TOKEN: &str = "accessToken";
const KEY_REFRESH_TOKEN: &str = "refreshToken";
const KEY_ID_TOKEN: &str = "idToken";
const KEY_SUBJECT: &str = "subject";
const KEY_PROFILE: &str = "userProfile";
const KEY_EXPIRES_AT: &str = "accessExpiresAt";

/// Durable holder of the current session
pub trait CredentialStore: Send + Sync {
    /// Persist every field of `session`, replacing what was stored
    fn save(&self, session: &Session) -> Result<()>;

    /// Current session, or the empty session if nothing was saved
    fn read(&self) -> Result<Session>;

    /// Remove every field atomically
    fn clear(&self) -> Result<()>;

    /// Apply a refresh grant if the stored session is still the sign-in `basis` came from
    ///
    /// Returns the updated session, or `None` when the session was cleared or
    /// replaced while the refresh was in flight; nothing is written then.
    fn update_access(&self, basis: &Session, grant: &TokenGrant) -> Result<Option<Session>>;
}

/// Process-lifetime store
#[derive(Debug, Default)]
pub struct MemoryStore {
    session: RwLock<Session>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn save(&self, session: &Session) -> Result<()> {
        let mut current = self
            .session
            .write()
            .map_err(|_| anyhow!("session lock poisoned"))?;
        *current = session.clone();
        Ok(())
    }

    fn read(&self) -> Result<Session> {
        let current = self
            .session
            .read()
            .map_err(|_| anyhow!("session lock poisoned"))?;
        Ok(current.clone())
    }

    fn clear(&self) -> Result<()> {
        self.save(&Session::default())
    }

    fn update_access(&self, basis: &Session, grant: &TokenGrant) -> Result<Option<Session>> {
        let mut current = self
            .session
            .write()
            .map_err(|_| anyhow!("session lock poisoned"))?;
        if !current.same_login(basis) {
            return Ok(None);
        }
        current.apply_grant(grant);
        Ok(Some(current.clone()))
    }
}

/// SQLite-backed store surviving process restarts
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the session database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create session table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("session database lock poisoned"))
    }
}

fn load_session(conn: &Connection) -> Result<Session> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM session_kv")
        .context("Failed to query session table")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut values = HashMap::new();
    for row in rows {
        let (key, value) = row.context("Failed to read session row")?;
        values.insert(key, value);
    }

    let profile = match values.remove(KEY_PROFILE) {
        Some(json) => match serde_json::from_str(&json) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!("Ignoring unreadable stored profile: {}", e);
                None
            }
        },
        None => None,
    };

    let access_expires_at = values
        .remove(KEY_EXPIRES_AT)
        .and_then(|s| parse_datetime(&s).ok());

    Ok(Session {
        access_token: values.remove(KEY_ACCESS_TOKEN),
        refresh_token: values.remove(KEY_REFRESH_TOKEN),
        id_token: values.remove(KEY_ID_TOKEN),
        subject: values.remove(KEY_SUBJECT),
        profile,
        access_expires_at,
    })
}

/// Replace every stored row; callers run this inside a transaction
fn write_session(conn: &Connection, session: &Session) -> Result<()> {
    let mut entries: Vec<(&str, String)> = Vec::new();
    if let Some(ref v) = session.access_token {
        entries.push((KEY_ACCESS_TOKEN, v.clone()));
    }
    if let Some(ref v) = session.refresh_token {
        entries.push((KEY_REFRESH_TOKEN, v.clone()));
    }
    if let Some(ref v) = session.id_token {
        entries.push((KEY_ID_TOKEN, v.clone()));
    }
    if let Some(ref v) = session.subject {
        entries.push((KEY_SUBJECT, v.clone()));
    }
    if let Some(ref profile) = session.profile {
        let json = serde_json::to_string(profile).context("Failed to encode user profile")?;
        entries.push((KEY_PROFILE, json));
    }
    if let Some(expires_at) = session.access_expires_at {
        entries.push((KEY_EXPIRES_AT, expires_at.to_rfc3339()));
    }

    conn.execute("DELETE FROM session_kv", [])?;
    for (key, value) in entries {
        conn.execute(
            "INSERT INTO session_kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    Ok(())
}

impl CredentialStore for SqliteStore {
    fn save(&self, session: &Session) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin session transaction")?;
        write_session(&tx, session)?;
        tx.commit().context("Failed to commit session")?;
        Ok(())
    }

    fn read(&self) -> Result<Session> {
        let conn = self.lock()?;
        load_session(&conn)
    }

    fn clear(&self) -> Result<()> {
        self.lock()?
            .execute("DELETE FROM session_kv", [])
            .context("Failed to clear session")?;
        Ok(())
    }

    fn update_access(&self, basis: &Session, grant: &TokenGrant) -> Result<Option<Session>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin session transaction")?;

        let mut current = load_session(&tx)?;
        if !current.same_login(basis) {
            return Ok(None);
        }
        current.apply_grant(grant);
        write_session(&tx, &current)?;

        tx.commit().context("Failed to commit refreshed session")?;
        Ok(Some(current))
    }
}

/// Parse datetime from various ISO 8601 formats
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let normalized = if s.ends_with('Z') {
        s.replace('Z', "+00:00")
    } else {
        s.to_string()
    };

    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse datetime: {}", s))
}
