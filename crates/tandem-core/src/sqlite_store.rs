//! SQLite-backed persistent store.
//!
//! Web-session transitions run inside one transaction and their UPDATEs are
//! guarded on the expected current status, so a concurrent writer on the same
//! database file cannot slip in between the check and the write.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tokio::sync::Mutex;

use crate::store::{
    apply_authorization, check_authorization, evaluate, AuthorizationGrant, AuthorizeOutcome,
    DenyReason, SessionCheck, Store, StoreError, WebSession,
};
use crate::trust::{DeviceRole, RegisteredDevice, TrustedDeviceInfo};

// ============================================================================
// Schema Version
// ============================================================================

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

const WEB_SESSION_COLUMNS: &str = "id, user_id, status, permission, web_public_key, device_id,
    device_public_key, encrypted_session_key, responder_public_key, max_idle_seconds,
    session_ttl_seconds, created_at_ms, authorized_at_ms, expires_at_ms, last_activity_at_ms";

fn op_err(what: &str) -> impl Fn(rusqlite::Error) -> StoreError + '_ {
    move |e| StoreError::OperationFailed(format!("{what}: {e}"))
}

fn key_from_blob(bytes: Vec<u8>, column: usize) -> rusqlite::Result<[u8; 32]> {
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Blob,
            format!("expected 32-byte key, got {}", bytes.len()).into(),
        )
    })
}

fn opt_key_from_blob(bytes: Option<Vec<u8>>, column: usize) -> rusqlite::Result<Option<[u8; 32]>> {
    bytes.map(|b| key_from_blob(b, column)).transpose()
}

/// SQLite integers are signed 64-bit; refuse values that would wrap.
fn to_sql_int(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::OperationFailed(format!("{what} out of range: {value}")))
}

fn opt_to_sql_int(value: Option<u64>, what: &str) -> Result<Option<i64>, StoreError> {
    value.map(|v| to_sql_int(v, what)).transpose()
}

fn from_sql_int(value: i64, column: usize) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Integer,
            format!("negative value {value}").into(),
        )
    })
}

fn opt_from_sql_int(value: Option<i64>, column: usize) -> rusqlite::Result<Option<u64>> {
    value.map(|v| from_sql_int(v, column)).transpose()
}

fn parse_column<T: std::str::FromStr>(value: String, column: usize) -> rusqlite::Result<T> {
    value.parse::<T>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            format!("unexpected value '{value}'").into(),
        )
    })
}

// ============================================================================
// SQLite Store Implementation
// ============================================================================

/// SQLite-based persistent store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(op_err("failed to open database"))?;

        // WAL for concurrent readers; busy timeout for concurrent writers.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )
        .map_err(op_err("failed to set pragmas"))?;

        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(op_err("failed to open in-memory database"))?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )
        .map_err(op_err("failed to create schema_version"))?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .map_err(op_err("failed to read schema version"))?;

        if current_version > SCHEMA_VERSION {
            return Err(StoreError::DataCorruption(format!(
                "database schema version {current_version} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        if current_version < 1 {
            Self::migrate_v1(conn)?;
        }
        Ok(())
    }

    /// Migration to schema version 1 - initial schema.
    fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS registered_devices (
                device_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                public_key BLOB NOT NULL,
                role TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_registered_devices_user ON registered_devices(user_id);

            CREATE TABLE IF NOT EXISTS trusted_devices (
                device_id TEXT PRIMARY KEY,
                device_name TEXT NOT NULL,
                role TEXT NOT NULL,
                public_key BLOB NOT NULL,
                trusted_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER
            );

            CREATE TABLE IF NOT EXISTS web_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending', 'active', 'expired')),
                permission TEXT NOT NULL,
                web_public_key BLOB,
                device_id TEXT,
                device_public_key BLOB,
                encrypted_session_key BLOB,
                responder_public_key BLOB,
                max_idle_seconds INTEGER NOT NULL,
                session_ttl_seconds INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                authorized_at_ms INTEGER,
                expires_at_ms INTEGER,
                last_activity_at_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_web_sessions_user ON web_sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_web_sessions_status_expires ON web_sessions(status, expires_at_ms);

            INSERT INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(op_err("migration v1 failed"))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Row mapping
    // -------------------------------------------------------------------------

    fn row_to_device(row: &Row<'_>) -> rusqlite::Result<RegisteredDevice> {
        Ok(RegisteredDevice {
            device_id: row.get(0)?,
            user_id: row.get(1)?,
            public_key: key_from_blob(row.get(2)?, 2)?,
            role: parse_column::<DeviceRole>(row.get(3)?, 3)?,
            is_active: row.get::<_, i64>(4)? != 0,
        })
    }

    fn row_to_trusted(row: &Row<'_>) -> rusqlite::Result<TrustedDeviceInfo> {
        Ok(TrustedDeviceInfo {
            device_id: row.get(0)?,
            device_name: row.get(1)?,
            role: parse_column::<DeviceRole>(row.get(2)?, 2)?,
            public_key: key_from_blob(row.get(3)?, 3)?,
            trusted_at_ms: from_sql_int(row.get(4)?, 4)?,
            expires_at_ms: opt_from_sql_int(row.get(5)?, 5)?,
        })
    }

    fn row_to_session(row: &Row<'_>) -> rusqlite::Result<WebSession> {
        Ok(WebSession {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status: parse_column(row.get(2)?, 2)?,
            permission: parse_column(row.get(3)?, 3)?,
            web_public_key: opt_key_from_blob(row.get(4)?, 4)?,
            device_id: row.get(5)?,
            device_public_key: opt_key_from_blob(row.get(6)?, 6)?,
            encrypted_session_key: row.get(7)?,
            responder_public_key: opt_key_from_blob(row.get(8)?, 8)?,
            max_idle_seconds: from_sql_int(row.get(9)?, 9)?,
            session_ttl_seconds: from_sql_int(row.get(10)?, 10)?,
            created_at_ms: from_sql_int(row.get(11)?, 11)?,
            authorized_at_ms: opt_from_sql_int(row.get(12)?, 12)?,
            expires_at_ms: opt_from_sql_int(row.get(13)?, 13)?,
            last_activity_at_ms: opt_from_sql_int(row.get(14)?, 14)?,
        })
    }

    fn select_session(conn: &Connection, session_id: &str) -> Result<Option<WebSession>, StoreError> {
        conn.query_row(
            &format!("SELECT {WEB_SESSION_COLUMNS} FROM web_sessions WHERE id = ?1"),
            params![session_id],
            Self::row_to_session,
        )
        .optional()
        .map_err(op_err("failed to load web session"))
    }

    fn select_device(conn: &Connection, device_id: &str) -> Result<Option<RegisteredDevice>, StoreError> {
        conn.query_row(
            "SELECT device_id, user_id, public_key, role, is_active FROM registered_devices WHERE device_id = ?1",
            params![device_id],
            Self::row_to_device,
        )
        .optional()
        .map_err(op_err("failed to load device"))
    }

    /// Evaluate inside an open transaction and persist an idle expiry.
    fn check_and_expire(conn: &Connection, session_id: &str, now_ms: u64) -> Result<SessionCheck, StoreError> {
        let Some(session) = Self::select_session(conn, session_id)? else {
            return Ok(SessionCheck::NotFound);
        };
        let check = evaluate(&session, now_ms);
        if check == SessionCheck::IdleTimeout {
            conn.execute(
                "UPDATE web_sessions SET status = 'expired' WHERE id = ?1 AND status = 'active'",
                params![session_id],
            )
            .map_err(op_err("failed to expire web session"))?;
        }
        Ok(check)
    }
}

// ============================================================================
// Store Trait Implementation
// ============================================================================

#[async_trait]
impl Store for SqliteStore {
    // -------------------------------------------------------------------------
    // Registered Devices
    // -------------------------------------------------------------------------

    async fn register_device(&self, device: RegisteredDevice) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO registered_devices (device_id, user_id, public_key, role, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                device.device_id,
                device.user_id,
                device.public_key.as_slice(),
                device.role.as_str(),
                device.is_active as i32,
            ],
        )
        .map_err(op_err("failed to register device"))?;
        Ok(())
    }

    async fn load_device(&self, device_id: &str) -> Result<Option<RegisteredDevice>, StoreError> {
        let conn = self.conn.lock().await;
        Self::select_device(&conn, device_id)
    }

    async fn deactivate_device(&self, device_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE registered_devices SET is_active = 0 WHERE device_id = ?1",
                params![device_id],
            )
            .map_err(op_err("failed to deactivate device"))?;
        Ok(changed > 0)
    }

    // -------------------------------------------------------------------------
    // Trusted Devices
    // -------------------------------------------------------------------------

    async fn save_trusted_device(&self, device: TrustedDeviceInfo) -> Result<(), StoreError> {
        let trusted_at_ms = to_sql_int(device.trusted_at_ms, "trusted_at_ms")?;
        let expires_at_ms = opt_to_sql_int(device.expires_at_ms, "expires_at_ms")?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO trusted_devices
                (device_id, device_name, role, public_key, trusted_at_ms, expires_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                device.device_id,
                device.device_name,
                device.role.as_str(),
                device.public_key.as_slice(),
                trusted_at_ms,
                expires_at_ms,
            ],
        )
        .map_err(op_err("failed to save trusted device"))?;
        Ok(())
    }

    async fn load_trusted_device(
        &self,
        device_id: &str,
    ) -> Result<Option<TrustedDeviceInfo>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT device_id, device_name, role, public_key, trusted_at_ms, expires_at_ms
             FROM trusted_devices WHERE device_id = ?1",
            params![device_id],
            Self::row_to_trusted,
        )
        .optional()
        .map_err(op_err("failed to load trusted device"))
    }

    async fn list_trusted_devices(&self) -> Result<Vec<TrustedDeviceInfo>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT device_id, device_name, role, public_key, trusted_at_ms, expires_at_ms
                 FROM trusted_devices ORDER BY device_id",
            )
            .map_err(op_err("failed to prepare statement"))?;
        let rows = stmt
            .query_map([], Self::row_to_trusted)
            .map_err(op_err("failed to list trusted devices"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(op_err("failed to read trusted device"))
    }

    async fn remove_trusted_device(&self, device_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "DELETE FROM trusted_devices WHERE device_id = ?1",
                params![device_id],
            )
            .map_err(op_err("failed to remove trusted device"))?;
        Ok(changed > 0)
    }

    // -------------------------------------------------------------------------
    // Web Sessions
    // -------------------------------------------------------------------------

    async fn insert_web_session(&self, session: WebSession) -> Result<(), StoreError> {
        let max_idle_seconds = to_sql_int(session.max_idle_seconds, "max_idle_seconds")?;
        let session_ttl_seconds = to_sql_int(session.session_ttl_seconds, "session_ttl_seconds")?;
        let created_at_ms = to_sql_int(session.created_at_ms, "created_at_ms")?;
        let authorized_at_ms = opt_to_sql_int(session.authorized_at_ms, "authorized_at_ms")?;
        let expires_at_ms = opt_to_sql_int(session.expires_at_ms, "expires_at_ms")?;
        let last_activity_at_ms = opt_to_sql_int(session.last_activity_at_ms, "last_activity_at_ms")?;
        let conn = self.conn.lock().await;
        let result = conn.execute(
            &format!(
                "INSERT INTO web_sessions ({WEB_SESSION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                session.id,
                session.user_id,
                session.status.as_str(),
                session.permission.as_str(),
                session.web_public_key.as_ref().map(|k| k.as_slice()),
                session.device_id,
                session.device_public_key.as_ref().map(|k| k.as_slice()),
                session.encrypted_session_key,
                session.responder_public_key.as_ref().map(|k| k.as_slice()),
                max_idle_seconds,
                session_ttl_seconds,
                created_at_ms,
                authorized_at_ms,
                expires_at_ms,
                last_activity_at_ms,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::AlreadyExists(session.id))
            }
            Err(e) => Err(StoreError::OperationFailed(format!(
                "failed to insert web session: {e}"
            ))),
        }
    }

    async fn load_web_session(&self, session_id: &str) -> Result<Option<WebSession>, StoreError> {
        let conn = self.conn.lock().await;
        Self::select_session(&conn, session_id)
    }

    async fn list_web_sessions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<WebSession>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {WEB_SESSION_COLUMNS} FROM web_sessions
                 WHERE user_id = ?1 ORDER BY created_at_ms"
            ))
            .map_err(op_err("failed to prepare statement"))?;
        let rows = stmt
            .query_map(params![user_id], Self::row_to_session)
            .map_err(op_err("failed to list web sessions"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(op_err("failed to read web session"))
    }

    async fn authorize_web_session(
        &self,
        session_id: &str,
        grant: AuthorizationGrant,
    ) -> Result<AuthorizeOutcome, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(op_err("failed to begin transaction"))?;

        let session = Self::select_session(&tx, session_id)?;
        let device = Self::select_device(&tx, &grant.device_id)?;
        if let Err(reason) = check_authorization(session.as_ref(), device.as_ref(), &grant.caller_user_id) {
            return Ok(AuthorizeOutcome::Denied(reason));
        }
        let (Some(mut session), Some(device)) = (session, device) else {
            return Ok(AuthorizeOutcome::Denied(DenyReason::SessionNotFound));
        };
        apply_authorization(&mut session, &device, &grant);
        let max_idle_seconds = to_sql_int(session.max_idle_seconds, "max_idle_seconds")?;
        let session_ttl_seconds = to_sql_int(session.session_ttl_seconds, "session_ttl_seconds")?;
        let authorized_at_ms = opt_to_sql_int(session.authorized_at_ms, "authorized_at_ms")?;
        let expires_at_ms = opt_to_sql_int(session.expires_at_ms, "expires_at_ms")?;
        let last_activity_at_ms = opt_to_sql_int(session.last_activity_at_ms, "last_activity_at_ms")?;

        let changed = tx
            .execute(
                "UPDATE web_sessions SET
                    status = 'active', permission = ?2, device_id = ?3, device_public_key = ?4,
                    encrypted_session_key = ?5, responder_public_key = ?6,
                    max_idle_seconds = ?7, session_ttl_seconds = ?8,
                    authorized_at_ms = ?9, expires_at_ms = ?10, last_activity_at_ms = ?11
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    session.id,
                    session.permission.as_str(),
                    session.device_id,
                    device.public_key.as_slice(),
                    session.encrypted_session_key,
                    grant.responder_public_key.as_slice(),
                    max_idle_seconds,
                    session_ttl_seconds,
                    authorized_at_ms,
                    expires_at_ms,
                    last_activity_at_ms,
                ],
            )
            .map_err(op_err("failed to authorize web session"))?;
        if changed != 1 {
            return Ok(AuthorizeOutcome::Denied(DenyReason::SessionNotPending));
        }
        tx.commit().map_err(op_err("failed to commit authorization"))?;
        Ok(AuthorizeOutcome::Authorized(session))
    }

    async fn validate_web_session(
        &self,
        session_id: &str,
        now_ms: u64,
    ) -> Result<SessionCheck, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(op_err("failed to begin transaction"))?;
        let check = Self::check_and_expire(&tx, session_id, now_ms)?;
        tx.commit().map_err(op_err("failed to commit validation"))?;
        Ok(check)
    }

    async fn touch_web_session(
        &self,
        session_id: &str,
        now_ms: u64,
    ) -> Result<SessionCheck, StoreError> {
        let activity_ms = to_sql_int(now_ms, "now_ms")?;
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(op_err("failed to begin transaction"))?;
        let check = Self::check_and_expire(&tx, session_id, now_ms)?;
        if check.is_valid() {
            tx.execute(
                "UPDATE web_sessions SET last_activity_at_ms = MAX(COALESCE(last_activity_at_ms, 0), ?2)
                 WHERE id = ?1 AND status = 'active'",
                params![session_id, activity_ms],
            )
            .map_err(op_err("failed to record activity"))?;
        }
        tx.commit().map_err(op_err("failed to commit activity"))?;
        Ok(check)
    }

    async fn revoke_web_session(
        &self,
        session_id: &str,
        caller_user_id: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE web_sessions SET status = 'expired'
                 WHERE id = ?1 AND user_id = ?2 AND status IN ('pending', 'active')",
                params![session_id, caller_user_id],
            )
            .map_err(op_err("failed to revoke web session"))?;
        Ok(changed > 0)
    }

    async fn expire_overdue_web_sessions(&self, now_ms: u64) -> Result<usize, StoreError> {
        let now = to_sql_int(now_ms, "now_ms")?;
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE web_sessions SET status = 'expired'
             WHERE status = 'active' AND (expires_at_ms IS NULL OR expires_at_ms < ?1)",
            params![now],
        )
        .map_err(op_err("failed to expire web sessions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Permission, WebSessionStatus};
    use tempfile::TempDir;

    const NOW: u64 = 1_700_000_000_000;

    fn device(id: &str, user: &str) -> RegisteredDevice {
        RegisteredDevice {
            device_id: id.into(),
            user_id: user.into(),
            public_key: [7u8; 32],
            role: DeviceRole::TrustedExecutor,
            is_active: true,
        }
    }

    fn grant(user: &str, device_id: &str) -> AuthorizationGrant {
        AuthorizationGrant {
            caller_user_id: user.into(),
            device_id: device_id.into(),
            encrypted_session_key: vec![1, 2, 3],
            responder_public_key: [9u8; 32],
            permission: Permission::FullControl,
            ttl_seconds: 3600,
            max_idle_seconds: 600,
            now_ms: NOW,
        }
    }

    async fn seeded(store: &SqliteStore) {
        store.register_device(device("dev-1", "user-1")).await.unwrap();
        store
            .insert_web_session(WebSession::pending(
                "ws-1",
                "user-1",
                Some([5u8; 32]),
                1800,
                86_400,
                NOW,
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;
        let loaded = store.load_web_session("ws-1").await.unwrap().unwrap();
        assert_eq!(
            loaded,
            WebSession::pending("ws-1", "user-1", Some([5u8; 32]), 1800, 86_400, NOW)
        );
        assert_eq!(store.list_web_sessions_for_user("user-1").await.unwrap().len(), 1);
        assert!(store.list_web_sessions_for_user("user-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;
        let dup = WebSession::pending("ws-1", "user-1", None, 1, 1, NOW);
        assert_eq!(
            store.insert_web_session(dup).await,
            Err(StoreError::AlreadyExists("ws-1".into()))
        );
    }

    #[tokio::test]
    async fn test_authorize_once() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;

        let AuthorizeOutcome::Authorized(session) = store
            .authorize_web_session("ws-1", grant("user-1", "dev-1"))
            .await
            .unwrap()
        else {
            panic!("expected authorization");
        };
        assert_eq!(session.expires_at_ms, Some(NOW + 3_600_000));
        assert_eq!(
            store.load_web_session("ws-1").await.unwrap().unwrap(),
            session
        );

        assert_eq!(
            store
                .authorize_web_session("ws-1", grant("user-1", "dev-1"))
                .await
                .unwrap(),
            AuthorizeOutcome::Denied(DenyReason::SessionNotPending)
        );
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_rejected() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;

        let mut huge = grant("user-1", "dev-1");
        huge.ttl_seconds = u64::MAX / 1000;
        assert!(matches!(
            store.authorize_web_session("ws-1", huge).await,
            Err(StoreError::OperationFailed(_))
        ));
        let session = store.load_web_session("ws-1").await.unwrap().unwrap();
        assert_eq!(session.status, WebSessionStatus::Pending);
        assert_eq!(session.expires_at_ms, None);

        let overflow = WebSession::pending("ws-2", "user-1", None, 1800, u64::MAX, NOW);
        assert!(matches!(
            store.insert_web_session(overflow).await,
            Err(StoreError::OperationFailed(_))
        ));
        assert!(store.load_web_session("ws-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_device_role_persisted_and_enforced() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;
        let mut viewer = device("dev-2", "user-1");
        viewer.role = DeviceRole::TemporaryViewer;
        store.register_device(viewer.clone()).await.unwrap();

        assert_eq!(store.load_device("dev-2").await.unwrap(), Some(viewer));
        assert_eq!(
            store
                .authorize_web_session("ws-1", grant("user-1", "dev-2"))
                .await
                .unwrap(),
            AuthorizeOutcome::Denied(DenyReason::DeviceRoleNotAllowed)
        );
    }

    #[tokio::test]
    async fn test_authorize_denied_for_other_user() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;
        store.register_device(device("dev-2", "user-2")).await.unwrap();
        assert_eq!(
            store
                .authorize_web_session("ws-1", grant("user-2", "dev-2"))
                .await
                .unwrap(),
            AuthorizeOutcome::Denied(DenyReason::NotSessionOwner)
        );
        assert_eq!(
            store
                .authorize_web_session("ws-1", grant("user-1", "dev-2"))
                .await
                .unwrap(),
            AuthorizeOutcome::Denied(DenyReason::DeviceNotOwned)
        );
    }

    #[tokio::test]
    async fn test_idle_expiry_persisted() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;
        store
            .authorize_web_session("ws-1", grant("user-1", "dev-1"))
            .await
            .unwrap();

        assert_eq!(
            store.touch_web_session("ws-1", NOW + 500_000).await.unwrap(),
            SessionCheck::Valid
        );
        // Idle window restarts from the touch.
        assert_eq!(
            store.validate_web_session("ws-1", NOW + 1_100_000).await.unwrap(),
            SessionCheck::Valid
        );
        assert_eq!(
            store.validate_web_session("ws-1", NOW + 1_100_001).await.unwrap(),
            SessionCheck::IdleTimeout
        );
        let session = store.load_web_session("ws-1").await.unwrap().unwrap();
        assert_eq!(session.status, WebSessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_touch_monotonic() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;
        store
            .authorize_web_session("ws-1", grant("user-1", "dev-1"))
            .await
            .unwrap();
        store.touch_web_session("ws-1", NOW + 9_000).await.unwrap();
        store.touch_web_session("ws-1", NOW + 3_000).await.unwrap();
        let session = store.load_web_session("ws-1").await.unwrap().unwrap();
        assert_eq!(session.last_activity_at_ms, Some(NOW + 9_000));
    }

    #[tokio::test]
    async fn test_revoke_and_sweep() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;
        store
            .insert_web_session(WebSession::pending("ws-2", "user-1", None, 1800, 86_400, NOW))
            .await
            .unwrap();
        store
            .authorize_web_session("ws-1", grant("user-1", "dev-1"))
            .await
            .unwrap();

        assert!(!store.revoke_web_session("ws-2", "user-9").await.unwrap());
        assert!(store.revoke_web_session("ws-2", "user-1").await.unwrap());
        assert_eq!(store.expire_overdue_web_sessions(NOW + 3_600_000).await.unwrap(), 0);
        assert_eq!(store.expire_overdue_web_sessions(NOW + 3_600_001).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_trusted_devices_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tandem.db");
        let info = TrustedDeviceInfo {
            device_id: "peer".into(),
            device_name: "Peer".into(),
            role: DeviceRole::TrustRoot,
            public_key: [4u8; 32],
            trusted_at_ms: NOW,
            expires_at_ms: Some(NOW + 1),
        };
        {
            let store = SqliteStore::new(&path).unwrap();
            store.save_trusted_device(info.clone()).await.unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.list_trusted_devices().await.unwrap(), vec![info]);
        assert!(store.remove_trusted_device("peer").await.unwrap());
        assert!(store.load_trusted_device("peer").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_device_deactivation() {
        let store = SqliteStore::new_in_memory().unwrap();
        seeded(&store).await;
        assert!(store.deactivate_device("dev-1").await.unwrap());
        let dev = store.load_device("dev-1").await.unwrap().unwrap();
        assert!(!dev.is_active);
    }
}
