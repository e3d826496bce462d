//! Storage abstraction for registered devices, trusted devices and web
//! sessions.
//!
//! Every web-session state change is a single guarded store operation: the
//! read, the checks and the write happen under one lock (in memory) or one
//! transaction (SQLite). Two callers racing to authorize the same pending
//! session therefore see exactly one success.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::Config;
use crate::trust::{RegisteredDevice, TrustedDeviceInfo};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),
}

// ============================================================================
// Data Models
// ============================================================================

/// Lifecycle of a web session. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSessionStatus {
    Pending,
    Active,
    /// Terminal
    Expired,
}

impl WebSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebSessionStatus::Pending => "pending",
            WebSessionStatus::Active => "active",
            WebSessionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for WebSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebSessionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WebSessionStatus::Pending),
            "active" => Ok(WebSessionStatus::Active),
            "expired" => Ok(WebSessionStatus::Expired),
            other => Err(StoreError::DataCorruption(format!("unknown status: {other}"))),
        }
    }
}

/// What an authorized web client may do. Ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewOnly,
    Interact,
    FullControl,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewOnly => "view_only",
            Permission::Interact => "interact",
            Permission::FullControl => "full_control",
        }
    }

    /// Whether this grant covers `required`.
    pub fn allows(&self, required: Permission) -> bool {
        *self >= required
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view_only" => Ok(Permission::ViewOnly),
            "interact" => Ok(Permission::Interact),
            "full_control" => Ok(Permission::FullControl),
            other => Err(StoreError::DataCorruption(format!("unknown permission: {other}"))),
        }
    }
}

/// A web client's admission record.
///
/// Authorization fields are `None` until the session is authorized. Once
/// active, `expires_at_ms == authorized_at_ms + session_ttl_seconds * 1000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSession {
    pub id: String,
    pub user_id: String,
    pub status: WebSessionStatus,
    pub permission: Permission,
    /// Web client's ephemeral X25519 public key.
    pub web_public_key: Option<[u8; 32]>,
    pub device_id: Option<String>,
    /// Snapshot of the authorizing device's public key.
    pub device_public_key: Option<[u8; 32]>,
    /// Session key sealed to `web_public_key`.
    pub encrypted_session_key: Option<Vec<u8>>,
    /// Ephemeral key needed to open `encrypted_session_key`.
    pub responder_public_key: Option<[u8; 32]>,
    pub max_idle_seconds: u64,
    pub session_ttl_seconds: u64,
    pub created_at_ms: u64,
    pub authorized_at_ms: Option<u64>,
    pub expires_at_ms: Option<u64>,
    pub last_activity_at_ms: Option<u64>,
}

impl WebSession {
    /// A fresh pending session.
    pub fn pending(
        id: impl Into<String>,
        user_id: impl Into<String>,
        web_public_key: Option<[u8; 32]>,
        max_idle_seconds: u64,
        session_ttl_seconds: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            status: WebSessionStatus::Pending,
            permission: Permission::ViewOnly,
            web_public_key,
            device_id: None,
            device_public_key: None,
            encrypted_session_key: None,
            responder_public_key: None,
            max_idle_seconds,
            session_ttl_seconds,
            created_at_ms: now_ms,
            authorized_at_ms: None,
            expires_at_ms: None,
            last_activity_at_ms: None,
        }
    }
}

/// Everything an authorization writes into a pending session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub caller_user_id: String,
    pub device_id: String,
    pub encrypted_session_key: Vec<u8>,
    pub responder_public_key: [u8; 32],
    pub permission: Permission,
    pub ttl_seconds: u64,
    pub max_idle_seconds: u64,
    pub now_ms: u64,
}

/// Why an authorization was refused. Never shown to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    SessionNotFound,
    NotSessionOwner,
    SessionNotPending,
    DeviceNotFound,
    DeviceNotOwned,
    DeviceInactive,
    DeviceRoleNotAllowed,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::SessionNotFound => "session_not_found",
            DenyReason::NotSessionOwner => "not_session_owner",
            DenyReason::SessionNotPending => "session_not_pending",
            DenyReason::DeviceNotFound => "device_not_found",
            DenyReason::DeviceNotOwned => "device_not_owned",
            DenyReason::DeviceInactive => "device_inactive",
            DenyReason::DeviceRoleNotAllowed => "device_role_not_allowed",
        }
    }
}

/// Result of a guarded authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    Authorized(WebSession),
    Denied(DenyReason),
}

/// How a session looks at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    Valid,
    NotFound,
    /// Pending or already expired
    NotActive,
    /// Past `expires_at_ms`
    TtlExceeded,
    /// No activity for longer than `max_idle_seconds`
    IdleTimeout,
}

impl SessionCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, SessionCheck::Valid)
    }
}

// ============================================================================
// Guard Logic
// ============================================================================

/// Authorization preconditions. Shared by every store implementation.
pub fn check_authorization(
    session: Option<&WebSession>,
    device: Option<&RegisteredDevice>,
    caller_user_id: &str,
) -> Result<(), DenyReason> {
    let session = session.ok_or(DenyReason::SessionNotFound)?;
    if session.user_id != caller_user_id {
        return Err(DenyReason::NotSessionOwner);
    }
    if session.status != WebSessionStatus::Pending {
        return Err(DenyReason::SessionNotPending);
    }
    let device = device.ok_or(DenyReason::DeviceNotFound)?;
    if device.user_id != caller_user_id {
        return Err(DenyReason::DeviceNotOwned);
    }
    if !device.is_active {
        return Err(DenyReason::DeviceInactive);
    }
    if !device.role.can_authorize_web_sessions() {
        return Err(DenyReason::DeviceRoleNotAllowed);
    }
    Ok(())
}

/// Apply a grant to a session that passed [`check_authorization`].
pub fn apply_authorization(
    session: &mut WebSession,
    device: &RegisteredDevice,
    grant: &AuthorizationGrant,
) {
    session.status = WebSessionStatus::Active;
    session.permission = grant.permission;
    session.device_id = Some(device.device_id.clone());
    session.device_public_key = Some(device.public_key);
    session.encrypted_session_key = Some(grant.encrypted_session_key.clone());
    session.responder_public_key = Some(grant.responder_public_key);
    session.max_idle_seconds = grant.max_idle_seconds;
    session.session_ttl_seconds = grant.ttl_seconds;
    session.authorized_at_ms = Some(grant.now_ms);
    session.expires_at_ms = Some(
        grant
            .now_ms
            .saturating_add(grant.ttl_seconds.saturating_mul(1000)),
    );
    session.last_activity_at_ms = Some(grant.now_ms);
}

/// Classify a session at `now_ms`. Pure; callers persist the result.
///
/// The TTL check comes before the idle check, so a session past both is
/// reported as `TtlExceeded`.
pub fn evaluate(session: &WebSession, now_ms: u64) -> SessionCheck {
    if session.status != WebSessionStatus::Active {
        return SessionCheck::NotActive;
    }
    match session.expires_at_ms {
        Some(expires_at) if now_ms <= expires_at => {}
        _ => return SessionCheck::TtlExceeded,
    }
    let last_activity = session
        .last_activity_at_ms
        .or(session.authorized_at_ms)
        .unwrap_or(session.created_at_ms);
    let idle_deadline = last_activity.saturating_add(session.max_idle_seconds.saturating_mul(1000));
    if now_ms > idle_deadline {
        return SessionCheck::IdleTimeout;
    }
    SessionCheck::Valid
}

// ============================================================================
// Store Trait
// ============================================================================

/// Persistence for devices and web sessions.
#[async_trait]
pub trait Store: Send + Sync {
    // -------------------------------------------------------------------------
    // Registered Devices
    // -------------------------------------------------------------------------

    /// Insert or replace a registered device.
    async fn register_device(&self, device: RegisteredDevice) -> Result<(), StoreError>;

    async fn load_device(&self, device_id: &str) -> Result<Option<RegisteredDevice>, StoreError>;

    /// Mark a device inactive. Returns false if it did not exist.
    async fn deactivate_device(&self, device_id: &str) -> Result<bool, StoreError>;

    // -------------------------------------------------------------------------
    // Trusted Devices
    // -------------------------------------------------------------------------

    /// Insert or replace the record for a paired peer.
    async fn save_trusted_device(&self, device: TrustedDeviceInfo) -> Result<(), StoreError>;

    async fn load_trusted_device(
        &self,
        device_id: &str,
    ) -> Result<Option<TrustedDeviceInfo>, StoreError>;

    async fn list_trusted_devices(&self) -> Result<Vec<TrustedDeviceInfo>, StoreError>;

    /// Returns false if the device was not trusted.
    async fn remove_trusted_device(&self, device_id: &str) -> Result<bool, StoreError>;

    // -------------------------------------------------------------------------
    // Web Sessions
    // -------------------------------------------------------------------------

    /// Insert a new session. Fails with `AlreadyExists` on id collision.
    async fn insert_web_session(&self, session: WebSession) -> Result<(), StoreError>;

    async fn load_web_session(&self, session_id: &str) -> Result<Option<WebSession>, StoreError>;

    async fn list_web_sessions_for_user(&self, user_id: &str)
        -> Result<Vec<WebSession>, StoreError>;

    /// Check preconditions and activate a pending session, atomically.
    async fn authorize_web_session(
        &self,
        session_id: &str,
        grant: AuthorizationGrant,
    ) -> Result<AuthorizeOutcome, StoreError>;

    /// Evaluate a session and persist `expired` on idle timeout, atomically.
    async fn validate_web_session(
        &self,
        session_id: &str,
        now_ms: u64,
    ) -> Result<SessionCheck, StoreError>;

    /// [`Store::validate_web_session`], then move `last_activity_at_ms`
    /// forward to `now_ms` if the session is valid. Never moves it back.
    async fn touch_web_session(
        &self,
        session_id: &str,
        now_ms: u64,
    ) -> Result<SessionCheck, StoreError>;

    /// Expire a pending or active session owned by `caller_user_id`.
    /// Returns false if nothing changed.
    async fn revoke_web_session(
        &self,
        session_id: &str,
        caller_user_id: &str,
    ) -> Result<bool, StoreError>;

    /// Expire every active session past its absolute expiry.
    async fn expire_overdue_web_sessions(&self, now_ms: u64) -> Result<usize, StoreError>;
}

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

/// Thread-safe in-memory store for tests and single-process use.
///
/// Lock order is always sessions, then devices.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    devices: Arc<RwLock<HashMap<String, RegisteredDevice>>>,
    trusted: Arc<RwLock<HashMap<String, TrustedDeviceInfo>>>,
    sessions: Arc<RwLock<HashMap<String, WebSession>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn check_and_expire(sessions: &mut HashMap<String, WebSession>, session_id: &str, now_ms: u64) -> SessionCheck {
        let Some(session) = sessions.get_mut(session_id) else {
            return SessionCheck::NotFound;
        };
        let check = evaluate(session, now_ms);
        if check == SessionCheck::IdleTimeout {
            session.status = WebSessionStatus::Expired;
        }
        check
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn register_device(&self, device: RegisteredDevice) -> Result<(), StoreError> {
        self.devices
            .write()
            .await
            .insert(device.device_id.clone(), device);
        Ok(())
    }

    async fn load_device(&self, device_id: &str) -> Result<Option<RegisteredDevice>, StoreError> {
        Ok(self.devices.read().await.get(device_id).cloned())
    }

    async fn deactivate_device(&self, device_id: &str) -> Result<bool, StoreError> {
        let mut devices = self.devices.write().await;
        Ok(match devices.get_mut(device_id) {
            Some(device) => {
                device.is_active = false;
                true
            }
            None => false,
        })
    }

    async fn save_trusted_device(&self, device: TrustedDeviceInfo) -> Result<(), StoreError> {
        self.trusted
            .write()
            .await
            .insert(device.device_id.clone(), device);
        Ok(())
    }

    async fn load_trusted_device(
        &self,
        device_id: &str,
    ) -> Result<Option<TrustedDeviceInfo>, StoreError> {
        Ok(self.trusted.read().await.get(device_id).cloned())
    }

    async fn list_trusted_devices(&self) -> Result<Vec<TrustedDeviceInfo>, StoreError> {
        let mut list: Vec<_> = self.trusted.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(list)
    }

    async fn remove_trusted_device(&self, device_id: &str) -> Result<bool, StoreError> {
        Ok(self.trusted.write().await.remove(device_id).is_some())
    }

    async fn insert_web_session(&self, session: WebSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::AlreadyExists(session.id));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn load_web_session(&self, session_id: &str) -> Result<Option<WebSession>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn list_web_sessions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<WebSession>, StoreError> {
        let mut list: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by_key(|s| s.created_at_ms);
        Ok(list)
    }

    async fn authorize_web_session(
        &self,
        session_id: &str,
        grant: AuthorizationGrant,
    ) -> Result<AuthorizeOutcome, StoreError> {
        let mut sessions = self.sessions.write().await;
        let devices = self.devices.read().await;

        let device = devices.get(&grant.device_id);
        if let Err(reason) =
            check_authorization(sessions.get(session_id), device, &grant.caller_user_id)
        {
            return Ok(AuthorizeOutcome::Denied(reason));
        }
        let (Some(session), Some(device)) = (sessions.get_mut(session_id), device) else {
            return Ok(AuthorizeOutcome::Denied(DenyReason::SessionNotFound));
        };
        apply_authorization(session, device, &grant);
        Ok(AuthorizeOutcome::Authorized(session.clone()))
    }

    async fn validate_web_session(
        &self,
        session_id: &str,
        now_ms: u64,
    ) -> Result<SessionCheck, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(Self::check_and_expire(&mut sessions, session_id, now_ms))
    }

    async fn touch_web_session(
        &self,
        session_id: &str,
        now_ms: u64,
    ) -> Result<SessionCheck, StoreError> {
        let mut sessions = self.sessions.write().await;
        let check = Self::check_and_expire(&mut sessions, session_id, now_ms);
        if check.is_valid() {
            if let Some(session) = sessions.get_mut(session_id) {
                let last = session.last_activity_at_ms.unwrap_or(0);
                session.last_activity_at_ms = Some(last.max(now_ms));
            }
        }
        Ok(check)
    }

    async fn revoke_web_session(
        &self,
        session_id: &str,
        caller_user_id: &str,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session)
                if session.user_id == caller_user_id
                    && session.status != WebSessionStatus::Expired =>
            {
                session.status = WebSessionStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_overdue_web_sessions(&self, now_ms: u64) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write().await;
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.status == WebSessionStatus::Active
                && evaluate(session, now_ms) == SessionCheck::TtlExceeded
            {
                session.status = WebSessionStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }
}

// ============================================================================
// Backend Selection
// ============================================================================

/// Open the backend named by `config.storage`.
///
/// The SQLite database lives at [`Config::db_path`]; its parent directory
/// is created if missing.
pub fn open_store(config: &Config) -> Result<Arc<dyn Store>, StoreError> {
    let store: Arc<dyn Store> = match config.storage.backend.as_str() {
        "memory" => InMemoryStore::new_shared(),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.db_path().ok_or_else(|| {
                StoreError::OperationFailed("no database path configured".to_string())
            })?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::OperationFailed(format!(
                        "failed to create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            Arc::new(crate::sqlite_store::SqliteStore::new(&path)?)
        }
        other => {
            return Err(StoreError::OperationFailed(format!(
                "storage backend '{other}' is not available"
            )))
        }
    };
    info!(backend = %config.storage.backend, "store opened");
    Ok(store)
}
