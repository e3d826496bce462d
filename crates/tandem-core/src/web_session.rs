//! Web-session admission: `pending -> active -> expired`.
//!
//! A web client creates a pending session with its ephemeral public key. A
//! trusted device owned by the same user authorizes it, sealing a fresh
//! session key to that public key. The web client then presents the session
//! on every request; it stays valid until its absolute TTL passes, it sits
//! idle too long, or its owner revokes it.
//!
//! Authorization failures are reported as a bare [`WebSessionError::AccessDenied`].
//! The reason is only logged at debug level on this side.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use tandem_crypto::hybrid::{open_from_sender, seal_for_recipient};
use tandem_crypto::session_keys::SessionKey;
use tandem_crypto::{CryptoError, KeyPair};

use crate::clock::Clock;
use crate::config::{WebSessionConfig, MAX_SESSION_LIMIT_SECONDS};
use crate::errors::WebSessionError;
use crate::store::{
    AuthorizationGrant, AuthorizeOutcome, Permission, SessionCheck, Store, WebSession,
};

/// Parameters a trusted device supplies to authorize a pending session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest {
    pub session_id: String,
    pub device_id: String,
    /// Session key sealed to the web client's public key.
    pub encrypted_session_key: Vec<u8>,
    /// Ephemeral key the web client needs to open `encrypted_session_key`.
    pub responder_public_key: [u8; 32],
    pub permission: Permission,
    /// Falls back to the configured TTL.
    pub ttl_seconds: Option<u64>,
    /// Falls back to the configured idle limit.
    pub max_idle_seconds: Option<u64>,
}

/// Drives web sessions through a [`Store`].
pub struct WebSessionManager<S: Store + ?Sized, C: Clock + ?Sized> {
    store: Arc<S>,
    clock: Arc<C>,
    config: WebSessionConfig,
}

impl<S: Store + ?Sized, C: Clock + ?Sized> WebSessionManager<S, C> {
    pub fn new(store: Arc<S>, clock: Arc<C>, config: WebSessionConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &WebSessionConfig {
        &self.config
    }

    /// Open a pending session for `user_id`.
    pub async fn create(
        &self,
        user_id: &str,
        web_public_key: Option<[u8; 32]>,
    ) -> Result<WebSession, WebSessionError> {
        if user_id.is_empty() {
            return Err(WebSessionError::InvalidParameters("user id is empty".into()));
        }
        let session = WebSession::pending(
            Uuid::new_v4().to_string(),
            user_id,
            web_public_key,
            self.config.max_idle_seconds,
            self.config.session_ttl_seconds,
            self.clock.now_ms(),
        );
        self.store.insert_web_session(session.clone()).await?;
        debug!(session_id = %session.id, user_id, "web session created");
        Ok(session)
    }

    /// Activate a pending session on behalf of one of the caller's devices.
    pub async fn authorize(
        &self,
        caller_user_id: &str,
        request: AuthorizeRequest,
    ) -> Result<WebSession, WebSessionError> {
        let (ttl_seconds, max_idle_seconds) = self.resolve_limits(&request)?;
        if request.encrypted_session_key.is_empty() {
            return Err(WebSessionError::InvalidParameters(
                "encrypted session key is empty".into(),
            ));
        }

        let grant = AuthorizationGrant {
            caller_user_id: caller_user_id.to_string(),
            device_id: request.device_id.clone(),
            encrypted_session_key: request.encrypted_session_key,
            responder_public_key: request.responder_public_key,
            permission: request.permission,
            ttl_seconds,
            max_idle_seconds,
            now_ms: self.clock.now_ms(),
        };

        match self
            .store
            .authorize_web_session(&request.session_id, grant)
            .await?
        {
            AuthorizeOutcome::Authorized(session) => {
                let device_key = session
                    .device_public_key
                    .map(|pk| hex::encode(&pk[..8]))
                    .unwrap_or_default();
                info!(
                    session_id = %session.id,
                    device_id = %request.device_id,
                    device_key = %device_key,
                    permission = %session.permission,
                    ttl_seconds,
                    "web session authorized"
                );
                Ok(session)
            }
            AuthorizeOutcome::Denied(reason) => {
                debug!(
                    session_id = %request.session_id,
                    device_id = %request.device_id,
                    reason = reason.as_str(),
                    "web session authorization denied"
                );
                Err(WebSessionError::AccessDenied)
            }
        }
    }

    fn resolve_limits(&self, request: &AuthorizeRequest) -> Result<(u64, u64), WebSessionError> {
        let ttl = request.ttl_seconds.unwrap_or(self.config.session_ttl_seconds);
        let idle = request
            .max_idle_seconds
            .unwrap_or(self.config.max_idle_seconds);
        if ttl == 0 {
            return Err(WebSessionError::InvalidParameters(
                "ttl_seconds must be positive".into(),
            ));
        }
        if idle == 0 {
            return Err(WebSessionError::InvalidParameters(
                "max_idle_seconds must be positive".into(),
            ));
        }
        let max_ttl = self.config.max_session_ttl_seconds.min(MAX_SESSION_LIMIT_SECONDS);
        if ttl > max_ttl {
            return Err(WebSessionError::InvalidParameters(format!(
                "ttl_seconds {ttl} exceeds maximum {max_ttl}"
            )));
        }
        if idle > MAX_SESSION_LIMIT_SECONDS {
            return Err(WebSessionError::InvalidParameters(format!(
                "max_idle_seconds {idle} exceeds maximum {MAX_SESSION_LIMIT_SECONDS}"
            )));
        }
        Ok((ttl, idle))
    }

    /// Detailed state of a session now. Persists `expired` on idle timeout.
    pub async fn check(&self, session_id: &str) -> Result<SessionCheck, WebSessionError> {
        let check = self
            .store
            .validate_web_session(session_id, self.clock.now_ms())
            .await?;
        if check == SessionCheck::IdleTimeout {
            info!(session_id, "web session expired after idle timeout");
        }
        Ok(check)
    }

    /// Whether the session may be used right now.
    pub async fn validate(&self, session_id: &str) -> Result<bool, WebSessionError> {
        Ok(self.check(session_id).await?.is_valid())
    }

    /// Validate and, if valid, mark the session as used now.
    pub async fn record_activity(&self, session_id: &str) -> Result<bool, WebSessionError> {
        let check = self
            .store
            .touch_web_session(session_id, self.clock.now_ms())
            .await?;
        if check == SessionCheck::IdleTimeout {
            info!(session_id, "web session expired after idle timeout");
        }
        Ok(check.is_valid())
    }

    /// Valid session whose permission covers `required`.
    pub async fn require_permission(
        &self,
        session_id: &str,
        required: Permission,
    ) -> Result<WebSession, WebSessionError> {
        if !self.validate(session_id).await? {
            return Err(WebSessionError::AccessDenied);
        }
        let session = self
            .store
            .load_web_session(session_id)
            .await?
            .ok_or(WebSessionError::AccessDenied)?;
        if !session.permission.allows(required) {
            debug!(
                session_id,
                granted = %session.permission,
                required = %required,
                "web session lacks permission"
            );
            return Err(WebSessionError::AccessDenied);
        }
        Ok(session)
    }

    /// End a session early. Only its owner may revoke it.
    pub async fn revoke(&self, caller_user_id: &str, session_id: &str) -> Result<(), WebSessionError> {
        if self
            .store
            .revoke_web_session(session_id, caller_user_id)
            .await?
        {
            info!(session_id, "web session revoked");
            Ok(())
        } else {
            debug!(session_id, "web session revoke refused");
            Err(WebSessionError::AccessDenied)
        }
    }

    /// Expire every active session past its absolute TTL.
    pub async fn expire_overdue(&self) -> Result<usize, WebSessionError> {
        let count = self
            .store
            .expire_overdue_web_sessions(self.clock.now_ms())
            .await?;
        if count > 0 {
            info!(count, "expired overdue web sessions");
        }
        Ok(count)
    }
}

// ============================================================================
// Session key transport
// ============================================================================

/// Seal a session key to the web client's public key.
///
/// Returns `(encrypted_session_key, responder_public_key)` ready for an
/// [`AuthorizeRequest`].
pub fn seal_session_key_for_web(
    session_key: &[u8],
    web_public_key: &[u8; 32],
    session_id: &str,
) -> Result<(Vec<u8>, [u8; 32]), WebSessionError> {
    let sealed = seal_for_recipient(session_key, web_public_key, session_id)?;
    Ok((sealed.blob, sealed.ephemeral_public))
}

/// Web side: recover the session key from an authorized session.
pub fn open_session_key(
    web_key: &KeyPair,
    session: &WebSession,
) -> Result<SessionKey, WebSessionError> {
    let (Some(blob), Some(responder)) = (
        session.encrypted_session_key.as_ref(),
        session.responder_public_key.as_ref(),
    ) else {
        return Err(WebSessionError::InvalidParameters(
            "session has no sealed key".into(),
        ));
    };
    let plain = Zeroizing::new(open_from_sender(web_key, responder, blob, &session.id)?);
    let key: [u8; 32] = plain
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            got: plain.len(),
        })?;
    Ok(Zeroizing::new(key))
}
