//! Device identities and the records kept about trusted peers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tandem_crypto::KeyPair;

use crate::config::IdentityConfig;
use crate::keystore::{KeyStore, KeyStoreError};

/// What a device is allowed to do inside an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Holds the account's root of trust; can admit other devices.
    TrustRoot,
    /// A paired device that can run work on behalf of the account.
    TrustedExecutor,
    /// Short-lived, view-only participant.
    TemporaryViewer,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::TrustRoot => "trust_root",
            DeviceRole::TrustedExecutor => "trusted_executor",
            DeviceRole::TemporaryViewer => "temporary_viewer",
        }
    }

    /// Whether a device in this role may authorize web sessions.
    pub fn can_authorize_web_sessions(&self) -> bool {
        !matches!(self, DeviceRole::TemporaryViewer)
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trust_root" => Ok(DeviceRole::TrustRoot),
            "trusted_executor" => Ok(DeviceRole::TrustedExecutor),
            "temporary_viewer" => Ok(DeviceRole::TemporaryViewer),
            other => Err(format!("unknown device role: {other}")),
        }
    }
}

/// This device: its identity and its long-term key pair.
///
/// The key pair is shared, not copied, across pairing sessions.
#[derive(Debug, Clone)]
pub struct LocalDevice {
    pub device_id: String,
    pub device_name: String,
    pub role: DeviceRole,
    pub key_pair: Arc<KeyPair>,
}

impl LocalDevice {
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        role: DeviceRole,
        key_pair: Arc<KeyPair>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            role,
            key_pair,
        }
    }

    /// Build the local identity from config, loading the long-term key
    /// from `key_store` or generating it on first run.
    ///
    /// Without a configured `device_id` the id is derived from the key
    /// fingerprint, so it stays stable as long as the key does.
    pub fn from_config(
        identity: &IdentityConfig,
        key_store: &dyn KeyStore,
    ) -> Result<Self, KeyStoreError> {
        let key_pair = key_store.load_or_generate()?;
        let device_id = identity
            .device_id
            .clone()
            .unwrap_or_else(|| format!("device-{}", key_pair.fingerprint()));
        Ok(Self::new(device_id, identity.device_name.clone(), identity.role, key_pair))
    }

    pub fn public_key(&self) -> &[u8; 32] {
        self.key_pair.public_key()
    }
}

/// A peer this device completed V2 pairing with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedDeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub role: DeviceRole,
    /// Peer long-term X25519 public key.
    pub public_key: [u8; 32],
    pub trusted_at_ms: u64,
    /// `None` means trusted until explicitly removed.
    pub expires_at_ms: Option<u64>,
}

impl TrustedDeviceInfo {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(exp) if now_ms > exp)
    }
}

/// A device registered under a user account, as the web-session
/// authorization checks see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredDevice {
    pub device_id: String,
    pub user_id: String,
    pub public_key: [u8; 32],
    /// Only roles that pass [`DeviceRole::can_authorize_web_sessions`] may
    /// admit web clients.
    pub role: DeviceRole,
    pub is_active: bool,
}
