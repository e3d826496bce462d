//! Persistence for the device's long-term key pair.
//!
//! The key pair is created once per device and reused for every pairing.
//! [`FileKeyStore`] keeps it in a JSON file readable only by the owner.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use tandem_crypto::encoding::{decode_key_base64, encode_base64};
use tandem_crypto::KeyPair;

/// Key store errors
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid key data: {0}")]
    InvalidKeyData(String),

    #[error("Unsupported key file version: {0}")]
    UnsupportedVersion(u32),
}

/// Storage backend for the long-term key pair.
pub trait KeyStore: Send + Sync {
    fn load(&self) -> Result<Option<KeyPair>, KeyStoreError>;
    fn store(&self, key_pair: &KeyPair) -> Result<(), KeyStoreError>;
    fn delete(&self) -> Result<(), KeyStoreError>;

    /// Load the stored key pair, generating and storing one if none exists.
    fn load_or_generate(&self) -> Result<Arc<KeyPair>, KeyStoreError> {
        if let Some(existing) = self.load()? {
            debug!(fingerprint = %existing.fingerprint(), "loaded device key");
            return Ok(Arc::new(existing));
        }
        let key_pair = KeyPair::generate();
        self.store(&key_pair)?;
        info!(fingerprint = %key_pair.fingerprint(), "generated new device key");
        Ok(Arc::new(key_pair))
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Keeps the private key in process memory only.
#[derive(Default)]
pub struct MemoryKeyStore {
    private_key: Mutex<Option<Zeroizing<[u8; 32]>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<KeyPair>, KeyStoreError> {
        let guard = self
            .private_key
            .lock()
            .map_err(|_| KeyStoreError::Serialization("key store lock poisoned".into()))?;
        guard
            .as_ref()
            .map(|bytes| {
                KeyPair::from_private_bytes(&bytes[..])
                    .map_err(|e| KeyStoreError::InvalidKeyData(e.to_string()))
            })
            .transpose()
    }

    fn store(&self, key_pair: &KeyPair) -> Result<(), KeyStoreError> {
        let mut guard = self
            .private_key
            .lock()
            .map_err(|_| KeyStoreError::Serialization("key store lock poisoned".into()))?;
        *guard = Some(key_pair.private_key_bytes());
        Ok(())
    }

    fn delete(&self) -> Result<(), KeyStoreError> {
        let mut guard = self
            .private_key
            .lock()
            .map_err(|_| KeyStoreError::Serialization("key store lock poisoned".into()))?;
        *guard = None;
        Ok(())
    }
}

// ============================================================================
// File
// ============================================================================

/// On-disk format.
#[derive(Serialize, Deserialize)]
struct StoredKey {
    version: u32,
    /// Base64 X25519 private key.
    private_key: String,
    /// Base64 public key, checked on load.
    public_key: String,
    /// RFC 3339
    created_at: String,
}

impl StoredKey {
    const CURRENT_VERSION: u32 = 1;
}

impl Drop for StoredKey {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.private_key.zeroize();
    }
}

/// JSON key file, written atomically with 0600 permissions on Unix.
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create `path` readable only by the owner and write `contents` to it.
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<KeyPair>, KeyStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = Zeroizing::new(fs::read_to_string(&self.path)?);
        let stored: StoredKey = serde_json::from_str(&contents)
            .map_err(|e| KeyStoreError::Serialization(e.to_string()))?;
        if stored.version != StoredKey::CURRENT_VERSION {
            return Err(KeyStoreError::UnsupportedVersion(stored.version));
        }

        let private = Zeroizing::new(
            decode_key_base64(&stored.private_key)
                .map_err(|e| KeyStoreError::InvalidKeyData(e.to_string()))?,
        );
        let key_pair = KeyPair::from_private_bytes(&private[..])
            .map_err(|e| KeyStoreError::InvalidKeyData(e.to_string()))?;
        if encode_base64(key_pair.public_key()) != stored.public_key {
            return Err(KeyStoreError::InvalidKeyData(
                "public key does not match private key".into(),
            ));
        }
        Ok(Some(key_pair))
    }

    fn store(&self, key_pair: &KeyPair) -> Result<(), KeyStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let stored = StoredKey {
            version: StoredKey::CURRENT_VERSION,
            private_key: encode_base64(&key_pair.private_key_bytes()[..]),
            public_key: encode_base64(key_pair.public_key()),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = Zeroizing::new(
            serde_json::to_string_pretty(&stored)
                .map_err(|e| KeyStoreError::Serialization(e.to_string()))?,
        );

        // Write atomically using a temp file
        let temp_path = self.path.with_extension("tmp");
        if let Err(e) = write_private_file(&temp_path, json.as_bytes())
            .and_then(|()| fs::rename(&temp_path, &self.path))
        {
            // The temp file may hold a partial key.
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        debug!(path = %self.path.display(), "stored device key");
        Ok(())
    }

    fn delete(&self) -> Result<(), KeyStoreError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
