//! Pairing protocol V1: legacy master-key transfer.
//!
//! The initiator shows a QR with an ephemeral X25519 key. The responder,
//! which already holds the account master key, encrypts it under
//! `HKDF(ECDH(responder_eph, initiator_eph), info = "pairing")` and sends it
//! back. Nothing long-term is exchanged; the ephemeral keys are dropped as
//! soon as the attempt concludes.

use std::fmt;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use tandem_crypto::aead;
use tandem_crypto::encoding::{decode_base64, encode_base64};
use tandem_crypto::kdf::derive_key_32;
use tandem_crypto::{CryptoError, KeyPair};

use crate::config::PairingConfig;
use crate::errors::{PairingError, ValidationError};
use crate::qr::{decode_public_key, is_expired, PairingQrDataV1, PairingResponseV1};

const PAIRING_INFO_V1: &[u8] = b"pairing";

/// The account master key recovered by a successful V1 pairing.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey(Zeroizing<Vec<u8>>);

impl MasterKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey(<{} bytes redacted>)", self.0.len())
    }
}

// ============================================================================
// State
// ============================================================================

/// State of a V1 pairing attempt on the initiator side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingStateV1 {
    /// Created, no QR shown yet
    Idle,
    /// QR is displayed
    WaitingForScan,
    /// The responder scanned the QR
    WaitingForResponse,
    Completed { master_key: MasterKey },
    Failed { error: PairingError },
}

/// Derive the V1 transport key from a raw ECDH output.
fn pairing_key_v1(shared: &[u8]) -> Zeroizing<[u8; 32]> {
    derive_key_32(shared, None, PAIRING_INFO_V1)
}

// ============================================================================
// Initiator
// ============================================================================

/// Initiator side of one V1 pairing attempt.
pub struct PairingSessionV1 {
    session_id: String,
    state: PairingStateV1,
    ephemeral: Option<KeyPair>,
    device_id: String,
    device_name: String,
    created_at_ms: u64,
    expires_at_ms: u64,
}

impl PairingSessionV1 {
    /// Start an attempt with the default five-minute timeout.
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>, now_ms: u64) -> Self {
        Self::with_config(device_id, device_name, now_ms, &PairingConfig::default())
    }

    pub fn with_config(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        now_ms: u64,
        config: &PairingConfig,
    ) -> Self {
        let session = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            state: PairingStateV1::Idle,
            ephemeral: Some(KeyPair::generate()),
            device_id: device_id.into(),
            device_name: device_name.into(),
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(config.session_timeout_ms),
        };
        debug!(session_id = %session.session_id, device_id = %session.device_id, "pairing v1 session created");
        session
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> &PairingStateV1 {
        &self.state
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }

    /// The recovered master key, once `Completed`.
    pub fn master_key(&self) -> Option<&MasterKey> {
        match &self.state {
            PairingStateV1::Completed { master_key } => Some(master_key),
            _ => None,
        }
    }

    /// Build the QR payload and move to `WaitingForScan`.
    pub fn create_qr(&mut self) -> Result<PairingQrDataV1, PairingError> {
        if self.state != PairingStateV1::Idle {
            return Err(PairingError::InvalidState(
                "QR can only be created from Idle".into(),
            ));
        }
        let ephemeral = self.ephemeral.as_ref().ok_or_else(|| {
            PairingError::InvalidState("ephemeral key already consumed".into())
        })?;
        let qr = PairingQrDataV1 {
            version: 1,
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            public_key: encode_base64(ephemeral.public_key()),
            timestamp: self.created_at_ms,
        };
        self.state = PairingStateV1::WaitingForScan;
        Ok(qr)
    }

    /// The responder reported that it scanned the QR.
    pub fn mark_scanned(&mut self) -> Result<(), PairingError> {
        if self.state != PairingStateV1::WaitingForScan {
            return Err(PairingError::InvalidState(
                "mark_scanned requires WaitingForScan".into(),
            ));
        }
        self.state = PairingStateV1::WaitingForResponse;
        Ok(())
    }

    /// Decrypt the responder's master key.
    ///
    /// Accepted while waiting for either the scan or the response. Any
    /// failure moves the session to `Failed` and drops the ephemeral key.
    pub fn complete(
        &mut self,
        response: &PairingResponseV1,
        now_ms: u64,
    ) -> Result<MasterKey, PairingError> {
        match self.state {
            PairingStateV1::WaitingForScan | PairingStateV1::WaitingForResponse => {}
            _ => {
                return Err(PairingError::InvalidState(
                    "no pairing response expected in this state".into(),
                ))
            }
        }

        // The ephemeral key never outlives this call.
        let ephemeral = self.ephemeral.take();
        let result = match ephemeral {
            Some(ephemeral) if !self.is_expired(now_ms) => decrypt_response(&ephemeral, response),
            Some(_) => Err(PairingError::Expired),
            None => Err(PairingError::InvalidState("ephemeral key already consumed".into())),
        };

        match result {
            Ok(master_key) => {
                info!(session_id = %self.session_id, "pairing v1 completed");
                self.state = PairingStateV1::Completed {
                    master_key: master_key.clone(),
                };
                Ok(master_key)
            }
            Err(error) => {
                warn!(session_id = %self.session_id, code = error.code(), "pairing v1 failed");
                self.state = PairingStateV1::Failed {
                    error: error.clone(),
                };
                Err(error)
            }
        }
    }
}

impl fmt::Debug for PairingSessionV1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingSessionV1")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("device_id", &self.device_id)
            .field("expires_at_ms", &self.expires_at_ms)
            .finish_non_exhaustive()
    }
}

fn decrypt_response(
    ephemeral: &KeyPair,
    response: &PairingResponseV1,
) -> Result<MasterKey, PairingError> {
    if response.version != 1 {
        return Err(ValidationError::UnsupportedVersion(response.version).into());
    }
    let responder_public = decode_public_key(&response.public_key)?;
    let nonce = decode_base64(&response.nonce).map_err(|_| ValidationError::MalformedPayload)?;
    let ciphertext =
        decode_base64(&response.ciphertext).map_err(|_| ValidationError::MalformedPayload)?;

    let shared = ephemeral
        .diffie_hellman(&responder_public)
        .map_err(|e| ValidationError::InvalidPublicKey(e.to_string()))?;
    let key = pairing_key_v1(&shared[..]);

    let plaintext = aead::decrypt(&key[..], &nonce, &ciphertext).map_err(|e| match e {
        CryptoError::InvalidNonceLength { .. } => {
            PairingError::Validation(ValidationError::MalformedPayload)
        }
        _ => PairingError::DecryptionFailed,
    })?;
    Ok(MasterKey::new(plaintext))
}

// ============================================================================
// Responder
// ============================================================================

/// Encrypt `master_key` to the initiator of `qr`.
///
/// Rejects a payload of another version or older than five minutes before
/// doing any key agreement.
pub fn respond_v1(
    qr: &PairingQrDataV1,
    master_key: &[u8],
    now_ms: u64,
) -> Result<PairingResponseV1, PairingError> {
    respond_v1_with_config(qr, master_key, now_ms, &PairingConfig::default())
}

pub fn respond_v1_with_config(
    qr: &PairingQrDataV1,
    master_key: &[u8],
    now_ms: u64,
    config: &PairingConfig,
) -> Result<PairingResponseV1, PairingError> {
    if qr.version != 1 {
        return Err(ValidationError::UnsupportedVersion(qr.version).into());
    }
    if is_expired(qr.timestamp, now_ms, config.max_payload_age_ms) {
        debug!(device_id = %qr.device_id, "pairing v1 QR expired");
        return Err(ValidationError::Expired.into());
    }
    let initiator_public = decode_public_key(&qr.public_key)?;

    let ephemeral = KeyPair::generate();
    let shared = ephemeral
        .diffie_hellman(&initiator_public)
        .map_err(|e| ValidationError::InvalidPublicKey(e.to_string()))?;
    let key = pairing_key_v1(&shared[..]);
    let sealed = aead::encrypt(&key[..], master_key)?;

    info!(device_id = %qr.device_id, "pairing v1 response created");
    Ok(PairingResponseV1 {
        version: 1,
        nonce: encode_base64(&sealed.nonce),
        ciphertext: encode_base64(&sealed.ciphertext),
        public_key: encode_base64(ephemeral.public_key()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qr;

    const NOW: u64 = 1_700_000_000_000;

    fn started() -> (PairingSessionV1, PairingQrDataV1) {
        let mut session = PairingSessionV1::new("dev-new", "New Phone", NOW);
        let qr = session.create_qr().unwrap();
        (session, qr)
    }

    #[test]
    fn test_round_trip() {
        let (mut session, qr) = started();
        assert_eq!(session.state(), &PairingStateV1::WaitingForScan);
        session.mark_scanned().unwrap();

        let master = [0x5Au8; 32];
        let response = respond_v1(&qr, &master, NOW + 1_000).unwrap();
        let recovered = session.complete(&response, NOW + 2_000).unwrap();

        assert_eq!(recovered.as_bytes(), &master);
        assert_eq!(session.master_key().map(|k| k.as_bytes()), Some(&master[..]));
    }

    #[test]
    fn test_round_trip_through_json() {
        let (mut session, qr) = started();
        let scanned = qr::parse_v1(&qr::serialize_v1(&qr)).unwrap();
        let response = respond_v1(&scanned, b"master", NOW).unwrap();
        let received = qr::parse_response_v1(&qr::serialize_response_v1(&response)).unwrap();
        assert_eq!(session.complete(&received, NOW).unwrap().as_bytes(), b"master");
    }

    #[test]
    fn test_one_bit_key_difference_fails() {
        let initiator = KeyPair::generate();
        let responder = KeyPair::generate();
        let shared = responder.diffie_hellman(initiator.public_key()).unwrap();
        let key = pairing_key_v1(&shared[..]);
        let sealed = aead::encrypt(&key[..], &[1u8; 32]).unwrap();

        let mut flipped = *key;
        flipped[0] ^= 0x01;
        assert_eq!(
            aead::decrypt(&flipped, &sealed.nonce, &sealed.ciphertext),
            Err(CryptoError::DecryptionFailed)
        );

        let initiator_shared = initiator.diffie_hellman(responder.public_key()).unwrap();
        let initiator_key = pairing_key_v1(&initiator_shared[..]);
        assert_eq!(
            aead::decrypt(&initiator_key[..], &sealed.nonce, &sealed.ciphertext).unwrap(),
            vec![1u8; 32]
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let (mut session, qr) = started();
        let mut response = respond_v1(&qr, &[1u8; 32], NOW).unwrap();
        let mut ct = decode_base64(&response.ciphertext).unwrap();
        ct[0] ^= 0x01;
        response.ciphertext = encode_base64(&ct);

        assert_eq!(session.complete(&response, NOW), Err(PairingError::DecryptionFailed));
        assert!(matches!(
            session.state(),
            PairingStateV1::Failed { error: PairingError::DecryptionFailed }
        ));
        assert!(session.master_key().is_none());
    }

    #[test]
    fn test_response_for_other_session_fails() {
        let (mut session, _qr) = started();
        let (_other_session, other_qr) = started();
        let response = respond_v1(&other_qr, &[1u8; 32], NOW).unwrap();
        assert_eq!(session.complete(&response, NOW), Err(PairingError::DecryptionFailed));
    }

    #[test]
    fn test_expired_session_refuses() {
        let (mut session, qr) = started();
        let response = respond_v1(&qr, &[1u8; 32], NOW).unwrap();
        let late = session.expires_at_ms() + 1;
        assert_eq!(session.complete(&response, late), Err(PairingError::Expired));
        assert_eq!(
            session.state(),
            &PairingStateV1::Failed { error: PairingError::Expired }
        );
    }

    #[test]
    fn test_complete_only_once() {
        let (mut session, qr) = started();
        let response = respond_v1(&qr, &[1u8; 32], NOW).unwrap();
        session.complete(&response, NOW).unwrap();
        assert!(matches!(
            session.complete(&response, NOW),
            Err(PairingError::InvalidState(_))
        ));
    }

    #[test]
    fn test_responder_rejects_old_qr() {
        let (_session, qr) = started();
        let result = respond_v1(&qr, &[1u8; 32], NOW + qr::DEFAULT_MAX_AGE_MS + 1);
        assert_eq!(result, Err(PairingError::Validation(ValidationError::Expired)));
        assert!(respond_v1(&qr, &[1u8; 32], NOW + qr::DEFAULT_MAX_AGE_MS).is_ok());
    }

    #[test]
    fn test_responder_rejects_wrong_version() {
        let (_session, mut qr) = started();
        qr.version = 2;
        assert_eq!(
            respond_v1(&qr, &[1u8; 32], NOW),
            Err(PairingError::Validation(ValidationError::UnsupportedVersion(2)))
        );
    }

    #[test]
    fn test_responder_rejects_short_key() {
        let (_session, mut qr) = started();
        qr.public_key = encode_base64(&[9u8; 31]);
        assert!(matches!(
            respond_v1(&qr, &[1u8; 32], NOW),
            Err(PairingError::Validation(ValidationError::InvalidPublicKey(_)))
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut session = PairingSessionV1::new("d", "n", NOW);
        assert!(session.mark_scanned().is_err());
        session.create_qr().unwrap();
        assert!(session.create_qr().is_err());
    }

    #[test]
    fn test_debug_hides_master_key() {
        let key = MasterKey::new(vec![0xAB; 4]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("redacted"));
        assert!(!dbg.contains("171"));
    }
}
