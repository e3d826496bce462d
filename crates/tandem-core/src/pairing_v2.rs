//! Pairing protocol V2: device-rooted pairwise trust.
//!
//! Each device keeps one long-term X25519 key pair. Pairing exchanges the
//! long-term public keys (plus a fresh ephemeral key per attempt) and both
//! sides compute the same [`PairwiseSecret`] from long-term keys only. No
//! account-wide secret is transferred.
//!
//! The responder's `signature` field is an HMAC key-confirmation tag over a
//! transcript of both devices' ids, roles, names, long-term and ephemeral
//! public keys, the account id and both timestamps, keyed from the pairwise
//! secret. A responder that does not hold the private half of the long-term
//! key it advertises cannot produce it, and a response made for another QR
//! does not verify. [`pairing_sas`] gives both screens a 6-digit code to
//! compare when the return channel is not trusted.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use tandem_crypto::encoding::{decode_base64, encode_base64};
use tandem_crypto::sas::sas_6digit;
use tandem_crypto::transcript::Transcript;
use tandem_crypto::{compute_pairwise_secret, KeyPair, PairwiseSecret};

use crate::config::PairingConfig;
use crate::errors::{PairingError, ValidationError};
use crate::qr::{self, decode_public_key, is_expired, PairingQrDataV2, PairingResponseV2};
use crate::trust::{DeviceRole, LocalDevice, TrustedDeviceInfo};

// ============================================================================
// Types
// ============================================================================

/// State of a V2 pairing attempt on the initiator side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingStateV2 {
    Idle,
    WaitingForScan,
    WaitingForResponse,
    Completed { trusted_device: TrustedDeviceInfo },
    Failed { error: PairingError },
}

/// Result of a successful pairing, on either side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingOutcome {
    /// The peer, as this device will remember it.
    pub trusted_device: TrustedDeviceInfo,
    /// Tagged with both device ids.
    pub pairwise_secret: PairwiseSecret,
}

/// A scanned V2 payload that passed every check in [`validate_qr_v2`].
///
/// Can only be obtained from that function, so [`respond_v2`] never runs key
/// agreement on an unvalidated payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedInitiator {
    device_id: String,
    device_name: String,
    role: DeviceRole,
    public_key: [u8; 32],
    ephemeral_public_key: [u8; 32],
    timestamp: u64,
    account_id: String,
}

impl VerifiedInitiator {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

/// One side of the handshake as it enters the confirmation transcript.
struct Party<'a> {
    device_id: &'a str,
    device_name: &'a str,
    role: DeviceRole,
    public_key: &'a [u8; 32],
    ephemeral_public_key: &'a [u8; 32],
    timestamp: u64,
}

fn confirmation_transcript(account_id: &str, initiator: &Party<'_>, responder: &Party<'_>) -> Transcript {
    let mut t = Transcript::new("tandem_pairing_v2_confirm");

    // Tags are fixed and MUST NOT change once released.
    t.append_str(1, account_id);
    t.append_str(2, initiator.device_id)
        .append_str(3, initiator.device_name)
        .append_str(4, initiator.role.as_str())
        .append_bytes(5, initiator.public_key)
        .append_bytes(6, initiator.ephemeral_public_key)
        .append_u64(7, initiator.timestamp);
    t.append_str(8, responder.device_id)
        .append_str(9, responder.device_name)
        .append_str(10, responder.role.as_str())
        .append_bytes(11, responder.public_key)
        .append_bytes(12, responder.ephemeral_public_key)
        .append_u64(13, responder.timestamp);
    t
}

/// 6-digit short authentication string for a QR and its response.
///
/// Computed from public payload fields only; both devices hold identical
/// copies of both payloads, so equal codes mean neither was swapped.
pub fn pairing_sas(qr: &PairingQrDataV2, response: &PairingResponseV2) -> String {
    let mut t = Transcript::new("tandem_pairing_v2_sas");
    t.append_str(1, &qr.account_id)
        .append_str(2, &qr.device_id)
        .append_str(3, &qr.public_key)
        .append_str(4, &qr.ephemeral_public_key)
        .append_u64(5, qr.timestamp)
        .append_str(6, &response.device_id)
        .append_str(7, &response.public_key)
        .append_str(8, &response.ephemeral_public_key)
        .append_u64(9, response.timestamp);
    sas_6digit(t.as_bytes())
}

fn check_timestamp(timestamp: u64, now_ms: u64, config: &PairingConfig) -> Result<(), ValidationError> {
    if is_expired(timestamp, now_ms, config.max_payload_age_ms) {
        return Err(ValidationError::Expired);
    }
    if timestamp > now_ms.saturating_add(config.max_clock_skew_ms) {
        return Err(ValidationError::TimestampInFuture);
    }
    Ok(())
}

// ============================================================================
// Responder
// ============================================================================

/// Check a scanned V2 payload before any secret is computed.
///
/// Order: version, account, age, clock skew, key lengths.
pub fn validate_qr_v2(
    qr: &PairingQrDataV2,
    expected_account_id: &str,
    now_ms: u64,
) -> Result<VerifiedInitiator, ValidationError> {
    validate_qr_v2_with_config(qr, expected_account_id, now_ms, &PairingConfig::default())
}

pub fn validate_qr_v2_with_config(
    qr: &PairingQrDataV2,
    expected_account_id: &str,
    now_ms: u64,
    config: &PairingConfig,
) -> Result<VerifiedInitiator, ValidationError> {
    if qr.version != 2 {
        return Err(ValidationError::UnsupportedVersion(qr.version));
    }
    if qr.account_id != expected_account_id {
        debug!(device_id = %qr.device_id, "pairing v2 QR for another account");
        return Err(ValidationError::AccountMismatch);
    }
    check_timestamp(qr.timestamp, now_ms, config)?;
    let public_key = decode_public_key(&qr.public_key)?;
    let ephemeral_public_key = decode_public_key(&qr.ephemeral_public_key)?;

    Ok(VerifiedInitiator {
        device_id: qr.device_id.clone(),
        device_name: qr.device_name.clone(),
        role: qr.device_role,
        public_key,
        ephemeral_public_key,
        timestamp: qr.timestamp,
        account_id: qr.account_id.clone(),
    })
}

/// Parse and validate raw QR text in one step.
pub fn validate_qr_v2_str(
    data: &str,
    expected_account_id: &str,
    now_ms: u64,
) -> Result<VerifiedInitiator, ValidationError> {
    let qr = qr::parse_v2(data).ok_or(ValidationError::MalformedPayload)?;
    validate_qr_v2(&qr, expected_account_id, now_ms)
}

/// Answer a validated QR with this device's identity and a confirmation tag.
pub fn respond_v2(
    initiator: &VerifiedInitiator,
    local: &LocalDevice,
    now_ms: u64,
) -> Result<(PairingResponseV2, PairingOutcome), PairingError> {
    respond_v2_with_config(initiator, local, now_ms, &PairingConfig::default())
}

/// [`respond_v2`] with explicit limits.
///
/// The QR timestamp is checked again against `now_ms`, so an initiator
/// validated long ago is not answered.
pub fn respond_v2_with_config(
    initiator: &VerifiedInitiator,
    local: &LocalDevice,
    now_ms: u64,
    config: &PairingConfig,
) -> Result<(PairingResponseV2, PairingOutcome), PairingError> {
    if let Err(e) = check_timestamp(initiator.timestamp, now_ms, config) {
        debug!(device_id = %initiator.device_id, "pairing v2 initiator no longer fresh");
        return Err(e.into());
    }
    let pairwise = compute_pairwise_secret(&local.key_pair, &initiator.public_key)
        .map_err(|e| ValidationError::InvalidPublicKey(e.to_string()))?
        .with_device_ids(&initiator.device_id, &local.device_id);

    let ephemeral = KeyPair::generate();
    let transcript = confirmation_transcript(
        &initiator.account_id,
        &Party {
            device_id: &initiator.device_id,
            device_name: &initiator.device_name,
            role: initiator.role,
            public_key: &initiator.public_key,
            ephemeral_public_key: &initiator.ephemeral_public_key,
            timestamp: initiator.timestamp,
        },
        &Party {
            device_id: &local.device_id,
            device_name: &local.device_name,
            role: local.role,
            public_key: local.public_key(),
            ephemeral_public_key: ephemeral.public_key(),
            timestamp: now_ms,
        },
    );
    let tag = pairwise.confirmation_tag(transcript.as_bytes());

    let response = PairingResponseV2 {
        version: 2,
        device_id: local.device_id.clone(),
        device_name: local.device_name.clone(),
        device_role: local.role,
        public_key: encode_base64(local.public_key()),
        ephemeral_public_key: encode_base64(ephemeral.public_key()),
        signature: encode_base64(&tag),
        timestamp: now_ms,
    };

    let trusted_device = TrustedDeviceInfo {
        device_id: initiator.device_id.clone(),
        device_name: initiator.device_name.clone(),
        role: initiator.role,
        public_key: initiator.public_key,
        trusted_at_ms: now_ms,
        expires_at_ms: None,
    };

    info!(
        peer_device_id = %initiator.device_id,
        peer_fingerprint = %tandem_crypto::hash::fingerprint(&initiator.public_key),
        "pairing v2 response created"
    );
    Ok((
        response,
        PairingOutcome {
            trusted_device,
            pairwise_secret: pairwise,
        },
    ))
}

// ============================================================================
// Initiator
// ============================================================================

/// Initiator side of one V2 pairing attempt.
pub struct PairingSessionV2 {
    session_id: String,
    state: PairingStateV2,
    local: LocalDevice,
    ephemeral: Option<KeyPair>,
    ephemeral_public_key: [u8; 32],
    account_id: String,
    created_at_ms: u64,
    expires_at_ms: u64,
    config: PairingConfig,
}

impl PairingSessionV2 {
    pub fn new(local: LocalDevice, account_id: impl Into<String>, now_ms: u64) -> Self {
        Self::with_config(local, account_id, now_ms, PairingConfig::default())
    }

    pub fn with_config(
        local: LocalDevice,
        account_id: impl Into<String>,
        now_ms: u64,
        config: PairingConfig,
    ) -> Self {
        let ephemeral = KeyPair::generate();
        let session = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            state: PairingStateV2::Idle,
            ephemeral_public_key: *ephemeral.public_key(),
            ephemeral: Some(ephemeral),
            account_id: account_id.into(),
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(config.session_timeout_ms),
            config,
            local,
        };
        debug!(
            session_id = %session.session_id,
            device_id = %session.local.device_id,
            "pairing v2 session created"
        );
        session
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> &PairingStateV2 {
        &self.state
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }

    pub fn long_term_key(&self) -> &Arc<KeyPair> {
        &self.local.key_pair
    }

    pub fn trusted_device(&self) -> Option<&TrustedDeviceInfo> {
        match &self.state {
            PairingStateV2::Completed { trusted_device } => Some(trusted_device),
            _ => None,
        }
    }

    /// The QR payload for this attempt. Moves to `WaitingForScan`.
    pub fn create_qr(&mut self) -> Result<PairingQrDataV2, PairingError> {
        if self.state != PairingStateV2::Idle {
            return Err(PairingError::InvalidState(
                "QR can only be created from Idle".into(),
            ));
        }
        self.state = PairingStateV2::WaitingForScan;
        Ok(self.qr_payload())
    }

    fn qr_payload(&self) -> PairingQrDataV2 {
        PairingQrDataV2 {
            version: 2,
            device_id: self.local.device_id.clone(),
            device_name: self.local.device_name.clone(),
            device_role: self.local.role,
            public_key: encode_base64(self.local.public_key()),
            ephemeral_public_key: encode_base64(&self.ephemeral_public_key),
            timestamp: self.created_at_ms,
            account_id: self.account_id.clone(),
        }
    }

    pub fn mark_scanned(&mut self) -> Result<(), PairingError> {
        if self.state != PairingStateV2::WaitingForScan {
            return Err(PairingError::InvalidState(
                "mark_scanned requires WaitingForScan".into(),
            ));
        }
        self.state = PairingStateV2::WaitingForResponse;
        Ok(())
    }

    /// SAS for this attempt and a received response.
    pub fn sas(&self, response: &PairingResponseV2) -> String {
        pairing_sas(&self.qr_payload(), response)
    }

    /// Verify the responder and record it as trusted.
    pub fn complete(
        &mut self,
        response: &PairingResponseV2,
        now_ms: u64,
    ) -> Result<PairingOutcome, PairingError> {
        match self.state {
            PairingStateV2::WaitingForScan | PairingStateV2::WaitingForResponse => {}
            _ => {
                return Err(PairingError::InvalidState(
                    "no pairing response expected in this state".into(),
                ))
            }
        }

        // The ephemeral key is consumed by this attempt whatever the outcome.
        let result = match self.ephemeral.take() {
            Some(_) if self.is_expired(now_ms) => Err(PairingError::Expired),
            Some(_) => self.verify_response(response, now_ms),
            None => Err(PairingError::InvalidState("ephemeral key already consumed".into())),
        };

        match result {
            Ok(outcome) => {
                info!(
                    session_id = %self.session_id,
                    peer_device_id = %outcome.trusted_device.device_id,
                    "pairing v2 completed"
                );
                self.state = PairingStateV2::Completed {
                    trusted_device: outcome.trusted_device.clone(),
                };
                Ok(outcome)
            }
            Err(error) => {
                warn!(session_id = %self.session_id, code = error.code(), "pairing v2 failed");
                self.state = PairingStateV2::Failed {
                    error: error.clone(),
                };
                Err(error)
            }
        }
    }

    fn verify_response(
        &self,
        response: &PairingResponseV2,
        now_ms: u64,
    ) -> Result<PairingOutcome, PairingError> {
        if response.version != 2 {
            return Err(ValidationError::UnsupportedVersion(response.version).into());
        }
        check_timestamp(response.timestamp, now_ms, &self.config)?;
        let peer_public = decode_public_key(&response.public_key)?;
        let peer_ephemeral = decode_public_key(&response.ephemeral_public_key)?;
        let tag =
            decode_base64(&response.signature).map_err(|_| ValidationError::MalformedPayload)?;

        let pairwise = compute_pairwise_secret(&self.local.key_pair, &peer_public)
            .map_err(|e| ValidationError::InvalidPublicKey(e.to_string()))?
            .with_device_ids(&self.local.device_id, &response.device_id);

        let transcript = confirmation_transcript(
            &self.account_id,
            &Party {
                device_id: &self.local.device_id,
                device_name: &self.local.device_name,
                role: self.local.role,
                public_key: self.local.public_key(),
                ephemeral_public_key: &self.ephemeral_public_key,
                timestamp: self.created_at_ms,
            },
            &Party {
                device_id: &response.device_id,
                device_name: &response.device_name,
                role: response.device_role,
                public_key: &peer_public,
                ephemeral_public_key: &peer_ephemeral,
                timestamp: response.timestamp,
            },
        );
        if !pairwise.verify_confirmation_tag(transcript.as_bytes(), &tag) {
            return Err(PairingError::KeyConfirmationFailed);
        }

        Ok(PairingOutcome {
            trusted_device: TrustedDeviceInfo {
                device_id: response.device_id.clone(),
                device_name: response.device_name.clone(),
                role: response.device_role,
                public_key: peer_public,
                trusted_at_ms: now_ms,
                expires_at_ms: None,
            },
            pairwise_secret: pairwise,
        })
    }
}

impl fmt::Debug for PairingSessionV2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingSessionV2")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("device_id", &self.local.device_id)
            .field("account_id", &self.account_id)
            .field("expires_at_ms", &self.expires_at_ms)
            .finish_non_exhaustive()
    }
}
