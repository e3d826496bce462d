//! Test harness for Tandem core flows.
//!
//! Drives both sides of each protocol in-process, passing every payload
//! through its JSON wire form the way a QR scanner and a return channel
//! would.

use std::sync::Arc;

use tandem_crypto::session_keys::{generate_session_key, SessionKey};
use tandem_crypto::KeyPair;

use crate::clock::Clock;
use crate::errors::{CoreError, PairingError, ValidationError};
use crate::pairing_v1::{respond_v1, MasterKey, PairingSessionV1};
use crate::pairing_v2::{respond_v2, validate_qr_v2_str, PairingOutcome, PairingSessionV2};
use crate::qr;
use crate::store::{Permission, Store, WebSession};
use crate::trust::{DeviceRole, LocalDevice, RegisteredDevice};
use crate::web_session::{open_session_key, seal_session_key_for_web, AuthorizeRequest, WebSessionManager};

/// A device with a freshly generated long-term key.
pub fn make_device(device_id: &str, device_name: &str, role: DeviceRole) -> LocalDevice {
    LocalDevice::new(device_id, device_name, role, Arc::new(KeyPair::generate()))
}

/// The store record for `device` under `user_id`.
pub fn registered(device: &LocalDevice, user_id: &str) -> RegisteredDevice {
    RegisteredDevice {
        device_id: device.device_id.clone(),
        user_id: user_id.to_string(),
        public_key: *device.public_key(),
        role: device.role,
        is_active: true,
    }
}

/// Run a complete V1 exchange and return what the initiator received.
///
/// 1. Initiator creates a session and shows the QR
/// 2. Responder scans it and encrypts `master_key`
/// 3. Initiator decrypts the response
pub fn run_v1_flow(master_key: &[u8], now_ms: u64) -> Result<MasterKey, PairingError> {
    let mut initiator = PairingSessionV1::new("new-device", "New Device", now_ms);
    let qr_text = qr::serialize_v1(&initiator.create_qr()?);

    let scanned = qr::parse_v1(&qr_text).ok_or(ValidationError::MalformedPayload)?;
    initiator.mark_scanned()?;
    let response_text = qr::serialize_response_v1(&respond_v1(&scanned, master_key, now_ms)?);

    let response = qr::parse_response_v1(&response_text).ok_or(ValidationError::MalformedPayload)?;
    initiator.complete(&response, now_ms)
}

/// Both sides of a finished V2 pairing.
#[derive(Debug)]
pub struct V2FlowResult {
    pub initiator: PairingOutcome,
    pub responder: PairingOutcome,
    pub initiator_sas: String,
    pub responder_sas: String,
}

/// Run a complete V2 exchange and persist the peer on each side.
pub async fn run_v2_flow<S: Store + ?Sized>(
    initiator: &LocalDevice,
    responder: &LocalDevice,
    account_id: &str,
    initiator_store: &S,
    responder_store: &S,
    now_ms: u64,
) -> Result<V2FlowResult, CoreError> {
    let mut session = PairingSessionV2::new(initiator.clone(), account_id, now_ms);
    let qr_text = qr::serialize_v2(&session.create_qr()?);

    // Responder: scan, validate, answer.
    let verified = validate_qr_v2_str(&qr_text, account_id, now_ms).map_err(PairingError::from)?;
    let (response, responder_outcome) = respond_v2(&verified, responder, now_ms)?;
    let response_text = qr::serialize_response_v2(&response);
    let responder_sas = qr::parse_v2(&qr_text)
        .map(|scanned| crate::pairing_v2::pairing_sas(&scanned, &response))
        .ok_or(PairingError::from(ValidationError::MalformedPayload))?;
    responder_store
        .save_trusted_device(responder_outcome.trusted_device.clone())
        .await?;

    // Initiator: receive, verify, remember.
    session.mark_scanned()?;
    let response =
        qr::parse_response_v2(&response_text).ok_or(PairingError::from(ValidationError::MalformedPayload))?;
    let initiator_sas = session.sas(&response);
    let initiator_outcome = session.complete(&response, now_ms)?;
    initiator_store
        .save_trusted_device(initiator_outcome.trusted_device.clone())
        .await?;

    Ok(V2FlowResult {
        initiator: initiator_outcome,
        responder: responder_outcome,
        initiator_sas,
        responder_sas,
    })
}

/// Admit a web client through `device`, which must already be registered
/// to `user_id`. Returns the active session and the key the web client
/// recovered from it.
pub async fn run_web_session_flow<S: Store + ?Sized, C: Clock + ?Sized>(
    manager: &WebSessionManager<S, C>,
    user_id: &str,
    device: &LocalDevice,
    permission: Permission,
) -> Result<(WebSession, SessionKey), CoreError> {
    let web_key = KeyPair::generate();
    let pending = manager.create(user_id, Some(*web_key.public_key())).await?;

    // Device side.
    let session_key = generate_session_key()?;
    let (encrypted_session_key, responder_public_key) =
        seal_session_key_for_web(&session_key[..], web_key.public_key(), &pending.id)?;
    let active = manager
        .authorize(
            user_id,
            AuthorizeRequest {
                session_id: pending.id.clone(),
                device_id: device.device_id.clone(),
                encrypted_session_key,
                responder_public_key,
                permission,
                ttl_seconds: None,
                max_idle_seconds: None,
            },
        )
        .await?;

    // Web side.
    let recovered = open_session_key(&web_key, &active)?;
    if recovered[..] != session_key[..] {
        return Err(PairingError::InvalidState("web client recovered a different key".into()).into());
    }
    Ok((active, recovered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::WebSessionConfig;
    use crate::store::InMemoryStore;

    const NOW: u64 = 1_700_000_000_000;

    #[test]
    fn test_v1_flow() {
        let master = [0x5Au8; 32];
        let received = run_v1_flow(&master, NOW).unwrap();
        assert_eq!(received.as_bytes(), &master);
    }

    #[tokio::test]
    async fn test_v2_flow() {
        let a = make_device("device-a", "Laptop", DeviceRole::TrustRoot);
        let b = make_device("device-b", "Phone", DeviceRole::TrustedExecutor);
        let store_a = InMemoryStore::new();
        let store_b = InMemoryStore::new();

        let result = run_v2_flow(&a, &b, "acct-1", &store_a, &store_b, NOW)
            .await
            .unwrap();
        assert_eq!(result.initiator.pairwise_secret, result.responder.pairwise_secret);
        assert_eq!(result.initiator_sas, result.responder_sas);
        assert!(store_a.load_trusted_device("device-b").await.unwrap().is_some());
        assert!(store_b.load_trusted_device("device-a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_web_session_flow() {
        let device = make_device("device-a", "Laptop", DeviceRole::TrustRoot);
        let store = InMemoryStore::new_shared();
        store.register_device(registered(&device, "user-1")).await.unwrap();
        let manager = WebSessionManager::new(
            store,
            Arc::new(ManualClock::new(NOW)),
            WebSessionConfig::default(),
        );

        let (session, _key) =
            run_web_session_flow(&manager, "user-1", &device, Permission::ViewOnly)
                .await
                .unwrap();
        assert!(manager.validate(&session.id).await.unwrap());
    }
}
