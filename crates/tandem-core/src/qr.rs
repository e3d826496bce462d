//! QR payload codec.
//!
//! Payloads are JSON objects with camelCase keys and `version` first. The
//! parsers never return an error: anything that is not exactly a payload of
//! the expected version (missing or unknown fields, wrong types, other
//! version) yields `None`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tandem_crypto::encoding::decode_key_base64;

use crate::errors::ValidationError;
use crate::trust::DeviceRole;

/// Default maximum age of a QR payload or pairing response.
pub const DEFAULT_MAX_AGE_MS: u64 = 5 * 60 * 1000;

// ============================================================================
// Payloads
// ============================================================================

/// Legacy pairing QR: the initiator's ephemeral key only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PairingQrDataV1 {
    pub version: u32,
    pub device_id: String,
    pub device_name: String,
    /// Base64 X25519 ephemeral public key.
    pub public_key: String,
    /// Unix milliseconds.
    pub timestamp: u64,
}

/// Device-rooted pairing QR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PairingQrDataV2 {
    pub version: u32,
    pub device_id: String,
    pub device_name: String,
    pub device_role: DeviceRole,
    /// Base64 long-term X25519 public key.
    pub public_key: String,
    /// Base64 ephemeral X25519 public key, fresh per attempt.
    pub ephemeral_public_key: String,
    pub timestamp: u64,
    pub account_id: String,
}

/// Either payload version, discriminated by `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingPayload {
    V1(PairingQrDataV1),
    V2(PairingQrDataV2),
}

impl PairingPayload {
    pub fn version(&self) -> u32 {
        match self {
            PairingPayload::V1(p) => p.version,
            PairingPayload::V2(p) => p.version,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            PairingPayload::V1(p) => p.timestamp,
            PairingPayload::V2(p) => p.timestamp,
        }
    }
}

/// Responder output for V1: the master key encrypted to the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PairingResponseV1 {
    pub version: u32,
    /// Base64 12-byte nonce.
    pub nonce: String,
    /// Base64 ciphertext with tag.
    pub ciphertext: String,
    /// Base64 responder ephemeral public key.
    pub public_key: String,
}

/// Responder output for V2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PairingResponseV2 {
    pub version: u32,
    pub device_id: String,
    pub device_name: String,
    pub device_role: DeviceRole,
    /// Base64 responder long-term public key.
    pub public_key: String,
    /// Base64 responder ephemeral public key.
    pub ephemeral_public_key: String,
    /// Base64 key-confirmation tag.
    pub signature: String,
    pub timestamp: u64,
}

// ============================================================================
// Codec
// ============================================================================

fn to_json<T: Serialize>(value: &T) -> String {
    // Plain structs of strings and integers always serialize.
    serde_json::to_string(value).expect("payload serializes to JSON")
}

fn from_json<T: DeserializeOwned>(data: &str) -> Option<T> {
    serde_json::from_str(data).ok()
}

pub fn serialize(payload: &PairingPayload) -> String {
    match payload {
        PairingPayload::V1(p) => serialize_v1(p),
        PairingPayload::V2(p) => serialize_v2(p),
    }
}

pub fn serialize_v1(payload: &PairingQrDataV1) -> String {
    to_json(payload)
}

pub fn serialize_v2(payload: &PairingQrDataV2) -> String {
    to_json(payload)
}

/// Parse either version.
pub fn parse(data: &str) -> Option<PairingPayload> {
    parse_v1(data)
        .map(PairingPayload::V1)
        .or_else(|| parse_v2(data).map(PairingPayload::V2))
}

pub fn parse_v1(data: &str) -> Option<PairingQrDataV1> {
    from_json::<PairingQrDataV1>(data).filter(|p| p.version == 1)
}

pub fn parse_v2(data: &str) -> Option<PairingQrDataV2> {
    from_json::<PairingQrDataV2>(data).filter(|p| p.version == 2)
}

pub fn serialize_response_v1(response: &PairingResponseV1) -> String {
    to_json(response)
}

pub fn serialize_response_v2(response: &PairingResponseV2) -> String {
    to_json(response)
}

pub fn parse_response_v1(data: &str) -> Option<PairingResponseV1> {
    from_json::<PairingResponseV1>(data).filter(|r| r.version == 1)
}

pub fn parse_response_v2(data: &str) -> Option<PairingResponseV2> {
    from_json::<PairingResponseV2>(data).filter(|r| r.version == 2)
}

/// Decode a base64 payload key that must be exactly 32 bytes.
pub fn decode_public_key(encoded: &str) -> Result<[u8; 32], ValidationError> {
    decode_key_base64(encoded).map_err(|e| ValidationError::InvalidPublicKey(e.to_string()))
}

/// True iff `timestamp_ms` is more than `max_age_ms` older than `now_ms`.
///
/// Exactly `max_age_ms` old is still valid. Timestamps in the future are
/// never expired here.
pub fn is_expired(timestamp_ms: u64, now_ms: u64, max_age_ms: u64) -> bool {
    now_ms.saturating_sub(timestamp_ms) > max_age_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1() -> PairingQrDataV1 {
        PairingQrDataV1 {
            version: 1,
            device_id: "dev-1".into(),
            device_name: "Phone".into(),
            public_key: "AAAA".into(),
            timestamp: 1_700_000_000_000,
        }
    }

    fn v2() -> PairingQrDataV2 {
        PairingQrDataV2 {
            version: 2,
            device_id: "dev-2".into(),
            device_name: "Laptop".into(),
            device_role: DeviceRole::TrustRoot,
            public_key: "BBBB".into(),
            ephemeral_public_key: "CCCC".into(),
            timestamp: 1_700_000_000_000,
            account_id: "acct-1".into(),
        }
    }

    #[test]
    fn test_serialize_v1_shape() {
        let json = serialize_v1(&v1());
        assert!(json.starts_with("{\"version\":1,"));
        assert!(json.contains("\"deviceId\":\"dev-1\""));
        assert!(json.contains("\"publicKey\":\"AAAA\""));
    }

    #[test]
    fn test_serialize_v2_shape() {
        let json = serialize_v2(&v2());
        assert!(json.starts_with("{\"version\":2,"));
        assert!(json.contains("\"deviceRole\":\"trust_root\""));
        assert!(json.contains("\"accountId\":\"acct-1\""));
        assert!(json.contains("\"ephemeralPublicKey\":\"CCCC\""));
    }

    #[test]
    fn test_parse_dispatches_on_version() {
        assert_eq!(parse(&serialize_v1(&v1())), Some(PairingPayload::V1(v1())));
        assert_eq!(parse(&serialize_v2(&v2())), Some(PairingPayload::V2(v2())));
    }

    #[test]
    fn test_versions_do_not_cross() {
        assert_eq!(parse_v1(&serialize_v2(&v2())), None);
        assert_eq!(parse_v2(&serialize_v1(&v1())), None);
    }

    #[test]
    fn test_wrong_version_number_rejected() {
        let mut p = v1();
        p.version = 2;
        assert_eq!(parse_v1(&serialize_v1(&p)), None);
        assert_eq!(parse(&serialize_v1(&p)), None);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{"version":1,"deviceId":"d","deviceName":"n","publicKey":"k","timestamp":1,"extra":true}"#;
        assert_eq!(parse_v1(json), None);
    }

    #[test]
    fn test_missing_field_rejected() {
        let json = r#"{"version":1,"deviceId":"d","deviceName":"n","timestamp":1}"#;
        assert_eq!(parse_v1(json), None);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let json = r#"{"version":1,"deviceId":"d","deviceName":"n","publicKey":"k","timestamp":"soon"}"#;
        assert_eq!(parse_v1(json), None);
        assert_eq!(parse("not json"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let json = serialize_v2(&v2()).replace("trust_root", "overlord");
        assert_eq!(parse_v2(&json), None);
    }

    #[test]
    fn test_response_v2_parses() {
        let resp = PairingResponseV2 {
            version: 2,
            device_id: "r".into(),
            device_name: "Responder".into(),
            device_role: DeviceRole::TrustedExecutor,
            public_key: "k".into(),
            ephemeral_public_key: "e".into(),
            signature: "s".into(),
            timestamp: 5,
        };
        assert_eq!(parse_response_v2(&serialize_response_v2(&resp)), Some(resp));
        assert!(parse_response_v1(&serialize_response_v2(&resp_v2_stub())).is_none());
    }

    fn resp_v2_stub() -> PairingResponseV2 {
        PairingResponseV2 {
            version: 2,
            device_id: String::new(),
            device_name: String::new(),
            device_role: DeviceRole::TemporaryViewer,
            public_key: String::new(),
            ephemeral_public_key: String::new(),
            signature: String::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let ts = 1_000_000;
        assert!(!is_expired(ts, ts + DEFAULT_MAX_AGE_MS, DEFAULT_MAX_AGE_MS));
        assert!(is_expired(ts, ts + DEFAULT_MAX_AGE_MS + 1, DEFAULT_MAX_AGE_MS));
    }

    #[test]
    fn test_decode_public_key() {
        let encoded = tandem_crypto::encoding::encode_base64(&[3u8; 32]);
        assert_eq!(decode_public_key(&encoded).unwrap(), [3u8; 32]);
        assert!(matches!(
            decode_public_key("AAAA"),
            Err(ValidationError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_future_timestamp_not_expired() {
        assert!(!is_expired(2_000, 1_000, DEFAULT_MAX_AGE_MS));
    }
}
