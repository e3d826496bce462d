#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::qr::{self, is_expired, PairingQrDataV1};
    use crate::store::{apply_authorization, evaluate, AuthorizationGrant, Permission, SessionCheck, WebSession};
    use crate::trust::{DeviceRole, RegisteredDevice};

    fn device() -> RegisteredDevice {
        RegisteredDevice {
            device_id: "dev".into(),
            user_id: "user".into(),
            public_key: [1u8; 32],
            role: DeviceRole::TrustRoot,
            is_active: true,
        }
    }

    proptest! {
        #[test]
        fn test_expiry_boundary(ts in 0u64..1u64 << 50, max_age in 0u64..1u64 << 30) {
            prop_assert!(!is_expired(ts, ts + max_age, max_age));
            prop_assert!(is_expired(ts, ts + max_age + 1, max_age));
        }

        #[test]
        fn test_v1_payload_parses_back(
            device_id in "[a-zA-Z0-9-]{0,36}",
            device_name in "\\PC{0,32}",
            timestamp in any::<u64>(),
        ) {
            let payload = PairingQrDataV1 {
                version: 1,
                device_id,
                device_name,
                public_key: "AAAA".into(),
                timestamp,
            };
            prop_assert_eq!(qr::parse_v1(&qr::serialize_v1(&payload)), Some(payload));
        }

        #[test]
        fn test_never_valid_past_ttl(
            ttl in 1u64..100_000,
            idle in 1u64..100_000,
            activity in 0u64..200_000_000,
            late in 1u64..1_000_000,
        ) {
            let now = 1_700_000_000_000;
            let mut session = WebSession::pending("ws", "user", None, idle, ttl, now);
            let grant = AuthorizationGrant {
                caller_user_id: "user".into(),
                device_id: "dev".into(),
                encrypted_session_key: vec![0],
                responder_public_key: [2u8; 32],
                permission: Permission::ViewOnly,
                ttl_seconds: ttl,
                max_idle_seconds: idle,
                now_ms: now,
            };
            apply_authorization(&mut session, &device(), &grant);
            session.last_activity_at_ms = Some(now + activity);

            let expires_at = now + ttl * 1000;
            prop_assert_eq!(evaluate(&session, expires_at + late), SessionCheck::TtlExceeded);
        }
    }
}
