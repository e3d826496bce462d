#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::aead::{decrypt, encrypt_with_nonce};
    use crate::keys::KeyPair;
    use crate::pairwise::PairwiseSecret;
    use crate::session_keys::{derive_session_key_from_pair, SESSION_CONTEXT_V1};
    use crate::transcript::Transcript;

    proptest! {
        #[test]
        fn test_ecdh_symmetry(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let alice = KeyPair::from_private_bytes(&a).unwrap();
            let bob = KeyPair::from_private_bytes(&b).unwrap();
            let ab = alice.diffie_hellman(bob.public_key());
            let ba = bob.diffie_hellman(alice.public_key());
            match (ab, ba) {
                (Ok(x), Ok(y)) => prop_assert_eq!(*x, *y),
                (Err(x), Err(y)) => prop_assert_eq!(x, y),
                _ => prop_assert!(false, "asymmetric result"),
            }
        }

        #[test]
        fn test_session_key_deterministic(
            secret in any::<[u8; 32]>(),
            session_id in "[a-z0-9-]{1,40}",
        ) {
            let s = PairwiseSecret::from_bytes(secret);
            let k1 = derive_session_key_from_pair(&s, &session_id, SESSION_CONTEXT_V1);
            let k2 = derive_session_key_from_pair(&s, &session_id, SESSION_CONTEXT_V1);
            prop_assert_eq!(*k1, *k2);
        }

        #[test]
        fn test_session_ids_give_distinct_keys(
            secret in any::<[u8; 32]>(),
            a in "[a-z0-9]{1,20}",
            b in "[a-z0-9]{1,20}",
        ) {
            prop_assume!(a != b);
            let s = PairwiseSecret::from_bytes(secret);
            let ka = derive_session_key_from_pair(&s, &a, SESSION_CONTEXT_V1);
            let kb = derive_session_key_from_pair(&s, &b, SESSION_CONTEXT_V1);
            prop_assert_ne!(*ka, *kb);
        }

        #[test]
        fn test_aead_bit_flip_rejected(
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; 12]>(),
            msg in proptest::collection::vec(any::<u8>(), 0..128),
            flip in any::<usize>(),
        ) {
            let sealed = encrypt_with_nonce(&key, &nonce, &msg, b"").unwrap();
            let mut ct = sealed.ciphertext.clone();
            let idx = flip % ct.len();
            ct[idx] ^= 0x01;
            prop_assert!(decrypt(&key, &nonce, &ct).is_err());
        }

        #[test]
        fn test_transcript_determinism(
            tag1 in any::<u32>(),
            data1 in any::<Vec<u8>>(),
            tag2 in any::<u32>(),
            data2 in any::<Vec<u8>>()
        ) {
            let mut t1 = Transcript::new("test");
            t1.append_bytes(tag1, &data1).append_bytes(tag2, &data2);
            let mut t2 = Transcript::new("test");
            t2.append_bytes(tag1, &data1).append_bytes(tag2, &data2);
            prop_assert_eq!(t1.finalize(), t2.finalize());
        }
    }
}
