// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROPERTY-BASED TESTS — rlt-crypto
//
// Signature soundness over arbitrary secrets and messages.
// Run: cargo test --release -p rlt-crypto --test prop_crypto
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use proptest::prelude::*;
use rlt_crypto::{verify_signature, KeyPair};

proptest! {
    /// PROPERTY: any 32-byte secret yields a keypair whose signatures verify
    #[test]
    fn prop_sign_verify(secret in any::<[u8; 32]>(), msg in proptest::collection::vec(any::<u8>(), 0..256)) {
        let pair = KeyPair::from_secret_bytes(&secret);
        let sig = pair.sign(&msg);
        prop_assert!(verify_signature(&msg, &sig, &pair.public_key));
    }

    /// PROPERTY: public key derivation is deterministic in the secret
    #[test]
    fn prop_deterministic_pubkey(secret in any::<[u8; 32]>()) {
        let a = KeyPair::from_secret_bytes(&secret);
        let b = KeyPair::from_secret_bytes(&secret);
        prop_assert_eq!(a.public_key, b.public_key);
    }

    /// PROPERTY: flipping any signature byte invalidates verification
    #[test]
    fn prop_signature_tamper_detected(
        secret in any::<[u8; 32]>(),
        msg in proptest::collection::vec(any::<u8>(), 1..128),
        byte_idx in 0usize..64,
    ) {
        let pair = KeyPair::from_secret_bytes(&secret);
        let mut sig = pair.sign(&msg);
        sig[byte_idx] ^= 0x01;
        prop_assert!(!verify_signature(&msg, &sig, &pair.public_key));
    }

    /// PROPERTY: a signature never verifies under a different message suffix
    #[test]
    fn prop_message_binding(
        secret in any::<[u8; 32]>(),
        msg in proptest::collection::vec(any::<u8>(), 1..128),
        extra in 1u8..=255,
    ) {
        let pair = KeyPair::from_secret_bytes(&secret);
        let sig = pair.sign(&msg);
        let mut other = msg.clone();
        other.push(extra);
        prop_assert!(!verify_signature(&other, &sig, &pair.public_key));
    }
}
