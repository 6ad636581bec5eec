// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - CRYPTOGRAPHY MODULE
//
// Ed25519 signing for relay transactions.
// - Key generation (random and from raw 32-byte secrets)
// - Digest signing and verification
// - Secret key material zeroized on drop
//
// The device key-store (secure enclave / keychain) is an external
// collaborator: it hands us 32 secret bytes, we never persist them.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

/// Length of an Ed25519 public (verifying) key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 secret key seed in bytes.
pub const SECRET_KEY_LEN: usize = 32;

/// Length of an Ed25519 detached signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug)]
pub enum CryptoError {
    /// Bytes do not decode to a valid Ed25519 public key.
    InvalidKey,
    /// Signature bytes are malformed or the wrong length.
    InvalidSignature,
    /// Cryptographic verification failed.
    VerificationFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CryptoError::InvalidKey => write!(f, "Invalid Ed25519 public key"),
            CryptoError::InvalidSignature => write!(f, "Malformed signature bytes"),
            CryptoError::VerificationFailed => write!(f, "Signature verification failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// An Ed25519 keypair. The secret half is the 32-byte seed the external
/// key-store provides; the public half is derived from it.
pub struct KeyPair {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    secret_key: [u8; SECRET_KEY_LEN],
}

/// SECURITY: Zeroize secret key from memory on drop to prevent
/// recovery via memory dump, swap file, or core dump.
impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            public_key: self.public_key,
            secret_key: self.secret_key,
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // Never print the secret half
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key))
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh random keypair from the OS RNG.
    pub fn generate() -> Self {
        let mut secret = [0u8; SECRET_KEY_LEN];
        OsRng.fill_bytes(&mut secret);
        let pair = Self::from_secret_bytes(&secret);
        secret.zeroize();
        pair
    }

    /// Reconstruct a keypair from a raw 32-byte secret seed.
    ///
    /// This is the key-store contract: the device keychain holds the seed
    /// and hands it to the core at startup. Any 32 bytes form a valid seed.
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_LEN]) -> Self {
        let signing = SigningKey::from_bytes(secret);
        Self {
            public_key: signing.verifying_key().to_bytes(),
            secret_key: *secret,
        }
    }

    /// Sign a message (callers pass the 32-byte transaction id).
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let signing = SigningKey::from_bytes(&self.secret_key);
        signing.sign(message).to_bytes()
    }

    /// Hex-encoded public key, for logs and persisted rows.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}

/// Sign a message with a raw secret seed without building a KeyPair.
pub fn sign_message(message: &[u8], secret: &[u8; SECRET_KEY_LEN]) -> [u8; SIGNATURE_LEN] {
    let signing = SigningKey::from_bytes(secret);
    signing.sign(message).to_bytes()
}

/// Parse and validate Ed25519 public key bytes.
///
/// Rejects wrong lengths and non-canonical curve points. Wire decoders call
/// this so a malformed key surfaces as a decode error, never a panic.
pub fn parse_public_key(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
    VerifyingKey::from_bytes(&arr).map_err(|_| CryptoError::InvalidKey)
}

/// Verify a detached signature against a message and public key.
///
/// Returns false for malformed keys or signatures rather than erroring;
/// admission treats all of those identically as an invalid signature.
pub fn verify_signature(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let key = match parse_public_key(public_key) {
        Ok(k) => k,
        Err(_) => return false,
    };
    let sig_bytes: [u8; SIGNATURE_LEN] = match signature.try_into() {
        Ok(b) => b,
        Err(_) => return false,
    };
    let sig = Signature::from_bytes(&sig_bytes);
    key.verify(message, &sig).is_ok()
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────
