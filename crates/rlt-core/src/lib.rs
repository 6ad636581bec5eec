// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - CORE MODULE
//
// Relay-token primitives: RelayTx, SignedRelayTx, transaction ids, genesis.
// Defines the binary-canonical transaction record that accompanies every
// mesh message and approves two prior tips of the local DAG ledger.
// All fee arithmetic uses integer µRLT units.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use rlt_crypto::KeyPair;
use sha2::{Digest, Sha256};

pub mod packet;
pub mod pow;

/// 1 RLT = 1_000_000 µRLT (micro relay-token, the atomic fee unit)
pub const MICRO_RLT_PER_RLT: u64 = 1_000_000;

/// Maximum fee a sender may declare per hop (1 RLT in µRLT).
/// Admission rejects anything above this.
pub const MAX_FEE_PER_HOP_MICRO_RLT: u32 = 1_000_000;

/// Canonical RelayTx encoding: parents (2×32) + fee (4 LE) + sender_pub (32)
pub const TX_ENCODED_LEN: usize = 100;

/// Canonical SignedRelayTx encoding: RelayTx (100) + signature (64)
pub const SIGNED_TX_ENCODED_LEN: usize = 164;

/// The all-zero digest used as both parents of the genesis transaction.
pub const ZERO_DIGEST: TxId = TxId([0u8; 32]);

/// Secret seed of the deterministic genesis keypair (all 0x01 bytes).
/// Every node derives the identical genesis transaction from it.
pub const GENESIS_SECRET: [u8; 32] = [0x01u8; 32];

// ─────────────────────────────────────────────────────────────────
// ERROR KINDS
// ─────────────────────────────────────────────────────────────────

/// Error kinds surfaced by the ledger core. Transport is expected to drop
/// or NACK the offending unit; admission keeps observed-vs-admitted
/// counters instead of raising for duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Malformed binary (codec, wire headers, beacon).
    InvalidData(String),
    /// Ed25519 check failed.
    InvalidSignature,
    /// A transaction did not carry exactly two parents.
    InvalidParentCount(usize),
    /// Declared fee_per_hop above MAX_FEE_PER_HOP_MICRO_RLT.
    FeeExceedsLimit(u32),
    /// A non-genesis parent is missing from the DAG.
    ParentNotFound(TxId),
    /// Spend against a wallet below the required amount.
    InsufficientBalance { required: u64, available: u64 },
    /// Storage-level fault, with context.
    DatabaseError(String),
    /// Verification of a received PoW result failed.
    PowInvalid,
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RelayError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            RelayError::InvalidSignature => write!(f, "Invalid signature"),
            RelayError::InvalidParentCount(n) => {
                write!(f, "Invalid parent count: expected 2, got {}", n)
            }
            RelayError::FeeExceedsLimit(fee) => write!(
                f,
                "Fee {} µRLT exceeds limit {} µRLT",
                fee, MAX_FEE_PER_HOP_MICRO_RLT
            ),
            RelayError::ParentNotFound(id) => write!(f, "Parent not found: {}", id),
            RelayError::InsufficientBalance {
                required,
                available,
            } => write!(
                f,
                "Insufficient balance: need {} µRLT, have {} µRLT",
                required, available
            ),
            RelayError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            RelayError::PowInvalid => write!(f, "Proof-of-work verification failed"),
        }
    }
}

impl std::error::Error for RelayError {}

// ─────────────────────────────────────────────────────────────────
// TRANSACTION ID
// ─────────────────────────────────────────────────────────────────

/// Content-address of a relay transaction: SHA-256 over the canonical
/// parent/fee/sender fields. Also used for the zero digest and tip ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-char hex string (persisted rows store ids as hex).
    pub fn from_hex(s: &str) -> Result<Self, RelayError> {
        let bytes = hex::decode(s)
            .map_err(|e| RelayError::InvalidData(format!("bad tx id hex: {}", e)))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| RelayError::InvalidData("tx id must be 32 bytes".to_string()))?;
        Ok(TxId(arr))
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

// ─────────────────────────────────────────────────────────────────
// RELAY TRANSACTION
// ─────────────────────────────────────────────────────────────────

/// The unsigned relay transaction: approves two prior tips and declares the
/// per-hop fee the sender is willing to pay. Parent order is significant:
/// [A,B] and [B,A] hash to different ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTx {
    /// Ordered pair of approved tip ids.
    pub parents: [TxId; 2],
    /// Fee offered per forwarding hop, in µRLT.
    pub fee_per_hop: u32,
    /// Ed25519 verifying key of the sender.
    pub sender_pub: [u8; 32],
}

impl RelayTx {
    pub fn new(parents: [TxId; 2], fee_per_hop: u32, sender_pub: [u8; 32]) -> Self {
        Self {
            parents,
            fee_per_hop,
            sender_pub,
        }
    }

    /// Content id: SHA-256 over parents[0] || parents[1] || fee_le4 || sender_pub.
    /// The signature covers these 32 bytes, not the full encoding.
    pub fn id(&self) -> TxId {
        let mut hasher = Sha256::new();
        hasher.update(self.parents[0].0);
        hasher.update(self.parents[1].0);
        hasher.update(self.fee_per_hop.to_le_bytes());
        hasher.update(self.sender_pub);
        TxId(hasher.finalize().into())
    }

    /// Canonical 100-byte encoding. Bit-exact: see decode().
    pub fn encode(&self) -> [u8; TX_ENCODED_LEN] {
        let mut out = [0u8; TX_ENCODED_LEN];
        out[0..32].copy_from_slice(&self.parents[0].0);
        out[32..64].copy_from_slice(&self.parents[1].0);
        out[64..68].copy_from_slice(&self.fee_per_hop.to_le_bytes());
        out[68..100].copy_from_slice(&self.sender_pub);
        out
    }

    /// Decode a canonical 100-byte record. Fails with InvalidData on wrong
    /// length or a sender key that is not a valid curve point.
    pub fn decode(bytes: &[u8]) -> Result<Self, RelayError> {
        if bytes.len() != TX_ENCODED_LEN {
            return Err(RelayError::InvalidData(format!(
                "RelayTx must be {} bytes, got {}",
                TX_ENCODED_LEN,
                bytes.len()
            )));
        }
        let mut p0 = [0u8; 32];
        let mut p1 = [0u8; 32];
        let mut sender = [0u8; 32];
        p0.copy_from_slice(&bytes[0..32]);
        p1.copy_from_slice(&bytes[32..64]);
        let fee = u32::from_le_bytes(
            bytes[64..68]
                .try_into()
                .map_err(|_| RelayError::InvalidData("truncated fee field".to_string()))?,
        );
        sender.copy_from_slice(&bytes[68..100]);

        rlt_crypto::parse_public_key(&sender)
            .map_err(|_| RelayError::InvalidData("malformed sender public key".to_string()))?;

        Ok(Self {
            parents: [TxId(p0), TxId(p1)],
            fee_per_hop: fee,
            sender_pub: sender,
        })
    }

    /// Build from a parent list of unchecked length, as transport adapters
    /// hand them over after parsing. Exactly two parents are accepted.
    pub fn from_parent_list(
        parents: &[TxId],
        fee_per_hop: u32,
        sender_pub: [u8; 32],
    ) -> Result<Self, RelayError> {
        match parents {
            [p0, p1] => Ok(Self::new([*p0, *p1], fee_per_hop, sender_pub)),
            other => Err(RelayError::InvalidParentCount(other.len())),
        }
    }

    /// True if both parents are the zero digest (the genesis shape).
    /// Structural genesis is exempt from the parents-present admission rule.
    pub fn is_genesis_shaped(&self) -> bool {
        self.parents[0].is_zero() && self.parents[1].is_zero()
    }

    /// Sign the content id with the sender's key, producing the wire record.
    pub fn sign(self, keypair: &KeyPair) -> SignedRelayTx {
        let id = self.id();
        let signature = keypair.sign(id.as_bytes());
        SignedRelayTx {
            tx: self,
            signature,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// SIGNED RELAY TRANSACTION
// ─────────────────────────────────────────────────────────────────

/// A relay transaction plus the Ed25519 signature over its id.
/// 164 bytes on the wire; immutable once signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRelayTx {
    pub tx: RelayTx,
    pub signature: [u8; 64],
}

impl SignedRelayTx {
    pub fn id(&self) -> TxId {
        self.tx.id()
    }

    /// Verify the signature against the sender key and the content id.
    pub fn verify(&self) -> bool {
        let id = self.tx.id();
        rlt_crypto::verify_signature(id.as_bytes(), &self.signature, &self.tx.sender_pub)
    }

    /// Canonical 164-byte encoding: RelayTx || signature.
    pub fn encode(&self) -> [u8; SIGNED_TX_ENCODED_LEN] {
        let mut out = [0u8; SIGNED_TX_ENCODED_LEN];
        out[0..TX_ENCODED_LEN].copy_from_slice(&self.tx.encode());
        out[TX_ENCODED_LEN..].copy_from_slice(&self.signature);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RelayError> {
        if bytes.len() != SIGNED_TX_ENCODED_LEN {
            return Err(RelayError::InvalidData(format!(
                "SignedRelayTx must be {} bytes, got {}",
                SIGNED_TX_ENCODED_LEN,
                bytes.len()
            )));
        }
        let tx = RelayTx::decode(&bytes[0..TX_ENCODED_LEN])?;
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[TX_ENCODED_LEN..]);
        Ok(Self { tx, signature })
    }
}

// ─────────────────────────────────────────────────────────────────
// GENESIS
// ─────────────────────────────────────────────────────────────────

/// The deterministic genesis keypair (secret = 32× 0x01).
pub fn genesis_keypair() -> KeyPair {
    KeyPair::from_secret_bytes(&GENESIS_SECRET)
}

/// Build the genesis transaction: zero-digest parents, zero fee, signed by
/// the deterministic genesis key. Every node computes the identical record,
/// so its id is a network-wide constant.
pub fn genesis_tx() -> SignedRelayTx {
    let keypair = genesis_keypair();
    RelayTx::new([ZERO_DIGEST, ZERO_DIGEST], 0, keypair.public_key).sign(&keypair)
}

/// The fixed genesis transaction id.
pub fn genesis_id() -> TxId {
    genesis_tx().id()
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────
