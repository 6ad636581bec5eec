// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - TRANSACTION PROCESSOR
//
// Admission pipeline for signed relay transactions: signature, fee cap,
// duplicate suppression, parent presence, persistence, reward orchestration.
// Bootstraps the deterministic genesis transaction on construction and
// originates outbound transactions by approving the current tips.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::{Arc, Mutex};

use rlt_core::{
    genesis_id, genesis_tx, RelayError, RelayTx, SignedRelayTx, TxId,
    MAX_FEE_PER_HOP_MICRO_RLT,
};
use rlt_crypto::KeyPair;
use rlt_store::DagStorage;

use crate::rewards::RewardDistributor;

/// Result of running a transaction through admission.
/// Callers MUST check `is_new()` before re-broadcasting: a duplicate means
/// the DAG already held the transaction and nothing changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Transaction was new and persisted.
    Admitted(TxId),
    /// Transaction id already present; silent no-op.
    Duplicate(TxId),
}

impl AdmitOutcome {
    pub fn id(&self) -> &TxId {
        match self {
            AdmitOutcome::Admitted(id) | AdmitOutcome::Duplicate(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, AdmitOutcome::Admitted(_))
    }
}

/// Processor counters. `observed` counts every unit handed to admission,
/// `processed` only those newly persisted; the gap is duplicates plus
/// edge-dropped invalid packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorStats {
    pub processed: u64,
    pub observed: u64,
    pub rejected: u64,
    pub total_fees_micro_rlt: u64,
    pub total_rewards_micro_rlt: u64,
    pub tip_count: u64,
}

struct Counters {
    processed: u64,
    observed: u64,
    rejected: u64,
    total_fees_micro_rlt: u64,
}

pub struct TransactionProcessor {
    dag: Arc<DagStorage>,
    rewards: Arc<RewardDistributor>,
    counters: Mutex<Counters>,
}

impl TransactionProcessor {
    /// Build the processor and idempotently admit genesis so the DAG always
    /// has at least one tip to approve.
    pub fn new(
        dag: Arc<DagStorage>,
        rewards: Arc<RewardDistributor>,
    ) -> Result<Self, RelayError> {
        dag.add(&genesis_tx())?;
        Ok(Self {
            dag,
            rewards,
            counters: Mutex::new(Counters {
                processed: 0,
                observed: 0,
                rejected: 0,
                total_fees_micro_rlt: 0,
            }),
        })
    }

    /// Admission pipeline. On success the transaction is durably stored and
    /// the reward attempt has been issued; reward failures are logged inside
    /// the distributor and never invalidate admission.
    pub fn admit(
        &self,
        tx: &SignedRelayTx,
        relay_path: Option<&[[u8; 32]]>,
    ) -> Result<AdmitOutcome, RelayError> {
        {
            let mut counters = self.lock();
            counters.observed += 1;
        }

        // 1. Signature
        if !tx.verify() {
            self.lock().rejected += 1;
            return Err(RelayError::InvalidSignature);
        }

        // 2. Fee cap
        if tx.tx.fee_per_hop > MAX_FEE_PER_HOP_MICRO_RLT {
            self.lock().rejected += 1;
            return Err(RelayError::FeeExceedsLimit(tx.tx.fee_per_hop));
        }

        // 3. Duplicate: silent, idempotent
        let id = tx.id();
        if self.dag.contains(&id)? {
            return Ok(AdmitOutcome::Duplicate(id));
        }

        // 4. Parent presence (structural genesis is its own ancestor)
        if !tx.tx.is_genesis_shaped() {
            for parent in tx.tx.parents.iter() {
                if !self.dag.contains(parent)? {
                    self.lock().rejected += 1;
                    return Err(RelayError::ParentNotFound(*parent));
                }
            }
        }

        // 5. Persist
        let inserted = self.dag.add(tx)?;
        if !inserted {
            // Raced with another admission of the same id
            return Ok(AdmitOutcome::Duplicate(id));
        }

        // 6. Reward orchestration; failures stay inside the distributor
        self.rewards.distribute(tx, relay_path, None);

        // 7. Counters
        {
            let mut counters = self.lock();
            counters.processed += 1;
            counters.total_fees_micro_rlt += tx.tx.fee_per_hop as u64;
        }

        Ok(AdmitOutcome::Admitted(id))
    }

    /// Originate a transaction for an outbound message: approve the first
    /// two current tips (pairing with genesis when fewer exist), sign, and
    /// return. Genesis is re-admitted first in case a fresh store lacks it.
    pub fn create_message_tx(
        &self,
        fee_per_hop: u32,
        keypair: &KeyPair,
    ) -> Result<SignedRelayTx, RelayError> {
        self.dag.add(&genesis_tx())?;

        let tips = self.dag.get_tips()?;
        let genesis = genesis_id();
        let parents = match tips.len() {
            0 => [genesis, genesis],
            1 => [tips[0], genesis],
            _ => [tips[0], tips[1]],
        };

        Ok(RelayTx::new(parents, fee_per_hop, keypair.public_key).sign(keypair))
    }

    pub fn stats(&self) -> ProcessorStats {
        let counters = self.lock();
        ProcessorStats {
            processed: counters.processed,
            observed: counters.observed,
            rejected: counters.rejected,
            total_fees_micro_rlt: counters.total_fees_micro_rlt,
            total_rewards_micro_rlt: self.rewards.stats().distributed_micro_rlt,
            tip_count: self.dag.stats().tip_count,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rlt_core::ZERO_DIGEST;
    use rlt_store::{WalletConfig, WalletLedger};

    fn setup() -> (TransactionProcessor, Arc<DagStorage>, Arc<WalletLedger>, KeyPair, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let dag = Arc::new(DagStorage::open(dir.path().join("dag"), 1_000).unwrap());
        let wallet = Arc::new(
            WalletLedger::open(dir.path().join("wallet"), WalletConfig::default()).unwrap(),
        );
        let local = KeyPair::generate();
        let rewards = Arc::new(RewardDistributor::new(wallet.clone(), local.public_key));
        let processor = TransactionProcessor::new(dag.clone(), rewards).unwrap();
        (processor, dag, wallet, local, dir)
    }

    #[test]
    fn test_genesis_bootstrap() {
        let (_processor, dag, _wallet, _local, _dir) = setup();
        assert!(dag.contains(&genesis_id()).unwrap());
        assert_eq!(dag.get_tips().unwrap(), vec![genesis_id()]);
    }

    #[test]
    fn test_bootstrap_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dag = Arc::new(DagStorage::open(dir.path().join("dag"), 1_000).unwrap());
        let wallet = Arc::new(
            WalletLedger::open(dir.path().join("wallet"), WalletConfig::default()).unwrap(),
        );
        let local = KeyPair::generate();

        let rewards = Arc::new(RewardDistributor::new(wallet.clone(), local.public_key));
        let _p1 = TransactionProcessor::new(dag.clone(), rewards.clone()).unwrap();
        let _p2 = TransactionProcessor::new(dag.clone(), rewards).unwrap();
        assert_eq!(dag.stats().total, 1);
    }

    #[test]
    fn test_admission_pipeline_and_tips() {
        let (processor, dag, _wallet, _local, _dir) = setup();
        let sender = KeyPair::generate();

        let tx_a = RelayTx::new([genesis_id(), genesis_id()], 100, sender.public_key)
            .sign(&sender);
        let outcome = processor.admit(&tx_a, None).unwrap();
        assert!(outcome.is_new());
        assert_eq!(dag.get_tips().unwrap(), vec![tx_a.id()]);

        let tx_b =
            RelayTx::new([tx_a.id(), tx_a.id()], 100, sender.public_key).sign(&sender);
        processor.admit(&tx_b, None).unwrap();
        assert_eq!(dag.get_tips().unwrap(), vec![tx_b.id()]);

        // Re-admission: no-op, counters unchanged
        let before = processor.stats();
        let outcome = processor.admit(&tx_b, None).unwrap();
        assert!(!outcome.is_new());
        let after = processor.stats();
        assert_eq!(before.processed, after.processed);
        assert_eq!(before.total_fees_micro_rlt, after.total_fees_micro_rlt);
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let (processor, _dag, _wallet, _local, _dir) = setup();
        let sender = KeyPair::generate();
        let mut tx = RelayTx::new([genesis_id(), genesis_id()], 100, sender.public_key)
            .sign(&sender);
        tx.signature[0] ^= 0xFF;

        assert_eq!(
            processor.admit(&tx, None),
            Err(RelayError::InvalidSignature)
        );
        assert_eq!(processor.stats().rejected, 1);
    }

    #[test]
    fn test_fee_cap_enforced() {
        let (processor, _dag, _wallet, _local, _dir) = setup();
        let sender = KeyPair::generate();
        let tx = RelayTx::new(
            [genesis_id(), genesis_id()],
            MAX_FEE_PER_HOP_MICRO_RLT + 1,
            sender.public_key,
        )
        .sign(&sender);

        assert!(matches!(
            processor.admit(&tx, None),
            Err(RelayError::FeeExceedsLimit(_))
        ));

        // Exactly at the cap is fine
        let tx = RelayTx::new(
            [genesis_id(), genesis_id()],
            MAX_FEE_PER_HOP_MICRO_RLT,
            sender.public_key,
        )
        .sign(&sender);
        assert!(processor.admit(&tx, None).unwrap().is_new());
    }

    #[test]
    fn test_missing_parent_rejected() {
        let (processor, _dag, _wallet, _local, _dir) = setup();
        let sender = KeyPair::generate();
        let phantom = TxId([0x77u8; 32]);
        let tx = RelayTx::new([phantom, genesis_id()], 10, sender.public_key).sign(&sender);

        assert_eq!(
            processor.admit(&tx, None),
            Err(RelayError::ParentNotFound(phantom))
        );
    }

    #[test]
    fn test_genesis_shaped_exempt_from_parent_check() {
        let (processor, _dag, _wallet, _local, _dir) = setup();
        let sender = KeyPair::generate();
        // Zero-digest parents are never stored, yet this must admit
        let tx = RelayTx::new([ZERO_DIGEST, ZERO_DIGEST], 10, sender.public_key)
            .sign(&sender);
        assert!(processor.admit(&tx, None).unwrap().is_new());
    }

    #[test]
    fn test_rewards_issued_on_admission() {
        let (processor, _dag, wallet, _local, _dir) = setup();
        let sender = KeyPair::generate();
        let relay = KeyPair::generate();

        let tx = RelayTx::new([genesis_id(), genesis_id()], 200, sender.public_key)
            .sign(&sender);
        processor
            .admit(&tx, Some(&[relay.public_key]))
            .unwrap();

        assert_eq!(wallet.balance(&relay.public_key).unwrap(), 200);
        assert_eq!(processor.stats().total_rewards_micro_rlt, 200);
    }

    #[test]
    fn test_create_message_tx_tip_selection() {
        let (processor, dag, _wallet, _local, _dir) = setup();
        let sender = KeyPair::generate();

        // One tip (genesis): pair genesis with genesis
        let tx = processor.create_message_tx(50, &sender).unwrap();
        assert_eq!(tx.tx.parents, [genesis_id(), genesis_id()]);
        processor.admit(&tx, None).unwrap();

        // Single non-genesis tip: pair it with genesis
        let tx2 = processor.create_message_tx(50, &sender).unwrap();
        assert_eq!(tx2.tx.parents, [tx.id(), genesis_id()]);
        processor.admit(&tx2, None).unwrap();

        // Fork the DAG so two tips exist, then both get approved
        let fork = RelayTx::new([tx.id(), genesis_id()], 1, sender.public_key).sign(&sender);
        processor.admit(&fork, None).unwrap();
        assert_eq!(dag.stats().tip_count, 2);

        let tx3 = processor.create_message_tx(50, &sender).unwrap();
        let tips = dag.get_tips().unwrap();
        assert_eq!(tx3.tx.parents, [tips[0], tips[1]]);
        processor.admit(&tx3, None).unwrap();
        assert_eq!(dag.stats().tip_count, 1);
    }

    #[test]
    fn test_observed_counts_everything() {
        let (processor, _dag, _wallet, _local, _dir) = setup();
        let sender = KeyPair::generate();
        let tx = RelayTx::new([genesis_id(), genesis_id()], 10, sender.public_key)
            .sign(&sender);

        processor.admit(&tx, None).unwrap();
        processor.admit(&tx, None).unwrap(); // duplicate
        let mut bad = tx.clone();
        bad.signature[0] ^= 1;
        let _ = processor.admit(&bad, None);

        let stats = processor.stats();
        assert_eq!(stats.observed, 3);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.rejected, 1);
    }
}
