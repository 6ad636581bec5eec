// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - RELAY NODE
//
// Device-local wiring of every subsystem plus the transport contract:
// inbound entry points (transactions, beacons, relay observations, network
// metrics) and outbound packet construction with pricing and PoW. Timer
// work (beacon sweep, reward retry, anchoring) runs on a background thread
// that never blocks admission.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rlt_core::packet::PacketHeaderV3;
use rlt_core::pow::{requires_pow, NetworkMetrics, PowEngine, PowResult, PowStats};
use rlt_core::{RelayError, SignedRelayTx, TxId, MAX_FEE_PER_HOP_MICRO_RLT};
use rlt_crypto::KeyPair;
use rlt_net::{
    FeeBeaconManager, FeeCalculator, NetworkConditions, NetworkFeeStats, Priority,
    RouteOptimizer,
};
use rlt_store::{DagStats, DagStorage, WalletConfig, WalletLedger, WalletSummary};

use crate::anchor::{AnchorRecord, AnchorSubmitter, AnchoringService};
use crate::config::NodeConfig;
use crate::hoplog::HopLog;
use crate::now_secs;
use crate::processor::{AdmitOutcome, ProcessorStats, TransactionProcessor};
use crate::rewards::{RewardDistributor, RewardStats};

/// A fully-priced outbound unit: the signed transaction, its v3 header, and
/// the ready-to-send packet bytes (header || payload).
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub tx: SignedRelayTx,
    pub header: PacketHeaderV3,
    pub packet: Vec<u8>,
    pub fee_per_hop: u32,
    pub pow: Option<PowResult>,
    /// Timestamp baked into the PoW digest (unix seconds).
    pub timestamp: u64,
}

pub struct RelayNode {
    keypair: KeyPair,
    dag: Arc<DagStorage>,
    wallet: Arc<WalletLedger>,
    processor: Arc<TransactionProcessor>,
    rewards: Arc<RewardDistributor>,
    fees: Arc<FeeCalculator>,
    beacons: Arc<FeeBeaconManager>,
    optimizer: Arc<RouteOptimizer>,
    pow: Arc<PowEngine>,
    anchoring: Arc<AnchoringService>,
    hoplog: Arc<HopLog>,
    beacon_sweep_secs: u64,
    anchor_interval_secs: u64,
    stop: Arc<AtomicBool>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayNode {
    /// Open the stores and wire every subsystem. The key store collaborator
    /// supplies the device keypair; the transport supplies the anchor
    /// submitter.
    pub fn open(
        config: &NodeConfig,
        keypair: KeyPair,
        submitter: Arc<dyn AnchorSubmitter>,
    ) -> Result<Self, RelayError> {
        let dag = Arc::new(DagStorage::open(
            &config.dag_path,
            config.max_transactions,
        )?);
        let wallet = Arc::new(WalletLedger::open(
            &config.wallet_path,
            WalletConfig {
                initial_balance_micro_rlt: config.initial_balance_micro_rlt,
            },
        )?);

        let rewards = Arc::new(RewardDistributor::new(wallet.clone(), keypair.public_key));
        let processor = Arc::new(TransactionProcessor::new(dag.clone(), rewards.clone())?);

        let fees = Arc::new(FeeCalculator::new());
        let beacons = Arc::new(FeeBeaconManager::new(fees.clone()));
        let optimizer = Arc::new(RouteOptimizer::new(beacons.clone()));
        let pow = Arc::new(PowEngine::new());
        let anchoring = Arc::new(AnchoringService::new(
            dag.clone(),
            submitter,
            config.min_anchor_interval_secs,
            config.min_tx_for_anchor,
        ));

        log::info!(
            "Relay node up: key {}, {} txs stored",
            keypair.public_key_hex(),
            dag.stats().total
        );

        Ok(Self {
            keypair,
            dag,
            wallet,
            processor,
            rewards,
            fees,
            beacons,
            optimizer,
            pow,
            anchoring,
            hoplog: Arc::new(HopLog::new()),
            beacon_sweep_secs: config.beacon_sweep_secs,
            anchor_interval_secs: config.anchor_interval_secs,
            stop: Arc::new(AtomicBool::new(false)),
            timers: Mutex::new(Vec::new()),
        })
    }

    // ─────────────────────────────────────────────────────────────
    // TRANSPORT CONTRACT — CALLS INTO THE CORE
    // ─────────────────────────────────────────────────────────────

    /// A signed transaction arrived from the mesh. The observed relay path
    /// (if the transport reported hops for this id) feeds reward
    /// eligibility.
    pub fn on_incoming_tx(
        &self,
        tx: &SignedRelayTx,
        source_peer: Option<&str>,
    ) -> Result<AdmitOutcome, RelayError> {
        if let Some(peer) = source_peer {
            log::debug!("tx {} in from {}", tx.id().short(), peer);
        }
        self.fees.record_observed_fee(tx.tx.fee_per_hop as u64);
        let path = self.hoplog.path(&tx.id());
        self.processor.admit(tx, path.as_deref())
    }

    /// A fee beacon advert arrived inside a discovery payload.
    pub fn on_fee_beacon(
        &self,
        peer_id: &str,
        bytes: &[u8],
        rssi: Option<i32>,
    ) -> Result<(), RelayError> {
        let payload = FeeBeaconManager::decode_beacon(bytes)?;
        self.fees
            .record_observed_fee(payload.min_fee_micro_rlt as u64);
        self.beacons.record_payload(peer_id, &payload, rssi);
        Ok(())
    }

    /// The transport witnessed a forwarding hop for a transaction.
    pub fn on_relay_observed(&self, tx_id: TxId, previous_relay_pub: Option<[u8; 32]>) {
        self.hoplog.record_relay(tx_id, previous_relay_pub);
    }

    /// Fresh network metrics for PoW difficulty scaling.
    pub fn network_metrics(&self, active_nodes: u32, msgs_per_sec: f64, token_value: u64) {
        self.pow.update_metrics(NetworkMetrics {
            active_nodes,
            msgs_per_sec,
            token_value_micro_rlt: token_value,
        });
    }

    // ─────────────────────────────────────────────────────────────
    // TRANSPORT CONTRACT — CALLS OUT OF THE CORE
    // ─────────────────────────────────────────────────────────────

    /// Current 12-byte beacon advert for the discovery payload.
    pub fn advertise_beacon(&self) -> [u8; 12] {
        self.beacons.encode_beacon()
    }

    /// Price, fund, and package an outbound message.
    ///
    /// The fee comes from the calculator (capped at the per-hop limit), the
    /// sender wallet is debited fee × ttl, the transaction approves the
    /// current tips and is admitted locally (self-sends earn no reward),
    /// and PoW is attached when the fee undercuts the network's advertised
    /// minimum. A cancelled PoW search aborts the whole send.
    pub fn prepare_message(
        &self,
        payload: &[u8],
        ttl: u8,
        priority: Priority,
        conditions: Option<NetworkConditions>,
        cancel: &AtomicBool,
    ) -> Result<OutboundMessage, RelayError> {
        let fee = self
            .fees
            .calculate(payload.len(), ttl, priority, conditions)
            .min(MAX_FEE_PER_HOP_MICRO_RLT as u64) as u32;

        let tx = self.processor.create_message_tx(fee, &self.keypair)?;
        let tx_id = tx.id();

        let total_cost = fee as u64 * ttl as u64;
        if total_cost > 0 {
            self.wallet.spend(
                &self.keypair.public_key,
                total_cost,
                &tx_id,
                "Message send fee",
            )?;
        }

        self.processor.admit(&tx, None)?;

        let timestamp = now_secs();
        let network_min = self.beacons.network_fee_stats().median;
        let pow = if requires_pow(fee as u64, network_min) {
            match self
                .pow
                .compute(payload, &self.keypair.public_key, timestamp, cancel)
            {
                Some(result) => Some(result),
                None => {
                    return Err(RelayError::InvalidData(
                        "proof-of-work search cancelled".to_string(),
                    ))
                }
            }
        } else {
            None
        };

        let header = PacketHeaderV3 {
            ttl,
            fee_per_hop: fee,
            tx_hash: tx_id.0,
            pow_difficulty: pow.as_ref().map(|p| p.difficulty).unwrap_or(0),
            pow_nonce: pow.as_ref().map(|p| p.nonce).unwrap_or(0),
            pow_hash: pow.as_ref().map(|p| p.hash).unwrap_or([0u8; 32]),
        };

        let mut packet = header.encode().to_vec();
        packet.extend_from_slice(payload);

        Ok(OutboundMessage {
            tx,
            header,
            packet,
            fee_per_hop: fee,
            pow,
            timestamp,
        })
    }

    /// Gate an incoming message on our advertised minimum: a fee at or
    /// above it passes outright; below it the header must carry a PoW that
    /// verifies against (payload, sender, timestamp).
    pub fn check_message_pow(
        &self,
        payload: &[u8],
        header: &PacketHeaderV3,
        sender_pub: &[u8; 32],
        timestamp: u64,
    ) -> Result<(), RelayError> {
        let min = self.beacons.relay_min_fee();
        if !requires_pow(header.fee_per_hop as u64, min) {
            return Ok(());
        }
        if !header.has_pow() {
            return Err(RelayError::PowInvalid);
        }
        let result = PowResult {
            nonce: header.pow_nonce,
            hash: header.pow_hash,
            difficulty: header.pow_difficulty,
            compute_time: 0.0,
        };
        self.pow.verify(payload, sender_pub, timestamp, &result)
    }

    // ─────────────────────────────────────────────────────────────
    // BACKGROUND TIMERS
    // ─────────────────────────────────────────────────────────────

    /// Start the maintenance thread: beacon sweep, reward retry, and
    /// anchoring evaluation on their configured cadences.
    pub fn start_background(self: &Arc<Self>) {
        let node = Arc::clone(self);
        let stop = self.stop.clone();
        let sweep_secs = self.beacon_sweep_secs.max(1);
        let anchor_secs = self.anchor_interval_secs.max(1);

        let handle = std::thread::spawn(move || {
            let mut last_sweep = now_secs();
            let mut last_anchor = now_secs();
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(250));
                let now = now_secs();

                if now.saturating_sub(last_sweep) >= sweep_secs {
                    last_sweep = now;
                    node.beacons.sweep_expired(now);
                    if node.rewards.stats().pending_count > 0 {
                        node.rewards.retry_all();
                    }
                }

                if now.saturating_sub(last_anchor) >= anchor_secs {
                    last_anchor = now;
                    if let Err(e) = node.anchoring.evaluate(now) {
                        log::warn!("Anchor evaluation failed: {}", e);
                    }
                }
            }
        });
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Stop and join the maintenance thread.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let handles: Vec<JoinHandle<()>> = {
            let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    // ─────────────────────────────────────────────────────────────
    // INSPECTION SURFACE (CLI collaborator)
    // ─────────────────────────────────────────────────────────────

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key
    }

    pub fn dag_stats(&self) -> DagStats {
        self.dag.stats()
    }

    pub fn list_tips(&self) -> Result<Vec<TxId>, RelayError> {
        self.dag.get_tips()
    }

    pub fn get_tx(&self, id: &TxId) -> Result<Option<SignedRelayTx>, RelayError> {
        self.dag.get(id)
    }

    pub fn wallet_summary(&self, public_key: &[u8; 32]) -> Result<WalletSummary, RelayError> {
        self.wallet.summary(public_key)
    }

    pub fn own_wallet_summary(&self) -> Result<WalletSummary, RelayError> {
        self.wallet.summary(&self.keypair.public_key)
    }

    pub fn processor_stats(&self) -> ProcessorStats {
        self.processor.stats()
    }

    pub fn reward_stats(&self) -> RewardStats {
        self.rewards.stats()
    }

    pub fn pow_stats(&self) -> PowStats {
        self.pow.stats()
    }

    pub fn network_fee_stats(&self) -> NetworkFeeStats {
        self.beacons.network_fee_stats()
    }

    pub fn anchors(&self) -> Vec<AnchorRecord> {
        self.anchoring.anchors()
    }

    // Component handles for collaborators that drive a subsystem directly.

    pub fn dag(&self) -> &Arc<DagStorage> {
        &self.dag
    }

    pub fn wallet(&self) -> &Arc<WalletLedger> {
        &self.wallet
    }

    pub fn beacons(&self) -> &Arc<FeeBeaconManager> {
        &self.beacons
    }

    pub fn fee_calculator(&self) -> &Arc<FeeCalculator> {
        &self.fees
    }

    pub fn route_optimizer(&self) -> &Arc<RouteOptimizer> {
        &self.optimizer
    }

    pub fn pow_engine(&self) -> &Arc<PowEngine> {
        &self.pow
    }

    pub fn anchoring(&self) -> &Arc<AnchoringService> {
        &self.anchoring
    }

    pub fn hoplog(&self) -> &Arc<HopLog> {
        &self.hoplog
    }
}

impl Drop for RelayNode {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::RecordingSubmitter;
    use rlt_core::{genesis_id, RelayTx};

    fn open_node(dir: &tempfile::TempDir) -> Arc<RelayNode> {
        let config = NodeConfig {
            dag_path: dir.path().join("dag").to_string_lossy().into_owned(),
            wallet_path: dir.path().join("wallet").to_string_lossy().into_owned(),
            ..NodeConfig::development()
        };
        Arc::new(
            RelayNode::open(
                &config,
                KeyPair::generate(),
                Arc::new(RecordingSubmitter::new()),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_open_bootstraps_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let node = open_node(&dir);
        assert_eq!(node.dag_stats().total, 1);
        assert_eq!(node.list_tips().unwrap(), vec![genesis_id()]);
    }

    #[test]
    fn test_prepare_message_no_pow_when_fee_sufficient() {
        let dir = tempfile::tempdir().unwrap();
        let node = open_node(&dir);
        // A cheap peer advertises below our computed fee
        node.beacons().record_beacon("peer", 100, None);

        let cancel = AtomicBool::new(false);
        let out = node
            .prepare_message(b"hi mesh", 3, Priority::Normal, None, &cancel)
            .unwrap();

        // 1 KB bucket + 3 hops = 1300 ≥ the 100 µRLT median → no PoW
        assert_eq!(out.fee_per_hop, 1_300);
        assert!(out.pow.is_none());
        assert!(!out.header.has_pow());
        assert_eq!(out.header.ttl, 3);
        assert_eq!(out.header.tx_hash, out.tx.id().0);
        assert_eq!(&out.packet[79..], b"hi mesh");

        // The tx was admitted locally and the wallet debited fee × ttl
        assert!(node.get_tx(&out.tx.id()).unwrap().is_some());
        assert_eq!(
            node.own_wallet_summary().unwrap().balance_micro_rlt,
            100_000 - 1_300 * 3
        );
    }

    #[test]
    fn test_prepare_message_attaches_pow_when_underpaying() {
        let dir = tempfile::tempdir().unwrap();
        let node = open_node(&dir);
        // The only known peer demands far more than we will pay
        node.beacons().record_beacon("pricey", 900_000, None);

        let cancel = AtomicBool::new(false);
        let out = node
            .prepare_message(b"cheap msg", 2, Priority::Low, None, &cancel)
            .unwrap();

        assert!(out.pow.is_some());
        assert!(out.header.has_pow());
        // The attached proof verifies against the packet inputs
        node.check_message_pow(
            b"cheap msg",
            &out.header,
            &node.public_key(),
            out.timestamp,
        )
        .unwrap_or_else(|e| panic!("own PoW must verify: {}", e));
    }

    #[test]
    fn test_check_message_pow_gate() {
        let dir = tempfile::tempdir().unwrap();
        let node = open_node(&dir);
        let sender = KeyPair::generate();

        // Fee at our minimum: passes without PoW
        let rich = PacketHeaderV3 {
            ttl: 3,
            fee_per_hop: node.beacons().relay_min_fee() as u32,
            tx_hash: [0u8; 32],
            pow_difficulty: 0,
            pow_nonce: 0,
            pow_hash: [0u8; 32],
        };
        assert!(node
            .check_message_pow(b"m", &rich, &sender.public_key, 1)
            .is_ok());

        // Underpaying with no PoW attached: rejected
        let broke = PacketHeaderV3 {
            fee_per_hop: 1,
            ..rich
        };
        assert_eq!(
            node.check_message_pow(b"m", &broke, &sender.public_key, 1),
            Err(RelayError::PowInvalid)
        );
    }

    #[test]
    fn test_on_incoming_tx_uses_observed_path() {
        let dir = tempfile::tempdir().unwrap();
        let node = open_node(&dir);
        let sender = KeyPair::generate();
        let relay = KeyPair::generate();

        let tx = RelayTx::new([genesis_id(), genesis_id()], 500, sender.public_key)
            .sign(&sender);

        // Transport saw this tx arrive through `relay` before admission
        node.on_relay_observed(tx.id(), Some(relay.public_key));
        node.on_incoming_tx(&tx, Some("peer-1")).unwrap();

        assert_eq!(
            node.wallet_summary(&relay.public_key)
                .unwrap()
                .balance_micro_rlt,
            100_000 + 500
        );
    }

    #[test]
    fn test_on_fee_beacon_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let node = open_node(&dir);

        let advert = node.advertise_beacon();
        node.on_fee_beacon("peer-x", &advert, Some(-60)).unwrap();

        assert_eq!(node.beacons().peer_count(), 1);
        let stats = node.network_fee_stats();
        assert_eq!(stats.peer_count, 1);

        // Garbage is rejected cleanly
        assert!(node.on_fee_beacon("peer-y", &[1, 2, 3], None).is_err());
        assert_eq!(node.beacons().peer_count(), 1);
    }

    #[test]
    fn test_network_metrics_reach_pow_engine() {
        let dir = tempfile::tempdir().unwrap();
        let node = open_node(&dir);
        node.network_metrics(20, 30.0, 200);
        // Tight network → clamped 0.5 s target
        assert!((node.pow_stats().target_secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_background_thread_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let node = open_node(&dir);
        node.start_background();
        std::thread::sleep(Duration::from_millis(50));
        node.shutdown();
        // A second shutdown is harmless
        node.shutdown();
    }
}
