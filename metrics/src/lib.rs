pub mod server;

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    peers: IntGauge,
    peer_connection_events: IntCounterVec,
    // Ledger
    ledger_height: IntGauge,
    pending_blocks: IntGauge,
    blocks_appended: IntCounter,
    accounting_txs: IntCounterVec,
    reorgs: IntCounter,
    // Block requests
    requests_in_flight: IntGauge,
    request_faults: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let peers = IntGauge::with_opts(Opts::new("accounting_peers_connected", "Number of connected peers")).unwrap();
        registry.register(Box::new(peers.clone())).unwrap();

        let peer_connection_events = IntCounterVec::new(
            Opts::new("accounting_peer_connection_events_total", "Total number of peer connection events"),
            &["event"],
        ).unwrap();
        registry.register(Box::new(peer_connection_events.clone())).unwrap();

        // Ledger
        let ledger_height = IntGauge::with_opts(Opts::new("accounting_ledger_height", "Height of the last block in the ledger")).unwrap();
        registry.register(Box::new(ledger_height.clone())).unwrap();

        let pending_blocks = IntGauge::with_opts(Opts::new("accounting_pending_blocks", "Blocks buffered ahead of the ledger tip")).unwrap();
        registry.register(Box::new(pending_blocks.clone())).unwrap();

        let blocks_appended = IntCounter::with_opts(Opts::new("accounting_blocks_appended_total", "Total number of blocks appended to the ledger")).unwrap();
        registry.register(Box::new(blocks_appended.clone())).unwrap();

        let accounting_txs = IntCounterVec::new(
            Opts::new("accounting_txs_total", "Total number of accounting transactions by type"),
            &["type"],
        ).unwrap();
        registry.register(Box::new(accounting_txs.clone())).unwrap();

        let reorgs = IntCounter::with_opts(Opts::new("accounting_reorgs_total", "Total number of detected reorgs")).unwrap();
        registry.register(Box::new(reorgs.clone())).unwrap();

        // Block requests
        let requests_in_flight = IntGauge::with_opts(Opts::new("accounting_requests_in_flight", "Block requests awaiting a response")).unwrap();
        registry.register(Box::new(requests_in_flight.clone())).unwrap();

        let request_faults = IntCounterVec::new(
            Opts::new("accounting_request_faults_total", "Total number of failed block requests"),
            &["reason"],
        ).unwrap();
        registry.register(Box::new(request_faults.clone())).unwrap();

        Self {
            registry,
            peers,
            peer_connection_events,
            ledger_height,
            pending_blocks,
            blocks_appended,
            accounting_txs,
            reorgs,
            requests_in_flight,
            request_faults,
        }
    }

    /// Text exposition of every registered metric.
    pub fn gather(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn set_peers(&self, v: i64) {
        self.peers.set(v);
    }

    // Network
    pub fn inc_peer_connection(&self, event: &str) {
        self.peer_connection_events.with_label_values(&[event]).inc();
    }

    pub fn set_requests_in_flight(&self, v: i64) {
        self.requests_in_flight.set(v);
    }

    pub fn inc_request_fault(&self, reason: &str) {
        self.request_faults.with_label_values(&[reason]).inc();
    }

    // Ledger
    pub fn set_ledger_height(&self, v: i64) {
        self.ledger_height.set(v);
    }

    pub fn set_pending_blocks(&self, v: i64) {
        self.pending_blocks.set(v);
    }

    pub fn inc_blocks_appended(&self) {
        self.blocks_appended.inc();
    }

    pub fn inc_txs(&self, tx_type: &str) {
        self.accounting_txs.with_label_values(&[tx_type]).inc();
    }

    pub fn inc_reorgs(&self) {
        self.reorgs.inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
