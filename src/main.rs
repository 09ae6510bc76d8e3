use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use ledger::{BalanceModel, InMemoryLedger, Ledger, PurgeRecentBlocks};
use metrics::server::{run_metrics_server, MetricsServerConfig};
use metrics::Metrics;
use networking::sync::{
    FullNodeSync, LiteNodeHandle, LiteNodeSync, SyncConfig, SyncNotification, TrustedSource,
};
use networking::types::NodeAddress;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod config;
mod lite_ledger;
mod source;
mod transport;

use config::NodeConfig;
use lite_ledger::LiteLedgerWriter;
use source::JsonFileSource;
use transport::{LoopbackHub, LoopbackTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Build the ledger from the trusted source and serve it.
    Full,
    /// Request the ledger from seed nodes.
    Lite,
    /// Run a full node and a lite node wired to each other in process.
    Local,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    config: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,

    /// Directory holding `<height>.json` raw blocks exported by the full node.
    #[arg(short, long, default_value = "blocks")]
    blocks_dir: PathBuf,

    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    #[arg(long)]
    metrics_address: Option<IpAddr>,

    #[arg(long, default_value_t = 9464)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = NodeConfig::load_from_file(&args.config)?;
    let metrics = Arc::new(Metrics::new());

    if let Some(metrics_address) = args.metrics_address {
        let server_config = MetricsServerConfig {
            metrics_address,
            metrics_port: args.metrics_port,
        };
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(err) = run_metrics_server(server_config, metrics).await {
                error!(%err, "Metrics server exited");
            }
        });
    }

    let hub = Arc::new(LoopbackHub::new());

    match args.mode {
        Mode::Full => {
            run_full_node(&config, &args, config.self_address.clone(), hub, metrics).await
        }
        Mode::Lite => {
            run_lite_node(&config, config.self_address.clone(), config.seed_nodes.clone(), hub, metrics).await
        }
        Mode::Local => {
            let full_address = config
                .seed_nodes
                .first()
                .cloned()
                .unwrap_or_else(|| config.self_address.clone());
            let lite_address = NodeAddress::from("lite-node.local");

            tokio::try_join!(
                run_full_node(&config, &args, full_address.clone(), Arc::clone(&hub), Arc::clone(&metrics)),
                run_lite_node(&config, lite_address, vec![full_address], hub, metrics),
            )?;
            Ok(())
        }
    }
}

async fn run_full_node(
    config: &NodeConfig,
    args: &Args,
    address: NodeAddress,
    hub: Arc<LoopbackHub>,
    metrics: Arc<Metrics>,
) -> Result<()> {
    let chain = config.chain_config();
    let ledger = Arc::new(Mutex::new(InMemoryLedger::new(
        &chain,
        config.receivers.clone(),
        config.genesis_tx_id,
    )));
    let source = Arc::new(JsonFileSource::new(&args.blocks_dir));
    let transport = Arc::new(LoopbackTransport::new(
        address.clone(),
        config.seed_nodes.clone(),
        Arc::clone(&hub),
    ));
    let events = hub.join(&address);

    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let watched_from = source
        .head_height()
        .await
        .unwrap_or_else(|_| chain.empty_ledger_height());
    let watcher = Arc::clone(&source).watch(
        watched_from,
        push_tx,
        Duration::from_millis(args.poll_interval_ms),
    );

    let (notification_tx, notification_rx) = mpsc::unbounded_channel();
    let sync = FullNodeSync::new(
        SyncConfig::default(),
        source,
        transport,
        Arc::clone(&ledger),
        PurgeRecentBlocks::new(chain.reorg_purge_depth),
        notification_tx,
    )
    .with_metrics(metrics);

    info!(address = %address, network = ?chain.network, "Starting full node");
    let reporter = tokio::spawn(report_full_node(notification_rx, ledger));
    let result = sync.run(push_rx, events).await;

    watcher.abort();
    reporter.abort();
    result?;
    Ok(())
}

async fn report_full_node(
    mut notifications: mpsc::UnboundedReceiver<SyncNotification>,
    ledger: Arc<Mutex<InMemoryLedger>>,
) {
    let mut balances = BalanceModel::default();

    while let Some(notification) = notifications.recv().await {
        match notification {
            SyncNotification::NewBlock(block) => {
                if !block.txs.is_empty() {
                    info!(height = block.height, num_txs = block.txs.len(), "Accounting txs found");
                }
                balances.add_block(&block);
            }
            SyncNotification::InitialSyncComplete => info!(
                last_height = ledger.lock().last_height(),
                distributed_btc = balances.total_distributed_btc(),
                trade_fees = balances.total_distributed_btc_fees(),
                dpt_payouts = balances.total_distributed_dpt(),
                "Initial sync complete"
            ),
            SyncNotification::ReorgDetected { height, resume_from } => {
                warn!(height, resume_from, "Reorg detected, rebuilding balances");
                balances = BalanceModel::from_blocks(ledger.lock().blocks_at_least_with_height(0));
            }
            SyncNotification::Warning(message) => warn!(%message, "Full node sync warning"),
            SyncNotification::Error(message) => error!(%message, "Full node sync error"),
        }
    }
}

async fn run_lite_node(
    config: &NodeConfig,
    address: NodeAddress,
    seed_nodes: Vec<NodeAddress>,
    hub: Arc<LoopbackHub>,
    metrics: Arc<Metrics>,
) -> Result<()> {
    let chain = config.chain_config();
    let ledger = Arc::new(Mutex::new(InMemoryLedger::new(
        &chain,
        config.receivers.clone(),
        config.genesis_tx_id,
    )));
    let transport = Arc::new(LoopbackTransport::new(
        address.clone(),
        seed_nodes.clone(),
        Arc::clone(&hub),
    ));
    let events = hub.join(&address);

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (notification_tx, notification_rx) = mpsc::unbounded_channel();
    let sync = LiteNodeSync::new(
        SyncConfig::default(),
        &chain,
        transport,
        seed_nodes,
        notification_tx,
    )
    .with_metrics(metrics);
    let writer = LiteLedgerWriter::new(
        ledger,
        PurgeRecentBlocks::new(chain.reorg_purge_depth),
        LiteNodeHandle::new(command_tx),
    );

    info!(address = %address, network = ?chain.network, "Starting lite node");
    let sync_task = tokio::spawn(sync.run(events, command_rx));
    let result = writer.run(notification_rx).await;

    sync_task.abort();
    result
}
