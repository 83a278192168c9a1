use clap::Parser;
use investment_engine::application::ledger::CapacityLedgerService;
use investment_engine::application::reconciliation::ReconciliationProcessor;
use investment_engine::application::sweeper::spawn_expiry_sweeper;
use investment_engine::application::submission::InvestmentValidator;
use investment_engine::config::EngineConfig;
use investment_engine::domain::investment::InvestmentStatus;
use investment_engine::domain::ports::{
    IntentStatus, InvestmentStore, InvestmentStoreHandle, LedgerStoreHandle, ReceiptStoreHandle,
};
use investment_engine::infrastructure::gateway::SimulatedGateway;
use investment_engine::infrastructure::in_memory::{
    InMemoryInvestmentStore, InMemoryLedgerStore, InMemoryLocationDirectory,
};
use investment_engine::infrastructure::notifier::LogNotifier;
use investment_engine::interfaces::api::InvestmentApi;
use investment_engine::interfaces::csv::command_reader::CommandReader;
use investment_engine::interfaces::csv::ledger_writer::LedgerWriter;
use investment_engine::interfaces::csv::location_reader::read_locations;
use investment_engine::interfaces::replay::Replayer;
use investment_engine::interfaces::webhook::WebhookVerifier;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::error;
use tracing_subscriber::EnvFilter;

const ALL_STATUSES: [InvestmentStatus; 5] = [
    InvestmentStatus::Pending,
    InvestmentStatus::Processing,
    InvestmentStatus::Completed,
    InvestmentStatus::Failed,
    InvestmentStatus::Refunded,
];

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Operations CSV file to replay
    input: PathBuf,

    /// Locations CSV file (`id,name,open,limit`)
    #[arg(long)]
    locations: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON engine configuration (optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured confirmation timeout used by `sweep` rows
    #[arg(long)]
    confirmation_timeout_secs: Option<u64>,

    /// Secret used to sign replayed gateway events
    #[arg(long, env = "PAYMENT_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    if let Some(secs) = cli.confirmation_timeout_secs {
        config.confirmation_timeout_secs = secs;
    }
    if let Some(secret) = cli.webhook_secret {
        config.webhook_secret = secret;
    }
    config.validate().into_diagnostic()?;

    let locations = read_locations(File::open(&cli.locations).into_diagnostic()?).into_diagnostic()?;
    let locations = Arc::new(InMemoryLocationDirectory::from_locations(locations));

    let (ledger_store, investments, receipts) = open_stores(cli.db_path)?;

    let ledger = Arc::new(CapacityLedgerService::new(
        ledger_store,
        locations.clone(),
        investments.clone(),
    ));
    // Replayed intents settle immediately so `confirm` rows have an outcome.
    let gateway = Arc::new(SimulatedGateway::with_default_outcome(IntentStatus::Succeeded));
    // Keep intent ids unique across runs against the same database.
    let issued = investments.list_by_status(&ALL_STATUSES).await.into_diagnostic()?;
    gateway
        .resume(issued.into_iter().filter_map(|investment| investment.external_payment_id))
        .await;
    let validator = Arc::new(InvestmentValidator::new(
        config.limits.clone(),
        locations,
        ledger.clone(),
        investments.clone(),
        gateway.clone(),
    ));
    let processor = Arc::new(ReconciliationProcessor::new(
        investments.clone(),
        receipts,
        ledger.clone(),
        gateway,
        Arc::new(LogNotifier),
        config.confirmation_timeout(),
    ));

    let verifier = || {
        WebhookVerifier::new(
            config.webhook_secret.clone(),
            config.signature_tolerance_secs,
        )
    };
    let api = InvestmentApi::new(validator, processor.clone(), verifier());
    let replayer = Replayer::new(api, verifier(), processor.clone(), ledger.clone(), investments);

    let (shutdown, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_expiry_sweeper(processor, config.sweep_interval(), shutdown_rx).into_diagnostic()?;

    // Replay operations
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (index, record) in reader.operations().enumerate() {
        let row = index + 1;
        match record {
            Ok(record) => {
                let op = record.op;
                if let Err(e) = replayer.apply(row, record).await {
                    error!(row, ?op, error = %e, "operation failed");
                }
            }
            Err(e) => error!(row, error = %e, "unreadable operation"),
        }
    }

    // An error only means the sweeper already exited.
    let _ = shutdown.send(true);
    sweeper.await.into_diagnostic()?;

    let snapshots = ledger.snapshots().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = LedgerWriter::new(stdout.lock());
    writer.write_snapshots(snapshots).into_diagnostic()?;

    Ok(())
}

type Stores = (LedgerStoreHandle, InvestmentStoreHandle, ReceiptStoreHandle);

fn in_memory_stores() -> Stores {
    // Investments and receipts share one lock.
    let investments = Arc::new(InMemoryInvestmentStore::new());
    (
        Arc::new(InMemoryLedgerStore::new()),
        investments.clone(),
        investments,
    )
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    use investment_engine::infrastructure::rocksdb::RocksDBStore;

    let Some(db_path) = db_path else {
        return Ok(in_memory_stores());
    };
    let store = RocksDBStore::open(db_path).into_diagnostic()?;
    Ok((
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store),
    ))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}
