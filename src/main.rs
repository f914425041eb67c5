use clap::Parser;
use share_processor::{
    backends::memory::MemoryLedger, daemon::JsonRpcDaemon, Ledger, LedgerBackend, LedgerKeys,
    ProcessorError, ProcessorResult, RoundSettlementCoordinator, SettlementAlert, ShareEvent,
    ShareOutcome, ShareProcessorConfig, ShareRecorder,
};
use std::{fs::OpenOptions, path::PathBuf, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "share-processor")]
#[command(about = "Pool share accounting and block settlement")]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: PathBuf,

    /// Ledger backend, overriding the configuration file
    #[arg(short, long)]
    pub backend: Option<LedgerBackend>,

    /// Print the pool counters of a persistent ledger and exit
    #[arg(long)]
    pub stats: bool,

    /// File to write logs to instead of stdout
    #[arg(short = 'f', long = "log-file")]
    pub log_file: Option<PathBuf>,
}

fn init_logging(config: &ShareProcessorConfig) -> ProcessorResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_file() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    ProcessorError::Config(format!("cannot open log file {}: {}", path.display(), e))
                })?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

fn build_ledger(config: &ShareProcessorConfig) -> ProcessorResult<Arc<dyn Ledger>> {
    match config.ledger.backend {
        LedgerBackend::Memory => Ok(Arc::new(MemoryLedger::new())),
        #[cfg(feature = "sqlite-backend")]
        LedgerBackend::Sqlite => {
            let path = config.ledger.database_path.clone().ok_or_else(|| {
                ProcessorError::Config("'ledger.database_path' is required".to_string())
            })?;
            Ok(Arc::new(share_processor::backends::sqlite::SqliteLedger::new(path)))
        }
        #[cfg(not(feature = "sqlite-backend"))]
        LedgerBackend::Sqlite => Err(ProcessorError::Config(
            "built without the sqlite-backend feature".to_string(),
        )),
    }
}

async fn log_alerts(alerts: async_channel::Receiver<SettlementAlert>) {
    while let Ok(alert) = alerts.recv().await {
        error!(
            alert = true,
            coin = %alert.coin,
            height = alert.height,
            block_hash = %alert.block_hash,
            worker = %alert.worker,
            "Settlement {} left unapplied: {}",
            alert.stage,
            alert.reason
        );
    }
}

/// Record one share event. Returns the task following its settlement, if the share
/// closed a round.
async fn handle_line(recorder: &ShareRecorder, line: &str) -> Option<JoinHandle<()>> {
    let event: ShareEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            warn!("Skipping malformed share event: {}", e);
            return None;
        }
    };

    match recorder.record_share(event).await {
        Ok(ShareOutcome::RoundClosed { height, settlement }) => {
            Some(tokio::spawn(async move {
                match settlement.await {
                    Ok(Ok(entry)) => info!(height, degraded = entry.is_degraded(), "Round settled"),
                    Ok(Err(e)) => error!(height, "Round settlement failed: {}", e),
                    Err(e) => error!(height, "Round settlement task aborted: {}", e),
                }
            }))
        }
        Ok(_) => None,
        Err(e) => {
            error!("Failed to record share: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = ShareProcessorConfig::from_file(&args.config)?;
    if let Some(backend) = args.backend {
        config.ledger.backend = backend;
        config.validate()?;
    }
    config.set_log_file(args.log_file);
    init_logging(&config)?;

    if args.stats && !config.ledger.backend.is_persistent() {
        return Err(ProcessorError::Config(format!(
            "--stats needs a persistent ledger, the {:?} backend starts empty",
            config.ledger.backend
        ))
        .into());
    }

    info!(coin = %config.coin, backend = ?config.ledger.backend, "Starting share processor");

    let ledger = build_ledger(&config)?;
    ledger.initialize().await?;
    let health = ledger.health_check().await?;
    if !health.is_healthy {
        return Err(format!(
            "ledger {} unhealthy: {}",
            health.backend_type,
            health.error_message.unwrap_or_default()
        )
        .into());
    }
    info!("Ledger health: {:?}", health);

    let keys = LedgerKeys::new(&config.coin);

    if args.stats {
        let stats = ledger.hash_get_all(&keys.stats()).await?;
        println!(
            "{}",
            serde_json::to_string_pretty(&share_processor::PoolStats::from_fields(&stats))?
        );
        ledger.close().await?;
        return Ok(());
    }

    let daemon = JsonRpcDaemon::new(&config.daemon, config.reconciliation_timeout())?;
    let (alert_tx, alert_rx) = async_channel::unbounded();
    tokio::spawn(log_alerts(alert_rx));

    let coordinator = RoundSettlementCoordinator::new(
        ledger.clone(),
        Arc::new(daemon),
        keys,
        config.total_fee_percent(),
        config.reconciliation_timeout(),
    )
    .with_alerts(alert_tx);
    let recorder = ShareRecorder::new(ledger.clone(), Arc::new(coordinator));

    // One JSON share event per line on stdin.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut settlements: Vec<JoinHandle<()>> = Vec::new();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    settlements.retain(|handle| !handle.is_finished());
                    settlements.extend(handle_line(&recorder, &line).await);
                }
                Ok(None) => {
                    info!("Share event stream closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read share events: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    // Settlements in flight still need the ledger to stage their pending records.
    for handle in settlements {
        let _ = handle.await;
    }
    ledger.close().await?;
    info!("Share processor shutdown complete");
    Ok(())
}
