use anyhow::{Context, Result};
use auto_trader::{
    AppState, Capability, CopyTrader, PgFollowerStore, Scheduler, SignalProcessor, StaticEntitlements,
    WorkerSettings,
};
use clap::{Parser, Subcommand};
use common::{BotConfigLoader, PgBotConfigStore};
use decision_ledger::{DecisionLedger, PgDecisionLedger};
use execution::{HttpExecutorConfig, HttpTradeExecutor, PaperTradeExecutor, StaticPlatformMonitor, TradeExecutor};
use portfolio_risk::{PgTradeHistoryStore, RiskEvaluator, TradeHistoryStore};
use signal_routing::{PgSignalSourceStore, SignalRouter};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "auto-trader", about = "Signal-to-trade auto-trading worker")]
struct Cli {
    /// Settings file (TOML); AUTO_TRADER__* variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the tick trigger, ticking on an interval when configured
    Serve,
    /// Run a single tick and print its summary
    Tick,
    /// Create the ledger and risk tables
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = WorkerSettings::load(cli.config.as_deref())?;

    init_logging(&settings);

    let database_url = settings
        .database_url()
        .context("No database URL configured (set AUTO_TRADER__DATABASE_URL or DATABASE_URL)")?;
    let pool = Arc::new(
        PgPoolOptions::new()
            .max_connections(settings.server.max_db_connections)
            .connect(&database_url)
            .await
            .context("Failed to connect to database")?,
    );

    match cli.command {
        Command::InitDb => {
            PgDecisionLedger::new(pool.clone()).initialize().await?;
            PgTradeHistoryStore::new(pool.clone()).initialize().await?;
            info!("Database initialized");
        }
        Command::Tick => {
            let scheduler = build_scheduler(&settings, pool)?;
            let report = scheduler.run_tick().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve => {
            let scheduler = Arc::new(build_scheduler(&settings, pool)?);
            if let Some(secs) = settings.server.tick_interval_secs.filter(|s| *s > 0) {
                info!(interval_secs = secs, "Internal tick loop enabled");
                tokio::spawn(scheduler.clone().run_forever(Duration::from_secs(secs)));
            }
            auto_trader::start_server(&settings.server.bind_address, Arc::new(AppState { scheduler })).await?;
        }
    }

    Ok(())
}

fn init_logging(settings: &WorkerSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_scheduler(settings: &WorkerSettings, pool: Arc<PgPool>) -> Result<Scheduler> {
    let configs = BotConfigLoader::new(Arc::new(PgBotConfigStore::new(pool.clone())));
    let trades: Arc<dyn TradeHistoryStore> = Arc::new(PgTradeHistoryStore::new(pool.clone()));
    let ledger: Arc<dyn DecisionLedger> = Arc::new(PgDecisionLedger::new(pool.clone()));
    let risk = Arc::new(RiskEvaluator::new(trades.clone(), settings.risk.clone()));

    let executor: Arc<dyn TradeExecutor> = if settings.executor.dry_run {
        info!("Dry run: trades go to the paper executor");
        Arc::new(PaperTradeExecutor::new())
    } else {
        let endpoint = settings
            .executor
            .endpoint
            .clone()
            .context("executor.endpoint is required when dry_run is off")?;
        Arc::new(HttpTradeExecutor::new(HttpExecutorConfig {
            endpoint,
            timeout_secs: settings.executor.timeout_secs,
            api_key: settings.executor.api_key.clone(),
        })?)
    };

    let mut granted = Vec::new();
    if settings.entitlements.automated_bots {
        granted.push(Capability::AutomatedBots);
    }
    if settings.entitlements.futures_trading {
        granted.push(Capability::FuturesTrading);
    }

    let mut processor = SignalProcessor::new(
        ledger.clone(),
        risk.clone(),
        trades,
        Arc::new(StaticPlatformMonitor::new()),
        Arc::new(StaticEntitlements::new(granted)),
        executor.clone(),
    );
    if settings.copy_trading.enabled {
        let copier = CopyTrader::new(
            Arc::new(PgFollowerStore::new(pool.clone())),
            configs.clone(),
            risk,
            executor,
            ledger,
        );
        processor = processor.with_copy_trader(Arc::new(copier));
    }

    let router = SignalRouter::with_store(configs.clone(), Arc::new(PgSignalSourceStore::new(pool)));
    Ok(Scheduler::new(configs, router, processor))
}
