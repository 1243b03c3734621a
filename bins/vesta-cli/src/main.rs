//! vesta — command-line driver for the Vesta vote-escrow engine.
//!
//! Replays JSON scenarios against a fresh deployment (in memory or on
//! RocksDB) and inspects persisted escrow and distributor state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use vesta_core::fixed::Amount;
use vesta_core::store::MemoryStore;
use vesta_core::types::{Address, LockedBalance, Timestamp};
use vesta_escrow::VoteEscrow;
use vesta_node::node::{Deployment, Scenario};
use vesta_node::{LogFormat, NodeConfig, RocksStore, StateDb};
use vesta_rewards::{DistributorState, RewardDistributor};

/// Vesta vote-escrow engine.
#[derive(Parser)]
#[command(name = "vesta")]
#[command(version, about = "Vote-escrow accounting with weekly reward distribution")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent state.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level filter (e.g. info, debug, vesta_escrow=trace).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json").
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy and replay a scenario file, printing a JSON report.
    Run(RunArgs),
    /// Show persisted escrow and distributor state.
    Inspect(InspectArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the scenario JSON file.
    scenario: PathBuf,

    /// Keep state in memory instead of the data directory.
    #[arg(long)]
    memory: bool,

    /// Write the report here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct InspectArgs {
    /// Evaluate at this timestamp (default: newest global checkpoint).
    #[arg(long)]
    at: Option<Timestamp>,

    /// Accounts to report on.
    #[arg(long, value_delimiter = ',')]
    account: Vec<Address>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli.global)?;
    init_logging(&config.log_level, config.log_format);

    match cli.command {
        Commands::Run(args) => run(&config, args),
        Commands::Inspect(args) => inspect(&config, args),
        Commands::Config => print_json(&config, None),
    }
}

/// Layer command-line flags over the file and environment configuration.
fn resolve_config(global: &GlobalArgs) -> Result<NodeConfig> {
    let mut config = NodeConfig::load(global.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = &global.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(level) = &global.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = global.log_format {
        config.log_format = format;
    }
    Ok(config)
}

/// Replay a scenario against a fresh deployment.
fn run(config: &NodeConfig, args: RunArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.scenario)
        .with_context(|| format!("failed to read scenario {}", args.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("invalid scenario {}", args.scenario.display()))?;
    info!(scenario = %args.scenario.display(), steps = scenario.steps.len(), memory = args.memory, "replaying scenario");

    let report = if args.memory {
        Deployment::execute(MemoryStore::new(), MemoryStore::new(), &scenario, &config.version)
            .context("deployment failed")?
    } else {
        let db = open_db(config)?;
        if VoteEscrow::open(db.escrow_store()).is_ok() {
            bail!(
                "state already exists in {}; pass --memory or a fresh --data-dir",
                config.db_path().display()
            );
        }
        let report = Deployment::execute(db.escrow_store(), db.rewards_store(), &scenario, &config.version)
            .context("deployment failed")?;
        db.flush().context("failed to flush state")?;
        report
    };

    let rejected = report.outcomes.iter().filter(|o| !o.ok).count();
    info!(steps = report.outcomes.len(), rejected, "scenario complete");
    print_json(&report, args.output.as_deref())
}

#[derive(Serialize)]
struct AccountView {
    account: Address,
    voting_power: Amount,
    locked: LockedBalance,
    claimable: Amount,
}

#[derive(Serialize)]
struct Inspection {
    at: Timestamp,
    epoch: u64,
    total_supply: Amount,
    accounts: Vec<AccountView>,
    distributor: DistributorState,
}

/// Report on state persisted by an earlier `run`.
fn inspect(config: &NodeConfig, args: InspectArgs) -> Result<()> {
    let db = open_db(config)?;
    let escrow: VoteEscrow<RocksStore> =
        VoteEscrow::open(db.escrow_store()).context("no escrow deployed in this data directory")?;
    let distributor: RewardDistributor<RocksStore> =
        RewardDistributor::open(db.rewards_store()).context("no distributor deployed in this data directory")?;

    let epoch = escrow.epoch()?;
    let at = match args.at {
        Some(t) => t,
        None => escrow
            .point_history(epoch)?
            .map(|p| p.ts)
            .context("global checkpoint log is empty")?,
    };

    let mut accounts = Vec::with_capacity(args.account.len());
    for account in args.account {
        accounts.push(AccountView {
            account,
            voting_power: escrow.balance_of_at(&account, at)?,
            locked: escrow.locked(&account)?,
            claimable: distributor.compute_rewards(&account, at, &escrow)?,
        });
    }

    let inspection = Inspection {
        at,
        epoch,
        total_supply: escrow.total_supply_at(at)?,
        accounts,
        distributor: distributor.state().clone(),
    };
    print_json(&inspection, None)
}

fn open_db(config: &NodeConfig) -> Result<StateDb> {
    let path = config.db_path();
    fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))?;
    StateDb::open(&path).with_context(|| format!("failed to open state at {}", path.display()))
}

fn print_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode report")?;
    match output {
        Some(path) => fs::write(path, json + "\n").with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

/// Initialize the tracing subscriber. Logs go to stderr so stdout stays
/// machine-readable.
fn init_logging(level_str: &str, format: LogFormat) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .init(),
    }
}
