use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chain_checkpoint::{
    ConnectionHandle,
    abi::{AbiSource, ContractAbi},
    config::Config,
    flow::SubmissionFlow,
    models::{CheckpointDraft, CheckpointEvent, Role, is_known_status, relative_time},
    scheduler::PollOptions,
    simulation::Simulation,
    submitter::SubmitOptions,
};
use clap::{Parser, Subcommand};
use ethers::utils::to_checksum;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "chain-checkpoint")]
#[command(about = "Read and append shipment checkpoints on a supply-chain tracker contract")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show network, account and balance
    Status,
    /// Look up the role of an address (default: the signing account)
    Role {
        address: Option<String>,
    },
    /// Number of checkpoints recorded for a shipment
    Count {
        shipment: String,
    },
    /// Full checkpoint history of a shipment
    History {
        shipment: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Append a checkpoint
    Add {
        shipment: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        status: String,
        /// Opaque document reference, e.g. an IPFS hash
        #[arg(long, default_value = "")]
        document_hash: String,
        /// Submit without asking for confirmation
        #[arg(long)]
        yes: bool,
        /// Submit even if it repeats the latest checkpoint
        #[arg(long)]
        allow_duplicate: bool,
        #[arg(long)]
        skip_balance_check: bool,
    },
    /// Recent CheckpointAdded events
    Events {
        #[arg(long)]
        shipment: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Scan from this block to the head instead of the lookback window
        #[arg(long)]
        from_block: Option<u64>,
    },
    /// Print new CheckpointAdded events until Ctrl-C
    Watch {
        #[arg(long)]
        shipment: Option<String>,
        /// Seconds between scans (default: POLL_INTERVAL_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Replay a four-step delivery journey
    Simulate {
        #[arg(long, default_value = chain_checkpoint::simulation::DEFAULT_SHIPMENT_ID)]
        shipment: String,
        #[arg(long, default_value_t = 2)]
        pause_secs: u64,
    },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let source = match &config.abi_path {
        Some(path) => AbiSource::File(path.clone()),
        None => AbiSource::Bundled,
    };
    let abi = ContractAbi::load(&source).context("Failed to load contract ABI")?;

    let mut handle = ConnectionHandle::connect(&config, abi)
        .await
        .context("Failed to connect to blockchain")?;

    let outcome = match cli.command {
        Commands::Status => status(&handle).await,
        Commands::Role { address } => role(&handle, address.as_deref()).await,
        Commands::Count { shipment } => {
            let count = handle.get_checkpoint_count(&shipment).await?;
            println!("📦 {}: {} checkpoint(s)", shipment.trim(), count);
            Ok(())
        }
        Commands::History { shipment, json } => history(&handle, &shipment, json).await,
        Commands::Add {
            shipment,
            location,
            status,
            document_hash,
            yes,
            allow_duplicate,
            skip_balance_check,
        } => {
            let draft = CheckpointDraft::new(shipment, location, status, document_hash);
            let options = SubmitOptions {
                skip_balance_check,
                ..SubmitOptions::default()
            };
            add(&handle, draft, &options, yes, allow_duplicate).await
        }
        Commands::Events {
            shipment,
            limit,
            from_block,
        } => events(&handle, shipment.as_deref(), limit, from_block).await,
        Commands::Watch { shipment, interval } => watch(&handle, shipment, interval).await,
        Commands::Simulate {
            shipment,
            pause_secs,
        } => simulate(&handle, shipment, pause_secs).await,
    };

    handle.disconnect();
    outcome
}

async fn status(handle: &ConnectionHandle) -> Result<()> {
    let status = handle.status().await;

    if status.connected {
        println!("✅ Connected");
    } else {
        println!("❌ Not connected");
    }
    if let Some(endpoint) = &status.network_endpoint {
        println!("🌐 Endpoint: {}", endpoint);
    }
    if let Some(chain_id) = status.chain_id {
        println!("🔗 Chain ID: {}", chain_id);
    }
    if let Some(block) = status.latest_block {
        println!("🧱 Latest block: {}", block);
    }
    if let Some(account) = &status.account_address {
        println!("👤 Account: {}", to_checksum(account, None));
    }
    if let Some(balance) = &status.balance {
        println!("💰 Balance: {}", balance);
    }
    if let Some(error) = &status.error {
        println!("⚠️  Error: {}", error);
    }

    Ok(())
}

async fn role(handle: &ConnectionHandle, address: Option<&str>) -> Result<()> {
    let (address, role) = match address {
        Some(address) => (address.trim().to_string(), handle.get_role(address).await?),
        None => {
            let account = handle.account().context("No signing account")?;
            (to_checksum(&account, None), handle.own_role().await?)
        }
    };

    println!("👤 {}: {}", address, role);
    Ok(())
}

async fn history(handle: &ConnectionHandle, shipment: &str, json: bool) -> Result<()> {
    let history = handle.get_shipment_history(shipment).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("ℹ️  No checkpoints found for {}", shipment.trim());
        return Ok(());
    }

    for (i, checkpoint) in history.iter().enumerate() {
        println!("#{} {}", i + 1, checkpoint.formatted_time());
        println!("📍 {} - {}", checkpoint.location, checkpoint.status);
        if let Some(hash) = &checkpoint.document_hash {
            println!("📄 Document: {}", hash);
        }
        println!("👤 Submitted by: {}", to_checksum(&checkpoint.submitted_by, None));
        println!("================================");
    }

    Ok(())
}

async fn add(
    handle: &ConnectionHandle,
    draft: CheckpointDraft,
    options: &SubmitOptions,
    yes: bool,
    allow_duplicate: bool,
) -> Result<()> {
    let mut flow = SubmissionFlow::new();
    flow.stage(draft)?;
    let Some(draft) = flow.draft().cloned() else {
        bail!("No checkpoint staged");
    };

    let role = handle.own_role().await?;
    if role == Role::None {
        bail!("Account has no role on the contract and cannot add checkpoints");
    }

    if !is_known_status(&draft.status) {
        println!("⚠️  '{}' is not one of the usual statuses", draft.status);
    }

    if let Some(latest) = handle.find_duplicate(&draft).await? {
        println!(
            "⚠️  Latest checkpoint is already {} - {} ({})",
            latest.location,
            latest.status,
            latest.formatted_time()
        );
        if !allow_duplicate {
            bail!("Duplicate checkpoint, pass --allow-duplicate to submit anyway");
        }
    }

    println!("📦 Shipment: {}", draft.shipment_id);
    println!("📍 {} - {}", draft.location, draft.status);
    if !draft.document_hash.is_empty() {
        println!("📄 Document: {}", draft.document_hash);
    }
    println!("👤 As {} ({})", role, handle.account().map(|a| to_checksum(&a, None)).unwrap_or_default());

    if !yes && !confirm_prompt("Submit this checkpoint?")? {
        flow.cancel()?;
        println!("ℹ️  Cancelled");
        return Ok(());
    }
    flow.confirm()?;

    let result = flow.run(handle, options).await?;
    if result.success {
        println!("✅ {}", result.message);
        if let Some(block) = result.block_number {
            println!("🧱 Block: {}", block);
        }
        if let Some(gas_used) = result.gas_used {
            println!("⛽ Gas used: {} / {} at {} gwei", gas_used, result.gas_limit, result.gas_price_gwei);
        }
        for event in &result.events {
            println!("🔔 CheckpointAdded: {} at {} ({})", event.shipment, event.location, event.status);
        }
        Ok(())
    } else {
        bail!("{}", result.message)
    }
}

async fn events(
    handle: &ConnectionHandle,
    shipment: Option<&str>,
    limit: usize,
    from_block: Option<u64>,
) -> Result<()> {
    let events = match from_block {
        Some(from_block) => {
            let mut events = handle.poll_once(from_block, shipment).await?.events;
            let skip = events.len().saturating_sub(limit);
            events.split_off(skip)
        }
        None => handle.recent_events(shipment, limit).await?,
    };

    if events.is_empty() {
        println!("ℹ️  No recent events");
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp().max(0) as u64;
    for event in &events {
        print_event(event, Some(now));
    }

    Ok(())
}

async fn watch(handle: &ConnectionHandle, shipment: Option<String>, interval: Option<u64>) -> Result<()> {
    let options = PollOptions {
        interval: interval.map(Duration::from_secs),
        from_block: None,
        shipment_filter: shipment,
    };

    let poller = handle.start_polling(options, |event| print_event(&event, None))?;
    println!("👀 Watching for new checkpoints, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("🛑 Stopping...");
    if let Some(next) = poller.stop().await {
        println!("ℹ️  Resume with --from-block {}", next);
    }

    Ok(())
}

async fn simulate(handle: &ConnectionHandle, shipment: String, pause_secs: u64) -> Result<()> {
    let simulation = Simulation::new(shipment).with_pause(Duration::from_secs(pause_secs));

    println!("🚚 Simulating delivery of {}", simulation.shipment_id);
    println!("================================");

    let report = simulation.run(handle, &SubmitOptions::default()).await;

    println!("================================");
    println!("✅ {}/{} checkpoints submitted", report.succeeded(), report.outcomes.len());
    for outcome in report.outcomes.iter().filter(|o| !o.result.success) {
        println!("❌ {}: {}", outcome.step.location, outcome.result.message);
    }
    match &report.history {
        Some(history) => println!("📦 {} now has {} checkpoint(s)", report.shipment_id, history.len()),
        None => println!("⚠️  Could not read back the history of {}", report.shipment_id),
    }

    Ok(())
}

fn print_event(event: &CheckpointEvent, now: Option<u64>) {
    let when = match now {
        Some(now) => format!("{} ({})", event.formatted_time(), relative_time(event.timestamp, now)),
        None => event.formatted_time(),
    };
    println!("🔔 {} at block {}", event.shipment, event.block_number);
    println!("📍 {} - {} [{}]", event.location, event.status, when);
    println!("👤 {}", to_checksum(&event.submitted_by, None));
    println!("🔗 {:#x}", event.transaction_hash);
    println!("================================");
}

fn confirm_prompt(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
