//! disperse 命令行入口

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use disperse::{
    config::Config,
    domain::{Asset, ChainCatalog, GasConfig},
    error::exit_disposition,
    infrastructure::{logging::init_logging, EndpointValidator, EthersConnector, FallbackTransport},
    metrics,
    security::load_wallet,
    service::{
        dispersal_session::resolve_gas, payout_calculator::plan_equal_split, BalanceWatcher,
        DispersalSession, PayoutRequest, SendRequest,
    },
    utils::{load_recipients, AddressValidator},
};
use ethers::{
    types::{Address, U256},
    utils::parse_units,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about = "Batch native/ERC-20 dispersal for EVM chains", long_about = None)]
struct Cli {
    /// TOML config file (file values override environment)
    #[arg(long, env = "DISPERSE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a fixed amount (or an equal split of the balance) to every recipient
    Send(SendArgs),
    /// List the chain catalog
    Chains,
    /// Watch an account balance and report deposits
    Watch(WatchArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Chain id, symbol or name
    #[arg(long)]
    chain: String,

    /// Newline-delimited recipient address file
    #[arg(long)]
    recipients: PathBuf,

    /// Decimal amount per recipient
    #[arg(long, conflicts_with = "equal_split", required_unless_present = "equal_split")]
    amount: Option<String>,

    /// Split the whole balance (minus reserved fees) equally
    #[arg(long)]
    equal_split: bool,

    /// Confirm an equal-split dispersal
    #[arg(long)]
    yes: bool,

    /// ERC-20 contract address; native currency when omitted
    #[arg(long)]
    token: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    max_attempts: Option<u32>,

    /// Explicit max fee per gas, in gwei
    #[arg(long, requires = "priority_fee_gwei")]
    max_fee_gwei: Option<String>,

    /// Explicit max priority fee per gas, in gwei
    #[arg(long, requires = "max_fee_gwei")]
    priority_fee_gwei: Option<String>,

    /// Explicit gas limit (used with the explicit fee flags)
    #[arg(long, requires = "max_fee_gwei")]
    gas_limit: Option<u64>,

    /// Environment variable holding the private key
    #[arg(long)]
    private_key_env: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Print Prometheus-format counters to stderr when done
    #[arg(long)]
    print_metrics: bool,
}

#[derive(Args)]
struct WatchArgs {
    #[arg(long)]
    chain: String,

    #[arg(long)]
    address: String,

    #[arg(long)]
    token: Option<String>,

    #[arg(long, default_value_t = 15)]
    interval_secs: u64,

    /// Recipient file used to print an equal-split preview on each deposit
    #[arg(long)]
    recipients: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    let result = match cli.command {
        Commands::Send(args) => send(args, config).await,
        Commands::Chains => chains(&config),
        Commands::Watch(args) => watch(args, config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let (code, fatal) = exit_disposition(&e);
            if fatal {
                tracing::error!(code, error = %e, "Session aborted");
            } else {
                tracing::warn!(code, error = %e, "Endpoint check failed");
            }
            eprintln!("error [{}]: {:#}", code, e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = Config::from_env_and_file(path)?;
    config.validate()?;
    Ok(config)
}

fn load_catalog(config: &Config) -> Result<ChainCatalog> {
    let mut catalog = ChainCatalog::new();
    if let Some(path) = &config.network.chains_file {
        let added = catalog.load_file(path)?;
        tracing::info!(path = %path, added, "Custom chains loaded");
    }
    Ok(catalog)
}

fn parse_asset(token: Option<&str>) -> Result<Asset> {
    Ok(match token {
        Some(address) => Asset::Token(AddressValidator::parse(address)?),
        None => Asset::Native,
    })
}

fn gwei(value: &str) -> Result<U256> {
    Ok(parse_units(value, "gwei")
        .with_context(|| format!("invalid gwei amount: {}", value))?
        .into())
}

fn gas_config(args: &SendArgs, asset: &Asset) -> Result<GasConfig> {
    match (&args.max_fee_gwei, &args.priority_fee_gwei) {
        (Some(max_fee), Some(priority_fee)) => Ok(GasConfig::Explicit {
            max_fee_per_gas: gwei(max_fee)?,
            max_priority_fee_per_gas: gwei(priority_fee)?,
            gas_limit: args.gas_limit.unwrap_or_else(|| asset.default_gas_limit()),
        }),
        _ => Ok(GasConfig::Default),
    }
}

async fn send(args: SendArgs, mut config: Config) -> Result<()> {
    if args.equal_split && !args.yes {
        bail!("--equal-split distributes the entire balance; re-run with --yes to confirm");
    }
    if let Some(batch_size) = args.batch_size {
        config.dispatch.batch_size = batch_size;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.dispatch.max_attempts = max_attempts;
    }
    config.validate()?;

    let catalog = load_catalog(&config)?;
    let chain = catalog.resolve(&args.chain)?.clone();
    let asset = parse_asset(args.token.as_deref())?;

    let list = load_recipients(&args.recipients)?;
    if !list.dropped.is_empty() {
        tracing::warn!(dropped = list.dropped.len(), "Some recipient lines were invalid and skipped");
    }

    let wallet = load_wallet(args.private_key_env.as_deref())?;
    let request = SendRequest {
        asset,
        payout: match &args.amount {
            Some(amount) if !args.equal_split => PayoutRequest::Fixed(amount.clone()),
            _ => PayoutRequest::EqualSplit,
        },
        gas: gas_config(&args, &asset)?,
    };

    let connector = Arc::new(EthersConnector::new(config.network.request_timeout()));
    let session =
        DispersalSession::prepare(&chain, connector, wallet, list.addresses, request, &config).await?;

    let plan = session.plan();
    eprintln!(
        "Dispersing {} to {} recipients on {} ({} live endpoint(s)), total {}",
        plan.per_recipient,
        plan.recipient_count,
        chain.name,
        session.validation_report().live_count(),
        plan.total
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let summary = session.run(cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render_text());
    }
    if args.print_metrics {
        eprint!("{}", metrics::render_prometheus());
    }
    Ok(())
}

fn chains(config: &Config) -> Result<()> {
    let catalog = load_catalog(config)?;
    for chain in catalog.list_all() {
        println!(
            "{:>10}  {:<6} {:<20} {} endpoint(s)",
            chain.chain_id,
            chain.symbol,
            chain.name,
            chain.endpoints.len()
        );
    }
    Ok(())
}

async fn watch(args: WatchArgs, config: Config) -> Result<()> {
    let catalog = load_catalog(&config)?;
    let chain = catalog.resolve(&args.chain)?.clone();
    let account: Address = AddressValidator::parse(&args.address)?;
    let asset = parse_asset(args.token.as_deref())?;
    let recipients = match &args.recipients {
        Some(path) => Some(load_recipients(path)?.addresses.len()),
        None => None,
    };

    let connector = Arc::new(EthersConnector::new(config.network.request_timeout()));
    let validator = EndpointValidator::new(connector, config.network.validation_timeout())
        .strict(config.network.strict_chain_id);
    let (transport, _) = FallbackTransport::connect(&chain, &validator).await?;
    let transport = Arc::new(transport.call_timeout(config.network.request_timeout()));

    let gas = resolve_gas(transport.as_ref(), &asset, GasConfig::Default).await?;

    let cancel = CancellationToken::new();
    let watcher = BalanceWatcher::new(
        transport.clone(),
        account,
        asset,
        Duration::from_secs(args.interval_secs.max(1)),
    );
    let (mut changes, handle) = watcher.spawn(cancel.clone());

    eprintln!("Watching {:?} on {} (Ctrl-C to stop)", account, chain.name);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            change = changes.recv() => {
                let Some(change) = change else { break };
                println!("deposit: +{} (balance {})", change.delta, change.current);

                if let Some(count) = recipients {
                    let reserved = match asset {
                        Asset::Native => gas.max_cost().saturating_mul(U256::from(count)),
                        Asset::Token(_) => U256::zero(),
                    };
                    match plan_equal_split(change.current, reserved, count) {
                        Ok(plan) => println!(
                            "  equal split preview: {} each to {} recipients (run `send --equal-split --yes` to disperse)",
                            plan.per_recipient, count
                        ),
                        Err(e) => println!("  equal split preview unavailable: {}", e),
                    }
                }
            }
        }
    }

    handle.await.context("balance watcher task failed")?;
    Ok(())
}
