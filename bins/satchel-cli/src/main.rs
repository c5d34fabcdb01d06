//! satchel: command-line front end for the Satchel wallet.
//!
//! Session state lives in `~/.satchel/wallet.json`; settings come from
//! `~/.satchel/config.toml` and `SATCHEL__*` environment variables.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use satchel_core::address::{Network, address_link, tx_link};
use satchel_core::constants::sat_to_bsv;
use satchel_core::payload::{DataSegment, OpReturnPayload};
use satchel_core::traits::FeedTransport;
use satchel_rpc::{BitsocketTransport, PollTransport, RemoteIndexer};
use satchel_wallet::{
    ActivityEvent, BroadcastOptions, BroadcastOutcome, Direction, FileStore, MonitorStatus, Wallet,
};

use crate::config::CliConfig;

/// Satchel command-line wallet.
#[derive(Parser)]
#[command(name = "satchel")]
#[command(version, about = "Lightweight BSV wallet with OP_RETURN data transactions.")]
struct Cli {
    /// Config file (default: ~/.satchel/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use testnet regardless of configuration.
    #[arg(long, global = true)]
    testnet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new mnemonic and log in with it.
    New,
    /// Log in with a mnemonic, xprv or WIF key.
    Login(LoginArgs),
    /// Forget every stored secret and cached balance.
    Logout,
    /// Show the current receive and change addresses.
    Address,
    /// Show the wallet balance.
    Balance(BalanceArgs),
    /// List spendable outputs, highest value first.
    Utxos(UtxosArgs),
    /// Pay satoshis to an address.
    Send(SendArgs),
    /// Publish an OP_RETURN data transaction.
    Data(DataArgs),
    /// List past transactions.
    History,
    /// Follow activity on the wallet's addresses until Ctrl-C.
    Watch(WatchArgs),
    /// Print the stored mnemonic.
    Mnemonic,
}

#[derive(Args)]
struct LoginArgs {
    /// Secret to log in with. If not provided, will prompt securely.
    #[arg(short, long)]
    secret: Option<String>,
}

#[derive(Args)]
struct BalanceArgs {
    /// Query the indexer even if the cached balance is fresh.
    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct UtxosArgs {
    /// Show at most this many (0 = all).
    #[arg(short, long, default_value = "0")]
    max: usize,
}

#[derive(Args)]
struct SendArgs {
    /// Recipient P2PKH address.
    #[arg(short, long)]
    to: String,

    /// Amount in satoshis.
    #[arg(short, long)]
    amount: u64,

    /// Build and validate, print the raw transaction, do not relay.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct DataArgs {
    /// Data pushes, in order. `0x`-prefixed values are hex, anything else UTF-8.
    #[arg(required = true)]
    segments: Vec<String>,

    /// Optional payment recipient.
    #[arg(long)]
    to: Option<String>,

    /// Payment amount in satoshis.
    #[arg(long, default_value = "0")]
    amount: u64,

    /// Build and validate, print the raw transaction, do not relay.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct WatchArgs {
    /// Poll the indexer instead of subscribing to the push feed.
    #[arg(long)]
    poll: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_dir()?.join("config.toml"),
    };
    let mut cfg = CliConfig::load(&config_path)?;
    if cli.testnet {
        cfg.wallet.network = Network::Testnet;
    }
    let mut wallet = open_wallet(&cfg)?;

    match cli.command {
        Commands::New => wallet_new(&mut wallet).await,
        Commands::Login(args) => wallet_login(&mut wallet, args).await,
        Commands::Logout => {
            wallet.logout().await?;
            println!("Logged out.");
            Ok(())
        }
        Commands::Address => wallet_address(&wallet),
        Commands::Balance(args) => wallet_balance(&mut wallet, args).await,
        Commands::Utxos(args) => wallet_utxos(&mut wallet, args).await,
        Commands::Send(args) => wallet_send(&mut wallet, args).await,
        Commands::Data(args) => wallet_data(&mut wallet, args).await,
        Commands::History => wallet_history(&wallet).await,
        Commands::Watch(args) => wallet_watch(wallet, &cfg, args).await,
        Commands::Mnemonic => {
            match wallet.mnemonic()? {
                Some(phrase) => println!("{}", phrase.as_str()),
                None => println!("No mnemonic stored (logged in with a key)."),
            }
            Ok(())
        }
    }
}

fn open_wallet(cfg: &CliConfig) -> Result<Wallet> {
    let store_path = cfg.store_path()?;
    let store = FileStore::open(&store_path)
        .with_context(|| format!("Failed to open wallet store {}", store_path.display()))?;
    let indexer = RemoteIndexer::new(cfg.rpc.clone()).context("Failed to build HTTP client")?;
    Wallet::open(cfg.wallet.clone(), Arc::new(store), Arc::new(indexer)).context("Failed to load wallet")
}

async fn wallet_new(wallet: &mut Wallet) -> Result<()> {
    let phrase = wallet.new_wallet().await.context("Failed to create wallet")?;
    let address = wallet.address()?;

    println!("\n=== WALLET CREATED ===");
    println!("Network: {}", wallet.config().network);
    println!("\nMNEMONIC (BACKUP THIS, 12 WORDS):");
    println!("  {}", phrase.as_str());
    println!("\nAnyone with this phrase can spend your funds.");
    println!("\nReceive address: {address}");
    Ok(())
}

async fn wallet_login(wallet: &mut Wallet, args: LoginArgs) -> Result<()> {
    let secret = match args.secret {
        Some(s) => s,
        None => rpassword::prompt_password("Mnemonic, xprv or WIF: ").context("Failed to read secret")?,
    };
    let address = wallet.login(&secret).await.context("Login failed")?;
    let balance = wallet.balance()?;
    println!("Logged in. Receive address: {address}");
    println!("Balance: {:.8} BSV", sat_to_bsv(balance.total()));
    Ok(())
}

fn wallet_address(wallet: &Wallet) -> Result<()> {
    let network = wallet.config().network;
    let address = wallet.address()?.to_string();
    println!("Receive: {address}");
    println!("Change:  {}", wallet.change_address()?);
    println!("{}", address_link(&address, network));
    Ok(())
}

async fn wallet_balance(wallet: &mut Wallet, args: BalanceArgs) -> Result<()> {
    if args.refresh {
        wallet.refresh().await.context("Sync failed")?;
    } else {
        wallet.update_all().await.context("Sync failed")?;
    }
    let balance = wallet.balance()?;
    println!("\n=== WALLET BALANCE ===");
    println!("Confirmed:   {:.8} BSV ({} sat)", sat_to_bsv(balance.confirmed), balance.confirmed);
    println!("Unconfirmed: {:.8} BSV ({} sat)", sat_to_bsv(balance.unconfirmed), balance.unconfirmed);
    println!("Total:       {:.8} BSV", sat_to_bsv(balance.total()));
    Ok(())
}

async fn wallet_utxos(wallet: &mut Wallet, args: UtxosArgs) -> Result<()> {
    wallet.update_all().await.context("Sync failed")?;
    let utxos = wallet.utxos(args.max)?;
    if utxos.is_empty() {
        println!("No spendable outputs.");
    }
    for u in utxos {
        let owner = u.key_ref().map(|r| r.to_string()).unwrap_or_else(|| "-".into());
        println!("{}:{}  {:>12} sat  {owner}", u.txid, u.vout, u.satoshis);
    }
    Ok(())
}

async fn wallet_send(wallet: &mut Wallet, args: SendArgs) -> Result<()> {
    wallet.update_all().await.context("Sync failed")?;
    let outcome = if args.dry_run {
        let tx = wallet.build_payment(&args.to, args.amount)?;
        wallet.broadcast(tx, BroadcastOptions::dry_run()).await?
    } else {
        wallet.send(&args.to, args.amount).await.context("Send failed")?
    };
    report(wallet, &outcome);
    Ok(())
}

async fn wallet_data(wallet: &mut Wallet, args: DataArgs) -> Result<()> {
    let payload = OpReturnPayload::new(args.segments.iter().map(|s| parse_segment(s)).collect());
    if payload.exceeds_standard_size()? {
        tracing::warn!("payload exceeds the standard data carrier size; relays may refuse it");
    }
    wallet.update_all().await.context("Sync failed")?;
    let tx = wallet.build_data_transaction(payload, args.to.as_deref(), args.amount)?;
    let options = if args.dry_run { BroadcastOptions::dry_run() } else { BroadcastOptions::default() };
    let outcome = wallet.broadcast(tx, options).await.context("Broadcast failed")?;
    report(wallet, &outcome);
    Ok(())
}

async fn wallet_history(wallet: &Wallet) -> Result<()> {
    let network = wallet.config().network;
    let history = wallet.history().await.context("History lookup failed")?;
    if history.is_empty() {
        println!("No transactions.");
    }
    for entry in history {
        let state = if entry.confirmed { "confirmed" } else { "unconfirmed" };
        println!("{}  {state:<11}  {}", entry.txid, tx_link(&entry.txid, network));
    }
    Ok(())
}

async fn wallet_watch(wallet: Wallet, cfg: &CliConfig, args: WatchArgs) -> Result<()> {
    let feed: Arc<dyn FeedTransport> = if args.poll {
        Arc::new(PollTransport::new(cfg.rpc.poll_interval()))
    } else {
        Arc::new(BitsocketTransport::from_config(&cfg.rpc)?)
    };
    let mut wallet = wallet.with_feed(feed);
    wallet.update_all().await.context("Sync failed")?;

    let state = wallet.state().clone();
    wallet.start_activity_monitor(move |event: &ActivityEvent| {
        let arrow = match event.direction {
            Direction::Incoming => "+",
            Direction::Outgoing => "-",
        };
        println!("{arrow}{} sat  {}", event.satoshis, event.txid);
        if let Ok(snapshot) = state.load() {
            println!("Balance: {:.8} BSV", sat_to_bsv(snapshot.balance().total()));
        }
    })?;
    println!("Watching {} (Ctrl-C to stop)", wallet.address()?);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut check = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = check.tick() => {
                if wallet.monitor_status() == Some(MonitorStatus::Closed) {
                    bail!("activity feed closed");
                }
            }
        }
    }
    wallet.stop_activity_monitor();
    Ok(())
}

fn report(wallet: &Wallet, outcome: &BroadcastOutcome) {
    let txid = outcome.txid().to_string();
    match outcome {
        BroadcastOutcome::DryRun { tx, raw_hex } => {
            println!("\n=== DRY RUN (not relayed) ===");
            println!("TxID: {txid}");
            println!("Fee: {} sat ({} bytes)", tx.fee(), raw_hex.len() / 2);
            println!("{raw_hex}");
        }
        BroadcastOutcome::Relayed { .. } => {
            println!("\n=== TRANSACTION SENT ===");
            println!("TxID: {txid}");
            println!("{}", tx_link(&txid, wallet.config().network));
        }
    }
}

/// `0x`-prefixed arguments are hex bytes; everything else is text.
fn parse_segment(arg: &str) -> DataSegment {
    match arg.strip_prefix("0x") {
        Some(hex) => DataSegment::Hex(hex.to_string()),
        None => DataSegment::text(arg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn segments_by_prefix() {
        assert_eq!(parse_segment("0x6d02"), DataSegment::Hex("6d02".into()));
        assert_eq!(parse_segment("hello"), DataSegment::Text("hello".into()));
        assert_eq!(parse_segment("0X"), DataSegment::Text("0X".into()));
    }

    #[test]
    fn data_command_requires_segments() {
        assert!(Cli::try_parse_from(["satchel", "data"]).is_err());
        let cli = Cli::try_parse_from(["satchel", "data", "0x6d02", "hi", "--dry-run"]).unwrap();
        let Commands::Data(args) = cli.command else { panic!("expected data command") };
        assert_eq!(args.segments, vec!["0x6d02", "hi"]);
        assert!(args.dry_run);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["satchel", "balance", "--refresh", "--testnet"]).unwrap();
        assert!(cli.testnet);
    }
}
