use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use wallet_ledger::application::engine::TransferEngine;
use wallet_ledger::config::{DEFAULT_PORT, DatabaseArgs};
use wallet_ledger::domain::ports::LedgerStoreBox;
use wallet_ledger::domain::wallet::Address;
use wallet_ledger::infrastructure::in_memory::InMemoryLedger;
use wallet_ledger::infrastructure::postgres::PostgresLedger;
use wallet_ledger::interfaces::csv::reader::{TransferReader, WalletReader};
use wallet_ledger::interfaces::csv::writer::WalletWriter;
use wallet_ledger::interfaces::http;
use wallet_ledger::logging::init_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve `POST /transfer` over HTTP.
    Serve {
        #[command(flatten)]
        db: DatabaseArgs,

        /// Port to listen on.
        #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Run a single transfer and print the sender's new balance.
    Transfer {
        from: String,
        to: String,
        #[arg(allow_negative_numbers = true)]
        amount: i64,

        #[command(flatten)]
        db: DatabaseArgs,
    },
    /// Apply transfers from a `from,to,amount` CSV and print every wallet.
    /// Without a database URL the replay runs against an in-memory ledger.
    Replay {
        /// Input transfers CSV file
        input: PathBuf,

        /// `address,balance` CSV of wallets to create before replaying.
        #[arg(long)]
        wallets: Option<PathBuf>,

        #[command(flatten)]
        db: DatabaseArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Command::Serve { db, port } => serve(&db, port).await,
        Command::Transfer {
            from,
            to,
            amount,
            db,
        } => transfer(&db, &from, &to, amount).await,
        Command::Replay { input, wallets, db } => replay(&db, input, wallets).await,
    }
}

async fn connect(db: &DatabaseArgs) -> Result<PostgresLedger> {
    let url = db.require_url().into_diagnostic()?;
    info!("trying to connect to the database");
    let ledger = PostgresLedger::connect(url, db.retry_policy())
        .await
        .into_diagnostic()?;
    ledger.migrate().await.into_diagnostic()?;
    Ok(ledger)
}

async fn serve(db: &DatabaseArgs, port: u16) -> Result<()> {
    let ledger = connect(db).await?;
    let engine = Arc::new(TransferEngine::new(Box::new(ledger)));

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .into_diagnostic()?;
    http::serve(listener, engine, http::shutdown_on(tokio::signal::ctrl_c()))
        .await
        .into_diagnostic()
}

async fn transfer(db: &DatabaseArgs, from: &str, to: &str, amount: i64) -> Result<()> {
    let from = Address::new(from).into_diagnostic()?;
    let to = Address::new(to).into_diagnostic()?;

    let ledger = connect(db).await?;
    let engine = TransferEngine::new(Box::new(ledger));
    let balance = engine.transfer(&from, &to, amount).await.into_diagnostic()?;

    println!("{balance}");
    Ok(())
}

async fn replay(db: &DatabaseArgs, input: PathBuf, wallets: Option<PathBuf>) -> Result<()> {
    let store: LedgerStoreBox = if db.url().is_some() {
        Box::new(connect(db).await?)
    } else {
        info!("no database configured, replaying against an in-memory ledger");
        Box::new(InMemoryLedger::new())
    };
    let engine = TransferEngine::new(store);

    if let Some(path) = wallets {
        let file = File::open(path).into_diagnostic()?;
        for wallet in WalletReader::new(file).wallets() {
            let wallet = wallet.into_diagnostic()?;
            engine.store().seed(wallet).await.into_diagnostic()?;
        }
    }

    let file = File::open(input).into_diagnostic()?;
    for record in TransferReader::new(file).transfers() {
        match record {
            Ok(record) => {
                if let Err(e) = engine
                    .transfer(&record.from, &record.to, record.amount)
                    .await
                {
                    warn!(from = %record.from, to = %record.to, amount = record.amount, "Error processing transfer: {e}");
                }
            }
            Err(e) => {
                warn!("Error reading transfer: {e}");
            }
        }
    }

    let wallets = engine.store().wallets().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(wallets).into_diagnostic()?;

    Ok(())
}
