use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use qaintake::application::engine::IntakeEngine;
use qaintake::application::turn::Requester;
use qaintake::config::Config;
use qaintake::domain::catalog::PayoutTier;
use qaintake::domain::order::{OrderFilter, OrderStatus};
use qaintake::domain::ports::{NotifierBox, OrderStoreBox, PayloadReferenceStoreBox};
use qaintake::infrastructure::in_memory::{InMemoryOrderStore, InMemoryPayloadReferenceStore};
use qaintake::infrastructure::notifier::{LogNotifier, MemoryNotifier};
use qaintake::interfaces::chat::Console;
use qaintake::interfaces::csv::order_writer::OrderWriter;
use qaintake::interfaces::http::{self, ApiState};
use qaintake::interfaces::payload::{CompactFields, decode_resolving, encode_v1};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the JSON API for the configurator and the dashboard.
    Serve {
        /// Listen address, overriding API_HOST / API_PORT.
        #[arg(long)]
        addr: Option<String>,
    },
    /// Talk to the order workflow line by line on stdin.
    Chat {
        #[arg(long, default_value_t = 1)]
        user_id: i64,
        #[arg(long)]
        username: Option<String>,
        /// Print operator notifications inline instead of logging them.
        #[arg(long)]
        operator_echo: bool,
    },
    /// Decode a configurator payload and print the fields as JSON.
    Decode {
        payload: String,
        /// Signing secret, overriding PAYLOAD_HMAC_SECRET.
        #[arg(long)]
        secret: Option<String>,
    },
    /// Build a `calc_v1` payload.
    Encode {
        #[arg(long)]
        geo: String,
        #[arg(long)]
        tests: u32,
        /// none, withdraw, kyc (or N, W, K).
        #[arg(long, default_value = "none")]
        payout: String,
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        site: Option<String>,
        #[arg(long)]
        login: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        comments: Option<String>,
        #[arg(long)]
        price: Option<u64>,
        /// Signing secret, overriding PAYLOAD_HMAC_SECRET.
        #[arg(long)]
        secret: Option<String>,
    },
    /// Write orders as CSV to stdout.
    Export {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn open_stores(db_path: Option<PathBuf>) -> Result<(OrderStoreBox, PayloadReferenceStoreBox)> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = db_path {
        let store = qaintake::infrastructure::rocksdb::RocksDBStore::open(db_path).into_diagnostic()?;
        let orders: OrderStoreBox = Box::new(store.clone());
        let references: PayloadReferenceStoreBox = Box::new(store);
        return Ok((orders, references));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }

    let orders: OrderStoreBox = Box::new(InMemoryOrderStore::new());
    let references: PayloadReferenceStoreBox = Box::new(InMemoryPayloadReferenceStore::new());
    Ok((orders, references))
}

fn secret_bytes(flag: Option<String>, config: &Config) -> Option<Vec<u8>> {
    flag.or_else(|| config.payload_secret.clone())
        .map(String::into_bytes)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    qaintake::telemetry::init(cli.log_json);
    let config = Config::from_env().into_diagnostic()?;

    match cli.command {
        Command::Serve { addr } => {
            let (orders, references) = open_stores(cli.db_path)?;
            let state = ApiState {
                orders: Arc::from(orders),
                references: Arc::from(references),
                cipher: Arc::from(config.cipher().into_diagnostic()?),
                settings: Arc::new(config.api_settings()),
            };
            if state.settings.api_token.is_none() {
                warn!("API_TOKEN is not set; the API accepts unauthenticated requests");
            }
            let addr = addr.unwrap_or_else(|| config.api_addr());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .into_diagnostic()?;
            info!(%addr, "API listening");
            axum::serve(listener, http::router(state))
                .await
                .into_diagnostic()?;
        }
        Command::Chat {
            user_id,
            username,
            operator_echo,
        } => {
            let (orders, references) = open_stores(cli.db_path)?;
            let echo = MemoryNotifier::new();
            let notifier: NotifierBox = if operator_echo {
                Box::new(echo.clone())
            } else {
                Box::new(LogNotifier)
            };
            let engine = IntakeEngine::new(
                orders,
                references,
                notifier,
                config.cipher().into_diagnostic()?,
                config.engine_settings(),
            );
            let mut console = Console::new(engine, Requester::new(user_id, username));
            if operator_echo {
                console = console.with_operator_echo(echo);
            }
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let handled = console
                .run(stdin, tokio::io::stdout())
                .await
                .into_diagnostic()?;
            info!(handled, "chat session ended");
        }
        Command::Decode { payload, secret } => {
            let (_, references) = open_stores(cli.db_path)?;
            let secret = secret_bytes(secret, &config);
            let fields = decode_resolving(&payload, secret.as_deref(), &*references)
                .await
                .into_diagnostic()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&fields).into_diagnostic()?
            );
        }
        Command::Encode {
            geo,
            tests,
            payout,
            method,
            site,
            login,
            password,
            comments,
            price,
            secret,
        } => {
            let payout = PayoutTier::from_key(&payout)
                .ok_or_else(|| miette::miette!("unknown payout option `{}`", payout))?;
            let fields = CompactFields {
                geo,
                test_count: tests,
                payout,
                payment_method: method,
                site_url: site,
                login,
                password,
                comments,
                price,
            };
            let secret = secret_bytes(secret, &config);
            println!("{}", encode_v1(&fields, secret.as_deref()).into_diagnostic()?);
        }
        Command::Export { status, limit } => {
            let status = match status {
                Some(raw) => Some(
                    OrderStatus::parse(&raw)
                        .ok_or_else(|| miette::miette!("unknown status `{}`", raw))?,
                ),
                None => None,
            };
            let (orders, _) = open_stores(cli.db_path)?;
            let filter = OrderFilter {
                status,
                identity: None,
                limit,
            };
            let orders = orders.list(&filter).await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = OrderWriter::new(stdout.lock());
            let written = writer.write_orders(&orders).into_diagnostic()?;
            writer.finish().into_diagnostic()?;
            info!(written, "orders exported");
        }
    }

    Ok(())
}
