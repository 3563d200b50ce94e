//! nft-unmatched: inventory of inbound connection attempts that no nftables
//! rule accepted.
//!
//! The nftables ruleset logs unmatched inbound packets with the prefix
//! `nft_in_unmtch`; ulogd forwards them as JSON over a Unix stream socket.
//! `nft-unmatched run` listens on that socket and counts, per remote address
//! and local service, how often and when each was seen.
//!
//! # Graceful Shutdown
//!
//! SIGINT, SIGTERM and SIGQUIT stop the collector: the open ulogd connection
//! is dropped, the socket file is removed and the database is closed.

mod collector;
mod config;
mod notify;
mod pipeline;
mod report;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use inventory_sqlite::{CallFilter, Db, Table};
use std::path::{Path, PathBuf};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use unmatched_core::{Protocol, ServiceNames};

use crate::collector::Collector;
use crate::config::{CollectorConfig, Settings};
use crate::report::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "nft-unmatched", version, about = "Inventory of unmatched inbound packets logged by nftables via ulogd")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./nft-unmatched.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// Logging verbosity (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect ulogd events (default when no subcommand is given)
    Run(RunArgs),
    /// List address/service pairs, busiest first
    Report {
        /// Maximum rows to print
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Only this transport (tcp or udp)
        #[arg(long)]
        proto: Option<Protocol>,
        /// Only this destination port
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Row counts and total events
    Summary {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Write one table to a Parquet file
    Export {
        #[arg(value_enum)]
        table: ExportTable,
        /// Output file (overwritten)
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Print version information
    Version,
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Unix socket ulogd connects to
    #[arg(long)]
    socket: Option<PathBuf>,
    /// oob.prefix value to collect
    #[arg(long)]
    prefix: Option<String>,
    /// Bytes requested per socket read
    #[arg(long)]
    read_buffer_size: Option<usize>,
    /// Largest incomplete record kept between reads
    #[arg(long)]
    max_pending_bytes: Option<usize>,
    /// services(5) file used to name ports
    #[arg(long)]
    services_file: Option<PathBuf>,
    /// Store services without names
    #[arg(long, default_value_t = false)]
    no_service_names: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ExportTable { Services, Addresses, Calls }

impl From<ExportTable> for Table {
    fn from(t: ExportTable) -> Self {
        match t {
            ExportTable::Services => Table::Services,
            ExportTable::Addresses => Table::Addresses,
            ExportTable::Calls => Table::Calls,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .with_context(|| format!("invalid log level: {}", cli.log_level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let file_cfg = config::load_config(cli.config.as_deref())?
        .and_then(|c| c.collector)
        .unwrap_or_default();
    let cli_cfg = CollectorConfig { database_path: cli.database.clone(), ..Default::default() };

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Version => {
            println!("nft-unmatched {} (core {})", env!("CARGO_PKG_VERSION"), unmatched_core::version());
        }
        Commands::Run(args) => {
            let cli_cfg = CollectorConfig {
                socket_path: args.socket,
                log_prefix: args.prefix,
                read_buffer_size: args.read_buffer_size,
                max_pending_bytes: args.max_pending_bytes,
                services_file: args.services_file,
                resolve_service_names: args.no_service_names.then_some(false),
                ..cli_cfg
            };
            let settings = Settings::resolve(cli_cfg.or(file_cfg))?;
            run(settings)?;
        }
        Commands::Report { limit, proto, port, format } => {
            let db = open_existing(&Settings::resolve(cli_cfg.or(file_cfg))?.database_path)?;
            let filter = CallFilter { proto: proto.map(|p| p.as_str().to_string()), port, limit: Some(limit) };
            let rows = db.top_calls(&filter)?;
            report::write_calls(&mut std::io::stdout().lock(), &rows, format)?;
        }
        Commands::Summary { format } => {
            let db = open_existing(&Settings::resolve(cli_cfg.or(file_cfg))?.database_path)?;
            report::write_summary(&mut std::io::stdout().lock(), &db.summary()?, format)?;
        }
        Commands::Export { table, out } => {
            let db = open_existing(&Settings::resolve(cli_cfg.or(file_cfg))?.database_path)?;
            let table = Table::from(table);
            let rows = db
                .export_table_to_parquet(table, &out)
                .with_context(|| format!("exporting {} to {}", table.name(), out.display()))?;
            tracing::info!(table = table.name(), rows, out = %out.display(), "export finished");
        }
    }
    Ok(())
}

fn open_existing(path: &Path) -> Result<Db> {
    if !path.exists() {
        bail!("database {} does not exist", path.display());
    }
    Db::open_or_create(path)
}

fn run(settings: Settings) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %settings.socket_path.display(),
        database = %settings.database_path.display(),
        prefix = %settings.log_prefix,
        "starting collector",
    );

    // One thread: records are applied strictly in arrival order and the
    // database handle is never shared.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        install_signal_handlers(shutdown_tx)?;

        tracing::info!("opening database {}", settings.database_path.display());
        let store = Db::open_or_create(&settings.database_path)
            .with_context(|| format!("opening database {}", settings.database_path.display()))?;

        let names: Box<dyn ServiceNames> = match &settings.services_file {
            Some(path) => Box::new(service_names::ServicesTable::load_or_empty(path)),
            None => Box::new(service_names::Disabled),
        };

        let mut collector = Collector::bind(&settings, store, names, notify::from_env())?;
        collector.run(shutdown_rx).await
    })?;

    tracing::info!("collector stopped");
    Ok(())
}

/// Register the termination signals once and turn the first one received into
/// a shutdown request.
fn install_signal_handlers(tx: watch::Sender<bool>) -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let mut quit = signal(SignalKind::quit()).context("registering SIGQUIT handler")?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            _ = quit.recv() => "SIGQUIT",
        };
        tracing::info!("received {name}, shutting down");
        let _ = tx.send(true);
    });
    Ok(())
}
