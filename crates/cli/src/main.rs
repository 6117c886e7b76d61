// circuitmap CLI - reconcile ordered circuits against observed WAN uplinks

mod audit;
mod exit_codes;
mod ingest;
mod lookup;
mod reconcile;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use circuitmap_io::SqliteStore;
use circuitmap_recon::model::InterfaceId;
use circuitmap_recon::{ReconConfig, ReconError, StoreError};
use circuitmap_registry::{RdapResolver, RegistryError};

use exit_codes::{EXIT_CONFIG, EXIT_ERROR, EXIT_STORE, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "cmap")]
#[command(about = "Reconcile ordered circuits with observed WAN interfaces")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Reconciliation config (TOML). Defaults to the embedded configuration.
    #[arg(long, global = true, env = "CMAP_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite store holding circuits, telemetry and results
    #[arg(long, global = true, env = "CMAP_DB", default_value = "circuitmap.db")]
    db: PathBuf,

    /// Debug logging (overrides RUST_LOG)
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only (overrides RUST_LOG)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load circuit and telemetry feeds into the store
    #[command(after_help = "\
Examples:
  cmap ingest --circuits circuits.json --telemetry telemetry.json
  cmap ingest --telemetry telemetry.json --json")]
    Ingest {
        /// JSON array of circuit records (upserted by id)
        #[arg(long)]
        circuits: Option<PathBuf>,

        /// JSON array of WAN observations (replaces the previous snapshot)
        #[arg(long)]
        telemetry: Option<PathBuf>,

        /// Output JSON to stdout instead of a human summary
        #[arg(long)]
        json: bool,
    },

    /// Reconcile every known site
    #[command(after_help = "\
Examples:
  cmap run
  cmap run --json > report.json
  cmap run --offline

Exit codes:
  0  all sites reconciled
  5  one or more sites failed
  6  an eligible site ended without any assignment")]
    Run {
        /// Output the batch report as JSON
        #[arg(long)]
        json: bool,

        /// Never call the registry; use static ranges and cached results only
        #[arg(long)]
        offline: bool,
    },

    /// Reconcile a single site now
    #[command(after_help = "\
Examples:
  cmap refresh 'ALB 03'
  cmap refresh 'ALB 03' --json")]
    Refresh {
        site: String,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        offline: bool,
    },

    /// Look up the registered owner of an IPv4 address
    #[command(after_help = "\
Examples:
  cmap resolve 96.81.183.205
  cmap resolve 166.80.4.20 --offline")]
    Resolve {
        ip: String,

        #[arg(long)]
        offline: bool,
    },

    /// List values the override guard refused to overwrite
    Audit {
        /// Only this site
        #[arg(long)]
        site: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Parse and validate a configuration file without running
    Validate {
        #[arg(value_name = "CONFIG")]
        file: PathBuf,
    },

    /// Mark an assignment as human-confirmed, optionally correcting it
    #[command(after_help = "\
Examples:
  cmap confirm 'NMA 02' wan2
  cmap confirm 'NMA 02' wan2 --provider 'Verizon Wireless' --speed Cell")]
    Confirm {
        site: String,

        /// wan1 or wan2
        #[arg(value_parser = parse_interface)]
        interface: InterfaceId,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        speed: Option<String>,
    },
}

fn parse_interface(s: &str) -> Result<InterfaceId, String> {
    InterfaceId::parse(s).ok_or_else(|| format!("expected wan1 or wan2, got '{s}'"))
}

fn long_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(
            env!("CARGO_PKG_VERSION"),
            "\nengine:  circuitmap-recon ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   debug",
        )
    } else {
        concat!(
            env!("CARGO_PKG_VERSION"),
            "\nengine:  circuitmap-recon ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   release",
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(EXIT_CONFIG, msg)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Exit-code-only error; the command already reported the details.
    pub fn silent(code: u8) -> Self {
        Self::new(code, "")
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        let hint = match &e {
            StoreError::Schema(_) => Some("the store was written by a newer or incompatible cmap".to_string()),
            _ => None,
        };
        Self { code: EXIT_STORE, message: e.to_string(), hint }
    }
}

impl From<ReconError> for CliError {
    fn from(e: ReconError) -> Self {
        match e {
            ReconError::Store(e) => e.into(),
            ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => Self::config(e.to_string()),
            ReconError::InvalidRecord { .. } => Self::usage(e.to_string()),
        }
    }
}

impl From<RegistryError> for CliError {
    fn from(e: RegistryError) -> Self {
        Self::new(EXIT_ERROR, e.to_string())
    }
}

// ============================================================================
// Shared setup
// ============================================================================

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // Keep an already-installed subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn load_config(path: Option<&Path>) -> Result<ReconConfig, CliError> {
    let Some(path) = path else {
        return Ok(ReconConfig::default_config());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::usage(format!("cannot read config {}: {e}", path.display())))?;
    ReconConfig::from_toml(&text).map_err(|e| CliError::config(format!("{}: {e}", path.display())))
}

pub fn open_store(path: &Path) -> Result<SqliteStore, CliError> {
    SqliteStore::open(path).map_err(|e| {
        CliError::from(e).with_hint(format!("store path {} (set with --db or CMAP_DB)", path.display()))
    })
}

pub fn build_resolver<'a>(
    config: &ReconConfig,
    store: &'a SqliteStore,
    offline: bool,
) -> Result<RdapResolver<'a>, CliError> {
    let resolver = if offline {
        RdapResolver::offline(&config.registry, store)?
    } else {
        RdapResolver::new(&config.registry, store)?
    };
    Ok(resolver)
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::new(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
    println!("{text}");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Ingest { circuits, telemetry, json } => {
            ingest::cmd_ingest(&cli.db, circuits.as_deref(), telemetry.as_deref(), json)
        }
        Commands::Run { json, offline } => reconcile::cmd_run(config_path, &cli.db, json, offline),
        Commands::Refresh { site, json, offline } => {
            reconcile::cmd_refresh(config_path, &cli.db, &site, json, offline)
        }
        Commands::Resolve { ip, offline } => lookup::cmd_resolve(config_path, &cli.db, &ip, offline),
        Commands::Audit { site, json } => audit::cmd_audit(&cli.db, site.as_deref(), json),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Confirm { site, interface, provider, speed } => {
            audit::cmd_confirm(&cli.db, &site, interface, provider.as_deref(), speed.as_deref())
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn cmd_validate(path: &Path) -> Result<(), CliError> {
    let config = load_config(Some(path))?;
    eprintln!(
        "ok: {} aliases, {} remaps, {} static ranges",
        config.aliases.len(),
        config.registry.remaps.len(),
        config.registry.static_ranges.len(),
    );
    Ok(())
}
