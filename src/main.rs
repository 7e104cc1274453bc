//! Storage Pool Manager
//!
//! Adopts block devices on a single host and assembles them into software
//! RAID pools through mdadm, exposed over a REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        REST API (axum)                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │                         Orchestrator                         │
//! │  ┌──────────────────┐  ┌─────────────────┐  ┌─────────────┐  │
//! │  │ Adoption Ledger  │  │  Pool Registry  │  │ State Store │  │
//! │  └────────┬─────────┘  └────────┬────────┘  │   (sled)    │  │
//! │           │                     │           └─────────────┘  │
//! ├───────────┴─────────────────────┴────────────────────────────┤
//! │  Sysfs Scanner           │  Host Tools (mdadm, mkfs, mount)  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_pool_manager::{
    ApiServer, ApiServerConfig, Error, Orchestrator, OrchestratorConfig, Result, ScannerConfig,
    SledStore, SysfsScanner, SystemCommandRunner, ToolsConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Pool Manager - drive adoption and software RAID pools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// State database path
    #[arg(long, env = "DB_PATH", default_value = "storage.db")]
    db_path: PathBuf,

    /// Directory pools are mounted under
    #[arg(long, env = "MOUNT_BASE", default_value = "/mnt/pools")]
    mount_base: PathBuf,

    /// Smallest drive listed in the system view, in bytes
    #[arg(long, env = "MIN_DRIVE_SIZE", default_value = "1073741824")]
    min_drive_size: u64,

    /// sysfs root
    #[arg(long, env = "SYSFS_PATH", default_value = "/sys")]
    sysfs_path: PathBuf,

    /// Device tree root
    #[arg(long, env = "DEV_PATH", default_value = "/dev")]
    dev_path: PathBuf,

    /// Mount table to read
    #[arg(long, env = "MOUNTS_PATH", default_value = "/proc/self/mounts")]
    mounts_path: PathBuf,

    /// List loop devices
    #[arg(long, env = "INCLUDE_LOOP")]
    include_loop: bool,

    /// Run host tools through `sudo -n`
    #[arg(long, env = "USE_SUDO")]
    use_sudo: bool,

    /// Timeout for quick host commands in seconds
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value = "60")]
    command_timeout_secs: u64,

    /// Timeout for array creation, formatting and installs in seconds
    #[arg(long, env = "LONG_COMMAND_TIMEOUT_SECS", default_value = "1800")]
    long_command_timeout_secs: u64,

    /// Allowed CORS origins, comma separated; any origin when unset
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Storage Pool Manager");
    info!("  Version: {}", storage_pool_manager::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Database: {}", args.db_path.display());
    info!("  Mount base: {}", args.mount_base.display());
    info!("  Sudo: {}", args.use_sudo);

    let scanner = SysfsScanner::new(ScannerConfig {
        include_loopback: args.include_loop,
        sysfs_path: args.sysfs_path.clone(),
        dev_path: args.dev_path.clone(),
        mounts_path: args.mounts_path.clone(),
        ..Default::default()
    });
    let store = SledStore::open(&args.db_path)?;
    let runner = SystemCommandRunner::new(args.use_sudo);

    let config = OrchestratorConfig {
        tools: ToolsConfig {
            mount_base: args.mount_base.clone(),
            command_timeout: Duration::from_secs(args.command_timeout_secs),
            long_command_timeout: Duration::from_secs(args.long_command_timeout_secs),
        },
        min_drive_size: args.min_drive_size,
    };

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(scanner),
        Arc::new(store),
        Arc::new(runner),
    );
    orchestrator.reconcile().await?;
    info!("Orchestrator initialized");

    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid REST API address: {}", e))
        })?,
        cors_origins: args.cors_origins.clone(),
    };
    let api_server = Arc::new(ApiServer::new(api_config, orchestrator));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_server.shutdown();
        }
    });

    api_server.run().await?;

    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "sled=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
