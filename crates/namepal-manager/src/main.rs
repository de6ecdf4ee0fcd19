// # namepal-manager - Reconciling Daemon
//
// Thin integration layer: all reconciliation logic lives in namepal-core,
// the HTTP plumbing in namepal-http. This binary only:
//
// 1. Loads configuration
// 2. Initializes logging and the runtime
// 3. Registers DNS backends and builds the configured one
// 4. Serves registrations until SIGTERM/SIGINT
//
// ## Configuration
//
// YAML file named by `NAMEPAL_CONFIG` (default `manager.yml`):
//
// ```yaml
// listen_addr: 0.0.0.0:8000
// log_level: info
// backend:
//   type: pihole
//   url: http://pi.hole/admin/api.php
//   token: your_token
// ```
//
// Environment overrides:
// - `NAMEPAL_LOG_LEVEL`: trace, debug, info, warn, error
// - `NAMEPAL_BACKEND_TOKEN`: pi-hole API token
// - `NAMEPAL_MODE`: `dry-run` plans reconciliations without applying them

use anyhow::Result;
use namepal_core::{ComponentRegistry, DnsBackend, ManagerConfig, Reconciler};
use namepal_http::RegistrationServer;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ManagerExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<ManagerExitCode> for ExitCode {
    fn from(code: ManagerExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config = match ManagerConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ManagerExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.log_level))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ManagerExitCode::ConfigError.into();
    }

    let dry_run = env::var("NAMEPAL_MODE")
        .unwrap_or_default()
        .eq_ignore_ascii_case("dry-run");

    info!(backend = config.backend.type_name(), listen = %config.listen_addr, "Starting namepal-manager");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ManagerExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_manager(config, dry_run).await {
            Ok(()) => ManagerExitCode::CleanShutdown,
            Err(e) => {
                error!("Manager error: {:#}", e);
                exit_code_for(&e)
            }
        }
    });

    result.into()
}

/// Run the manager until a shutdown signal arrives
async fn run_manager(config: ManagerConfig, dry_run: bool) -> Result<()> {
    let registry = ComponentRegistry::new();

    #[cfg(feature = "pihole")]
    namepal_backend_pihole::register(&registry);

    #[cfg(feature = "adguard")]
    namepal_backend_adguard::register(&registry);

    let backend: Arc<dyn DnsBackend> = Arc::from(registry.create_backend(&config.backend)?);

    let reconciler = if dry_run {
        warn!("Running in DRY-RUN mode - no records will be changed");
        Reconciler::new_dry_run(backend)
    } else {
        Reconciler::new(backend)
    };

    let server = RegistrationServer::new(Arc::new(reconciler));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut server_handle = tokio::spawn(server.run(config.listen_addr, shutdown_rx));

    tokio::select! {
        signal = wait_for_shutdown() => {
            info!("Received shutdown signal: {}", signal?);
            let _ = shutdown_tx.send(());
            server_handle.await??;
            info!("Shutting down manager");
            Ok(())
        }
        result = &mut server_handle => {
            result??;
            anyhow::bail!("Registration server stopped unexpectedly")
        }
    }
}

/// Startup problems exit with 1 so a supervisor does not restart-loop
fn exit_code_for(error: &anyhow::Error) -> ManagerExitCode {
    match error.downcast_ref::<namepal_core::Error>() {
        Some(namepal_core::Error::Config(_)) => ManagerExitCode::ConfigError,
        _ => ManagerExitCode::RuntimeError,
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Wait for SIGTERM or SIGINT and return the signal's name
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
