// # namepal-agent - Host Agent
//
// Thin integration layer: label matching and event handling live in
// namepal-core, the registration client in namepal-http. This binary only:
//
// 1. Loads configuration
// 2. Initializes logging and the runtime
// 3. Registers workload sources and builds the configured one
// 4. Forwards every published hostname set to the manager
//
// ## Configuration
//
// YAML file named by `NAMEPAL_CONFIG` (default `agent.yml`):
//
// ```yaml
// endpoint: http://manager.lan:8000
// source:
//   type: docker
//   host: unix:///var/run/docker.sock
// watcher:
//   emit_unchanged: true
// ```
//
// Environment overrides:
// - `NAMEPAL_LOG_LEVEL`: trace, debug, info, warn, error
// - `NAMEPAL_ENDPOINT`: manager base URL
//
// A broken event subscription ends the process with exit code 2; the
// supervisor restarts it and the cold start re-registers everything.

use anyhow::Result;
use namepal_core::{AgentConfig, ComponentRegistry, Watcher, handoff_channel};
use namepal_http::RegistrationClient;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy)]
enum AgentExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error, including a lost event subscription
    RuntimeError = 2,
}

impl From<AgentExitCode> for ExitCode {
    fn from(code: AgentExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config = match AgentConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return AgentExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.log_level))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return AgentExitCode::ConfigError.into();
    }

    info!(source = config.source.type_name(), endpoint = %config.endpoint, "Starting namepal-agent");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return AgentExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_agent(config).await {
            Ok(()) => AgentExitCode::CleanShutdown,
            Err(e) => {
                error!("Agent error: {:#}", e);
                exit_code_for(&e)
            }
        }
    });

    result.into()
}

/// Run the agent until a shutdown signal arrives or the watcher fails
async fn run_agent(config: AgentConfig) -> Result<()> {
    let registry = ComponentRegistry::new();

    #[cfg(feature = "docker")]
    namepal_source_docker::register(&registry);

    let source = registry.create_source(&config.source)?;
    let client = RegistrationClient::new(&config.endpoint, Duration::from_secs(config.timeout_secs))?;
    let watcher = Watcher::new(source, &config.watcher);

    let (tx, mut rx) = handoff_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let watcher_handle = tokio::spawn(async move { watcher.run_with_shutdown(tx, shutdown_rx).await });

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                info!("Received shutdown signal: {}", signal?);
                let _ = shutdown_tx.send(());
                watcher_handle.await??;
                info!("Shutting down agent");
                return Ok(());
            }

            params = rx.recv() => match params {
                Some(params) => {
                    info!(provider = %params.provider_name, domains = ?params.domains, "Publishing hostnames");
                    if let Err(e) = client.register(&params.domains).await {
                        // The next pass carries the complete set again.
                        warn!(error = %e, "Registration failed");
                    }
                }
                None => {
                    watcher_handle.await??;
                    anyhow::bail!("Watcher stopped unexpectedly");
                }
            }
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> AgentExitCode {
    match error.downcast_ref::<namepal_core::Error>() {
        Some(namepal_core::Error::Config(_)) => AgentExitCode::ConfigError,
        _ => AgentExitCode::RuntimeError,
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

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
