//! peer-bridge: TCP bridging daemon
//!
//! Runs a bridge context against the in-memory discovery subsystem and
//! the TCP stand-in transport, so applications can be exercised without a
//! native radio stack.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! ./peer-bridge
//!
//! # Run with custom configuration
//! ./peer-bridge -c /path/to/config.json
//!
//! # Run with environment overrides
//! PEER_BRIDGE_SERVER_PORT=8080 PEER_BRIDGE_LOG_LEVEL=debug ./peer-bridge
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use peer_bridge::config::{load_config_with_env, Config};
use peer_bridge::connection::BridgeContext;
use peer_bridge::sequencer::MockDiscovery;
use peer_bridge::transport::{run_accept_loop, TcpTransportListener};

/// Interval of the periodic statistics log line
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/peer-bridge/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("peer-bridge v{}", peer_bridge::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"peer-bridge v{}

Bridges peer-to-peer transport sockets to loopback TCP.

USAGE:
    peer-bridge [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/peer-bridge/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    PEER_BRIDGE_SERVER_PORT           Override the application port incoming sessions dial
    PEER_BRIDGE_MAX_CONNECTIONS       Override maximum connections
    PEER_BRIDGE_OPERATION_TIMEOUT_MS  Override the start/stop watchdog
    PEER_BRIDGE_LOG_LEVEL             Override log level (trace, debug, info, warn, error)
    PEER_BRIDGE_TRANSPORT_LISTEN      Override the TCP stand-in transport address

EXAMPLE:
    # Bridge incoming transport connections to a local server on port 8080
    PEER_BRIDGE_SERVER_PORT=8080 peer-bridge -c ./config.json

    # Simulate a remote peer
    nc 127.0.0.1 48620
"#,
        peer_bridge::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "tokio=warn".parse() {
        filter = filter.add_directive(directive);
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target)
        .with_span_events(FmtSpan::CLOSE);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Log statistics until shutdown
async fn report_stats(ctx: Arc<BridgeContext>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = ctx.stats();
                info!(
                    "Sessions: {} active, {} total, {} rejected; {} bytes to local, {} bytes to transport",
                    stats.active,
                    stats.total_accepted,
                    stats.rejected,
                    stats.bytes_to_local,
                    stats.bytes_to_transport
                );
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    // Parse arguments
    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        peer_bridge::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    // Load configuration
    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    // Handle check-config
    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    // Initialize logging
    init_logging(&config);

    info!("peer-bridge v{}", peer_bridge::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    if config.bridge.server_port == 0 {
        warn!("No server port configured; incoming sessions will be refused");
    }

    let discovery = Arc::new(MockDiscovery::immediate());
    let ctx = Arc::new(BridgeContext::new(&config, discovery, None));

    ctx.start(config.bridge.server_port, true, |outcome| match outcome {
        Ok(()) => info!("Discovery and advertising started"),
        Err(e) => error!("Failed to start discovery: {}", e),
    })?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let stats_handle = tokio::spawn(report_stats(Arc::clone(&ctx), shutdown_tx.subscribe()));

    let accept_handle = if config.transport.enabled {
        let listener = TcpTransportListener::bind(config.transport.listen)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind TCP transport: {}", e))?;
        Some(tokio::spawn(run_accept_loop(
            listener,
            Arc::clone(&ctx),
            shutdown_tx.subscribe(),
        )))
    } else {
        info!("TCP stand-in transport disabled");
        None
    };

    info!(
        "peer-bridge ready (server port {}, max connections {})",
        ctx.server_port(),
        config.registry.max_connections
    );
    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    // Wait for a signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Graceful shutdown
    info!("Shutting down...");
    let _ = shutdown_tx.send(());

    ctx.stop(false, |outcome| match outcome {
        Ok(()) => info!("Discovery stopped"),
        Err(e) => warn!("Stop did not complete: {}", e),
    });
    ctx.dispose();

    let mut accept_result = Ok(());
    if let Some(handle) = accept_handle {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(Ok(result)) => accept_result = result,
            Ok(Err(e)) => warn!("Accept loop task failed: {}", e),
            Err(_) => warn!("Accept loop did not stop in time"),
        }
    }
    let _ = stats_handle.await;

    let stats = ctx.stats();
    info!(
        "Final stats: {} total sessions, {} completed, {} errored, {} rejected",
        stats.total_accepted, stats.completed, stats.errored, stats.rejected
    );
    info!(
        "Transferred: {} bytes to local, {} bytes to transport",
        stats.bytes_to_local, stats.bytes_to_transport
    );

    info!("Shutdown complete");

    accept_result.map_err(|e| anyhow::anyhow!("Accept loop error: {}", e))
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
