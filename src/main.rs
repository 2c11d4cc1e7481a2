//! iotcore-device command line entry point

use clap::{Parser, Subcommand};
use iotcore_device::auth::{SigningKey, TokenSigner};
use iotcore_device::config::{ConfigError, DeviceConfig};
use iotcore_device::error::{DeviceError, DeviceResult, Recovery};
use iotcore_device::observability::{init_default_logging, init_logging, LogFormat};
use iotcore_device::session::Session;
use iotcore_device::time::{
    Clock, ReqwestFetch, SyncedClock, TimeError, TimeServiceCredentials, TimeSource,
};
use iotcore_device::transport::mqtt::{BrokerEndpoint, RumqttTransport};
use iotcore_device::transport::Transport;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn, Level};

/// Default locations searched when no config file is given
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["device.toml", "config/device.toml"];

/// Attempts made to reach the time service before giving up
const TIME_SYNC_ATTEMPTS: u32 = 3;

/// Delays between connection attempts; the last one repeats
const RECONNECT_BACKOFF_SECS: [u64; 4] = [1, 2, 5, 10];

/// Cloud IoT Core device client
#[derive(Parser)]
#[command(name = "iotcore-device")]
#[command(about = "Authenticate to the Cloud IoT Core MQTT bridge with short-lived tokens")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "IOTCORE_DEVICE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a device token and print it to stdout
    Token {
        /// Synchronize the clock from the time service first
        #[arg(long)]
        sync: bool,
        /// Print the decoded claims instead of the token
        #[arg(long)]
        claims: bool,
    },
    /// Connect and keep the device session alive
    Run {
        /// Seconds between state reports
        #[arg(long, default_value_t = 60)]
        state_interval_secs: u64,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging_result = match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Pretty, false),
        _ => init_logging(Level::TRACE, LogFormat::Pretty, true),
    };
    if let Err(e) = logging_result {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting iotcore-device v{}", env!("CARGO_PKG_VERSION"));

    let result = match load_configuration(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Token { sync, claims } => print_token(config, sync, claims).await,
            Commands::Run {
                state_interval_secs,
            } => run_device(config, Duration::from_secs(state_interval_secs.max(1))).await,
            Commands::Config { show } => handle_config_command(&config, show),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!(error = %e, recovery = ?e.recovery(), "Command failed");
        process::exit(e.exit_code());
    }
}

fn load_configuration(config_path: Option<&Path>) -> DeviceResult<DeviceConfig> {
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loading configuration");
        return Ok(DeviceConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!(path = %path.display(), "Loading configuration");
            return Ok(DeviceConfig::load_from_file(path)?);
        }
    }

    Err(ConfigError::InvalidConfig(
        "No configuration file found; pass one with -c/--config or create device.toml".to_string(),
    )
    .into())
}

fn handle_config_command(config: &DeviceConfig, show: bool) -> DeviceResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        println!("{rendered}");
    }

    info!(identity = %config.identity()?, "Configuration is valid");
    Ok(())
}

fn build_signer(config: &DeviceConfig) -> DeviceResult<TokenSigner> {
    let key = SigningKey::from_pem(&config.load_private_key_bytes()?)?;
    Ok(TokenSigner::new(key, config.token.ttl_secs))
}

fn build_time_source(
    config: &DeviceConfig,
    clock: Arc<dyn Clock>,
) -> DeviceResult<TimeSource<ReqwestFetch>> {
    let fetch = ReqwestFetch::new(Duration::from_secs(config.time_service.timeout_secs))
        .map_err(TimeError::from)?;
    Ok(TimeSource::new(fetch, clock).with_base_url(config.time_service.base_url.clone()))
}

fn time_service_credentials(config: &DeviceConfig) -> Option<TimeServiceCredentials> {
    match (
        config.get_time_service_username(),
        config.get_time_service_key(),
    ) {
        (Some(username), Some(key)) => Some(TimeServiceCredentials::new(username, key)),
        _ => None,
    }
}

/// Synchronize the clock, retrying transient failures
///
/// Without time service credentials the host clock is trusted as is.
async fn sync_clock(time_source: &TimeSource<ReqwestFetch>, config: &DeviceConfig) -> DeviceResult<()> {
    let Some(credentials) = time_service_credentials(config) else {
        warn!(
            username_env = %config.time_service.username_env,
            key_env = %config.time_service.key_env,
            "Time service credentials not set, trusting the host clock"
        );
        return Ok(());
    };

    let timezone = config.time_service.timezone.as_deref();
    let mut attempt = 1;
    loop {
        match time_source.sync_clock(&credentials, timezone).await {
            Ok(now) => {
                info!(now, "Clock synchronized from time service");
                return Ok(());
            }
            Err(e) if attempt < TIME_SYNC_ATTEMPTS => {
                warn!(error = %e, attempt, "Clock synchronization failed, retrying");
                sleep(Duration::from_secs(u64::from(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn print_token(config: DeviceConfig, sync: bool, claims: bool) -> DeviceResult<()> {
    let identity = config.identity()?;
    let signer = build_signer(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SyncedClock::new());

    if sync {
        let time_source = build_time_source(&config, clock.clone())?;
        sync_clock(&time_source, &config).await?;
    }

    let token = signer.issue(&identity, clock.now())?;
    if claims {
        let rendered = serde_json::to_string_pretty(token.claims())
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        println!("{rendered}");
    } else {
        println!("{token}");
    }
    Ok(())
}

async fn run_device(config: DeviceConfig, state_interval: Duration) -> DeviceResult<()> {
    let identity = config.identity()?;
    let clock: Arc<dyn Clock> = Arc::new(SyncedClock::new());
    let time_source = build_time_source(&config, clock.clone())?;
    sync_clock(&time_source, &config).await?;

    let transport = RumqttTransport::new(BrokerEndpoint::from_config(&config.mqtt));
    let mut session = Session::new(identity, build_signer(&config)?, transport, clock.clone())
        .with_keep_alive(config.mqtt.keep_alive_secs)
        .with_topic_scheme(config.mqtt.topic_scheme);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let started = Instant::now();
    let refresh_margin = config.token.refresh_margin_secs;
    let mut force_reissue = false;
    let mut failures = 0usize;
    let mut last_state_report: Option<Instant> = None;

    info!(client_id = %session.client_id(), "Device is running");

    while !*shutdown_rx.borrow() {
        let now = clock.now();
        if force_reissue || session.token_expires_within(now, refresh_margin) {
            if session.is_connected() {
                info!("Token close to expiry, reconnecting with a fresh one");
                if let Err(e) = session.disconnect().await {
                    warn!(error = %e, "Disconnect before token refresh failed");
                }
            }
            session.reissue_token(now)?;
            force_reissue = false;
        }

        if !session.is_connected() {
            register_observers(&mut session);
            let connected = tokio::select! {
                result = session.connect_and_subscribe() => result,
                _ = shutdown_requested(&mut shutdown_rx) => break,
            };

            if let Err(e) = connected {
                let e = DeviceError::from(e);
                match e.recovery() {
                    Recovery::Fatal => return Err(e),
                    Recovery::Reauthenticate => force_reissue = true,
                    Recovery::Retry => {}
                }
                let delay = RECONNECT_BACKOFF_SECS[failures.min(RECONNECT_BACKOFF_SECS.len() - 1)];
                failures += 1;
                warn!(error = %e, retry_in_secs = delay, "Connection attempt failed");
                if !sleep_unless_shutdown(Duration::from_secs(delay), &mut shutdown_rx).await {
                    break;
                }
                continue;
            }
            failures = 0;
        }

        if last_state_report.map_or(true, |at| at.elapsed() >= state_interval) {
            let report = serde_json::json!({
                "uptime_secs": started.elapsed().as_secs(),
                "token_expires_at": session.current_token().map(|t| t.expires_at()),
            });
            if let Err(e) = session.publish_state(report.to_string()).await {
                warn!(error = %e, "State report failed");
            }
            last_state_report = Some(Instant::now());
        }

        if let Err(e) = session.pump().await {
            warn!(error = %e, "Session pump failed");
        }
    }

    info!("Shutdown requested, disconnecting");
    if let Err(e) = session.disconnect().await {
        warn!(error = %e, "Disconnect during shutdown failed");
    }
    Ok(())
}

fn register_observers<T: Transport>(session: &mut Session<T>) {
    session.on_connect(|_, code| {
        info!(code, "Broker accepted the connection");
        Ok(())
    });
    session.on_disconnect(|_| {
        warn!("Broker connection dropped");
        Ok(())
    });
    session.on_message(|_, topic, payload| {
        info!(topic, bytes = payload.len(), "Message received");
        Ok(())
    });
    session.on_subscribe(|_, packet_id, codes| {
        if codes.iter().any(|code| *code >= 0x80) {
            warn!(packet_id, ?codes, "Subscription refused");
        }
        Ok(())
    });
}

/// Resolves once shutdown is signalled or the signal task is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleep for `delay`; false when shutdown cut the sleep short
async fn sleep_unless_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(delay) => true,
        _ = shutdown_requested(shutdown) => false,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl-C will stop the device");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}
