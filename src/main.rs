use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use biogate::auth::{CancelReason, ConfirmationPolicy, LockoutStatus, ModuleId, RequestId, Verdict};
use biogate::runtime::{open_lockout_tracker, UnlockEvent, UnlockListener};
use biogate::validation::validate_timeout_ms;
use biogate::{AppConfig, AppPaths, AuthRuntime};

#[derive(Parser, Debug)]
#[command(name = "biogate", version, about = "Multi-sensor biometric authentication")]
struct Cli {
    /// Config file (defaults to the OS config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep config and state under this directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one authentication request against the configured sensors
    Authenticate {
        /// Confirmation policy: any or all
        #[arg(long)]
        policy: Option<ConfirmationPolicy>,

        /// Overall deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Sensor to include (repeatable; defaults to every configured sensor)
        #[arg(long = "sensor")]
        sensors: Vec<ModuleId>,
    },
    /// Inspect or reset lockouts
    Lockout {
        #[command(subcommand)]
        action: LockoutCommand,
    },
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum LockoutCommand {
    /// Show the lockout state of every configured sensor
    Status,
    /// Clear every lockout, as a device unlock would
    Reset,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let paths = match &cli.root {
        Some(root) => AppPaths::from_root(root),
        None => AppPaths::new()?,
    };
    paths.ensure_directories()?;

    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let config = AppConfig::load_or_create(&config_path)?;

    match cli.command {
        Command::Authenticate {
            policy,
            timeout_ms,
            sensors,
        } => authenticate(&paths, &config, policy, timeout_ms, sensors).await,
        Command::Lockout { action } => {
            match action {
                LockoutCommand::Status => lockout_status(&paths, &config),
                LockoutCommand::Reset => lockout_reset(&paths, &config)?,
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { action } => {
            match action {
                ConfigCommand::Show => {
                    let toml_str =
                        toml::to_string_pretty(&config).context("Failed to serialize config")?;
                    println!("{}", toml_str);
                }
                ConfigCommand::Path => println!("{}", config_path.display()),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn authenticate(
    paths: &AppPaths,
    config: &AppConfig,
    policy: Option<ConfirmationPolicy>,
    timeout_ms: Option<u64>,
    sensors: Vec<ModuleId>,
) -> Result<ExitCode> {
    let policy = policy.unwrap_or(config.orchestrator.policy);
    let timeout_ms = validate_timeout_ms(timeout_ms.unwrap_or(config.orchestrator.timeout_ms))?;
    let modules = if sensors.is_empty() {
        config.sensors.iter().map(|s| s.id.clone()).collect()
    } else {
        sensors
    };
    if modules.is_empty() {
        bail!("No sensors configured");
    }

    let runtime = AuthRuntime::start(paths, config)?;
    let started = Instant::now();

    let mut pending = runtime.orchestrator().start_async(
        &modules,
        policy,
        Duration::from_millis(timeout_ms),
    )?;
    let request = pending.request();

    let finished = tokio::select! {
        verdict = &mut pending => Some(verdict),
        _ = tokio::signal::ctrl_c() => None,
    };
    let verdict = match finished {
        Some(verdict) => verdict,
        None => {
            log::warn!("Interrupted; canceling request {}", request);
            runtime.orchestrator().cancel(CancelReason::User);
            pending.await
        }
    };

    let elapsed_ms = started.elapsed().as_millis();
    println!("{}", serde_json::to_string_pretty(&report(request, &verdict, elapsed_ms))?);

    runtime.stop();

    Ok(match verdict {
        Verdict::Succeeded(_) => ExitCode::SUCCESS,
        Verdict::Failed(_) => ExitCode::from(1),
        Verdict::Canceled(_) => ExitCode::from(2),
    })
}

/// JSON summary of a verdict; tokens are never printed
fn report(request: RequestId, verdict: &Verdict, elapsed_ms: u128) -> serde_json::Value {
    match verdict {
        Verdict::Succeeded(successes) => json!({
            "request": request.to_string(),
            "outcome": "succeeded",
            "modules": successes.iter().map(|s| s.module.to_string()).collect::<Vec<_>>(),
            "elapsed_ms": elapsed_ms,
        }),
        Verdict::Failed(failures) => json!({
            "request": request.to_string(),
            "outcome": "failed",
            "failures": failures,
            "elapsed_ms": elapsed_ms,
        }),
        Verdict::Canceled(reason) => json!({
            "request": request.to_string(),
            "outcome": "canceled",
            "reason": reason,
            "elapsed_ms": elapsed_ms,
        }),
    }
}

fn lockout_status(paths: &AppPaths, config: &AppConfig) {
    let tracker = open_lockout_tracker(paths, config);
    println!("unlock epoch: {}", tracker.epoch());

    for sensor in &config.sensors {
        let status = match tracker.status(&sensor.id) {
            LockoutStatus::Unlocked => "unlocked".to_string(),
            LockoutStatus::Temporary { remaining_ms } => {
                format!("locked ({}s remaining)", remaining_ms.div_ceil(1_000))
            }
            LockoutStatus::Permanent => "locked until device unlock".to_string(),
        };
        println!("{:<16} {}", sensor.id.to_string(), status);
    }
}

fn lockout_reset(paths: &AppPaths, config: &AppConfig) -> Result<()> {
    let tracker = open_lockout_tracker(paths, config);
    let (tx, rx) = crossbeam_channel::bounded(1);
    let listener = UnlockListener::start(tracker.clone(), rx)?;

    tx.send(UnlockEvent::DeviceUnlocked)
        .context("Unlock listener is not running")?;
    listener.stop();

    println!("✓ Lockouts cleared (unlock epoch {})", tracker.epoch());
    Ok(())
}
