use chrono::{DateTime, Local, Utc};
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cadence::config::{GlobalConfig, load_config};
use cadence::domain::SessionFlag;
use cadence::engine::{Engine, EngineDeps, EngineSnapshot};
use cadence::execution::Stats;
use cadence::host::{DEFAULT_PLATFORM_BUDGET, SimulatedServices, TimerScheduler};
use cadence::power::FixedPowerMonitor;
use cadence::scheduler::{OptimalWindow, WindowPlanner};
use cadence::storage::{JsonFileStore, QUIET_ANCHOR_KEY, STATS_KEY, load_typed, save_typed};
use cadence::tasks::builtin_tasks;

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("cadence.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

struct RunOptions {
    duration: Duration,
    battery: f32,
    charging: bool,
    session_active: bool,
    latency: Duration,
    fail_every: Option<u32>,
    delay: Option<u64>,
}

async fn run_application(cli: &Cli, config: &GlobalConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => {
            handle_window_command(config)?;
            handle_stats_command(false, config)
        }
        Some(Commands::Run {
            duration,
            battery,
            charging,
            session_active,
            latency_ms,
            fail_every,
            delay,
        }) => {
            let options = RunOptions {
                duration: Duration::from_secs(*duration),
                battery: *battery,
                charging: *charging,
                session_active: *session_active,
                latency: Duration::from_millis(*latency_ms),
                fail_every: *fail_every,
                delay: *delay,
            };
            handle_run_command(options, config, cli.is_verbose()).await
        }
        Some(Commands::Stats { json }) => handle_stats_command(*json, config),
        Some(Commands::Window) => handle_window_command(config),
        Some(Commands::Anchor { timestamp }) => handle_anchor_command(timestamp, config),
    }
}

fn open_store(config: &GlobalConfig) -> Result<JsonFileStore> {
    JsonFileStore::new(&config.storage.state_dir)
        .context(format!("Failed to open state dir {}", config.storage.state_dir.display()))
}

async fn handle_run_command(options: RunOptions, config: &GlobalConfig, verbose: bool) -> Result<()> {
    info!("Running engine for {:?}", options.duration);

    let store = Arc::new(open_store(config)?);
    let (os, fires) = TimerScheduler::new(DEFAULT_PLATFORM_BUDGET);
    let power = Arc::new(FixedPowerMonitor::new(options.battery, options.charging));
    let session = Arc::new(SessionFlag::new(options.session_active));

    let mut services = SimulatedServices::new(options.latency).with_anomalies(1);
    if let Some(n) = options.fail_every {
        services = services.with_failure_every(n);
    }
    let services = Arc::new(services);

    let deps = EngineDeps {
        os: Arc::new(os),
        power,
        session,
        store,
    };
    let tasks = builtin_tasks(services.clone());
    let mut config = config.clone();
    if let Some(secs) = options.delay {
        for (descriptor, _) in &tasks {
            config.tasks.delay_overrides.insert(descriptor.id.to_string(), secs);
        }
        config.validate().context("Invalid --delay")?;
    }

    let (mut engine, handle) = Engine::new(&config, deps).context("Failed to build engine")?;
    for (descriptor, body) in tasks {
        engine.register(descriptor, body);
    }

    println!(
        "{} battery {:.0}%{}, running for {}s",
        "Engine:".green(),
        options.battery * 100.0,
        if options.charging { " (charging)" } else { "" },
        options.duration.as_secs()
    );

    let engine_task = engine.spawn();
    let forwarder = handle.forward_fires(fires);

    tokio::select! {
        _ = tokio::time::sleep(options.duration) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("{}", "Interrupted".yellow());
        }
    }

    let snapshot = handle.snapshot().await.context("Engine stopped unexpectedly")?;
    handle.shutdown().await.context("Failed to stop engine")?;
    engine_task.await.context("Engine task failed")?;
    forwarder.abort();

    print_snapshot(&snapshot, verbose);
    println!("{} {} collaborator calls", "Services:".cyan(), services.calls());
    Ok(())
}

fn handle_stats_command(json: bool, config: &GlobalConfig) -> Result<()> {
    let store = open_store(config)?;
    let stats: Stats = load_typed(&store, STATS_KEY)
        .context("Failed to read persisted stats")?
        .unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats);
    }
    Ok(())
}

fn handle_window_command(config: &GlobalConfig) -> Result<()> {
    let store = open_store(config)?;
    let anchor: Option<DateTime<Utc>> = load_typed(&store, QUIET_ANCHOR_KEY).context("Failed to read quiet anchor")?;
    let planner = WindowPlanner::new(&config.window)?.with_anchor(anchor);
    let now = Local::now();
    print_window(&planner.current_window(now), now);
    Ok(())
}

fn handle_anchor_command(timestamp: &str, config: &GlobalConfig) -> Result<()> {
    let anchor = DateTime::parse_from_rfc3339(timestamp)
        .context(format!("Invalid RFC 3339 timestamp: {}", timestamp))?
        .with_timezone(&Utc);

    let store = open_store(config)?;
    save_typed(&store, QUIET_ANCHOR_KEY, &anchor).context("Failed to save quiet anchor")?;
    info!("Quiet anchor set to {}", anchor);
    println!("{} {}", "Quiet anchor:".green(), anchor.with_timezone(&Local).format("%Y-%m-%d %H:%M"));

    let planner = WindowPlanner::new(&config.window)?.with_anchor(Some(anchor));
    let now = Local::now();
    print_window(&planner.current_window(now), now);
    Ok(())
}

fn print_window(window: &OptimalWindow, now: DateTime<Local>) {
    let marker = if window.contains(now) {
        "open".green()
    } else {
        "closed".yellow()
    };
    println!(
        "{} {} - {} ({:?}, {})",
        "Window:".cyan(),
        window.start.format("%Y-%m-%d %H:%M"),
        window.end.format("%H:%M"),
        window.source,
        marker
    );
}

fn print_stats(stats: &Stats) {
    println!(
        "{} {} runs, {} succeeded, {} expired, {:.1}% success",
        "Stats:".cyan(),
        stats.total_executions,
        stats.successful_executions,
        stats.expired_executions,
        stats.success_rate() * 100.0
    );
    if stats.alerts_triggered > 0 {
        println!("  alerts triggered: {}", stats.alerts_triggered);
    }
    for (task_id, counters) in &stats.per_task {
        println!(
            "  {:<22} runs {:>4}  ok {:>4}  expired {:>3}",
            task_id.to_string(),
            counters.runs,
            counters.successes,
            counters.expirations
        );
    }
}

fn print_snapshot(snapshot: &EngineSnapshot, verbose: bool) {
    print_stats(&snapshot.stats);
    for (task_id, state) in &snapshot.states {
        println!("  {:<22} {:?}", task_id.to_string(), state);
    }
    if verbose {
        for record in &snapshot.recent {
            let outcome = if record.success() {
                "ok".green()
            } else if record.expired() {
                "expired".yellow()
            } else {
                "failed".red()
            };
            println!(
                "  {} {:<22} {:>6}ms {}",
                record.started_at.with_timezone(&Local).format("%H:%M:%S"),
                record.task_id.to_string(),
                record.duration.as_millis(),
                outcome
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = load_config(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
