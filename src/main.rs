use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use signcast::agent::{AgentSupervisor, StandardSessionFactory};
use signcast::cli::{Cli, Commands, ConfigAction};
use signcast::config::Config;
use signcast::defaults;
use signcast::pipeline::{Classifier, TemplateClassifier};
use signcast::pool::{PoolSettings, PoolSupervisor, ProcessLauncher};
use signcast::pose::AttachedLandmarks;
use signcast::transport::loopback::LoopbackFactory;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Pool {
            workers,
            restart_delay,
        } => {
            let mut config = load_config(cli.config.as_deref(), cli.endpoint)?;
            if let Some(workers) = workers {
                config.pool.workers = workers;
            }
            config.validate()?;
            let mut settings = config.pool.settings();
            if let Some(delay) = restart_delay {
                settings.restart_delay = delay;
            }
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(run_pool(config, settings, cli.config))?;
        }
        Commands::Agent {
            model,
            restart_delay,
        } => {
            let mut config = load_config(cli.config.as_deref(), cli.endpoint)?;
            if model.is_some() {
                config.model.templates = model;
            }
            if let Some(delay) = restart_delay {
                config.agent.restart_delay_ms =
                    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            }
            config.validate()?;
            // One cooperative event loop per session; blocking extraction and
            // inference get their own bounded thread pool.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .max_blocking_threads(config.pipeline.inference_threads)
                .build()
                .context("Failed to start runtime")?;
            runtime.block_on(run_agent(config))?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref(), cli.endpoint)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "signcast",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Leveled logging to stderr. Worker processes prefix every line with their
/// slot index.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let slot = std::env::var(defaults::SLOT_ENV).ok();
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format(move |buf, record| {
        let timestamp = buf.timestamp_millis();
        match &slot {
            Some(slot) => writeln!(
                buf,
                "{} {:5} [worker {}] {}",
                timestamp,
                record.level(),
                slot,
                record.args()
            ),
            None => writeln!(
                buf,
                "{} {:5} [pool] {}",
                timestamp,
                record.level(),
                record.args()
            ),
        }
    });
    builder.init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/signcast/config.toml)
/// 3. Built-in defaults
///
/// Environment variables and `--endpoint` are applied on top.
fn load_config(custom_path: Option<&Path>, endpoint: Option<String>) -> Result<Config> {
    let mut config = if let Some(path) = custom_path {
        Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path()?)?
    };
    config = config.with_env_overrides();
    if let Some(endpoint) = endpoint {
        config.signaling.endpoint = endpoint;
    }
    Ok(config)
}

async fn run_pool(
    config: Config,
    settings: PoolSettings,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let mut launcher = ProcessLauncher::current_exe().context("Failed to locate own binary")?;
    if let Some(path) = config_path {
        launcher = launcher.arg("--config").arg(path.display().to_string());
    }
    // Workers read the same file; pass resolved overrides explicitly.
    launcher = launcher.arg("--endpoint").arg(config.signaling.endpoint.clone());
    if let Some(model) = &config.model.templates {
        launcher = launcher.env("SIGNCAST_MODEL", model.display().to_string());
    }

    log::info!(
        "signcast {} starting {} workers against {}",
        signcast::version_string(),
        settings.workers,
        config.signaling.endpoint
    );
    let mut pool = PoolSupervisor::new(Arc::new(launcher), settings);
    pool.run(async {
        if let Err(e) = shutdown_signal().await {
            log::error!("{}", e);
        }
    })
    .await?;
    log::info!("Pool stopped");
    Ok(())
}

async fn run_agent(config: Config) -> Result<()> {
    let model_path = config
        .model
        .templates_path()
        .context("No classifier model configured and no data directory available")?;
    let classifier = TemplateClassifier::load(&model_path)
        .with_context(|| format!("Failed to load classifier from {}", model_path.display()))?;
    log::info!(
        "Loaded classifier with {} labels from {}",
        classifier.labels().len(),
        model_path.display()
    );

    let factory = StandardSessionFactory {
        config: config.session_config(),
        endpoint: config.signaling.endpoint.clone(),
        connect_timeout: config.signaling.connect_timeout(),
        ice_servers: config.signaling.stun_servers.clone(),
        transports: Arc::new(LoopbackFactory::new()),
        landmarks: Arc::new(AttachedLandmarks),
        classifier: Arc::new(classifier),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            log::error!("{}", e);
        }
        let _ = shutdown_tx.send(true);
        // Keep the sender alive; a dropped sender also reads as shutdown.
        std::future::pending::<()>().await;
    });

    let mut agent =
        AgentSupervisor::new(Arc::new(factory)).with_restart_delay(config.agent.restart_delay());
    let stats = agent.run(shutdown_rx).await;
    log::info!(
        "Agent exiting: {} sessions, {} calls ended, {} failures",
        stats.attempts,
        stats.calls_ended,
        stats.failures
    );
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            log::info!("Received Ctrl+C");
        }
        result = wait_for_sigterm() => {
            result?;
            log::info!("Received SIGTERM");
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}

/// Handle configuration commands.
fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&Path>,
    endpoint: Option<String>,
) -> Result<()> {
    let config_path = match custom_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };

    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path, endpoint)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&config_path, toml::to_string_pretty(&Config::default())?)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("{} {}", "Wrote".green(), config_path.display());
        }
    }
    Ok(())
}
