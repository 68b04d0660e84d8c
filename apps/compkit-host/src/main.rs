use anyhow::Result;
use clap::{Parser, Subcommand};
use compkit::{
    run, ComponentRuntime, ContextServices, RunOptions, ServiceRegistry, ShutdownOptions,
    TracingListener, TypeRegistry,
};
use compkit_bootstrap::{AppConfig, AppConfigProvider, CliArgs};

use std::path::{Path, PathBuf};
use std::sync::Arc;

mod demo_components;

/// CompKit Host - runs declaratively described components
#[derive(Parser)]
#[command(name = "compkit-host")]
#[command(about = "CompKit Host - runs declaratively described components")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the components and run until a shutdown signal
    Run,
    /// Validate configuration and component descriptors, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (COMPKIT__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    compkit_bootstrap::init_logging_unified(&logging_config, Path::new(&config.runtime.home_dir));

    tracing::info!(host = %config.runtime.host_name, "CompKit host starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_host(config).await,
        Commands::Check => check(config),
    }
}

async fn run_host(config: AppConfig) -> Result<()> {
    let run_options = RunOptions {
        components_cfg: Arc::new(AppConfigProvider::new(config)),
        types: None,
        registry: ServiceRegistry::new(),
        listeners: vec![Arc::new(TracingListener)],
        shutdown: ShutdownOptions::Signals,
    };
    run(run_options).await
}

fn check(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let types = TypeRegistry::discover_and_build()?;
    println!("{types:?}");

    let registry = ServiceRegistry::new();
    let runtime = ComponentRuntime::new(
        types,
        ContextServices::new(Arc::new(registry.clone()), Arc::new(registry)),
    )
    .with_config(Arc::new(AppConfigProvider::new(config.clone())));

    let cycles = runtime.static_cycles();
    for cycle in &cycles {
        println!("static dependency cycle: {}", cycle.join(" -> "));
    }
    if !cycles.is_empty() {
        anyhow::bail!("{} static dependency cycle(s) found", cycles.len());
    }

    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}
