//! nats-callout - authorization callout service for NATS

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use nats_callout::{
    AuthService,
    bootstrap::provision_internal_account,
    cli::{Cli, Command},
    config::Config,
    pinned::PinnedTokens,
    service::shutdown_signal,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Command::Check) => run_check(&cli),
        Some(Command::Keygen) => run_keygen(),
        Some(Command::Bootstrap { yaml }) => run_bootstrap(&cli, yaml),
        Some(Command::Serve) | None => run_server(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(ref url) = cli.url {
        config.server.url.clone_from(url);
    }
    Ok(config)
}

/// Provision everything and print what would be served
fn run_check(cli: &Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli)?;
    let service = AuthService::provision(&mut config, Arc::new(PinnedTokens::new()))?;

    println!("✅ configuration is valid");
    println!("   Subject: {}", service.subject());
    println!("   Issuer:  {}", service.issuer());
    println!();

    let policies = service.policies();
    if policies.policies().is_empty() {
        println!("No policies configured.");
    } else {
        println!("Policies ({}):", policies.policies().len());
        for (i, policy) in policies.policies().iter().enumerate() {
            println!("  {i}: {}", policy.describe());
        }
    }
    match policies.default_handler() {
        Some(handler) => println!("Default handler: {}", handler.kind()),
        None => println!("Default handler: none (unmatched requests fail with \"no handler\")"),
    }
    Ok(())
}

/// Print a fresh account key pair
fn run_keygen() -> anyhow::Result<()> {
    let pair = nkeys::KeyPair::new_account();
    println!("seed:       {}", pair.seed()?);
    println!("public key: {}", pair.public_key());
    Ok(())
}

/// Print the broker authorization options after bootstrapping the internal account
fn run_bootstrap(cli: &Cli, yaml: bool) -> anyhow::Result<()> {
    let mut config = load_config(cli)?;
    if !config.callout.uses_internal_account() {
        anyhow::bail!("callout.signing_key or callout.issuer is set; there is no internal account to bootstrap");
    }
    if config.callout.internal_seed_file.is_none() {
        eprintln!("⚠️  callout.internal_seed_file is not set; a later serve will generate a different issuer");
    }
    let internal = provision_internal_account(&mut config)?;
    info!(issuer = %internal.issuer, user = %internal.user, "internal auth account ready");

    let rendered = if yaml {
        serde_yaml::to_string(&config.broker)?
    } else {
        serde_json::to_string_pretty(&config.broker)?
    };
    println!("{rendered}");
    Ok(())
}

/// Connect to the broker and answer authorization requests until shutdown
async fn run_server(cli: &Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli)?;
    let pinned = Arc::new(PinnedTokens::new());
    let service = Arc::new(AuthService::provision(&mut config, Arc::clone(&pinned))?);

    let mut options = async_nats::ConnectOptions::new().name(config.server.name.clone());
    if let Some((user, password)) = config.server.credentials(&config.broker) {
        options = options.user_and_password(user, password);
    } else if let Some(token) = config.server.token.clone().filter(|t| !t.is_empty()) {
        options = options.token(token);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %config.server.url,
        subject = %service.subject(),
        issuer = %service.issuer(),
        "Starting auth callout service"
    );

    let client = options
        .connect(config.server.url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", config.server.url))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(shutdown_signal(shutdown_tx));

    service.serve(client, shutdown_rx).await?;

    info!(pinned_tokens = pinned.len(), "Auth callout service shutdown complete");
    Ok(())
}
