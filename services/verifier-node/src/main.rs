use anyhow::{bail, Context, Result};
use attest_audit::AuditLog;
use attest_core::{logging, ConfigError, VerifierConfig};
use attest_watcher::{
    DirectoryResolver, RpcLedgerClient, SubmitMode, SubmitterConfig, VerdictSubmitter,
    VerifierCredential, Watcher, WatcherConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

const USAGE: &str =
    "usage: attest-verifier [--config <path>] [--dry-run] [--poll-interval <secs>]";

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    config: Option<PathBuf>,
    dry_run: bool,
    poll_interval: Option<u64>,
    help: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .context("--config was provided without a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--dry-run" => parsed.dry_run = true,
            "--poll-interval" => {
                let raw = iter
                    .next()
                    .context("--poll-interval was provided without a value")?;
                let secs = raw
                    .parse()
                    .with_context(|| format!("invalid --poll-interval value: {raw}"))?;
                parsed.poll_interval = Some(secs);
            }
            "-h" | "--help" => parsed.help = true,
            other => bail!("unrecognised argument: {other}\n{USAGE}"),
        }
    }

    Ok(parsed)
}

/// File, then environment, then flags.
fn load_config(args: &CliArgs) -> Result<VerifierConfig> {
    load_config_with(args, |key| std::env::var(key).ok())
}

fn load_config_with<F>(args: &CliArgs, env: F) -> Result<VerifierConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &args.config {
        Some(path) => VerifierConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => VerifierConfig::default(),
    };

    config.apply_env_from(env)?;

    if args.dry_run {
        config.dry_run = true;
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers, falling back to ctrl-c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Received ctrl-c");
}

async fn run(config: VerifierConfig) -> Result<()> {
    let rpc_url = config
        .rpc_url
        .clone()
        .ok_or(ConfigError::Missing("rpc_url"))?;
    let contract = config
        .contract_address
        .ok_or(ConfigError::Missing("contract_address"))?;

    let credential = match &config.signing_key_path {
        Some(path) => VerifierCredential::load(path)
            .with_context(|| format!("failed to load signing key {}", path.display()))?,
        None => {
            warn!("No signing key configured; using an ephemeral dry-run identity");
            VerifierCredential::ephemeral()
        }
    };
    let verifier = credential.address();

    let mut audit = AuditLog::open(&config.audit_db_path, verifier.to_string())
        .with_context(|| format!("failed to open audit store {}", config.audit_db_path.display()))?;
    if let Some(dir) = &config.export_dir {
        audit = audit.with_export_dir(dir);
    }

    let mode = if config.dry_run {
        SubmitMode::DryRun
    } else {
        SubmitMode::Live
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        verifier = %verifier,
        contract = %contract,
        rpc_url = %rpc_url,
        mode = ?mode,
        poll_interval_secs = config.poll_interval_secs,
        audit_db = %config.audit_db_path.display(),
        content_dir = %config.content_dir.display(),
        "Attestation verifier starting"
    );

    let client = Arc::new(RpcLedgerClient::new(rpc_url, contract)?);
    let submitter = VerdictSubmitter::new(
        client.clone(),
        credential,
        SubmitterConfig::from_verifier_config(&config, contract),
        mode,
    );
    let resolver = DirectoryResolver::new(&config.content_dir);
    let mut watcher = Watcher::new(
        client,
        resolver,
        audit,
        submitter,
        WatcherConfig::from(&config),
    )?;

    watcher.startup_check().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        let _ = shutdown_tx.send(true);
    });

    let stats = watcher.run(shutdown_rx).await;
    info!(
        events_seen = stats.events_seen,
        dispatched = stats.dispatched,
        dispatch_failures = stats.dispatch_failures,
        resubmitted = stats.resubmitted,
        "Attestation verifier stopped"
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = load_config(&args)?;
    logging::init_with_format(config.log_format);

    run(config).await
}
