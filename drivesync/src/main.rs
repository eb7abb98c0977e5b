use anyhow::Context;
use drive_api::DriveClient;
use drivesync::cache::{self, CacheError};
use drivesync::config::SyncConfig;
use drivesync::logging::init_tracing;
use drivesync::sync::{DriveRemote, LocalFs, SyncEngine};
use drivesync::tree::{ResourceTree, TreeError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    DryRun,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--dry-run" | "-n" => mode = CliMode::DryRun,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

async fn load_tree(config: &SyncConfig) -> anyhow::Result<ResourceTree> {
    match cache::load(&config.state_file, &config.sync_dir, &config.remote_root).await {
        Ok(tree) => Ok(tree),
        Err(CacheError::Tree(TreeError::RootMismatch { expected, found })) => {
            warn!(%expected, %found, "cache belongs to another remote root; starting fresh");
            Ok(ResourceTree::new(&config.sync_dir, &config.remote_root))
        }
        Err(err) => Err(err).context("loading the sync state failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: drivesync [--dry-run]");
        println!("  --dry-run, -n   Print the planned actions without changing anything");
        return Ok(());
    }
    init_tracing();

    let config = SyncConfig::from_env()?;
    info!(?config, "starting sync");
    let client = DriveClient::with_base_url(&config.api_url, config.require_token()?)?;
    let remote = DriveRemote::new(client, config.page_size);
    let mut local = LocalFs::new();
    if let Some(name) = config.state_file_name() {
        local = local.ignoring(name);
    }
    let tree = load_tree(&config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing the current item");
            on_signal.cancel();
        }
    });

    let dry_run = mode == CliMode::DryRun;
    let mut engine = SyncEngine::new(remote, local, tree)
        .with_dry_run(dry_run)
        .with_cancellation(cancel);
    let report = engine.run().await?;

    if dry_run {
        for planned in &report.planned {
            println!("{}: {:?}", planned.path.display(), planned.actions);
        }
    } else {
        cache::save(engine.tree(), &config.state_file)
            .await
            .context("saving the sync state failed")?;
    }

    for failure in &report.failures {
        eprintln!("failed: {}: {}", failure.path.display(), failure.message);
    }
    if !report.failures.is_empty() {
        anyhow::bail!("{} item(s) failed to sync", report.failures.len());
    }
    Ok(())
}
