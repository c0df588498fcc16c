use std::sync::Arc;

use anyhow::Context;
use drive_core::DriveClient;
use drive_mover::config::MoverConfig;
use drive_mover::logging::init_logging;
use drive_mover::remote::{DriveApiRemote, DriveRemote};
use drive_mover::sync::batch::{BatchMutator, BatchProgress, FailedItem, ownership_params, reparent_params};
use drive_mover::sync::{RateLimitedInvoker, ReasonPolicy, TreeMirror};
use tracing::info;

const USAGE: &str = "\
Usage: drive-mover <source-folder-id> <dest-folder-id> [--drive-id ID] [--new-owner EMAIL] [--dry-run]
       drive-mover --list-drives
       drive-mover --help

  --drive-id ID      Scope destination listings to a shared drive
  --new-owner EMAIL  Transfer ownership of every moved file
  --dry-run          Mirror folders and count files without moving them
  --list-drives      Print the shared drives visible to the token";

#[derive(Debug, Clone, PartialEq, Eq)]
struct MoveArgs {
    source_id: String,
    dest_id: String,
    drive_id: Option<String>,
    new_owner: Option<String>,
    dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Move(MoveArgs),
    ListDrives,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut positional = Vec::new();
    let mut drive_id = None;
    let mut new_owner = None;
    let mut dry_run = false;
    let mut list_drives = false;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliMode::Help),
            "--list-drives" => list_drives = true,
            "--dry-run" => dry_run = true,
            "--drive-id" => {
                drive_id = Some(args.next().context("--drive-id requires a value")?);
            }
            "--new-owner" => {
                new_owner = Some(args.next().context("--new-owner requires an email")?);
            }
            other if other.starts_with('-') => anyhow::bail!("unknown argument: {other}"),
            _ => positional.push(arg),
        }
    }

    if list_drives {
        if !positional.is_empty() {
            anyhow::bail!("--list-drives takes no folder ids");
        }
        return Ok(CliMode::ListDrives);
    }
    let [source_id, dest_id]: [String; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected <source-folder-id> <dest-folder-id>"))?;
    Ok(CliMode::Move(MoveArgs {
        source_id,
        dest_id,
        drive_id,
        new_owner,
        dry_run,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let mode = match parse_cli_mode(std::env::args()) {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("{USAGE}");
            return Err(err);
        }
    };
    if mode == CliMode::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = MoverConfig::from_env().context("invalid configuration")?;
    let client = DriveClient::with_base_url(config.api_base_url.as_str(), &config.access_token)
        .context("failed to build Drive client")?;

    match mode {
        CliMode::ListDrives => list_drives(&client).await,
        CliMode::Move(args) => run_move(&config, client, args).await,
        CliMode::Help => Ok(()),
    }
}

async fn list_drives(client: &DriveClient) -> anyhow::Result<()> {
    let drives = client
        .list_drives()
        .await
        .context("failed to list shared drives")?;
    if drives.is_empty() {
        println!("no shared drives");
    }
    for drive in drives {
        println!("{} ({})", drive.name, drive.id);
    }
    Ok(())
}

async fn run_move(config: &MoverConfig, client: DriveClient, args: MoveArgs) -> anyhow::Result<()> {
    let invoker = RateLimitedInvoker::new(config.invoker_config());
    let policy = Arc::new(config.policy());
    let source = Arc::new(DriveApiRemote::new(client.clone(), config.page_size));
    let dest = match &args.drive_id {
        Some(drive_id) => DriveApiRemote::new(client, config.page_size).scoped_to_drive(drive_id),
        None => DriveApiRemote::new(client, config.page_size),
    };
    let dest = Arc::new(dest);

    let source_root = invoker
        .invoke(|| source.get_node(&args.source_id), |err| policy.classify(err))
        .await
        .with_context(|| format!("failed to look up source folder {}", args.source_id))?;
    let dest_root = invoker
        .invoke(|| dest.get_node(&args.dest_id), |err| policy.classify(err))
        .await
        .with_context(|| format!("failed to look up destination folder {}", args.dest_id))?;
    for root in [&source_root, &dest_root] {
        if !root.is_folder() {
            anyhow::bail!("{} ({}) is not a folder", root.name, root.id);
        }
    }
    info!(source = %source_root.name, dest = %dest_root.name, "mirroring folder structure");

    let mirror = TreeMirror::new(
        Arc::clone(&source),
        Arc::clone(&dest),
        invoker.clone(),
        Arc::clone(&policy),
        config.concurrency,
    );
    let outcome = mirror
        .mirror_detailed(source_root, dest_root)
        .await
        .context("failed to mirror folder structure")?;
    println!(
        "mirrored {} folders ({} created)",
        outcome.lookup.len(),
        outcome.created
    );

    let files = mirror
        .collect_files(outcome.lookup.source_ids().map(str::to_string).collect::<Vec<_>>())
        .await
        .context("failed to list files to move")?;
    if args.dry_run {
        println!("dry run: {} files would be moved", files.len());
        return Ok(());
    }

    let mover = BatchMutator::new(
        Arc::clone(&dest),
        invoker.clone(),
        Arc::clone(&policy),
        config.concurrency,
    )
    .with_progress(log_progress);
    let lookup = Arc::new(outcome.lookup);
    let moved = mover
        .apply_to_all(files, move |node| reparent_params(node, &lookup))
        .await;
    println!(
        "moved {} files, {} failed",
        moved.succeeded.len(),
        moved.failures.len() + moved.panicked
    );
    let mut failures = moved.failures;
    let mut panicked = moved.panicked;

    if let Some(owner) = args.new_owner {
        let transferred = mover
            .apply_to_all(moved.succeeded, move |_| ownership_params(&owner))
            .await;
        println!(
            "transferred ownership of {} files, {} failed",
            transferred.succeeded.len(),
            transferred.failures.len() + transferred.panicked
        );
        failures.extend(transferred.failures);
        panicked += transferred.panicked;
    }

    if failures.is_empty() && panicked == 0 {
        return Ok(());
    }
    for failure in &failures {
        eprintln!("{}", describe_failure(failure));
    }
    if panicked > 0 {
        eprintln!("{panicked} item task(s) panicked before settling");
    }
    anyhow::bail!("{} item(s) failed", failures.len() + panicked)
}

fn log_progress(progress: BatchProgress) {
    if progress.settled == progress.total || progress.settled % 100 == 0 {
        info!(settled = progress.settled, total = progress.total, "batch progress");
    }
}

fn describe_failure(failure: &FailedItem) -> String {
    let reason = failure.error.first_reason().unwrap_or("unknown");
    format!(
        "failed: {} ({}) [{reason}] {}",
        failure.node.name, failure.node.id, failure.error
    )
}
