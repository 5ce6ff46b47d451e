use anyhow::Result;
use tokio_util::sync::CancellationToken;
use trackmove::{Collection, SyncOptions};

use super::format;

/// Run sync and print the outcome. Fails if any unit failed.
pub async fn run(
    source: &mut Collection,
    target: &mut Collection,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    println!(
        "Syncing {} -> {}{}...",
        source.label(),
        target.label(),
        if options.dry_run { " (dry run)" } else { "" }
    );

    let report = trackmove::sync(source, target, options, cancel).await?;
    format::print_sync_report(&report);

    if !report.failed.is_empty() {
        anyhow::bail!("{} of the activities failed to sync", report.failed.len());
    }
    if report.cancelled {
        anyhow::bail!("sync cancelled");
    }
    Ok(())
}
