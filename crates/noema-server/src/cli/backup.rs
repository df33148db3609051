use crate::cli::{open_engine, print_json, truncate, FormatArgs, RestoreArgs};
use crate::config::NoemaConfig;
use anyhow::Result;

pub async fn run(config: NoemaConfig) -> Result<()> {
    if config.engine.store.in_memory {
        anyhow::bail!("Store is in-memory; nothing to back up");
    }
    let engine = open_engine(&config).await?;
    let handle = engine.snapshot()?;
    println!("✅ Snapshot complete: {}", handle.path.display());
    println!("   Checksum: {}", handle.content_hash);
    Ok(())
}

pub async fn run_restore(args: RestoreArgs, config: NoemaConfig) -> Result<()> {
    if !args.latest {
        let Some(path) = &args.path else {
            anyhow::bail!("Give a snapshot path or --latest");
        };
        if !path.exists() {
            anyhow::bail!("Snapshot file not found: {}", path.display());
        }
    }

    if !args.yes {
        println!(
            "Restoring overwrites the store at {}. Re-run with --yes to proceed.",
            config.db_path().display()
        );
        return Ok(());
    }

    let engine = open_engine(&config).await?;
    let handle = match &args.path {
        Some(path) => engine.restore(path).await?,
        None => engine.restore_latest().await?,
    };
    println!("✅ Restored snapshot {}", handle.id);
    println!("   Checksum verified: {}", handle.content_hash);
    Ok(())
}

pub async fn list(args: FormatArgs, config: NoemaConfig) -> Result<()> {
    let engine = open_engine(&config).await?;
    let snapshots = engine.list_snapshots()?;

    if args.format == "json" {
        return print_json(&snapshots);
    }
    if snapshots.is_empty() {
        println!("(no snapshots)");
        return Ok(());
    }
    println!("{:<32}  {:<20}  {}", "ID", "CREATED", "SHA-256");
    println!("{}", "─".repeat(80));
    for s in &snapshots {
        println!(
            "{:<32}  {:<20}  {}",
            truncate(&s.id, 32),
            s.created_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(&s.content_hash, 24)
        );
    }
    Ok(())
}
