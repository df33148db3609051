use crate::cli::{open_engine, print_json, FormatArgs};
use crate::config::NoemaConfig;
use anyhow::Result;

pub async fn run(args: FormatArgs, config: NoemaConfig) -> Result<()> {
    let engine = open_engine(&config).await?;
    let stats = engine.stats()?;

    if args.format == "json" {
        return print_json(&stats);
    }

    let db_mb = stats.store.db_size_bytes as f64 / 1_048_576.0;

    println!();
    println!("Store");
    println!("{}", "─".repeat(50));
    println!("Entities:   {:>8}", stats.store.entity_count);
    println!("Facts:      {:>8}", stats.store.fact_count);
    println!("  active     {:>8}", stats.store.active_facts);
    println!("  superseded {:>8}", stats.store.superseded_facts);
    println!("  retracted  {:>8}", stats.store.retracted_facts);
    for (predicate, count) in &stats.store.active_by_predicate {
        println!("  {:16} {:>8}", predicate, count);
    }
    println!("Log:        {:>8}", stats.store.log_len);
    println!("Generation: {:>8}", stats.store.generation);
    println!("DB Size:    {:>7.1} MB", db_mb);

    println!();
    println!("Reasoning");
    println!("{}", "─".repeat(50));
    println!("Rules:      {} ({} rules)", stats.rules_version, stats.rule_count);
    println!("Indexed:    {:>8} entities", stats.indexed_entities);

    println!();
    println!("Learning");
    println!("{}", "─".repeat(50));
    println!("Pending:    {:>8}", stats.store.pending_events);
    println!("Cycles:     {:>8}", stats.learning.cycles);
    println!("Promoted:   {:>8}", stats.learning.total_promoted);
    if let Some(at) = stats.learning.last_cycle_at {
        println!("Last cycle: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("{}", "─".repeat(50));
    println!();

    Ok(())
}
