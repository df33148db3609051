use crate::cli::{open_engine, print_json, FormatArgs, LearnArgs};
use crate::config::NoemaConfig;
use anyhow::Result;
use noema_core::{Interaction, Outcome};

fn parse_outcome(s: &str) -> Result<Outcome> {
    match s.to_ascii_lowercase().as_str() {
        "positive" => Ok(Outcome::Positive),
        "neutral" => Ok(Outcome::Neutral),
        "negative" => Ok(Outcome::Negative),
        other => anyhow::bail!(
            "Unknown outcome '{}', expected positive, neutral or negative",
            other
        ),
    }
}

pub async fn record(args: LearnArgs, config: NoemaConfig) -> Result<()> {
    let interaction = Interaction {
        input: args.input,
        context: args.context,
        response: args.response,
        outcome: parse_outcome(&args.outcome)?,
    };
    let engine = open_engine(&config).await?;
    let id = engine.record_interaction(interaction).await?;
    println!("✅ Recorded event {}", id);
    Ok(())
}

pub async fn consolidate(args: FormatArgs, config: NoemaConfig) -> Result<()> {
    let engine = open_engine(&config).await?;
    let report = engine.consolidate().await?;

    if args.format == "json" {
        return print_json(&report);
    }

    println!();
    println!("Consolidation");
    println!("{}", "─".repeat(50));
    if let Some(id) = &report.consolidation {
        println!("Pass:       {}", id);
    }
    println!("Candidates: {:>8}", report.candidates);
    println!("Clusters:   {:>8}", report.clusters);
    println!("Noise:      {:>8}", report.noise);
    println!("Promoted:   {:>8}", report.promoted.len());
    println!("Rejected:   {:>8}", report.rejected);
    println!("Discarded:  {:>8}", report.discarded);
    println!("Duration:   {:>6} ms", report.duration_ms);
    println!("{}", "─".repeat(50));
    for id in &report.promoted {
        println!("  + {}", id);
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outcome() {
        assert_eq!(parse_outcome("Positive").unwrap(), Outcome::Positive);
        assert_eq!(parse_outcome("negative").unwrap(), Outcome::Negative);
        assert!(parse_outcome("great").is_err());
    }
}
