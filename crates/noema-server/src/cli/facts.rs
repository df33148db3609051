use crate::cli::{open_engine, print_fact_table, print_json, AssertArgs, QueryArgs, RetractArgs};
use crate::config::NoemaConfig;
use anyhow::Result;
use noema_core::{FactId, FactPattern, Term};

pub async fn query(args: QueryArgs, config: NoemaConfig) -> Result<()> {
    let engine = open_engine(&config).await?;

    let mut pattern = FactPattern::any().with_limit(args.limit);
    if let Some(subject) = &args.subject {
        pattern = pattern.subject(Term::entity(subject));
    }
    if let Some(predicate) = &args.predicate {
        pattern = pattern.predicate(predicate);
    }
    if let Some(object) = &args.object {
        pattern = pattern.object(if args.literal {
            Term::literal(object.as_str())
        } else {
            Term::entity(object)
        });
    }
    if args.all {
        pattern = pattern.including_inactive();
    }

    let facts = engine.query(pattern)?;
    if args.format == "json" {
        print_json(&facts)
    } else {
        print_fact_table(&facts);
        Ok(())
    }
}

pub async fn assert(args: AssertArgs, config: NoemaConfig) -> Result<()> {
    let engine = open_engine(&config).await?;
    let id = engine.assert(&args.subject, &args.predicate, &args.object, args.confidence)?;
    println!(
        "✅ ({}, {}, {}) committed as {}",
        args.subject, args.predicate, args.object, id
    );
    Ok(())
}

pub async fn retract(args: RetractArgs, config: NoemaConfig) -> Result<()> {
    let id = FactId::parse(&args.id)
        .ok_or_else(|| anyhow::anyhow!("Invalid fact id '{}': expected 32 hex characters", args.id))?;
    let engine = open_engine(&config).await?;
    engine.retract(&id)?;
    println!("✅ Retracted {}", id);
    Ok(())
}
