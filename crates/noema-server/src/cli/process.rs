use crate::cli::{open_engine, print_json, truncate, ProcessArgs};
use crate::config::NoemaConfig;
use anyhow::Result;
use noema_core::{PipelineRequest, ProcessingMode};

pub async fn run(args: ProcessArgs, config: NoemaConfig) -> Result<()> {
    let engine = open_engine(&config).await?;

    let mut request = PipelineRequest::new(args.text).with_context(args.context);
    if let Some(mode) = args.mode {
        let mode: ProcessingMode = mode.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        request = request.with_mode(mode);
    }
    let result = engine.process(request).await;

    if args.format == "json" {
        return print_json(&result);
    }

    println!();
    println!("{}", result.answer);
    println!("{}", "─".repeat(60));
    println!("Mode:       {:?}", result.mode_used);
    println!("Source:     {:?}", result.source);
    println!("Confidence: {:.3}", result.confidence);
    if result.degraded {
        println!("Degraded:   yes");
    }
    if let Some(reason) = result.reason {
        println!("Reason:     {:?}", reason);
    }
    if !result.facts.is_empty() {
        println!("Facts:");
        for answer in &result.facts {
            let via = answer.rule.as_deref().unwrap_or("stored");
            println!(
                "  {} {} {}  ({:.2}, {})",
                truncate(&answer.subject.to_string(), 24),
                answer.predicate,
                truncate(&answer.object.to_string(), 24),
                answer.confidence,
                via
            );
        }
    }
    if !result.integrated.is_empty() {
        println!("Integrated: {} derived fact(s)", result.integrated.len());
    }
    if args.explain && !result.explanation.is_empty() {
        println!("Trace:");
        for line in &result.explanation {
            println!("  {}", line);
        }
    }
    println!();
    Ok(())
}
