use crate::cli::{RulesCheckArgs, RulesCommands};
use anyhow::Result;
use noema_core::RuleSet;

pub async fn run(cmd: RulesCommands) -> Result<()> {
    match cmd {
        RulesCommands::Check(args) => check(args),
    }
}

fn check(args: RulesCheckArgs) -> Result<()> {
    match RuleSet::load(&args.file) {
        Ok(rules) => {
            println!(
                "✅ {} is valid: version {}, {} rule(s), {} constraint(s)",
                args.file.display(),
                rules.version(),
                rules.len(),
                rules.constraints().len()
            );
            println!("   Fingerprint: {}", rules.fingerprint());
            for rule in rules.rules() {
                println!("   {}", rule);
            }
        }
        Err(e) => {
            println!("❌ {}: {}", args.file.display(), e);
            std::process::exit(1);
        }
    }
    Ok(())
}
