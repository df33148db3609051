use crate::cli::ConfigCommands;
use crate::config::NoemaConfig;
use anyhow::Result;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub async fn run(
    cmd: ConfigCommands,
    config_path: &Path,
    data_dir: Option<PathBuf>,
    http_addr: Option<SocketAddr>,
) -> Result<()> {
    match cmd {
        ConfigCommands::Validate => validate(config_path),
        ConfigCommands::Show => show(config_path, data_dir, http_addr),
    }
}

fn validate(config_path: &Path) -> Result<()> {
    let config = NoemaConfig::load(config_path)
        .map_err(|e| anyhow::anyhow!("{} does not parse: {}", config_path.display(), e))?;
    let problems = group_by_section(server_problems(&config).into_iter().chain(config.validate()));
    if problems.is_empty() {
        println!("{}: ok", config_path.display());
        return Ok(());
    }

    let count: usize = problems.values().map(Vec::len).sum();
    println!("{}: {} problem(s)", config_path.display(), count);
    for (section, messages) in &problems {
        println!("  [{}]", section);
        for message in messages {
            println!("    - {}", message);
        }
    }
    anyhow::bail!("invalid configuration")
}

fn show(config_path: &Path, data_dir: Option<PathBuf>, http_addr: Option<SocketAddr>) -> Result<()> {
    let source = if config_path.exists() {
        config_path.display().to_string()
    } else {
        "built-in defaults".to_string()
    };
    let overridden: Vec<&str> = [
        data_dir.as_ref().map(|_| "data_dir"),
        http_addr.as_ref().map(|_| "http_addr"),
    ]
    .into_iter()
    .flatten()
    .collect();

    let config = NoemaConfig::load_or_default(config_path)?.with_overrides(data_dir, http_addr);
    println!("# from {}", source);
    if !overridden.is_empty() {
        println!("# overridden on the command line: {}", overridden.join(", "));
    }
    println!("# database: {}", config.db_path().display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Checks on the `[server]` section; the engine validates its own.
fn server_problems(config: &NoemaConfig) -> Vec<String> {
    let mut problems = Vec::new();
    if config.server.http_addr.port() == 0 {
        problems.push("[server] http_addr needs a fixed port".to_string());
    }
    if let Some(dir) = &config.server.data_dir {
        if dir.as_os_str().is_empty() {
            problems.push("[server] data_dir must not be empty".to_string());
        } else if dir.is_file() {
            problems.push(format!("[server] data_dir {} is a file", dir.display()));
        }
    }
    problems
}

/// Split `[section] message` strings by section, preserving order within
/// each section.
fn group_by_section(problems: impl IntoIterator<Item = String>) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for problem in problems {
        let (section, message) = problem
            .strip_prefix('[')
            .and_then(|rest| rest.split_once(']'))
            .map(|(section, message)| (section.to_string(), message.trim().to_string()))
            .unwrap_or_else(|| ("general".to_string(), problem.clone()));
        grouped.entry(section).or_default().push(message);
    }
    grouped
}
