//! Command-line interface for stagewright.
//!
//! Provides commands for running the requirements-to-code workflow,
//! replaying the trace log, and showing the resolved configuration.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::OpenAiClient;
use crate::config;
use crate::core::{LoggedRecord, Orchestrator, TraceLog};
use crate::domain::State;
use crate::stages::{self, DelimiterBalance};

/// stagewright - Gated, retrying stage pipeline for text-generation workflows
#[derive(Parser, Debug)]
#[command(name = "stagewright")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the workflow for one request
    Run {
        /// Request text (falls back to --input, then piped stdin)
        request: Option<String>,

        /// Read the request from a file
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Trace log to append to (overrides configuration)
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Attempts per stage, including the first
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Replay the trace log
    Trace {
        /// Trace log to read (overrides configuration)
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Only show entries from this stage
        #[arg(long)]
        stage: Option<String>,

        /// Show at most this many of the latest records
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show current configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                request,
                input,
                log_file,
                max_attempts,
            } => run_workflow(request, input, log_file, max_attempts).await,
            Commands::Trace {
                log_file,
                stage,
                limit,
            } => show_trace(log_file, stage.as_deref(), limit),
            Commands::Config => show_config(),
        }
    }
}

/// Resolve the request from argument, file or piped stdin
fn read_request(request: Option<String>, input_file: Option<PathBuf>) -> Result<String> {
    let text = if let Some(text) = request {
        text
    } else if let Some(path) = input_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No request provided. Pass it as an argument, use --input <file> or pipe to stdin");
    };

    if text.trim().is_empty() {
        anyhow::bail!("Request is empty");
    }

    Ok(text)
}

/// Run the workflow and print the outcome
async fn run_workflow(
    request: Option<String>,
    input_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
    max_attempts: Option<u32>,
) -> Result<()> {
    let cfg = config::config()?;
    let request = read_request(request, input_file)?;

    let llm = Arc::new(OpenAiClient::from_settings(&cfg.llm)?);
    let pipeline = stages::default_pipeline(llm, Arc::new(DelimiterBalance))?;

    let log = TraceLog::new(log_file.unwrap_or_else(|| cfg.log_file.clone()));
    let mut retry = cfg.pipeline.retry_policy();
    if let Some(n) = max_attempts {
        retry.max_attempts = n;
    }

    let orchestrator = Orchestrator::new(pipeline, log).with_retry_policy(retry);
    let context = orchestrator.run(request).await;
    let trace_path = orchestrator.trace_log().path().display().to_string();

    match context.state() {
        State::Finished => {
            if let Some(report) = context.get_str(stages::FINAL_REPORT) {
                println!("{}", report);
            }
            eprintln!("\n[Run finished, trace: {}]", trace_path);
        }
        state => {
            eprintln!("[Run ended in state {}]", state);
            if let Some(error) = context.error() {
                eprintln!("  Error: {}", error);
            }
            for key in [stages::REQUIREMENTS_REVIEW, stages::CODE_REVIEW] {
                if let Some(review) = context.get(key) {
                    eprintln!("  {}: {}", key, review);
                }
            }
            eprintln!("  Trace: {}", trace_path);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Print trace records, newest last
fn show_trace(log_file: Option<PathBuf>, stage: Option<&str>, limit: usize) -> Result<()> {
    let log = match log_file {
        Some(path) => TraceLog::new(path),
        None => TraceLog::open_default()?,
    };

    let records = match stage {
        Some(stage) => log.records_for_stage(stage)?,
        None => log.replay()?,
    };

    if records.is_empty() {
        println!("No trace records found in {}", log.path().display());
        return Ok(());
    }

    let skip = records.len().saturating_sub(limit);
    println!("{:<25} {:<20} {:<16} {}", "TIMESTAMP", "STAGE", "TYPE", "CONTENT");
    println!("{}", "-".repeat(100));

    for record in &records[skip..] {
        match record {
            LoggedRecord::Entry {
                timestamp,
                stage,
                kind,
                content,
            } => {
                let text = match content {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                println!(
                    "{:<25} {:<20} {:<16} {}",
                    timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
                    stage,
                    kind.as_str(),
                    truncate(&text, 60)
                );
            }
            LoggedRecord::Unprocessable { error, raw } => {
                println!("{:<25} {:<20} {:<16} {}", "-", "-", error, truncate(raw, 60));
            }
        }
    }

    println!("\nShowing {} of {} records", records.len() - skip, records.len());
    Ok(())
}

/// Single-line preview of at most `max` characters
fn truncate(text: &str, max: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Show current configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("stagewright configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Trace log: {}", cfg.log_file.display());
    println!();
    println!("Pipeline:");
    println!("  Max attempts:   {}", cfg.pipeline.max_attempts);
    println!("  Retry delay:    {}ms", cfg.pipeline.retry_delay_ms);
    println!();
    println!("Text generation:");
    println!("  Base URL:    {}", cfg.llm.base_url);
    println!("  Model:       {}", cfg.llm.model);
    println!("  Temperature: {}", cfg.llm.temperature);
    println!("  Timeout:     {}s", cfg.llm.timeout_seconds);
    println!(
        "  API key:     ${} ({})",
        cfg.llm.api_key_env,
        if std::env::var(&cfg.llm.api_key_env).is_ok() {
            "set"
        } else {
            "not set"
        }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line\nbreak", 20), "line break");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
    }

    #[test]
    fn test_request_from_argument() {
        let text = read_request(Some("build a bot".to_string()), None).unwrap();
        assert_eq!(text, "build a bot");
        assert!(read_request(Some("   ".to_string()), None).is_err());
    }

    #[test]
    fn test_request_from_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "from file").unwrap();

        let text = read_request(None, Some(temp.path().to_path_buf())).unwrap();
        assert_eq!(text, "from file");
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from([
            "stagewright",
            "run",
            "make a bot",
            "--max-attempts",
            "5",
        ]);
        match cli.command {
            Commands::Run {
                request,
                max_attempts,
                ..
            } => {
                assert_eq!(request.as_deref(), Some("make a bot"));
                assert_eq!(max_attempts, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
