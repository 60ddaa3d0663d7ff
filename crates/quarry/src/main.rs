//! # quarry
//!
//! Command-line client: submits one query to a Quarry endpoint, streams
//! fragment progress to the log, and prints the aggregated result.

#![deny(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use quarry_client::{Client, ClientConfig, QueryResult};

/// Submit a query to a Quarry endpoint.
#[derive(Parser, Debug)]
#[command(name = "quarry", about = "Submit a query to a Quarry endpoint")]
struct Cli {
    /// WebSocket endpoint URL.
    #[arg(long, env = "QUARRY_ENDPOINT")]
    endpoint: String,

    /// Language code for the session.
    #[arg(long, default_value = "en")]
    language: String,

    /// Assumption token to apply (repeatable).
    #[arg(long = "assumption")]
    assumptions: Vec<String>,

    /// Extra handshake header as `name: value` (repeatable).
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Seconds to wait for completion before giving up.
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// The query text.
    #[arg(required = true)]
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quarry=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let query = args.query.join(" ");

    let mut config = ClientConfig::new(&args.endpoint);
    config.language = args.language.clone();
    config.headers = parse_headers(&args.headers)?;

    let client = Client::new(config);
    let session = client.submit(&query, &args.assumptions);

    let mut fragments = session.subscribe();
    let progress = tokio::spawn(async move {
        loop {
            match fragments.recv().await {
                Ok(fragment) => debug!(kind = fragment.kind.name(), "fragment received"),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "fragment progress lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let waited = tokio::time::timeout(Duration::from_secs(args.timeout_secs), session.wait()).await;
    progress.abort();
    match waited {
        Err(_) => bail!("query timed out after {}s", args.timeout_secs),
        Ok(settled) => settled.context("query failed")?,
    }

    print_result(&session.snapshot());
    Ok(())
}

/// Parse repeatable `name: value` header flags.
fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|header| {
            header
                .split_once(':')
                .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
                .with_context(|| format!("invalid header (expected `name: value`): {header}"))
        })
        .collect()
}

fn print_result(result: &QueryResult) {
    if let Some(corrected) = &result.corrected_input {
        println!("Interpreted as: {corrected}");
    }
    for suggestion in &result.did_you_mean {
        println!("Did you mean: {}", suggestion.val);
    }
    for assumption in &result.assumptions {
        println!("* {}", assumption.display);
    }
    for warning in &result.warnings {
        if !warning.text.is_empty() {
            println!("! {}", warning.text);
        }
    }

    if result.failed {
        println!("The server has no result for this query.");
    }
    for topic in &result.future_topics {
        println!("Future topic: {} ({})", topic.topic, topic.msg);
    }

    for pod in result.pods.values() {
        println!("\n== {} ==", pod.title);
        for subpod in &pod.subpods {
            if let Some(text) = &subpod.plaintext {
                println!("{text}");
            }
        }
    }
    for pod in result.step_by_step.values() {
        println!("\n== {} (step by step) ==", pod.title);
        for subpod in &pod.subpods {
            if let Some(text) = &subpod.plaintext {
                println!("{text}");
            }
        }
    }

    if !result.timed_out.is_empty() {
        println!("\nTimed out before completion: {}", result.timed_out.join(", "));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
