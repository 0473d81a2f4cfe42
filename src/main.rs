// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};
use relay_sdk::{ProviderRegistry, RelaySdk, SessionConfig};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if matches!(cli.command, Some(Commands::ShowConfig)) {
        let config = relay_config::load(cli.config.as_deref())?;
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return Ok(());
    }

    let config = Arc::new(relay_config::load(cli.config.as_deref())?);
    let sdk = Arc::new(RelaySdk::new(config, ProviderRegistry::new()));

    match cli.command.unwrap_or(Commands::Prompt {
        working_dir: ".".into(),
        provider: "mock".into(),
        model: "mock-model".into(),
        tools: vec!["echo".into(), "run_command".into()],
        timeout_secs: 120,
    }) {
        Commands::Rpc => relay_rpc::serve_stdio(sdk).await,
        Commands::Prompt { working_dir, provider, model, tools, timeout_secs } => {
            run_prompt_loop(sdk, working_dir, provider, model, tools, timeout_secs).await
        }
        Commands::ShowConfig => unreachable!("handled above"),
    }
}

/// Starts one session and drives it from stdin, line by line, printing each
/// reply to stdout. Exits cleanly on EOF.
async fn run_prompt_loop(
    sdk: Arc<RelaySdk>,
    working_dir: String,
    provider_tag: String,
    model_id: String,
    tools: Vec<String>,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let session_config = SessionConfig {
        working_dir,
        model: relay_sdk::ModelSelector { provider_tag, model_id, ..Default::default() },
        tools,
        ..Default::default()
    };
    sdk.start_session("cli", session_config).await?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("> ");
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            print!("> ");
            stdout.flush()?;
            continue;
        }
        match sdk.prompt_sync("cli", line, Duration::from_secs(timeout_secs)).await {
            Ok(reply) => println!("{reply}"),
            Err(e) => eprintln!("error: {e}"),
        }
        print!("> ");
        stdout.flush()?;
    }

    sdk.shutdown_all().await;
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry().with(fmt::layer().with_target(false).with_writer(std::io::stderr)).with(filter).try_init();
}
