// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// A coding-agent runtime: session tree, supervision, and tool execution
/// behind an embeddable SDK.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
pub struct Cli {
    /// Path to a YAML config file, merged on top of the default search path.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). Defaults to `warn`,
    /// overridden by `RUST_LOG` when set.
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a session and drive it from stdin, one prompt per line
    /// (default when no subcommand is given).
    Prompt {
        /// Working directory the session's tools operate in.
        #[arg(long, default_value = ".")]
        working_dir: String,
        /// Provider tag looked up in the SDK's provider registry.
        #[arg(long, default_value = "mock")]
        provider: String,
        /// Model id forwarded to the provider.
        #[arg(long, default_value = "mock-model")]
        model: String,
        /// Tool names to enable for this session.
        #[arg(long, value_delimiter = ',', default_value = "echo,run_command")]
        tools: Vec<String>,
        /// Timeout, in seconds, to wait for each reply.
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },
    /// Start the JSON-RPC server on stdin/stdout.
    Rpc,
    /// Print the effective, merged configuration and exit.
    ShowConfig,
}
