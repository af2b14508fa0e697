//! muttcore-cli: demonstration front end over the mutt-core library
//!
//! This binary exists to exercise [`muttcore::api`] end to end; it is not
//! part of the core and is deliberately thin. A real MUA wires its own
//! pager/composer/folder-browser UI against the same [`muttcore::api`]
//! entry points this binary calls.

use std::io::{self, Read};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use muttcore::api;
use muttcore::config::Config;
use muttcore::envelope::EnvelopeFilters;
use muttcore::errors::CoreError;
use muttcore::mime::{AttachmentPolicy, MimeLimits};

#[derive(Parser)]
#[command(name = "muttcore-cli", about = "Demonstration front end over mutt-core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a message from stdin and print its envelope summary and
    /// attachment count.
    Parse,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("muttcore-cli: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run() -> Result<(), CoreError> {
    let cli = Cli::parse();
    let config = Config::load_from_env()?;

    match cli.command {
        Command::Parse => parse_stdin(&config),
    }
}

fn parse_stdin(config: &Config) -> Result<(), CoreError> {
    let mut raw = Vec::new();
    io::stdin()
        .read_to_end(&mut raw)
        .map_err(|e| CoreError::Io(e.to_string()))?;

    let limits = MimeLimits {
        max_depth: config.resources.mime_max_depth,
        max_parts: config.resources.mime_max_parts,
    };
    let mut filters = EnvelopeFilters::default();
    let mut parsed = api::parse_message_bytes(&raw, &mut filters, limits, "us-ascii")?;

    println!("From: {:?}", parsed.envelope.from);
    println!("Subject: {:?}", parsed.envelope.subject);
    let attachments = api::classify_attachments(&mut parsed.arena, parsed.root, &AttachmentPolicy::default());
    println!("Attachments: {attachments}");
    if !parsed.warnings.is_empty() {
        println!("Warnings:");
        for warning in &parsed.warnings {
            println!("  {}: {}", warning.context, warning.detail);
        }
    }
    Ok(())
}
