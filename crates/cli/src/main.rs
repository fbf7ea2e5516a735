//! cliz: get things done with command-line tools, in plain language.
//!
//! ```text
//! cliz "show the five largest files under ./target"
//! cliz --auto "what changed in the last three commits?"
//! ```
//!
//! The answer goes to stdout; prompts, progress and logs go to stderr.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

mod app;
mod confirm;
mod render;

#[derive(Parser)]
#[command(
    name = "cliz",
    about = "cliz: an AI agent that drives your command-line tools",
    version
)]
struct Cli {
    /// What you want done, in plain language
    #[arg(required = true, num_args = 1..)]
    instruction: Vec<String>,

    /// Run tools without asking for confirmation
    #[arg(short, long)]
    auto: bool,

    /// Configuration file (defaults to ~/.cliz/config.toml)
    #[arg(short, long, env = "CLIZ_CONFIG")]
    config: Option<PathBuf>,

    /// Session whose history is resumed and extended [default: default]
    #[arg(short, long)]
    session: Option<String>,

    /// Clear the session's stored history before running
    #[arg(long)]
    new: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing on stderr; stdout carries only the answer
    let filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let options = app::Options {
        instruction: cli.instruction.join(" "),
        auto: cli.auto,
        config: cli.config,
        session: cli.session,
        new: cli.new,
    };

    match app::run(options).await {
        Ok(answer) => {
            if answer.streamed {
                println!();
            } else {
                println!("{}", answer.text);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
