//! Remora CLI - chat against the memory engine from a terminal
//!
//! Usage:
//!   remora chat <user>               Start an interactive chat session
//!   remora facts <user>              List stored facts for a user
//!   remora sessions <user>           List a user's sessions

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use remora::{
    ChatCompletionsOracle, MemoryEngine, OverrideDecision, ReconcileStrategy, TurnOutcome,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "remora")]
#[command(about = "Remora - conversational memory for AI chat agents")]
#[command(version)]
struct Cli {
    /// Path to data directory
    #[arg(short, long, default_value = "./remora_data")]
    data_dir: PathBuf,

    /// OpenAI-compatible completions endpoint
    #[arg(long, default_value = "https://openrouter.ai/api/v1")]
    base_url: String,

    /// Model identifier
    #[arg(long, default_value = "x-ai/grok-4-fast")]
    model: String,

    /// API key for the completions endpoint
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    api_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Username the facts are scoped to
        user: String,

        /// Session to resume (a new one is created when omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// Strategy applied when a conflict is confirmed
        #[arg(long, value_enum, default_value = "merge")]
        strategy: CliStrategy,
    },

    /// List stored facts for a user
    Facts {
        /// Username
        user: String,
    },

    /// List a user's sessions
    Sessions {
        /// Username
        user: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliStrategy {
    Add,
    Replace,
    Merge,
}

impl From<CliStrategy> for ReconcileStrategy {
    fn from(s: CliStrategy) -> Self {
        match s {
            CliStrategy::Add => ReconcileStrategy::Add,
            CliStrategy::Replace => ReconcileStrategy::Replace,
            CliStrategy::Merge => ReconcileStrategy::Merge,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let oracle = Arc::new(ChatCompletionsOracle::new(
        &cli.base_url,
        &cli.api_key,
        &cli.model,
    )?);
    let engine = MemoryEngine::new(&cli.data_dir, oracle).await?;

    match cli.command {
        Commands::Chat {
            user,
            session,
            strategy,
        } => {
            let engine = engine.with_strategy(strategy.into());
            let session_id = session.unwrap_or_else(|| Uuid::new_v4().to_string());
            chat_loop(&engine, &user, &session_id).await?;
        }

        Commands::Facts { user } => {
            let facts = engine.list_facts(&user).await?;
            if facts.is_empty() {
                println!("{}", "No facts stored.".dimmed());
            }
            for fact in facts {
                println!(
                    "{} {} {}",
                    format!("[{}]", fact.fact_type).cyan(),
                    fact.fact_content.bold(),
                    format!("({})", fact.created_at.format("%Y-%m-%d")).dimmed()
                );
            }
        }

        Commands::Sessions { user } => {
            let sessions = engine.sessions_for_user(&user).await?;
            if sessions.is_empty() {
                println!("{}", "No sessions yet.".dimmed());
            }
            for session in sessions {
                println!(
                    "{} {} {}",
                    session.session_id.cyan(),
                    session.name.as_deref().unwrap_or("(unnamed)").bold(),
                    format!("{} turns", session.history.len()).dimmed()
                );
            }
        }
    }

    Ok(())
}

async fn chat_loop(engine: &MemoryEngine, user: &str, session_id: &str) -> anyhow::Result<()> {
    println!(
        "{} session {} (type {} to leave)",
        "remora".green().bold(),
        session_id.cyan(),
        "exit".yellow()
    );

    let stdin = std::io::stdin();
    loop {
        print!("{} ", "you>".blue().bold());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "exit" || message == "quit" {
            break;
        }

        let mut decision = OverrideDecision::Unset;
        loop {
            match engine
                .submit_turn(session_id, user, message, decision)
                .await
            {
                Ok(TurnOutcome::Reply(reply)) => {
                    println!("{} {}", "assistant>".green().bold(), reply);
                    break;
                }
                Ok(TurnOutcome::ConflictPrompt { message: prompt, .. }) => {
                    println!("{} {}", "conflict>".yellow().bold(), prompt);
                    print!("{} ", "update memory? [y/n]".yellow());
                    std::io::stdout().flush()?;

                    let mut answer = String::new();
                    stdin.lock().read_line(&mut answer)?;
                    decision = if answer.trim().eq_ignore_ascii_case("y") {
                        OverrideDecision::Accept
                    } else {
                        OverrideDecision::Decline
                    };
                }
                Err(e) => {
                    eprintln!("{} {}", "error>".red().bold(), e);
                    break;
                }
            }
        }
    }

    Ok(())
}
