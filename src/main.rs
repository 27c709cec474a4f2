use anyhow::Result;
use chatwire::config::Config;
use chatwire::memory::MemoryStore;
use chatwire::rules::{RuleSelector, RuleStore};
use chatwire::store::Database;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chatwire")]
#[command(version)]
#[command(about = "Group-chat automation agent.", long_about = None)]
struct Cli {
    /// Path to config.toml (default: ~/.chatwire/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with the agent on the console
    Run,

    /// Inspect or remove auto-reply rules
    Rules {
        #[command(subcommand)]
        rules_command: RulesCommands,
    },

    /// Inspect remembered notes
    Memory {
        #[command(subcommand)]
        memory_command: MemoryCommands,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommands {
    /// List the rules of a chat
    List {
        #[arg(long, default_value = "cli")]
        chat: String,
    },
    /// Remove a rule by id, or `all`
    Remove {
        #[arg(long, default_value = "cli")]
        chat: String,
        selector: String,
    },
}

#[derive(Subcommand, Debug)]
enum MemoryCommands {
    /// List notes of a chat, newest first
    List {
        #[arg(long, default_value = "cli")]
        chat: String,
        #[arg(long, default_value_t = chatwire::memory::MAX_RECALL)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO.
    // Logs go to stderr so console chat output stays readable.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => chatwire::agent::run(config).await,
        Commands::Rules { rules_command } => handle_rules_command(&config, rules_command),
        Commands::Memory { memory_command } => handle_memory_command(&config, memory_command),
    }
}

fn handle_rules_command(config: &Config, command: RulesCommands) -> Result<()> {
    let store = RuleStore::new(
        Database::new(config.database_path()),
        Duration::from_secs(config.rules.cache_ttl_secs),
    );
    match command {
        RulesCommands::List { chat } => {
            let listing = store.list_rules(&chat)?;
            if listing.is_empty() {
                println!("No auto-reply rules in chat '{chat}'.");
                return Ok(());
            }
            for entry in listing {
                let status = entry
                    .compile_error
                    .map_or_else(String::new, |error| format!("  [invalid: {error}]"));
                println!(
                    "{}  {}  /{}/ -> {}{status}",
                    entry.rule.id,
                    entry.rule.created_at.to_rfc3339(),
                    entry.rule.pattern,
                    entry.rule.template
                );
            }
            Ok(())
        }
        RulesCommands::Remove { chat, selector } => {
            let selector = RuleSelector::parse(&selector)
                .ok_or_else(|| anyhow::anyhow!("Rule id must not be empty"))?;
            let removed = store.remove_rule(&chat, &selector)?;
            println!("Removed {removed} rule(s) from chat '{chat}'.");
            Ok(())
        }
    }
}

fn handle_memory_command(config: &Config, command: MemoryCommands) -> Result<()> {
    let store = MemoryStore::new(Database::new(config.database_path()));
    match command {
        MemoryCommands::List { chat, limit } => {
            let notes = store.recall(&chat, limit)?;
            if notes.is_empty() {
                println!("No memories in chat '{chat}'.");
            }
            for note in notes {
                println!("{}  {}  {}", note.id, note.created_at.to_rfc3339(), note.note);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_rules_remove() {
        let cli = Cli::try_parse_from(["chatwire", "rules", "remove", "--chat", "c1", "all"])
            .unwrap();
        match cli.command {
            Commands::Rules {
                rules_command: RulesCommands::Remove { chat, selector },
            } => {
                assert_eq!(chat, "c1");
                assert_eq!(selector, "all");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
