//! Interactive REPL.

use crate::commands;
use crate::Commands;
use clap::Parser;
use colored::Colorize;
use ncplink_host::connection::Endpoint;
use ncplink_host::Client;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::path::PathBuf;

const HISTORY_FILE: &str = ".ncplink_history";

/// One REPL line, parsed with the same grammar as the one-shot commands.
#[derive(Parser)]
#[command(name = "", no_binary_name = true, disable_version_flag = true)]
struct ReplLine {
    #[command(subcommand)]
    command: Commands,
}

pub async fn run(client: Client, endpoint: Endpoint) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "ncplink CLI".bold().cyan());
    println!("Connecting to {}...", endpoint);

    client.connect().await?;
    println!("{}", "Connected!".green());

    let _reader = client.spawn_read_loop();
    tokio::task::yield_now().await;

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = history_path();
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "ncp>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }

                if !client.is_connected() {
                    println!("{}", "Connection closed".red());
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    let _ = client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

fn history_path() -> PathBuf {
    home::home_dir()
        .map(|h| h.join(HISTORY_FILE))
        .unwrap_or_else(|| HISTORY_FILE.into())
}

/// Runs one line. `Ok(None)` ends the session.
async fn execute_repl_command(
    client: &Client,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    match parts.first().map(|s| s.to_lowercase()).as_deref() {
        Some("quit" | "exit" | "q") => return Ok(None),
        Some("repl" | "watch") => {
            return Ok(Some(
                "Not available inside the REPL; events are printed by `watch` on the command line"
                    .yellow()
                    .to_string(),
            ))
        }
        _ => {}
    }

    let parsed = match ReplLine::try_parse_from(parts) {
        Ok(parsed) => parsed,
        // Also covers `help`, which clap reports as an error carrying the text.
        Err(e) => return Ok(Some(e.render().to_string())),
    };

    commands::execute(client, parsed.command).await.map(Some)
}
