//! ncplink-cli - Command-line interface for a network co-processor
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use ncplink_host::{Client, ConnectionConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ncplink-cli")]
#[command(about = "Command-line interface for a Zigbee network co-processor")]
#[command(version)]
struct Cli {
    /// Co-processor address (TCP)
    #[arg(short, long, env = "NCPLINK_NCP", default_value = "127.0.0.1:5540")]
    ncp: SocketAddr,

    /// Serial device or pipe to use instead of TCP
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Request timeout in milliseconds
    #[arg(short, long, env = "NCPLINK_TIMEOUT_MS", default_value = "3000")]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Show network parameters
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Initialize the co-processor platform
    Init,

    /// Start the network stack
    Start {
        /// Do not form a network automatically
        #[arg(long)]
        no_autostart: bool,
    },

    /// Show the network state
    State,

    /// Form a network and wait for it to come up
    Form,

    /// Open the network for joining
    PermitJoin {
        /// Window in seconds (0 closes it)
        secs: u8,
    },

    /// Leave the network
    Leave,

    /// Scan for networks
    Scan {
        /// Channel mask (hex or decimal)
        #[arg(short, long, default_value = "0x07fff800")]
        mask: String,

        /// Scan duration exponent
        #[arg(short, long, default_value = "3")]
        duration: u8,
    },

    /// Get or set the PAN ID
    PanId {
        /// New PAN ID (hex or decimal)
        value: Option<String>,
    },

    /// Show the current channel and channel masks
    Channel,

    /// Get or set the transmit power
    TxPower {
        /// New power in dBm
        #[arg(allow_hyphen_values = true)]
        value: Option<i8>,
    },

    /// Get or set the device role
    Role {
        /// coordinator, router or end_device
        value: Option<String>,
    },

    /// Send a raw request
    Call {
        /// Command identifier or name (e.g. 0x0002, STATE)
        command: String,

        /// Payload as hex
        payload: Option<String>,
    },

    /// Stream events until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ConnectionConfig::new()
        .with_tcp(cli.ncp)
        .with_request_timeout(Duration::from_millis(cli.timeout));
    if let Some(ref path) = cli.device {
        config = config.with_device(path.clone());
    }
    let endpoint = config.endpoint.clone();
    let client = Client::new(config)?;

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, endpoint).await?;
        }
        Some(Commands::Watch) => {
            connect(&client).await?;
            let mut events = client.connection().subscribe();
            let mut reader = client.spawn_read_loop();
            tokio::task::yield_now().await;

            eprintln!("{} {}", "Watching".green(), endpoint.to_string().cyan());
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(e) => println!("{}", e),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                eprintln!("{}: lagged {} events", "Warning".yellow(), n);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                                eprintln!("{}", "Connection closed".red());
                                break;
                            }
                        }
                    }
                    _ = &mut reader => {
                        eprintln!("{}", "Connection closed".red());
                        break;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping watch...".dimmed());
                        break;
                    }
                }
            }

            client.close().await?;
        }
        Some(cmd) => {
            connect(&client).await?;
            client.spawn_read_loop();
            tokio::task::yield_now().await;

            match commands::execute(&client, cmd).await {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    let _ = client.close().await;
                    std::process::exit(1);
                }
            }

            client.close().await?;
        }
    }

    Ok(())
}

async fn connect(client: &Client) -> Result<(), ncplink_host::HostError> {
    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })
}
