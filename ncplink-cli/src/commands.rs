//! Command execution.

use crate::Commands;
use colored::Colorize;
use ncplink_host::{Client, HostEvent};
use ncplink_protocol::command::describe;
use ncplink_protocol::message::{FormNetworkParams, ScanRequest};
use ncplink_protocol::{Command, DeviceRole};
use serde_json::{json, Value};
use std::time::Duration;

/// How long `form` and `scan` wait for their completion event.
const EVENT_WAIT: Duration = Duration::from_secs(30);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> CliResult<String> {
    match cmd {
        Commands::Repl | Commands::Watch => Ok(String::new()),

        Commands::Info { json } => {
            let info = collect_info(client).await?;
            if json {
                Ok(format_json(&info))
            } else {
                Ok(format_info(&info))
            }
        }

        Commands::Init => {
            client.init().await?;
            Ok("Initialized".green().to_string())
        }

        Commands::Start { no_autostart } => {
            client.start(!no_autostart).await?;
            Ok(format!(
                "{} (autostart: {})",
                "Started".green(),
                if no_autostart { "off" } else { "on" }
            ))
        }

        Commands::State => {
            let state = client.state().await?;
            Ok(state.to_string().yellow().to_string())
        }

        Commands::Form => {
            let mut events = client.connection().subscribe();
            client.form_network(&FormNetworkParams::default()).await?;
            let event = wait_for(&mut events, |e| matches!(e, HostEvent::NetworkFormed(_))).await?;
            Ok(format!("{}", event.to_string().green()))
        }

        Commands::PermitJoin { secs } => {
            client.permit_joining(secs).await?;
            if secs == 0 {
                Ok("Joining closed".yellow().to_string())
            } else {
                Ok(format!("{} for {}s", "Joining open".green(), secs))
            }
        }

        Commands::Leave => {
            client.leave().await?;
            Ok("Left network".green().to_string())
        }

        Commands::Scan { mask, duration } => {
            let request = ScanRequest {
                channel_mask: parse_u32(&mask)?,
                scan_duration: duration,
            };
            let mut events = client.connection().subscribe();
            client.start_scan(&request).await?;
            let event = wait_for(&mut events, |e| matches!(e, HostEvent::ScanComplete(_))).await?;

            let result = match event {
                HostEvent::ScanComplete(result) => result,
                other => return Ok(other.to_string()),
            };
            if result.networks.is_empty() {
                return Ok("No networks found".yellow().to_string());
            }
            let mut output = String::new();
            for network in &result.networks {
                output.push_str(&format!(
                    "  pan {} ext {} ch {}{}\n",
                    format!("{:#06x}", network.pan_id).cyan(),
                    network.extended_pan_id,
                    network.logical_channel,
                    if network.permit_joining {
                        " (open)".green().to_string()
                    } else {
                        String::new()
                    }
                ));
            }
            Ok(output)
        }

        Commands::PanId { value } => match value {
            Some(value) => {
                let pan_id = parse_u16(&value)?;
                client.set_pan_id(pan_id).await?;
                Ok(format!("{} {:#06x}", "PAN ID set to".green(), pan_id))
            }
            None => Ok(format!("{:#06x}", client.pan_id().await?)),
        },

        Commands::Channel => {
            let channel = client.channel().await?;
            let primary = client.primary_channel_mask().await?;
            let secondary = client.secondary_channel_mask().await?;
            Ok(format!(
                "Channel: {}\n  Primary mask: {:#010x}\n  Secondary mask: {:#010x}",
                channel.to_string().cyan(),
                primary,
                secondary
            ))
        }

        Commands::TxPower { value } => match value {
            Some(dbm) => {
                client.set_tx_power(dbm).await?;
                Ok(format!("{} {} dBm", "TX power set to".green(), dbm))
            }
            None => Ok(format!("{} dBm", client.tx_power().await?)),
        },

        Commands::Role { value } => match value {
            Some(value) => {
                let role: DeviceRole = value.parse()?;
                client.set_role(role).await?;
                Ok(format!("{} {}", "Role set to".green(), role))
            }
            None => Ok(client.role().await?.to_string()),
        },

        Commands::Call { command, payload } => {
            let id = parse_command_id(&command)?;
            let input = match payload {
                Some(hex_str) => hex::decode(hex_str.trim_start_matches("0x"))?,
                None => Vec::new(),
            };
            let response = client.call(id, &input).await?;
            Ok(format!(
                "{} {}",
                describe(id).cyan(),
                if response.is_empty() {
                    "(empty)".dimmed().to_string()
                } else {
                    hex::encode(&response)
                }
            ))
        }
    }
}

/// Reads the main network parameters.
pub async fn collect_info(client: &Client) -> CliResult<Value> {
    Ok(json!({
        "state": client.state().await?.to_string(),
        "role": client.role().await?.to_string(),
        "pan_id": format!("{:#06x}", client.pan_id().await?),
        "extended_pan_id": client.extended_pan_id().await?.to_string(),
        "channel": client.channel().await?,
        "short_address": format!("{:#06x}", client.short_address().await?),
        "ieee_address": client.ieee_address().await?.to_string(),
        "tx_power": client.tx_power().await?,
        "update_id": client.update_id().await?,
    }))
}

pub fn format_info(info: &Value) -> String {
    let mut output = format!("{}\n", "Co-processor".bold());
    if let Some(fields) = info.as_object() {
        for (key, value) in fields {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            output.push_str(&format!("  {}: {}\n", key, value.cyan()));
        }
    }
    output
}

async fn wait_for(
    events: &mut tokio::sync::broadcast::Receiver<HostEvent>,
    matches: impl Fn(&HostEvent) -> bool,
) -> CliResult<HostEvent> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return Ok(event),
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    };
    Ok(tokio::time::timeout(EVENT_WAIT, wait).await??)
}

/// Parses a command id given as a number or a name.
pub fn parse_command_id(s: &str) -> CliResult<u16> {
    if let Ok(id) = parse_u16(s) {
        return Ok(id);
    }
    Ok(s.parse::<Command>()?.id())
}

pub fn parse_u16(s: &str) -> CliResult<u16> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => Ok(u16::from_str_radix(hex, 16)?),
        None => Ok(s.parse()?),
    }
}

pub fn parse_u32(s: &str) -> CliResult<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => Ok(u32::from_str_radix(hex, 16)?),
        None => Ok(s.parse()?),
    }
}

fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
