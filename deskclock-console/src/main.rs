//! Remote command console for the desk clock
//!
//! Publishes one command to `<root>/sys/commands/request_id=<uuid>` and waits
//! for the device to acknowledge it on the matching response topic.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deskclock_link::command::{Topics, REQUEST_ID_MARKER};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "deskclock-console", version, about = "Send one command to a desk clock")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Topic root of the target device
    #[arg(long, default_value = "$oc/devices/deskclock")]
    root: String,

    /// Seconds to wait for the acknowledgement
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum ConsoleCommand {
    /// LED strip: single, all, rainbow or off
    Rgb {
        mode: String,
        #[arg(long, default_value_t = 0)]
        index: usize,
        #[arg(long, default_value_t = 0)]
        red: u8,
        #[arg(long, default_value_t = 0)]
        green: u8,
        #[arg(long, default_value_t = 0)]
        blue: u8,
        /// Rainbow frame delay in ms
        #[arg(long)]
        speed: Option<u16>,
    },
    /// Alarm slot 0
    Alarm {
        hour: u8,
        minute: u8,
        /// Sunday..Saturday
        week: String,
        #[arg(long)]
        off: bool,
    },
    /// Song by index; ui is Full, Lite or No
    Play {
        index: usize,
        #[arg(long, default_value = "Full")]
        ui: String,
    },
    /// Any command name with a JSON `paras` object
    Raw {
        name: String,
        #[arg(default_value = "{}")]
        paras: String,
    },
}

fn command_body(command: &ConsoleCommand) -> Result<Value> {
    let (name, paras) = match command {
        ConsoleCommand::Rgb { mode, index, red, green, blue, speed } => {
            let mut paras = json!({ "mode": mode });
            match mode.as_str() {
                "single" => {
                    paras["index"] = json!(index);
                    paras["Red"] = json!(red);
                    paras["Green"] = json!(green);
                    paras["Blue"] = json!(blue);
                }
                "all" => {
                    paras["Red"] = json!(red);
                    paras["Green"] = json!(green);
                    paras["Blue"] = json!(blue);
                }
                "rainbow" => {
                    if let Some(speed) = speed {
                        paras["speed"] = json!(speed);
                    }
                }
                _ => {}
            }
            ("RGB", paras)
        }
        ConsoleCommand::Alarm { hour, minute, week, off } => (
            "Alarm",
            json!({ "Hour": hour, "Minute": minute, "Week": week, "On": !off }),
        ),
        ConsoleCommand::Play { index, ui } => {
            ("play_song", json!({ "Song_index": index, "UI": ui }))
        }
        ConsoleCommand::Raw { name, paras } => {
            let paras: Value = serde_json::from_str(paras).context("paras is not valid JSON")?;
            return Ok(json!({ "command_name": name, "paras": paras }));
        }
    };
    Ok(json!({ "command_name": name, "paras": paras }))
}

fn is_success(payload: &[u8]) -> bool {
    serde_json::from_slice::<Value>(payload)
        .map(|body| body["result_code"] == 0)
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskclock_console=info".into()),
        )
        .init();

    let args = Args::parse();
    let body = serde_json::to_vec(&command_body(&args.command)?)?;

    let request_id = Uuid::new_v4().to_string();
    let topics = Topics::new(&args.root);
    let command_topic = format!("{}{}{}", topics.commands, REQUEST_ID_MARKER, request_id);
    let response_topic = topics.response_topic(Some(&request_id));

    let client_id = format!("deskclock-console-{}", &request_id[..8]);
    let mut options = MqttOptions::new(client_id, &args.host, args.port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    client
        .subscribe(&response_topic, QoS::AtMostOnce)
        .await
        .context("Failed to queue subscription")?;

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    loop {
        let event = match timeout_at(deadline, eventloop.poll()).await {
            Ok(event) => event,
            Err(_) => anyhow::bail!("No acknowledgement for {} within {}s", request_id, args.timeout),
        };

        match event {
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                client
                    .publish(&command_topic, QoS::AtMostOnce, false, body.clone())
                    .await
                    .context("Failed to queue command")?;
                info!("Command sent to {}", command_topic);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == response_topic => {
                let text = String::from_utf8_lossy(&publish.payload);
                if is_success(&publish.payload) {
                    info!("Acknowledged: {}", text);
                    return Ok(());
                }
                anyhow::bail!("Device answered with a failure: {}", text);
            }
            Ok(other) => debug!("Event: {:?}", other),
            Err(e) => {
                warn!("Broker connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
