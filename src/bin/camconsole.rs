//! Operator CLI for the camera console
//!
//! Connects to a signaling server, keeps the camera list current, and
//! drives previews from a line-oriented prompt.

use anyhow::{Context, Result};
use camconsole::{Camera, Console, ConsoleConfig, LogSink, SlotId};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser, Debug)]
#[clap(about, version, author)]
/// Program arguments
struct Args {
    /// Signaling server WebSocket URL
    #[clap(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    server: String,

    /// STUN/TURN server URLs
    #[clap(long, default_value = "stun:stun.l.google.com:19302")]
    ice_server: Vec<String>,

    /// Delay between reconnect attempts, in milliseconds
    #[clap(long, default_value_t = 1000)]
    reconnect_delay_ms: u64,
}

fn initialize_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camconsole=info".into()),
        )
        .init();
}

const HELP: &str = "\
commands:
  list                          show cached cameras
  refresh                       re-request the camera list
  add <name> <location> <url>   create a camera
  edit <id> <name> <location> <url>
  remove <id>                   delete a camera
  preview <camera-id>           open a live preview
  stop <camera-id>              stop a preview
  status                        show the current phase text
  quit";

#[tokio::main]
async fn main() -> Result<()> {
    initialize_logging();
    let args = Args::parse();

    let mut config = ConsoleConfig::new(args.server);
    config.ice_servers = args.ice_server;
    config.reconnect_delay = Duration::from_millis(args.reconnect_delay_ms);

    let console =
        Console::spawn(config, Arc::new(LogSink)).context("failed to start the console")?;
    let status = console.status();
    info!("console started; type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [] => {}
            ["help"] => println!("{HELP}"),
            ["list"] => {
                for entry in console.cameras().await {
                    println!(
                        "{}  {}  {}  {}  preview={}",
                        entry.camera.id,
                        entry.camera.name,
                        entry.camera.location,
                        entry.camera.url,
                        if entry.preview_open { "open" } else { "closed" }
                    );
                }
            }
            ["refresh"] => console.refresh_cameras().await?,
            ["add", name, location, url] => {
                console.add_camera(*name, *location, *url).await?;
            }
            ["edit", id, name, location, url] => {
                console
                    .edit_camera(Camera {
                        id: (*id).to_string(),
                        name: (*name).to_string(),
                        location: (*location).to_string(),
                        url: (*url).to_string(),
                    })
                    .await?;
            }
            ["remove", id] => console.remove_camera(*id).await?,
            ["preview", camera_id] => {
                console
                    .request_preview(SlotId::new(*camera_id), *camera_id)
                    .await?;
            }
            ["stop", camera_id] => {
                console.stop_preview(SlotId::new(*camera_id)).await?;
            }
            ["status"] => println!("{}", *status.borrow()),
            ["quit"] | ["exit"] => break,
            other => println!("unknown command {other:?}; type 'help'"),
        }
    }

    console.shutdown().await;
    Ok(())
}
