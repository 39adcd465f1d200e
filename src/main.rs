//! Thin terminal shell around the bridge library.
//!
//! All protocol logic lives in the library; this binary only forwards
//! commands and renders events as JSON lines, one per status update.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use senselink::{BluetoothManager, OpenGate};

fn setup_logging() {
    env_logger::init();
    info!("logging initialized");
}

fn print_help() {
    eprintln!("commands: s = rescan, l = list devices, c <index> = connect, d = disconnect, q = quit");
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let mut manager = BluetoothManager::new(Arc::new(OpenGate)).await?;
    let mut events = manager.events();

    // Event renderer: every event overwrites the previous status, so a
    // plain line-per-event dump is enough for a terminal.
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!("could not render event: {e}"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    error!("event renderer lagged, {missed} events missed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    manager.start_scan().await?;
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("s") => {
                if let Err(e) = manager.start_scan().await {
                    eprintln!("scan failed: {e}");
                }
            }
            Some("l") => {
                for (index, device) in manager.devices().iter().enumerate() {
                    eprintln!("[{index}] {} ({})", device.display_name(), device.address);
                }
            }
            Some("c") => {
                let Some(index) = parts.next().and_then(|s| s.parse::<usize>().ok()) else {
                    eprintln!("usage: c <index>");
                    continue;
                };
                let Some(device) = manager.devices().get(index).cloned() else {
                    eprintln!("no device at index {index}");
                    continue;
                };
                if let Err(e) = manager.connect(&device.id).await {
                    eprintln!("connect failed: {e}");
                }
            }
            Some("d") => manager.disconnect().await,
            Some("q") => break,
            Some(_) => print_help(),
            None => {}
        }
    }

    manager.shutdown().await;
    Ok(())
}
