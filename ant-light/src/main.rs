//! ANT Light Controller
//!
//! A console application that searches for ANT+ lights, lists them with
//! their current intensity, and lets the user change it. It runs against the
//! simulated radio service configured in the settings file.

mod console;
mod settings;

use std::sync::Arc;

use ant_link::{LinkController, LinkEvent};
use ant_sim::{SimulatedRadio, VirtualPeer};
use console::{ConsoleCommand, HELP};
use settings::Settings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn build_radio(settings: &Settings) -> SimulatedRadio {
    let mut radio = SimulatedRadio::new(settings.simulated_channels);
    for peer in &settings.simulated_peers {
        radio = radio.with_peer(VirtualPeer::from_config(peer.clone()));
    }
    radio
}

fn print_list(controller: &LinkController) {
    let values = controller.values();
    if values.is_empty() {
        println!("No lights connected");
        return;
    }
    for (index, reading) in values.iter().enumerate() {
        if let Some(selection) = controller.selection(index) {
            println!("  {}: {} at {}", index + 1, selection.handle, reading);
        }
    }
}

fn print_event(event: &LinkEvent) {
    match event {
        LinkEvent::SearchStarted => println!("Searching..."),
        LinkEvent::SearchFinished { summary } => println!(
            "Search finished: {} of {} channels connected",
            summary.connected, summary.available
        ),
        LinkEvent::NoChannelsAvailable => println!("No free channels on the radio"),
        LinkEvent::LinkConnected { handle } => println!("Found a light on {}", handle),
        LinkEvent::LinkClosed { handle, reason } => println!("Lost {} ({})", handle, reason),
        LinkEvent::ValuesChanged { values } => {
            let shown: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            println!("Values: [{}]", shown.join(", "));
        }
        LinkEvent::ListChanged { .. } => {}
        LinkEvent::Error { source, message } => println!("{} error: {}", source, message),
    }
}

/// Run one command, returning false when the application should exit
async fn execute(
    controller: &LinkController,
    settings: &mut Settings,
    command: ConsoleCommand,
) -> bool {
    let result = match command {
        ConsoleCommand::Search => {
            if controller.start_search().is_none() {
                println!("A search is already running");
            }
            Ok(())
        }
        ConsoleCommand::List => {
            print_list(controller);
            Ok(())
        }
        ConsoleCommand::Set { index, value } => controller.set_intensity(index, value).await,
        ConsoleCommand::Broadcast { index, value } => {
            controller.broadcast_intensity(index, value).await
        }
        ConsoleCommand::Step { index, value } => controller.step_intensity(index, value).await,
        ConsoleCommand::Validate => {
            let evicted = controller.validate().await;
            println!("{} lights removed", evicted);
            Ok(())
        }
        ConsoleCommand::Pause => {
            controller.suspend().await;
            println!("Paused");
            Ok(())
        }
        ConsoleCommand::Resume => {
            controller.resume().await;
            println!("Resumed");
            Ok(())
        }
        ConsoleCommand::Defaults => {
            settings.restore_defaults();
            match settings.save() {
                Ok(path) => println!("Defaults restored in {}", path.display()),
                Err(e) => println!("Could not save settings: {}", e),
            }
            Ok(())
        }
        ConsoleCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        ConsoleCommand::Quit => return false,
    };

    if let Err(e) = result {
        println!("{}", e);
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Include all our crates in the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "antlight=info,ant_protocol=info,ant_link=info,ant_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ANT light controller");

    let mut settings = Settings::load();
    let radio = Arc::new(build_radio(&settings));
    let (controller, mut events) = LinkController::new(radio, settings.link.clone());

    println!("{}", HELP);
    if settings.auto_search {
        controller.start_search();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(command) => {
                        if !execute(&controller, &mut settings, command).await {
                            break;
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
            Some(event) = events.recv() => print_event(&event),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.shutdown().await;
    tracing::info!("Stopped");
    Ok(())
}
