// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
mod audio;
mod broker;
mod client;
mod config;
mod engine;
mod playsync;
mod protocol;
mod renderer;
mod samples;
#[cfg(test)]
mod testutil;

use std::collections::HashMap;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::client::{Handler, Transport};
use crate::engine::Engine;
use crate::protocol::{Envelope, Role, PAD_COUNT, TEMPO_MAX, TEMPO_MIN};
use crate::renderer::Renderer;
use crate::samples::SampleLoader;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A collaborative pad sampler."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the room broker.
    Serve {
        /// The path to the broker config. Defaults apply when omitted.
        config_path: Option<String>,
    },
    /// Starts a renderer node: joins a room and plays its triggers.
    Render {
        /// The path to the node config.
        config_path: String,
    },
    /// Starts a controller node: reads pad taps from stdin.
    Control {
        /// The path to the node config.
        config_path: String,
    },
    /// Lists the available audio output devices.
    Devices {},
}

#[tokio::main]
async fn main() {
    // Default logging to off globally, with padroom at info level.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off,padroom=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config_path } => {
            let config = match config_path {
                Some(path) => config::Broker::deserialize(Path::new(&path))?,
                None => config::Broker::default(),
            };
            broker::Broker::new(config).serve().await?;
        }
        Commands::Render { config_path } => {
            let path = Path::new(&config_path);
            let node = config::Node::deserialize(path)?;

            let device = audio::get_device(node.audio())?;
            let engine = Arc::new(Engine::new(device, node.engine().clone()));
            engine.init()?;

            // The library is decoded and rate-converted here, once. The
            // mixer only ever sees device-rate PCM.
            let base_path = path.parent().unwrap_or(Path::new("."));
            let loader = SampleLoader::new(engine.sample_rate());
            for (id, data) in loader.load_library(node.sounds(), base_path)? {
                engine.load_sample(&id, data);
            }

            let renderer = Renderer::new(engine.clone(), node.tempo(), node.pads().clone());
            let transport = Transport::start(
                node.server(),
                node.room(),
                Role::Renderer,
                node.net().clone(),
                renderer,
            );

            info!(room = node.room(), "Renderer running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;

            transport.close().await;
            engine.shutdown();
        }
        Commands::Control { config_path } => {
            let node = config::Node::deserialize(Path::new(&config_path))?;
            let transport = Transport::start(
                node.server(),
                node.room(),
                Role::Controller,
                node.net().clone(),
                Arc::new(ControlSurface {}),
            );

            println!(
                "Controller for room {}. Enter a pad index (0-{}), optionally with a velocity \
                 (e.g. \"3 100\"), \"tempo <bpm>\", or \"quit\".",
                node.room(),
                PAD_COUNT - 1
            );
            read_pad_taps(&transport).await?;
            transport.close().await;
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
    }

    Ok(())
}

/// Reads pad taps and tempo changes from stdin until EOF or "quit".
async fn read_pad_taps(transport: &Transport) -> Result<(), Box<dyn Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        match parse_tap(&line) {
            Some(envelope) => transport.send(envelope),
            None => {
                if line.trim() == "quit" {
                    break;
                }
                if !line.trim().is_empty() {
                    eprintln!("Unrecognized input: {}", line.trim());
                }
            }
        }
    }

    Ok(())
}

/// Parses one line of controller input into a frame, if it is one.
fn parse_tap(line: &str) -> Option<Envelope> {
    let mut parts = line.trim().split_whitespace();
    let first = parts.next()?;

    if first == "tempo" {
        let tempo: u32 = parts.next()?.parse().ok()?;
        if !(TEMPO_MIN..=TEMPO_MAX).contains(&tempo) {
            eprintln!("Tempo must be between {} and {}", TEMPO_MIN, TEMPO_MAX);
            return None;
        }
        return Some(Envelope::TempoChange { tempo });
    }

    let pad: u8 = first.parse().ok()?;
    if pad >= PAD_COUNT {
        eprintln!("Pad index must be below {}", PAD_COUNT);
        return None;
    }
    let velocity = match parts.next() {
        Some(velocity) => {
            let velocity: u8 = velocity.parse().ok()?;
            if velocity > 127 {
                eprintln!("Velocity must be at most 127");
                return None;
            }
            Some(velocity)
        }
        None => None,
    };
    Some(Envelope::PadHit { pad, velocity })
}

/// The controller's view of the room: log what happens in it.
struct ControlSurface {}

impl Handler for ControlSurface {
    fn on_pad_hit(&self, pad: u8, velocity: Option<u8>) {
        info!(pad, velocity, "Pad hit in room");
    }

    fn on_sync_state(&self, tempo: u32, pad_mappings: HashMap<u8, String>) {
        info!(tempo, pads = pad_mappings.len(), "Room state received");
    }

    fn on_tempo_change(&self, tempo: u32) {
        info!(tempo, "Room tempo changed");
    }
}
