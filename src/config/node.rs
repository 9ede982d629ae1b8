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
use std::collections::HashMap;

use serde::Deserialize;

use super::audio::Audio;
use super::engine::Engine;
use super::net::Net;

/// Default broker URL for nodes that don't specify one.
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5174/ws";

/// Default tempo a renderer starts with before anyone changes it.
pub const DEFAULT_TEMPO: u32 = 120;

/// A YAML representation of a node (renderer or controller) configuration.
#[derive(Deserialize, Clone)]
pub struct Node {
    /// The room to join on the broker.
    room: String,

    /// The broker websocket URL (default: ws://127.0.0.1:5174/ws).
    server: Option<String>,

    /// The audio device configuration. Required for renderers, ignored by
    /// controllers.
    audio: Option<Audio>,

    /// The audio engine configuration.
    #[serde(default)]
    engine: Engine,

    /// The client networking configuration.
    #[serde(default)]
    net: Net,

    /// Sound id to WAV file path, relative to this config file. Renderers
    /// load these into memory at startup.
    #[serde(default)]
    sounds: HashMap<String, String>,

    /// Pad index (0-15) to sound id.
    #[serde(default)]
    pads: HashMap<u8, String>,

    /// The tempo the renderer reports in sync-state until changed.
    tempo: Option<u32>,
}

impl Node {
    /// New will create a new Node configuration.
    pub fn new(
        room: &str,
        server: Option<String>,
        audio: Option<Audio>,
        sounds: HashMap<String, String>,
        pads: HashMap<u8, String>,
    ) -> Node {
        Node {
            room: room.to_string(),
            server,
            audio,
            engine: Engine::default(),
            net: Net::default(),
            sounds,
            pads,
            tempo: None,
        }
    }

    /// Returns the room to join.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Returns the broker websocket URL.
    pub fn server(&self) -> &str {
        self.server.as_deref().unwrap_or(DEFAULT_SERVER_URL)
    }

    /// Returns the audio configuration, if any.
    pub fn audio(&self) -> Option<Audio> {
        self.audio.clone()
    }

    /// Returns the engine configuration.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns the networking configuration.
    pub fn net(&self) -> &Net {
        &self.net
    }

    /// Returns the sound library mapping.
    pub fn sounds(&self) -> &HashMap<String, String> {
        &self.sounds
    }

    /// Returns the pad mappings.
    pub fn pads(&self) -> &HashMap<u8, String> {
        &self.pads
    }

    /// Returns the initial tempo (default: 120).
    pub fn tempo(&self) -> u32 {
        self.tempo.unwrap_or(DEFAULT_TEMPO)
    }
}
