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

//! The wire message set shared by the broker and the client transport.
//!
//! Frames are UTF-8 JSON text with a `type` discriminant. Parsing is total:
//! anything malformed, unknown, or out of range comes back as `None` and the
//! caller decides how to answer. The codec itself never fails.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Number of pads on a controller surface.
pub const PAD_COUNT: u8 = 16;

/// Inclusive tempo bounds in beats per minute.
pub const TEMPO_MIN: u32 = 20;
pub const TEMPO_MAX: u32 = 300;

/// The role a connection declares when joining a room.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the audio device and runs the mixer.
    Renderer,
    /// Issues trigger events only.
    Controller,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Renderer => write!(f, "renderer"),
            Role::Controller => write!(f, "controller"),
        }
    }
}

/// A single frame of the room protocol.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    /// Client requests membership of a room with a role.
    Join { room: String, role: Role },
    /// A pad was tapped. Fanned out to the room, sender included.
    PadHit {
        pad: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        velocity: Option<u8>,
    },
    /// Renderer-emitted snapshot of room state for late joiners.
    SyncState {
        tempo: u32,
        #[serde(rename = "pad-mappings")]
        pad_mappings: HashMap<u8, String>,
    },
    /// Any node proposes a tempo; the renderer adopts it.
    TempoChange { tempo: u32 },
    /// Broker-published request for the renderer to emit sync-state.
    RequestSync,
    /// Client keepalive.
    Heartbeat,
    /// Broker answer to a heartbeat.
    Pong,
    /// Broker-reported protocol violation. The socket stays open.
    Error { message: String },
}

impl Envelope {
    /// Parses a text frame. Returns `None` for malformed JSON, unknown types,
    /// and fields outside their valid range.
    pub fn parse(text: &str) -> Option<Envelope> {
        let envelope: Envelope = serde_json::from_str(text).ok()?;
        envelope.validate().then_some(envelope)
    }

    /// Range checks for the fields serde cannot express on its own.
    fn validate(&self) -> bool {
        match self {
            Envelope::Join { room, .. } => !room.is_empty(),
            Envelope::PadHit { pad, velocity } => {
                *pad < PAD_COUNT && velocity.map_or(true, |v| v <= 127)
            }
            Envelope::SyncState { tempo, pad_mappings } => {
                (TEMPO_MIN..=TEMPO_MAX).contains(tempo)
                    && pad_mappings.keys().all(|pad| *pad < PAD_COUNT)
            }
            Envelope::TempoChange { tempo } => (TEMPO_MIN..=TEMPO_MAX).contains(tempo),
            Envelope::RequestSync | Envelope::Heartbeat | Envelope::Pong => true,
            Envelope::Error { .. } => true,
        }
    }

    /// Serializes the frame to canonical JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization is infallible")
    }

    /// Convenience constructor for broker error replies.
    pub fn error(message: &str) -> Envelope {
        Envelope::Error {
            message: message.to_string(),
        }
    }
}
