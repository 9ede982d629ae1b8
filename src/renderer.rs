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

//! The renderer node: the one member of a room that makes sound.
//!
//! Pad hits from the room are resolved to sound ids through the pad
//! mappings and handed to the audio engine. When the room asks, the
//! renderer answers with its current tempo and mappings so late joiners
//! converge.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::client::{Handler, Outbound};
use crate::engine::Engine;
use crate::protocol::Envelope;

/// Room state the renderer is authoritative for.
struct RoomState {
    tempo: u32,
    pads: HashMap<u8, String>,
}

/// Drives the audio engine from room traffic.
pub struct Renderer {
    engine: Arc<Engine>,
    state: Mutex<RoomState>,
}

impl Renderer {
    /// Creates a renderer with its initial tempo and pad mappings.
    pub fn new(engine: Arc<Engine>, tempo: u32, pads: HashMap<u8, String>) -> Arc<Renderer> {
        Arc::new(Renderer {
            engine,
            state: Mutex::new(RoomState { tempo, pads }),
        })
    }

    /// Returns the tempo the renderer currently reports.
    pub fn tempo(&self) -> u32 {
        self.state.lock().tempo
    }

    /// The snapshot sent to the room in answer to request-sync.
    fn sync_state(&self) -> Envelope {
        let state = self.state.lock();
        Envelope::SyncState {
            tempo: state.tempo,
            pad_mappings: state.pads.clone(),
        }
    }
}

impl Handler for Renderer {
    fn on_pad_hit(&self, pad: u8, _velocity: Option<u8>) {
        let sound = self.state.lock().pads.get(&pad).cloned();
        match sound {
            Some(sound) => {
                debug!(pad, sound, "Pad hit");
                self.engine.trigger(&sound);
            }
            None => debug!(pad, "No sound mapped to pad"),
        }
    }

    fn on_tempo_change(&self, tempo: u32) {
        info!(tempo, "Tempo changed");
        self.state.lock().tempo = tempo;
    }

    fn on_request_sync(&self, out: &Outbound) {
        debug!("Answering request-sync");
        let _ = out.send(self.sync_state());
    }

    // The renderer is the state authority; a sync-state frame arriving here
    // is its own echo (or a second renderer misbehaving) and carries
    // nothing to apply.
    fn on_sync_state(&self, _tempo: u32, _pad_mappings: HashMap<u8, String>) {
        debug!("Ignoring sync-state echo");
    }
}
