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
use serde::Deserialize;

/// Default maximum number of concurrent voices.
pub const DEFAULT_MAX_POLYPHONY: usize = 32;

/// Default envelope attack in milliseconds.
pub const DEFAULT_ATTACK_MS: f32 = 2.0;

/// Default envelope release in milliseconds.
pub const DEFAULT_RELEASE_MS: f32 = 3.0;

/// Which voice a full pool gives up when a new trigger arrives.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStealing {
    /// The voice furthest into its sample. Ties go to the lowest slot index.
    #[default]
    Oldest,
    /// The voice with the lowest envelope level. Same tie-break.
    Quietest,
}

/// A YAML representation of the audio engine configuration.
#[derive(Deserialize, Clone, Default)]
pub struct Engine {
    /// The voice pool size (default: 32).
    max_polyphony: Option<usize>,

    /// Envelope attack in milliseconds, valid range 1-3 (default: 2).
    attack_ms: Option<f32>,

    /// Envelope release in milliseconds, valid range 1-3 (default: 3).
    release_ms: Option<f32>,

    /// Voice stealing policy (default: oldest).
    #[serde(default)]
    voice_stealing: VoiceStealing,
}

impl Engine {
    /// New will create a new Engine configuration.
    pub fn new(
        max_polyphony: Option<usize>,
        attack_ms: Option<f32>,
        release_ms: Option<f32>,
        voice_stealing: VoiceStealing,
    ) -> Engine {
        Engine {
            max_polyphony,
            attack_ms,
            release_ms,
            voice_stealing,
        }
    }

    /// Returns the voice pool size (default: 32).
    pub fn max_polyphony(&self) -> usize {
        self.max_polyphony.unwrap_or(DEFAULT_MAX_POLYPHONY).max(1)
    }

    /// Returns the envelope attack in milliseconds, clamped to 1-3.
    pub fn attack_ms(&self) -> f32 {
        self.attack_ms.unwrap_or(DEFAULT_ATTACK_MS).clamp(1.0, 3.0)
    }

    /// Returns the envelope release in milliseconds, clamped to 1-3.
    pub fn release_ms(&self) -> f32 {
        self.release_ms
            .unwrap_or(DEFAULT_RELEASE_MS)
            .clamp(1.0, 3.0)
    }

    /// Returns the voice stealing policy.
    pub fn voice_stealing(&self) -> VoiceStealing {
        self.voice_stealing
    }
}
