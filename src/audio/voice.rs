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

//! Voice slots and the per-voice amplitude envelope.
//!
//! The pool is allocated once and reused for the life of the process. Voices
//! ramp in over the attack and out over the release so triggers and steals
//! never produce a discontinuity in the output.

use crate::audio::store::SampleData;
use crate::config::VoiceStealing;

/// Per-voice lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Attack,
    Sustain,
    Release,
}

/// Per-frame envelope increments, derived from the device sample rate once
/// at mixer construction.
#[derive(Clone, Copy)]
pub struct EnvelopeRamp {
    attack_inc: f32,
    release_inc: f32,
}

impl EnvelopeRamp {
    /// Computes increments so the attack spans `attack_ms` and the release
    /// spans `release_ms` at the given rate. Both are clamped to 1-3 ms.
    pub fn new(attack_ms: f32, release_ms: f32, sample_rate: u32) -> EnvelopeRamp {
        let frames = |ms: f32| (ms.clamp(1.0, 3.0) * sample_rate as f32 / 1000.0).max(1.0);
        EnvelopeRamp {
            attack_inc: 1.0 / frames(attack_ms),
            release_inc: 1.0 / frames(release_ms),
        }
    }

    /// The largest sample-to-sample envelope step during attack.
    pub fn attack_inc(&self) -> f32 {
        self.attack_inc
    }

    /// The largest sample-to-sample envelope step during release.
    pub fn release_inc(&self) -> f32 {
        self.release_inc
    }
}

/// One concurrent playback of a sample. Owned exclusively by the audio
/// callback; constructed once and rebound on every trigger.
pub struct Voice {
    state: VoiceState,
    sample: Option<SampleData>,
    position: usize,
    env_level: f32,
    released_at: usize,
}

impl Voice {
    fn new() -> Voice {
        Voice {
            state: VoiceState::Idle,
            sample: None,
            position: 0,
            env_level: 0.0,
            released_at: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != VoiceState::Idle
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn env_level(&self) -> f32 {
        self.env_level
    }

    /// Playback cursor in frames since the voice started.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn sample(&self) -> Option<&SampleData> {
        self.sample.as_ref()
    }

    /// Binds the voice to a sample and starts the attack from level zero.
    /// Overwriting an active voice this way is the click-free steal: the new
    /// ramp starts at zero, so there is no step in the output.
    fn start(&mut self, sample: SampleData) {
        self.state = VoiceState::Attack;
        self.sample = Some(sample);
        self.position = 0;
        self.env_level = 0.0;
        self.released_at = 0;
    }

    /// Moves an active voice into release. Idle voices are unaffected.
    pub fn release(&mut self) {
        if self.is_active() && self.state != VoiceState::Release {
            self.state = VoiceState::Release;
            self.released_at = self.position;
        }
    }

    fn reset(&mut self) {
        self.state = VoiceState::Idle;
        self.sample = None;
        self.position = 0;
        self.env_level = 0.0;
    }

    /// Mixes this voice into the planar block, advancing cursor and envelope.
    ///
    /// Envelope per frame: attack ramps up and switches to sustain at 1;
    /// sustain holds; release ramps down and idles the voice at 0. A cursor
    /// that reaches the sample length flips the voice into release, and
    /// reads past the end hold the final frame so the release has something
    /// to ramp down.
    pub fn mix(&mut self, ramp: &EnvelopeRamp, left: &mut [f32], right: &mut [f32]) {
        if self.state == VoiceState::Idle {
            return;
        }
        let sample = match self.sample.clone() {
            Some(sample) => sample,
            None => {
                self.reset();
                return;
            }
        };
        let frames = sample.frames();

        for i in 0..left.len() {
            if self.state != VoiceState::Release && self.position >= frames {
                self.release();
            }

            match self.state {
                VoiceState::Attack => {
                    self.env_level += ramp.attack_inc;
                    if self.env_level >= 1.0 {
                        self.env_level = 1.0;
                        self.state = VoiceState::Sustain;
                    }
                }
                VoiceState::Sustain => {}
                VoiceState::Release => {
                    self.env_level -= ramp.release_inc;
                    if self.env_level <= 0.0 {
                        self.reset();
                        return;
                    }
                }
                VoiceState::Idle => return,
            }

            if frames > 0 {
                let (l, r) = sample.frame(self.position.min(frames - 1));
                left[i] += l * self.env_level;
                right[i] += r * self.env_level;
            }
            self.position = self.position.saturating_add(1);
        }
    }
}

/// A fixed-capacity pool of voices. Never grows or shrinks after
/// construction; a full pool steals per the configured policy instead of
/// failing the trigger.
pub struct VoicePool {
    voices: Vec<Voice>,
    stealing: VoiceStealing,
}

impl VoicePool {
    pub fn new(size: usize, stealing: VoiceStealing) -> VoicePool {
        VoicePool {
            voices: (0..size.max(1)).map(|_| Voice::new()).collect(),
            stealing,
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    /// Starts a voice for the sample and returns the slot that was used.
    pub fn trigger(&mut self, sample: SampleData) -> usize {
        let slot = self.select_slot();
        self.voices[slot].start(sample);
        slot
    }

    /// All active voices enter release.
    pub fn release_all(&mut self) {
        for voice in &mut self.voices {
            voice.release();
        }
    }

    /// Releases every voice bound to the given buffer. Called when a sample
    /// is unloaded out from under its voices.
    pub fn release_sample(&mut self, sample: &SampleData) {
        for voice in &mut self.voices {
            if voice.sample().is_some_and(|s| s.same_buffer(sample)) {
                voice.release();
            }
        }
    }

    /// Idle-first, then steal. Both policies break ties toward the lowest
    /// slot index so the choice is deterministic.
    fn select_slot(&self) -> usize {
        if let Some(idle) = self.voices.iter().position(|v| !v.is_active()) {
            return idle;
        }

        let mut chosen = 0;
        match self.stealing {
            VoiceStealing::Oldest => {
                for (i, voice) in self.voices.iter().enumerate() {
                    if voice.position() > self.voices[chosen].position() {
                        chosen = i;
                    }
                }
            }
            VoiceStealing::Quietest => {
                for (i, voice) in self.voices.iter().enumerate() {
                    if voice.env_level() < self.voices[chosen].env_level() {
                        chosen = i;
                    }
                }
            }
        }
        chosen
    }
}
