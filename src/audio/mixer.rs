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

//! The real-time mixing callback.
//!
//! One mixer lives on the audio thread and owns the sample store and voice
//! pool outright. Control code talks to it only through the command ring,
//! which is drained between blocks. The block path takes no locks, performs
//! no allocation, and never reports an error upward; anything inconsistent
//! inside a voice silences that slot and nothing else.

use ringbuf::traits::Consumer;
use ringbuf::HeapCons;

use crate::audio::store::{SampleData, SampleStore};
use crate::audio::voice::{EnvelopeRamp, VoicePool};
use crate::config;

/// Control messages crossing into the audio thread. PCM ownership moves with
/// the message; the sender keeps nothing.
pub enum Command {
    /// Install PCM under a sound id, replacing any previous binding.
    LoadSample { id: String, data: SampleData },
    /// Remove PCM. Voices bound to it enter release on the next block.
    UnloadSample { id: String },
    /// Start a voice for a sound.
    Trigger { id: String },
    /// All active voices enter release.
    StopAll,
}

/// Planar scratch preallocated at construction. Hosts asking for larger
/// blocks grow it once; typical callbacks are far smaller.
const INITIAL_SCRATCH_FRAMES: usize = 8192;

/// Mixes up to `max_polyphony` voices of preloaded PCM into the output of an
/// audio device callback.
pub struct Mixer {
    store: SampleStore,
    pool: VoicePool,
    ramp: EnvelopeRamp,
    commands: HeapCons<Command>,
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
}

impl Mixer {
    /// Creates a mixer for the given device sample rate. The envelope
    /// increments are fixed here, once, from that rate.
    pub fn new(engine: &config::Engine, sample_rate: u32, commands: HeapCons<Command>) -> Mixer {
        Mixer {
            store: SampleStore::new(),
            pool: VoicePool::new(engine.max_polyphony(), engine.voice_stealing()),
            ramp: EnvelopeRamp::new(engine.attack_ms(), engine.release_ms(), sample_rate),
            commands,
            scratch_left: vec![0.0; INITIAL_SCRATCH_FRAMES],
            scratch_right: vec![0.0; INITIAL_SCRATCH_FRAMES],
        }
    }

    /// Applies pending control messages. Runs between blocks on the audio
    /// thread, so store mutation is never visible mid-block.
    fn drain_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                Command::LoadSample { id, data } => {
                    self.store.load(id, data);
                }
                Command::UnloadSample { id } => {
                    if let Some(removed) = self.store.unload(&id) {
                        self.pool.release_sample(&removed);
                    }
                }
                Command::Trigger { id } => {
                    // A trigger for a sound that isn't loaded is a valid
                    // runtime condition and stays silent.
                    if let Some(data) = self.store.lookup(&id) {
                        let data = data.clone();
                        self.pool.trigger(data);
                    }
                }
                Command::StopAll => self.pool.release_all(),
            }
        }
    }

    /// Mixes one block into an interleaved output buffer with the given
    /// channel count. Mixing is stereo internally; a single-channel host
    /// gets the left channel, extra channels beyond two are zeroed. Returns
    /// the keep-alive flag, which is always true.
    pub fn process_into(&mut self, output: &mut [f32], channels: usize) -> bool {
        let channels = channels.max(1);
        let frames = output.len() / channels;

        self.drain_commands();

        if frames > self.scratch_left.len() {
            self.scratch_left.resize(frames, 0.0);
            self.scratch_right.resize(frames, 0.0);
        }
        let left = &mut self.scratch_left[..frames];
        let right = &mut self.scratch_right[..frames];
        left.fill(0.0);
        right.fill(0.0);

        for voice in self.pool.voices_mut() {
            voice.mix(&self.ramp, left, right);
        }

        // Soft clip while interleaving. tanh keeps high polyphony inside
        // (-1, 1) without the edge of a hard clamp.
        for frame in 0..frames {
            let base = frame * channels;
            output[base] = soft_clip(left[frame]);
            if channels >= 2 {
                output[base + 1] = soft_clip(right[frame]);
                for channel in 2..channels {
                    output[base + channel] = 0.0;
                }
            }
        }

        true
    }

    /// Returns the number of currently active voices.
    pub fn active_voices(&self) -> usize {
        self.pool.active_count()
    }

    /// Returns the number of loaded samples.
    pub fn loaded_samples(&self) -> usize {
        self.store.len()
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &VoicePool {
        &self.pool
    }
}

#[inline]
fn soft_clip(sample: f32) -> f32 {
    sample.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::voice::VoiceState;
    use ringbuf::traits::{Producer, Split};
    use ringbuf::{HeapProd, HeapRb};

    const RATE: u32 = 48_000;

    fn test_mixer(polyphony: usize) -> (Mixer, HeapProd<Command>) {
        let engine = config::Engine::new(Some(polyphony), None, None, Default::default());
        let (prod, cons) = HeapRb::<Command>::new(256).split();
        (Mixer::new(&engine, RATE, cons), prod)
    }

    fn sine(frequency: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / RATE as f32).sin())
            .collect()
    }

    fn process_blocks(mixer: &mut Mixer, blocks: usize, frames: usize) -> Vec<f32> {
        let mut collected = Vec::new();
        for _ in 0..blocks {
            let mut output = vec![0.0f32; frames * 2];
            assert!(mixer.process_into(&mut output, 2));
            collected.extend(output);
        }
        collected
    }

    #[test]
    fn test_trigger_plays_with_attack_ramp() {
        let (mut mixer, mut commands) = test_mixer(32);
        commands
            .try_push(Command::LoadSample {
                id: "sine".to_string(),
                data: SampleData::mono(sine(440.0, RATE as usize)),
            })
            .ok()
            .expect("push load");
        commands
            .try_push(Command::Trigger {
                id: "sine".to_string(),
            })
            .ok()
            .expect("push trigger");

        let output = process_blocks(&mut mixer, 4, 128);
        assert_eq!(mixer.active_voices(), 1);

        // The attack bounds the sample-to-sample delta at the start. With a
        // 2ms attack at 48kHz the envelope step is 1/96; the sine itself
        // moves slowly, so allow both contributions.
        let attack_inc = 1.0 / (2.0 * RATE as f32 / 1000.0);
        let max_sine_step = 2.0 * std::f32::consts::PI * 440.0 / RATE as f32;
        let bound = attack_inc + max_sine_step;
        let left: Vec<f32> = output.iter().step_by(2).copied().collect();
        // Playback starts from level zero at cursor zero.
        assert_eq!(left[0], 0.0);
        for window in left.windows(2).take(200) {
            assert!(
                (window[1] - window[0]).abs() <= bound,
                "click at start: {} -> {}",
                window[0],
                window[1]
            );
        }
        // By the end of the ramp the sine is audible.
        assert!(left.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_trigger_unknown_sound_is_silent() {
        let (mut mixer, mut commands) = test_mixer(32);
        commands
            .try_push(Command::Trigger {
                id: "missing".to_string(),
            })
            .ok()
            .expect("push trigger");

        let output = process_blocks(&mut mixer, 1, 128);
        assert_eq!(mixer.active_voices(), 0);
        assert!(output.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_unload_releases_bound_voices() {
        let (mut mixer, mut commands) = test_mixer(32);
        commands
            .try_push(Command::LoadSample {
                id: "pad".to_string(),
                data: SampleData::mono(vec![0.5; RATE as usize]),
            })
            .ok()
            .expect("push load");
        commands
            .try_push(Command::Trigger {
                id: "pad".to_string(),
            })
            .ok()
            .expect("push trigger");
        process_blocks(&mut mixer, 2, 128);
        assert_eq!(mixer.active_voices(), 1);

        commands
            .try_push(Command::UnloadSample {
                id: "pad".to_string(),
            })
            .ok()
            .expect("push unload");
        // One block flips the voice into release; the 3ms ramp finishes
        // within the next two at 48kHz.
        process_blocks(&mut mixer, 3, 128);
        assert_eq!(mixer.active_voices(), 0);
        assert_eq!(mixer.loaded_samples(), 0);
    }

    #[test]
    fn test_load_is_idempotent() {
        let (mut mixer, mut commands) = test_mixer(32);
        for _ in 0..2 {
            commands
                .try_push(Command::LoadSample {
                    id: "pad".to_string(),
                    data: SampleData::mono(vec![0.25; 64]),
                })
                .ok()
                .expect("push load");
        }
        process_blocks(&mut mixer, 1, 128);
        assert_eq!(mixer.loaded_samples(), 1);

        commands
            .try_push(Command::Trigger {
                id: "pad".to_string(),
            })
            .ok()
            .expect("push trigger");
        process_blocks(&mut mixer, 1, 128);
        assert_eq!(mixer.active_voices(), 1);
    }

    #[test]
    fn test_stop_all_releases_everything() {
        let (mut mixer, mut commands) = test_mixer(32);
        commands
            .try_push(Command::LoadSample {
                id: "pad".to_string(),
                data: SampleData::mono(vec![0.5; RATE as usize]),
            })
            .ok()
            .expect("push load");
        for _ in 0..4 {
            commands
                .try_push(Command::Trigger {
                    id: "pad".to_string(),
                })
                .ok()
                .expect("push trigger");
        }
        process_blocks(&mut mixer, 1, 128);
        assert_eq!(mixer.active_voices(), 4);

        commands.try_push(Command::StopAll).ok().expect("push stop");
        process_blocks(&mut mixer, 3, 128);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_thirty_third_trigger_steals() {
        let (mut mixer, mut commands) = test_mixer(32);
        commands
            .try_push(Command::LoadSample {
                id: "pad".to_string(),
                data: SampleData::mono(vec![0.1; RATE as usize]),
            })
            .ok()
            .expect("push load");
        for _ in 0..32 {
            commands
                .try_push(Command::Trigger {
                    id: "pad".to_string(),
                })
                .ok()
                .expect("push trigger");
        }
        // Short blocks keep the voices inside their 96-frame attack so the
        // steal is observable mid-ramp.
        process_blocks(&mut mixer, 1, 32);
        assert_eq!(mixer.active_voices(), 32);

        commands
            .try_push(Command::Trigger {
                id: "pad".to_string(),
            })
            .ok()
            .expect("push trigger");
        process_blocks(&mut mixer, 1, 32);

        // Still exactly 32 voices. All cursors were tied, so the steal took
        // slot 0, which restarted and is now freshly attacking behind the
        // rest.
        assert_eq!(mixer.active_voices(), 32);
        let voices = mixer.pool().voices();
        assert_eq!(voices[0].state(), VoiceState::Attack);
        assert!(voices[0].position() < voices[1].position());
        assert!(voices[0].env_level() < voices[1].env_level());
    }

    #[test]
    fn test_soft_clip_bounds_output() {
        let (mut mixer, mut commands) = test_mixer(32);
        // 32 voices of 0.2 sum to 6.4, deep in tanh saturation but far
        // enough from 1.0 that f32 rounding can't touch the bound.
        commands
            .try_push(Command::LoadSample {
                id: "loud".to_string(),
                data: SampleData::mono(vec![0.2; RATE as usize]),
            })
            .ok()
            .expect("push load");
        for _ in 0..32 {
            commands
                .try_push(Command::Trigger {
                    id: "loud".to_string(),
                })
                .ok()
                .expect("push trigger");
        }

        let output = process_blocks(&mut mixer, 8, 128);
        assert!(output.iter().all(|s| s.abs() < 1.0));
        // 32 stacked full-scale voices saturate well past 0.9.
        assert!(output.iter().any(|s| s.abs() > 0.9));
    }

    #[test]
    fn test_mono_host_gets_left_channel() {
        let (mut mixer, mut commands) = test_mixer(32);
        commands
            .try_push(Command::LoadSample {
                id: "pad".to_string(),
                data: SampleData::stereo(vec![0.5; 1024], vec![-0.5; 1024]),
            })
            .ok()
            .expect("push load");
        commands
            .try_push(Command::Trigger {
                id: "pad".to_string(),
            })
            .ok()
            .expect("push trigger");

        let mut output = vec![0.0f32; 256];
        assert!(mixer.process_into(&mut output, 1));
        // Mono output carries the left (positive) channel only.
        assert!(output[200] > 0.0);
    }

    #[test]
    fn test_extra_channels_are_zeroed() {
        let (mut mixer, mut commands) = test_mixer(32);
        commands
            .try_push(Command::LoadSample {
                id: "pad".to_string(),
                data: SampleData::mono(vec![0.5; 1024]),
            })
            .ok()
            .expect("push load");
        commands
            .try_push(Command::Trigger {
                id: "pad".to_string(),
            })
            .ok()
            .expect("push trigger");

        let mut output = vec![1.0f32; 128 * 4];
        mixer.process_into(&mut output, 4);
        for frame in output.chunks(4) {
            assert_eq!(frame[2], 0.0);
            assert_eq!(frame[3], 0.0);
        }
    }
}
