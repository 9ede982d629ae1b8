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

//! Loads WAV files entirely into memory as stereo f32 PCM.

use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use tracing::{info, warn};

use crate::audio::store::SampleData;

/// Decodes the sound library for a renderer.
pub struct SampleLoader {
    /// Target sample rate for conversion (matches the audio device).
    target_sample_rate: u32,
}

impl SampleLoader {
    /// Creates a new sample loader.
    pub fn new(target_sample_rate: u32) -> SampleLoader {
        SampleLoader { target_sample_rate }
    }

    /// Loads a WAV file into memory, converting it to the target rate if it
    /// was recorded at a different one. Mono files stay mono (the store
    /// aliases the right channel); anything beyond stereo keeps its first
    /// two channels.
    pub fn load(&self, path: &Path) -> Result<SampleData, Box<dyn Error>> {
        let mut reader = WavReader::open(path).map_err(|e| -> Box<dyn Error> {
            format!("failed to open sample {}: {}", path.display(), e).into()
        })?;
        let spec = reader.spec();
        let channel_count = spec.channels as usize;
        if channel_count == 0 {
            return Err(format!("sample {} has no channels", path.display()).into());
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<f32>, hound::Error>>()?,
            SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|s| s as f32 * scale))
                    .collect::<Result<Vec<f32>, hound::Error>>()?
            }
        };

        // De-interleave. Only the first two channels survive.
        let kept = channel_count.min(2);
        if channel_count > 2 {
            warn!(
                path = ?path,
                channels = channel_count,
                "Sample has more than two channels, keeping the first two"
            );
        }
        let frames = interleaved.len() / channel_count;
        let mut channels: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); kept];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, buffer) in channels.iter_mut().enumerate() {
                buffer.push(frame[channel]);
            }
        }

        // Convert to the device rate once, here. The mixer never resamples.
        if spec.sample_rate != self.target_sample_rate {
            info!(
                path = ?path,
                source_rate = spec.sample_rate,
                target_rate = self.target_sample_rate,
                "Converting sample rate"
            );
            for buffer in channels.iter_mut() {
                *buffer = resample(buffer, spec.sample_rate, self.target_sample_rate);
            }
        }

        let data = if kept == 1 {
            SampleData::mono(channels.remove(0))
        } else {
            let right = channels.remove(1);
            SampleData::stereo(channels.remove(0), right)
        };

        info!(
            path = ?path,
            channels = kept,
            frames = data.frames(),
            memory_kb = data.memory_size() / 1024,
            "Sample loaded"
        );
        Ok(data)
    }

    /// Loads every sound in the library mapping. Paths are resolved relative
    /// to `base_path` unless absolute.
    pub fn load_library(
        &self,
        sounds: &HashMap<String, String>,
        base_path: &Path,
    ) -> Result<Vec<(String, SampleData)>, Box<dyn Error>> {
        let mut loaded = Vec::with_capacity(sounds.len());
        for (id, file) in sounds {
            let path = if Path::new(file).is_absolute() {
                PathBuf::from(file)
            } else {
                base_path.join(file)
            };
            loaded.push((id.clone(), self.load(&path)?));
        }

        let total: usize = loaded.iter().map(|(_, data)| data.memory_size()).sum();
        info!(
            sounds = loaded.len(),
            memory_kb = total / 1024,
            "Sound library loaded"
        );
        Ok(loaded)
    }
}

/// Linear-interpolation rate conversion over one planar channel. Simple and
/// sufficient for one-shot pad content.
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let target_frames = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(target_frames);

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let index = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        let s0 = samples.get(index).copied().unwrap_or(0.0);
        let s1 = samples.get(index + 1).copied().unwrap_or(s0);
        output.push(s0 + (s1 - s0) * frac);
    }

    output
}
