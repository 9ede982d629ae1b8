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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{info, span, Level};

use crate::{audio::mixer::Mixer, config, playsync::CancelHandle};

/// The block size the mock pretends its host asked for.
const MOCK_BLOCK_FRAMES: usize = 128;

/// A mock device. Pumps the mixer on a thread-local cadence instead of real
/// hardware so engine behavior is observable from tests.
#[derive(Clone)]
pub struct Device {
    name: String,
    sample_rate: u32,
    is_playing: Arc<AtomicBool>,
    blocks_processed: Arc<AtomicUsize>,
    active_voices: Arc<AtomicUsize>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(config: &config::Audio) -> Device {
        Device {
            name: config.device().to_string(),
            sample_rate: config.sample_rate(),
            is_playing: Arc::new(AtomicBool::new(false)),
            blocks_processed: Arc::new(AtomicUsize::new(0)),
            active_voices: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns true if the device is currently being pumped.
    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }

    /// Returns the number of blocks mixed so far.
    pub fn blocks_processed(&self) -> usize {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    /// Returns the active voice count observed after the last block.
    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed)
    }
}

impl crate::audio::Device for Device {
    /// Pumps the mixer with fixed-size blocks until cancelled.
    fn run(
        &self,
        mut mixer: Mixer,
        cancel_handle: CancelHandle,
        ready: Sender<Result<(), String>>,
    ) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "mixer stream (mock)");
        let _enter = span.enter();

        info!(device = self.name, "Starting mixer stream.");
        self.is_playing.store(true, Ordering::Relaxed);
        let _ = ready.send(Ok(()));

        let mut output = vec![0.0f32; MOCK_BLOCK_FRAMES * 2];
        while !cancel_handle.is_cancelled() {
            mixer.process_into(&mut output, 2);
            self.blocks_processed.fetch_add(1, Ordering::Relaxed);
            self.active_voices
                .store(mixer.active_voices(), Ordering::Relaxed);

            // Roughly one block of wall time at 48kHz.
            thread::sleep(Duration::from_millis(2));
        }

        self.is_playing.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<Device>, Box<dyn Error>> {
        Ok(Arc::new(self.clone()))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}
