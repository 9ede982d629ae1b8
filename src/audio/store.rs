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

//! In-memory PCM keyed by sound id, owned by the audio thread.
//!
//! Buffers are immutable once stored. Mutation of the store itself only
//! happens between mixing blocks, when the command ring is drained, so no
//! reader ever observes a half-installed sample.

use std::collections::HashMap;
use std::sync::Arc;

/// Decoded stereo PCM at the device sample rate. Cloning is cheap; the
/// channel buffers are shared. For mono sources the right channel aliases
/// the left allocation, which centers the source in a stereo mix.
#[derive(Clone)]
pub struct SampleData {
    left: Arc<Vec<f32>>,
    right: Arc<Vec<f32>>,
    frames: usize,
}

impl SampleData {
    /// Creates a sample from a single channel. The right channel aliases the
    /// left buffer.
    pub fn mono(samples: Vec<f32>) -> SampleData {
        let frames = samples.len();
        let left = Arc::new(samples);
        SampleData {
            right: left.clone(),
            left,
            frames,
        }
    }

    /// Creates a sample from two channels of equal length.
    pub fn stereo(left: Vec<f32>, right: Vec<f32>) -> SampleData {
        debug_assert_eq!(left.len(), right.len());
        let frames = left.len().min(right.len());
        SampleData {
            left: Arc::new(left),
            right: Arc::new(right),
            frames,
        }
    }

    /// Returns the sample length in frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Returns the (left, right) values of one frame.
    #[inline]
    pub fn frame(&self, index: usize) -> (f32, f32) {
        (self.left[index], self.right[index])
    }

    /// Returns true if both handles refer to the same underlying buffer.
    /// Used to find the voices bound to a sample that was just unloaded.
    pub fn same_buffer(&self, other: &SampleData) -> bool {
        Arc::ptr_eq(&self.left, &other.left)
    }

    /// Returns the memory size of the PCM in bytes.
    pub fn memory_size(&self) -> usize {
        let left = self.left.len() * std::mem::size_of::<f32>();
        if Arc::ptr_eq(&self.left, &self.right) {
            left
        } else {
            left + self.right.len() * std::mem::size_of::<f32>()
        }
    }
}

/// The mapping from sound id to PCM. Lives inside the mixer; every operation
/// runs on the audio thread between blocks.
pub struct SampleStore {
    samples: HashMap<String, SampleData>,
}

impl SampleStore {
    pub fn new() -> SampleStore {
        SampleStore {
            // Sized so a typical library install never rehashes on the
            // audio thread.
            samples: HashMap::with_capacity(64),
        }
    }

    /// Installs a sample, replacing any previous binding for the id. The
    /// replaced handle is returned; voices still holding it keep playing
    /// their shared buffer until they finish.
    pub fn load(&mut self, id: String, data: SampleData) -> Option<SampleData> {
        self.samples.insert(id, data)
    }

    /// Removes a sample. Returns the handle so the pool can release any
    /// voices bound to it.
    pub fn unload(&mut self, id: &str) -> Option<SampleData> {
        self.samples.remove(id)
    }

    /// Looks a sample up. Missing is a valid runtime condition, not an error.
    pub fn lookup(&self, id: &str) -> Option<&SampleData> {
        self.samples.get(id)
    }

    /// Returns the number of loaded samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        SampleStore::new()
    }
}
