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
use std::any::Any;
use std::sync::mpsc::Sender;
use std::{error::Error, fmt, sync::Arc};

use crate::config;
use crate::playsync::CancelHandle;

pub mod cpal;
pub mod mixer;
pub mod mock;
pub mod store;
pub mod voice;

pub trait Device: Any + fmt::Display + Send + Sync {
    /// Runs the mixer against the device output. Sends one message on
    /// `ready` once the stream is live (or the setup error), then blocks
    /// until the cancel handle fires or the stream fails.
    fn run(
        &self,
        mixer: mixer::Mixer,
        cancel_handle: CancelHandle,
        ready: Sender<Result<(), String>>,
    ) -> Result<(), Box<dyn Error>>;

    /// The sample rate the device output will run at. Samples handed to the
    /// mixer must already be at this rate.
    fn sample_rate(&self) -> u32;

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<mock::Device>, Box<dyn Error>>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets a device with the given name.
pub fn get_device(config: Option<config::Audio>) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let config = match config {
        Some(config) => config,
        None => return Err("a renderer must have an audio device configured".into()),
    };

    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(&config)));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}
