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
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleRate, StreamConfig,
};
use tracing::{debug, error, info, span, Level};

use crate::{audio::mixer::Mixer, config, playsync::CancelHandle};

/// A small wrapper around a cpal::Device. Stores the output shape so the
/// mixer can be wired up without re-querying the host.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of output channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The sample rate the output stream is opened at.
    sample_rate: u32,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn super::Device>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn super::Device> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let mut max_channels = 0;

                let output_configs = device.supported_output_configs();
                if let Err(e) = output_configs {
                    debug!(
                        err = e.to_string(),
                        host = host_id.name(),
                        device = device.name().unwrap_or_default(),
                        "Error getting output configs"
                    );
                    continue;
                }

                for output_config in device.supported_output_configs()? {
                    if max_channels < output_config.channels() {
                        max_channels = output_config.channels();
                    }
                }

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                        sample_rate: 48000,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device. The name "default" selects the default
    /// output device of the default host.
    pub fn get(config: config::Audio) -> Result<Device, Box<dyn Error>> {
        let name = config.device();

        if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device")?;
            let mut max_channels = 0;
            for output_config in device.supported_output_configs()? {
                if max_channels < output_config.channels() {
                    max_channels = output_config.channels();
                }
            }
            return Ok(Device {
                name: device.name()?,
                max_channels,
                host_id: host.id(),
                device,
                sample_rate: config.sample_rate(),
            });
        }

        match Device::list_cpal_devices()?
            .into_iter()
            .find(|device| device.name.trim() == name)
        {
            Some(mut device) => {
                device.sample_rate = config.sample_rate();
                Ok(device)
            }
            None => Err(format!("no device found with name {}", name).into()),
        }
    }
}

impl super::Device for Device {
    /// Opens the output stream and runs the mixer callback against it until
    /// the engine cancels or the stream reports an error.
    fn run(
        &self,
        mut mixer: Mixer,
        cancel_handle: CancelHandle,
        ready: Sender<Result<(), String>>,
    ) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "mixer stream (cpal)");
        let _enter = span.enter();

        // Mix in stereo when the device allows it; a mono device still gets
        // the left channel of the internal stereo mix.
        let channels = self.max_channels.min(2).max(1);
        info!(
            device = self.name,
            channels,
            sample_rate = self.sample_rate,
            "Starting mixer stream."
        );

        let stream_config = StreamConfig {
            channels,
            sample_rate: SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let failed = Arc::new(AtomicBool::new(false));
        let error_callback = {
            let failed = failed.clone();
            let cancel_handle = cancel_handle.clone();
            move |err: cpal::StreamError| {
                error!(err = err.to_string(), "Error during stream.");
                failed.store(true, Ordering::Relaxed);
                cancel_handle.notify();
            }
        };

        let stream = match self.device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _| {
                mixer.process_into(data, channels as usize);
            },
            error_callback,
            None,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e.to_string()));
                return Err(e.to_string().into());
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready.send(Err(e.to_string()));
            return Err(e.to_string().into());
        }
        let _ = ready.send(Ok(()));

        // Block here for the life of the stream.
        cancel_handle.wait(&failed);

        if failed.load(Ordering::Relaxed) && !cancel_handle.is_cancelled() {
            return Err("audio stream failed".into());
        }

        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<super::mock::Device>, Box<dyn Error>> {
        Err("not a mock".into())
    }
}
