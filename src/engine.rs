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

//! Bridge between control code and the audio thread.
//!
//! The engine owns the device stream and the producer side of the command
//! ring. Everything that wants sound goes through here; nothing else touches
//! the mixer once it has moved onto its thread.

use std::error::Error;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use tracing::{error, info, warn};

use crate::audio;
use crate::audio::mixer::{Command, Mixer};
use crate::audio::store::SampleData;
use crate::config;
use crate::playsync::CancelHandle;

/// Capacity of the control-to-audio command ring. Pushes beyond this are
/// logged and dropped rather than blocking the sender.
const COMMAND_QUEUE_CAPACITY: usize = 256;

/// How long engine startup waits for the stream to come alive.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// The lifecycle of the audio bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Error,
}

/// Owns the audio device stream and feeds the mixer its commands.
pub struct Engine {
    device: Arc<dyn audio::Device>,
    config: config::Engine,
    state: Mutex<EngineState>,
    commands: Mutex<Option<HeapProd<Command>>>,
    cancel_handle: Mutex<Option<CancelHandle>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Engine {
    /// Creates an uninitialized engine for the given device.
    pub fn new(device: Arc<dyn audio::Device>, config: config::Engine) -> Engine {
        Engine {
            device,
            config,
            state: Mutex::new(EngineState::Uninitialized),
            commands: Mutex::new(None),
            cancel_handle: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    /// Returns the current bridge state.
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Returns the sample rate the device runs at. The sound library must be
    /// converted to this rate before loading.
    pub fn sample_rate(&self) -> u32 {
        self.device.sample_rate()
    }

    /// Returns the device this engine runs against.
    pub fn device(&self) -> Arc<dyn audio::Device> {
        self.device.clone()
    }

    /// Builds the mixer, starts the device stream on its own thread, and
    /// waits for it to come alive. Re-initialization is allowed after an
    /// error; initializing twice is not.
    pub fn init(self: &Arc<Self>) -> Result<(), Box<dyn Error>> {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Uninitialized | EngineState::Error => {}
                EngineState::Initializing | EngineState::Ready => {
                    return Err("audio engine is already initialized".into());
                }
            }
            *state = EngineState::Initializing;
        }

        let (producer, consumer) = HeapRb::<Command>::new(COMMAND_QUEUE_CAPACITY).split();
        let mixer = Mixer::new(&self.config, self.device.sample_rate(), consumer);
        let cancel_handle = CancelHandle::new();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = {
            let engine = self.clone();
            let cancel_handle = cancel_handle.clone();
            thread::Builder::new()
                .name("mixer-processor".to_string())
                .spawn(move || {
                    if let Err(e) = engine.device.run(mixer, cancel_handle, ready_tx) {
                        error!(err = e.as_ref(), "Audio stream ended with an error");
                        *engine.state.lock() = EngineState::Error;
                    }
                })?
        };

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                *self.state.lock() = EngineState::Error;
                return Err(e.into());
            }
            Err(_) => {
                *self.state.lock() = EngineState::Error;
                return Err("timed out waiting for the audio stream to start".into());
            }
        }

        *self.commands.lock() = Some(producer);
        *self.cancel_handle.lock() = Some(cancel_handle);
        *self.thread.lock() = Some(thread);
        *self.state.lock() = EngineState::Ready;

        info!(sample_rate = self.device.sample_rate(), "Audio engine ready");
        Ok(())
    }

    /// Installs PCM under a sound id. Ownership of the buffers moves to the
    /// audio thread with the message.
    pub fn load_sample(&self, id: &str, data: SampleData) {
        self.send(
            Command::LoadSample {
                id: id.to_string(),
                data,
            },
            "load-sample",
        );
    }

    /// Removes a sound. Voices playing it are released on the next block.
    pub fn unload_sample(&self, id: &str) {
        self.send(
            Command::UnloadSample {
                id: id.to_string(),
            },
            "unload-sample",
        );
    }

    /// Starts a voice for a sound.
    pub fn trigger(&self, id: &str) {
        self.send(
            Command::Trigger {
                id: id.to_string(),
            },
            "trigger",
        );
    }

    /// All active voices enter release.
    pub fn stop_all(&self) {
        self.send(Command::StopAll, "stop-all");
    }

    fn send(&self, command: Command, operation: &str) {
        if self.state() != EngineState::Ready {
            warn!(operation, "Audio engine not ready, dropping operation");
            return;
        }

        let mut commands = self.commands.lock();
        match commands.as_mut() {
            Some(producer) => {
                if producer.try_push(command).is_err() {
                    warn!(operation, "Audio command queue full, dropping operation");
                }
            }
            None => warn!(operation, "Audio command queue missing, dropping operation"),
        }
    }

    /// Stops the stream and joins the audio thread. The engine may be
    /// initialized again afterwards.
    pub fn shutdown(&self) {
        if let Some(cancel_handle) = self.cancel_handle.lock().take() {
            cancel_handle.cancel();
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("Error joining the audio thread");
            }
        }
        *self.commands.lock() = None;
        *self.state.lock() = EngineState::Uninitialized;
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(cancel_handle) = self.cancel_handle.lock().take() {
            cancel_handle.cancel();
        }
    }
}
