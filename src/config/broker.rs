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
use std::time::Duration;

use serde::Deserialize;

/// Default broker listen port.
pub const DEFAULT_WS_PORT: u16 = 5174;

/// A YAML representation of the broker configuration.
#[derive(Deserialize, Clone, Default)]
pub struct Broker {
    /// The port to listen on (default: 5174).
    port: Option<u16>,

    /// How long a connection may stay silent before it is closed, in
    /// milliseconds (default: 30000).
    heartbeat_timeout_ms: Option<u64>,
}

impl Broker {
    /// New will create a new Broker configuration.
    pub fn new(port: Option<u16>, heartbeat_timeout_ms: Option<u64>) -> Broker {
        Broker {
            port,
            heartbeat_timeout_ms,
        }
    }

    /// Returns the listen port (default: 5174).
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_WS_PORT)
    }

    /// Returns the liveness window (default: 30s).
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.unwrap_or(30_000))
    }
}
