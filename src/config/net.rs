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

/// A YAML representation of the client networking configuration.
///
/// The heartbeat cadence must stay strictly below the broker's liveness
/// window so a single dropped frame doesn't false-close the connection.
#[derive(Deserialize, Clone, Default)]
pub struct Net {
    /// Heartbeat cadence in milliseconds (default: 25000).
    heartbeat_interval_ms: Option<u64>,

    /// First reconnect delay in milliseconds (default: 1000).
    reconnect_initial_ms: Option<u64>,

    /// Reconnect delay ceiling in milliseconds (default: 30000).
    reconnect_max_ms: Option<u64>,
}

impl Net {
    /// New will create a new Net configuration.
    pub fn new(
        heartbeat_interval_ms: Option<u64>,
        reconnect_initial_ms: Option<u64>,
        reconnect_max_ms: Option<u64>,
    ) -> Net {
        Net {
            heartbeat_interval_ms,
            reconnect_initial_ms,
            reconnect_max_ms,
        }
    }

    /// Returns the heartbeat cadence (default: 25s).
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.unwrap_or(25_000))
    }

    /// Returns the first reconnect delay (default: 1s).
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms.unwrap_or(1_000))
    }

    /// Returns the reconnect delay ceiling (default: 30s).
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms.unwrap_or(30_000))
    }
}
