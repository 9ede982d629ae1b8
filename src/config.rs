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
use std::error::Error;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

mod audio;
mod broker;
mod engine;
mod net;
mod node;

pub use crate::config::audio::Audio;
pub use crate::config::broker::Broker;
pub use crate::config::broker::DEFAULT_WS_PORT;
pub use crate::config::engine::Engine;
pub use crate::config::engine::VoiceStealing;
pub use crate::config::net::Net;
pub use crate::config::node::Node;

/// Deserializes a YAML config file.
fn deserialize<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn Error>> {
    match serde_yaml::from_str(&fs::read_to_string(path)?) {
        Ok(config) => Ok(config),
        Err(e) => Err(format!("error parsing file {}: {}", path.display(), e).into()),
    }
}

impl Node {
    /// Parses a node configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Node, Box<dyn Error>> {
        deserialize(path)
    }
}

impl Broker {
    /// Parses a broker configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Broker, Box<dyn Error>> {
        deserialize(path)
    }
}
