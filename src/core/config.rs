// Copyright 2022 ComposableFi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::{
    error::Error,
    packets::types::{NetworkId, PortId},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, path::PathBuf};

fn default_transfer_port() -> PortId {
    PortId::Transfer
}

fn default_max_pending() -> usize {
    1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Destination port whose packets are decoded as token transfers
    #[serde(default = "default_transfer_port")]
    pub transfer_port: PortId,
    /// Events waiting for the registry, oldest dropped first
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            transfer_port: default_transfer_port(),
            max_pending: default_max_pending(),
        }
    }
}

/// What the registry knows about one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain name, used in logs and for name lookups
    pub name: String,
    pub network_id: NetworkId,
    /// Connection id on this chain -> network at the other end
    #[serde(default)]
    pub connections: HashMap<String, NetworkId>,
    /// Client id on this chain -> network the client tracks
    #[serde(default)]
    pub clients: HashMap<String, NetworkId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Custom(format!("failed to read config {}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, Error> {
        serde_json::from_str(contents).map_err(|e| Error::Custom(format!("invalid config: {}", e)))
    }

    /// `<config dir>/packet-tracker/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join("packet-tracker").join("config.json"))
    }
}
