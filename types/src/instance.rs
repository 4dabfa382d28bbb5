// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime states shared by engine and replica instances

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;

/// The runtime state of an engine or replica instance, as observed and
/// reported by the executor that owns it
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// The state an instance is asked to converge to
///
/// This is deliberately a subset of [`InstanceState`]: callers may only
/// request the two stable endpoints, never the transitional states.
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceDesireState {
    Stopped,
    Running,
}

impl Display for InstanceState {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        let s = match self {
            InstanceState::Stopped => "stopped",
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl Display for InstanceDesireState {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        let s = match self {
            InstanceDesireState::Stopped => "stopped",
            InstanceDesireState::Running => "running",
        };
        write!(f, "{}", s)
    }
}

/// Per-replica mode reported by the engine once it starts monitoring its
/// backends
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ReplicaMode {
    /// serving reads and writes
    #[serde(rename = "RW")]
    ReadWrite,
    /// receiving writes while rebuilding, not yet trusted for reads
    #[serde(rename = "WO")]
    WriteOnly,
    /// the engine saw the replica fail
    #[serde(rename = "ERR")]
    Err,
}
