// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Volumes: the user-facing replicated block devices

use crate::meta::ObjectMeta;
use ballast_common::api::ByteCount;
use serde::Deserialize;
use serde::Serialize;

/// A replicated block volume
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Volume {
    pub metadata: ObjectMeta,
    pub spec: VolumeSpec,
    pub status: VolumeStatus,
}

impl Volume {
    /// Returns whether the volume's desired engine image differs from the
    /// one currently in use, i.e. an upgrade (or rollback) is in flight.
    pub fn is_upgrading(&self) -> bool {
        self.status.current_image.as_deref()
            != Some(self.spec.engine_image.as_str())
    }
}

/// Desired state of a volume, written by the user-facing API and (for
/// `node_id` and `owner_id`) by the controller
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VolumeSpec {
    pub size: ByteCount,
    /// target count of usable replicas
    pub number_of_replicas: usize,
    pub engine_image: String,
    /// backup URL to restore the volume from, if any
    pub from_backup: Option<String>,
    pub frontend: VolumeFrontend,
    /// the node the volume should be attached to; `None` means detach
    pub node_id: Option<String>,
    /// minutes a failed replica is kept around before garbage collection;
    /// zero disables the timeout
    pub stale_replica_timeout: u32,
    pub recurring_jobs: Vec<RecurringJob>,
    /// identity of the controller instance driving this volume
    pub owner_id: Option<String>,
}

/// Observed state of a volume, maintained by the controller
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct VolumeStatus {
    /// `None` until the first reconciliation pass
    pub state: Option<VolumeState>,
    pub robustness: VolumeRobustness,
    /// the engine image actually in use; changes only while detached or at
    /// the live-upgrade switchover
    pub current_image: Option<String>,
    /// device path published while attached
    pub endpoint: Option<String>,
}

/// Where a volume is in the attach/detach lifecycle
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    Detached,
    Attaching,
    Attached,
    Detaching,
    Deleting,
}

/// Steady-state health rating of a volume
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeRobustness {
    #[default]
    Unknown,
    /// every requested replica is serving
    Healthy,
    /// serving, but with fewer usable replicas than requested
    Degraded,
    /// no usable replica remains
    Faulted,
}

/// How the volume is exposed to its consumer
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeFrontend {
    Blockdev,
    Iscsi,
}

/// A scheduled snapshot or backup task for a volume
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RecurringJob {
    pub name: String,
    /// cron expression
    pub cron: String,
    pub task: RecurringJobType,
    /// how many completed snapshots/backups to keep
    pub retain: usize,
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurringJobType {
    Snapshot,
    Backup,
}
