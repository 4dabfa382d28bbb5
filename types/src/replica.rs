// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Replicas: the node-local data-holding backends of a volume

use crate::instance::InstanceDesireState;
use crate::instance::InstanceState;
use crate::meta::ObjectMeta;
use ballast_common::api::ByteCount;
use camino::Utf8PathBuf;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::net::IpAddr;

/// One copy of a volume's data, bound to a data path on a node
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Replica {
    pub metadata: ObjectMeta,
    pub spec: ReplicaSpec,
    pub status: ReplicaStatus,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ReplicaSpec {
    pub volume_name: String,
    pub volume_size: ByteCount,
    pub engine_image: String,
    pub desire_state: InstanceDesireState,
    /// assigned by the scheduler
    pub node_id: Option<String>,
    /// node-local directory owning this replica's data; assigned by the
    /// scheduler
    pub data_path: Option<Utf8PathBuf>,
    /// identity of the controller instance that created the record
    pub owner_id: Option<String>,
    /// when the engine reported this replica failed; `None` while usable
    pub failed_at: Option<DateTime<Utc>>,
    /// when the replica was first seen serving in read-write mode; a replica
    /// that fails while this is still `None` never finished rebuilding
    pub healthy_at: Option<DateTime<Utc>>,
    /// backup URL this replica restores from, for restore volumes
    pub restore_from: Option<String>,
    /// backup id within `restore_from`
    pub restore_name: Option<String>,
    /// whether deleting this replica also wipes its data path
    pub cleanup: bool,
}

/// Observed replica state, reported by the executor owning the process
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ReplicaStatus {
    /// `None` until the executor first reports
    pub current_state: Option<InstanceState>,
    pub ip: Option<IpAddr>,
}
