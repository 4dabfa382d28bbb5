// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Engines: the per-volume read/write frontends

use crate::instance::InstanceDesireState;
use crate::instance::InstanceState;
use crate::instance::ReplicaMode;
use crate::meta::ObjectMeta;
use crate::volume::VolumeFrontend;
use ballast_common::api::ByteCount;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// The read/write frontend of a volume
///
/// Exactly one engine exists per volume.  The engine fans writes out to the
/// replicas named in `replica_address_map` and reads from one of them.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Engine {
    pub metadata: ObjectMeta,
    pub spec: EngineSpec,
    pub status: EngineStatus,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EngineSpec {
    pub volume_name: String,
    pub volume_size: ByteCount,
    pub engine_image: String,
    pub desire_state: InstanceDesireState,
    /// the node the engine should run on; must match the volume's requested
    /// node whenever the engine is asked to run
    pub node_id: Option<String>,
    /// identity of the controller instance that created the record
    pub owner_id: Option<String>,
    pub frontend: VolumeFrontend,
    /// replica name -> address of every backend the engine should use
    pub replica_address_map: BTreeMap<String, IpAddr>,
    /// staging area for live upgrade: the replacement backend set handed to
    /// the new engine image at switchover
    pub upgraded_replica_address_map: BTreeMap<String, IpAddr>,
}

/// Observed engine state, reported by the executor owning the process
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EngineStatus {
    /// `None` until the executor first reports
    pub current_state: Option<InstanceState>,
    pub current_image: Option<String>,
    pub ip: Option<IpAddr>,
    /// device path exposed to the consumer while running
    pub endpoint: Option<String>,
    /// per-replica modes; `None` until the executor starts monitoring
    pub replica_mode_map: Option<BTreeMap<String, ReplicaMode>>,
}
