// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The replica scheduler contract consumed by the controller

use async_trait::async_trait;
use ballast_common::api::Error;
use ballast_types::replica::Replica;

/// Places new replicas onto nodes
///
/// The controller constructs a replica with `node_id` and `data_path` unset
/// and hands it here; the scheduler fills both in, or fails when no node can
/// take the replica (that failure propagates out of the reconciliation
/// pass).
#[async_trait]
pub trait ReplicaScheduler: Send + Sync {
    async fn schedule_replica(
        &self,
        replica: Replica,
    ) -> Result<Replica, Error>;
}
