// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Replica health reconciliation: translating the engine's per-replica mode
//! reports into failure marks and a volume robustness rating

use super::VolumeController;
use crate::events::EventKind;
use crate::events::EventReason;
use ballast_common::api::Error;
use ballast_types::engine::Engine;
use ballast_types::instance::InstanceState;
use ballast_types::instance::ReplicaMode;
use ballast_types::replica::Replica;
use ballast_types::volume::Volume;
use ballast_types::volume::VolumeRobustness;
use std::collections::BTreeMap;

impl VolumeController {
    /// Folds the engine's replica mode map into replica records and the
    /// volume's robustness.
    ///
    /// Runs only while the engine is up and monitoring: an errored replica
    /// gets a `failed_at` stamp, a read-write replica gets its first
    /// `healthy_at` stamp.  The distinction matters later: a replica that
    /// failed with `healthy_at` still unset never finished its initial
    /// rebuild and holds nothing worth keeping.
    pub(super) async fn reconcile_engine_replica_state(
        &self,
        volume: &mut Volume,
        engine: Option<&Engine>,
        replicas: &mut BTreeMap<String, Replica>,
    ) -> Result<(), Error> {
        let Some(engine) = engine else {
            return Ok(());
        };
        if engine.status.current_state != Some(InstanceState::Running) {
            return Ok(());
        }
        // wait for monitoring to start
        let Some(mode_map) = &engine.status.replica_mode_map else {
            return Ok(());
        };

        let mut healthy_count = 0;
        for (name, mode) in mode_map {
            let Some(replica) = replicas.get_mut(name) else {
                continue;
            };
            match mode {
                ReplicaMode::Err => {
                    if replica.spec.failed_at.is_none() {
                        replica.spec.failed_at = Some((self.now)());
                        *replica =
                            self.datastore.replica_update(replica).await?;
                    }
                }
                ReplicaMode::ReadWrite => {
                    if replica.spec.healthy_at.is_none() {
                        replica.spec.healthy_at = Some((self.now)());
                        *replica =
                            self.datastore.replica_update(replica).await?;
                    }
                    if replica.spec.failed_at.is_none() {
                        healthy_count += 1;
                    }
                }
                ReplicaMode::WriteOnly => (),
            }
        }

        let old_robustness = volume.status.robustness;
        if healthy_count == 0 {
            // no healthy replica exists, going to faulted
            volume.status.robustness = VolumeRobustness::Faulted;
            if old_robustness != VolumeRobustness::Faulted {
                self.event(
                    volume,
                    EventKind::Warning,
                    EventReason::Faulted,
                    format!("volume {} became faulted", volume.metadata.name),
                );
            }
            // detach the volume
            volume.spec.node_id = None;
        } else if healthy_count >= volume.spec.number_of_replicas {
            volume.status.robustness = VolumeRobustness::Healthy;
            if old_robustness == VolumeRobustness::Degraded {
                self.event(
                    volume,
                    EventKind::Normal,
                    EventReason::Healthy,
                    format!("volume {} became healthy", volume.metadata.name),
                );
            }
        } else {
            volume.status.robustness = VolumeRobustness::Degraded;
            if old_robustness != VolumeRobustness::Degraded {
                self.event(
                    volume,
                    EventKind::Normal,
                    EventReason::Degraded,
                    format!("volume {} became degraded", volume.metadata.name),
                );
            }
            // start rebuilding; the replicas will be launched by the
            // volume-state stage
            self.replenish_replicas(volume, replicas).await?;
        }
        Ok(())
    }
}
