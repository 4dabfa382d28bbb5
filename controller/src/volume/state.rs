// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The attach/detach state machine, and the creation paths that keep a
//! volume populated with an engine and enough replicas

use super::VolumeController;
use crate::events::EventKind;
use crate::events::EventReason;
use ballast_common::api::CreateResult;
use ballast_common::api::Error;
use ballast_types::backup::backup_id_from_url;
use ballast_types::engine::Engine;
use ballast_types::engine::EngineSpec;
use ballast_types::engine::EngineStatus;
use ballast_types::instance::InstanceDesireState;
use ballast_types::instance::InstanceState;
use ballast_types::meta::engine_name_for_volume;
use ballast_types::meta::generate_replica_name_for_volume;
use ballast_types::replica::Replica;
use ballast_types::replica::ReplicaSpec;
use ballast_types::replica::ReplicaStatus;
use ballast_types::volume::Volume;
use ballast_types::volume::VolumeState;
use std::collections::BTreeMap;
use std::net::IpAddr;

impl VolumeController {
    /// Drives the attach/detach state machine for one volume.
    ///
    /// Ordering is the heart of this function.  On detach the engine stops
    /// before any replica does, otherwise writes still in flight could land
    /// on a partial replica set.  On attach the replicas run first, the
    /// engine is pointed at them once they all have addresses, and the
    /// volume is Attached only after the engine reports Running.
    pub(super) async fn reconcile_volume_state(
        &self,
        volume: &mut Volume,
        engine_slot: &mut Option<Engine>,
        replicas: &mut BTreeMap<String, Replica>,
    ) -> Result<(), Error> {
        if volume.status.current_image.is_none() {
            volume.status.current_image =
                Some(volume.spec.engine_image.clone());
        }

        let engine = match engine_slot.take() {
            Some(engine) => engine_slot.insert(engine),
            // first time we've seen this volume
            None => engine_slot.insert(self.create_engine(volume).await?),
        };

        if replicas.is_empty() {
            // first time creation
            self.replenish_replicas(volume, replicas).await?;
        }

        if engine.status.current_state == Some(InstanceState::Error) {
            error!(
                self.log,
                "engine dead unexpectedly, detaching volume";
                "volume" => volume.metadata.name.clone(),
            );
            self.event(
                volume,
                EventKind::Warning,
                EventReason::Faulted,
                format!(
                    "Engine of volume {} dead unexpectedly, detach the volume",
                    volume.metadata.name
                ),
            );
            volume.spec.node_id = None;
        }

        let old_state = volume.status.state;
        match volume.spec.node_id.clone() {
            None => {
                // the final state will be determined at the end of the clause
                volume.status.state = Some(VolumeState::Detaching);
                volume.status.endpoint = None;

                // check if any replica was ever read-write
                let data_exists = replicas
                    .values()
                    .any(|replica| replica.spec.healthy_at.is_some());
                // data exists, so any rebuild still in flight is abandoned
                // rather than left half-synced
                if data_exists {
                    for replica in replicas.values_mut() {
                        if replica.spec.healthy_at.is_none()
                            && replica.spec.failed_at.is_none()
                        {
                            replica.spec.failed_at = Some((self.now)());
                            *replica =
                                self.datastore.replica_update(replica).await?;
                        }
                    }
                }
                if engine.spec.desire_state != InstanceDesireState::Stopped
                    || engine.spec.node_id.is_some()
                {
                    engine.spec.node_id = None;
                    engine.spec.desire_state = InstanceDesireState::Stopped;
                    *engine = self.datastore.engine_update(engine).await?;
                    return Ok(());
                }
                // must make sure the engine stopped first before stopping
                // replicas, otherwise we may corrupt the data
                if engine.status.current_state
                    != Some(InstanceState::Stopped)
                {
                    return Ok(());
                }

                let mut all_replicas_stopped = true;
                for replica in replicas.values_mut() {
                    if replica.spec.desire_state
                        != InstanceDesireState::Stopped
                    {
                        replica.spec.desire_state =
                            InstanceDesireState::Stopped;
                        *replica =
                            self.datastore.replica_update(replica).await?;
                    }
                    if replica.status.current_state
                        != Some(InstanceState::Stopped)
                    {
                        all_replicas_stopped = false;
                    }
                }
                if !all_replicas_stopped {
                    return Ok(());
                }

                volume.status.state = Some(VolumeState::Detached);
                if old_state != volume.status.state {
                    self.event(
                        volume,
                        EventKind::Normal,
                        EventReason::Detached,
                        format!(
                            "volume {} has been detached",
                            volume.metadata.name
                        ),
                    );
                }
            }
            Some(want) => {
                // if the engine was running we're attached already, though
                // we may still need to start rebuilding replicas
                if engine.status.current_state
                    != Some(InstanceState::Running)
                {
                    volume.status.state = Some(VolumeState::Attaching);
                }

                let current_image = volume.status.current_image.clone();
                let mut replica_updated = false;
                for replica in replicas.values_mut() {
                    if replica.spec.failed_at.is_none()
                        && replica.spec.desire_state
                            != InstanceDesireState::Running
                        && Some(&replica.spec.engine_image)
                            == current_image.as_ref()
                    {
                        replica.spec.desire_state =
                            InstanceDesireState::Running;
                        *replica =
                            self.datastore.replica_update(replica).await?;
                        replica_updated = true;
                    }
                }
                // wait for the executors to launch them
                if replica_updated {
                    return Ok(());
                }

                let mut replica_address_map: BTreeMap<String, IpAddr> =
                    BTreeMap::new();
                for replica in replicas.values() {
                    if replica.spec.failed_at.is_some() {
                        continue;
                    }
                    if Some(&replica.spec.engine_image)
                        != current_image.as_ref()
                    {
                        continue;
                    }
                    // wait for every potentially healthy replica to come up
                    if replica.status.current_state
                        != Some(InstanceState::Running)
                    {
                        return Ok(());
                    }
                    let Some(ip) = replica.status.ip else {
                        error!(
                            self.log,
                            "BUG: replica is running but has no IP";
                            "replica" => replica.metadata.name.clone(),
                        );
                        continue;
                    };
                    replica_address_map
                        .insert(replica.metadata.name.clone(), ip);
                }

                let mut engine_updated = false;
                if engine.spec.desire_state != InstanceDesireState::Running {
                    if let Some(node) = &engine.spec.node_id {
                        if node != &want {
                            return Err(Error::invalid_request(&format!(
                                "engine is on node {} vs volume on {}, \
                                 must detach first",
                                node, want
                            )));
                        }
                    }
                    engine.spec.node_id = Some(want.clone());
                    engine.spec.replica_address_map =
                        replica_address_map.clone();
                    engine.spec.desire_state = InstanceDesireState::Running;
                    engine_updated = true;
                }
                if !volume.is_upgrading()
                    && engine.spec.replica_address_map != replica_address_map
                {
                    engine.spec.replica_address_map = replica_address_map;
                    engine_updated = true;
                }
                if engine_updated {
                    *engine = self.datastore.engine_update(engine).await?;
                }
                // wait for the engine to be up
                if engine.status.current_state
                    != Some(InstanceState::Running)
                {
                    return Ok(());
                }

                volume.status.endpoint = engine.status.endpoint.clone();
                volume.status.state = Some(VolumeState::Attached);
                if old_state != volume.status.state {
                    self.event(
                        volume,
                        EventKind::Normal,
                        EventReason::Attached,
                        format!(
                            "volume {} has been attached to {}",
                            volume.metadata.name, want
                        ),
                    );
                }
            }
        }
        Ok(())
    }

    /// Brings the usable replica count back up to the volume's target.
    ///
    /// Counts every replica that hasn't failed, since some may be blank or
    /// mid-rebuild.  Skipped during an upgrade, which manages its own
    /// replica duplication.
    pub(super) async fn replenish_replicas(
        &self,
        volume: &Volume,
        replicas: &mut BTreeMap<String, Replica>,
    ) -> Result<(), Error> {
        if volume.is_upgrading() {
            return Ok(());
        }
        let usable = replicas
            .values()
            .filter(|replica| replica.spec.failed_at.is_none())
            .count();
        for _ in usable..volume.spec.number_of_replicas {
            let replica = self.create_replica(volume).await?;
            replicas.insert(replica.metadata.name.clone(), replica);
        }
        Ok(())
    }

    async fn create_engine(&self, volume: &Volume) -> CreateResult<Engine> {
        let engine = Engine {
            metadata: Self::child_metadata(
                volume,
                engine_name_for_volume(&volume.metadata.name),
            ),
            spec: EngineSpec {
                volume_name: volume.metadata.name.clone(),
                volume_size: volume.spec.size,
                engine_image: volume
                    .status
                    .current_image
                    .clone()
                    .unwrap_or_else(|| volume.spec.engine_image.clone()),
                desire_state: InstanceDesireState::Stopped,
                node_id: None,
                owner_id: Some(self.controller_id.clone()),
                frontend: volume.spec.frontend,
                replica_address_map: BTreeMap::new(),
                upgraded_replica_address_map: BTreeMap::new(),
            },
            status: EngineStatus::default(),
        };
        self.datastore.engine_create(engine).await
    }

    async fn create_replica(&self, volume: &Volume) -> CreateResult<Replica> {
        let mut replica = Replica {
            metadata: Self::child_metadata(
                volume,
                generate_replica_name_for_volume(&volume.metadata.name),
            ),
            spec: ReplicaSpec {
                volume_name: volume.metadata.name.clone(),
                volume_size: volume.spec.size,
                engine_image: volume
                    .status
                    .current_image
                    .clone()
                    .unwrap_or_else(|| volume.spec.engine_image.clone()),
                desire_state: InstanceDesireState::Stopped,
                node_id: None,
                data_path: None,
                owner_id: Some(self.controller_id.clone()),
                failed_at: None,
                healthy_at: None,
                restore_from: None,
                restore_name: None,
                cleanup: false,
            },
            status: ReplicaStatus::default(),
        };
        if let Some(from_backup) = &volume.spec.from_backup {
            replica.spec.restore_from = Some(from_backup.clone());
            replica.spec.restore_name = Some(backup_id_from_url(from_backup)?);
        }

        // the scheduler picks the node and data path, or refuses
        let replica = self.scheduler.schedule_replica(replica).await?;
        self.datastore.replica_create(replica).await
    }

    /// Clones a replica's spec under a fresh name, for the live-upgrade path
    /// where two replicas share one data path.
    pub(super) fn duplicate_replica(
        &self,
        replica: &Replica,
        volume: &Volume,
    ) -> Replica {
        Replica {
            metadata: Self::child_metadata(
                volume,
                generate_replica_name_for_volume(&replica.spec.volume_name),
            ),
            spec: replica.spec.clone(),
            status: ReplicaStatus::default(),
        }
    }
}
