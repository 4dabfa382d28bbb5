// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Engine image upgrade, including live upgrade of an attached volume
//!
//! A live upgrade never moves data.  For every data path holding the volume
//! a second replica is created pointing at the same path but running the new
//! image; once all of them are up, their addresses are staged on the engine
//! and the executor performs the switchover atomically inside the engine
//! process.  The `cleanup` flags on the two replica generations then decide
//! which of the pair may wipe the shared path when it is deleted: the old
//! replica becomes the duplicate and must not.

use super::VolumeController;
use ballast_common::api::Error;
use ballast_common::api::LookupResult;
use ballast_common::api::ResourceType;
use ballast_types::engine::Engine;
use ballast_types::image::engine_image_checksum_name;
use ballast_types::image::EngineImage;
use ballast_types::image::EngineImageState;
use ballast_types::instance::InstanceDesireState;
use ballast_types::instance::InstanceState;
use ballast_types::replica::Replica;
use ballast_types::volume::Volume;
use ballast_types::volume::VolumeRobustness;
use ballast_types::volume::VolumeState;
use camino::Utf8PathBuf;
use std::collections::BTreeMap;
use std::net::IpAddr;

impl VolumeController {
    /// Rolls the engine image toward `volume.spec.engine_image`.
    ///
    /// Detached volumes rewrite images in place.  Attached, healthy volumes
    /// go through the live-upgrade flow.  Precondition failures (image not
    /// ready, identical builds, incompatible controller API) log and skip:
    /// the upgrade simply waits for a better moment, or for a detach.
    pub(super) async fn upgrade_engine_for_volume(
        &self,
        volume: &mut Volume,
        engine_slot: &mut Option<Engine>,
        replicas: &mut BTreeMap<String, Replica>,
    ) -> Result<(), Error> {
        if !volume.is_upgrading() {
            // it must be a rollback
            if let Some(engine) = engine_slot.as_mut() {
                if engine.spec.engine_image != volume.spec.engine_image {
                    engine.spec.engine_image =
                        volume.spec.engine_image.clone();
                    engine.spec.upgraded_replica_address_map =
                        BTreeMap::new();
                    *engine = self.datastore.engine_update(engine).await?;
                }
            }
            return Ok(());
        }

        let Some(engine) = engine_slot.as_mut() else {
            return Ok(());
        };

        if volume.status.state == Some(VolumeState::Detached) {
            if engine.spec.engine_image != volume.spec.engine_image {
                engine.spec.engine_image = volume.spec.engine_image.clone();
                *engine = self.datastore.engine_update(engine).await?;
            }
            for replica in replicas.values_mut() {
                if replica.spec.engine_image != volume.spec.engine_image {
                    replica.spec.engine_image =
                        volume.spec.engine_image.clone();
                    *replica = self.datastore.replica_update(replica).await?;
                }
            }
            volume.status.current_image =
                Some(volume.spec.engine_image.clone());
            return Ok(());
        }

        // only start a live upgrade on a healthy, attached volume
        if volume.status.state != Some(VolumeState::Attached)
            || volume.status.robustness != VolumeRobustness::Healthy
        {
            return Ok(());
        }

        let Some(current_image) = volume.status.current_image.clone() else {
            return Ok(());
        };
        let old_image = match self.get_engine_image(&current_image).await {
            Ok(image) => image,
            Err(error) => {
                warn!(
                    self.log,
                    "live upgrade: cannot get engine image";
                    "image" => current_image,
                    "error" => %error,
                );
                return Ok(());
            }
        };
        if old_image.status.state != EngineImageState::Ready {
            warn!(
                self.log,
                "live upgrade: engine image is not ready";
                "volume" => volume.metadata.name.clone(),
                "image" => old_image.spec.image,
            );
            return Ok(());
        }
        let new_image =
            match self.get_engine_image(&volume.spec.engine_image).await {
                Ok(image) => image,
                Err(error) => {
                    warn!(
                        self.log,
                        "live upgrade: cannot get engine image";
                        "image" => volume.spec.engine_image.clone(),
                        "error" => %error,
                    );
                    return Ok(());
                }
            };
        if new_image.status.state != EngineImageState::Ready {
            warn!(
                self.log,
                "live upgrade: engine image is not ready";
                "volume" => volume.metadata.name.clone(),
                "image" => new_image.spec.image,
            );
            return Ok(());
        }

        if old_image.status.git_commit == new_image.status.git_commit {
            info!(
                self.log,
                "live upgrade: images are identical builds, delaying \
                 upgrade until detach";
                "volume" => volume.metadata.name.clone(),
                "old_image" => old_image.spec.image,
                "new_image" => new_image.spec.image,
            );
            return Ok(());
        }

        if old_image.status.controller_api_version
            > new_image.status.controller_api_version
            || old_image.status.controller_api_version
                < new_image.status.controller_api_min_version
        {
            warn!(
                self.log,
                "live upgrade: controller API versions are incompatible";
                "volume" => volume.metadata.name.clone(),
                "old_api_version" => old_image.status.controller_api_version,
                "new_api_version" => new_image.status.controller_api_version,
                "new_api_min_version" =>
                    new_image.status.controller_api_min_version,
            );
            return Ok(());
        }

        // partition the replicas by image, indexed by data path
        let mut data_path_to_old: BTreeMap<Utf8PathBuf, String> =
            BTreeMap::new();
        let mut data_path_to_new: BTreeMap<Utf8PathBuf, String> =
            BTreeMap::new();
        for replica in replicas.values() {
            let Some(path) = replica.spec.data_path.clone() else {
                continue;
            };
            if replica.spec.engine_image == current_image {
                data_path_to_old.insert(path, replica.metadata.name.clone());
            } else if replica.spec.engine_image == volume.spec.engine_image {
                data_path_to_new.insert(path, replica.metadata.name.clone());
            } else {
                warn!(
                    self.log,
                    "live upgrade: found replica with unknown image";
                    "volume" => volume.metadata.name.clone(),
                    "replica" => replica.metadata.name.clone(),
                    "image" => replica.spec.engine_image.clone(),
                );
            }
        }

        if data_path_to_new.len() != volume.spec.number_of_replicas {
            if data_path_to_old.len() != volume.spec.number_of_replicas {
                warn!(
                    self.log,
                    "live upgrade: not enough replicas to upgrade";
                    "volume" => volume.metadata.name.clone(),
                    "available" => data_path_to_old.len(),
                    "want" => volume.spec.number_of_replicas,
                );
                return Ok(());
            }
            // give every uncovered data path a second replica on the new
            // image; exactly one of each pair survives the upgrade
            for (path, old_name) in &data_path_to_old {
                if data_path_to_new.contains_key(path) {
                    continue;
                }
                let Some(old_replica) = replicas.get(old_name) else {
                    continue;
                };
                let mut new_replica =
                    self.duplicate_replica(old_replica, volume);
                new_replica.spec.desire_state = InstanceDesireState::Running;
                new_replica.spec.engine_image =
                    volume.spec.engine_image.clone();
                new_replica.spec.cleanup = false;
                let new_replica =
                    self.datastore.replica_create(new_replica).await?;
                data_path_to_new
                    .insert(path.clone(), new_replica.metadata.name.clone());
                replicas.insert(
                    new_replica.metadata.name.clone(),
                    new_replica,
                );
            }
        }

        if engine.spec.engine_image != volume.spec.engine_image {
            let mut address_map: BTreeMap<String, IpAddr> = BTreeMap::new();
            for name in data_path_to_new.values() {
                let Some(replica) = replicas.get(name) else {
                    continue;
                };
                // wait for every replacement replica to come up
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
                address_map.insert(replica.metadata.name.clone(), ip);
            }
            engine.spec.upgraded_replica_address_map = address_map;
            engine.spec.engine_image = volume.spec.engine_image.clone();
            *engine = self.datastore.engine_update(engine).await?;
        }
        // the executor performs the handoff inside the engine; wait for it
        if engine.status.current_image.as_deref()
            != Some(volume.spec.engine_image.as_str())
            || engine.status.current_state != Some(InstanceState::Running)
        {
            return Ok(());
        }

        // after the handoff the old replica is the duplicate at the shared
        // data path and must not wipe it on deletion
        for name in data_path_to_old.values() {
            let Some(replica) = replicas.get_mut(name) else {
                continue;
            };
            if replica.spec.cleanup {
                replica.spec.cleanup = false;
                *replica = self.datastore.replica_update(replica).await?;
            }
        }
        for name in data_path_to_new.values() {
            let Some(replica) = replicas.get_mut(name) else {
                continue;
            };
            if !replica.spec.cleanup {
                replica.spec.cleanup = true;
                *replica = self.datastore.replica_update(replica).await?;
            }
        }

        info!(
            self.log,
            "engine has been upgraded";
            "volume" => volume.metadata.name.clone(),
            "engine" => engine.metadata.name.clone(),
            "from" => current_image,
            "to" => volume.spec.engine_image.clone(),
        );
        // the old-image replicas are now leftovers; replica cleanup takes
        // care of them
        volume.status.current_image = Some(volume.spec.engine_image.clone());
        Ok(())
    }

    async fn get_engine_image(
        &self,
        image: &str,
    ) -> LookupResult<EngineImage> {
        let name = engine_image_checksum_name(image);
        self.datastore.engine_image_get(&name).await?.ok_or_else(|| {
            Error::not_found_by_name(ResourceType::EngineImage, image)
        })
    }
}
