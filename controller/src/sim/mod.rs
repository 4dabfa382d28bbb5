// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated collaborators for the volume controller
//!
//! Everything the controller consumes as an external contract has a
//! simulated implementation here: a versioned in-memory [`Datastore`] with
//! watch fan-out, a [`FixedScheduler`] placing replicas onto a configured
//! node list, a recording [`EventLog`], and an [`Executor`] that advances
//! engine and replica runtime states the way the real out-of-process
//! executors would.  The test suite composes these to run the controller
//! against an entire simulated cluster.

mod datastore;
mod events;
mod executor;
mod scheduler;

pub use datastore::Datastore;
pub use events::EventLog;
pub use executor::Executor;
pub use scheduler::FixedScheduler;

use crate::config::ControllerConfig;
use ballast_common::api::ByteCount;
use ballast_common::api::ResourceType;
use ballast_types::engine::Engine;
use ballast_types::engine::EngineSpec;
use ballast_types::engine::EngineStatus;
use ballast_types::image::engine_image_checksum_name;
use ballast_types::image::EngineImage;
use ballast_types::image::EngineImageSpec;
use ballast_types::image::EngineImageState;
use ballast_types::image::EngineImageStatus;
use ballast_types::instance::InstanceDesireState;
use ballast_types::meta::engine_name_for_volume;
use ballast_types::meta::generate_replica_name_for_volume;
use ballast_types::meta::ObjectMeta;
use ballast_types::meta::OwnerReference;
use ballast_types::meta::LABEL_VOLUME;
use ballast_types::meta::VOLUME_FINALIZER;
use ballast_types::replica::Replica;
use ballast_types::replica::ReplicaSpec;
use ballast_types::replica::ReplicaStatus;
use ballast_types::volume::Volume;
use ballast_types::volume::VolumeFrontend;
use ballast_types::volume::VolumeSpec;
use ballast_types::volume::VolumeStatus;
use camino::Utf8PathBuf;
use std::collections::BTreeMap;

pub const TEST_OWNER_ID: &str = "controller-1";
pub const TEST_ENGINE_IMAGE: &str = "ballast-engine:v1";
pub const TEST_VOLUME_STALE_TIMEOUT: u32 = 20;

/// Returns a controller configuration suitable for driving simulated
/// clusters in tests.
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        controller_id: TEST_OWNER_ID.to_string(),
        workers: 1,
        max_retries: 3,
    }
}

/// Returns a volume record the way the user-facing API would create it,
/// already claimed by [`TEST_OWNER_ID`].
pub fn test_volume(name: &str, number_of_replicas: usize) -> Volume {
    let mut metadata = ObjectMeta::new(name);
    metadata.finalizers.push(VOLUME_FINALIZER.to_string());
    Volume {
        metadata,
        spec: VolumeSpec {
            size: ByteCount::from_gibibytes_u32(2),
            number_of_replicas,
            engine_image: TEST_ENGINE_IMAGE.to_string(),
            from_backup: None,
            frontend: VolumeFrontend::Blockdev,
            node_id: None,
            stale_replica_timeout: TEST_VOLUME_STALE_TIMEOUT,
            recurring_jobs: Vec::new(),
            owner_id: Some(TEST_OWNER_ID.to_string()),
        },
        status: VolumeStatus::default(),
    }
}

/// Returns the engine record the controller would have created for a volume.
pub fn test_engine_for_volume(volume: &Volume) -> Engine {
    Engine {
        metadata: child_metadata(
            volume,
            engine_name_for_volume(&volume.metadata.name),
        ),
        spec: EngineSpec {
            volume_name: volume.metadata.name.clone(),
            volume_size: volume.spec.size,
            engine_image: volume.spec.engine_image.clone(),
            desire_state: InstanceDesireState::Stopped,
            node_id: None,
            owner_id: volume.spec.owner_id.clone(),
            frontend: volume.spec.frontend,
            replica_address_map: BTreeMap::new(),
            upgraded_replica_address_map: BTreeMap::new(),
        },
        status: EngineStatus::default(),
    }
}

/// Returns a scheduled replica record for a volume.
pub fn test_replica(volume: &Volume) -> Replica {
    let name = generate_replica_name_for_volume(&volume.metadata.name);
    let data_path =
        Utf8PathBuf::from(format!("/var/lib/ballast/replicas/{}", name));
    Replica {
        metadata: child_metadata(volume, name),
        spec: ReplicaSpec {
            volume_name: volume.metadata.name.clone(),
            volume_size: volume.spec.size,
            engine_image: volume.spec.engine_image.clone(),
            desire_state: InstanceDesireState::Stopped,
            node_id: Some("node-1".to_string()),
            data_path: Some(data_path),
            owner_id: volume.spec.owner_id.clone(),
            failed_at: None,
            healthy_at: None,
            restore_from: None,
            restore_name: None,
            cleanup: false,
        },
        status: ReplicaStatus::default(),
    }
}

/// Returns a Ready engine image record, keyed by its checksum name.
pub fn test_engine_image(
    image: &str,
    git_commit: &str,
    controller_api_version: i64,
    controller_api_min_version: i64,
) -> EngineImage {
    EngineImage {
        metadata: ObjectMeta::new(&engine_image_checksum_name(image)),
        spec: EngineImageSpec { image: image.to_string() },
        status: EngineImageStatus {
            state: EngineImageState::Ready,
            git_commit: git_commit.to_string(),
            controller_api_version,
            controller_api_min_version,
        },
    }
}

fn child_metadata(volume: &Volume, name: String) -> ObjectMeta {
    let mut metadata = ObjectMeta::new(&name);
    metadata
        .labels
        .insert(LABEL_VOLUME.to_string(), volume.metadata.name.clone());
    metadata.owner_references.push(OwnerReference {
        kind: ResourceType::Volume,
        name: volume.metadata.name.clone(),
        uid: volume.metadata.uid,
    });
    metadata
}
