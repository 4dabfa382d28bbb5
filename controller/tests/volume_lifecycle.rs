// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-pass lifecycle tests for the volume controller
//!
//! Each case seeds the simulated datastore with a volume (plus optionally
//! its engine and replicas) in a particular state, runs exactly one
//! reconciliation pass, and compares every record's spec and status against
//! the expectation.

mod common;

use common::test_now;
use common::TestCluster;
use common::NODE;
use common::VOLUME;

use ballast_controller::datastore::DataStore;
use ballast_controller::events::EventReason;
use ballast_controller::sim;
use ballast_types::engine::Engine;
use ballast_types::instance::InstanceDesireState;
use ballast_types::instance::InstanceState;
use ballast_types::instance::ReplicaMode;
use ballast_types::replica::Replica;
use ballast_types::volume::Volume;
use ballast_types::volume::VolumeRobustness;
use ballast_types::volume::VolumeState;
use std::collections::BTreeMap;
use std::net::IpAddr;

fn test_ip(host: u8) -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(10, 20, 0, host))
}

struct VolumeTestCase {
    volume: Volume,
    engine: Option<Engine>,
    replicas: Vec<Replica>,

    expect_volume: Volume,
    expect_engine: Option<Engine>,
    expect_replicas: Vec<Replica>,
}

impl VolumeTestCase {
    fn template() -> VolumeTestCase {
        let volume = sim::test_volume(VOLUME, 2);
        let engine = sim::test_engine_for_volume(&volume);
        let replicas =
            vec![sim::test_replica(&volume), sim::test_replica(&volume)];
        VolumeTestCase {
            expect_volume: volume.clone(),
            expect_engine: Some(engine.clone()),
            expect_replicas: replicas.clone(),
            volume,
            engine: Some(engine),
            replicas,
        }
    }

    fn copy_current_to_expect(&mut self) {
        self.expect_volume = self.volume.clone();
        self.expect_engine = self.engine.clone();
        self.expect_replicas = self.replicas.clone();
    }
}

async fn run_test_case(name: &str, tc: VolumeTestCase) {
    println!("testing {}", name);
    let cluster = TestCluster::new("volume_lifecycle");

    cluster.datastore.volume_create(tc.volume.clone()).await.unwrap();
    if let Some(engine) = &tc.engine {
        cluster.datastore.engine_create(engine.clone()).await.unwrap();
    }
    for replica in &tc.replicas {
        cluster.datastore.replica_create(replica.clone()).await.unwrap();
    }

    cluster.controller.sync_volume(VOLUME).await.unwrap();

    let volume = cluster.volume().await;
    assert_eq!(tc.expect_volume.spec, volume.spec, "{}: volume spec", name);
    assert_eq!(
        tc.expect_volume.status, volume.status,
        "{}: volume status",
        name
    );

    let engine =
        cluster.datastore.engine_get_for_volume(VOLUME).await.unwrap();
    match (&tc.expect_engine, &engine) {
        (Some(expect), Some(engine)) => {
            assert_eq!(expect.spec, engine.spec, "{}: engine spec", name);
            assert_eq!(
                expect.status, engine.status,
                "{}: engine status",
                name
            );
        }
        (None, None) => (),
        (expect, got) => panic!(
            "{}: expected engine {:?}, got {:?}",
            name,
            expect.is_some(),
            got.is_some()
        ),
    }

    let replicas =
        cluster.datastore.replica_list_for_volume(VOLUME).await.unwrap();
    assert_eq!(
        tc.expect_replicas.len(),
        replicas.len(),
        "{}: replica count",
        name
    );
    if tc.replicas.is_empty() {
        // creation case: names are generated, so check what the scheduler
        // and controller must have filled in
        for replica in &replicas {
            assert!(replica.spec.node_id.is_some(), "{}: node", name);
            assert!(replica.spec.data_path.is_some(), "{}: data path", name);
            assert_eq!(
                InstanceDesireState::Stopped,
                replica.spec.desire_state,
                "{}: replica desire state",
                name
            );
            assert_eq!(
                sim::TEST_ENGINE_IMAGE, replica.spec.engine_image,
                "{}: replica image",
                name
            );
            assert_eq!(
                VOLUME, replica.spec.volume_name,
                "{}: replica volume",
                name
            );
        }
    } else {
        let expect_by_name: BTreeMap<String, &Replica> = tc
            .expect_replicas
            .iter()
            .map(|replica| (replica.metadata.name.clone(), replica))
            .collect();
        for replica in &replicas {
            let expect = expect_by_name
                .get(&replica.metadata.name)
                .unwrap_or_else(|| {
                    panic!(
                        "{}: unexpected replica {}",
                        name, replica.metadata.name
                    )
                });
            assert_eq!(
                expect.spec, replica.spec,
                "{}: replica {} spec",
                name, replica.metadata.name
            );
            assert_eq!(
                expect.status, replica.status,
                "{}: replica {} status",
                name, replica.metadata.name
            );
        }
    }
}

#[tokio::test]
async fn test_volume_create() {
    let mut tc = VolumeTestCase::template();
    tc.engine = None;
    tc.replicas = Vec::new();
    tc.copy_current_to_expect();
    tc.expect_volume.status.state = Some(VolumeState::Detaching);
    tc.expect_volume.status.current_image =
        Some(sim::TEST_ENGINE_IMAGE.to_string());
    // the engine is created from scratch; the template engine matches what
    // the controller builds
    tc.expect_engine = Some(sim::test_engine_for_volume(&tc.volume));
    // two replicas are created and scheduled; checked structurally
    tc.expect_replicas =
        vec![sim::test_replica(&tc.volume), sim::test_replica(&tc.volume)];
    run_test_case("volume create", tc).await;
}

#[tokio::test]
async fn test_volume_detached() {
    let mut tc = VolumeTestCase::template();
    tc.engine.as_mut().unwrap().status.current_state =
        Some(InstanceState::Stopped);
    for replica in &mut tc.replicas {
        replica.status.current_state = Some(InstanceState::Stopped);
    }
    tc.copy_current_to_expect();
    tc.expect_volume.status.state = Some(VolumeState::Detached);
    tc.expect_volume.status.current_image =
        Some(sim::TEST_ENGINE_IMAGE.to_string());
    run_test_case("volume detached", tc).await;
}

#[tokio::test]
async fn test_volume_attaching_start_replicas() {
    let mut tc = VolumeTestCase::template();
    tc.volume.spec.node_id = Some(NODE.to_string());
    tc.copy_current_to_expect();
    tc.expect_volume.status.state = Some(VolumeState::Attaching);
    tc.expect_volume.status.current_image =
        Some(sim::TEST_ENGINE_IMAGE.to_string());
    // replicas are started first; the engine starts only once they all run
    for replica in &mut tc.expect_replicas {
        replica.spec.desire_state = InstanceDesireState::Running;
    }
    run_test_case("volume attaching - start replicas", tc).await;
}

#[tokio::test]
async fn test_volume_attaching_start_engine() {
    let mut tc = VolumeTestCase::template();
    tc.volume.spec.node_id = Some(NODE.to_string());
    for (i, replica) in tc.replicas.iter_mut().enumerate() {
        replica.spec.desire_state = InstanceDesireState::Running;
        replica.status.current_state = Some(InstanceState::Running);
        replica.status.ip = Some(test_ip(10 + i as u8));
    }
    tc.copy_current_to_expect();
    tc.expect_volume.status.state = Some(VolumeState::Attaching);
    tc.expect_volume.status.current_image =
        Some(sim::TEST_ENGINE_IMAGE.to_string());
    let expect_engine = tc.expect_engine.as_mut().unwrap();
    expect_engine.spec.node_id = Some(NODE.to_string());
    expect_engine.spec.desire_state = InstanceDesireState::Running;
    for replica in &tc.expect_replicas {
        expect_engine.spec.replica_address_map.insert(
            replica.metadata.name.clone(),
            replica.status.ip.unwrap(),
        );
    }
    run_test_case("volume attaching - start engine", tc).await;
}

#[tokio::test]
async fn test_volume_attached() {
    let mut tc = VolumeTestCase::template();
    tc.volume.spec.node_id = Some(NODE.to_string());
    let endpoint = format!("/dev/ballast/{}", VOLUME);
    {
        let engine = tc.engine.as_mut().unwrap();
        engine.spec.node_id = Some(NODE.to_string());
        engine.spec.desire_state = InstanceDesireState::Running;
        engine.status.current_state = Some(InstanceState::Running);
        engine.status.ip = Some(test_ip(1));
        engine.status.endpoint = Some(endpoint.clone());
        engine.status.replica_mode_map = Some(BTreeMap::new());
    }
    for (i, replica) in tc.replicas.iter_mut().enumerate() {
        replica.spec.desire_state = InstanceDesireState::Running;
        replica.status.current_state = Some(InstanceState::Running);
        replica.status.ip = Some(test_ip(10 + i as u8));
        let engine = tc.engine.as_mut().unwrap();
        engine.spec.replica_address_map.insert(
            replica.metadata.name.clone(),
            replica.status.ip.unwrap(),
        );
        engine
            .status
            .replica_mode_map
            .as_mut()
            .unwrap()
            .insert(replica.metadata.name.clone(), ReplicaMode::ReadWrite);
    }
    tc.copy_current_to_expect();
    tc.expect_volume.status.state = Some(VolumeState::Attached);
    tc.expect_volume.status.endpoint = Some(endpoint);
    tc.expect_volume.status.robustness = VolumeRobustness::Healthy;
    tc.expect_volume.status.current_image =
        Some(sim::TEST_ENGINE_IMAGE.to_string());
    for replica in &mut tc.expect_replicas {
        replica.spec.healthy_at = Some(test_now());
    }
    run_test_case("volume attached", tc).await;
}

#[tokio::test]
async fn test_volume_detaching_stop_engine() {
    let mut tc = VolumeTestCase::template();
    tc.volume.spec.node_id = None;
    tc.volume.status.endpoint = Some(format!("/dev/ballast/{}", VOLUME));
    tc.volume.status.robustness = VolumeRobustness::Healthy;
    {
        let engine = tc.engine.as_mut().unwrap();
        engine.spec.node_id = Some(NODE.to_string());
        engine.spec.desire_state = InstanceDesireState::Running;
        engine.status.current_state = Some(InstanceState::Running);
        engine.status.ip = Some(test_ip(1));
        engine.status.endpoint = Some(format!("/dev/ballast/{}", VOLUME));
        engine.status.replica_mode_map = Some(BTreeMap::new());
    }
    for (i, replica) in tc.replicas.iter_mut().enumerate() {
        replica.spec.desire_state = InstanceDesireState::Running;
        replica.spec.healthy_at = Some(test_now());
        replica.status.current_state = Some(InstanceState::Running);
        replica.status.ip = Some(test_ip(10 + i as u8));
        let engine = tc.engine.as_mut().unwrap();
        engine.spec.replica_address_map.insert(
            replica.metadata.name.clone(),
            replica.status.ip.unwrap(),
        );
        engine
            .status
            .replica_mode_map
            .as_mut()
            .unwrap()
            .insert(replica.metadata.name.clone(), ReplicaMode::ReadWrite);
    }
    tc.copy_current_to_expect();
    tc.expect_volume.status.state = Some(VolumeState::Detaching);
    tc.expect_volume.status.endpoint = None;
    tc.expect_volume.status.current_image =
        Some(sim::TEST_ENGINE_IMAGE.to_string());
    let expect_engine = tc.expect_engine.as_mut().unwrap();
    expect_engine.spec.node_id = None;
    expect_engine.spec.desire_state = InstanceDesireState::Stopped;
    run_test_case("volume detaching - stop engine", tc).await;
}

#[tokio::test]
async fn test_volume_detaching_stop_replicas() {
    let mut tc = VolumeTestCase::template();
    tc.volume.spec.node_id = None;
    tc.engine.as_mut().unwrap().status.current_state =
        Some(InstanceState::Stopped);
    for (i, replica) in tc.replicas.iter_mut().enumerate() {
        replica.spec.desire_state = InstanceDesireState::Running;
        replica.spec.healthy_at = Some(test_now());
        replica.status.current_state = Some(InstanceState::Running);
        replica.status.ip = Some(test_ip(10 + i as u8));
    }
    tc.copy_current_to_expect();
    tc.expect_volume.status.state = Some(VolumeState::Detaching);
    tc.expect_volume.status.current_image =
        Some(sim::TEST_ENGINE_IMAGE.to_string());
    for replica in &mut tc.expect_replicas {
        replica.spec.desire_state = InstanceDesireState::Stopped;
    }
    run_test_case("volume detaching - stop replicas", tc).await;
}

#[tokio::test]
async fn test_volume_deleting() {
    let cluster = TestCluster::new("volume_deleting");
    let volume = sim::test_volume(VOLUME, 2);
    let engine = sim::test_engine_for_volume(&volume);
    let replica = sim::test_replica(&volume);
    cluster.datastore.volume_create(volume).await.unwrap();
    cluster.datastore.engine_create(engine.clone()).await.unwrap();
    cluster.datastore.replica_create(replica.clone()).await.unwrap();
    cluster.datastore.volume_delete(VOLUME).await.unwrap();

    cluster.controller.sync_volume(VOLUME).await.unwrap();

    // children are marked for deletion; the volume waits on its finalizer
    let volume = cluster.volume().await;
    assert_eq!(Some(VolumeState::Deleting), volume.status.state);
    let engine = cluster
        .datastore
        .engine_get_for_volume(VOLUME)
        .await
        .unwrap()
        .unwrap();
    assert!(engine.metadata.deletion_timestamp.is_some());
    let replicas =
        cluster.datastore.replica_list_for_volume(VOLUME).await.unwrap();
    assert!(replicas
        .iter()
        .all(|replica| replica.metadata.deletion_timestamp.is_some()));
    assert!(cluster.events.reasons().contains(&EventReason::Delete));

    // once the executors release the children, the finalizer clears and
    // the record goes away
    cluster.datastore.purge_engine(&engine.metadata.name);
    cluster.datastore.purge_replica(&replica.metadata.name);
    cluster.controller.sync_volume(VOLUME).await.unwrap();
    assert!(cluster
        .datastore
        .volume_get(VOLUME)
        .await
        .unwrap()
        .is_none());

    // a pass over a vanished volume is a no-op success
    cluster.controller.sync_volume(VOLUME).await.unwrap();
}
