// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated cluster harness shared by the controller's integration tests

#![allow(dead_code)]

use ballast_controller::datastore::DataStore;
use ballast_controller::sim;
use ballast_controller::volume::VolumeController;
use ballast_types::volume::Volume;
use ballast_types::volume::VolumeRobustness;
use ballast_types::volume::VolumeState;
use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use std::sync::Arc;

pub const VOLUME: &str = "test-volume";
pub const NODE: &str = "node-1";

/// A fixed wall clock, so failure and health timestamps compare exactly.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
}

/// The controller plus every simulated collaborator it runs against
pub struct TestCluster {
    pub controller: Arc<VolumeController>,
    pub datastore: Arc<sim::Datastore>,
    pub executor: Arc<sim::Executor>,
    pub events: Arc<sim::EventLog>,
}

impl TestCluster {
    pub fn new(test_name: &'static str) -> TestCluster {
        let log = ballast_test_utils::test_slog_logger(test_name);
        let datastore = Arc::new(sim::Datastore::new(&log));
        let scheduler =
            Arc::new(sim::FixedScheduler::new(&[NODE, "node-2"]));
        let events = Arc::new(sim::EventLog::new());
        let mut controller = VolumeController::new(
            &sim::test_config(),
            datastore.clone(),
            scheduler,
            events.clone(),
            &log,
        );
        controller.set_clock(test_now);
        TestCluster {
            controller: Arc::new(controller),
            executor: Arc::new(sim::Executor::new(datastore.clone(), &log)),
            datastore,
            events,
        }
    }

    pub async fn sync(&self) {
        self.controller.sync_volume(VOLUME).await.unwrap();
    }

    /// One reconciliation pass followed by one round of executor progress.
    pub async fn pass(&self) {
        self.sync().await;
        self.executor.step().await.unwrap();
    }

    pub async fn volume(&self) -> Volume {
        self.datastore.volume_get(VOLUME).await.unwrap().unwrap()
    }

    pub async fn update_volume(&self, update: impl FnOnce(&mut Volume)) {
        let mut volume = self.volume().await;
        update(&mut volume);
        self.datastore.volume_update(&volume).await.unwrap();
    }

    /// Creates the volume and reconciles it to Detached.
    pub async fn create_detached_volume(&self) {
        self.datastore
            .volume_create(sim::test_volume(VOLUME, 2))
            .await
            .unwrap();
        self.pass().await;
        assert_eq!(
            Some(VolumeState::Detaching),
            self.volume().await.status.state
        );
        self.pass().await;
        assert_eq!(
            Some(VolumeState::Detached),
            self.volume().await.status.state
        );
    }

    /// Attaches the volume and reconciles it to Attached/Healthy.
    pub async fn attach_volume(&self) {
        self.update_volume(|volume| {
            volume.spec.node_id = Some(NODE.to_string());
        })
        .await;
        // start replicas, then the engine, then report attached
        self.pass().await;
        self.pass().await;
        self.pass().await;
        let volume = self.volume().await;
        assert_eq!(Some(VolumeState::Attached), volume.status.state);
        assert_eq!(VolumeRobustness::Healthy, volume.status.robustness);
    }
}
