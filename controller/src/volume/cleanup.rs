// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Garbage collection of corrupted, stale, and leftover replicas

use super::VolumeController;
use ballast_common::api::Error;
use ballast_types::replica::Replica;
use ballast_types::volume::Volume;
use chrono::Duration;
use std::collections::BTreeMap;

impl VolumeController {
    /// Deletes replicas that no longer earn their keep:
    ///
    /// - replicas on the wrong engine image, left over from a finished
    ///   upgrade (skipped while an upgrade is still in flight);
    /// - failed replicas that never became healthy, i.e. broke during their
    ///   initial rebuild;
    /// - failed replicas past the volume's stale timeout, provided at least
    ///   one healthy replica exists.
    ///
    /// The last failed replica of a volume with no healthy replica is never
    /// deleted: it is the only remaining copy of the data and the basis for
    /// manual recovery.
    pub(super) async fn cleanup_corrupted_or_stale_replicas(
        &self,
        volume: &Volume,
        replicas: &mut BTreeMap<String, Replica>,
    ) -> Result<(), Error> {
        let has_healthy_replicas = replicas.values().any(|replica| {
            replica.spec.failed_at.is_none()
                && replica.spec.healthy_at.is_some()
        });
        let cleanup_upgrade_leftover_replicas = !volume.is_upgrading();

        let names: Vec<String> = replicas.keys().cloned().collect();
        for name in names {
            let Some(replica) = replicas.get(&name) else {
                continue;
            };

            if cleanup_upgrade_leftover_replicas
                && replica.spec.engine_image != volume.spec.engine_image
            {
                // replica.spec.cleanup was set up by the upgrade flow
                self.datastore.replica_delete(&name).await?;
                replicas.remove(&name);
                continue;
            }

            let Some(failed_at) = replica.spec.failed_at else {
                continue;
            };
            if replica.metadata.deletion_timestamp.is_some() {
                continue;
            }
            let staled = volume.spec.stale_replica_timeout > 0
                && (self.now)() - failed_at
                    > Duration::minutes(i64::from(
                        volume.spec.stale_replica_timeout,
                    ));

            // 1. failed before ever becoming read-write, mostly failed
            //    during rebuilding
            // 2. failed long enough ago to be stale, unless we have no
            //    healthy replica left
            if replica.spec.healthy_at.is_none()
                || (has_healthy_replicas && staled)
            {
                info!(
                    self.log,
                    "cleaning up corrupted or stale replica";
                    "volume" => volume.metadata.name.clone(),
                    "replica" => name.clone(),
                );
                self.datastore.replica_delete(&name).await?;
                replicas.remove(&name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::datastore::DataStore;
    use crate::sim;
    use crate::volume::VolumeController;
    use ballast_types::instance::InstanceDesireState;
    use ballast_types::volume::Volume;
    use chrono::Duration;
    use chrono::TimeZone;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn test_now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    struct TestHarness {
        controller: VolumeController,
        datastore: Arc<sim::Datastore>,
        volume: Volume,
    }

    async fn harness() -> TestHarness {
        let log = ballast_test_utils::test_slog_logger("cleanup");
        let datastore = Arc::new(sim::Datastore::new(&log));
        let scheduler =
            Arc::new(sim::FixedScheduler::new(&["node-1", "node-2"]));
        let events = Arc::new(sim::EventLog::new());
        let mut controller = VolumeController::new(
            &sim::test_config(),
            datastore.clone(),
            scheduler,
            events,
            &log,
        );
        controller.set_clock(test_now);

        let mut volume = sim::test_volume("vol-1", 2);
        // mark the image current so nothing looks like an upgrade leftover
        volume.status.current_image = Some(volume.spec.engine_image.clone());
        let volume = datastore.volume_create(volume).await.unwrap();
        TestHarness { controller, datastore, volume }
    }

    #[tokio::test]
    async fn test_never_healthy_replica_is_deleted_on_sight() {
        let h = harness().await;
        let mut failed = sim::test_replica(&h.volume);
        failed.spec.failed_at = Some(test_now());
        let mut healthy = sim::test_replica(&h.volume);
        healthy.spec.healthy_at = Some(test_now());
        let failed = h.datastore.replica_create(failed).await.unwrap();
        let healthy = h.datastore.replica_create(healthy).await.unwrap();

        let mut replicas = BTreeMap::from([
            (failed.metadata.name.clone(), failed.clone()),
            (healthy.metadata.name.clone(), healthy.clone()),
        ]);
        h.controller
            .cleanup_corrupted_or_stale_replicas(&h.volume, &mut replicas)
            .await
            .unwrap();

        assert!(!replicas.contains_key(&failed.metadata.name));
        assert!(replicas.contains_key(&healthy.metadata.name));
    }

    #[tokio::test]
    async fn test_stale_replica_deleted_only_with_healthy_cover() {
        let h = harness().await;
        // failed long past the stale timeout, but it did serve once
        let mut stale = sim::test_replica(&h.volume);
        stale.spec.healthy_at = Some(test_now() - Duration::hours(2));
        stale.spec.failed_at = Some(test_now() - Duration::hours(1));
        let stale = h.datastore.replica_create(stale).await.unwrap();

        // no healthy replica exists: the record must survive as the last
        // copy of the data
        let mut replicas = BTreeMap::from([(
            stale.metadata.name.clone(),
            stale.clone(),
        )]);
        h.controller
            .cleanup_corrupted_or_stale_replicas(&h.volume, &mut replicas)
            .await
            .unwrap();
        assert!(replicas.contains_key(&stale.metadata.name));

        // once a healthy replica covers the data, the stale record goes
        let mut healthy = sim::test_replica(&h.volume);
        healthy.spec.healthy_at = Some(test_now());
        let healthy = h.datastore.replica_create(healthy).await.unwrap();
        replicas.insert(healthy.metadata.name.clone(), healthy.clone());
        h.controller
            .cleanup_corrupted_or_stale_replicas(&h.volume, &mut replicas)
            .await
            .unwrap();
        assert!(!replicas.contains_key(&stale.metadata.name));
        assert!(replicas.contains_key(&healthy.metadata.name));
    }

    #[tokio::test]
    async fn test_recent_failure_is_retained() {
        let h = harness().await;
        let mut failed = sim::test_replica(&h.volume);
        failed.spec.healthy_at = Some(test_now() - Duration::minutes(10));
        failed.spec.failed_at = Some(test_now() - Duration::minutes(1));
        let failed = h.datastore.replica_create(failed).await.unwrap();
        let mut healthy = sim::test_replica(&h.volume);
        healthy.spec.healthy_at = Some(test_now());
        let healthy = h.datastore.replica_create(healthy).await.unwrap();

        let mut replicas = BTreeMap::from([
            (failed.metadata.name.clone(), failed.clone()),
            (healthy.metadata.name.clone(), healthy.clone()),
        ]);
        h.controller
            .cleanup_corrupted_or_stale_replicas(&h.volume, &mut replicas)
            .await
            .unwrap();

        // within the stale timeout the failed record stays available for a
        // possible rebuild shortcut
        assert!(replicas.contains_key(&failed.metadata.name));
    }

    #[tokio::test]
    async fn test_image_mismatch_skipped_while_upgrading() {
        let mut h = harness().await;
        let mut leftover = sim::test_replica(&h.volume);
        leftover.spec.healthy_at = Some(test_now());
        leftover.spec.desire_state = InstanceDesireState::Running;
        let leftover = h.datastore.replica_create(leftover).await.unwrap();

        // desired image moved ahead of the current one: upgrade in flight,
        // the old-image replica must not be collected yet
        h.volume.spec.engine_image = "ballast-engine:v2".to_string();
        let mut replicas = BTreeMap::from([(
            leftover.metadata.name.clone(),
            leftover.clone(),
        )]);
        h.controller
            .cleanup_corrupted_or_stale_replicas(&h.volume, &mut replicas)
            .await
            .unwrap();
        assert!(replicas.contains_key(&leftover.metadata.name));

        // upgrade finished: the leftover goes
        h.volume.status.current_image =
            Some("ballast-engine:v2".to_string());
        h.controller
            .cleanup_corrupted_or_stale_replicas(&h.volume, &mut replicas)
            .await
            .unwrap();
        assert!(replicas.is_empty());
    }
}
