// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The datastore contract consumed by the controller
//!
//! The datastore is a versioned object store maintained outside this crate.
//! Every update is optimistic: the caller presents the record version it
//! read, and the store rejects the write with [`Error::Conflict`] when the
//! record has moved on.  Mutations are observable through a broadcast watch
//! channel; the controller uses those callbacks to wake the volumes affected
//! by engine and replica changes.
//!
//! [`Error::Conflict`]: ballast_common::api::Error::Conflict

use async_trait::async_trait;
use ballast_common::api::CreateResult;
use ballast_common::api::DeleteResult;
use ballast_common::api::ListResultVec;
use ballast_common::api::LookupResult;
use ballast_common::api::UpdateResult;
use ballast_types::engine::Engine;
use ballast_types::image::EngineImage;
use ballast_types::job::CronJob;
use ballast_types::replica::Replica;
use ballast_types::settings::Settings;
use ballast_types::volume::Volume;
use tokio::sync::broadcast;

/// A change to a record the controller watches
///
/// Additions, updates, and deletion progress all surface the full current
/// object; the controller treats them uniformly as "go look at this volume
/// again".
#[derive(Clone, Debug)]
pub enum WatchEvent {
    VolumeChanged(Volume),
    EngineChanged(Engine),
    ReplicaChanged(Replica),
}

/// The versioned object store the control plane runs against
///
/// Lookups return `Ok(None)` for records that don't exist; updates and
/// deletes of vanished records fail with `ObjectNotFound`.  Deleting an
/// engine or replica only marks the record: the executor owning the instance
/// releases it once the underlying process is gone.  Deleting a cron-job
/// record is immediate and idempotent.
#[async_trait]
pub trait DataStore: Send + Sync {
    // Volumes
    async fn volume_get(&self, name: &str) -> LookupResult<Option<Volume>>;
    async fn volume_list(&self) -> ListResultVec<Volume>;
    async fn volume_create(&self, volume: Volume) -> CreateResult<Volume>;
    async fn volume_update(&self, volume: &Volume) -> UpdateResult<Volume>;
    async fn volume_delete(&self, name: &str) -> DeleteResult;
    /// Drops the volume finalizer; once the deletion timestamp is set and no
    /// finalizer remains, the record itself is reaped.
    async fn volume_remove_finalizer(&self, volume: &Volume) -> DeleteResult;

    // Engines
    async fn engine_get_for_volume(
        &self,
        volume_name: &str,
    ) -> LookupResult<Option<Engine>>;
    async fn engine_create(&self, engine: Engine) -> CreateResult<Engine>;
    async fn engine_update(&self, engine: &Engine) -> UpdateResult<Engine>;
    async fn engine_delete(&self, name: &str) -> DeleteResult;

    // Replicas
    async fn replica_list_for_volume(
        &self,
        volume_name: &str,
    ) -> ListResultVec<Replica>;
    async fn replica_create(&self, replica: Replica) -> CreateResult<Replica>;
    async fn replica_update(&self, replica: &Replica)
        -> UpdateResult<Replica>;
    async fn replica_delete(&self, name: &str) -> DeleteResult;

    // Engine images, maintained by the image deployment controller
    async fn engine_image_get(
        &self,
        checksum_name: &str,
    ) -> LookupResult<Option<EngineImage>>;

    // Cluster-wide settings
    async fn settings_get(&self) -> LookupResult<Settings>;

    // Cron-job records for recurring snapshot/backup jobs
    async fn cron_job_list_for_volume(
        &self,
        volume_name: &str,
    ) -> ListResultVec<CronJob>;
    async fn cron_job_create(&self, job: CronJob) -> CreateResult<CronJob>;
    async fn cron_job_update(&self, job: &CronJob) -> UpdateResult<CronJob>;
    async fn cron_job_delete(&self, name: &str) -> DeleteResult;

    /// Returns a receiver of record-change notifications.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
