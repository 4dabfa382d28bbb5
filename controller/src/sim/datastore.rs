// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory, versioned implementation of the datastore contract
//!
//! The store enforces the same optimistic-concurrency rules the controller
//! sees in production: updates must present the version they read, and every
//! mutation fans out over the watch channel.  Engine and replica deletion
//! only marks the record; the simulated [`Executor`] releases marked records
//! the way a real executor would, and tests can do it directly through
//! [`Datastore::purge_engine`] and [`Datastore::purge_replica`].
//!
//! [`Executor`]: crate::sim::Executor

use crate::datastore::DataStore;
use crate::datastore::WatchEvent;
use async_trait::async_trait;
use ballast_common::api::CreateResult;
use ballast_common::api::DeleteResult;
use ballast_common::api::Error;
use ballast_common::api::ListResultVec;
use ballast_common::api::LookupResult;
use ballast_common::api::ResourceType;
use ballast_common::api::UpdateResult;
use ballast_types::engine::Engine;
use ballast_types::image::EngineImage;
use ballast_types::job::CronJob;
use ballast_types::meta::ObjectMeta;
use ballast_types::meta::LABEL_VOLUME;
use ballast_types::replica::Replica;
use ballast_types::settings::Settings;
use ballast_types::volume::Volume;
use chrono::Utc;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// In-memory datastore for simulated clusters
pub struct Datastore {
    log: Logger,
    state: Mutex<State>,
    watch_tx: broadcast::Sender<WatchEvent>,
}

#[derive(Default)]
struct State {
    volumes: BTreeMap<String, Volume>,
    engines: BTreeMap<String, Engine>,
    replicas: BTreeMap<String, Replica>,
    engine_images: BTreeMap<String, EngineImage>,
    cron_jobs: BTreeMap<String, CronJob>,
    settings: Settings,
}

/// Internal access to the metadata section of any record kind
trait SimRecord: Clone + PartialEq {
    const TYPE: ResourceType;
    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

macro_rules! impl_sim_record {
    ($type:ty, $resource:expr) => {
        impl SimRecord for $type {
            const TYPE: ResourceType = $resource;
            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }
            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

impl_sim_record!(Volume, ResourceType::Volume);
impl_sim_record!(Engine, ResourceType::Engine);
impl_sim_record!(Replica, ResourceType::Replica);
impl_sim_record!(EngineImage, ResourceType::EngineImage);
impl_sim_record!(CronJob, ResourceType::CronJob);

fn create_record<T: SimRecord>(
    records: &mut BTreeMap<String, T>,
    record: T,
) -> CreateResult<T> {
    let name = record.metadata().name.clone();
    if records.contains_key(&name) {
        return Err(Error::ObjectAlreadyExists {
            type_name: T::TYPE,
            object_name: name,
        });
    }
    records.insert(name, record.clone());
    Ok(record)
}

/// Applies an update, returning the stored record and whether anything
/// actually changed.  A write that changes nothing is not a write: no
/// version bump, no watch callback.
fn update_record<T: SimRecord>(
    records: &mut BTreeMap<String, T>,
    record: &T,
) -> UpdateResult<(T, bool)> {
    let name = &record.metadata().name;
    let Some(existing) = records.get_mut(name) else {
        return Err(Error::not_found_by_name(T::TYPE, name));
    };
    if existing.metadata().version != record.metadata().version {
        return Err(Error::conflict(
            T::TYPE,
            &format!(
                "version {} of {} does not match current version {}",
                record.metadata().version,
                name,
                existing.metadata().version
            ),
        ));
    }
    if *record == *existing {
        return Ok((existing.clone(), false));
    }
    let mut updated = record.clone();
    updated.metadata_mut().version = existing.metadata().version.next();
    updated.metadata_mut().time_modified = Utc::now();
    *existing = updated.clone();
    Ok((updated, true))
}

/// Stamps the deletion timestamp on a record, leaving it in place for its
/// executor to release.  Idempotent for records already marked.
fn mark_deleted<T: SimRecord>(
    records: &mut BTreeMap<String, T>,
    name: &str,
) -> Result<Option<T>, Error> {
    let Some(existing) = records.get_mut(name) else {
        return Err(Error::not_found_by_name(T::TYPE, name));
    };
    if existing.metadata().deletion_timestamp.is_some() {
        return Ok(None);
    }
    existing.metadata_mut().deletion_timestamp = Some(Utc::now());
    let version = existing.metadata().version.next();
    existing.metadata_mut().version = version;
    Ok(Some(existing.clone()))
}

fn list_for_volume<T: SimRecord>(
    records: &BTreeMap<String, T>,
    volume_name: &str,
) -> Vec<T> {
    records
        .values()
        .filter(|record| {
            record.metadata().labels.get(LABEL_VOLUME).map(String::as_str)
                == Some(volume_name)
        })
        .cloned()
        .collect()
}

impl Datastore {
    pub fn new(log: &Logger) -> Datastore {
        let (watch_tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Datastore {
            log: log.new(o!("component" => "sim-datastore")),
            state: Mutex::new(State::default()),
            watch_tx,
        }
    }

    fn publish(&self, event: WatchEvent) {
        // no receivers is fine; tests often drive the controller directly
        let _ = self.watch_tx.send(event);
    }

    /// Configures the backup target settings consumed by recurring backup
    /// jobs.
    pub fn set_backup_target(
        &self,
        target: &str,
        credential_secret: Option<&str>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.settings.backup_target = Some(target.to_string());
        state.settings.backup_target_credential_secret =
            credential_secret.map(str::to_string);
    }

    /// Seeds an engine image record.
    pub fn add_engine_image(&self, image: EngineImage) {
        let mut state = self.state.lock().unwrap();
        state
            .engine_images
            .insert(image.metadata.name.clone(), image);
    }

    /// Returns every engine in the store, for the simulated executor.
    pub fn engines(&self) -> Vec<Engine> {
        let state = self.state.lock().unwrap();
        state.engines.values().cloned().collect()
    }

    /// Returns every replica in the store, for the simulated executor.
    pub fn replicas(&self) -> Vec<Replica> {
        let state = self.state.lock().unwrap();
        state.replicas.values().cloned().collect()
    }

    /// Releases an engine record previously marked for deletion, the way the
    /// owning executor does once the process is gone.
    pub fn purge_engine(&self, name: &str) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.engines.remove(name)
        };
        if let Some(engine) = removed {
            debug!(self.log, "released engine"; "engine" => name.to_string());
            self.publish(WatchEvent::EngineChanged(engine));
        }
    }

    /// Releases a replica record previously marked for deletion.
    pub fn purge_replica(&self, name: &str) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.replicas.remove(name)
        };
        if let Some(replica) = removed {
            debug!(
                self.log,
                "released replica";
                "replica" => name.to_string(),
            );
            self.publish(WatchEvent::ReplicaChanged(replica));
        }
    }
}

#[async_trait]
impl DataStore for Datastore {
    async fn volume_get(&self, name: &str) -> LookupResult<Option<Volume>> {
        let state = self.state.lock().unwrap();
        Ok(state.volumes.get(name).cloned())
    }

    async fn volume_list(&self) -> ListResultVec<Volume> {
        let state = self.state.lock().unwrap();
        Ok(state.volumes.values().cloned().collect())
    }

    async fn volume_create(&self, volume: Volume) -> CreateResult<Volume> {
        let created = {
            let mut state = self.state.lock().unwrap();
            create_record(&mut state.volumes, volume)?
        };
        self.publish(WatchEvent::VolumeChanged(created.clone()));
        Ok(created)
    }

    async fn volume_update(&self, volume: &Volume) -> UpdateResult<Volume> {
        let (updated, changed) = {
            let mut state = self.state.lock().unwrap();
            update_record(&mut state.volumes, volume)?
        };
        if changed {
            self.publish(WatchEvent::VolumeChanged(updated.clone()));
        }
        Ok(updated)
    }

    async fn volume_delete(&self, name: &str) -> DeleteResult {
        let marked = {
            let mut state = self.state.lock().unwrap();
            mark_deleted(&mut state.volumes, name)?
        };
        if let Some(volume) = marked {
            self.publish(WatchEvent::VolumeChanged(volume));
        }
        Ok(())
    }

    async fn volume_remove_finalizer(&self, volume: &Volume) -> DeleteResult {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let Some(existing) = state.volumes.get_mut(&volume.metadata.name)
            else {
                return Ok(());
            };
            existing.metadata.finalizers.clear();
            if existing.metadata.deletion_timestamp.is_some() {
                state.volumes.remove(&volume.metadata.name)
            } else {
                let version = existing.metadata.version.next();
                existing.metadata.version = version;
                Some(existing.clone())
            }
        };
        if let Some(volume) = changed {
            self.publish(WatchEvent::VolumeChanged(volume));
        }
        Ok(())
    }

    async fn engine_get_for_volume(
        &self,
        volume_name: &str,
    ) -> LookupResult<Option<Engine>> {
        let state = self.state.lock().unwrap();
        Ok(list_for_volume(&state.engines, volume_name).into_iter().next())
    }

    async fn engine_create(&self, engine: Engine) -> CreateResult<Engine> {
        let created = {
            let mut state = self.state.lock().unwrap();
            create_record(&mut state.engines, engine)?
        };
        self.publish(WatchEvent::EngineChanged(created.clone()));
        Ok(created)
    }

    async fn engine_update(&self, engine: &Engine) -> UpdateResult<Engine> {
        let (updated, changed) = {
            let mut state = self.state.lock().unwrap();
            update_record(&mut state.engines, engine)?
        };
        if changed {
            self.publish(WatchEvent::EngineChanged(updated.clone()));
        }
        Ok(updated)
    }

    async fn engine_delete(&self, name: &str) -> DeleteResult {
        let marked = {
            let mut state = self.state.lock().unwrap();
            mark_deleted(&mut state.engines, name)?
        };
        if let Some(engine) = marked {
            self.publish(WatchEvent::EngineChanged(engine));
        }
        Ok(())
    }

    async fn replica_list_for_volume(
        &self,
        volume_name: &str,
    ) -> ListResultVec<Replica> {
        let state = self.state.lock().unwrap();
        Ok(list_for_volume(&state.replicas, volume_name))
    }

    async fn replica_create(&self, replica: Replica) -> CreateResult<Replica> {
        let created = {
            let mut state = self.state.lock().unwrap();
            create_record(&mut state.replicas, replica)?
        };
        self.publish(WatchEvent::ReplicaChanged(created.clone()));
        Ok(created)
    }

    async fn replica_update(
        &self,
        replica: &Replica,
    ) -> UpdateResult<Replica> {
        let (updated, changed) = {
            let mut state = self.state.lock().unwrap();
            update_record(&mut state.replicas, replica)?
        };
        if changed {
            self.publish(WatchEvent::ReplicaChanged(updated.clone()));
        }
        Ok(updated)
    }

    async fn replica_delete(&self, name: &str) -> DeleteResult {
        let marked = {
            let mut state = self.state.lock().unwrap();
            mark_deleted(&mut state.replicas, name)?
        };
        if let Some(replica) = marked {
            self.publish(WatchEvent::ReplicaChanged(replica));
        }
        Ok(())
    }

    async fn engine_image_get(
        &self,
        checksum_name: &str,
    ) -> LookupResult<Option<EngineImage>> {
        let state = self.state.lock().unwrap();
        Ok(state.engine_images.get(checksum_name).cloned())
    }

    async fn settings_get(&self) -> LookupResult<Settings> {
        let state = self.state.lock().unwrap();
        Ok(state.settings.clone())
    }

    async fn cron_job_list_for_volume(
        &self,
        volume_name: &str,
    ) -> ListResultVec<CronJob> {
        let state = self.state.lock().unwrap();
        Ok(list_for_volume(&state.cron_jobs, volume_name))
    }

    async fn cron_job_create(&self, job: CronJob) -> CreateResult<CronJob> {
        let mut state = self.state.lock().unwrap();
        create_record(&mut state.cron_jobs, job)
    }

    async fn cron_job_update(&self, job: &CronJob) -> UpdateResult<CronJob> {
        let mut state = self.state.lock().unwrap();
        update_record(&mut state.cron_jobs, job).map(|(job, _)| job)
    }

    async fn cron_job_delete(&self, name: &str) -> DeleteResult {
        // idempotent: the deletion handler re-issues deletes until the
        // volume finalizer clears
        let mut state = self.state.lock().unwrap();
        state.cron_jobs.remove(name);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.watch_tx.subscribe()
    }
}
