// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-volume reconciliation loop
//!
//! Each pass over a volume runs a fixed sequence of sub-stages: claim
//! ownership, handle deletion, translate engine-reported replica modes into
//! health marks, drive the attach/detach state machine, reconcile recurring
//! jobs, roll the engine image forward, and garbage-collect stale replicas.
//! A pass is a short, side-effect-bounded function: after any write whose
//! effect the controller must observe before continuing, it returns and
//! relies on the resulting watch callback to wake the volume again.

mod cleanup;
mod health;
mod jobs;
mod state;
mod upgrade;

use crate::config::ControllerConfig;
use crate::datastore::DataStore;
use crate::datastore::WatchEvent;
use crate::events::Event;
use crate::events::EventKind;
use crate::events::EventReason;
use crate::events::EventSink;
use crate::events::ObjectRef;
use crate::queue::WorkQueue;
use crate::scheduler::ReplicaScheduler;
use ballast_common::api::Error;
use ballast_common::api::ResourceType;
use ballast_types::engine::Engine;
use ballast_types::meta::cron_job_name_for_volume_and_job;
use ballast_types::meta::ObjectMeta;
use ballast_types::meta::OwnerReference;
use ballast_types::meta::LABEL_VOLUME;
use ballast_types::replica::Replica;
use ballast_types::volume::Volume;
use ballast_types::volume::VolumeState;
use chrono::DateTime;
use chrono::Utc;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

/// Drives every volume this controller instance owns toward its declared
/// state
pub struct VolumeController {
    log: Logger,
    controller_id: String,
    max_retries: u32,
    datastore: Arc<dyn DataStore>,
    scheduler: Arc<dyn ReplicaScheduler>,
    events: Arc<dyn EventSink>,
    queue: WorkQueue<String>,
    now: fn() -> DateTime<Utc>,
}

impl VolumeController {
    pub fn new(
        config: &ControllerConfig,
        datastore: Arc<dyn DataStore>,
        scheduler: Arc<dyn ReplicaScheduler>,
        events: Arc<dyn EventSink>,
        log: &Logger,
    ) -> VolumeController {
        let log = log.new(o!(
            "component" => "volume-controller",
            "controller_id" => config.controller_id.clone(),
        ));
        VolumeController {
            log,
            controller_id: config.controller_id.clone(),
            max_retries: config.max_retries,
            datastore,
            scheduler,
            events,
            queue: WorkQueue::new(),
            now: Utc::now,
        }
    }

    /// Overrides the wall clock used for failure and health timestamps.
    /// Intended for tests that compare records against fixed expectations.
    pub fn set_clock(&mut self, now: fn() -> DateTime<Utc>) {
        self.now = now;
    }

    /// Runs the controller until `shutdown` fires: a pump task feeds watch
    /// callbacks into the work queue and `workers` tasks drain it.
    /// In-flight passes run to completion on shutdown.
    pub async fn run(
        self: Arc<Self>,
        workers: usize,
        shutdown: oneshot::Receiver<()>,
    ) {
        info!(self.log, "starting volume controller"; "workers" => workers);

        let mut tasks = JoinSet::new();
        let pump = {
            let controller = Arc::clone(&self);
            let events = self.datastore.watch();
            tasks.spawn(async move { controller.pump_watch_events(events).await })
        };
        for _ in 0..workers {
            let controller = Arc::clone(&self);
            tasks.spawn(async move { controller.worker().await });
        }

        let _ = shutdown.await;
        info!(self.log, "shutting down volume controller");
        self.queue.shut_down();
        // the pump blocks on the watch channel, which outlives us
        pump.abort();
        while tasks.join_next().await.is_some() {}
        info!(self.log, "volume controller shut down");
    }

    async fn pump_watch_events(
        &self,
        mut events: broadcast::Receiver<WatchEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_watch_event(event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(
                        self.log,
                        "watch channel lagged, events dropped";
                        "missed" => missed,
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_watch_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::VolumeChanged(volume) => self.enqueue_volume(&volume),
            WatchEvent::EngineChanged(engine) => {
                self.enqueue_controllee_change(&engine.metadata).await
            }
            WatchEvent::ReplicaChanged(replica) => {
                self.enqueue_controllee_change(&replica.metadata).await
            }
        }
    }

    fn enqueue_volume(&self, volume: &Volume) {
        self.queue.add_rate_limited(volume.metadata.name.clone());
    }

    async fn enqueue_controllee_change(&self, metadata: &ObjectMeta) {
        if let Some(reference) = metadata.volume_owner() {
            self.resolve_ref_and_enqueue(reference).await;
        }
    }

    async fn resolve_ref_and_enqueue(&self, reference: &OwnerReference) {
        let volume = match self.datastore.volume_get(&reference.name).await {
            Ok(Some(volume)) => volume,
            Ok(None) | Err(_) => return,
        };
        // the volume holding this name may not be the one the reference
        // points at
        if volume.metadata.uid != reference.uid {
            return;
        }
        // not ours
        if volume.spec.owner_id.as_deref() != Some(self.controller_id.as_str())
        {
            return;
        }
        self.enqueue_volume(&volume);
    }

    async fn worker(&self) {
        while let Some(key) = self.queue.get().await {
            let result = self.sync_volume(&key).await;
            self.handle_sync_result(&key, result);
            self.queue.done(&key);
        }
    }

    fn handle_sync_result(&self, key: &String, result: Result<(), Error>) {
        let error = match result {
            Ok(()) => {
                self.queue.forget(key);
                return;
            }
            Err(error) => error,
        };
        if error.is_conflict() {
            // somebody else moved a record we were writing; re-read and try
            // again without charging the retry budget
            debug!(
                self.log,
                "requeueing volume after conflict";
                "volume" => key.clone(),
            );
            self.queue.add(key.clone());
            return;
        }
        if self.queue.num_requeues(key) < self.max_retries {
            warn!(
                self.log,
                "error syncing volume, requeueing";
                "volume" => key.clone(),
                "error" => %error,
            );
            self.queue.add_rate_limited(key.clone());
            return;
        }
        error!(
            self.log,
            "dropping volume out of the queue";
            "volume" => key.clone(),
            "error" => %error,
        );
        self.queue.forget(key);
    }

    /// Runs one reconciliation pass for the named volume.
    pub async fn sync_volume(&self, name: &str) -> Result<(), Error> {
        let mut volume = match self.datastore.volume_get(name).await? {
            Some(volume) => volume,
            None => {
                info!(self.log, "volume has been deleted"; "volume" => name.to_string());
                return Ok(());
            }
        };

        match &volume.spec.owner_id {
            None => {
                volume.spec.owner_id = Some(self.controller_id.clone());
                match self.datastore.volume_update(&volume).await {
                    Ok(updated) => {
                        debug!(
                            self.log,
                            "picked up volume";
                            "volume" => name.to_string(),
                        );
                        volume = updated;
                    }
                    // we don't mind others coming first
                    Err(error) if error.is_conflict() => return Ok(()),
                    Err(error) => return Err(error),
                }
            }
            Some(owner) if owner != &self.controller_id => {
                // not ours
                return Ok(());
            }
            Some(_) => (),
        }

        let mut engine =
            self.datastore.engine_get_for_volume(name).await?;
        let mut replicas: BTreeMap<String, Replica> = self
            .datastore
            .replica_list_for_volume(name)
            .await?
            .into_iter()
            .map(|replica| (replica.metadata.name.clone(), replica))
            .collect();

        if volume.metadata.deletion_timestamp.is_some() {
            return self
                .handle_volume_deletion(&mut volume, engine.as_ref(), &replicas)
                .await;
        }

        self.reconcile_engine_replica_state(
            &mut volume,
            engine.as_ref(),
            &mut replicas,
        )
        .await?;
        self.reconcile_volume_state(&mut volume, &mut engine, &mut replicas)
            .await?;
        self.update_recurring_jobs(&volume).await?;
        self.upgrade_engine_for_volume(&mut volume, &mut engine, &mut replicas)
            .await?;
        self.cleanup_corrupted_or_stale_replicas(&volume, &mut replicas)
            .await?;

        // persist whatever the stages changed on the volume itself
        self.datastore.volume_update(&volume).await?;
        Ok(())
    }

    /// Tears a volume down once its deletion marker is set: children first,
    /// then the finalizer.
    async fn handle_volume_deletion(
        &self,
        volume: &mut Volume,
        engine: Option<&Engine>,
        replicas: &BTreeMap<String, Replica>,
    ) -> Result<(), Error> {
        if volume.status.state != Some(VolumeState::Deleting) {
            volume.status.state = Some(VolumeState::Deleting);
            *volume = self.datastore.volume_update(volume).await?;
            self.event(
                volume,
                EventKind::Normal,
                EventReason::Delete,
                format!("Deleting volume {}", volume.metadata.name),
            );
        }

        for job in &volume.spec.recurring_jobs {
            self.datastore
                .cron_job_delete(&cron_job_name_for_volume_and_job(
                    &volume.metadata.name,
                    &job.name,
                ))
                .await?;
        }

        if let Some(engine) = engine {
            if engine.metadata.deletion_timestamp.is_none() {
                self.datastore.engine_delete(&engine.metadata.name).await?;
            }
        }

        for replica in replicas.values() {
            if replica.metadata.deletion_timestamp.is_none() {
                self.datastore.replica_delete(&replica.metadata.name).await?;
            }
        }

        // the finalizer holds the volume until the executors have released
        // every child; watch events re-wake us as they go away
        if engine.is_some() || !replicas.is_empty() {
            return Ok(());
        }
        self.datastore.volume_remove_finalizer(volume).await
    }

    pub(crate) fn event(
        &self,
        volume: &Volume,
        kind: EventKind,
        reason: EventReason,
        message: String,
    ) {
        self.events.publish(Event {
            object: ObjectRef::from_meta(
                ResourceType::Volume,
                &volume.metadata,
            ),
            kind,
            reason,
            message,
        });
    }

    /// Builds metadata for a record owned by (and labeled with) a volume.
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
}
