// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated executor for engine and replica instances
//!
//! The real control plane delegates instance lifecycle to out-of-process
//! executors: they launch and stop the engine and replica processes, report
//! runtime state and addresses back into the records' status sections, run
//! the engine's replica monitoring, and release deleted records once the
//! underlying process is gone.  [`Executor::step`] performs one round of all
//! of that against the simulated datastore, so a test can interleave
//! controller passes with executor progress.

use super::Datastore;
use crate::datastore::DataStore;
use ballast_common::api::Error;
use ballast_types::engine::Engine;
use ballast_types::instance::InstanceDesireState;
use ballast_types::instance::InstanceState;
use ballast_types::instance::ReplicaMode;
use slog::Logger;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::Mutex;

pub struct Executor {
    log: Logger,
    datastore: Arc<Datastore>,
    state: Mutex<ExecutorState>,
}

#[derive(Default)]
struct ExecutorState {
    /// replica modes the engine should report instead of the default
    /// read-write, keyed by engine name then replica name
    mode_overrides: BTreeMap<String, BTreeMap<String, ReplicaMode>>,
    /// stable address assignment per instance name
    addresses: BTreeMap<String, IpAddr>,
    next_address: u8,
}

impl ExecutorState {
    fn address_for(&mut self, name: &str) -> IpAddr {
        if let Some(address) = self.addresses.get(name) {
            return *address;
        }
        self.next_address += 1;
        let address =
            IpAddr::V4(Ipv4Addr::new(10, 20, 0, self.next_address));
        self.addresses.insert(name.to_string(), address);
        address
    }
}

impl Executor {
    pub fn new(datastore: Arc<Datastore>, log: &Logger) -> Executor {
        Executor {
            log: log.new(o!("component" => "sim-executor")),
            datastore,
            state: Mutex::new(ExecutorState::default()),
        }
    }

    /// Advances every engine and replica one step: releases deleted records,
    /// starts and stops processes to match their desired state, and reports
    /// addresses and replica modes.
    pub async fn step(&self) -> Result<(), Error> {
        for engine in self.datastore.engines() {
            if engine.metadata.deletion_timestamp.is_some() {
                self.datastore.purge_engine(&engine.metadata.name);
                continue;
            }
            self.step_engine(engine).await?;
        }
        for replica in self.datastore.replicas() {
            if replica.metadata.deletion_timestamp.is_some() {
                self.datastore.purge_replica(&replica.metadata.name);
                continue;
            }
            let mut updated = replica.clone();
            match replica.spec.desire_state {
                InstanceDesireState::Running => {
                    if updated.status.current_state
                        != Some(InstanceState::Running)
                    {
                        updated.status.current_state =
                            Some(InstanceState::Running);
                        updated.status.ip = Some(
                            self.state
                                .lock()
                                .unwrap()
                                .address_for(&replica.metadata.name),
                        );
                    }
                }
                InstanceDesireState::Stopped => {
                    if updated.status.current_state
                        != Some(InstanceState::Stopped)
                    {
                        updated.status.current_state =
                            Some(InstanceState::Stopped);
                        updated.status.ip = None;
                    }
                }
            }
            if updated != replica {
                self.datastore.replica_update(&updated).await?;
            }
        }
        Ok(())
    }

    async fn step_engine(&self, engine: Engine) -> Result<(), Error> {
        let mut updated = engine.clone();
        match engine.spec.desire_state {
            InstanceDesireState::Running => {
                if updated.status.current_state
                    != Some(InstanceState::Running)
                {
                    updated.status.current_state =
                        Some(InstanceState::Running);
                    updated.status.ip = Some(
                        self.state
                            .lock()
                            .unwrap()
                            .address_for(&engine.metadata.name),
                    );
                    updated.status.endpoint = Some(format!(
                        "/dev/ballast/{}",
                        engine.spec.volume_name
                    ));
                    updated.status.current_image =
                        Some(engine.spec.engine_image.clone());
                }
                // a staged upgrade set means the engine performs the image
                // handoff internally, atomically
                if updated.status.current_image.as_deref()
                    != Some(engine.spec.engine_image.as_str())
                    && !engine.spec.upgraded_replica_address_map.is_empty()
                {
                    info!(
                        self.log,
                        "engine switched over to staged image";
                        "engine" => engine.metadata.name.clone(),
                        "image" => engine.spec.engine_image.clone(),
                    );
                    updated.status.current_image =
                        Some(engine.spec.engine_image.clone());
                }
                let backends = if !engine
                    .spec
                    .upgraded_replica_address_map
                    .is_empty()
                    && updated.status.current_image.as_deref()
                        == Some(engine.spec.engine_image.as_str())
                {
                    &engine.spec.upgraded_replica_address_map
                } else {
                    &engine.spec.replica_address_map
                };
                let state = self.state.lock().unwrap();
                let overrides =
                    state.mode_overrides.get(&engine.metadata.name);
                updated.status.replica_mode_map = Some(
                    backends
                        .keys()
                        .map(|name| {
                            let mode = overrides
                                .and_then(|modes| modes.get(name))
                                .copied()
                                .unwrap_or(ReplicaMode::ReadWrite);
                            (name.clone(), mode)
                        })
                        .collect(),
                );
            }
            InstanceDesireState::Stopped => {
                if updated.status.current_state
                    != Some(InstanceState::Stopped)
                {
                    updated.status.current_state =
                        Some(InstanceState::Stopped);
                    updated.status.ip = None;
                    updated.status.endpoint = None;
                    updated.status.current_image = None;
                    updated.status.replica_mode_map = None;
                }
            }
        }
        if updated != engine {
            self.datastore.engine_update(&updated).await?;
        }
        Ok(())
    }

    /// Makes the engine report the given mode for one replica, now and on
    /// every subsequent step.
    pub async fn set_replica_mode(
        &self,
        engine_name: &str,
        replica_name: &str,
        mode: ReplicaMode,
    ) -> Result<(), Error> {
        {
            let mut state = self.state.lock().unwrap();
            state
                .mode_overrides
                .entry(engine_name.to_string())
                .or_default()
                .insert(replica_name.to_string(), mode);
        }
        // reflect the new mode immediately, without waiting for a step
        let Some(mut engine) = self
            .datastore
            .engines()
            .into_iter()
            .find(|engine| engine.metadata.name == engine_name)
        else {
            return Err(Error::not_found_by_name(
                ballast_common::api::ResourceType::Engine,
                engine_name,
            ));
        };
        if let Some(mode_map) = engine.status.replica_mode_map.as_mut() {
            if mode_map.contains_key(replica_name) {
                mode_map.insert(replica_name.to_string(), mode);
                self.datastore.engine_update(&engine).await?;
            }
        }
        Ok(())
    }

    /// Forces an engine into the given runtime state, e.g. to simulate an
    /// unexpected engine death.
    pub async fn set_engine_state(
        &self,
        engine_name: &str,
        state: InstanceState,
    ) -> Result<(), Error> {
        let Some(mut engine) = self
            .datastore
            .engines()
            .into_iter()
            .find(|engine| engine.metadata.name == engine_name)
        else {
            return Err(Error::not_found_by_name(
                ballast_common::api::ResourceType::Engine,
                engine_name,
            ));
        };
        engine.status.current_state = Some(state);
        self.datastore.engine_update(&engine).await?;
        Ok(())
    }
}
