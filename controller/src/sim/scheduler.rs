// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated replica scheduler

use crate::scheduler::ReplicaScheduler;
use async_trait::async_trait;
use ballast_common::api::Error;
use ballast_types::replica::Replica;
use camino::Utf8PathBuf;
use std::sync::Mutex;

/// Round-robins replicas across a fixed node list
pub struct FixedScheduler {
    nodes: Vec<String>,
    next: Mutex<usize>,
}

impl FixedScheduler {
    pub fn new(nodes: &[&str]) -> FixedScheduler {
        FixedScheduler {
            nodes: nodes.iter().map(|node| node.to_string()).collect(),
            next: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ReplicaScheduler for FixedScheduler {
    async fn schedule_replica(
        &self,
        mut replica: Replica,
    ) -> Result<Replica, Error> {
        if self.nodes.is_empty() {
            return Err(Error::unavail("no schedulable node available"));
        }
        let node = {
            let mut next = self.next.lock().unwrap();
            let node = self.nodes[*next % self.nodes.len()].clone();
            *next += 1;
            node
        };
        replica.spec.node_id = Some(node);
        replica.spec.data_path = Some(Utf8PathBuf::from(format!(
            "/var/lib/ballast/replicas/{}",
            replica.metadata.name
        )));
        Ok(replica)
    }
}
