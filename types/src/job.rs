// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cron-job records materialized for a volume's recurring jobs
//!
//! The cron scheduling infrastructure itself is external; the controller
//! only reconciles these records against the volume's declared recurring
//! jobs.

use crate::meta::ObjectMeta;
use serde::Deserialize;
use serde::Serialize;

/// One scheduled invocation of the management binary against a volume
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CronJob {
    pub metadata: ObjectMeta,
    pub spec: CronJobSpec,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CronJobSpec {
    /// cron expression
    pub schedule: String,
    pub concurrency_policy: ConcurrencyPolicy,
    /// suspended whenever the volume is not attached
    pub suspend: bool,
    pub backoff_limit: u32,
    /// node the job runs on, pinned to the volume's attachment node
    pub node_id: Option<String>,
    pub command: Vec<String>,
    /// name of the secret mounted for backup credentials
    pub credential_secret: Option<String>,
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// skip a scheduled run while the previous one is still going
    Forbid,
}
