// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Record metadata: identity, versioning, labels, ownership, and deletion

use ballast_common::api::Generation;
use ballast_common::api::ResourceType;
use chrono::DateTime;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Finalizer placed on volumes so that the record outlives its children
pub const VOLUME_FINALIZER: &str = "ballast.io";

/// Label linking engines, replicas, and cron jobs to their owning volume
pub const LABEL_VOLUME: &str = "ballastvolume";

const RANDOM_ID_LENGTH: usize = 8;

const ENGINE_SUFFIX: &str = "-e";
const REPLICA_SUFFIX: &str = "-r";
const RECURRING_SUFFIX: &str = "-c";

/// Metadata common to every record in the datastore
///
/// `version` is bumped by the datastore on each successful update and is the
/// basis for optimistic concurrency control.  `deletion_timestamp` marks a
/// record whose removal has begun; `finalizers` hold the record in place
/// until its children have been reaped.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ObjectMeta {
    pub name: String,
    pub uid: Uuid,
    pub version: Generation,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub finalizers: Vec<String>,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

impl ObjectMeta {
    pub fn new(name: &str) -> ObjectMeta {
        let now = Utc::now();
        ObjectMeta {
            name: name.to_owned(),
            uid: Uuid::new_v4(),
            version: Generation::new(),
            labels: BTreeMap::new(),
            owner_references: Vec::new(),
            deletion_timestamp: None,
            finalizers: Vec::new(),
            time_created: now,
            time_modified: now,
        }
    }

    /// Returns the owner reference pointing at a volume, if any
    pub fn volume_owner(&self) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|reference| reference.kind == ResourceType::Volume)
    }
}

/// A link from a child record (engine, replica, cron job) to its owner
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OwnerReference {
    pub kind: ResourceType,
    pub name: String,
    pub uid: Uuid,
}

/// Returns the name of the (single) engine for a volume.
pub fn engine_name_for_volume(volume_name: &str) -> String {
    format!("{}{}", volume_name, ENGINE_SUFFIX)
}

/// Generates a fresh replica name for a volume.
pub fn generate_replica_name_for_volume(volume_name: &str) -> String {
    format!("{}{}-{}", volume_name, REPLICA_SUFFIX, random_id())
}

/// Returns the name of the cron-job record for one recurring job of a volume.
pub fn cron_job_name_for_volume_and_job(volume_name: &str, job: &str) -> String {
    format!("{}-{}{}", volume_name, job, RECURRING_SUFFIX)
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_ID_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_child_names() {
        assert_eq!("vol-1-e", engine_name_for_volume("vol-1"));
        assert_eq!(
            "vol-1-daily-c",
            cron_job_name_for_volume_and_job("vol-1", "daily")
        );

        let replica = generate_replica_name_for_volume("vol-1");
        assert!(replica.starts_with("vol-1-r-"));
        assert_eq!("vol-1-r-".len() + RANDOM_ID_LENGTH, replica.len());
        assert_ne!(replica, generate_replica_name_for_volume("vol-1"));
    }
}
