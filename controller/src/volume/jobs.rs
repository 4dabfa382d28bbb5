// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recurring snapshot/backup jobs, materialized as cron-job records

use super::VolumeController;
use ballast_common::api::Error;
use ballast_types::job::ConcurrencyPolicy;
use ballast_types::job::CronJob;
use ballast_types::job::CronJobSpec;
use ballast_types::meta::cron_job_name_for_volume_and_job;
use ballast_types::settings::Settings;
use ballast_types::volume::RecurringJob;
use ballast_types::volume::RecurringJobType;
use ballast_types::volume::Volume;
use ballast_types::volume::VolumeState;
use std::collections::BTreeMap;

const LABEL_RECURRING_JOB: &str = "RecurringJob";

const CRON_JOB_BACKOFF_LIMIT: u32 = 3;

impl VolumeController {
    /// Brings the applied cron-job records in line with the volume's
    /// declared recurring jobs: create the missing ones, rewrite the drifted
    /// ones, delete the removed ones.  Jobs are suspended whenever the
    /// volume is not attached.
    pub(super) async fn update_recurring_jobs(
        &self,
        volume: &Volume,
    ) -> Result<(), Error> {
        let suspended = volume.status.state != Some(VolumeState::Attached);

        let settings = self.datastore.settings_get().await?;

        let applied: BTreeMap<String, CronJob> = self
            .datastore
            .cron_job_list_for_volume(&volume.metadata.name)
            .await?
            .into_iter()
            .map(|job| (job.metadata.name.clone(), job))
            .collect();

        let mut current: BTreeMap<String, CronJob> = BTreeMap::new();
        for job in &volume.spec.recurring_jobs {
            if job.task == RecurringJobType::Backup
                && settings.backup_target.is_none()
            {
                return Err(Error::invalid_request(
                    "cannot backup with empty backup target",
                ));
            }
            let cron_job =
                self.build_cron_job(volume, job, suspended, &settings);
            current.insert(cron_job.metadata.name.clone(), cron_job);
        }

        for (name, cron_job) in &current {
            match applied.get(name) {
                None => {
                    self.datastore.cron_job_create(cron_job.clone()).await?;
                }
                Some(existing) if existing.spec != cron_job.spec => {
                    let mut updated = existing.clone();
                    updated.spec = cron_job.spec.clone();
                    self.datastore.cron_job_update(&updated).await?;
                }
                Some(_) => (),
            }
        }
        for name in applied.keys() {
            if !current.contains_key(name) {
                self.datastore.cron_job_delete(name).await?;
            }
        }

        Ok(())
    }

    fn build_cron_job(
        &self,
        volume: &Volume,
        job: &RecurringJob,
        suspend: bool,
        settings: &Settings,
    ) -> CronJob {
        let mut command = vec![
            "ballast-manager".to_string(),
            "-d".to_string(),
            "snapshot".to_string(),
            volume.metadata.name.clone(),
            "--snapshot-name".to_string(),
            job.name.clone(),
            "--labels".to_string(),
            format!("{}={}", LABEL_RECURRING_JOB, job.name),
            "--retain".to_string(),
            job.retain.to_string(),
        ];
        let mut credential_secret = None;
        if job.task == RecurringJobType::Backup {
            command.push("--backuptarget".to_string());
            command.push(settings.backup_target.clone().unwrap_or_default());
            credential_secret =
                settings.backup_target_credential_secret.clone();
        }
        CronJob {
            metadata: Self::child_metadata(
                volume,
                cron_job_name_for_volume_and_job(
                    &volume.metadata.name,
                    &job.name,
                ),
            ),
            spec: CronJobSpec {
                schedule: job.cron.clone(),
                concurrency_policy: ConcurrencyPolicy::Forbid,
                suspend,
                backoff_limit: CRON_JOB_BACKOFF_LIMIT,
                node_id: volume.spec.node_id.clone(),
                command,
                credential_secret,
            },
        }
    }
}
