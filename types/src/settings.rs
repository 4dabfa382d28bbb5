// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster-wide settings consumed by the controller

use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Settings {
    /// URL of the backup store; backup jobs cannot run without one
    pub backup_target: Option<String>,
    /// name of the secret holding credentials for the backup store
    pub backup_target_credential_secret: Option<String>,
}
