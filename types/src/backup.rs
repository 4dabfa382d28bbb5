// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for working with backup URLs

use ballast_common::api::Error;
use url::Url;

/// Extracts the backup id from a backup URL.
///
/// Backup URLs name the store plus the specific backup, e.g.
/// `s3://bucket@us-east-1/store?backup=backup-3a4f&volume=vol-1`; the
/// `backup` query parameter identifies the backup a restore volume starts
/// from.
pub fn backup_id_from_url(backup_url: &str) -> Result<String, Error> {
    let url = Url::parse(backup_url).map_err(|e| {
        Error::invalid_request(&format!(
            "invalid backup url {:?}: {}",
            backup_url, e
        ))
    })?;
    url.query_pairs()
        .find(|(key, _)| key == "backup")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            Error::invalid_request(&format!(
                "backup url {:?} has no backup id",
                backup_url
            ))
        })
}
