// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Engine images and their deployment state
//!
//! Image records are maintained by a separate deployment controller; the
//! volume reconciler only reads them to validate live-upgrade preconditions.

use crate::meta::ObjectMeta;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

const CHECKSUM_NAME_LENGTH: usize = 8;
const IMAGE_PREFIX: &str = "ei-";

/// A deployable engine image
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EngineImage {
    pub metadata: ObjectMeta,
    pub spec: EngineImageSpec,
    pub status: EngineImageStatus,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EngineImageSpec {
    /// the image reference, e.g. `registry.example.com/ballast-engine:v1.2`
    pub image: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EngineImageStatus {
    pub state: EngineImageState,
    pub git_commit: String,
    /// the controller API version this image speaks
    pub controller_api_version: i64,
    /// the oldest controller API version this image can still talk to
    pub controller_api_min_version: i64,
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineImageState {
    Deploying,
    Ready,
    Incompatible,
}

/// Derives the datastore record name for an image reference.
///
/// Image references contain characters that are not valid in record names,
/// so records are keyed by a checksum of the reference instead.
pub fn engine_image_checksum_name(image: &str) -> String {
    let digest = Sha256::digest(image.trim().as_bytes());
    format!("{}{}", IMAGE_PREFIX, &hex::encode(digest)[..CHECKSUM_NAME_LENGTH])
}

#[cfg(test)]
mod test {
    use super::engine_image_checksum_name;

    #[test]
    fn test_checksum_name() {
        let name = engine_image_checksum_name("ballast-engine:v1");
        assert!(name.starts_with("ei-"));
        assert_eq!("ei-".len() + 8, name.len());

        // whitespace around the reference does not change the record name
        assert_eq!(name, engine_image_checksum_name("  ballast-engine:v1\n"));
        assert_ne!(name, engine_image_checksum_name("ballast-engine:v2"));
    }
}
