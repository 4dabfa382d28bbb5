// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and working with a volume
//! controller configuration

use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;

// By design, we require that all config properties be specified (i.e., we
// don't use `serde(default)`).

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ControllerConfig {
    /// identity of this controller instance, used to claim volume ownership
    pub controller_id: String,
    /// number of parallel reconciliation workers
    pub workers: usize,
    /// consecutive non-conflict failures for one volume before its key is
    /// dropped from the queue
    pub max_retries: u32,
}

impl ControllerConfig {
    /// Load a `ControllerConfig` from the given TOML file.
    pub fn from_file(path: &Utf8Path) -> Result<ControllerConfig, LoadError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.to_owned(), err })?;
        toml::from_str(&contents)
            .map_err(|err| LoadError::Parse { path: path.to_owned(), err })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("read \"{path}\"")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("parse \"{path}\"")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

#[cfg(test)]
mod test {
    use super::ControllerConfig;
    use super::LoadError;
    use camino::Utf8Path;

    #[test]
    fn test_valid_config() {
        let config: ControllerConfig = toml::from_str(
            r#"
            controller_id = "node-1"
            workers = 4
            max_retries = 3
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            ControllerConfig {
                controller_id: "node-1".to_string(),
                workers: 4,
                max_retries: 3,
            }
        );
    }

    #[test]
    fn test_config_missing_properties() {
        // all properties are required
        let parsed = toml::from_str::<ControllerConfig>("workers = 4");
        let error = parsed.unwrap_err();
        assert!(error.to_string().contains("missing field"));
    }

    #[test]
    fn test_config_nonexistent_file() {
        let error = ControllerConfig::from_file(Utf8Path::new(
            "/nonexistent/ballast-controller.toml",
        ))
        .unwrap_err();
        match error {
            LoadError::Io { path, err } => {
                assert_eq!(path, "/nonexistent/ballast-controller.toml");
                assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
