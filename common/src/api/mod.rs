// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data structures shared across the control plane's component boundaries
//!
//! The contents here are transport-agnostic: the same types describe records
//! in the datastore, arguments to the scheduler, and values reported by
//! executors.

mod error;
pub use error::*;

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;

/*
 * The type aliases below exist primarily to ensure consistency among return
 * types for the datastore contract and the reconciler.
 */

/// Result of a create operation for the specified type
pub type CreateResult<T> = Result<T, Error>;
/// Result of a delete operation for the specified type
pub type DeleteResult = Result<(), Error>;
/// Result of a list operation that returns a vector
pub type ListResultVec<T> = Result<Vec<T>, Error>;
/// Result of a lookup operation for the specified type
pub type LookupResult<T> = Result<T, Error>;
/// Result of an update operation for the specified type
pub type UpdateResult<T> = Result<T, Error>;

/// A count of bytes, typically the provisioned size of a volume
///
/// The maximum byte count of i64::MAX comes from the fact that datastores
/// commonly represent this as a signed 64-bit integer.  Constraining it here
/// ensures that we can't fail to serialize the value.
#[derive(
    Copy, Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct ByteCount(u64);

impl ByteCount {
    pub fn from_kibibytes_u32(kibibytes: u32) -> ByteCount {
        ByteCount::try_from(1024 * u64::from(kibibytes)).unwrap()
    }

    pub fn from_mebibytes_u32(mebibytes: u32) -> ByteCount {
        ByteCount::try_from(1024 * 1024 * u64::from(mebibytes)).unwrap()
    }

    pub fn from_gibibytes_u32(gibibytes: u32) -> ByteCount {
        ByteCount::try_from(1024 * 1024 * 1024 * u64::from(gibibytes)).unwrap()
    }

    pub fn to_bytes(&self) -> u64 {
        self.0
    }
    pub fn to_whole_kibibytes(&self) -> u64 {
        self.to_bytes() / 1024
    }
    pub fn to_whole_mebibytes(&self) -> u64 {
        self.to_bytes() / 1024 / 1024
    }
    pub fn to_whole_gibibytes(&self) -> u64 {
        self.to_bytes() / 1024 / 1024 / 1024
    }
}

#[derive(Debug, Eq, thiserror::Error, Ord, PartialEq, PartialOrd)]
pub enum ByteCountRangeError {
    #[error("value is too small for a byte count")]
    TooSmall,
    #[error("value is too large for a byte count")]
    TooLarge,
}

impl TryFrom<u64> for ByteCount {
    type Error = ByteCountRangeError;

    fn try_from(bytes: u64) -> Result<Self, Self::Error> {
        if i64::try_from(bytes).is_err() {
            Err(ByteCountRangeError::TooLarge)
        } else {
            Ok(ByteCount(bytes))
        }
    }
}

impl TryFrom<i64> for ByteCount {
    type Error = ByteCountRangeError;

    fn try_from(bytes: i64) -> Result<Self, Self::Error> {
        Ok(ByteCount(
            u64::try_from(bytes).map_err(|_| ByteCountRangeError::TooSmall)?,
        ))
    }
}

impl From<u32> for ByteCount {
    fn from(value: u32) -> Self {
        ByteCount(u64::from(value))
    }
}

impl From<&ByteCount> for i64 {
    fn from(b: &ByteCount) -> Self {
        // We have already validated that this value is in range.
        i64::try_from(b.0).unwrap()
    }
}

/// Generation numbers stored with each record, used for optimistic
/// concurrency control
///
/// Every successful update bumps the record's generation; an update carrying
/// a stale generation is rejected with [`Error::Conflict`].
#[derive(
    Copy, Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Generation(u64);

impl Generation {
    pub fn new() -> Generation {
        Generation(1)
    }

    pub fn next(&self) -> Generation {
        // It should technically be an operational error if this wraps or even
        // exceeds the value allowed by an i64.  But it seems unlikely enough
        // to happen in practice that we can probably feel safe with this.
        let next_gen = self.0 + 1;
        assert!(next_gen <= u64::try_from(i64::MAX).unwrap());
        Generation(next_gen)
    }
}

impl Default for Generation {
    fn default() -> Generation {
        Generation::new()
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str(&self.0.to_string())
    }
}

/// Identifies a type of record managed by the control plane
#[derive(
    Copy, Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum ResourceType {
    Volume,
    Engine,
    Replica,
    EngineImage,
    CronJob,
    Settings,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(
            f,
            "{}",
            match self {
                ResourceType::Volume => "volume",
                ResourceType::Engine => "engine",
                ResourceType::Replica => "replica",
                ResourceType::EngineImage => "engine image",
                ResourceType::CronJob => "cron job",
                ResourceType::Settings => "settings",
            }
        )
    }
}

#[cfg(test)]
mod test {
    use super::ByteCount;
    use super::Generation;

    #[test]
    fn test_bytecount() {
        let zero = ByteCount::try_from(0u64).unwrap();
        assert_eq!(0, zero.to_bytes());
        assert_eq!(0, zero.to_whole_kibibytes());

        let three_gib = ByteCount::from_gibibytes_u32(3);
        assert_eq!(3, three_gib.to_whole_gibibytes());
        assert_eq!(3 * 1024, three_gib.to_whole_mebibytes());
        assert_eq!(3 * 1024 * 1024 * 1024, three_gib.to_bytes());

        assert!(ByteCount::try_from(u64::MAX).is_err());
        assert!(ByteCount::try_from(-1i64).is_err());
    }

    #[test]
    fn test_generation() {
        let generation = Generation::new();
        assert_eq!("1", generation.to_string());
        assert_eq!("2", generation.next().to_string());
        assert!(generation < generation.next());
    }
}
