// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types and facilities shared by every component of the ballast control
//! plane: the error model, record version numbers, byte counts, and retry
//! policies.

pub mod api;
pub mod backoff;
