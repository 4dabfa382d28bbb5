// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Volume reconciliation core for the ballast control plane
//!
//! The controller continuously drives the observed state of each volume's
//! engine and replicas toward the user-declared desired state: repairing
//! damage, orchestrating attach/detach, rebuilding lost replicas, upgrading
//! engine images live, and materializing recurring snapshot/backup jobs.
//!
//! The external collaborators the controller leans on -- the versioned
//! object store, the replica scheduler, the executors owning engine and
//! replica processes, and the event sink -- are consumed as trait contracts
//! (see [`datastore`], [`scheduler`], and [`events`]).  Simulated
//! implementations of all of them live in [`sim`] for use by the test suite.

#[macro_use]
extern crate slog;

pub mod config;
pub mod datastore;
pub mod events;
pub mod queue;
pub mod scheduler;
pub mod sim;
pub mod volume;
