// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Utilities to assist with testing across ballast crates.

#[macro_use]
extern crate slog;

pub mod poll;

use slog::Drain;

/// Return a slog::Logger for use during testing
pub fn test_slog_logger(test_name: &'static str) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, o!("component" => test_name))
}
