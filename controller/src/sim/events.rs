// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A recording event sink

use crate::events::Event;
use crate::events::EventReason;
use crate::events::EventSink;
use std::sync::Mutex;

/// Buffers published events so tests can assert on them
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> EventLog {
        EventLog::default()
    }

    /// Returns and clears the buffered events.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    /// Returns the reasons of the buffered events, in publication order,
    /// without clearing them.
    pub fn reasons(&self) -> Vec<EventReason> {
        self.events.lock().unwrap().iter().map(|event| event.reason).collect()
    }
}

impl EventSink for EventLog {
    fn publish(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
