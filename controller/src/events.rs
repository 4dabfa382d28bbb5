// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The event sink contract: user-visible notifications about volumes

use ballast_common::api::ResourceType;
use ballast_types::meta::ObjectMeta;
use uuid::Uuid;

/// A structured, user-visible notification attached to a record
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub object: ObjectRef,
    pub kind: EventKind,
    pub reason: EventReason,
    pub message: String,
}

/// Identifies the record an event is about
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRef {
    pub kind: ResourceType,
    pub name: String,
    pub uid: Uuid,
}

impl ObjectRef {
    pub fn from_meta(kind: ResourceType, metadata: &ObjectMeta) -> ObjectRef {
        ObjectRef {
            kind,
            name: metadata.name.clone(),
            uid: metadata.uid,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    Normal,
    Warning,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventReason {
    Delete,
    Faulted,
    Healthy,
    Degraded,
    Attached,
    Detached,
}

/// Delivers events to whatever infrastructure the deployment uses
///
/// Publishing must not block: implementations buffer or drop, they do not
/// push back into the reconciliation path.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}
