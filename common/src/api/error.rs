// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the ballast control plane

use crate::api::ResourceType;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// An error that can be generated within a control plane component
///
/// These may be generated while handling an API request or as part of
/// background reconciliation.  General best practices for error design apply
/// here.  Where possible, we want to reuse existing variants rather than
/// inventing new ones to distinguish cases that no programmatic consumer
/// needs to distinguish.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// An object needed as part of this operation was not found.
    #[error("Object (of type {type_name:?}) not found: {lookup_type:?}")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// An object already exists with the specified name or identifier.
    #[error("Object (of type {type_name:?}) already exists: {object_name}")]
    ObjectAlreadyExists { type_name: ResourceType, object_name: String },
    /// An update lost an optimistic-concurrency race: the record changed
    /// since it was read.
    #[error("Conflict updating object (of type {type_name:?}): {message}")]
    Conflict { type_name: ResourceType, message: String },
    /// The request was well-formed, but the operation cannot be completed
    /// given the current state of the system.
    #[error("Invalid Request: {message}")]
    InvalidRequest { message: String },
    /// The system (or part of it) is unavailable.
    #[error("Service Unavailable: {message}")]
    ServiceUnavailable { message: String },
    /// The system encountered an unhandled operational error.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
}

/// Indicates how an object was looked up (for an `ObjectNotFound` error)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    /// a specific name was requested
    ByName(String),
    /// a specific id was requested
    ById(Uuid),
    /// some other lookup type was used
    Other(String),
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably be
    /// retried
    pub fn retryable(&self) -> bool {
        match self {
            Error::ServiceUnavailable { .. } | Error::Conflict { .. } => true,

            Error::ObjectNotFound { .. }
            | Error::ObjectAlreadyExists { .. }
            | Error::InvalidRequest { .. }
            | Error::InternalError { .. } => false,
        }
    }

    /// Returns whether the error reports an optimistic-concurrency conflict
    ///
    /// Conflicts mean "somebody else got there first" and are handled by
    /// re-reading and retrying, never by failing the caller.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Returns whether the error reports a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound { .. })
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object
    /// name.
    pub fn not_found_by_name(type_name: ResourceType, name: &str) -> Error {
        Error::ObjectNotFound {
            type_name,
            lookup_type: LookupType::ByName(name.to_owned()),
        }
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object
    /// id.
    pub fn not_found_by_id(type_name: ResourceType, id: &Uuid) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: LookupType::ById(*id) }
    }

    /// Generates an [`Error::Conflict`] error with the specific message
    pub fn conflict(type_name: ResourceType, message: &str) -> Error {
        Error::Conflict { type_name, message: message.to_owned() }
    }

    /// Generates an [`Error::InvalidRequest`] error with the specific message
    pub fn invalid_request(message: &str) -> Error {
        Error::InvalidRequest { message: message.to_owned() }
    }

    /// Generates an [`Error::InternalError`] error with the specific message
    ///
    /// InternalError should be used for operational conditions that should
    /// not happen but that we cannot reasonably handle at runtime (e.g.,
    /// finding two records for something that is supposed to be unique).
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    /// Generates an [`Error::ServiceUnavailable`] error with the specific
    /// message
    ///
    /// This should be used for transient failures where the caller might be
    /// expected to retry.  Logic errors or other problems indicating that a
    /// retry would not work should probably be an InternalError (if it's a
    /// server problem) or InvalidRequest (if it's a client problem) instead.
    pub fn unavail(message: &str) -> Error {
        Error::ServiceUnavailable { message: message.to_owned() }
    }
}
