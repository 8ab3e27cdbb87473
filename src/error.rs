// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// Error kinds surfaced at the client/server API boundary.

use std::fmt;
use std::io;

use crate::object_id::ObjectId;

/// Error kinds surfaced at the API. Protocol-level errors (the first three
/// variants) travel in a reply body's `error` field and leave the connection
/// open; `Io` tears the connection down.
#[derive(thiserror::Error, Debug)]
pub enum PlasmaError {
    #[error("object already exists: {0}")]
    ObjectExists(ObjectId),

    #[error("object does not exist: {0}")]
    ObjectNonexistent(ObjectId),

    #[error("store is out of memory")]
    OutOfMemory,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation timed out")]
    Timeout,
}

pub type PlasmaResult<T> = Result<T, PlasmaError>;

/// The closed, wire-level error enumeration from the message codec.
/// Only the protocol-level errors that can be encoded in a reply
/// body's `error` field have a representation here; `Io`,
/// `InvalidArgument` and `Timeout` never cross the wire as this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    ObjectExists = 1,
    ObjectNonexistent = 2,
    OutOfMemory = 3,
}

impl ErrorCode {
    pub fn from_i32(v: i32) -> io::Result<Self> {
        match v {
            0 => Ok(ErrorCode::Ok),
            1 => Ok(ErrorCode::ObjectExists),
            2 => Ok(ErrorCode::ObjectNonexistent),
            3 => Ok(ErrorCode::OutOfMemory),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown error code {other}"),
            )),
        }
    }

    /// Recover the matching `PlasmaError` for a non-`Ok` code. `id` is
    /// attached to the variants that carry one; callers that don't have an
    /// id in context (e.g. a `Create` reply already carries its own id)
    /// pass it through from the reply body.
    pub fn into_result(self, id: ObjectId) -> PlasmaResult<()> {
        match self {
            ErrorCode::Ok => Ok(()),
            ErrorCode::ObjectExists => Err(PlasmaError::ObjectExists(id)),
            ErrorCode::ObjectNonexistent => Err(PlasmaError::ObjectNonexistent(id)),
            ErrorCode::OutOfMemory => Err(PlasmaError::OutOfMemory),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Ok => "Ok",
            ErrorCode::ObjectExists => "ObjectExists",
            ErrorCode::ObjectNonexistent => "ObjectNonexistent",
            ErrorCode::OutOfMemory => "OutOfMemory",
        };
        f.write_str(s)
    }
}

impl From<&PlasmaError> for ErrorCode {
    fn from(e: &PlasmaError) -> Self {
        match e {
            PlasmaError::ObjectExists(_) => ErrorCode::ObjectExists,
            PlasmaError::ObjectNonexistent(_) => ErrorCode::ObjectNonexistent,
            PlasmaError::OutOfMemory => ErrorCode::OutOfMemory,
            // Io/InvalidArgument/Timeout never reach the wire as an
            // ErrorCode; callers map them to connection teardown or a
            // local-only error instead.
            _ => ErrorCode::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_through_i32() {
        for code in [
            ErrorCode::Ok,
            ErrorCode::ObjectExists,
            ErrorCode::ObjectNonexistent,
            ErrorCode::OutOfMemory,
        ] {
            let v = code as i32;
            assert_eq!(ErrorCode::from_i32(v).unwrap(), code);
        }
    }

    #[test]
    fn unknown_error_code_is_rejected() {
        assert!(ErrorCode::from_i32(99).is_err());
    }

    #[test]
    fn ok_code_maps_to_success() {
        let id = ObjectId::new([7u8; crate::object_id::ID_SIZE]);
        assert!(ErrorCode::Ok.into_result(id).is_ok());
    }

    #[test]
    fn non_ok_codes_map_to_matching_plasma_error() {
        let id = ObjectId::new([7u8; crate::object_id::ID_SIZE]);
        assert!(matches!(
            ErrorCode::ObjectExists.into_result(id),
            Err(PlasmaError::ObjectExists(_))
        ));
        assert!(matches!(
            ErrorCode::ObjectNonexistent.into_result(id),
            Err(PlasmaError::ObjectNonexistent(_))
        ));
        assert!(matches!(
            ErrorCode::OutOfMemory.into_result(id),
            Err(PlasmaError::OutOfMemory)
        ));
    }

    #[test]
    fn local_only_errors_fall_back_to_ok_on_the_wire() {
        // Io/InvalidArgument/Timeout never have a wire representation of
        // their own; encoding one should never panic or pick a misleading
        // code, just the inert Ok value.
        let io_err = PlasmaError::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(ErrorCode::from(&io_err), ErrorCode::Ok);

        let invalid = PlasmaError::InvalidArgument("bad".into());
        assert_eq!(ErrorCode::from(&invalid), ErrorCode::Ok);

        assert_eq!(ErrorCode::from(&PlasmaError::Timeout), ErrorCode::Ok);
    }
}
