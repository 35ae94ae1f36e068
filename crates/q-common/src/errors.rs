// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Error types for the 6top sublayer
//!
//! This module defines the unified error type used by the 6P codec, the
//! neighbor and transaction tables, the dispatcher and the scheduling
//! function registry. Errors are `Copy`, carry no heap data and map onto a
//! stable 16-bit code for diagnostics.
//!
//! Protocol-level failures that travel on the wire (ERR_SEQNUM, ERR_BUSY, ...)
//! are return codes in the 6P packet, not variants of this enum. This enum
//! covers what the local caller sees.

use core::fmt;

/// Result type alias for 6top operations
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the 6top sublayer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Codec Errors (0x01xx)
    // =========================================================================
    /// Frame is shorter than the 6P header
    FrameTooShort,
    /// 6P version field is not supported
    UnsupportedVersion,
    /// Message type is reserved or undefined
    InvalidMessageType,
    /// Command or return code is undefined for the message type
    InvalidCode,
    /// Field is not part of the body layout for this (type, code)
    FieldNotDefined,
    /// Body does not fit into a single 6P frame
    BodyTooLong,

    // =========================================================================
    // Transaction Errors (0x02xx)
    // =========================================================================
    /// An initiator transaction already occupies the (peer, SFID) pair
    TransactionBusy,
    /// A responder transaction already occupies the (peer, SFID) pair
    TransactionLocked,
    /// No free transaction slot
    TransactionTableFull,
    /// No transaction exists for the (peer, SFID) pair
    NoTransaction,
    /// Event is not acceptable in the current transaction state
    InvalidTransition,
    /// Sequence number does not match the transaction
    SeqNumMismatch,

    // =========================================================================
    // Neighbor Errors (0x03xx)
    // =========================================================================
    /// Neighbor table has no free entry
    NeighborTableFull,
    /// Neighbor already has an entry
    NeighborExists,

    // =========================================================================
    // Scheduling Function Errors (0x04xx)
    // =========================================================================
    /// No scheduling function registered for the SFID
    UnknownSfid,
    /// SFID is already registered
    SfidInUse,
    /// Registry has no room for another scheduling function
    SfRegistryFull,

    // =========================================================================
    // Collaborator Errors (0x05xx)
    // =========================================================================
    /// MAC layer refused the frame
    SendFailed,
    /// Timer service could not arm an alarm
    TimerUnavailable,
    /// Deferred notification queue overflowed
    NotificationQueueFull,

    // =========================================================================
    // General Errors (0xFFxx)
    // =========================================================================
    /// Buffer is too small for operation
    BufferTooSmall,
    /// Invalid parameter provided
    InvalidParameter,
    /// Invalid state for the operation
    InvalidState,
    /// Internal error (should not occur)
    InternalError,
}

impl Error {
    /// Get the error code for this error
    ///
    /// Error codes are organized by category:
    /// - 0x01xx: Codec errors
    /// - 0x02xx: Transaction errors
    /// - 0x03xx: Neighbor errors
    /// - 0x04xx: Scheduling function errors
    /// - 0x05xx: Collaborator (MAC, timer) errors
    /// - 0xFFxx: General errors
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            // Codec errors (0x01xx)
            Self::FrameTooShort => 0x0101,
            Self::UnsupportedVersion => 0x0102,
            Self::InvalidMessageType => 0x0103,
            Self::InvalidCode => 0x0104,
            Self::FieldNotDefined => 0x0105,
            Self::BodyTooLong => 0x0106,

            // Transaction errors (0x02xx)
            Self::TransactionBusy => 0x0201,
            Self::TransactionLocked => 0x0202,
            Self::TransactionTableFull => 0x0203,
            Self::NoTransaction => 0x0204,
            Self::InvalidTransition => 0x0205,
            Self::SeqNumMismatch => 0x0206,

            // Neighbor errors (0x03xx)
            Self::NeighborTableFull => 0x0301,
            Self::NeighborExists => 0x0302,

            // SF errors (0x04xx)
            Self::UnknownSfid => 0x0401,
            Self::SfidInUse => 0x0402,
            Self::SfRegistryFull => 0x0403,

            // Collaborator errors (0x05xx)
            Self::SendFailed => 0x0501,
            Self::TimerUnavailable => 0x0502,
            Self::NotificationQueueFull => 0x0503,

            // General errors (0xFFxx)
            Self::BufferTooSmall => 0xFF01,
            Self::InvalidParameter => 0xFF02,
            Self::InvalidState => 0xFF03,
            Self::InternalError => 0xFF04,
        }
    }

    /// Check if this is a local encoding error (the `EINVAL` family)
    ///
    /// Encoding errors are resolved locally and never sent on the wire.
    #[must_use]
    pub const fn is_encoding_error(&self) -> bool {
        matches!(
            self,
            Self::FieldNotDefined
                | Self::BodyTooLong
                | Self::BufferTooSmall
                | Self::InvalidParameter
        )
    }

    /// Get a short description of the error
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::FrameTooShort => "frame too short",
            Self::UnsupportedVersion => "unsupported 6P version",
            Self::InvalidMessageType => "invalid message type",
            Self::InvalidCode => "invalid command or return code",
            Self::FieldNotDefined => "field not defined for type and code",
            Self::BodyTooLong => "body too long",
            Self::TransactionBusy => "transaction busy",
            Self::TransactionLocked => "transaction locked",
            Self::TransactionTableFull => "transaction table full",
            Self::NoTransaction => "no transaction",
            Self::InvalidTransition => "invalid state transition",
            Self::SeqNumMismatch => "sequence number mismatch",
            Self::NeighborTableFull => "neighbor table full",
            Self::NeighborExists => "neighbor already exists",
            Self::UnknownSfid => "unknown SFID",
            Self::SfidInUse => "SFID already registered",
            Self::SfRegistryFull => "SF registry full",
            Self::SendFailed => "MAC send failed",
            Self::TimerUnavailable => "timer unavailable",
            Self::NotificationQueueFull => "notification queue full",
            Self::BufferTooSmall => "buffer too small",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidState => "invalid state",
            Self::InternalError => "internal error",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "[0x{:04X}] {}", self.code(), self.description());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_categories() {
        assert_eq!(Error::FieldNotDefined.code() >> 8, 0x01);
        assert_eq!(Error::SeqNumMismatch.code() >> 8, 0x02);
        assert_eq!(Error::NeighborTableFull.code() >> 8, 0x03);
        assert_eq!(Error::SfidInUse.code() >> 8, 0x04);
        assert_eq!(Error::SendFailed.code() >> 8, 0x05);
        assert_eq!(Error::BufferTooSmall.code() >> 8, 0xFF);
    }

    #[test]
    fn test_classification() {
        assert!(Error::BufferTooSmall.is_encoding_error());
        assert!(Error::FieldNotDefined.is_encoding_error());
        assert!(!Error::TransactionBusy.is_encoding_error());
        assert!(!Error::NotificationQueueFull.is_encoding_error());
    }
}
