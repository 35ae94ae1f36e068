// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Tests for q-common
//!
//! Tests for addresses, error codes, configuration and logging.

#![cfg(test)]

mod types_tests {
    use q_common::LinkAddr;
    use std::collections::HashSet;

    #[test]
    fn test_link_addr_equality_and_hash() {
        let a = LinkAddr::new([1, 0, 0, 0, 0, 0, 0, 0]);
        let b = LinkAddr::new([2, 0, 0, 0, 0, 0, 0, 0]);
        let set: HashSet<_> = [a, b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_link_addr_as_ref() {
        let a = LinkAddr::new([9; 8]);
        assert_eq!(a.as_ref().len(), LinkAddr::SIZE);
        assert!(!a.is_null());
    }
}

mod errors_tests {
    use q_common::Error;
    use std::collections::HashSet;

    const ALL: [Error; 24] = [
        Error::FrameTooShort,
        Error::UnsupportedVersion,
        Error::InvalidMessageType,
        Error::InvalidCode,
        Error::FieldNotDefined,
        Error::BodyTooLong,
        Error::TransactionBusy,
        Error::TransactionLocked,
        Error::TransactionTableFull,
        Error::NoTransaction,
        Error::InvalidTransition,
        Error::SeqNumMismatch,
        Error::NeighborTableFull,
        Error::NeighborExists,
        Error::UnknownSfid,
        Error::SfidInUse,
        Error::SfRegistryFull,
        Error::SendFailed,
        Error::TimerUnavailable,
        Error::NotificationQueueFull,
        Error::BufferTooSmall,
        Error::InvalidParameter,
        Error::InvalidState,
        Error::InternalError,
    ];

    #[test]
    fn test_error_codes_unique() {
        let codes: HashSet<u16> = ALL.iter().map(Error::code).collect();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn test_error_display() {
        let s = format!("{}", Error::SeqNumMismatch);
        assert_eq!(s, "[0x0206] sequence number mismatch");
    }

    #[test]
    fn test_descriptions_non_empty() {
        for e in ALL {
            assert!(!e.description().is_empty());
        }
    }
}

mod config_tests {
    use q_common::log::LogLevel;
    use q_common::{Millis, ReplyConfig, SixtopConfig};

    #[test]
    fn test_default_config() {
        let config = SixtopConfig::default();
        assert_eq!(config, SixtopConfig::DEFAULT);
        assert_eq!(config.default_timeout, Millis::new(1_000));
        assert_eq!(config.replies, ReplyConfig::DEFAULT);
    }

    #[test]
    fn test_builder_overrides() {
        let config = SixtopConfig::DEFAULT
            .with_default_timeout(Millis::from_secs(3))
            .with_log_level(LogLevel::Debug);
        assert_eq!(config.default_timeout.as_millis(), 3_000);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_silent_replies() {
        let r = ReplyConfig::SILENT;
        assert!(!r.err_version && !r.err_sfid && !r.err_busy && !r.err_seqnum);
    }
}

mod log_tests {
    use q_common::log::{LogBuffer, LogLevel};
    use q_common::{log_info, log_trace};

    #[test]
    fn test_entry_format() {
        let mut log = LogBuffer::new(LogLevel::Info);
        log_info!(log, 0x10, "6top", "sent request [seqno:{}]", 3);
        let entry = log.last().expect("entry");
        assert_eq!(format!("{entry}"), "[00000010] I [6top] sent request [seqno:3]");
    }

    #[test]
    fn test_raise_level_at_runtime() {
        let mut log = LogBuffer::default();
        log_trace!(log, 0, "6top", "hidden");
        assert!(log.is_empty());
        log.set_min_level(LogLevel::Trace);
        log_trace!(log, 0, "6top", "visible");
        assert_eq!(log.iter().count(), 1);
        log.clear();
        assert!(log.is_empty());
    }
}
