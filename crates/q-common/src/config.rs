// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Configuration for the 6top sublayer
//!
//! Runtime knobs are grouped in [`SixtopConfig`]. Table capacities are
//! compile-time constants in [`crate::constants`].

use crate::constants::DEFAULT_TRANSACTION_TIMEOUT_MS;
use crate::log::LogLevel;
use crate::time::Millis;

/// 6top sublayer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SixtopConfig {
    /// Transaction timeout when neither the SF nor the caller gives one
    pub default_timeout: Millis,
    /// Minimum level recorded in the engine log
    pub log_level: LogLevel,
    /// Auto-reply policy for malformed or unacceptable requests
    pub replies: ReplyConfig,
}

impl SixtopConfig {
    /// Default configuration
    pub const DEFAULT: Self = Self {
        default_timeout: Millis::new(DEFAULT_TRANSACTION_TIMEOUT_MS),
        log_level: LogLevel::Info,
        replies: ReplyConfig::DEFAULT,
    };

    /// Override the default transaction timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Millis) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Override the log level
    #[must_use]
    pub const fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }
}

impl Default for SixtopConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which error responses the dispatcher sends on its own
///
/// These replies are generated without involving a scheduling function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ReplyConfig {
    /// Answer frames with an unsupported version with RC_ERR_VERSION
    pub err_version: bool,
    /// Answer requests for an unregistered SFID with RC_ERR_SFID
    pub err_sfid: bool,
    /// Answer requests on an occupied pair with RC_ERR_BUSY / RC_ERR_LOCKED
    pub err_busy: bool,
    /// Answer inconsistent sequence numbers with RC_ERR_SEQNUM
    pub err_seqnum: bool,
}

impl ReplyConfig {
    /// All auto-replies enabled
    pub const DEFAULT: Self = Self {
        err_version: true,
        err_sfid: true,
        err_busy: true,
        err_seqnum: true,
    };

    /// All auto-replies disabled (silent drop)
    pub const SILENT: Self = Self {
        err_version: false,
        err_sfid: false,
        err_busy: false,
        err_seqnum: false,
    };
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
