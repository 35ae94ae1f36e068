// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Constants for the 6top sublayer
//!
//! Wire-format sizes from the 6P message layout and the compile-time
//! capacities of the engine's fixed tables.

// =============================================================================
// Wire Format
// =============================================================================

/// 6P protocol version carried in the header
pub const SIXP_VERSION: u8 = 0;

/// Length of the 6P header (version/type, code, SFID, SeqNum)
pub const SIXP_HEADER_LEN: usize = 4;

/// Size of one cell on the wire (slot offset + channel offset)
pub const SIXP_CELL_LEN: usize = 4;

/// Initial sequence number of a fresh neighbor
pub const SIXP_INITIAL_SEQNUM: u8 = 0;

// =============================================================================
// Frame Limits
// =============================================================================

/// Largest body carried in one 6P message
pub const MAX_BODY_LEN: usize = 100;

/// Largest 6P message (header + body)
pub const MAX_FRAME_LEN: usize = SIXP_HEADER_LEN + MAX_BODY_LEN;

/// Largest number of cells in one cell list field
pub const MAX_CELLS_PER_LIST: usize = (MAX_BODY_LEN - 4) / SIXP_CELL_LEN;

// =============================================================================
// Table Capacities
// =============================================================================

/// Concurrent transactions across all peers and SFs
pub const MAX_TRANSACTIONS: usize = 8;

/// Neighbors with 6P soft state
pub const MAX_NEIGHBORS: usize = 16;

/// Registered scheduling functions
pub const MAX_SCHEDULING_FUNCTIONS: usize = 4;

/// Deferred SF notifications held between dispatch rounds
pub const MAX_PENDING_NOTIFICATIONS: usize = 16;

// =============================================================================
// Timing
// =============================================================================

/// Transaction timeout used when an SF does not specify one (milliseconds)
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u32 = 1_000;

/// Neighbor generation counter upper bound before wrapping back to 1
pub const SIXP_GEN_MAX: u8 = 0x09;
