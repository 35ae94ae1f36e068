// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Q-SIXTOP for Qbitel EdgeOS
//!
//! 6P (6top protocol, RFC 8480) transaction engine for TSCH mesh nodes:
//!
//! - **Packet**: 6P header and body codec with per-message field layouts
//! - **Neighbors**: Per-neighbor sequence numbers and generation counters
//! - **Transactions**: 2-step and 3-step transaction state machine
//! - **Dispatcher**: Request admission, automatic error replies, timeouts
//! - **Scheduling Functions**: Registry and a first-fit reference SF
//!
//! The engine is I/O free: frames leave through a [`Mac`] and timeouts are
//! armed through a [`TimerService`], both supplied by the embedder.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "std")]
extern crate std;

pub mod pkt;
pub mod nbr;
pub mod trans;
pub mod timer;
pub mod mac;
pub mod sixp;
pub mod sixtop;
pub mod sf;

pub use pkt::{
    Cell, CellList, CellOptions, Code, Command, Field, Layout, MessageType, Packet, RawHeader,
    ReplyBody, RequestBody, ReturnCode,
};
pub use nbr::{Neighbor, NeighborTable};
pub use trans::{CallbackToken, Role, Transaction, TransactionId, TransactionState, TransactionTable};
pub use timer::{SoftTimer, TimerHandle, TimerService};
pub use mac::Mac;
pub use sixp::{
    Delivery, Inbound, Notification, Outbound, OutputStatus, SixpCore, SixpError, SixpHandle,
    TransactionInfo,
};
pub use sixtop::{CommandSet, SchedulingFunction, SfDescriptor, Sixtop};
pub use sf::{ScheduledCell, SimpleSf};
