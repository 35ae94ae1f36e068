// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Scheduling functions
//!
//! - `list`: LIST pagination helpers shared by SF implementations
//! - `simple`: first-fit reference SF

pub mod list;
pub mod simple;

pub use list::{list_window, ListCursor, ListStep};
pub use simple::{ScheduledCell, SfStats, SimpleSf, SIMPLE_SFID};
