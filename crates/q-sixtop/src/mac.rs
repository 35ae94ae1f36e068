// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! MAC Service
//!
//! The engine hands finished 6P frames to the MAC, which carries them to the
//! neighbor inside the 6top IETF IE. Delivery is not acknowledged back to
//! the engine; transaction timeouts cover lost frames.

use q_common::{LinkAddr, Result};

/// Frame transmission towards a neighbor
pub trait Mac {
    /// Queue `frame` for transmission to `dest`
    ///
    /// # Errors
    ///
    /// [`q_common::Error::SendFailed`] when the frame cannot be queued.
    fn send(&mut self, dest: &LinkAddr, frame: &[u8]) -> Result<()>;
}

impl<M: Mac + ?Sized> Mac for &mut M {
    fn send(&mut self, dest: &LinkAddr, frame: &[u8]) -> Result<()> {
        (**self).send(dest, frame)
    }
}
