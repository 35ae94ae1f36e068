// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Common types for the 6top sublayer
//!
//! This module defines the link-layer address used to key neighbors and
//! transactions.

use core::fmt;

/// IEEE 802.15.4 extended link-layer address (8 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LinkAddr([u8; 8]);

impl LinkAddr {
    /// Size of a link-layer address in bytes
    pub const SIZE: usize = 8;

    /// The all-zero address
    pub const NULL: Self = Self([0; 8]);

    /// Create a link address from bytes
    #[must_use]
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Create a link address from a slice
    ///
    /// Returns `None` if the slice length is not exactly 8 bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Get the address as a byte array
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Check for the all-zero address
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == [0; 8]
    }
}

impl AsRef<[u8]> for LinkAddr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 8]> for LinkAddr {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkAddr({self})")
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for LinkAddr {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=[u8]:02x}", &self.0[..]);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::format;

    #[test]
    fn test_from_slice() {
        assert_eq!(
            LinkAddr::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]),
            Some(LinkAddr::new([1, 2, 3, 4, 5, 6, 7, 8]))
        );
        assert!(LinkAddr::from_slice(&[1, 2]).is_none());
        assert!(LinkAddr::NULL.is_null());
    }

    #[test]
    fn test_display() {
        let addr = LinkAddr::new([0x02, 0x00, 0xca, 0xfe, 0xc0, 0xca, 0xbe, 0xef]);
        assert_eq!(format!("{addr}"), "02:00:ca:fe:c0:ca:be:ef");
    }
}
