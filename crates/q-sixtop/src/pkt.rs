// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! 6P Packet Codec
//!
//! Encodes and decodes 6P messages. A message is a 4-byte header followed by
//! a body whose layout is fixed by the (message type, code) pair:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version| T | R |     Code      |     SFID      |    SeqNum     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Other Fields...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The body is not self-describing. Every field accessor takes the
//! (type, code) pair, resolves it to a [`Layout`] and looks the field up in
//! that layout, so encoder and decoder always agree on positions. All
//! integers are little-endian.
//!
//! Accessors never touch the buffer when they fail: an undefined field
//! yields [`Error::FieldNotDefined`], an out-of-range value or misaligned
//! offset yields [`Error::InvalidParameter`] and a short buffer yields
//! [`Error::BufferTooSmall`].

use core::fmt;

use q_common::constants::{MAX_BODY_LEN, MAX_FRAME_LEN, SIXP_CELL_LEN, SIXP_HEADER_LEN, SIXP_VERSION};
use q_common::{Error, Result};

// ============================================================================
// Message Type and Code
// ============================================================================

/// 6P message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    /// Request
    Request = 0,
    /// Response
    Response = 1,
    /// Confirmation
    Confirmation = 2,
}

impl MessageType {
    /// Decode from the 2-bit wire value
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            2 => Some(Self::Confirmation),
            _ => None,
        }
    }

    /// Get the name of the type
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "Request",
            Self::Response => "Response",
            Self::Confirmation => "Confirmation",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 6P command identifier (code of a Request)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Add cells
    Add = 1,
    /// Delete cells
    Delete = 2,
    /// Relocate cells
    Relocate = 3,
    /// Count scheduled cells
    Count = 4,
    /// List scheduled cells
    List = 5,
    /// Signal (opaque SF payload)
    Signal = 6,
    /// Clear the schedule
    Clear = 7,
}

impl Command {
    /// Every defined command, in wire order
    pub const ALL: [Self; 7] = [
        Self::Add,
        Self::Delete,
        Self::Relocate,
        Self::Count,
        Self::List,
        Self::Signal,
        Self::Clear,
    ];

    /// Decode from the wire value
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Add),
            2 => Some(Self::Delete),
            3 => Some(Self::Relocate),
            4 => Some(Self::Count),
            5 => Some(Self::List),
            6 => Some(Self::Signal),
            7 => Some(Self::Clear),
            _ => None,
        }
    }

    /// Whether the command may be run as a 3-step transaction
    ///
    /// Only commands that change the schedule can carry a Confirmation.
    #[must_use]
    pub const fn supports_confirmation(&self) -> bool {
        matches!(self, Self::Add | Self::Delete | Self::Relocate)
    }

    /// Get the name of the command
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Delete => "DELETE",
            Self::Relocate => "RELOCATE",
            Self::Count => "COUNT",
            Self::List => "LIST",
            Self::Signal => "SIGNAL",
            Self::Clear => "CLEAR",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 6P return code (code of a Response or Confirmation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ReturnCode {
    /// Operation succeeded
    Success = 0,
    /// End of list
    Eol = 1,
    /// Generic error
    Err = 2,
    /// Critical error, reset
    Reset = 3,
    /// Unsupported 6P version
    ErrVersion = 4,
    /// Unsupported SFID
    ErrSfid = 5,
    /// Schedule generation / sequence number error
    ErrSeqnum = 6,
    /// CellList error
    ErrCelllist = 7,
    /// Busy
    ErrBusy = 8,
    /// Locked
    ErrLocked = 9,
}

impl ReturnCode {
    /// Decode from the wire value
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::Eol),
            2 => Some(Self::Err),
            3 => Some(Self::Reset),
            4 => Some(Self::ErrVersion),
            5 => Some(Self::ErrSfid),
            6 => Some(Self::ErrSeqnum),
            7 => Some(Self::ErrCelllist),
            8 => Some(Self::ErrBusy),
            9 => Some(Self::ErrLocked),
            _ => None,
        }
    }

    /// SUCCESS or EOL, the codes that carry a body
    #[must_use]
    pub const fn carries_body(&self) -> bool {
        matches!(self, Self::Success | Self::Eol)
    }

    /// Get the name of the return code
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "RC_SUCCESS",
            Self::Eol => "RC_EOL",
            Self::Err => "RC_ERR",
            Self::Reset => "RC_RESET",
            Self::ErrVersion => "RC_ERR_VERSION",
            Self::ErrSfid => "RC_ERR_SFID",
            Self::ErrSeqnum => "RC_ERR_SEQNUM",
            Self::ErrCelllist => "RC_ERR_CELLLIST",
            Self::ErrBusy => "RC_ERR_BUSY",
            Self::ErrLocked => "RC_ERR_LOCKED",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code field: a command for Requests, a return code otherwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Code {
    /// Request command
    Command(Command),
    /// Response / Confirmation return code
    Return(ReturnCode),
}

impl Code {
    /// Decode the raw code byte for a message type
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCode`] if the value is undefined for `msg_type`.
    pub fn decode(msg_type: MessageType, value: u8) -> Result<Self> {
        match msg_type {
            MessageType::Request => Command::from_u8(value).map(Self::Command),
            MessageType::Response | MessageType::Confirmation => {
                ReturnCode::from_u8(value).map(Self::Return)
            }
        }
        .ok_or(Error::InvalidCode)
    }

    /// Raw wire value
    #[must_use]
    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::Command(c) => *c as u8,
            Self::Return(rc) => *rc as u8,
        }
    }

    /// Whether this code may appear in a message of `msg_type`
    #[must_use]
    pub const fn fits(&self, msg_type: MessageType) -> bool {
        matches!(
            (msg_type, self),
            (MessageType::Request, Self::Command(_))
                | (MessageType::Response | MessageType::Confirmation, Self::Return(_))
        )
    }

    /// The command, if this is a Request code
    #[must_use]
    pub const fn command(&self) -> Option<Command> {
        match self {
            Self::Command(c) => Some(*c),
            Self::Return(_) => None,
        }
    }

    /// The return code, if this is a Response / Confirmation code
    #[must_use]
    pub const fn return_code(&self) -> Option<ReturnCode> {
        match self {
            Self::Return(rc) => Some(*rc),
            Self::Command(_) => None,
        }
    }
}

impl From<Command> for Code {
    fn from(value: Command) -> Self {
        Self::Command(value)
    }
}

impl From<ReturnCode> for Code {
    fn from(value: ReturnCode) -> Self {
        Self::Return(value)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(c) => c.fmt(f),
            Self::Return(rc) => rc.fmt(f),
        }
    }
}

// ============================================================================
// Cells
// ============================================================================

/// CellOptions bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CellOptions(u8);

impl CellOptions {
    /// No option set
    pub const NONE: Self = Self(0);
    /// Transmit cell
    pub const TX: Self = Self(0x01);
    /// Receive cell
    pub const RX: Self = Self(0x02);
    /// Shared cell
    pub const SHARED: Self = Self(0x04);

    /// Create from raw bits
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits
    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Check that every bit of `other` is set
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two option sets
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Options as seen from the peer (TX and RX swapped)
    #[must_use]
    pub const fn mirrored(self) -> Self {
        let tx = (self.0 & Self::TX.0) << 1;
        let rx = (self.0 & Self::RX.0) >> 1;
        Self((self.0 & !(Self::TX.0 | Self::RX.0)) | tx | rx)
    }
}

impl core::ops::BitOr for CellOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// A TSCH cell: slot offset and channel offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cell {
    /// Slot offset within the slotframe
    pub slot_offset: u16,
    /// Channel offset
    pub channel_offset: u16,
}

impl Cell {
    /// Create a cell
    #[must_use]
    pub const fn new(slot_offset: u16, channel_offset: u16) -> Self {
        Self {
            slot_offset,
            channel_offset,
        }
    }

    /// Serialize to the 4-byte wire form
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; SIXP_CELL_LEN] {
        let s = self.slot_offset.to_le_bytes();
        let c = self.channel_offset.to_le_bytes();
        [s[0], s[1], c[0], c[1]]
    }

    /// Parse from the 4-byte wire form
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SIXP_CELL_LEN]) -> Self {
        Self {
            slot_offset: u16::from_le_bytes([bytes[0], bytes[1]]),
            channel_offset: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

/// Borrowed view of a packed cell list
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CellList<'a> {
    bytes: &'a [u8],
}

impl<'a> CellList<'a> {
    /// Wrap packed cell bytes
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] if the length is not a whole number of
    /// cells.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() % SIXP_CELL_LEN != 0 {
            return Err(Error::InvalidParameter);
        }
        Ok(Self { bytes })
    }

    /// Number of cells
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len() / SIXP_CELL_LEN
    }

    /// Check for an empty list
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Cell at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Cell> {
        let start = index.checked_mul(SIXP_CELL_LEN)?;
        let end = start.checked_add(SIXP_CELL_LEN)?;
        let raw = self.bytes.get(start..end)?;
        Some(Cell::from_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Iterate over the cells
    pub fn iter(&self) -> impl Iterator<Item = Cell> + 'a {
        self.bytes
            .chunks_exact(SIXP_CELL_LEN)
            .map(|c| Cell::from_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// Check whether `cell` is in the list
    #[must_use]
    pub fn contains(&self, cell: &Cell) -> bool {
        self.iter().any(|c| c == *cell)
    }

    /// Packed bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

impl fmt::Debug for CellList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Body field of a 6P message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Field {
    /// Metadata (u16)
    Metadata,
    /// CellOptions (u8)
    CellOptions,
    /// NumCells (u8)
    NumCells,
    /// Reserved (u8)
    Reserved,
    /// Offset (u16)
    Offset,
    /// MaxNumCells (u16)
    MaxNumCells,
    /// TotalNumCells (u16)
    TotalNumCells,
    /// CellList
    CellList,
    /// RelCellList
    RelCellList,
    /// CandCellList
    CandCellList,
    /// Opaque payload
    Payload,
}

impl Field {
    /// Byte width of a scalar field, `None` for lists and payload
    #[must_use]
    pub const fn width(&self) -> Option<usize> {
        match self {
            Self::CellOptions | Self::NumCells | Self::Reserved => Some(1),
            Self::Metadata | Self::Offset | Self::MaxNumCells | Self::TotalNumCells => Some(2),
            Self::CellList | Self::RelCellList | Self::CandCellList | Self::Payload => None,
        }
    }

    /// Whether the field holds packed cells
    #[must_use]
    pub const fn is_cell_list(&self) -> bool {
        matches!(self, Self::CellList | Self::RelCellList | Self::CandCellList)
    }
}

/// Body layout selected by a (type, code) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// ADD / DELETE Request
    CellRequest,
    /// RELOCATE Request
    RelocateRequest,
    /// COUNT Request
    CountRequest,
    /// LIST Request
    ListRequest,
    /// SIGNAL Request
    SignalRequest,
    /// CLEAR Request
    ClearRequest,
    /// SUCCESS / EOL Response or Confirmation
    Reply,
    /// Error Response or Confirmation (no body fields)
    Empty,
}

/// Where a field sits inside the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    offset: usize,
    /// `None` runs to the end of the body
    len: Option<usize>,
}

impl Span {
    const fn fixed(offset: usize, len: usize) -> Self {
        Self {
            offset,
            len: Some(len),
        }
    }

    const fn open(offset: usize) -> Self {
        Self { offset, len: None }
    }
}

impl Layout {
    /// Select the layout for a (type, code) pair
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCode`] if `code` does not belong to `msg_type`.
    pub fn of(msg_type: MessageType, code: Code) -> Result<Self> {
        match (msg_type, code) {
            (MessageType::Request, Code::Command(cmd)) => Ok(match cmd {
                Command::Add | Command::Delete => Self::CellRequest,
                Command::Relocate => Self::RelocateRequest,
                Command::Count => Self::CountRequest,
                Command::List => Self::ListRequest,
                Command::Signal => Self::SignalRequest,
                Command::Clear => Self::ClearRequest,
            }),
            (MessageType::Response | MessageType::Confirmation, Code::Return(rc)) => {
                Ok(if rc.carries_body() { Self::Reply } else { Self::Empty })
            }
            _ => Err(Error::InvalidCode),
        }
    }

    /// Whether `field` is part of this layout
    #[must_use]
    pub fn defines(&self, field: Field) -> bool {
        self.span(field, &[]).map_or_else(|e| e != Error::FieldNotDefined, |_| true)
    }

    /// Locate `field`; RELOCATE list extents depend on NumCells in `body`
    fn span(self, field: Field, body: &[u8]) -> Result<Span> {
        let span = match (self, field) {
            (
                Self::CellRequest
                | Self::RelocateRequest
                | Self::CountRequest
                | Self::ListRequest
                | Self::SignalRequest
                | Self::ClearRequest,
                Field::Metadata,
            ) => Span::fixed(0, 2),
            (
                Self::CellRequest | Self::RelocateRequest | Self::CountRequest | Self::ListRequest,
                Field::CellOptions,
            ) => Span::fixed(2, 1),
            (Self::CellRequest | Self::RelocateRequest, Field::NumCells) => Span::fixed(3, 1),
            (Self::CellRequest, Field::CellList) => Span::open(4),
            (Self::RelocateRequest, Field::RelCellList) => {
                Span::fixed(4, relocate_list_len(body)?)
            }
            (Self::RelocateRequest, Field::CandCellList) => {
                Span::open(4 + relocate_list_len(body)?)
            }
            (Self::ListRequest, Field::Reserved) => Span::fixed(3, 1),
            (Self::ListRequest, Field::Offset) => Span::fixed(4, 2),
            (Self::ListRequest, Field::MaxNumCells) => Span::fixed(6, 2),
            (Self::SignalRequest, Field::Payload) => Span::open(2),
            (Self::Reply, Field::TotalNumCells) => Span::fixed(0, 2),
            (Self::Reply, Field::CellList | Field::Payload) => Span::open(0),
            _ => return Err(Error::FieldNotDefined),
        };
        Ok(span)
    }
}

/// Byte length of RelCellList, read from NumCells
///
/// Layout checks ask with an empty body, in which case the field exists but
/// its extent is unknown.
fn relocate_list_len(body: &[u8]) -> Result<usize> {
    match body.get(3) {
        Some(&n) => Ok(usize::from(n) * SIXP_CELL_LEN),
        None if body.is_empty() => Ok(0),
        None => Err(Error::BufferTooSmall),
    }
}

// ============================================================================
// Field Accessors
// ============================================================================

/// Write a scalar field
///
/// `value` must fit the field width (u8 fields reject values above 0xFF).
///
/// # Errors
///
/// [`Error::InvalidCode`], [`Error::FieldNotDefined`],
/// [`Error::InvalidParameter`] or [`Error::BufferTooSmall`]. The buffer is
/// unchanged on error.
pub fn set_field(
    msg_type: MessageType,
    code: Code,
    field: Field,
    value: u16,
    buf: &mut [u8],
) -> Result<()> {
    let width = field.width().ok_or(Error::InvalidParameter)?;
    let span = Layout::of(msg_type, code)?.span(field, buf)?;
    let end = span.offset + width;
    if buf.len() < end {
        return Err(Error::BufferTooSmall);
    }
    match width {
        1 => buf[span.offset] = u8::try_from(value).map_err(|_| Error::InvalidParameter)?,
        _ => buf[span.offset..end].copy_from_slice(&value.to_le_bytes()),
    }
    Ok(())
}

/// Read a scalar field
///
/// # Errors
///
/// [`Error::InvalidCode`], [`Error::FieldNotDefined`],
/// [`Error::InvalidParameter`] or [`Error::BufferTooSmall`].
pub fn get_field(msg_type: MessageType, code: Code, field: Field, body: &[u8]) -> Result<u16> {
    let width = field.width().ok_or(Error::InvalidParameter)?;
    let span = Layout::of(msg_type, code)?.span(field, body)?;
    let raw = body
        .get(span.offset..span.offset + width)
        .ok_or(Error::BufferTooSmall)?;
    Ok(match raw {
        [b] => u16::from(*b),
        [lo, hi] => u16::from_le_bytes([*lo, *hi]),
        _ => return Err(Error::InternalError),
    })
}

/// Write CellOptions
///
/// # Errors
///
/// Same as [`set_field`].
pub fn set_cell_options(
    msg_type: MessageType,
    code: Code,
    options: CellOptions,
    buf: &mut [u8],
) -> Result<()> {
    set_field(msg_type, code, Field::CellOptions, u16::from(options.bits()), buf)
}

/// Read CellOptions
///
/// # Errors
///
/// Same as [`get_field`].
#[allow(clippy::cast_possible_truncation)]
pub fn get_cell_options(msg_type: MessageType, code: Code, body: &[u8]) -> Result<CellOptions> {
    get_field(msg_type, code, Field::CellOptions, body).map(|v| CellOptions::from_bits(v as u8))
}

/// Write cells into a list field at a byte `offset` inside that field
///
/// Large lists (e.g. LIST responses) can be assembled by repeated calls at
/// increasing offsets. RelCellList writes must stay within NumCells cells.
///
/// # Errors
///
/// [`Error::InvalidParameter`] for a non-list field, a misaligned offset or
/// a RelCellList overrun; [`Error::FieldNotDefined`];
/// [`Error::BufferTooSmall`]. The buffer is unchanged on error.
pub fn set_cell_list(
    msg_type: MessageType,
    code: Code,
    field: Field,
    cells: &[Cell],
    offset: usize,
    buf: &mut [u8],
) -> Result<()> {
    if !field.is_cell_list() || offset % SIXP_CELL_LEN != 0 {
        return Err(Error::InvalidParameter);
    }
    let span = Layout::of(msg_type, code)?.span(field, buf)?;
    let len = cells.len() * SIXP_CELL_LEN;
    if let Some(limit) = span.len {
        if offset + len > limit {
            return Err(Error::InvalidParameter);
        }
    }
    let start = span.offset + offset;
    let dst = buf.get_mut(start..start + len).ok_or(Error::BufferTooSmall)?;
    for (chunk, cell) in dst.chunks_exact_mut(SIXP_CELL_LEN).zip(cells) {
        chunk.copy_from_slice(&cell.to_bytes());
    }
    Ok(())
}

/// Read a list field
///
/// CellList and CandCellList run to the end of `body`; RelCellList spans
/// NumCells cells.
///
/// # Errors
///
/// [`Error::InvalidParameter`] for a non-list field or a ragged list;
/// [`Error::FieldNotDefined`]; [`Error::BufferTooSmall`].
pub fn get_cell_list<'b>(
    msg_type: MessageType,
    code: Code,
    field: Field,
    body: &'b [u8],
) -> Result<CellList<'b>> {
    if !field.is_cell_list() {
        return Err(Error::InvalidParameter);
    }
    let span = Layout::of(msg_type, code)?.span(field, body)?;
    let end = span.len.map_or(body.len(), |len| span.offset + len);
    let bytes = body.get(span.offset..end).ok_or(Error::BufferTooSmall)?;
    CellList::new(bytes)
}

/// Write the opaque payload; returns the resulting body length
///
/// # Errors
///
/// [`Error::FieldNotDefined`] or [`Error::BufferTooSmall`].
pub fn set_payload(msg_type: MessageType, code: Code, payload: &[u8], buf: &mut [u8]) -> Result<usize> {
    let span = Layout::of(msg_type, code)?.span(Field::Payload, buf)?;
    let end = span.offset + payload.len();
    buf.get_mut(span.offset..end)
        .ok_or(Error::BufferTooSmall)?
        .copy_from_slice(payload);
    Ok(end)
}

/// Read the opaque payload
///
/// # Errors
///
/// [`Error::FieldNotDefined`] or [`Error::BufferTooSmall`].
pub fn get_payload<'b>(msg_type: MessageType, code: Code, body: &'b [u8]) -> Result<&'b [u8]> {
    let span = Layout::of(msg_type, code)?.span(Field::Payload, body)?;
    body.get(span.offset..).ok_or(Error::BufferTooSmall)
}

// ============================================================================
// Body Builders
// ============================================================================

/// Request body, encoded through the schema accessors
#[derive(Debug, Clone, Copy)]
pub enum RequestBody<'a> {
    /// ADD Request
    Add {
        /// SF-specific metadata
        metadata: u16,
        /// Options of the requested cells
        options: CellOptions,
        /// Number of cells wanted
        num_cells: u8,
        /// Candidate cells
        cells: &'a [Cell],
    },
    /// DELETE Request
    Delete {
        /// SF-specific metadata
        metadata: u16,
        /// Options of the cells to delete
        options: CellOptions,
        /// Number of cells to delete
        num_cells: u8,
        /// Candidate cells
        cells: &'a [Cell],
    },
    /// RELOCATE Request
    Relocate {
        /// SF-specific metadata
        metadata: u16,
        /// Options of the cells to relocate
        options: CellOptions,
        /// Cells to relocate; NumCells is their count
        relocate: &'a [Cell],
        /// Candidate replacement cells
        candidates: &'a [Cell],
    },
    /// COUNT Request
    Count {
        /// SF-specific metadata
        metadata: u16,
        /// Options to count
        options: CellOptions,
    },
    /// LIST Request
    List {
        /// SF-specific metadata
        metadata: u16,
        /// Options to list
        options: CellOptions,
        /// Index of the first cell to return
        offset: u16,
        /// Maximum number of cells in the reply
        max_num_cells: u16,
    },
    /// SIGNAL Request
    Signal {
        /// SF-specific metadata
        metadata: u16,
        /// Opaque payload
        payload: &'a [u8],
    },
    /// CLEAR Request
    Clear {
        /// SF-specific metadata
        metadata: u16,
    },
}

impl RequestBody<'_> {
    /// Command this body belongs to
    #[must_use]
    pub const fn command(&self) -> Command {
        match self {
            Self::Add { .. } => Command::Add,
            Self::Delete { .. } => Command::Delete,
            Self::Relocate { .. } => Command::Relocate,
            Self::Count { .. } => Command::Count,
            Self::List { .. } => Command::List,
            Self::Signal { .. } => Command::Signal,
            Self::Clear { .. } => Command::Clear,
        }
    }

    /// Encode into `buf`, returning the body length
    ///
    /// # Errors
    ///
    /// [`Error::BufferTooSmall`] or [`Error::InvalidParameter`] (more than
    /// 255 relocation cells).
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        const T: MessageType = MessageType::Request;
        let code = Code::Command(self.command());
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(Error::BufferTooSmall);
        }
        match *self {
            Self::Add { metadata, options, num_cells, cells }
            | Self::Delete { metadata, options, num_cells, cells } => {
                set_field(T, code, Field::Metadata, metadata, buf)?;
                set_cell_options(T, code, options, buf)?;
                set_field(T, code, Field::NumCells, u16::from(num_cells), buf)?;
                set_cell_list(T, code, Field::CellList, cells, 0, buf)?;
            }
            Self::Relocate { metadata, options, relocate, candidates } => {
                let n = u8::try_from(relocate.len()).map_err(|_| Error::InvalidParameter)?;
                set_field(T, code, Field::Metadata, metadata, buf)?;
                set_cell_options(T, code, options, buf)?;
                set_field(T, code, Field::NumCells, u16::from(n), buf)?;
                set_cell_list(T, code, Field::RelCellList, relocate, 0, buf)?;
                set_cell_list(T, code, Field::CandCellList, candidates, 0, buf)?;
            }
            Self::Count { metadata, options } => {
                set_field(T, code, Field::Metadata, metadata, buf)?;
                set_cell_options(T, code, options, buf)?;
            }
            Self::List { metadata, options, offset, max_num_cells } => {
                set_field(T, code, Field::Metadata, metadata, buf)?;
                set_cell_options(T, code, options, buf)?;
                set_field(T, code, Field::Reserved, 0, buf)?;
                set_field(T, code, Field::Offset, offset, buf)?;
                set_field(T, code, Field::MaxNumCells, max_num_cells, buf)?;
            }
            Self::Signal { metadata, payload } => {
                set_field(T, code, Field::Metadata, metadata, buf)?;
                set_payload(T, code, payload, buf)?;
            }
            Self::Clear { metadata } => {
                set_field(T, code, Field::Metadata, metadata, buf)?;
            }
        }
        Ok(len)
    }

    /// Body length once encoded
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Add { cells, .. } | Self::Delete { cells, .. } => 4 + cells.len() * SIXP_CELL_LEN,
            Self::Relocate { relocate, candidates, .. } => {
                4 + (relocate.len() + candidates.len()) * SIXP_CELL_LEN
            }
            Self::Count { .. } => 3,
            Self::List { .. } => 8,
            Self::Signal { payload, .. } => 2 + payload.len(),
            Self::Clear { .. } => 2,
        }
    }
}

/// Body of a SUCCESS / EOL reply
#[derive(Debug, Clone, Copy)]
pub enum ReplyBody<'a> {
    /// No body
    Empty,
    /// CellList
    Cells(&'a [Cell]),
    /// TotalNumCells
    Total(u16),
    /// Opaque payload
    Payload(&'a [u8]),
}

impl ReplyBody<'_> {
    /// Encode for a reply carrying `rc`, returning the body length
    ///
    /// # Errors
    ///
    /// [`Error::FieldNotDefined`] if `rc` carries no body but this one is
    /// not empty; [`Error::BufferTooSmall`].
    pub fn encode(&self, msg_type: MessageType, rc: ReturnCode, buf: &mut [u8]) -> Result<usize> {
        let code = Code::Return(rc);
        match *self {
            Self::Empty => Ok(0),
            Self::Cells(cells) => {
                set_cell_list(msg_type, code, Field::CellList, cells, 0, buf)?;
                Ok(cells.len() * SIXP_CELL_LEN)
            }
            Self::Total(total) => {
                set_field(msg_type, code, Field::TotalNumCells, total, buf)?;
                Ok(2)
            }
            Self::Payload(payload) => set_payload(msg_type, code, payload, buf),
        }
    }
}

// ============================================================================
// Packet
// ============================================================================

/// Raw header fields, available even when the frame does not parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    /// Version nibble
    pub version: u8,
    /// 2-bit type field
    pub msg_type: u8,
    /// Code byte
    pub code: u8,
    /// SFID
    pub sfid: u8,
    /// SeqNum
    pub seqno: u8,
}

impl RawHeader {
    /// Split the first four bytes of a frame
    ///
    /// # Errors
    ///
    /// [`Error::FrameTooShort`] for frames under four bytes.
    pub fn read(frame: &[u8]) -> Result<Self> {
        match frame {
            [b0, code, sfid, seqno, ..] => Ok(Self {
                version: b0 & 0x0f,
                msg_type: (b0 >> 4) & 0x03,
                code: *code,
                sfid: *sfid,
                seqno: *seqno,
            }),
            _ => Err(Error::FrameTooShort),
        }
    }
}

/// A decoded 6P message borrowing its body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Message type
    pub msg_type: MessageType,
    /// Command or return code
    pub code: Code,
    /// Scheduling function identifier
    pub sfid: u8,
    /// Sequence number
    pub seqno: u8,
    /// Body bytes (layout given by type and code)
    pub body: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Assemble a packet, checking that code and type agree
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCode`] or [`Error::BodyTooLong`].
    pub fn new(msg_type: MessageType, code: Code, sfid: u8, seqno: u8, body: &'a [u8]) -> Result<Self> {
        if !code.fits(msg_type) {
            return Err(Error::InvalidCode);
        }
        if body.len() > MAX_BODY_LEN {
            return Err(Error::BodyTooLong);
        }
        Ok(Self {
            msg_type,
            code,
            sfid,
            seqno,
            body,
        })
    }

    /// Decode a frame
    ///
    /// # Errors
    ///
    /// [`Error::FrameTooShort`], [`Error::UnsupportedVersion`],
    /// [`Error::BodyTooLong`], [`Error::InvalidMessageType`] or
    /// [`Error::InvalidCode`].
    pub fn parse(frame: &'a [u8]) -> Result<Self> {
        let raw = RawHeader::read(frame)?;
        if raw.version != SIXP_VERSION {
            return Err(Error::UnsupportedVersion);
        }
        if frame.len() > MAX_FRAME_LEN {
            return Err(Error::BodyTooLong);
        }
        let msg_type = MessageType::from_u8(raw.msg_type).ok_or(Error::InvalidMessageType)?;
        let code = Code::decode(msg_type, raw.code)?;
        Ok(Self {
            msg_type,
            code,
            sfid: raw.sfid,
            seqno: raw.seqno,
            body: &frame[SIXP_HEADER_LEN..],
        })
    }

    /// Encode into `out`, returning the frame length
    ///
    /// # Errors
    ///
    /// [`Error::BufferTooSmall`]; `out` is unchanged on error.
    pub fn write(&self, out: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        let frame = out.get_mut(..len).ok_or(Error::BufferTooSmall)?;
        frame[0] = SIXP_VERSION | ((self.msg_type as u8) << 4);
        frame[1] = self.code.as_u8();
        frame[2] = self.sfid;
        frame[3] = self.seqno;
        frame[SIXP_HEADER_LEN..].copy_from_slice(self.body);
        Ok(len)
    }

    /// Frame length once encoded
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        SIXP_HEADER_LEN + self.body.len()
    }

    /// Body layout of this packet
    #[must_use]
    pub fn layout(&self) -> Layout {
        // Type and code were validated on construction.
        Layout::of(self.msg_type, self.code).unwrap_or(Layout::Empty)
    }

    /// Read a scalar body field
    ///
    /// # Errors
    ///
    /// Same as [`get_field`].
    pub fn field(&self, field: Field) -> Result<u16> {
        get_field(self.msg_type, self.code, field, self.body)
    }

    /// Read a list body field
    ///
    /// # Errors
    ///
    /// Same as [`get_cell_list`].
    pub fn cell_list(&self, field: Field) -> Result<CellList<'a>> {
        get_cell_list(self.msg_type, self.code, field, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQ: MessageType = MessageType::Request;
    const RES: MessageType = MessageType::Response;

    fn cmd(c: Command) -> Code {
        Code::Command(c)
    }

    fn rc(r: ReturnCode) -> Code {
        Code::Return(r)
    }

    fn four_cells() -> [Cell; 4] {
        [
            Cell::from_bytes([0x01, 0x23, 0x45, 0x67]),
            Cell::from_bytes([0x89, 0xab, 0xcd, 0xef]),
            Cell::from_bytes([0xde, 0xad, 0xbe, 0xef]),
            Cell::from_bytes([0xca, 0xfe, 0xca, 0xfe]),
        ]
    }

    #[test]
    fn test_parse_valid_header() {
        let frame = [0x00, 0x02, 0xfe, 0x6a, 0xde, 0xad, 0xbe, 0xef];
        let pkt = Packet::parse(&frame).unwrap();
        assert_eq!(pkt.msg_type, REQ);
        assert_eq!(pkt.code, cmd(Command::Delete));
        assert_eq!(pkt.sfid, 0xfe);
        assert_eq!(pkt.seqno, 0x6a);
        assert_eq!(pkt.body, &frame[4..]);
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert_eq!(Packet::parse(&[0x02, 0x08, 0xfe, 0x6a]), Err(Error::UnsupportedVersion));
        assert_eq!(Packet::parse(&[0x00, 0x08, 0xfe]), Err(Error::FrameTooShort));
        assert_eq!(Packet::parse(&[0x00, 0x0a, 0xfe, 0x6a]), Err(Error::InvalidCode));
        assert_eq!(Packet::parse(&[0x10, 0x0f, 0xfe, 0x6a]), Err(Error::InvalidCode));
        assert_eq!(Packet::parse(&[0x30, 0x00, 0xfe, 0x6a]), Err(Error::InvalidMessageType));
        assert_eq!(Packet::parse(&[0u8; MAX_FRAME_LEN + 1]), Err(Error::BodyTooLong));
    }

    #[test]
    fn test_raw_header_survives_bad_version() {
        let raw = RawHeader::read(&[0x1a, 0x07, 0xf1, 0x05]).unwrap();
        assert_eq!(raw.version, 0x0a);
        assert_eq!(raw.msg_type, 1);
        assert_eq!(raw.sfid, 0xf1);
        assert_eq!(raw.seqno, 0x05);
    }

    #[test]
    fn test_write_layout() {
        let body = [0xde, 0xad, 0xbe, 0xef];
        let pkt = Packet::new(REQ, cmd(Command::Delete), 0xfe, 0x6a, &body).unwrap();
        let mut out = [0u8; 16];
        assert_eq!(pkt.write(&mut out), Ok(8));
        assert_eq!(&out[..8], &[0x00, 0x02, 0xfe, 0x6a, 0xde, 0xad, 0xbe, 0xef]);

        let reply = Packet::new(RES, rc(ReturnCode::ErrSeqnum), 0xf1, 10, &[]).unwrap();
        assert_eq!(reply.write(&mut out), Ok(4));
        assert_eq!(&out[..4], &[0x10, 0x06, 0xf1, 10]);
    }

    #[test]
    fn test_write_too_small_leaves_buffer() {
        let body = [0u8; 8];
        let pkt = Packet::new(REQ, cmd(Command::Add), 1, 0, &body).unwrap();
        let mut out = [0xaau8; 6];
        assert_eq!(pkt.write(&mut out), Err(Error::BufferTooSmall));
        assert_eq!(out, [0xaa; 6]);
    }

    #[test]
    fn test_new_rejects_mismatched_code_and_long_body() {
        assert_eq!(
            Packet::new(REQ, rc(ReturnCode::Success), 1, 0, &[]),
            Err(Error::InvalidCode)
        );
        let long = [0u8; MAX_BODY_LEN + 1];
        assert_eq!(
            Packet::new(REQ, cmd(Command::Signal), 1, 0, &long),
            Err(Error::BodyTooLong)
        );
    }

    #[test]
    fn test_metadata_positions() {
        for c in Command::ALL {
            let mut buf = [0u8; 8];
            set_field(REQ, cmd(c), Field::Metadata, 0xcafe, &mut buf).unwrap();
            assert_eq!(&buf[..2], &[0xfe, 0xca]);
            assert_eq!(get_field(REQ, cmd(c), Field::Metadata, &buf), Ok(0xcafe));
        }
        let mut buf = [0u8; 8];
        assert_eq!(
            set_field(RES, rc(ReturnCode::Success), Field::Metadata, 1, &mut buf),
            Err(Error::FieldNotDefined)
        );
        assert_eq!(buf, [0; 8]);
    }

    #[test]
    fn test_list_request_fields() {
        let mut buf = [0u8; 8];
        let code = cmd(Command::List);
        set_cell_options(REQ, code, CellOptions::TX | CellOptions::SHARED, &mut buf).unwrap();
        set_field(REQ, code, Field::Offset, 0x1234, &mut buf).unwrap();
        set_field(REQ, code, Field::MaxNumCells, 4, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0x05, 0, 0x34, 0x12, 0x04, 0x00]);
        assert_eq!(get_field(REQ, code, Field::Offset, &buf), Ok(0x1234));
        assert_eq!(
            get_cell_options(REQ, code, &buf),
            Ok(CellOptions::TX | CellOptions::SHARED)
        );
    }

    #[test]
    fn test_undefined_fields() {
        let mut buf = [0u8; 16];
        assert_eq!(
            set_field(REQ, cmd(Command::Add), Field::TotalNumCells, 0xcafe, &mut buf),
            Err(Error::FieldNotDefined)
        );
        assert_eq!(
            set_field(REQ, cmd(Command::Count), Field::NumCells, 1, &mut buf),
            Err(Error::FieldNotDefined)
        );
        assert_eq!(
            get_field(RES, rc(ReturnCode::ErrBusy), Field::TotalNumCells, &buf),
            Err(Error::FieldNotDefined)
        );
        assert_eq!(
            set_cell_list(REQ, cmd(Command::Count), Field::CandCellList, &four_cells(), 0, &mut buf),
            Err(Error::FieldNotDefined)
        );
        assert_eq!(buf, [0; 16]);
    }

    #[test]
    fn test_u8_field_range_and_short_buffer() {
        let mut buf = [0u8; 4];
        assert_eq!(
            set_field(REQ, cmd(Command::Add), Field::NumCells, 0x100, &mut buf),
            Err(Error::InvalidParameter)
        );
        let mut short = [0u8; 2];
        assert_eq!(
            set_field(REQ, cmd(Command::Add), Field::CellOptions, 1, &mut short),
            Err(Error::BufferTooSmall)
        );
        assert_eq!(short, [0; 2]);
    }

    #[test]
    fn test_cell_list_at_byte_offset() {
        let cells = four_cells();
        let mut buf = [0u8; 64];
        let code = cmd(Command::Add);
        set_cell_list(REQ, code, Field::CellList, &cells, 0, &mut buf).unwrap();
        set_cell_list(REQ, code, Field::CellList, &cells, 16, &mut buf).unwrap();
        assert_eq!(&buf[4..8], &[0x01, 0x23, 0x45, 0x67]);
        assert_eq!(&buf[20..24], &[0x01, 0x23, 0x45, 0x67]);

        let list = get_cell_list(REQ, code, Field::CellList, &buf[..36]).unwrap();
        assert_eq!(list.len(), 8);
        assert_eq!(list.get(4), Some(cells[0]));
        assert_eq!(list.get(7), Some(cells[3]));
        assert_eq!(list.get(8), None);
        assert_eq!(list.get(usize::MAX / SIXP_CELL_LEN), None);
        assert_eq!(list.get(usize::MAX), None);

        assert_eq!(
            set_cell_list(REQ, code, Field::CellList, &cells, 2, &mut buf),
            Err(Error::InvalidParameter)
        );
        let mut small = [0u8; 10];
        assert_eq!(
            set_cell_list(REQ, code, Field::CellList, &cells, 0, &mut small),
            Err(Error::BufferTooSmall)
        );
        assert_eq!(small, [0; 10]);
    }

    #[test]
    fn test_relocate_lists_follow_num_cells() {
        let cells = four_cells();
        let mut buf = [0u8; 64];
        let code = cmd(Command::Relocate);
        set_field(REQ, code, Field::NumCells, 4, &mut buf).unwrap();
        set_cell_list(REQ, code, Field::CandCellList, &cells, 0, &mut buf).unwrap();
        assert_eq!(&buf[20..24], &[0x01, 0x23, 0x45, 0x67]);

        let cand = get_cell_list(REQ, code, Field::CandCellList, &buf[..36]).unwrap();
        assert_eq!(cand.as_bytes().as_ptr(), buf[20..].as_ptr());
        assert_eq!(cand.len(), 4);

        set_cell_list(REQ, code, Field::RelCellList, &cells[..2], 8, &mut buf).unwrap();
        assert_eq!(
            set_cell_list(REQ, code, Field::RelCellList, &cells, 4, &mut buf),
            Err(Error::InvalidParameter)
        );
        let rel = get_cell_list(REQ, code, Field::RelCellList, &buf[..36]).unwrap();
        assert_eq!(rel.len(), 4);
        assert_eq!(rel.get(2), Some(cells[0]));
    }

    #[test]
    fn test_reply_fields_share_offset_zero() {
        let mut buf = [0u8; 8];
        let code = rc(ReturnCode::Success);
        set_field(RES, code, Field::TotalNumCells, 0xcafe, &mut buf).unwrap();
        assert_eq!(&buf[..2], &[0xfe, 0xca]);
        assert_eq!(set_payload(RES, code, &[1, 2, 3], &mut buf), Ok(3));
        assert_eq!(get_payload(RES, code, &buf[..3]), Ok(&[1u8, 2, 3][..]));
        assert!(Layout::Reply.defines(Field::CellList));
        assert!(!Layout::Empty.defines(Field::CellList));
        assert!(Layout::RelocateRequest.defines(Field::CandCellList));
    }

    #[test]
    fn test_ragged_cell_list_rejected() {
        let body = [0u8; 6];
        assert_eq!(
            get_cell_list(RES, rc(ReturnCode::Success), Field::CellList, &body),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn test_request_body_round_trip() {
        let cells = four_cells();
        let mut buf = [0u8; 64];
        let body = RequestBody::Relocate {
            metadata: 0x0102,
            options: CellOptions::RX,
            relocate: &cells[..1],
            candidates: &cells[1..],
        };
        let len = body.encode(&mut buf).unwrap();
        assert_eq!(len, body.encoded_len());
        let pkt = Packet::new(REQ, cmd(Command::Relocate), 1, 0, &buf[..len]).unwrap();
        assert_eq!(pkt.field(Field::Metadata), Ok(0x0102));
        assert_eq!(pkt.field(Field::NumCells), Ok(1));
        assert_eq!(pkt.cell_list(Field::RelCellList).unwrap().get(0), Some(cells[0]));
        assert_eq!(pkt.cell_list(Field::CandCellList).unwrap().len(), 3);

        let body = RequestBody::Signal { metadata: 7, payload: b"hi" };
        let len = body.encode(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[7, 0, b'h', b'i']);
    }

    #[test]
    fn test_reply_body_encode() {
        let mut buf = [0u8; 16];
        let cells = four_cells();
        assert_eq!(
            ReplyBody::Cells(&cells[..2]).encode(RES, ReturnCode::Eol, &mut buf),
            Ok(8)
        );
        assert_eq!(ReplyBody::Total(3).encode(RES, ReturnCode::Success, &mut buf), Ok(2));
        assert_eq!(
            ReplyBody::Total(3).encode(RES, ReturnCode::ErrBusy, &mut buf),
            Err(Error::FieldNotDefined)
        );
        assert_eq!(ReplyBody::Empty.encode(RES, ReturnCode::Err, &mut buf), Ok(0));
    }

    #[test]
    fn test_cell_options_mirror() {
        assert_eq!(CellOptions::TX.mirrored(), CellOptions::RX);
        assert_eq!((CellOptions::RX | CellOptions::SHARED).mirrored(), CellOptions::TX | CellOptions::SHARED);
        assert!((CellOptions::TX | CellOptions::RX).contains(CellOptions::RX));
    }
}
