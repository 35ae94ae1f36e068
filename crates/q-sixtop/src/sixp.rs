// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! 6P Dispatcher
//!
//! [`SixpCore`] owns the neighbor and transaction tables and sits between
//! the MAC and the scheduling functions. Outbound messages come from SFs via
//! [`SixpCore::output`]; inbound frames arrive via [`SixpCore::input`], which
//! validates them against the transaction state and, when they are
//! acceptable, returns a [`Delivery`] for the owning SF.
//!
//! The core never calls into an SF. Events an SF must hear about outside of
//! `input` (completion callbacks, timeouts, protocol errors) are queued as
//! [`Notification`]s and drained by [`crate::sixtop::Sixtop`] once the
//! current entry point has returned, so no SF is ever re-entered.
//!
//! # Error replies
//!
//! Some requests are answered by the core on its own, without SF
//! involvement (each can be switched off in [`ReplyConfig`]):
//!
//! | Condition | Reply |
//! |-----------|-------|
//! | Version is not 0 | `RC_ERR_VERSION` |
//! | No SF registered for the SFID | `RC_ERR_SFID` |
//! | We already initiated a transaction with the pair | `RC_ERR_BUSY` |
//! | We are already responding to the pair | `RC_ERR_LOCKED` |
//! | Transaction table full | `RC_ERR_BUSY` |
//! | SeqNum inconsistent with neighbor state | `RC_ERR_SEQNUM` |
//!
//! [`ReplyConfig`]: q_common::ReplyConfig

use core::fmt;

use heapless::{Deque, Vec};
use q_common::constants::{
    MAX_FRAME_LEN, MAX_PENDING_NOTIFICATIONS, MAX_SCHEDULING_FUNCTIONS, MAX_TRANSACTIONS,
};
use q_common::log::LogBuffer;
use q_common::{log_debug, log_error, log_info, log_warn};
use q_common::{Error, LinkAddr, Millis, Result, SixtopConfig, Ticks};

use crate::mac::Mac;
use crate::nbr::{Neighbor, NeighborTable};
use crate::pkt::{
    get_cell_list, get_field, get_payload, CellList, Code, Command, Field, MessageType, Packet,
    RawHeader, ReturnCode,
};
use crate::sixtop::SfDescriptor;
use crate::timer::TimerService;
use crate::trans::{
    CallbackToken, Role, TransEvent, Transaction, TransactionId, TransactionState,
    TransactionTable,
};

/// Module tag used in log entries
pub const LOG_MODULE: &str = "6top";

// Every live transaction may end with a Timeout and an OutputDone between
// two drains.
const _: () = assert!(MAX_PENDING_NOTIFICATIONS >= 2 * MAX_TRANSACTIONS);

// ============================================================================
// Outbound Messages
// ============================================================================

/// A message an SF asks the engine to send
#[derive(Debug, Clone, Copy)]
pub struct Outbound<'b> {
    /// Message type
    pub msg_type: MessageType,
    /// Command (Request) or return code (Response / Confirmation)
    pub code: Code,
    /// Sending SF
    pub sfid: u8,
    /// Encoded body
    pub body: &'b [u8],
    /// Destination neighbor
    pub dest: LinkAddr,
    /// Token returned through `output_done` when the transaction ends
    pub callback: Option<CallbackToken>,
    /// Override of the SF transaction timeout
    pub timeout: Option<Millis>,
}

impl<'b> Outbound<'b> {
    /// Request for `cmd`
    #[must_use]
    pub const fn request(cmd: Command, sfid: u8, dest: LinkAddr, body: &'b [u8]) -> Self {
        Self {
            msg_type: MessageType::Request,
            code: Code::Command(cmd),
            sfid,
            body,
            dest,
            callback: None,
            timeout: None,
        }
    }

    /// Response carrying `rc`
    #[must_use]
    pub const fn response(rc: ReturnCode, sfid: u8, dest: LinkAddr, body: &'b [u8]) -> Self {
        Self {
            msg_type: MessageType::Response,
            code: Code::Return(rc),
            sfid,
            body,
            dest,
            callback: None,
            timeout: None,
        }
    }

    /// Confirmation carrying `rc`
    #[must_use]
    pub const fn confirmation(rc: ReturnCode, sfid: u8, dest: LinkAddr, body: &'b [u8]) -> Self {
        Self {
            msg_type: MessageType::Confirmation,
            code: Code::Return(rc),
            sfid,
            body,
            dest,
            callback: None,
            timeout: None,
        }
    }

    /// Ask for an `output_done` notification carrying `token`
    #[must_use]
    pub const fn with_callback(mut self, token: CallbackToken) -> Self {
        self.callback = Some(token);
        self
    }

    /// Use `timeout` instead of the SF default
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Millis) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Inbound Messages
// ============================================================================

/// A validated message handed to the owning SF
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'f> {
    /// Message type
    pub msg_type: MessageType,
    /// Command or return code as received
    pub code: Code,
    /// Command of the transaction this message belongs to
    pub cmd: Command,
    /// SFID
    pub sfid: u8,
    /// SeqNum
    pub seqno: u8,
    /// Sender
    pub peer: LinkAddr,
    /// Body bytes
    pub body: &'f [u8],
}

impl<'f> Inbound<'f> {
    /// Return code, for Responses and Confirmations
    #[must_use]
    pub const fn return_code(&self) -> Option<ReturnCode> {
        self.code.return_code()
    }

    /// Read a scalar body field
    ///
    /// # Errors
    ///
    /// See [`crate::pkt::get_field`].
    pub fn field(&self, field: Field) -> Result<u16> {
        get_field(self.msg_type, self.code, field, self.body)
    }

    /// Read a list body field
    ///
    /// # Errors
    ///
    /// See [`crate::pkt::get_cell_list`].
    pub fn cell_list(&self, field: Field) -> Result<CellList<'f>> {
        get_cell_list(self.msg_type, self.code, field, self.body)
    }

    /// Read the payload
    ///
    /// # Errors
    ///
    /// See [`crate::pkt::get_payload`].
    pub fn payload(&self) -> Result<&'f [u8]> {
        get_payload(self.msg_type, self.code, self.body)
    }
}

/// An inbound message accepted for SF processing
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'f> {
    /// Transaction the message advanced
    pub id: TransactionId,
    /// The message
    pub inbound: Inbound<'f>,
}

// ============================================================================
// Notifications
// ============================================================================

/// Outcome reported through `output_done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputStatus {
    /// Transaction completed
    Success,
    /// Transaction timed out or was aborted
    Failure,
}

/// Protocol errors reported through the SF `error` hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum SixpError {
    /// The peer's SeqNum shows its schedule diverged from ours
    ScheduleInconsistency,
}

impl fmt::Display for SixpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScheduleInconsistency => f.write_str("schedule inconsistency"),
        }
    }
}

/// Deferred event for a scheduling function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A transaction carrying a callback token ended
    OutputDone {
        /// Owning SF
        sfid: u8,
        /// Outcome
        status: OutputStatus,
        /// Peer of the transaction
        peer: LinkAddr,
        /// Token given at output time
        token: CallbackToken,
    },
    /// A transaction timed out
    Timeout {
        /// Owning SF
        sfid: u8,
        /// Command of the transaction
        cmd: Command,
        /// Peer of the transaction
        peer: LinkAddr,
    },
    /// A protocol error was detected
    Error {
        /// Owning SF
        sfid: u8,
        /// What went wrong
        error: SixpError,
        /// Command of the offending request
        cmd: Command,
        /// SeqNum of the offending request
        seqno: u8,
        /// Sender
        peer: LinkAddr,
    },
}

impl Notification {
    /// SF the notification is addressed to
    #[must_use]
    pub const fn sfid(&self) -> u8 {
        match self {
            Self::OutputDone { sfid, .. } | Self::Timeout { sfid, .. } | Self::Error { sfid, .. } => {
                *sfid
            }
        }
    }
}

/// Snapshot of a transaction, as seen by an SF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Local role
    pub role: Role,
    /// Current state
    pub state: TransactionState,
    /// Command
    pub cmd: Command,
    /// SeqNum
    pub seqno: u8,
    /// Whether a Confirmation step is expected
    pub three_step: bool,
}

impl From<&Transaction> for TransactionInfo {
    fn from(t: &Transaction) -> Self {
        Self {
            role: t.role(),
            state: t.state(),
            cmd: t.cmd(),
            seqno: t.seqno(),
            three_step: t.is_three_step(),
        }
    }
}

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Completed,
    TimedOut,
    Aborted,
}

// ============================================================================
// SF-facing Handle
// ============================================================================

/// Engine operations available to a scheduling function
pub trait SixpHandle {
    /// Send a Request, Response or Confirmation
    ///
    /// # Errors
    ///
    /// See [`SixpCore::output`].
    fn output(&mut self, out: Outbound<'_>) -> Result<()>;

    /// Transaction with `peer` owned by `sfid`
    fn transaction(&self, peer: &LinkAddr, sfid: u8) -> Option<TransactionInfo>;

    /// Neighbor state
    fn neighbor(&self, peer: &LinkAddr) -> Option<Neighbor>;

    /// Forget a neighbor and abort its transactions
    fn remove_neighbor(&mut self, peer: &LinkAddr);

    /// Current time
    fn now(&self) -> Ticks;
}

// ============================================================================
// Dispatcher Core
// ============================================================================

/// 6P dispatcher state
pub struct SixpCore<M: Mac, T: TimerService> {
    mac: M,
    timer: T,
    config: SixtopConfig,
    neighbors: NeighborTable,
    transactions: TransactionTable,
    descriptors: Vec<SfDescriptor, MAX_SCHEDULING_FUNCTIONS>,
    pending: Deque<Notification, MAX_PENDING_NOTIFICATIONS>,
    log: LogBuffer,
}

impl<M: Mac, T: TimerService> SixpCore<M, T> {
    /// Create a dispatcher over a MAC and a timer service
    pub fn new(mac: M, timer: T, config: SixtopConfig) -> Self {
        Self {
            mac,
            timer,
            config,
            neighbors: NeighborTable::new(),
            transactions: TransactionTable::new(),
            descriptors: Vec::new(),
            pending: Deque::new(),
            log: LogBuffer::new(config.log_level),
        }
    }

    /// Accept traffic for an SF
    ///
    /// # Errors
    ///
    /// [`Error::SfidInUse`] or [`Error::SfRegistryFull`].
    pub fn register(&mut self, desc: SfDescriptor) -> Result<()> {
        if self.descriptor(desc.sfid).is_some() {
            return Err(Error::SfidInUse);
        }
        self.descriptors.push(desc).map_err(|_| Error::SfRegistryFull)
    }

    /// Descriptor of a registered SF
    #[must_use]
    pub fn descriptor(&self, sfid: u8) -> Option<&SfDescriptor> {
        self.descriptors.iter().find(|d| d.sfid == sfid)
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    /// Send a 6P message
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownSfid`]: Request for an unregistered SF
    /// - [`Error::TransactionBusy`] / [`Error::TransactionLocked`]: Request
    ///   while the pair already has a transaction
    /// - [`Error::NoTransaction`] / [`Error::InvalidState`]: Response or
    ///   Confirmation outside the matching state
    /// - [`Error::SendFailed`]: the MAC refused the frame
    /// - codec errors for a malformed message
    pub fn output(&mut self, out: Outbound<'_>) -> Result<()> {
        // Validates code against type and the body length.
        Packet::new(out.msg_type, out.code, out.sfid, 0, out.body)?;
        match (out.msg_type, out.code) {
            (MessageType::Request, Code::Command(cmd)) => self.send_request(cmd, &out),
            (MessageType::Response, Code::Return(rc)) => self.send_response(rc, &out),
            (MessageType::Confirmation, Code::Return(rc)) => self.send_confirmation(rc, &out),
            _ => Err(Error::InvalidCode),
        }
    }

    fn send_request(&mut self, cmd: Command, out: &Outbound<'_>) -> Result<()> {
        let now = self.timestamp();
        let desc = *self.descriptor(out.sfid).ok_or(Error::UnknownSfid)?;
        if let Some(role) = self.transaction_for(&out.dest, out.sfid).map(Transaction::role) {
            log_warn!(
                self.log,
                now,
                LOG_MODULE,
                "output refused, trans in progress [peer:{} sfid:{}]",
                out.dest,
                out.sfid
            );
            return Err(match role {
                Role::Initiator => Error::TransactionBusy,
                Role::Responder => Error::TransactionLocked,
            });
        }

        let nbr = self.neighbors.get_or_alloc(out.dest)?;
        let seqno = nbr.next_seqno();
        if cmd == Command::Clear {
            nbr.reset_next_seqno();
            log_info!(self.log, now, LOG_MODULE, "reset next_seqno by CLEAR [peer:{}]", out.dest);
            self.abort_peer(&out.dest);
        }

        let pkt = Packet::new(MessageType::Request, out.code, out.sfid, seqno, out.body)?;
        let id = self.transactions.create(
            out.dest,
            out.sfid,
            seqno,
            cmd,
            Role::Initiator,
            desc.three_step.contains(cmd),
        )?;
        if let Err(e) = self.transmit(&out.dest, &pkt) {
            self.transactions.free(id);
            log_error!(self.log, now, LOG_MODULE, "request send failed [peer:{}]: {}", out.dest, e);
            return Err(Error::SendFailed);
        }
        if let Err(e) = self.arm(id, out.timeout, &desc) {
            self.transactions.free(id);
            log_error!(self.log, now, LOG_MODULE, "no timer for request [peer:{}]: {}", out.dest, e);
            return Err(e);
        }

        self.transactions.advance(id, TransEvent::RequestSent)?;
        if let Some(trans) = self.transactions.get_mut(id) {
            trans.set_body(out.body)?;
            trans.set_callback(out.callback);
        }
        log_info!(
            self.log,
            now,
            LOG_MODULE,
            "sent {} request [peer:{} sfid:{} seqno:{}]",
            cmd,
            out.dest,
            out.sfid,
            seqno
        );
        Ok(())
    }

    fn send_response(&mut self, rc: ReturnCode, out: &Outbound<'_>) -> Result<()> {
        let now = self.timestamp();
        let id = self.transactions.find(&out.dest, out.sfid).ok_or(Error::NoTransaction)?;
        let (cmd, seqno) = {
            let trans = self.transactions.get(id).ok_or(Error::NoTransaction)?;
            if trans.role() != Role::Responder || trans.state() != TransactionState::RequestReceived {
                log_warn!(self.log, now, LOG_MODULE, "response refused in state {}", trans.state());
                return Err(Error::InvalidState);
            }
            (trans.cmd(), trans.seqno())
        };

        if rc == ReturnCode::Success && matches!(cmd, Command::Add | Command::Delete) {
            self.neighbors.get_or_alloc(out.dest)?;
        }

        let pkt = Packet::new(MessageType::Response, out.code, out.sfid, seqno, out.body)?;
        if let Err(e) = self.transmit(&out.dest, &pkt) {
            log_error!(self.log, now, LOG_MODULE, "response send failed [peer:{}]: {}", out.dest, e);
            return Err(Error::SendFailed);
        }

        self.transactions.advance(id, TransEvent::ResponseSent)?;
        let complete = match self.transactions.get_mut(id) {
            Some(trans) => {
                trans.record_response(rc);
                trans.set_callback(out.callback);
                trans.set_body(out.body)?;
                trans.is_complete()
            }
            None => return Err(Error::InternalError),
        };
        log_info!(
            self.log,
            now,
            LOG_MODULE,
            "sent {} response {} [peer:{} seqno:{}]",
            cmd,
            rc,
            out.dest,
            seqno
        );

        if complete {
            self.finish(id, Finish::Completed);
        } else if let Some(desc) = self.descriptor(out.sfid).copied() {
            self.rearm(id, out.timeout, &desc);
        }
        Ok(())
    }

    fn send_confirmation(&mut self, rc: ReturnCode, out: &Outbound<'_>) -> Result<()> {
        let now = self.timestamp();
        let id = self.transactions.find(&out.dest, out.sfid).ok_or(Error::NoTransaction)?;
        let seqno = {
            let trans = self.transactions.get(id).ok_or(Error::NoTransaction)?;
            if trans.role() != Role::Initiator || trans.state() != TransactionState::ResponseReceived {
                log_warn!(self.log, now, LOG_MODULE, "confirmation refused in state {}", trans.state());
                return Err(Error::InvalidState);
            }
            trans.seqno()
        };

        let pkt = Packet::new(MessageType::Confirmation, out.code, out.sfid, seqno, out.body)?;
        if let Err(e) = self.transmit(&out.dest, &pkt) {
            log_error!(self.log, now, LOG_MODULE, "confirmation send failed [peer:{}]: {}", out.dest, e);
            return Err(Error::SendFailed);
        }

        self.transactions.advance(id, TransEvent::ConfirmationSent)?;
        if let Some(trans) = self.transactions.get_mut(id) {
            trans.set_callback(out.callback);
            trans.set_body(out.body)?;
        }
        log_info!(
            self.log,
            now,
            LOG_MODULE,
            "sent confirmation {} [peer:{} seqno:{}]",
            rc,
            out.dest,
            seqno
        );
        self.finish(id, Finish::Completed);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    /// Process a frame received from `src`
    ///
    /// Returns the message to hand to its SF, or `None` when the core
    /// answered it on its own.
    ///
    /// # Errors
    ///
    /// - parse errors for frames that do not decode, [`Error::BodyTooLong`]
    ///   for frames over `MAX_FRAME_LEN`
    /// - [`Error::UnknownSfid`]: no SF for the SFID (answered `RC_ERR_SFID`)
    /// - [`Error::TransactionBusy`] / [`Error::TransactionLocked`] /
    ///   [`Error::TransactionTableFull`]: Request refused
    /// - [`Error::NoTransaction`], [`Error::SeqNumMismatch`],
    ///   [`Error::InvalidTransition`]: stray Response or Confirmation
    pub fn input<'f>(&mut self, frame: &'f [u8], src: LinkAddr) -> Result<Option<Delivery<'f>>> {
        let now = self.timestamp();
        let pkt = match Packet::parse(frame) {
            Ok(pkt) => pkt,
            Err(Error::UnsupportedVersion) => {
                let raw = RawHeader::read(frame)?;
                log_error!(self.log, now, LOG_MODULE, "unsupported version {} [peer:{}]", raw.version, src);
                if self.config.replies.err_version {
                    self.reply_error(&src, ReturnCode::ErrVersion, raw.sfid, raw.seqno);
                }
                return Err(Error::UnsupportedVersion);
            }
            Err(e) => {
                log_error!(self.log, now, LOG_MODULE, "malformed packet [peer:{}]: {}", src, e);
                return Err(e);
            }
        };

        let Some(desc) = self.descriptor(pkt.sfid).copied() else {
            log_error!(self.log, now, LOG_MODULE, "SF unavailable [sfid:{}]", pkt.sfid);
            if self.config.replies.err_sfid {
                self.reply_error(&src, ReturnCode::ErrSfid, pkt.sfid, pkt.seqno);
            }
            return Err(Error::UnknownSfid);
        };

        match pkt.code {
            Code::Command(cmd) => self.receive_request(&pkt, cmd, src, &desc),
            Code::Return(rc) => self.receive_reply(&pkt, rc, src, &desc),
        }
    }

    fn receive_request<'f>(
        &mut self,
        pkt: &Packet<'f>,
        cmd: Command,
        src: LinkAddr,
        desc: &SfDescriptor,
    ) -> Result<Option<Delivery<'f>>> {
        let now = self.timestamp();
        let existing = self
            .transaction_for(&src, pkt.sfid)
            .map(|t| (t.role(), t.seqno()));
        if let Some((role, seqno)) = existing {
            let (rc, err) = match role {
                Role::Initiator => (ReturnCode::ErrBusy, Error::TransactionBusy),
                Role::Responder => (ReturnCode::ErrLocked, Error::TransactionLocked),
            };
            log_error!(
                self.log,
                now,
                LOG_MODULE,
                "request while another is in process [peer:{} seqno:{}]",
                src,
                seqno
            );
            if self.config.replies.err_busy {
                self.reply_error(&src, rc, pkt.sfid, pkt.seqno);
            }
            return Err(err);
        }

        if cmd == Command::Clear {
            self.abort_peer(&src);
            if let Some(nbr) = self.neighbors.find_mut(&src) {
                nbr.reset_next_seqno();
                log_info!(self.log, now, LOG_MODULE, "reset next_seqno by CLEAR [peer:{}]", src);
            }
        }

        let id = match self.transactions.create(
            src,
            pkt.sfid,
            pkt.seqno,
            cmd,
            Role::Responder,
            desc.three_step.contains(cmd),
        ) {
            Ok(id) => id,
            Err(e) => {
                log_error!(self.log, now, LOG_MODULE, "cannot accept request [peer:{}]: {}", src, e);
                if self.config.replies.err_busy {
                    self.reply_error(&src, ReturnCode::ErrBusy, pkt.sfid, pkt.seqno);
                }
                return Err(e);
            }
        };
        let stored = match self.transactions.get_mut(id) {
            Some(trans) => trans.set_body(pkt.body),
            None => Err(Error::InternalError),
        };
        let accepted = stored.and_then(|()| {
            self.transactions
                .advance(id, TransEvent::RequestReceived)
                .map(|_| ())
        });
        if let Err(e) = accepted {
            self.transactions.free(id);
            log_error!(self.log, now, LOG_MODULE, "request dropped [peer:{}]: {}", src, e);
            return Err(e);
        }

        let inconsistent = cmd != Command::Clear
            && match self.neighbors.find(&src) {
                None => pkt.seqno != 0,
                Some(nbr) => nbr.next_seqno() != 0 && pkt.seqno == 0,
            };
        if inconsistent {
            log_error!(
                self.log,
                now,
                LOG_MODULE,
                "schedule inconsistency [peer:{} seqno:{}]",
                src,
                pkt.seqno
            );
            if self.config.replies.err_seqnum {
                let reply = Packet {
                    msg_type: MessageType::Response,
                    code: Code::Return(ReturnCode::ErrSeqnum),
                    sfid: pkt.sfid,
                    seqno: pkt.seqno,
                    body: &[],
                };
                match self.transmit(&src, &reply) {
                    Ok(()) => {
                        if let Err(e) = self.transactions.advance(id, TransEvent::ResponseSent) {
                            log_warn!(self.log, now, LOG_MODULE, "RC_ERR_SEQNUM sent in wrong state: {}", e);
                        }
                    }
                    Err(e) => {
                        log_error!(self.log, now, LOG_MODULE, "failed to return RC_ERR_SEQNUM: {}", e);
                    }
                }
            }
            self.finish(id, Finish::Completed);
            self.notify(Notification::Error {
                sfid: pkt.sfid,
                error: SixpError::ScheduleInconsistency,
                cmd,
                seqno: pkt.seqno,
                peer: src,
            });
            return Ok(None);
        }

        if let Err(e) = self.arm(id, None, desc) {
            self.transactions.free(id);
            log_error!(self.log, now, LOG_MODULE, "no timer for request [peer:{}]: {}", src, e);
            return Err(e);
        }
        log_info!(
            self.log,
            now,
            LOG_MODULE,
            "received {} request [peer:{} sfid:{} seqno:{}]",
            cmd,
            src,
            pkt.sfid,
            pkt.seqno
        );
        Ok(Some(Delivery {
            id,
            inbound: Inbound {
                msg_type: pkt.msg_type,
                code: pkt.code,
                cmd,
                sfid: pkt.sfid,
                seqno: pkt.seqno,
                peer: src,
                body: pkt.body,
            },
        }))
    }

    fn receive_reply<'f>(
        &mut self,
        pkt: &Packet<'f>,
        rc: ReturnCode,
        src: LinkAddr,
        desc: &SfDescriptor,
    ) -> Result<Option<Delivery<'f>>> {
        let now = self.timestamp();
        let Some(id) = self.transactions.find(&src, pkt.sfid) else {
            log_error!(self.log, now, LOG_MODULE, "no trans for {} [peer:{}]", pkt.msg_type, src);
            return Err(Error::NoTransaction);
        };
        let (cmd, seqno) = match self.transactions.get(id) {
            Some(trans) => (trans.cmd(), trans.seqno()),
            None => return Err(Error::NoTransaction),
        };
        if seqno != pkt.seqno {
            log_error!(
                self.log,
                now,
                LOG_MODULE,
                "invalid seqno [seqno:{}, {}]",
                seqno,
                pkt.seqno
            );
            return Err(Error::SeqNumMismatch);
        }

        let event = if pkt.msg_type == MessageType::Response {
            TransEvent::ResponseReceived
        } else {
            TransEvent::ConfirmationReceived
        };
        if let Err(e) = self.transactions.advance(id, event) {
            log_error!(self.log, now, LOG_MODULE, "unexpected {} [peer:{}]", pkt.msg_type, src);
            return Err(e);
        }

        let stored = match self.transactions.get_mut(id) {
            Some(trans) => {
                if pkt.msg_type == MessageType::Response {
                    trans.record_response(rc);
                }
                trans.set_body(pkt.body).map(|()| trans.is_complete())
            }
            None => Err(Error::InternalError),
        };
        let complete = match stored {
            Ok(complete) => complete,
            Err(e) => {
                log_error!(self.log, now, LOG_MODULE, "{} dropped [peer:{}]: {}", pkt.msg_type, src, e);
                self.finish(id, Finish::Aborted);
                return Err(e);
            }
        };
        if pkt.msg_type == MessageType::Response
            && rc == ReturnCode::Success
            && matches!(cmd, Command::Add | Command::Delete)
        {
            if let Err(e) = self.neighbors.get_or_alloc(src) {
                log_warn!(self.log, now, LOG_MODULE, "neighbor not allocated [peer:{}]: {}", src, e);
            }
        }
        if !complete {
            self.rearm(id, None, desc);
        }
        log_info!(
            self.log,
            now,
            LOG_MODULE,
            "received {} {} [peer:{} seqno:{}]",
            pkt.msg_type,
            rc,
            src,
            seqno
        );
        Ok(Some(Delivery {
            id,
            inbound: Inbound {
                msg_type: pkt.msg_type,
                code: pkt.code,
                cmd,
                sfid: pkt.sfid,
                seqno: pkt.seqno,
                peer: src,
                body: pkt.body,
            },
        }))
    }

    /// Release a delivered transaction once its handshake is complete
    ///
    /// Called after the SF has seen the message, so that it can still query
    /// the transaction while handling it.
    pub fn settle(&mut self, id: TransactionId) {
        if self.transactions.get(id).is_some_and(Transaction::is_complete) {
            self.finish(id, Finish::Completed);
        }
    }

    // ------------------------------------------------------------------------
    // Timers and neighbor lifecycle
    // ------------------------------------------------------------------------

    /// Handle an expired transaction timer
    ///
    /// Returns `false` for a token whose transaction no longer exists.
    pub fn timer_expired(&mut self, id: TransactionId) -> bool {
        let now = self.timestamp();
        let Some(trans) = self.transactions.get_mut(id) else {
            log_debug!(self.log, now, LOG_MODULE, "stale timer ignored");
            return false;
        };
        trans.replace_timer(None);
        let (peer, seqno) = (*trans.peer(), trans.seqno());
        log_warn!(self.log, now, LOG_MODULE, "trans timeout [peer:{} seqno:{}]", peer, seqno);
        self.finish(id, Finish::TimedOut);
        true
    }

    /// The MAC no longer knows `peer`
    pub fn neighbor_removed(&mut self, peer: &LinkAddr) {
        self.abort_peer(peer);
        if self.neighbors.free(peer).is_some() {
            let now = self.timestamp();
            log_info!(self.log, now, LOG_MODULE, "neighbor removed [peer:{}]", peer);
        }
    }

    /// Drop all 6P state shared with `peer` without telling it
    pub fn clear(&mut self, peer: &LinkAddr) {
        self.abort_peer(peer);
        if let Some(nbr) = self.neighbors.find_mut(peer) {
            nbr.reset_next_seqno();
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Transaction with `peer` owned by `sfid`
    #[must_use]
    pub fn transaction_for(&self, peer: &LinkAddr, sfid: u8) -> Option<&Transaction> {
        self.transactions
            .find(peer, sfid)
            .and_then(|id| self.transactions.get(id))
    }

    /// Transaction table
    #[must_use]
    pub const fn transactions(&self) -> &TransactionTable {
        &self.transactions
    }

    /// Neighbor table
    #[must_use]
    pub const fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// Neighbor table for update (e.g. schedule generation)
    pub fn neighbors_mut(&mut self) -> &mut NeighborTable {
        &mut self.neighbors
    }

    /// MAC service
    #[must_use]
    pub const fn mac(&self) -> &M {
        &self.mac
    }

    /// MAC service for update
    pub fn mac_mut(&mut self) -> &mut M {
        &mut self.mac
    }

    /// Timer service
    #[must_use]
    pub const fn timer(&self) -> &T {
        &self.timer
    }

    /// Timer service for update
    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    /// Engine log
    #[must_use]
    pub const fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// Engine log for update
    pub fn log_mut(&mut self) -> &mut LogBuffer {
        &mut self.log
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &SixtopConfig {
        &self.config
    }

    /// Next queued notification
    pub fn pop_notification(&mut self) -> Option<Notification> {
        self.pending.pop_front()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn timestamp(&self) -> u32 {
        self.timer.now().as_timestamp()
    }

    fn transmit(&mut self, dest: &LinkAddr, pkt: &Packet<'_>) -> Result<()> {
        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = pkt.write(&mut frame)?;
        self.mac.send(dest, &frame[..len]).map_err(|_| Error::SendFailed)
    }

    /// Fire-and-forget error Response outside any transaction
    fn reply_error(&mut self, dest: &LinkAddr, rc: ReturnCode, sfid: u8, seqno: u8) {
        let pkt = Packet {
            msg_type: MessageType::Response,
            code: Code::Return(rc),
            sfid,
            seqno,
            body: &[],
        };
        if let Err(e) = self.transmit(dest, &pkt) {
            let now = self.timestamp();
            log_error!(self.log, now, LOG_MODULE, "failed to return {}: {}", rc, e);
        }
    }

    fn timeout_for(&self, requested: Option<Millis>, desc: &SfDescriptor) -> Millis {
        match requested.filter(|t| !t.is_zero()) {
            Some(t) => t,
            None if !desc.timeout.is_zero() => desc.timeout,
            None => self.config.default_timeout,
        }
    }

    fn arm(&mut self, id: TransactionId, requested: Option<Millis>, desc: &SfDescriptor) -> Result<()> {
        let timeout = self.timeout_for(requested, desc);
        let handle = self.timer.arm(timeout, id)?;
        if let Some(old) = self
            .transactions
            .get_mut(id)
            .and_then(|t| t.replace_timer(Some(handle)))
        {
            self.timer.cancel(old);
        }
        Ok(())
    }

    fn rearm(&mut self, id: TransactionId, requested: Option<Millis>, desc: &SfDescriptor) {
        if let Err(e) = self.arm(id, requested, desc) {
            let now = self.timestamp();
            log_warn!(self.log, now, LOG_MODULE, "timer not restarted: {}", e);
        }
    }

    fn abort_peer(&mut self, peer: &LinkAddr) {
        for id in self.transactions.ids_for_peer(peer) {
            self.finish(id, Finish::Aborted);
        }
    }

    fn notify(&mut self, notification: Notification) {
        if self.pending.push_back(notification).is_err() {
            let now = self.timestamp();
            log_error!(
                self.log,
                now,
                LOG_MODULE,
                "{} [sfid:{}]",
                Error::NotificationQueueFull,
                notification.sfid()
            );
        }
    }

    /// Release a transaction, update sequencing and queue notifications
    fn finish(&mut self, id: TransactionId, how: Finish) {
        let Some(trans) = self.transactions.free(id) else {
            return;
        };
        if let Some(handle) = trans.timer() {
            self.timer.cancel(handle);
        }
        let peer = *trans.peer();

        if how != Finish::Aborted {
            if trans.cmd() == Command::Clear {
                if let Some(nbr) = self.neighbors.find_mut(&peer) {
                    nbr.reset_next_seqno();
                }
            } else {
                match self.neighbors.get_or_alloc(peer) {
                    Ok(nbr) => nbr.set_next_seqno(trans.seqno().wrapping_add(1)),
                    Err(e) => {
                        let now = self.timestamp();
                        log_warn!(self.log, now, LOG_MODULE, "next_seqno not kept [peer:{}]: {}", peer, e);
                    }
                }
            }
        }

        if how == Finish::TimedOut {
            self.notify(Notification::Timeout {
                sfid: trans.sfid(),
                cmd: trans.cmd(),
                peer,
            });
        }
        if let Some(token) = trans.callback() {
            let status = if how == Finish::Completed {
                OutputStatus::Success
            } else {
                OutputStatus::Failure
            };
            self.notify(Notification::OutputDone {
                sfid: trans.sfid(),
                status,
                peer,
                token,
            });
        }

        let now = self.timestamp();
        log_debug!(
            self.log,
            now,
            LOG_MODULE,
            "trans freed [peer:{} seqno:{} {:?}]",
            peer,
            trans.seqno(),
            how
        );
    }
}

impl<M: Mac, T: TimerService> SixpHandle for SixpCore<M, T> {
    fn output(&mut self, out: Outbound<'_>) -> Result<()> {
        SixpCore::output(self, out)
    }

    fn transaction(&self, peer: &LinkAddr, sfid: u8) -> Option<TransactionInfo> {
        self.transaction_for(peer, sfid).map(TransactionInfo::from)
    }

    fn neighbor(&self, peer: &LinkAddr) -> Option<Neighbor> {
        self.neighbors.find(peer).copied()
    }

    fn remove_neighbor(&mut self, peer: &LinkAddr) {
        self.neighbor_removed(peer);
    }

    fn now(&self) -> Ticks {
        self.timer.now()
    }
}
