//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Network connection slot
//!
//! A slot owns at most one network connection. Its output is, in order, the
//! banner, its share of the shared device-to-network buffer (tracked by
//! `write_pos`) and its private control bytes (Telnet replies, RFC 2217
//! notifications, notices). A control sequence, once started, is finished
//! before more data goes out so Telnet commands are never split.
//!
//! A client that suspended flow control does not hold up the shared buffer:
//! its unsent share is moved into the slot's own backlog, which goes out
//! first once the client resumes.

use crate::buffer::ByteBuffer;
use crate::config::RemoteAddrRule;
use crate::endpoint::{Candidate, Endpoint};
use crate::types::{CloseReason, SlotStats};
use bytes::{Buf, BytesMut};
use serbridge_telnetcodec::{ComPortCommand, TelnetCodec, TelnetFrame};
use std::io;
use std::net::SocketAddr;
use tokio::time::Instant;
use tokio_util::codec::Encoder;
use tracing::warn;

/// What a slot is being used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRef {
    /// The candidate now owns this slot
    Active(usize),
    /// The candidate waits for this slot's current user to leave
    Replacing(usize),
}

impl SlotRef {
    /// Slot index
    pub fn index(&self) -> usize {
        match self {
            SlotRef::Active(i) | SlotRef::Replacing(i) => *i,
        }
    }
}

/// One entry of a port's fixed slot array
#[derive(Debug)]
pub struct NetSlot {
    pub(crate) index: usize,
    pub(crate) endpoint: Option<Box<dyn Endpoint>>,
    pub(crate) remote: String,
    pub(crate) remote_addr: Option<SocketAddr>,
    /// Reserved for a connect-back target
    pub(crate) remote_fixed: bool,
    pub(crate) connect_back: Option<RemoteAddrRule>,
    pub(crate) dialing: bool,

    pub(crate) closing: bool,
    pub(crate) close_reason: Option<CloseReason>,
    pub(crate) close_countdown: u32,

    pub(crate) bytes_received: u64,
    pub(crate) bytes_sent: u64,
    last_bytes_received: u64,
    last_bytes_sent: u64,
    pub(crate) timeout_left: u32,

    banner: ByteBuffer,
    pub(crate) write_pos: usize,
    control: BytesMut,
    control_inflight: bool,

    pub(crate) codec: Option<TelnetCodec>,
    pub(crate) rfc2217: bool,
    pub(crate) modemstate_mask: u8,
    pub(crate) linestate_mask: u8,
    pub(crate) modemstate_sent: bool,
    pub(crate) linestate_sent: bool,
    pub(crate) last_modemstate_sent: u8,
    pub(crate) last_linestate_sent: u8,
    pub(crate) suspended: bool,
    held: BytesMut,

    pub(crate) pending_replacement: Option<Candidate>,
    pub(crate) connected_at: Option<Instant>,
}

impl NetSlot {
    /// Empty slot at `index`
    pub(crate) fn new(index: usize, connect_back: Option<RemoteAddrRule>) -> Self {
        Self {
            index,
            endpoint: None,
            remote: String::new(),
            remote_addr: None,
            remote_fixed: connect_back.is_some(),
            connect_back,
            dialing: false,
            closing: false,
            close_reason: None,
            close_countdown: 0,
            bytes_received: 0,
            bytes_sent: 0,
            last_bytes_received: 0,
            last_bytes_sent: 0,
            timeout_left: 0,
            banner: ByteBuffer::new(0),
            write_pos: 0,
            control: BytesMut::new(),
            control_inflight: false,
            codec: None,
            rfc2217: false,
            modemstate_mask: 255,
            linestate_mask: 0,
            modemstate_sent: false,
            linestate_sent: false,
            last_modemstate_sent: 0,
            last_linestate_sent: 0,
            suspended: false,
            held: BytesMut::new(),
            pending_replacement: None,
            connected_at: None,
        }
    }

    /// Whether a connection is attached
    pub(crate) fn is_live(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Whether a connection is attached and not on its way out
    pub(crate) fn is_active(&self) -> bool {
        self.endpoint.is_some() && !self.closing
    }

    /// Take ownership of `candidate` with zeroed statistics
    pub(crate) fn attach(&mut self, candidate: Candidate, codec: Option<TelnetCodec>, timeout: u32) {
        self.endpoint = Some(candidate.endpoint);
        self.remote = candidate.remote;
        self.remote_addr = candidate.remote_addr;
        self.closing = false;
        self.close_reason = None;
        self.close_countdown = 0;
        self.bytes_received = 0;
        self.bytes_sent = 0;
        self.last_bytes_received = 0;
        self.last_bytes_sent = 0;
        self.timeout_left = timeout;
        self.banner.reset();
        self.write_pos = 0;
        self.control.clear();
        self.control_inflight = false;
        self.codec = codec;
        self.rfc2217 = false;
        self.modemstate_mask = 255;
        self.linestate_mask = 0;
        self.modemstate_sent = false;
        self.linestate_sent = false;
        self.last_modemstate_sent = 0;
        self.last_linestate_sent = 0;
        self.suspended = false;
        self.held.clear();
        self.connected_at = Some(Instant::now());
    }

    /// Queue the banner
    pub(crate) fn set_banner(&mut self, banner: &[u8]) {
        self.banner = ByteBuffer::new(banner.len());
        self.banner.append(banner);
    }

    /// Queue raw control bytes after any data already owed
    pub(crate) fn queue_control(&mut self, bytes: &[u8]) {
        self.control.extend_from_slice(bytes);
    }

    /// Move the codec's negotiation replies into the control queue
    pub(crate) fn collect_responses(&mut self) {
        if let Some(codec) = self.codec.as_mut() {
            if codec.has_pending_responses() {
                codec.flush_responses(&mut self.control);
            }
        }
    }

    /// Queue an RFC 2217 command from the server side
    pub(crate) fn queue_comport(&mut self, command: ComPortCommand) {
        let Some(codec) = self.codec.as_mut() else {
            return;
        };
        if let Err(err) = codec.encode(TelnetFrame::ComPort(command), &mut self.control) {
            warn!(slot = self.index, error = %err, "unable to encode COM-PORT-OPTION reply");
        }
    }

    /// Whether anything is owed to the client.
    ///
    /// `sendable` is how much of the shared device buffer has been released.
    pub(crate) fn has_pending_output(&self, sendable: usize) -> bool {
        !self.banner.is_drained()
            || !self.control.is_empty()
            || (!self.suspended && (!self.held.is_empty() || self.write_pos < sendable))
    }

    /// Whether this slot no longer needs the shared device buffer; a
    /// suspended slot keeps its share in its backlog instead
    pub(crate) fn data_drained(&self, sendable: usize) -> bool {
        !self.is_live() || self.suspended || self.write_pos >= sendable
    }

    /// Move the unsent part of `data` into the backlog, keeping at most
    /// `limit` bytes held. Returns how many bytes did not fit.
    pub(crate) fn hold_unsent(&mut self, data: &[u8], limit: usize) -> usize {
        let unsent = &data[self.write_pos.min(data.len())..];
        let take = unsent.len().min(limit.saturating_sub(self.held.len()));
        self.held.extend_from_slice(&unsent[..take]);
        self.write_pos = data.len();
        unsent.len() - take
    }

    /// Bytes waiting in the backlog
    pub(crate) fn held_len(&self) -> usize {
        self.held.len()
    }

    /// Write as much pending output as the connection takes.
    ///
    /// Returns the bytes written; `WouldBlock` is not an error.
    pub(crate) fn write_output(&mut self, data: &[u8]) -> io::Result<usize> {
        let Some(endpoint) = self.endpoint.as_mut() else {
            return Ok(0);
        };
        let mut total = 0;

        while !self.banner.is_drained() {
            match endpoint.try_write(self.banner.unsent()) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    self.banner.advance(n);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(e) => return Err(e),
            }
        }

        if self.control_inflight {
            match write_control(&mut **endpoint, &mut self.control)? {
                (n, true) => {
                    total += n;
                    self.control_inflight = false;
                }
                (n, false) => return Ok(total + n),
            }
        }

        if !self.suspended {
            while !self.held.is_empty() {
                match endpoint.try_write(&self.held[..]) {
                    Ok(0) => return Ok(total),
                    Ok(n) => {
                        self.held.advance(n);
                        total += n;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                    Err(e) => return Err(e),
                }
            }
            while self.write_pos < data.len() {
                match endpoint.try_write(&data[self.write_pos..]) {
                    Ok(0) => return Ok(total),
                    Ok(n) => {
                        self.write_pos += n;
                        total += n;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                    Err(e) => return Err(e),
                }
            }
        }

        let (n, done) = write_control(&mut **endpoint, &mut self.control)?;
        self.control_inflight = !done;
        Ok(total + n)
    }

    /// Record bytes written; kept separate so the port can count once per call
    pub(crate) fn note_sent(&mut self, count: usize) {
        self.bytes_sent += count as u64;
    }

    /// Record bytes read
    pub(crate) fn note_received(&mut self, count: usize) {
        self.bytes_received += count as u64;
    }

    /// Whether the counters moved since the last call, taking a new snapshot
    pub(crate) fn take_activity(&mut self) -> bool {
        let active = self.bytes_received != self.last_bytes_received
            || self.bytes_sent != self.last_bytes_sent;
        self.last_bytes_received = self.bytes_received;
        self.last_bytes_sent = self.bytes_sent;
        active
    }

    /// Statistics snapshot
    pub(crate) fn stats(&self) -> SlotStats {
        SlotStats {
            index: self.index,
            remote: self.remote.clone(),
            connect_back: self.remote_fixed,
            bytes_received: self.bytes_received,
            bytes_sent: self.bytes_sent,
            rfc2217: self.rfc2217,
            closing: self.closing,
            connected_for: self
                .connected_at
                .map(|at| at.elapsed())
                .unwrap_or_default(),
        }
    }

    /// Drop the connection and return the slot to its empty state.
    ///
    /// Returns the reason the connection was closed with and how long it lived.
    pub(crate) fn release(&mut self) -> (CloseReason, std::time::Duration) {
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.close();
        }
        let reason = self.close_reason.take().unwrap_or(CloseReason::PeerClosed);
        let lived = self
            .connected_at
            .take()
            .map(|at| at.elapsed())
            .unwrap_or_default();
        let connect_back = self.connect_back.take();
        let index = self.index;
        let replacement = self.pending_replacement.take();
        *self = NetSlot::new(index, connect_back);
        self.pending_replacement = replacement;
        (reason, lived)
    }
}

/// Write `control` until it is empty or the endpoint stops taking bytes.
/// Returns the bytes written and whether the queue drained.
fn write_control(endpoint: &mut dyn Endpoint, control: &mut BytesMut) -> io::Result<(usize, bool)> {
    let mut total = 0;
    while !control.is_empty() {
        match endpoint.try_write(&control[..]) {
            Ok(0) => return Ok((total, false)),
            Ok(n) => {
                control.advance(n);
                total += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok((total, false)),
            Err(e) => return Err(e),
        }
    }
    Ok((total, true))
}
