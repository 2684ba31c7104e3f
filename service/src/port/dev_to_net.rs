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

//! Device to network transfer
//!
//! Device reads land in the shared device buffer. With chardelay the bytes
//! are held until the line goes quiet for one window, the oldest byte has
//! waited `max_us`, or the buffer fills. A flush releases the buffer to
//! every slot; reading stays paused until every slot has taken its copy.
//! A slot whose client suspended flow control keeps its copy in its own
//! backlog so the others carry on.

use super::Port;
use crate::timer::TimerKind;
use crate::trace::TraceDirection;
use crate::transfer::TransferEvent;
use crate::types::{CloseReason, Direction, TransferState};
use bytes::BytesMut;
use serbridge_telnetcodec::escape_iac;
use std::io;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Advance an incremental match of `seq` over `data`.
///
/// `pos` is the length of the prefix of `seq` matched so far and carries
/// over between reads. Returns the offset just past the match when `seq`
/// completes inside `data`.
fn scan(seq: &[u8], pos: &mut usize, data: &[u8]) -> Option<usize> {
    if seq.is_empty() {
        return None;
    }
    let fail = failure_table(seq);
    for (i, &b) in data.iter().enumerate() {
        while *pos > 0 && seq[*pos] != b {
            *pos = fail[*pos - 1];
        }
        if seq[*pos] == b {
            *pos += 1;
        }
        if *pos == seq.len() {
            *pos = 0;
            return Some(i + 1);
        }
    }
    None
}

/// For each prefix `seq[..=i]`, the length of its longest proper prefix
/// that is also a suffix
fn failure_table(seq: &[u8]) -> Vec<usize> {
    let mut fail = vec![0; seq.len()];
    let mut k = 0;
    for i in 1..seq.len() {
        while k > 0 && seq[i] != seq[k] {
            k = fail[k - 1];
        }
        if seq[i] == seq[k] {
            k += 1;
        }
        fail[i] = k;
    }
    fail
}

impl Port {
    pub(crate) fn handle_dev_readable(&mut self) {
        let max = self.dev_read_room();
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if max == 0 {
            return;
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(max, 0);
        let result = device.try_read(&mut scratch[..max]);
        match result {
            Ok(0) => self.device_failed("device closed".to_string()),
            Ok(n) => self.on_dev_data(&scratch[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => self.device_failed(format!("device read error: {}", e)),
        }
        self.scratch = scratch;
    }

    fn on_dev_data(&mut self, data: &[u8]) {
        self.dev_bytes_received += data.len() as u64;
        self.services.metrics.dev_read(&self.config.name, data.len());
        self.traces.record(TraceDirection::Read, data);
        trace!(port = %self.config.name, len = data.len(), "device data");

        if self.config.no_dev_to_net {
            return;
        }

        if !self.slots.iter().any(|s| s.is_active()) {
            if !self.config.connect_back.is_empty() && self.shutdown.is_none() {
                self.monitor.tap(Direction::DevToNet, data);
                let taken = self.append_dev_data(data);
                if taken < data.len() {
                    debug!(port = %self.config.name, dropped = data.len() - taken, "buffer full while unconnected");
                }
                self.start_connect_backs();
            }
            return;
        }

        let mut data = data;
        let mut close_now = false;
        if let Some(seq) = &self.config.closeon {
            if let Some(end) = scan(seq, &mut self.closeon_pos, data) {
                data = &data[..end];
                close_now = true;
            }
        }
        let mut send_now = false;
        if let Some(seq) = &self.config.sendon {
            send_now = scan(seq, &mut self.sendon_pos, data).is_some();
        }

        self.monitor.tap(Direction::DevToNet, data);
        self.append_dev_data(data);

        if close_now {
            debug!(port = %self.config.name, "closeon sequence seen");
            self.close_on_output_done = true;
            self.flush_dev_to_net();
        } else if send_now || !self.config.chardelay.enabled || self.dev_read_room() == 0 {
            self.flush_dev_to_net();
        } else {
            self.schedule_chardelay();
        }
    }

    fn append_dev_data(&mut self, data: &[u8]) -> usize {
        if self.config.telnet {
            let mut escaped = BytesMut::with_capacity(data.len() * 2);
            escape_iac(data, &mut escaped);
            self.dev_to_net_buf.append(&escaped)
        } else {
            self.dev_to_net_buf.append(data)
        }
    }

    fn schedule_chardelay(&mut self) {
        let now = Instant::now();
        let max_hold = self.config.chardelay.max_hold();
        let send_time = *self.send_time.get_or_insert(now + max_hold);
        if send_time <= now {
            self.flush_dev_to_net();
            return;
        }
        let wait = self.chardelay_window.min(send_time - now);
        self.timers.start(TimerKind::CharDelay, wait);
    }

    /// Release everything buffered to the slots and start writing it
    pub(crate) fn flush_dev_to_net(&mut self) {
        self.timers.stop(TimerKind::CharDelay);
        self.send_time = None;
        if self.dev_to_net_buf.len() == self.sendable {
            return;
        }
        self.sendable = self.dev_to_net_buf.len();
        if self.dev_to_net.state() == TransferState::WaitingInput {
            self.dev_to_net.handle(TransferEvent::OutputBlocked);
        }
        for i in 0..self.slots.len() {
            if self.slots[i].is_live() {
                self.write_slot(i);
            }
        }
        self.check_dev_to_net_drained();
    }

    /// Push pending output to slot `i`
    pub(crate) fn write_slot(&mut self, i: usize) {
        let sendable = self.sendable;
        let slot = &mut self.slots[i];
        if !slot.is_live() {
            return;
        }
        let result = slot.write_output(&self.dev_to_net_buf.as_slice()[..sendable]);
        match result {
            Ok(n) => {
                if n > 0 {
                    slot.note_sent(n);
                    self.services.metrics.net_written(&self.config.name, n);
                }
            }
            Err(e) => {
                self.services.metrics.connection_error(&self.config.name);
                self.close_slot(i, CloseReason::NetError(e.to_string()));
                self.check_dev_to_net_drained();
                return;
            }
        }
        let slot = &self.slots[i];
        if slot.closing && !slot.has_pending_output(sendable) {
            self.finish_slot_close(i);
        }
        self.check_dev_to_net_drained();
    }

    /// Once every slot took its copy, recycle the buffer and resume reading
    pub(crate) fn check_dev_to_net_drained(&mut self) {
        if self.sendable == 0 {
            return;
        }
        let sendable = self.sendable;
        if !self.slots.iter().all(|s| s.data_drained(sendable)) {
            return;
        }
        let limit = self.config.buffer_size;
        for slot in self.slots.iter_mut() {
            if !slot.is_live() || !slot.suspended || slot.write_pos >= sendable {
                continue;
            }
            let dropped = slot.hold_unsent(&self.dev_to_net_buf.as_slice()[..sendable], limit);
            trace!(port = %self.config.name, slot = slot.index, held = slot.held_len(), "kept data for suspended client");
            if dropped > 0 {
                debug!(port = %self.config.name, slot = slot.index, dropped, "suspended client backlog full");
            }
        }
        let held = self.dev_to_net_buf.as_slice()[sendable..].to_vec();
        self.dev_to_net_buf.reset();
        self.dev_to_net_buf.append(&held);
        self.sendable = 0;
        for slot in &mut self.slots {
            slot.write_pos = 0;
        }
        if self.dev_to_net.state() == TransferState::WaitingOutputClear {
            self.dev_to_net.handle(TransferEvent::OutputCleared);
        }
        if self.close_on_output_done {
            self.close_on_output_done = false;
            for i in 0..self.slots.len() {
                if self.slots[i].is_active() {
                    self.close_slot(i, CloseReason::CloseOn);
                }
            }
        }
    }
}
