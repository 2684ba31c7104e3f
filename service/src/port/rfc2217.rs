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

//! RFC 2217 COM-PORT-OPTION handling
//!
//! Commands from a client are applied to the device and answered with the
//! value now in effect. Modem and line state are sampled on every tick and
//! a slot is notified only when a bit it subscribed to changed since the
//! last notification it got.

use super::Port;
use crate::config::Parity;
use crate::endpoint::SerialRequest;
use crate::render::RenderContext;
use bytes::Bytes;
use serbridge_telnetcodec::consts::modemstate;
use serbridge_telnetcodec::{ComPortCommand, purge};
use tracing::{debug, warn};

impl Port {
    pub(crate) fn handle_rfc2217(&mut self, i: usize, command: ComPortCommand) {
        debug!(port = %self.config.name, slot = i, ?command, "COM-PORT-OPTION command");
        let reply = match command {
            ComPortCommand::Signature(text) if text.is_empty() => {
                Some(ComPortCommand::Signature(self.signature(i)))
            }
            ComPortCommand::Signature(text) => {
                debug!(port = %self.config.name, slot = i, signature = %String::from_utf8_lossy(&text), "client signature");
                None
            }
            ComPortCommand::SetBaudRate(baud) => self
                .serial_request(SerialRequest::Baud(baud))
                .map(ComPortCommand::SetBaudRate),
            ComPortCommand::SetDataSize(size) => self
                .serial_request(SerialRequest::DataSize(size))
                .map(|v| ComPortCommand::SetDataSize(v as u8)),
            ComPortCommand::SetParity(parity) => self
                .serial_request(SerialRequest::Parity(parity))
                .map(|v| ComPortCommand::SetParity(v as u8)),
            ComPortCommand::SetStopSize(stop) => self
                .serial_request(SerialRequest::StopSize(stop))
                .map(|v| ComPortCommand::SetStopSize(v as u8)),
            ComPortCommand::SetControl(value) => self
                .serial_request(SerialRequest::Control(value))
                .map(|v| ComPortCommand::SetControl(v as u8)),
            ComPortCommand::FlowControlSuspend => {
                self.slots[i].suspended = true;
                self.check_dev_to_net_drained();
                None
            }
            ComPortCommand::FlowControlResume => {
                self.slots[i].suspended = false;
                self.write_slot(i);
                None
            }
            ComPortCommand::SetLineStateMask(mask) => {
                self.slots[i].linestate_mask = mask;
                self.slots[i].linestate_sent = false;
                Some(ComPortCommand::SetLineStateMask(mask))
            }
            ComPortCommand::SetModemStateMask(mask) => {
                self.slots[i].modemstate_mask = mask;
                self.slots[i].modemstate_sent = false;
                Some(ComPortCommand::SetModemStateMask(mask))
            }
            ComPortCommand::PurgeData(which) => {
                if let Some(device) = self.device.as_mut() {
                    if let Err(e) = device.purge(which) {
                        warn!(port = %self.config.name, error = %e, "purge failed");
                    }
                }
                if which & purge::TRANSMIT != 0 && !self.closing_device {
                    self.net_to_dev_buf.reset();
                }
                Some(ComPortCommand::PurgeData(which))
            }
            ComPortCommand::NotifyLineState(_)
            | ComPortCommand::NotifyModemState(_)
            | ComPortCommand::Unknown(..) => None,
        };
        if let Some(reply) = reply {
            self.slots[i].queue_comport(reply);
        }
        // A new modem state mask is answered with the current state at once.
        if !self.slots[i].modemstate_sent {
            if let Some(state) = self.last_modemstate {
                self.notify_modemstate(i, state, state);
            }
        }
    }

    fn signature(&self, i: usize) -> Bytes {
        let template = self.config.signature.as_deref().unwrap_or("serbridge \\p");
        let ctx = RenderContext {
            port: &self.config.name,
            device: &self.config.device,
            remote: Some(&self.slots[i].remote),
            serial: self.serial,
        };
        match self.services.renderer.render(template, &ctx) {
            Ok(signature) => signature,
            Err(e) => {
                warn!(port = %self.config.name, error = %e, "unable to render signature");
                Bytes::from(self.config.name.clone())
            }
        }
    }

    /// Apply a line setting and return the value to report back
    fn serial_request(&mut self, request: SerialRequest) -> Option<u32> {
        let device = self.device.as_mut()?;
        let applied = match device.serial_control(request) {
            Ok(value) => value,
            Err(e) => {
                warn!(port = %self.config.name, ?request, error = %e, "serial control failed");
                return None;
            }
        };
        let changed = match request {
            SerialRequest::Baud(v) => {
                self.serial.baud = applied;
                v != 0
            }
            SerialRequest::DataSize(v) => {
                self.serial.data_bits = applied as u8;
                v != 0
            }
            SerialRequest::Parity(v) => {
                if let Some(parity) = Parity::from_rfc2217(applied as u8) {
                    self.serial.parity = parity;
                }
                v != 0
            }
            SerialRequest::StopSize(v) => {
                self.serial.stop_bits = (applied as u8).clamp(1, 2);
                v != 0
            }
            SerialRequest::Control(_) => false,
        };
        if changed {
            self.chardelay_window = self.config.chardelay.window(&self.serial);
            debug!(port = %self.config.name, serial = %self.serial, window = ?self.chardelay_window, "line settings changed");
        }
        Some(applied)
    }

    /// Sample modem and line state for the slots that speak RFC 2217
    pub(crate) fn poll_device_state(&mut self) {
        if !self.slots.iter().any(|s| s.is_active() && s.rfc2217) {
            return;
        }
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let modem = device.modem_state();
        let line = device.line_state();
        match modem {
            Ok(Some(state)) => self.update_modemstate(state),
            Ok(None) => {}
            Err(e) => warn!(port = %self.config.name, error = %e, "unable to read modem state"),
        }
        match line {
            Ok(Some(state)) => self.update_linestate(state),
            Ok(None) => {}
            Err(e) => warn!(port = %self.config.name, error = %e, "unable to read line state"),
        }
    }

    /// Record a new modem state and notify the slots whose subscribed bits changed
    pub(crate) fn update_modemstate(&mut self, state: u8) {
        let previous = self.last_modemstate.unwrap_or(state);
        self.last_modemstate = Some(state);
        for i in 0..self.slots.len() {
            self.notify_modemstate(i, previous, state);
        }
    }

    fn notify_modemstate(&mut self, i: usize, previous: u8, state: u8) {
        let slot = &mut self.slots[i];
        if !slot.is_active() || !slot.rfc2217 {
            return;
        }
        let mask = slot.modemstate_mask;
        let lines = state & modemstate::LINES;
        if slot.modemstate_sent && (lines & mask) == (slot.last_modemstate_sent & mask) {
            return;
        }
        let delta = ((previous ^ state) & modemstate::LINES) >> 4;
        let value = (lines | delta) & mask;
        slot.modemstate_sent = true;
        slot.last_modemstate_sent = lines;
        slot.queue_comport(ComPortCommand::NotifyModemState(value));
        self.write_slot(i);
    }

    /// Record a new line state and notify the slots whose subscribed bits changed
    pub(crate) fn update_linestate(&mut self, state: u8) {
        self.last_linestate = Some(state);
        for i in 0..self.slots.len() {
            let slot = &mut self.slots[i];
            if !slot.is_active() || !slot.rfc2217 || slot.linestate_mask == 0 {
                continue;
            }
            let mask = slot.linestate_mask;
            if slot.linestate_sent && (state & mask) == (slot.last_linestate_sent & mask) {
                continue;
            }
            slot.linestate_sent = true;
            slot.last_linestate_sent = state;
            slot.queue_comport(ComPortCommand::NotifyLineState(state & mask));
            self.write_slot(i);
        }
    }
}
