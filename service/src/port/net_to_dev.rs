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

//! Network to device transfer

use super::Port;
use crate::trace::TraceDirection;
use crate::transfer::TransferEvent;
use crate::types::{CloseReason, Direction, TransferState};
use bytes::BytesMut;
use serbridge_telnetcodec::{TelnetEvent, TelnetOption, TelnetSide};
use std::io;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

impl Port {
    pub(crate) fn handle_net_readable(&mut self, i: usize) {
        let capacity = self.net_to_dev_buf.room();
        let Some(endpoint) = self.slots[i].endpoint.as_mut() else {
            return;
        };
        if capacity == 0 {
            return;
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(capacity, 0);
        let result = endpoint.try_read(&mut scratch[..capacity]);
        match result {
            Ok(0) => {
                debug!(port = %self.config.name, slot = i, "connection closed by peer");
                self.close_slot(i, CloseReason::PeerClosed);
            }
            Ok(n) => self.on_net_data(i, &scratch[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                self.services.metrics.connection_error(&self.config.name);
                self.close_slot(i, CloseReason::NetError(e.to_string()));
            }
        }
        self.scratch = scratch;
    }

    fn on_net_data(&mut self, i: usize, data: &[u8]) {
        self.slots[i].note_received(data.len());
        self.services.metrics.net_read(&self.config.name, data.len());
        trace!(port = %self.config.name, slot = i, len = data.len(), "network data");

        if self.slots[i].codec.is_some() {
            self.decode_net_data(i, data);
        } else {
            self.forward_net_data(data);
        }
        if !self.slots[i].is_live() {
            return;
        }
        self.slots[i].collect_responses();
        if !self.net_to_dev_buf.is_drained() {
            self.write_to_device();
        }
        self.write_slot(i);
    }

    fn decode_net_data(&mut self, i: usize, data: &[u8]) {
        let mut src = BytesMut::from(data);
        loop {
            let decoded = match self.slots[i].codec.as_mut() {
                Some(codec) => codec.decode(&mut src),
                None => return,
            };
            match decoded {
                Ok(Some(event)) => self.on_telnet_event(i, event),
                Ok(None) => return,
                Err(e) => {
                    warn!(port = %self.config.name, slot = i, error = %e, "telnet protocol error");
                    self.close_slot(i, CloseReason::ProtocolError(e.to_string()));
                    return;
                }
            }
            if !self.slots[i].is_live() {
                return;
            }
        }
    }

    fn on_telnet_event(&mut self, i: usize, event: TelnetEvent) {
        match event {
            TelnetEvent::Data(bytes) => self.forward_net_data(&bytes),
            TelnetEvent::Break => self.send_device_break(),
            TelnetEvent::DataMark if self.config.telnet_brk_on_sync => self.send_device_break(),
            TelnetEvent::ComPort(command) => {
                if self.config.allow_2217 {
                    self.handle_rfc2217(i, command);
                }
            }
            TelnetEvent::OptionStatus(TelnetOption::ComPort, TelnetSide::Remote, enabled) => {
                let enabled = enabled && self.config.allow_2217;
                debug!(port = %self.config.name, slot = i, enabled, "COM-PORT-OPTION negotiated");
                self.slots[i].rfc2217 = enabled;
            }
            other => trace!(port = %self.config.name, slot = i, event = ?other, "telnet event ignored"),
        }
    }

    fn forward_net_data(&mut self, data: &[u8]) {
        if self.config.no_net_to_dev || data.is_empty() {
            return;
        }
        self.monitor.tap(Direction::NetToDev, data);
        let taken = self.net_to_dev_buf.append(data);
        if taken < data.len() {
            warn!(port = %self.config.name, dropped = data.len() - taken, "device buffer overflow");
        }
    }

    pub(crate) fn send_device_break(&mut self) {
        if let Some(device) = self.device.as_mut() {
            if let Err(e) = device.send_break() {
                warn!(port = %self.config.name, error = %e, "unable to send break");
            }
        }
    }

    /// Push the device buffer out; a short write pauses network reads
    pub(crate) fn write_to_device(&mut self) {
        let mut failure = None;
        if let Some(device) = self.device.as_mut() {
            while !self.net_to_dev_buf.is_drained() {
                match device.try_write(self.net_to_dev_buf.unsent()) {
                    Ok(0) => break,
                    Ok(n) => {
                        self.traces
                            .record(TraceDirection::Write, &self.net_to_dev_buf.unsent()[..n]);
                        self.net_to_dev_buf.advance(n);
                        self.dev_bytes_sent += n as u64;
                        self.services.metrics.dev_written(&self.config.name, n);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        if let Some(e) = failure {
            self.device_failed(format!("device write error: {}", e));
            return;
        }

        if self.net_to_dev_buf.is_drained() {
            self.net_to_dev_buf.reset();
            if self.closing_device {
                self.finish_port_close();
            } else if self.net_to_dev.state() == TransferState::WaitingOutputClear {
                self.net_to_dev.handle(TransferEvent::OutputCleared);
            }
        } else if self.net_to_dev.state() == TransferState::WaitingInput {
            self.net_to_dev.handle(TransferEvent::OutputBlocked);
        }
    }
}
