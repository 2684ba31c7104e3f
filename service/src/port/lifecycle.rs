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

//! Startup, retries, shutdown and reconfiguration of a port
//!
//! A shutdown closes every slot (gracefully, bounded by the shutdown
//! timeout), closes the device and then performs the pending operation:
//! restart, disable or release for deletion. Only one shutdown runs at a
//! time; asking again can only upgrade it to a deletion.

use super::{Port, ShutdownState};
use crate::buffer::ByteBuffer;
use crate::config::PortConfig;
use crate::render::RenderContext;
use crate::timer::{TICK, TimerKind};
use crate::trace::TraceSet;
use crate::transfer::TransferEvent;
use crate::types::{CloseReason, PortNotice, TransferState};
use std::io;
use tracing::{debug, info, instrument, warn};

/// What happens once a shutdown completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingOp {
    /// Start the port again
    Restart,
    /// Leave the port administratively disabled
    Disable,
    /// Release the port so its worker can exit
    Delete,
}

impl Port {
    /// Bring the port up: bind the accepter and, for connect-back ports,
    /// open the device. A failure schedules a retry.
    #[instrument(skip(self), fields(port = %self.config.name))]
    pub fn startup(&mut self) {
        self.retry_time_left = 0;
        if !self.enabled {
            self.accepter = None;
            self.accepter_addr = None;
            self.dev_to_net.handle(TransferEvent::Disable);
            self.net_to_dev.handle(TransferEvent::Disable);
            debug!("port is disabled");
            return;
        }

        if self.accepter.is_none() {
            match self.services.transport.bind(&self.config.accepter) {
                Ok(accepter) => {
                    self.accepter_addr = accepter.local_addr();
                    self.accepter = Some(accepter);
                }
                Err(e) => {
                    let reason = format!("unable to bind {}: {}", self.config.accepter, e);
                    self.start_failed(reason, self.config.accepter_retry_time);
                    return;
                }
            }
        }

        if !self.config.connect_back.is_empty() && self.device.is_none() {
            if let Err(e) = self.open_device() {
                self.accepter = None;
                self.accepter_addr = None;
                let reason = format!("unable to open device {}: {}", self.config.device, e);
                self.start_failed(reason, self.config.connector_retry_time);
                return;
            }
        }

        self.dev_to_net.handle(TransferEvent::Start);
        self.net_to_dev.handle(TransferEvent::Start);
        self.timers.start(TimerKind::Tick, TICK);
        self.services.notify(PortNotice::Started {
            port: self.config.name.clone(),
            accepter_addr: self.accepter_addr.clone(),
        });
        info!(accepter = ?self.accepter_addr, device = %self.config.device, "port started");
    }

    fn start_failed(&mut self, reason: String, retry: u32) {
        self.dev_to_net.handle(TransferEvent::Stop);
        self.net_to_dev.handle(TransferEvent::Stop);
        self.retry_startup_counter += 1;
        self.retry_time_left = retry.max(1);
        self.timers.start(TimerKind::Tick, TICK);
        self.services.metrics.start_failure(&self.config.name);
        self.services.notify(PortNotice::StartFailed {
            port: self.config.name.clone(),
            reason: reason.clone(),
            retries: self.retry_startup_counter,
        });
        warn!(%reason, retry_in = self.retry_time_left, attempts = self.retry_startup_counter, "port startup failed");
    }

    /// Open the device, its traces and queue the open string
    pub(crate) fn open_device(&mut self) -> io::Result<()> {
        let device = self.services.transport.open_device(&self.config)?;
        self.device = Some(device);
        self.traces = TraceSet::open(&self.config);
        self.traces.header(&self.config.name, &self.config.device);
        self.serial = self.config.serial;
        self.chardelay_window = self.config.chardelay.window(&self.serial);
        self.last_modemstate = None;
        self.last_linestate = None;
        self.closeon_pos = 0;
        self.sendon_pos = 0;
        self.net_to_dev_buf.reset();
        info!(port = %self.config.name, device = %self.config.device, serial = %self.serial, "device opened");

        if let Some(template) = &self.config.openstr {
            let ctx = RenderContext {
                port: &self.config.name,
                device: &self.config.device,
                remote: None,
                serial: self.serial,
            };
            match self.services.renderer.render(template, &ctx) {
                Ok(openstr) => {
                    self.net_to_dev_buf.append(&openstr);
                    self.write_to_device();
                }
                Err(e) => warn!(port = %self.config.name, error = %e, "unable to render open string"),
            }
        }
        Ok(())
    }

    /// Close the device and forget everything buffered for either side of it
    pub(crate) fn close_device(&mut self, reason: &str) {
        if let Some(mut device) = self.device.take() {
            device.close();
            info!(port = %self.config.name, device = %self.config.device, %reason, "device closed");
        }
        self.traces.close(reason);
        self.dev_to_net_buf.reset();
        self.net_to_dev_buf.reset();
        self.sendable = 0;
        for slot in &mut self.slots {
            slot.write_pos = 0;
        }
        self.timers.stop(TimerKind::CharDelay);
        self.send_time = None;
        self.close_on_output_done = false;
        self.closeon_pos = 0;
        self.sendon_pos = 0;
    }

    /// Close every connection and then perform `then`.
    ///
    /// Calling this while a shutdown is already running only upgrades it to
    /// [`PendingOp::Delete`]; anything else is ignored.
    #[instrument(skip(self), fields(port = %self.config.name))]
    pub fn shutdown_port(&mut self, reason: &str, then: PendingOp) {
        if let Some(state) = self.shutdown.as_mut() {
            if then == PendingOp::Delete && state.then != PendingOp::Delete {
                debug!(previous = ?state.then, "shutdown upgraded to delete");
                state.then = PendingOp::Delete;
            }
            return;
        }
        if then == PendingOp::Disable && self.dev_to_net.state() == TransferState::Closed {
            debug!("port already disabled");
            return;
        }
        info!(%reason, ?then, "shutting down port");
        self.shutdown = Some(ShutdownState {
            reason: reason.to_string(),
            then,
            countdown: self.config.shutdown_timeout.max(1),
        });
        self.accepter = None;
        self.accepter_addr = None;
        for dial in self.dials.iter() {
            dial.abort();
        }
        self.dials.clear();
        for slot in &mut self.slots {
            slot.dialing = false;
        }
        self.retry_time_left = 0;
        self.nocon_read_enable_time_left = 0;
        if !self.timers.is_running(TimerKind::Tick) {
            self.timers.start(TimerKind::Tick, TICK);
        }

        if self.live_slots() == 0 {
            if !self.closing_device {
                self.finish_port_close();
            }
            return;
        }
        if self.device.is_some() && self.dev_to_net_buf.len() > self.sendable {
            self.flush_dev_to_net();
        }
        for i in 0..self.slots.len() {
            if self.slots[i].is_live() {
                self.close_slot(i, CloseReason::Shutdown(reason.to_string()));
            }
        }
    }

    /// Everything network-side is gone; settle the device side
    pub(crate) fn finish_port_close(&mut self) {
        self.closing_device = false;
        self.device_close_countdown = 0;
        self.dev_to_net.handle(TransferEvent::Disconnected);
        self.net_to_dev.handle(TransferEvent::Disconnected);
        self.timers.stop(TimerKind::CharDelay);
        self.send_time = None;

        if self.config.connect_back.is_empty() || self.shutdown.is_some() {
            self.close_device("all connections closed");
        } else {
            // Connect-back ports keep the device open between sessions.
            self.check_dev_to_net_drained();
            self.net_to_dev_buf.reset();
        }

        if self.shutdown.is_some() {
            self.complete_shutdown();
        } else if self.new_config.is_some() {
            self.apply_new_config();
        }
    }

    fn complete_shutdown(&mut self) {
        let Some(state) = self.shutdown.take() else {
            return;
        };
        self.accepter = None;
        self.accepter_addr = None;
        self.close_device(&state.reason);
        self.last_shutdown_reason = Some(state.reason.clone());
        self.services.notify(PortNotice::ShutDown {
            port: self.config.name.clone(),
            reason: state.reason.clone(),
        });
        info!(port = %self.config.name, reason = %state.reason, then = ?state.then, "port shut down");

        match state.then {
            PendingOp::Restart => {
                self.dev_to_net.handle(TransferEvent::Stop);
                self.net_to_dev.handle(TransferEvent::Stop);
                if let Some(config) = self.new_config.take() {
                    self.apply_config(config);
                }
                self.startup();
            }
            PendingOp::Disable => {
                self.enabled = false;
                self.timers.stop_all();
                self.dev_to_net.handle(TransferEvent::Disable);
                self.net_to_dev.handle(TransferEvent::Disable);
            }
            PendingOp::Delete => {
                self.deleted = true;
                self.released = true;
                self.timers.stop_all();
                for check in self.auth_checks.iter() {
                    check.abort();
                }
                self.dev_to_net.handle(TransferEvent::Stop);
                self.net_to_dev.handle(TransferEvent::Stop);
            }
        }
    }

    /// The device failed; drop it and restart the port
    pub(crate) fn device_failed(&mut self, reason: String) {
        self.services.metrics.device_error(&self.config.name);
        warn!(port = %self.config.name, %reason, "device failure");
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        self.shutdown_port(&reason, PendingOp::Restart);
    }

    /// One-second housekeeping
    pub(crate) fn on_tick(&mut self) {
        if self.released {
            return;
        }
        self.timers.start(TimerKind::Tick, TICK);

        if self.retry_time_left > 0 {
            self.retry_time_left -= 1;
            if self.retry_time_left == 0
                && self.shutdown.is_none()
                && self.dev_to_net.state() == TransferState::NotStarted
            {
                debug!(port = %self.config.name, attempt = self.retry_startup_counter + 1, "retrying startup");
                self.startup();
            }
        }
        self.nocon_read_enable_time_left = self.nocon_read_enable_time_left.saturating_sub(1);

        if let Some(state) = self.shutdown.as_mut() {
            state.countdown = state.countdown.saturating_sub(1);
            if state.countdown == 0 {
                warn!(port = %self.config.name, "shutdown timed out, dropping remaining connections");
                self.force_release_slots();
                self.finish_port_close();
                return;
            }
        }

        if self.closing_device {
            self.device_close_countdown = self.device_close_countdown.saturating_sub(1);
            if self.device_close_countdown == 0 {
                warn!(port = %self.config.name, "close string not drained in time");
                self.finish_port_close();
            }
        }

        for i in 0..self.slots.len() {
            self.tick_slot(i);
        }

        self.poll_device_state();
    }

    fn tick_slot(&mut self, i: usize) {
        let slot = &mut self.slots[i];
        if !slot.is_live() {
            return;
        }
        if slot.closing {
            slot.close_countdown = slot.close_countdown.saturating_sub(1);
            if slot.close_countdown == 0 {
                debug!(port = %self.config.name, slot = i, "close drain timed out");
                self.finish_slot_close(i);
            }
            return;
        }

        let timeout = if slot.remote_fixed && self.config.connback_timeout > 0 {
            self.config.connback_timeout
        } else {
            self.config.timeout
        };
        if timeout == 0 {
            return;
        }
        let queued = self.config.timeout_on_os_queue
            && slot
                .endpoint
                .as_ref()
                .and_then(|e| e.send_queue_len())
                .is_some_and(|len| len > 0);
        if slot.take_activity() || queued {
            slot.timeout_left = timeout;
            return;
        }
        slot.timeout_left = slot.timeout_left.saturating_sub(1);
        if slot.timeout_left == 0 {
            info!(port = %self.config.name, slot = i, remote = %slot.remote, "inactivity timeout");
            self.services.metrics.inactivity_timeout(&self.config.name);
            self.close_slot(i, CloseReason::InactivityTimeout);
        }
    }

    fn force_release_slots(&mut self) {
        self.closing_device = false;
        for i in 0..self.slots.len() {
            if self.slots[i].is_live() {
                self.drop_slot(i);
            }
            if let Some(candidate) = self.slots[i].pending_replacement.take() {
                let _ = self.reject(candidate, crate::error::Rejected::PortDisabled);
            }
        }
    }

    /// Enable the port, or cancel a pending disable
    pub fn start(&mut self) {
        if let Some(state) = self.shutdown.as_mut() {
            if state.then == PendingOp::Disable {
                state.then = PendingOp::Restart;
                self.enabled = true;
            }
            return;
        }
        if !matches!(
            self.dev_to_net.state(),
            TransferState::NotStarted | TransferState::Closed
        ) {
            debug!(port = %self.config.name, "port already running");
            return;
        }
        if let Some(config) = self.new_config.take() {
            self.apply_config(config);
        }
        self.enabled = true;
        self.startup();
    }

    /// Replace the configuration, at once if the port is idle or as soon as
    /// its last connection leaves otherwise
    #[instrument(skip(self, config), fields(port = %self.config.name))]
    pub fn reconfigure(&mut self, config: PortConfig) {
        self.new_config = Some(config);
        if self.shutdown.is_none() && self.live_slots() == 0 && !self.closing_device {
            self.apply_new_config();
        } else {
            info!("configuration change deferred until the port is idle");
        }
    }

    fn apply_new_config(&mut self) {
        let Some(config) = self.new_config.take() else {
            return;
        };
        info!(port = %config.name, "applying new configuration");
        if config.accepter != self.config.accepter {
            self.accepter = None;
            self.accepter_addr = None;
        }
        self.close_device("reconfigured");
        self.apply_config(config);
        self.dev_to_net.handle(TransferEvent::Stop);
        self.net_to_dev.handle(TransferEvent::Stop);
        self.startup();
    }

    fn apply_config(&mut self, config: PortConfig) {
        self.enabled = config.enabled;
        self.dev_to_net_buf = ByteBuffer::new(config.buffer_size);
        self.net_to_dev_buf = ByteBuffer::new(config.buffer_size);
        self.sendable = 0;
        self.scratch = Vec::with_capacity(config.buffer_size);
        self.serial = config.serial;
        self.chardelay_window = config.chardelay.window(&config.serial);
        self.closeon_pos = 0;
        self.sendon_pos = 0;
        self.close_on_output_done = false;
        self.config = config;
        self.build_slots();
    }
}
