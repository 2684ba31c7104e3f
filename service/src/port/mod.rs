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

//! The port state machine
//!
//! A [`Port`] owns one device, one accepter and a fixed array of network
//! slots. It does no I/O on its own: [`Port::poll_event`] reports the next
//! thing that became ready and [`Port::handle_event`] reacts to it. The
//! worker task alternates the two, so every transition of a port runs
//! serially and needs no locking.
//!
//! The two transfer directions each have their own [`TransferFsm`] and
//! buffer and are serviced independently.

mod admission;
mod dev_to_net;
mod lifecycle;
mod net_to_dev;
mod rfc2217;

#[cfg(test)]
mod tests;

pub use self::lifecycle::PendingOp;

use crate::buffer::ByteBuffer;
use crate::config::{PortConfig, SerialParams};
use crate::endpoint::{Accepter, Candidate, DeviceEndpoint};
use crate::monitor::Monitor;
use crate::services::PortServices;
use crate::slot::NetSlot;
use crate::timer::{TimerKind, TimerService};
use crate::trace::TraceSet;
use crate::tracker::OpTracker;
use crate::transfer::TransferFsm;
use crate::types::{Direction, PortStats, TransferState};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::io;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

/// Something that became ready on a port
#[derive(Debug)]
pub enum PortEvent {
    /// A port timer expired
    Timer(TimerKind),
    /// The accepter produced a connection
    Accepted(Candidate),
    /// The accepter reported an error
    AcceptFailed(io::Error),
    /// The authentication gate decided on a candidate
    Authorized {
        /// The candidate
        candidate: Candidate,
        /// Whether the gate let it through
        allowed: bool,
    },
    /// A connect-back dial finished
    ConnectBack {
        /// Reserved slot the dial was for
        slot: usize,
        /// The dialed connection
        result: io::Result<Candidate>,
    },
    /// The device may have data
    DevReadable,
    /// The device may take data
    DevWritable,
    /// The device readiness check failed
    DevError(io::Error),
    /// A slot's connection may have data
    NetReadable(usize),
    /// A slot's connection may take data
    NetWritable(usize),
    /// A slot's readiness check failed
    NetError(usize, io::Error),
}

#[derive(Debug)]
pub(crate) struct ShutdownState {
    pub(crate) reason: String,
    pub(crate) then: PendingOp,
    pub(crate) countdown: u32,
}

type AuthCheck = JoinHandle<(Candidate, bool)>;
type Dial = JoinHandle<(usize, io::Result<Candidate>)>;

/// One bridge between a device and its network clients
pub struct Port {
    pub(crate) config: PortConfig,
    pub(crate) services: PortServices,
    pub(crate) enabled: bool,
    pub(crate) deleted: bool,

    pub(crate) dev_to_net: TransferFsm,
    pub(crate) net_to_dev: TransferFsm,
    pub(crate) dev_to_net_buf: ByteBuffer,
    pub(crate) net_to_dev_buf: ByteBuffer,
    /// Length of the device buffer released to the slots
    pub(crate) sendable: usize,
    pub(crate) scratch: Vec<u8>,

    pub(crate) device: Option<Box<dyn DeviceEndpoint>>,
    pub(crate) accepter: Option<Box<dyn Accepter>>,
    pub(crate) accepter_addr: Option<String>,
    pub(crate) slots: Vec<NetSlot>,

    pub(crate) timers: TimerService,
    pub(crate) traces: TraceSet,
    pub(crate) monitor: Monitor,
    pub(crate) tracker: OpTracker,
    pub(crate) auth_checks: FuturesUnordered<AuthCheck>,
    pub(crate) dials: FuturesUnordered<Dial>,

    pub(crate) serial: SerialParams,
    pub(crate) chardelay_window: Duration,
    pub(crate) send_time: Option<Instant>,
    pub(crate) closeon_pos: usize,
    pub(crate) sendon_pos: usize,
    pub(crate) close_on_output_done: bool,

    pub(crate) nocon_read_enable_time_left: u32,
    pub(crate) retry_time_left: u32,
    pub(crate) retry_startup_counter: u64,
    pub(crate) shutdown: Option<ShutdownState>,
    pub(crate) released: bool,
    pub(crate) last_shutdown_reason: Option<String>,
    pub(crate) new_config: Option<PortConfig>,
    pub(crate) closing_device: bool,
    pub(crate) device_close_countdown: u32,

    pub(crate) last_modemstate: Option<u8>,
    pub(crate) last_linestate: Option<u8>,
    pub(crate) dev_bytes_received: u64,
    pub(crate) dev_bytes_sent: u64,

    poll_cursor: usize,
}

impl Port {
    /// Build a port from a validated configuration. Nothing is opened until
    /// [`Port::startup`].
    pub fn new(config: PortConfig, services: PortServices, tracker: OpTracker) -> Self {
        let mut port = Self {
            enabled: config.enabled,
            deleted: false,
            dev_to_net: TransferFsm::new(Direction::DevToNet),
            net_to_dev: TransferFsm::new(Direction::NetToDev),
            dev_to_net_buf: ByteBuffer::new(config.buffer_size),
            net_to_dev_buf: ByteBuffer::new(config.buffer_size),
            sendable: 0,
            scratch: Vec::with_capacity(config.buffer_size),
            device: None,
            accepter: None,
            accepter_addr: None,
            slots: Vec::new(),
            timers: TimerService::new(),
            traces: TraceSet::empty(),
            monitor: Monitor::new(),
            tracker,
            auth_checks: FuturesUnordered::new(),
            dials: FuturesUnordered::new(),
            serial: config.serial,
            chardelay_window: config.chardelay.window(&config.serial),
            send_time: None,
            closeon_pos: 0,
            sendon_pos: 0,
            close_on_output_done: false,
            nocon_read_enable_time_left: 0,
            retry_time_left: 0,
            retry_startup_counter: 0,
            shutdown: None,
            released: false,
            last_shutdown_reason: None,
            new_config: None,
            closing_device: false,
            device_close_countdown: 0,
            last_modemstate: None,
            last_linestate: None,
            dev_bytes_received: 0,
            dev_bytes_sent: 0,
            poll_cursor: 0,
            config,
            services,
        };
        port.build_slots();
        port
    }

    /// Lay out the slot array: connect-back slots first, then free slots
    pub(crate) fn build_slots(&mut self) {
        let reserved = self.config.connect_back.clone();
        self.slots = (0..self.config.max_connections)
            .map(|i| NetSlot::new(i, reserved.get(i).cloned()))
            .collect();
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration in effect
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Device to network state
    pub fn dev_to_net_state(&self) -> TransferState {
        self.dev_to_net.state()
    }

    /// Network to device state
    pub fn net_to_dev_state(&self) -> TransferState {
        self.net_to_dev.state()
    }

    /// Whether a shutdown is in progress
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Whether the port was deleted and has finished shutting down
    pub fn is_released(&self) -> bool {
        self.deleted && self.released
    }

    /// Attach a live observer to one direction
    pub fn attach_monitor(&mut self, direction: Direction, tx: tokio::sync::mpsc::Sender<bytes::Bytes>) {
        self.monitor.attach(direction, tx);
    }

    /// Live slots
    pub(crate) fn live_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_live()).count()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> PortStats {
        PortStats {
            name: self.config.name.clone(),
            accepter: self.config.accepter.clone(),
            accepter_addr: self.accepter_addr.clone(),
            device: self.config.device.clone(),
            enabled: self.enabled,
            deleted: self.deleted,
            dev_to_net_state: self.dev_to_net.state(),
            net_to_dev_state: self.net_to_dev.state(),
            device_open: self.device.is_some(),
            dev_bytes_received: self.dev_bytes_received,
            dev_bytes_sent: self.dev_bytes_sent,
            retry_startup_counter: self.retry_startup_counter,
            shutdown_reason: self
                .shutdown
                .as_ref()
                .map(|s| s.reason.clone())
                .or_else(|| self.last_shutdown_reason.clone()),
            new_config_pending: self.new_config.is_some(),
            slots: self
                .slots
                .iter()
                .filter(|s| s.is_live())
                .map(NetSlot::stats)
                .collect(),
        }
    }

    fn dev_read_room(&self) -> usize {
        let room = self.dev_to_net_buf.room();
        if self.config.telnet { room / 2 } else { room }
    }

    fn dev_read_armed(&self) -> bool {
        self.device.is_some()
            && self.shutdown.is_none()
            && !self.closing_device
            && matches!(
                self.dev_to_net.state(),
                TransferState::WaitingInput | TransferState::Unconnected
            )
            && self.dev_read_room() > 0
            && self.dials.is_empty()
            && self.nocon_read_enable_time_left == 0
    }

    fn dev_write_armed(&self) -> bool {
        self.device.is_some() && !self.net_to_dev_buf.is_drained()
    }

    fn net_read_armed(&self, i: usize) -> bool {
        self.slots[i].is_active()
            && !self.closing_device
            && self.net_to_dev.state() == TransferState::WaitingInput
            && self.net_to_dev_buf.is_drained()
    }

    fn net_write_armed(&self, i: usize) -> bool {
        self.slots[i].is_live() && self.slots[i].has_pending_output(self.sendable)
    }

    /// Wait for the next event.
    ///
    /// Timers come first, then finished authentication checks and dials,
    /// then the accepter, then endpoint readiness. Endpoints are polled
    /// round-robin starting after the last one served, so a device that is
    /// always readable cannot starve the slots.
    pub fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<PortEvent> {
        if let Poll::Ready(kind) = self.timers.poll_expired(cx) {
            return Poll::Ready(PortEvent::Timer(kind));
        }

        while let Poll::Ready(Some(result)) = self.auth_checks.poll_next_unpin(cx) {
            match result {
                Ok((candidate, allowed)) => {
                    return Poll::Ready(PortEvent::Authorized { candidate, allowed });
                }
                Err(err) => warn!(port = %self.config.name, error = %err, "authentication task failed"),
            }
        }

        while let Poll::Ready(Some(result)) = self.dials.poll_next_unpin(cx) {
            match result {
                Ok((slot, result)) => return Poll::Ready(PortEvent::ConnectBack { slot, result }),
                Err(err) => warn!(port = %self.config.name, error = %err, "connect-back task failed"),
            }
        }

        if let Some(accepter) = self.accepter.as_mut() {
            match accepter.poll_accept(cx) {
                Poll::Ready(Ok(candidate)) => return Poll::Ready(PortEvent::Accepted(candidate)),
                Poll::Ready(Err(err)) => return Poll::Ready(PortEvent::AcceptFailed(err)),
                Poll::Pending => {}
            }
        }

        let sources = 2 + 2 * self.slots.len();
        for step in 0..sources {
            let source = (self.poll_cursor + step) % sources;
            if let Poll::Ready(event) = self.poll_source(source, cx) {
                self.poll_cursor = source + 1;
                return Poll::Ready(event);
            }
        }
        Poll::Pending
    }

    fn poll_source(&mut self, source: usize, cx: &mut Context<'_>) -> Poll<PortEvent> {
        match source {
            0 if self.dev_read_armed() => match self.device.as_mut() {
                Some(device) => device.poll_read_ready(cx).map(|r| match r {
                    Ok(()) => PortEvent::DevReadable,
                    Err(err) => PortEvent::DevError(err),
                }),
                None => Poll::Pending,
            },
            1 if self.dev_write_armed() => match self.device.as_mut() {
                Some(device) => device.poll_write_ready(cx).map(|r| match r {
                    Ok(()) => PortEvent::DevWritable,
                    Err(err) => PortEvent::DevError(err),
                }),
                None => Poll::Pending,
            },
            n if n >= 2 => {
                let i = (n - 2) / 2;
                let read = n % 2 == 0;
                let armed = if read {
                    self.net_read_armed(i)
                } else {
                    self.net_write_armed(i)
                };
                if !armed {
                    return Poll::Pending;
                }
                let Some(endpoint) = self.slots[i].endpoint.as_mut() else {
                    return Poll::Pending;
                };
                let ready = if read {
                    endpoint.poll_read_ready(cx)
                } else {
                    endpoint.poll_write_ready(cx)
                };
                ready.map(|r| match (r, read) {
                    (Ok(()), true) => PortEvent::NetReadable(i),
                    (Ok(()), false) => PortEvent::NetWritable(i),
                    (Err(err), _) => PortEvent::NetError(i, err),
                })
            }
            _ => Poll::Pending,
        }
    }

    /// React to an event from [`Port::poll_event`]
    pub fn handle_event(&mut self, event: PortEvent) {
        match event {
            PortEvent::Timer(TimerKind::Tick) => self.on_tick(),
            PortEvent::Timer(TimerKind::CharDelay) => self.flush_dev_to_net(),
            PortEvent::Accepted(candidate) => self.on_accepted(candidate),
            PortEvent::AcceptFailed(err) => {
                warn!(port = %self.config.name, error = %err, "accept failed");
            }
            PortEvent::Authorized { candidate, allowed } => self.on_authorized(candidate, allowed),
            PortEvent::ConnectBack { slot, result } => self.on_connect_back(slot, result),
            PortEvent::DevReadable => self.handle_dev_readable(),
            PortEvent::DevWritable => self.write_to_device(),
            PortEvent::DevError(err) => self.device_failed(format!("device error: {}", err)),
            PortEvent::NetReadable(i) => self.handle_net_readable(i),
            PortEvent::NetWritable(i) => self.write_slot(i),
            PortEvent::NetError(i, err) => {
                self.close_slot(i, crate::types::CloseReason::NetError(err.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.config.name)
            .field("dev_to_net", &self.dev_to_net.state())
            .field("net_to_dev", &self.net_to_dev.state())
            .field("device_open", &self.device.is_some())
            .field("slots", &self.live_slots())
            .finish_non_exhaustive()
    }
}
