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

//! Admission of network clients and the life of a slot
//!
//! Accepted connections pass the authentication gate on their own task,
//! then [`Port::admit`] picks a slot: the matching reserved slot, a free
//! slot, or (with kick-old-user) the oldest client's slot once that client
//! has been told to leave.

use super::Port;
use crate::config::RemoteAddrRule;
use crate::endpoint::{Candidate, Endpoint};
use crate::error::Rejected;
use crate::render::RenderContext;
use crate::slot::SlotRef;
use crate::tracker::OpToken;
use crate::transfer::TransferEvent;
use crate::types::{CloseReason, PortNotice};
use bytes::BytesMut;
use serbridge_telnetcodec::{
    Role, TelnetCodec, TelnetOption, TelnetOptions, TelnetSide, escape_iac,
};
use std::future::poll_fn;
use std::io;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

const KICK_NOTICE: &[u8] = b"kicked off, new user is coming\r\n";

/// How long a rejected connection may take to accept its notice
const NOTICE_TIMEOUT: Duration = Duration::from_secs(2);

/// Finish writing a rejection notice once the connection is writable, then
/// close it
async fn finish_notice(mut endpoint: Box<dyn Endpoint>, mut rest: &'static [u8], _token: OpToken) {
    let result = tokio::time::timeout(NOTICE_TIMEOUT, async {
        while !rest.is_empty() {
            poll_fn(|cx| endpoint.poll_write_ready(cx)).await?;
            match endpoint.try_write(rest) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        Ok::<(), io::Error>(())
    })
    .await;
    match result {
        Ok(Ok(())) => trace!("rejection notice sent"),
        Ok(Err(e)) => debug!(error = %e, "unable to send rejection notice"),
        Err(_) => debug!("rejection notice timed out"),
    }
    endpoint.close();
}

impl Port {
    pub(crate) fn on_accepted(&mut self, candidate: Candidate) {
        if !self.enabled || self.shutdown.is_some() {
            let _ = self.reject(candidate, Rejected::PortDisabled);
            return;
        }
        let info = candidate.info(&self.config.name);
        let auth = self.services.auth.clone();
        let token = self.tracker.token();
        debug!(port = %self.config.name, remote = %info.remote, "checking candidate");
        self.auth_checks.push(tokio::spawn(async move {
            let _token = token;
            let allowed = auth.authorize(&info).await;
            (candidate, allowed)
        }));
    }

    pub(crate) fn on_authorized(&mut self, candidate: Candidate, allowed: bool) {
        if !allowed {
            let remote = candidate.remote.clone();
            let _ = self.reject(candidate, Rejected::AuthDenied(remote));
            return;
        }
        let _ = self.admit(candidate);
    }

    /// Place an authorized candidate into a slot or turn it away
    #[instrument(skip(self, candidate), fields(port = %self.config.name, remote = %candidate.remote))]
    pub fn admit(&mut self, candidate: Candidate) -> Result<SlotRef, Rejected> {
        if !self.enabled || self.shutdown.is_some() {
            return self.reject(candidate, Rejected::PortDisabled);
        }
        if self.closing_device {
            return self.reject(
                candidate,
                Rejected::DeviceUnavailable("device is closing".to_string()),
            );
        }
        if !self.address_allowed(&candidate) {
            let remote = candidate.remote.clone();
            return self.reject(candidate, Rejected::AddressNotAllowed(remote));
        }

        let reserved = candidate.remote_addr.and_then(|addr| {
            self.slots.iter().position(|s| {
                !s.is_live()
                    && !s.dialing
                    && s.connect_back.as_ref().is_some_and(|rule| rule.matches(&addr))
            })
        });
        if let Some(i) = reserved {
            return self.attach(i, candidate);
        }

        if let Some(i) = self
            .slots
            .iter()
            .position(|s| !s.remote_fixed && !s.is_live())
        {
            return self.attach(i, candidate);
        }

        if self.config.kick_old_user {
            let oldest = self
                .slots
                .iter()
                .filter(|s| !s.remote_fixed && s.is_live() && s.pending_replacement.is_none())
                .min_by_key(|s| s.connected_at)
                .map(|s| s.index);
            if let Some(i) = oldest {
                info!(slot = i, old = %self.slots[i].remote, "kicking old user");
                self.slots[i].pending_replacement = Some(candidate);
                self.slots[i].queue_control(KICK_NOTICE);
                self.close_slot(i, CloseReason::Kicked);
                return Ok(SlotRef::Replacing(i));
            }
        }

        self.reject(candidate, Rejected::NoFreeSlot)
    }

    fn address_allowed(&self, candidate: &Candidate) -> bool {
        if self.config.allowed.is_empty() {
            return true;
        }
        let Some(addr) = candidate.remote_addr else {
            return false;
        };
        self.config
            .allowed
            .iter()
            .chain(self.config.connect_back.iter())
            .any(|rule| rule.matches(&addr))
    }

    /// Bind `candidate` to slot `i`, opening the device for the first client
    pub(crate) fn attach(&mut self, i: usize, candidate: Candidate) -> Result<SlotRef, Rejected> {
        if self.device.is_none() {
            if let Err(e) = self.open_device() {
                warn!(port = %self.config.name, error = %e, "unable to open device");
                self.services.metrics.device_error(&self.config.name);
                return self.reject(candidate, Rejected::DeviceUnavailable(e.to_string()));
            }
        }

        let others_live = self
            .slots
            .iter()
            .any(|s| s.index != i && s.is_live());
        let timeout = if self.slots[i].remote_fixed && self.config.connback_timeout > 0 {
            self.config.connback_timeout
        } else {
            self.config.timeout
        };
        let codec = self.telnet_codec();
        let remote = candidate.remote.clone();
        let banner = self.render_banner(&remote);

        let slot = &mut self.slots[i];
        slot.attach(candidate, codec, timeout);
        slot.collect_responses();
        if let Some(banner) = banner {
            slot.set_banner(&banner);
        }
        slot.write_pos = if others_live { self.sendable } else { 0 };

        self.dev_to_net.handle(TransferEvent::Connected);
        self.net_to_dev.handle(TransferEvent::Connected);
        self.nocon_read_enable_time_left = 0;
        self.services.metrics.connection_opened(&self.config.name);
        self.services.notify(PortNotice::Connected {
            port: self.config.name.clone(),
            slot: i,
            remote: remote.clone(),
        });
        info!(port = %self.config.name, slot = i, %remote, "connection attached");

        self.write_slot(i);
        if self.dev_to_net_buf.len() > self.sendable {
            self.flush_dev_to_net();
        }
        Ok(SlotRef::Active(i))
    }

    fn telnet_codec(&self) -> Option<TelnetCodec> {
        if !self.config.telnet {
            return None;
        }
        let mut options = TelnetOptions::server();
        if !self.config.allow_2217 {
            options.set_supported(TelnetOption::ComPort, TelnetSide::Remote, false);
        }
        let mut codec = TelnetCodec::with_options(Role::Server, options);
        codec.enable_local(TelnetOption::SuppressGoAhead);
        codec.enable_local(TelnetOption::Echo);
        codec.enable_local(TelnetOption::TransmitBinary);
        codec.enable_remote(TelnetOption::TransmitBinary);
        if self.config.allow_2217 {
            codec.enable_remote(TelnetOption::ComPort);
        }
        Some(codec)
    }

    fn render_banner(&self, remote: &str) -> Option<BytesMut> {
        let template = self.config.banner.as_deref()?;
        let ctx = RenderContext {
            port: &self.config.name,
            device: &self.config.device,
            remote: Some(remote),
            serial: self.serial,
        };
        match self.services.renderer.render(template, &ctx) {
            Ok(text) => {
                let mut banner = BytesMut::with_capacity(text.len());
                if self.config.telnet {
                    escape_iac(&text, &mut banner);
                } else {
                    banner.extend_from_slice(&text);
                }
                Some(banner)
            }
            Err(e) => {
                warn!(port = %self.config.name, error = %e, "unable to render banner");
                None
            }
        }
    }

    /// Tell the candidate why it is refused and drop it
    ///
    /// A notice the connection cannot take at once is finished on its own
    /// task, bounded by a short timeout.
    pub(crate) fn reject(&mut self, candidate: Candidate, why: Rejected) -> Result<SlotRef, Rejected> {
        let Candidate {
            mut endpoint,
            remote,
            ..
        } = candidate;
        let notice = why.notice();
        let sent = match endpoint.try_write(notice) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                debug!(port = %self.config.name, error = %e, "unable to send rejection notice");
                notice.len()
            }
        };
        if sent < notice.len() {
            let token = self.tracker.token();
            tokio::spawn(finish_notice(endpoint, &notice[sent..], token));
        } else {
            endpoint.close();
        }
        self.services.metrics.connection_rejected(&self.config.name);
        self.services.notify(PortNotice::Rejected {
            port: self.config.name.clone(),
            remote: remote.clone(),
            reason: why.to_string(),
        });
        info!(port = %self.config.name, %remote, reason = %why, "connection rejected");
        Err(why)
    }

    /// Start closing slot `i`.
    ///
    /// Graceful reasons first drain what the client is owed, bounded by the
    /// shutdown timeout; everything else drops the connection at once.
    pub(crate) fn close_slot(&mut self, i: usize, reason: CloseReason) {
        let slot = &mut self.slots[i];
        if !slot.is_live() {
            return;
        }
        if slot.closing {
            if !reason.is_graceful() {
                self.finish_slot_close(i);
            }
            return;
        }
        debug!(port = %self.config.name, slot = i, %reason, "closing connection");
        slot.closing = true;
        let drain = reason.is_graceful() && slot.has_pending_output(self.sendable);
        slot.close_reason = Some(reason);
        if drain {
            slot.close_countdown = self.config.shutdown_timeout.max(1);
            self.write_slot(i);
        } else {
            self.finish_slot_close(i);
        }
    }

    /// Release slot `i` and report it
    pub(crate) fn drop_slot(&mut self, i: usize) {
        let remote = std::mem::take(&mut self.slots[i].remote);
        let (reason, lived) = self.slots[i].release();
        self.services.metrics.connection_closed(&self.config.name, lived);
        self.services.notify(PortNotice::Disconnected {
            port: self.config.name.clone(),
            slot: i,
            remote: remote.clone(),
            reason: reason.to_string(),
        });
        info!(port = %self.config.name, slot = i, %remote, %reason, lived = ?lived, "connection closed");
    }

    /// Release slot `i`, hand it to a waiting replacement and close the
    /// device side once the last client is gone
    pub(crate) fn finish_slot_close(&mut self, i: usize) {
        if !self.slots[i].is_live() {
            return;
        }
        self.drop_slot(i);

        if let Some(candidate) = self.slots[i].pending_replacement.take() {
            if self.enabled && self.shutdown.is_none() {
                let _ = self.attach(i, candidate);
                return;
            }
            let _ = self.reject(candidate, Rejected::PortDisabled);
        }

        if self.live_slots() > 0 {
            self.check_dev_to_net_drained();
            return;
        }
        self.last_slot_closed();
    }

    fn last_slot_closed(&mut self) {
        let closestr = match (&self.config.closestr, &self.device) {
            (Some(template), Some(_)) => {
                let ctx = RenderContext {
                    port: &self.config.name,
                    device: &self.config.device,
                    remote: None,
                    serial: self.serial,
                };
                match self.services.renderer.render(template, &ctx) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!(port = %self.config.name, error = %e, "unable to render close string");
                        None
                    }
                }
            }
            _ => None,
        };
        let Some(closestr) = closestr else {
            self.finish_port_close();
            return;
        };

        debug!(port = %self.config.name, "sending close string");
        self.net_to_dev_buf.reset();
        self.net_to_dev_buf.append(&closestr);
        self.dev_to_net.handle(TransferEvent::CloseBegin);
        self.net_to_dev.handle(TransferEvent::CloseBegin);
        self.closing_device = true;
        self.device_close_countdown = self.config.shutdown_timeout.max(1);
        self.write_to_device();
    }

    /// Dial every idle connect-back target
    pub(crate) fn start_connect_backs(&mut self) {
        if !self.enabled || self.shutdown.is_some() {
            return;
        }
        for i in 0..self.slots.len() {
            let slot = &self.slots[i];
            if slot.is_live() || slot.dialing {
                continue;
            }
            let Some(target) = slot.connect_back.as_ref().and_then(RemoteAddrRule::target) else {
                continue;
            };
            debug!(port = %self.config.name, slot = i, %target, "dialing connect-back target");
            self.slots[i].dialing = true;
            let connect = self.services.transport.connect(&target);
            let token = self.tracker.token();
            self.dials.push(tokio::spawn(async move {
                let _token = token;
                (i, connect.await)
            }));
        }
    }

    pub(crate) fn on_connect_back(&mut self, i: usize, result: io::Result<Candidate>) {
        self.slots[i].dialing = false;
        match result {
            Ok(mut candidate) => {
                if !self.enabled || self.shutdown.is_some() || self.slots[i].is_live() {
                    candidate.endpoint.close();
                    return;
                }
                let _ = self.attach(i, candidate);
            }
            Err(e) => {
                warn!(port = %self.config.name, slot = i, error = %e, "connect-back failed");
                self.services.metrics.connection_error(&self.config.name);
                if self.dials.is_empty() && self.live_slots() == 0 {
                    self.nocon_read_enable_time_left = self.config.connback_timeout.max(1);
                }
            }
        }
    }
}
