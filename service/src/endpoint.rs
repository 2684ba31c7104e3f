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

//! Transport seams of the port engine
//!
//! The engine never touches sockets or ttys directly. It drives these traits
//! in the readiness style of tokio's `try_read`/`poll_read_ready` pairs: poll
//! until ready, then try the operation, and treat `WouldBlock` as "not yet".

use crate::config::{Parity, PortConfig, SerialParams};
use futures::future::BoxFuture;
use serbridge_telnetcodec::control;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};

/// A non-blocking byte stream: the device or one network connection
pub trait Endpoint: Send + fmt::Debug {
    /// Read into `buf`. `Ok(0)` is end of stream, `WouldBlock` means no data yet.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf`, returning how much was accepted. `WouldBlock` means nothing was.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Wait until a read may make progress
    fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Wait until a write may make progress
    fn poll_write_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Release the underlying handle. Further operations fail.
    fn close(&mut self);

    /// Bytes accepted by `try_write` but still queued in the OS, when the
    /// transport can tell
    fn send_queue_len(&self) -> Option<usize> {
        None
    }
}

/// A serial line setting request; a zero argument queries the current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerialRequest {
    /// Bits per second
    Baud(u32),
    /// Data bits
    DataSize(u8),
    /// RFC 2217 parity code
    Parity(u8),
    /// RFC 2217 stop size code
    StopSize(u8),
    /// RFC 2217 SET-CONTROL value
    Control(u8),
}

/// The local character device of a port
pub trait DeviceEndpoint: Endpoint {
    /// Send a break condition
    fn send_break(&mut self) -> io::Result<()>;

    /// Apply or query a line setting; returns the value now in effect
    fn serial_control(&mut self, request: SerialRequest) -> io::Result<u32>;

    /// Current modem state in RFC 2217 bit layout, `None` if unknown
    fn modem_state(&mut self) -> io::Result<Option<u8>>;

    /// Current line state in RFC 2217 bit layout, `None` if unknown
    fn line_state(&mut self) -> io::Result<Option<u8>> {
        Ok(None)
    }

    /// Discard queued data, `which` is an RFC 2217 PURGE-DATA selector
    fn purge(&mut self, which: u8) -> io::Result<()> {
        let _ = which;
        Ok(())
    }
}

/// A network connection waiting to be admitted
#[derive(Debug)]
pub struct Candidate {
    /// The connection
    pub endpoint: Box<dyn Endpoint>,
    /// Parsed remote address, when the transport has one
    pub remote_addr: Option<SocketAddr>,
    /// Printable remote address
    pub remote: String,
}

impl Candidate {
    /// Wrap an endpoint
    pub fn new(endpoint: Box<dyn Endpoint>, remote_addr: Option<SocketAddr>) -> Self {
        let remote = remote_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            endpoint,
            remote_addr,
            remote,
        }
    }

    /// Identity handed to the authentication gate
    pub fn info(&self, port: &str) -> CandidateInfo {
        CandidateInfo {
            port: port.to_string(),
            remote_addr: self.remote_addr,
            remote: self.remote.clone(),
        }
    }
}

/// Identity of a candidate connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateInfo {
    /// Port the candidate wants
    pub port: String,
    /// Parsed remote address
    pub remote_addr: Option<SocketAddr>,
    /// Printable remote address
    pub remote: String,
}

/// A source of inbound connections
pub trait Accepter: Send + fmt::Debug {
    /// Wait for the next connection
    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Candidate>>;

    /// Address actually bound
    fn local_addr(&self) -> Option<String>;
}

/// Factory for the concrete endpoints of a port
pub trait Transport: Send + Sync + 'static {
    /// Open the device named by `config.device`
    fn open_device(&self, config: &PortConfig) -> io::Result<Box<dyn DeviceEndpoint>>;

    /// Start listening on an accepter string
    fn bind(&self, accepter: &str) -> io::Result<Box<dyn Accepter>>;

    /// Dial a connect-back target
    fn connect(&self, target: &str) -> BoxFuture<'static, io::Result<Candidate>>;
}

/// Line settings kept in memory for devices without real serial hardware.
///
/// Answers [`SerialRequest`]s the way a tty would, so sockets and test
/// doubles can sit behind RFC 2217 clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialShadow {
    /// Current line parameters
    pub params: SerialParams,
    /// Current flow control setting
    pub flow: u8,
    /// Break asserted
    pub break_on: bool,
    /// DTR asserted
    pub dtr: bool,
    /// RTS asserted
    pub rts: bool,
}

impl SerialShadow {
    /// Shadow starting at `params`
    pub fn new(params: SerialParams) -> Self {
        Self {
            params,
            flow: control::FLOW_NONE,
            break_on: false,
            dtr: true,
            rts: true,
        }
    }

    /// Apply a request and return the resulting value
    pub fn apply(&mut self, request: SerialRequest) -> u32 {
        match request {
            SerialRequest::Baud(0) => {}
            SerialRequest::Baud(baud) => self.params.baud = baud,
            SerialRequest::DataSize(bits @ 5..=8) => self.params.data_bits = bits,
            SerialRequest::DataSize(_) => {}
            SerialRequest::Parity(code) => {
                if let Some(parity) = Parity::from_rfc2217(code) {
                    self.params.parity = parity;
                }
            }
            SerialRequest::StopSize(code @ 1..=2) => self.params.stop_bits = code,
            // One and a half stop bits runs as two.
            SerialRequest::StopSize(3) => self.params.stop_bits = 2,
            SerialRequest::StopSize(_) => {}
            SerialRequest::Control(value) => return u32::from(self.apply_control(value)),
        }
        match request {
            SerialRequest::Baud(_) => self.params.baud,
            SerialRequest::DataSize(_) => u32::from(self.params.data_bits),
            SerialRequest::Parity(_) => u32::from(self.params.parity.to_rfc2217()),
            SerialRequest::StopSize(_) => u32::from(self.params.stop_bits),
            SerialRequest::Control(_) => 0,
        }
    }

    fn apply_control(&mut self, value: u8) -> u8 {
        let on_off = |on: bool, yes: u8, no: u8| if on { yes } else { no };
        match value {
            control::FLOW_REQUEST => self.flow,
            control::FLOW_NONE | control::FLOW_XONXOFF | control::FLOW_HARDWARE => {
                self.flow = value;
                value
            }
            control::BREAK_REQUEST => on_off(self.break_on, control::BREAK_ON, control::BREAK_OFF),
            control::BREAK_ON | control::BREAK_OFF => {
                self.break_on = value == control::BREAK_ON;
                value
            }
            control::DTR_REQUEST => on_off(self.dtr, control::DTR_ON, control::DTR_OFF),
            control::DTR_ON | control::DTR_OFF => {
                self.dtr = value == control::DTR_ON;
                value
            }
            control::RTS_REQUEST => on_off(self.rts, control::RTS_ON, control::RTS_OFF),
            control::RTS_ON | control::RTS_OFF => {
                self.rts = value == control::RTS_ON;
                value
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_baud_set_and_query() {
        let mut shadow = SerialShadow::new(SerialParams::default());
        assert_eq!(shadow.apply(SerialRequest::Baud(0)), 9600);
        assert_eq!(shadow.apply(SerialRequest::Baud(115_200)), 115_200);
        assert_eq!(shadow.params.baud, 115_200);
    }

    #[test]
    fn test_shadow_ignores_bad_values() {
        let mut shadow = SerialShadow::new(SerialParams::default());
        assert_eq!(shadow.apply(SerialRequest::DataSize(9)), 8);
        assert_eq!(shadow.apply(SerialRequest::Parity(9)), 1);
        assert_eq!(shadow.apply(SerialRequest::Parity(3)), 3);
        assert_eq!(shadow.params.parity, Parity::Even);
        assert_eq!(shadow.apply(SerialRequest::StopSize(3)), 2);
    }

    #[test]
    fn test_shadow_control_queries() {
        let mut shadow = SerialShadow::new(SerialParams::default());
        assert_eq!(
            shadow.apply(SerialRequest::Control(control::DTR_REQUEST)),
            u32::from(control::DTR_ON)
        );
        shadow.apply(SerialRequest::Control(control::DTR_OFF));
        assert_eq!(
            shadow.apply(SerialRequest::Control(control::DTR_REQUEST)),
            u32::from(control::DTR_OFF)
        );
        assert_eq!(
            shadow.apply(SerialRequest::Control(control::FLOW_HARDWARE)),
            u32::from(control::FLOW_HARDWARE)
        );
        assert_eq!(
            shadow.apply(SerialRequest::Control(control::FLOW_REQUEST)),
            u32::from(control::FLOW_HARDWARE)
        );
    }
}
