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

//! Port configuration types and builders
//!
//! # Example
//!
//! ```
//! use serbridge_service::{PortConfig, RemoteAddrRule};
//!
//! let config = PortConfig::new("console", "tcp,127.0.0.1:2000", "/dev/ttyS0")
//!     .with_max_connections(2)
//!     .with_timeout(300)
//!     .with_telnet(true)
//!     .with_allowed(vec![RemoteAddrRule::parse("127.0.0.1").unwrap()]);
//! assert!(config.validate().is_ok());
//! ```

use bytes::Bytes;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Parity setting of the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
    /// Parity bit always set
    Mark,
    /// Parity bit always clear
    Space,
}

impl Parity {
    /// RFC 2217 SET-PARITY value
    pub fn to_rfc2217(self) -> u8 {
        match self {
            Parity::None => 1,
            Parity::Odd => 2,
            Parity::Even => 3,
            Parity::Mark => 4,
            Parity::Space => 5,
        }
    }

    /// Parity for an RFC 2217 SET-PARITY value
    pub fn from_rfc2217(value: u8) -> Option<Parity> {
        match value {
            1 => Some(Parity::None),
            2 => Some(Parity::Odd),
            3 => Some(Parity::Even),
            4 => Some(Parity::Mark),
            5 => Some(Parity::Space),
            _ => None,
        }
    }

    fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }
}

/// Serial line parameters, also the source of the character time used by chardelay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerialParams {
    /// Bits per second
    pub baud: u32,
    /// Data bits per character (5..=8)
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl SerialParams {
    /// Bits on the wire per character, start bit included
    pub fn bits_per_char(&self) -> u32 {
        let parity = if self.parity == Parity::None { 0 } else { 1 };
        1 + u32::from(self.data_bits) + parity + u32::from(self.stop_bits)
    }

    /// Set the baud rate
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Set the data bits
    pub fn with_data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set the parity
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the stop bits
    pub fn with_stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Validate the parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.baud == 0 {
            return Err("baud must be greater than 0".to_string());
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(format!("data bits must be 5-8, got {}", self.data_bits));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(format!("stop bits must be 1 or 2, got {}", self.stop_bits));
        }
        Ok(())
    }
}

impl fmt::Display for SerialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.baud,
            self.parity.letter(),
            self.data_bits,
            self.stop_bits
        )
    }
}

/// Character-delay batching of device output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChardelayConfig {
    /// Whether device reads are held back to batch them
    pub enabled: bool,
    /// Hold window in tenths of a character time
    pub scale: u32,
    /// Lower bound of the hold window, microseconds
    pub min_us: u32,
    /// Longest a byte may be held, microseconds
    pub max_us: u32,
}

impl Default for ChardelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale: 20,
            min_us: 1_000,
            max_us: 20_000,
        }
    }
}

impl ChardelayConfig {
    /// Disabled chardelay
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Hold window after each read for the given line speed.
    ///
    /// `scale` tenths of a character time, never below `min_us`.
    pub fn window(&self, serial: &SerialParams) -> Duration {
        let bps = u64::from(serial.baud.max(1));
        let bpc = u64::from(serial.bits_per_char());
        let us = (bpc * 100_000 * u64::from(self.scale)) / bps;
        Duration::from_micros(us.max(u64::from(self.min_us)))
    }

    /// Upper bound on how long the first held byte may wait
    pub fn max_hold(&self) -> Duration {
        Duration::from_micros(u64::from(self.max_us))
    }
}

/// RS-485 half-duplex parameters handed to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rs485Config {
    /// Delay before send, milliseconds
    pub delay_rts_before_send: u32,
    /// Delay after send, milliseconds
    pub delay_rts_after_send: u32,
    /// RTS level while sending
    pub rts_on_send: bool,
    /// RTS level after sending
    pub rts_after_send: bool,
    /// Keep receiving while sending
    pub rx_during_tx: bool,
}

/// One trace destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceConfig {
    /// File the records are appended to
    pub path: PathBuf,
    /// Hexdump records instead of raw bytes
    pub hexdump: bool,
    /// Prefix each record with a timestamp
    pub timestamp: bool,
}

impl TraceConfig {
    /// Raw, untimestamped trace to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hexdump: false,
            timestamp: false,
        }
    }

    /// Enable or disable hexdump formatting
    pub fn with_hexdump(mut self, hexdump: bool) -> Self {
        self.hexdump = hexdump;
        self
    }

    /// Enable or disable timestamps
    pub fn with_timestamp(mut self, timestamp: bool) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// An address entry of the allow list or the connect-back list.
///
/// Written as `[!]host[:port]`; a leading `!` marks a connect-back target.
/// An empty host or `*` matches any address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteAddrRule {
    /// Host name or address
    pub host: String,
    /// Port, any when absent
    pub port: Option<u16>,
    /// Whether the port dials out to this address
    pub connect_back: bool,
}

impl RemoteAddrRule {
    /// Parse a rule
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let (connect_back, rest) = match text.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| format!("unterminated '[' in {:?}", text))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(port),
                None if tail.is_empty() => None,
                None => return Err(format!("unexpected {:?} after address", tail)),
            };
            (host, port)
        } else if rest.matches(':').count() == 1 {
            let (host, port) = rest.split_once(':').unwrap_or((rest, ""));
            (host, Some(port))
        } else {
            (rest, None)
        };
        let port = port
            .map(|p| p.parse::<u16>().map_err(|e| format!("bad port {:?}: {}", p, e)))
            .transpose()?;
        if connect_back && port.is_none() {
            return Err(format!("connect-back address {:?} needs a port", text));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            connect_back,
        })
    }

    /// Whether a remote address satisfies this rule
    pub fn matches(&self, addr: &SocketAddr) -> bool {
        if let Some(port) = self.port {
            if port != addr.port() {
                return false;
            }
        }
        match self.host.as_str() {
            "" | "*" => true,
            "localhost" => addr.ip().is_loopback(),
            host => host
                .parse::<IpAddr>()
                .map(|ip| ip == addr.ip())
                .unwrap_or(false),
        }
    }

    /// `host:port` string to dial for a connect-back rule
    pub fn target(&self) -> Option<String> {
        let port = self.port?;
        if self.host.contains(':') {
            Some(format!("[{}]:{}", self.host, port))
        } else {
            Some(format!("{}:{}", self.host, port))
        }
    }
}

impl fmt::Display for RemoteAddrRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.connect_back {
            write!(f, "!")?;
        }
        match (self.host.contains(':'), self.port) {
            (true, Some(port)) => write!(f, "[{}]:{}", self.host, port),
            (false, Some(port)) => write!(f, "{}:{}", self.host, port),
            (_, None) => write!(f, "{}", self.host),
        }
    }
}

/// Configuration of one bridge port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Port name, unique within the controller
    pub name: String,
    /// Accepter string, `[tcp,]host:port`
    pub accepter: String,
    /// Device string handed to the transport
    pub device: String,
    /// Administrative enable flag
    pub enabled: bool,
    /// Maximum concurrent network connections, connect-back slots included
    pub max_connections: usize,
    /// Inactivity timeout in seconds, 0 disables it
    pub timeout: u32,
    /// Count bytes still queued in the OS as activity
    pub timeout_on_os_queue: bool,
    /// Serial line parameters
    pub serial: SerialParams,
    /// Character-delay batching
    pub chardelay: ChardelayConfig,
    /// Discard device output instead of forwarding it
    pub no_dev_to_net: bool,
    /// Discard network input instead of forwarding it
    pub no_net_to_dev: bool,
    /// RS-485 parameters
    pub rs485: Option<Rs485Config>,
    /// Allowed remote addresses, empty allows all
    pub allowed: Vec<RemoteAddrRule>,
    /// Addresses dialed when the device produces data with nobody attached
    pub connect_back: Vec<RemoteAddrRule>,
    /// Seconds before retrying a failed device or connector startup
    pub connector_retry_time: u32,
    /// Seconds before retrying a failed accepter startup
    pub accepter_retry_time: u32,
    /// Inactivity timeout of connect-back sessions, and the pause after
    /// all connect-back dials failed, in seconds
    pub connback_timeout: u32,
    /// Seconds a graceful close may take before it is forced
    pub shutdown_timeout: u32,
    /// Replace the oldest connection when all slots are busy
    pub kick_old_user: bool,
    /// Speak Telnet on network connections
    pub telnet: bool,
    /// Accept RFC 2217 COM-PORT-OPTION from clients
    pub allow_2217: bool,
    /// Treat a Telnet sync (IAC DM) as a break request
    pub telnet_brk_on_sync: bool,
    /// Banner sent to each new connection
    pub banner: Option<String>,
    /// RFC 2217 signature
    pub signature: Option<String>,
    /// String written to the device when it is opened
    pub openstr: Option<String>,
    /// String written to the device before it is closed
    pub closestr: Option<String>,
    /// Device output sequence that closes all connections
    pub closeon: Option<Bytes>,
    /// Device output sequence that flushes held data at once
    pub sendon: Option<Bytes>,
    /// Trace of bytes read from the device
    pub trace_read: Option<TraceConfig>,
    /// Trace of bytes written to the device
    pub trace_write: Option<TraceConfig>,
    /// Trace of both directions
    pub trace_both: Option<TraceConfig>,
    /// Size of each transfer buffer
    pub buffer_size: usize,
}

impl PortConfig {
    /// Configuration with defaults for everything but identity
    pub fn new(
        name: impl Into<String>,
        accepter: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            accepter: accepter.into(),
            device: device.into(),
            enabled: true,
            max_connections: 1,
            timeout: 0,
            timeout_on_os_queue: false,
            serial: SerialParams::default(),
            chardelay: ChardelayConfig::default(),
            no_dev_to_net: false,
            no_net_to_dev: false,
            rs485: None,
            allowed: Vec::new(),
            connect_back: Vec::new(),
            connector_retry_time: 10,
            accepter_retry_time: 10,
            connback_timeout: 60,
            shutdown_timeout: 5,
            kick_old_user: false,
            telnet: false,
            allow_2217: true,
            telnet_brk_on_sync: false,
            banner: None,
            signature: None,
            openstr: None,
            closestr: None,
            closeon: None,
            sendon: None,
            trace_read: None,
            trace_write: None,
            trace_both: None,
            buffer_size: 4096,
        }
    }

    /// Enable or disable the port
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Listen on another accepter string, `[tcp,]host:port`
    pub fn with_accepter(mut self, accepter: impl Into<String>) -> Self {
        self.accepter = accepter.into();
        self
    }

    /// Set the maximum number of connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the inactivity timeout in seconds
    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = seconds;
        self
    }

    /// Count OS-queued output as activity
    pub fn with_timeout_on_os_queue(mut self, enabled: bool) -> Self {
        self.timeout_on_os_queue = enabled;
        self
    }

    /// Set the serial parameters
    pub fn with_serial(mut self, serial: SerialParams) -> Self {
        self.serial = serial;
        self
    }

    /// Set chardelay batching
    pub fn with_chardelay(mut self, chardelay: ChardelayConfig) -> Self {
        self.chardelay = chardelay;
        self
    }

    /// Discard one or both transfer directions
    pub fn with_directions(mut self, dev_to_net: bool, net_to_dev: bool) -> Self {
        self.no_dev_to_net = !dev_to_net;
        self.no_net_to_dev = !net_to_dev;
        self
    }

    /// Set RS-485 parameters
    pub fn with_rs485(mut self, rs485: Option<Rs485Config>) -> Self {
        self.rs485 = rs485;
        self
    }

    /// Set the allow list
    pub fn with_allowed(mut self, allowed: Vec<RemoteAddrRule>) -> Self {
        self.allowed = allowed;
        self
    }

    /// Set the connect-back targets
    pub fn with_connect_back(mut self, targets: Vec<RemoteAddrRule>) -> Self {
        self.connect_back = targets;
        self
    }

    /// Parse a comma separated address list; `!` entries become connect-back targets
    pub fn with_remote_addrs(mut self, list: &str) -> Result<Self, String> {
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let rule = RemoteAddrRule::parse(entry)?;
            if rule.connect_back {
                self.connect_back.push(rule);
            } else {
                self.allowed.push(rule);
            }
        }
        Ok(self)
    }

    /// Set the retry delays in seconds
    pub fn with_retry_times(mut self, accepter: u32, connector: u32) -> Self {
        self.accepter_retry_time = accepter;
        self.connector_retry_time = connector;
        self
    }

    /// Set the connect-back timeout in seconds
    pub fn with_connback_timeout(mut self, seconds: u32) -> Self {
        self.connback_timeout = seconds;
        self
    }

    /// Set the forced-close deadline in seconds
    pub fn with_shutdown_timeout(mut self, seconds: u32) -> Self {
        self.shutdown_timeout = seconds;
        self
    }

    /// Enable or disable kick-old-user
    pub fn with_kick_old_user(mut self, enabled: bool) -> Self {
        self.kick_old_user = enabled;
        self
    }

    /// Enable or disable Telnet on network connections
    pub fn with_telnet(mut self, enabled: bool) -> Self {
        self.telnet = enabled;
        self
    }

    /// Allow or refuse RFC 2217
    pub fn with_allow_2217(mut self, enabled: bool) -> Self {
        self.allow_2217 = enabled;
        self
    }

    /// Treat Telnet sync as break
    pub fn with_telnet_brk_on_sync(mut self, enabled: bool) -> Self {
        self.telnet_brk_on_sync = enabled;
        self
    }

    /// Set the banner template
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    /// Set the RFC 2217 signature template
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Set the open string template
    pub fn with_openstr(mut self, openstr: impl Into<String>) -> Self {
        self.openstr = Some(openstr.into());
        self
    }

    /// Set the close string template
    pub fn with_closestr(mut self, closestr: impl Into<String>) -> Self {
        self.closestr = Some(closestr.into());
        self
    }

    /// Set the close-on sequence
    pub fn with_closeon(mut self, sequence: impl Into<Bytes>) -> Self {
        self.closeon = Some(sequence.into());
        self
    }

    /// Set the send-on sequence
    pub fn with_sendon(mut self, sequence: impl Into<Bytes>) -> Self {
        self.sendon = Some(sequence.into());
        self
    }

    /// Set the trace destinations
    pub fn with_traces(
        mut self,
        read: Option<TraceConfig>,
        write: Option<TraceConfig>,
        both: Option<TraceConfig>,
    ) -> Self {
        self.trace_read = read;
        self.trace_write = write;
        self.trace_both = both;
        self
    }

    /// Set the transfer buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Number of slots reserved for connect-back sessions
    pub fn reserved_slots(&self) -> usize {
        self.connect_back.len()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("port name must not be empty".to_string());
        }
        if self.accepter.is_empty() {
            return Err(format!("port {}: accepter must not be empty", self.name));
        }
        if self.device.is_empty() {
            return Err(format!("port {}: device must not be empty", self.name));
        }
        if self.max_connections == 0 {
            return Err(format!(
                "port {}: max_connections must be greater than 0",
                self.name
            ));
        }
        if self.connect_back.len() > self.max_connections {
            return Err(format!(
                "port {}: {} connect-back targets exceed max_connections {}",
                self.name,
                self.connect_back.len(),
                self.max_connections
            ));
        }
        if self.connect_back.iter().any(|rule| rule.port.is_none()) {
            return Err(format!(
                "port {}: connect-back targets need a port",
                self.name
            ));
        }
        if self.buffer_size < 2 {
            return Err(format!(
                "port {}: buffer_size must be at least 2",
                self.name
            ));
        }
        if self.chardelay.min_us > self.chardelay.max_us {
            return Err(format!(
                "port {}: chardelay min ({}us) exceeds max ({}us)",
                self.name, self.chardelay.min_us, self.chardelay.max_us
            ));
        }
        if matches!(&self.closeon, Some(seq) if seq.is_empty()) {
            return Err(format!("port {}: closeon must not be empty", self.name));
        }
        if matches!(&self.sendon, Some(seq) if seq.is_empty()) {
            return Err(format!("port {}: sendon must not be empty", self.name));
        }
        self.serial
            .validate()
            .map_err(|e| format!("port {}: {}", self.name, e))
    }
}
