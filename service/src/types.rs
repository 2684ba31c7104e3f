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

//! Core types shared by the port engine and its controller

use std::fmt;
use std::time::Duration;

/// State of one transfer direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransferState {
    /// Startup has not happened or failed
    NotStarted = 0,
    /// Administratively disabled; no connections possible
    Closed = 1,
    /// Accepting, but no network connection attached
    Unconnected = 2,
    /// Source armed for reading
    WaitingInput = 3,
    /// Sink did not take everything; source reads paused
    WaitingOutputClear = 4,
    /// Close string pending to the device
    Closing = 5,
}

impl TransferState {
    /// Whether a network connection is attached in this state
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            Self::WaitingInput | Self::WaitingOutputClear | Self::Closing
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Closed => write!(f, "closed"),
            Self::Unconnected => write!(f, "unconnected"),
            Self::WaitingInput => write!(f, "waiting input"),
            Self::WaitingOutputClear => write!(f, "waiting output clear"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Which way bytes are moving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device output towards network clients
    DevToNet,
    /// Network input towards the device
    NetToDev,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::DevToNet => write!(f, "dev->net"),
            Direction::NetToDev => write!(f, "net->dev"),
        }
    }
}

/// Why a network connection (or the whole port) was closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed its end
    PeerClosed,
    /// Reading or writing the client failed
    NetError(String),
    /// Reading or writing the device failed
    DeviceError(String),
    /// No traffic in either direction for the configured timeout
    InactivityTimeout,
    /// Replaced by a newer client under kick-old-user
    Kicked,
    /// The device emitted the configured close-on sequence
    CloseOn,
    /// The client sent something the Telnet decoder rejected
    ProtocolError(String),
    /// Administrative shutdown with the given reason
    Shutdown(String),
}

impl CloseReason {
    /// Whether pending output is flushed before the connection is dropped
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            CloseReason::InactivityTimeout
                | CloseReason::Kicked
                | CloseReason::CloseOn
                | CloseReason::Shutdown(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::NetError(e) => write!(f, "network error: {}", e),
            CloseReason::DeviceError(e) => write!(f, "device error: {}", e),
            CloseReason::InactivityTimeout => write!(f, "inactivity timeout"),
            CloseReason::Kicked => write!(f, "kicked off, new user is coming"),
            CloseReason::CloseOn => write!(f, "closeon sequence found"),
            CloseReason::ProtocolError(e) => write!(f, "protocol error: {}", e),
            CloseReason::Shutdown(reason) => write!(f, "{}", reason),
        }
    }
}

/// Per-slot statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStats {
    /// Slot index within the port
    pub index: usize,
    /// Remote address string
    pub remote: String,
    /// Whether this is a device-initiated session
    pub connect_back: bool,
    /// Bytes read from the client
    pub bytes_received: u64,
    /// Bytes written to the client
    pub bytes_sent: u64,
    /// Whether the client enabled COM-PORT-OPTION
    pub rfc2217: bool,
    /// Whether the slot is draining towards a close
    pub closing: bool,
    /// Time since the connection was attached
    pub connected_for: Duration,
}

/// Per-port statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStats {
    /// Port name
    pub name: String,
    /// Configured accepter string
    pub accepter: String,
    /// Address the accepter is actually bound to
    pub accepter_addr: Option<String>,
    /// Configured device string
    pub device: String,
    /// Administrative enable flag
    pub enabled: bool,
    /// Removed from configuration but still draining
    pub deleted: bool,
    /// Device to network state
    pub dev_to_net_state: TransferState,
    /// Network to device state
    pub net_to_dev_state: TransferState,
    /// Whether the device endpoint is open
    pub device_open: bool,
    /// Bytes read from the device
    pub dev_bytes_received: u64,
    /// Bytes written to the device
    pub dev_bytes_sent: u64,
    /// Failed startup attempts
    pub retry_startup_counter: u64,
    /// Reason of the shutdown in progress or last completed
    pub shutdown_reason: Option<String>,
    /// A replacement configuration waits for the port to go quiet
    pub new_config_pending: bool,
    /// Live connections
    pub slots: Vec<SlotStats>,
}

impl PortStats {
    /// Number of live network connections
    pub fn connections(&self) -> usize {
        self.slots.len()
    }
}

impl fmt::Display for PortStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Port {{ name: {}, dev->net: {}, net->dev: {}, connections: {}, dev in/out: {}/{} }}",
            self.name,
            self.dev_to_net_state,
            self.net_to_dev_state,
            self.slots.len(),
            self.dev_bytes_received,
            self.dev_bytes_sent
        )
    }
}

/// Operator-visible port events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortNotice {
    /// Accepter is listening
    Started {
        /// Port name
        port: String,
        /// Bound accepter address
        accepter_addr: Option<String>,
    },
    /// Startup failed and will be retried
    StartFailed {
        /// Port name
        port: String,
        /// Failure description
        reason: String,
        /// Failed attempts so far
        retries: u64,
    },
    /// A client occupies a slot
    Connected {
        /// Port name
        port: String,
        /// Slot index
        slot: usize,
        /// Remote address
        remote: String,
    },
    /// A candidate was turned away
    Rejected {
        /// Port name
        port: String,
        /// Remote address
        remote: String,
        /// Rejection reason
        reason: String,
    },
    /// A client left its slot
    Disconnected {
        /// Port name
        port: String,
        /// Slot index
        slot: usize,
        /// Remote address
        remote: String,
        /// Close reason
        reason: String,
    },
    /// The port finished shutting down
    ShutDown {
        /// Port name
        port: String,
        /// Shutdown reason
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_graceful() {
        assert!(CloseReason::InactivityTimeout.is_graceful());
        assert!(CloseReason::Kicked.is_graceful());
        assert!(!CloseReason::PeerClosed.is_graceful());
        assert!(!CloseReason::NetError("reset".into()).is_graceful());
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(
            CloseReason::InactivityTimeout.to_string(),
            "inactivity timeout"
        );
        assert_eq!(
            CloseReason::Shutdown("port deleted".into()).to_string(),
            "port deleted"
        );
    }

    #[test]
    fn test_transfer_state_connected() {
        assert!(TransferState::WaitingInput.is_connected());
        assert!(TransferState::WaitingOutputClear.is_connected());
        assert!(!TransferState::Unconnected.is_connected());
        assert!(!TransferState::NotStarted.is_connected());
    }
}
