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

//! Error types for the port engine

use thiserror::Error;

/// Result type for engine and controller operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by ports and the controller
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error from a device, accepter or network endpoint
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Telnet or RFC 2217 protocol error
    #[error("Protocol error: {0}")]
    Codec(#[from] serbridge_telnetcodec::CodecError),

    /// A port configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No port with the given name is registered
    #[error("Port {0} not found")]
    PortNotFound(String),

    /// A live port already uses the given name
    #[error("Port {0} already exists")]
    PortExists(String),

    /// The controller is shutting down
    #[error("Controller is shutting down")]
    ShuttingDown,

    /// A banner or control string could not be rendered
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// The port worker went away before answering
    #[error("Port worker channel closed")]
    ChannelClosed,

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Whether retrying the operation later might succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BridgeError::Io(_) | BridgeError::ChannelClosed)
    }

    /// Whether the error came from a connection or device endpoint
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BridgeError::Io(_) | BridgeError::Codec(_))
    }
}

/// Why a candidate network connection was turned away
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    /// Remote address is not on the allow list
    #[error("address {0} not allowed")]
    AddressNotAllowed(String),

    /// The authentication gate refused the connection
    #[error("authentication denied for {0}")]
    AuthDenied(String),

    /// Every slot is in use and kick-old-user is off
    #[error("no free connection slot")]
    NoFreeSlot,

    /// The port is disabled or shutting down
    #[error("port disabled")]
    PortDisabled,

    /// The device could not be opened for the new connection
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl Rejected {
    /// Short text sent to the rejected client before it is closed
    pub fn notice(&self) -> &'static [u8] {
        match self {
            Rejected::AddressNotAllowed(_) | Rejected::AuthDenied(_) => b"Access denied\r\n",
            Rejected::NoFreeSlot => b"Port already in use\r\n",
            Rejected::PortDisabled => b"Port disabled\r\n",
            Rejected::DeviceUnavailable(_) => b"Device unavailable\r\n",
        }
    }
}

/// Failure rendering a banner, open, close or signature string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Backslash escape the renderer does not know
    #[error("unknown escape \\{0}")]
    UnknownEscape(char),

    /// `\x` not followed by two hex digits
    #[error("invalid hex escape at offset {0}")]
    BadHex(usize),

    /// Template ends in a lone backslash
    #[error("dangling backslash")]
    Dangling,
}
