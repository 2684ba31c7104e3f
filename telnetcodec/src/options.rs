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

use crate::{CodecError, CodecResult, TelnetFrame, consts};
use std::fmt::Formatter;

/// Telnet options known to the bridge.
///
/// Anything else is carried through as [`TelnetOption::Unknown`] and refused
/// during negotiation.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum TelnetOption {
    /// Binary Transmission (RFC 856)
    TransmitBinary,
    /// Echo (RFC 857)
    Echo,
    /// Suppress Go Ahead (RFC 858)
    SuppressGoAhead,
    /// Status (RFC 859)
    Status,
    /// Timing Mark (RFC 860)
    TimingMark,
    /// Terminal Type (RFC 1091)
    TerminalType,
    /// Negotiate About Window Size (RFC 1073)
    NAWS,
    /// Linemode (RFC 1184)
    Linemode,
    /// Com Port Control (RFC 2217)
    ComPort,
    /// Any other option code
    Unknown(u8),
}

impl TelnetOption {
    /// Wire code of this option
    pub fn to_u8(&self) -> u8 {
        match self {
            TelnetOption::TransmitBinary => consts::option::BINARY,
            TelnetOption::Echo => consts::option::ECHO,
            TelnetOption::SuppressGoAhead => consts::option::SGA,
            TelnetOption::Status => consts::option::STATUS,
            TelnetOption::TimingMark => consts::option::TM,
            TelnetOption::TerminalType => consts::option::TTYPE,
            TelnetOption::NAWS => consts::option::NAWS,
            TelnetOption::Linemode => consts::option::LINEMODE,
            TelnetOption::ComPort => consts::option::COM_PORT,
            TelnetOption::Unknown(byte) => *byte,
        }
    }

    /// Option for a wire code
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            consts::option::BINARY => TelnetOption::TransmitBinary,
            consts::option::ECHO => TelnetOption::Echo,
            consts::option::SGA => TelnetOption::SuppressGoAhead,
            consts::option::STATUS => TelnetOption::Status,
            consts::option::TM => TelnetOption::TimingMark,
            consts::option::TTYPE => TelnetOption::TerminalType,
            consts::option::NAWS => TelnetOption::NAWS,
            consts::option::LINEMODE => TelnetOption::Linemode,
            consts::option::COM_PORT => TelnetOption::ComPort,
            byte => TelnetOption::Unknown(byte),
        }
    }
}

impl std::fmt::Display for TelnetOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetOption::TransmitBinary => write!(f, "TransmitBinary"),
            TelnetOption::Echo => write!(f, "Echo"),
            TelnetOption::SuppressGoAhead => write!(f, "SuppressGoAhead"),
            TelnetOption::Status => write!(f, "Status"),
            TelnetOption::TimingMark => write!(f, "TimingMark"),
            TelnetOption::TerminalType => write!(f, "TerminalType"),
            TelnetOption::NAWS => write!(f, "NAWS"),
            TelnetOption::Linemode => write!(f, "Linemode"),
            TelnetOption::ComPort => write!(f, "ComPort"),
            TelnetOption::Unknown(byte) => write!(f, "Unknown({})", byte),
        }
    }
}

impl From<u8> for TelnetOption {
    fn from(byte: u8) -> Self {
        TelnetOption::from_u8(byte)
    }
}

impl From<TelnetOption> for u8 {
    fn from(option: TelnetOption) -> Self {
        option.to_u8()
    }
}

/// Which half of an option a negotiation concerns.
///
/// `Local` is what this end performs (WILL/WONT answered by DO/DONT),
/// `Remote` is what the peer performs (DO/DONT answered by WILL/WONT).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TelnetSide {
    /// This end of the connection
    Local,
    /// The peer
    Remote,
}

impl std::fmt::Display for TelnetSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetSide::Local => write!(f, "Local"),
            TelnetSide::Remote => write!(f, "Remote"),
        }
    }
}

/// RFC 1143 option state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum QState {
    /// Disabled
    #[default]
    No,
    /// Disable requested, awaiting the peer
    WantNo,
    /// Enabled
    Yes,
    /// Enable requested, awaiting the peer
    WantYes,
}

/// RFC 1143 queue bit: whether the opposite request is pending behind the current one.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
enum Queue {
    #[default]
    Empty,
    Opposite,
}

/// Negotiation state of one half of one option.
#[derive(Copy, Clone, Debug, Default)]
struct Half {
    state: QState,
    queue: Queue,
    supported: bool,
}

/// What a half wants to put on the wire after a transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Reply {
    Positive,
    Negative,
}

impl Half {
    /// Peer sent the positive verb (WILL for remote, DO for local).
    fn recv_positive(&mut self) -> Option<Reply> {
        match (self.state, self.queue) {
            (QState::No, _) => {
                if self.supported {
                    self.state = QState::Yes;
                    Some(Reply::Positive)
                } else {
                    Some(Reply::Negative)
                }
            }
            (QState::Yes, _) => None,
            (QState::WantNo, Queue::Empty) => {
                // Peer answered our refusal with an acceptance.
                self.state = QState::No;
                None
            }
            (QState::WantNo, Queue::Opposite) => {
                self.state = QState::Yes;
                self.queue = Queue::Empty;
                None
            }
            (QState::WantYes, Queue::Empty) => {
                self.state = QState::Yes;
                None
            }
            (QState::WantYes, Queue::Opposite) => {
                self.state = QState::WantNo;
                self.queue = Queue::Empty;
                Some(Reply::Negative)
            }
        }
    }

    /// Peer sent the negative verb (WONT for remote, DONT for local).
    fn recv_negative(&mut self) -> Option<Reply> {
        match (self.state, self.queue) {
            (QState::No, _) => None,
            (QState::Yes, _) => {
                self.state = QState::No;
                Some(Reply::Negative)
            }
            (QState::WantNo, Queue::Empty) => {
                self.state = QState::No;
                None
            }
            (QState::WantNo, Queue::Opposite) => {
                self.state = QState::WantYes;
                self.queue = Queue::Empty;
                Some(Reply::Positive)
            }
            (QState::WantYes, _) => {
                self.state = QState::No;
                self.queue = Queue::Empty;
                None
            }
        }
    }

    fn request_enable(&mut self) -> Option<Reply> {
        if !self.supported {
            return None;
        }
        match (self.state, self.queue) {
            (QState::No, _) => {
                self.state = QState::WantYes;
                Some(Reply::Positive)
            }
            (QState::WantNo, Queue::Empty) => {
                self.queue = Queue::Opposite;
                None
            }
            (QState::WantYes, Queue::Opposite) => {
                self.queue = Queue::Empty;
                None
            }
            _ => None,
        }
    }

    fn request_disable(&mut self) -> Option<Reply> {
        match (self.state, self.queue) {
            (QState::Yes, _) => {
                self.state = QState::WantNo;
                Some(Reply::Negative)
            }
            (QState::WantNo, Queue::Opposite) => {
                self.queue = Queue::Empty;
                None
            }
            (QState::WantYes, Queue::Empty) => {
                self.queue = Queue::Opposite;
                None
            }
            _ => None,
        }
    }
}

/// Option negotiation table for one connection, RFC 1143 Q-method.
#[derive(Clone, Debug)]
pub struct TelnetOptions {
    local: [Half; 256],
    remote: [Half; 256],
}

impl TelnetOptions {
    /// Table with nothing supported in either direction
    pub fn empty() -> TelnetOptions {
        TelnetOptions {
            local: [Half::default(); 256],
            remote: [Half::default(); 256],
        }
    }

    /// Table for a bridge accepting network clients.
    ///
    /// We echo, suppress go-ahead and speak binary; the client may speak
    /// binary and enable COM-PORT-OPTION.
    pub fn server() -> TelnetOptions {
        let mut options = TelnetOptions::empty();
        for option in [
            TelnetOption::TransmitBinary,
            TelnetOption::Echo,
            TelnetOption::SuppressGoAhead,
        ] {
            options.set_supported(option, TelnetSide::Local, true);
        }
        for option in [
            TelnetOption::TransmitBinary,
            TelnetOption::SuppressGoAhead,
            TelnetOption::ComPort,
        ] {
            options.set_supported(option, TelnetSide::Remote, true);
        }
        options
    }

    /// Table for the client end of a COM-PORT-OPTION session.
    pub fn client() -> TelnetOptions {
        let mut options = TelnetOptions::empty();
        for option in [
            TelnetOption::TransmitBinary,
            TelnetOption::SuppressGoAhead,
            TelnetOption::ComPort,
        ] {
            options.set_supported(option, TelnetSide::Local, true);
        }
        for option in [
            TelnetOption::TransmitBinary,
            TelnetOption::Echo,
            TelnetOption::SuppressGoAhead,
        ] {
            options.set_supported(option, TelnetSide::Remote, true);
        }
        options
    }

    fn half(&self, option: TelnetOption, side: TelnetSide) -> &Half {
        let idx = option.to_u8() as usize;
        match side {
            TelnetSide::Local => &self.local[idx],
            TelnetSide::Remote => &self.remote[idx],
        }
    }

    fn half_mut(&mut self, option: TelnetOption, side: TelnetSide) -> &mut Half {
        let idx = option.to_u8() as usize;
        match side {
            TelnetSide::Local => &mut self.local[idx],
            TelnetSide::Remote => &mut self.remote[idx],
        }
    }

    /// Mark an option as acceptable (or not) on one side
    pub fn set_supported(&mut self, option: TelnetOption, side: TelnetSide, supported: bool) {
        self.half_mut(option, side).supported = supported;
    }

    /// Whether an option is acceptable on one side
    pub fn is_supported(&self, option: TelnetOption, side: TelnetSide) -> bool {
        self.half(option, side).supported
    }

    /// Current Q-method state of one side of an option
    pub fn qstate(&self, option: TelnetOption, side: TelnetSide) -> QState {
        self.half(option, side).state
    }

    /// Whether an option is fully enabled on one side
    pub fn enabled(&self, option: TelnetOption, side: TelnetSide) -> bool {
        self.qstate(option, side) == QState::Yes
    }

    /// Ask to start performing `option` ourselves (WILL).
    pub fn enable_local(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let reply = self.half_mut(option, TelnetSide::Local).request_enable();
        reply.map(|reply| frame_for(option, TelnetSide::Local, reply))
    }

    /// Ask to stop performing `option` ourselves (WONT).
    pub fn disable_local(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let reply = self.half_mut(option, TelnetSide::Local).request_disable();
        reply.map(|reply| frame_for(option, TelnetSide::Local, reply))
    }

    /// Ask the peer to start performing `option` (DO).
    pub fn enable_remote(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let reply = self.half_mut(option, TelnetSide::Remote).request_enable();
        reply.map(|reply| frame_for(option, TelnetSide::Remote, reply))
    }

    /// Ask the peer to stop performing `option` (DONT).
    pub fn disable_remote(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let reply = self.half_mut(option, TelnetSide::Remote).request_disable();
        reply.map(|reply| frame_for(option, TelnetSide::Remote, reply))
    }

    /// Apply a DO/DONT/WILL/WONT received from the peer and return the answer to send, if any.
    pub fn handle_received(&mut self, frame: &TelnetFrame) -> CodecResult<Option<TelnetFrame>> {
        let (option, side, reply) = match frame {
            TelnetFrame::Do(option) => (
                *option,
                TelnetSide::Local,
                self.half_mut(*option, TelnetSide::Local).recv_positive(),
            ),
            TelnetFrame::Dont(option) => (
                *option,
                TelnetSide::Local,
                self.half_mut(*option, TelnetSide::Local).recv_negative(),
            ),
            TelnetFrame::Will(option) => (
                *option,
                TelnetSide::Remote,
                self.half_mut(*option, TelnetSide::Remote).recv_positive(),
            ),
            TelnetFrame::Wont(option) => (
                *option,
                TelnetSide::Remote,
                self.half_mut(*option, TelnetSide::Remote).recv_negative(),
            ),
            other => {
                return Err(CodecError::NegotiationError {
                    reason: "not a negotiation frame".into(),
                    frame_type: Some(format!("{:?}", other)),
                });
            }
        };
        Ok(reply.map(|reply| frame_for(option, side, reply)))
    }
}

impl Default for TelnetOptions {
    fn default() -> Self {
        TelnetOptions::server()
    }
}

fn frame_for(option: TelnetOption, side: TelnetSide, reply: Reply) -> TelnetFrame {
    match (side, reply) {
        (TelnetSide::Local, Reply::Positive) => TelnetFrame::Will(option),
        (TelnetSide::Local, Reply::Negative) => TelnetFrame::Wont(option),
        (TelnetSide::Remote, Reply::Positive) => TelnetFrame::Do(option),
        (TelnetSide::Remote, Reply::Negative) => TelnetFrame::Dont(option),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_code_mapping() {
        assert_eq!(TelnetOption::from_u8(44), TelnetOption::ComPort);
        assert_eq!(TelnetOption::ComPort.to_u8(), 44);
        assert_eq!(TelnetOption::from_u8(200), TelnetOption::Unknown(200));
        assert_eq!(u8::from(TelnetOption::Unknown(200)), 200);
    }

    #[test]
    fn test_recv_will_supported_accepts() {
        let mut options = TelnetOptions::server();
        let reply = options
            .handle_received(&TelnetFrame::Will(TelnetOption::ComPort))
            .unwrap();
        assert_eq!(reply, Some(TelnetFrame::Do(TelnetOption::ComPort)));
        assert!(options.enabled(TelnetOption::ComPort, TelnetSide::Remote));
    }

    #[test]
    fn test_recv_will_unsupported_refuses() {
        let mut options = TelnetOptions::server();
        let reply = options
            .handle_received(&TelnetFrame::Will(TelnetOption::NAWS))
            .unwrap();
        assert_eq!(reply, Some(TelnetFrame::Dont(TelnetOption::NAWS)));
        assert_eq!(
            options.qstate(TelnetOption::NAWS, TelnetSide::Remote),
            QState::No
        );
    }

    #[test]
    fn test_recv_do_unsupported_refuses() {
        let mut options = TelnetOptions::server();
        let reply = options
            .handle_received(&TelnetFrame::Do(TelnetOption::Linemode))
            .unwrap();
        assert_eq!(reply, Some(TelnetFrame::Wont(TelnetOption::Linemode)));
    }

    #[test]
    fn test_enable_local_then_ack_completes() {
        let mut options = TelnetOptions::server();
        assert_eq!(
            options.enable_local(TelnetOption::Echo),
            Some(TelnetFrame::Will(TelnetOption::Echo))
        );
        assert_eq!(
            options.qstate(TelnetOption::Echo, TelnetSide::Local),
            QState::WantYes
        );
        // Acknowledgement must not be answered again.
        let reply = options
            .handle_received(&TelnetFrame::Do(TelnetOption::Echo))
            .unwrap();
        assert_eq!(reply, None);
        assert!(options.enabled(TelnetOption::Echo, TelnetSide::Local));
    }

    #[test]
    fn test_enable_is_idempotent() {
        let mut options = TelnetOptions::server();
        assert!(options.enable_remote(TelnetOption::ComPort).is_some());
        assert!(options.enable_remote(TelnetOption::ComPort).is_none());
    }

    #[test]
    fn test_enable_unsupported_sends_nothing() {
        let mut options = TelnetOptions::server();
        assert!(options.enable_remote(TelnetOption::NAWS).is_none());
    }

    #[test]
    fn test_request_refused_returns_to_no() {
        let mut options = TelnetOptions::server();
        options.enable_remote(TelnetOption::ComPort);
        let reply = options
            .handle_received(&TelnetFrame::Wont(TelnetOption::ComPort))
            .unwrap();
        assert_eq!(reply, None);
        assert_eq!(
            options.qstate(TelnetOption::ComPort, TelnetSide::Remote),
            QState::No
        );
    }

    #[test]
    fn test_peer_disables_enabled_option() {
        let mut options = TelnetOptions::server();
        options
            .handle_received(&TelnetFrame::Will(TelnetOption::TransmitBinary))
            .unwrap();
        let reply = options
            .handle_received(&TelnetFrame::Wont(TelnetOption::TransmitBinary))
            .unwrap();
        assert_eq!(reply, Some(TelnetFrame::Dont(TelnetOption::TransmitBinary)));
        assert!(!options.enabled(TelnetOption::TransmitBinary, TelnetSide::Remote));
    }

    #[test]
    fn test_queued_opposite_request() {
        let mut options = TelnetOptions::server();
        options.enable_local(TelnetOption::Echo);
        // Change of mind while the WILL is outstanding is queued, not sent.
        assert!(options.disable_local(TelnetOption::Echo).is_none());
        let reply = options
            .handle_received(&TelnetFrame::Do(TelnetOption::Echo))
            .unwrap();
        assert_eq!(reply, Some(TelnetFrame::Wont(TelnetOption::Echo)));
        assert_eq!(
            options.qstate(TelnetOption::Echo, TelnetSide::Local),
            QState::WantNo
        );
        options
            .handle_received(&TelnetFrame::Dont(TelnetOption::Echo))
            .unwrap();
        assert_eq!(
            options.qstate(TelnetOption::Echo, TelnetSide::Local),
            QState::No
        );
    }

    #[test]
    fn test_non_negotiation_frame_is_error() {
        let mut options = TelnetOptions::server();
        let err = options.handle_received(&TelnetFrame::Break).unwrap_err();
        assert!(matches!(err, CodecError::NegotiationError { .. }));
    }
}
