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

//! # Serbridge Telnet Codec
//!
//! Telnet framing for the network side of a serial bridge: RFC 854 commands,
//! RFC 1143 option negotiation and the RFC 2217 COM-PORT-OPTION used to carry
//! serial line settings and modem signals.
//!
//! ## Core Components
//!
//! ### [`TelnetCodec`]
//!
//! Implements [`Decoder`](tokio_util::codec::Decoder) and
//! [`Encoder`](tokio_util::codec::Encoder). The decoder returns data in runs,
//! answers negotiation on its own and queues the answers for the owner to send.
//!
//! ### [`TelnetFrame`] and [`TelnetEvent`]
//!
//! Frames are what goes out; events are what comes in. Events never contain
//! raw DO/DONT/WILL/WONT, only [`TelnetEvent::OptionStatus`] once an option settles.
//!
//! ### [`ComPortCommand`]
//!
//! A parsed COM-PORT-OPTION subnegotiation. The same value type serves both
//! directions; [`Role`] decides whether the +100 server offset is applied.
//!
//! ## Usage Example
//!
//! ```rust
//! use serbridge_telnetcodec::{ComPortCommand, TelnetCodec, TelnetEvent, TelnetFrame, TelnetOption};
//! use tokio_util::codec::{Decoder, Encoder};
//! use bytes::BytesMut;
//!
//! let mut codec = TelnetCodec::server();
//! codec.enable_remote(TelnetOption::ComPort);
//!
//! // Client agrees to COM-PORT-OPTION then sets 9600 baud.
//! let mut input = BytesMut::from(&b"\xFF\xFB\x2C\xFF\xFA\x2C\x01\x00\x00\x25\x80\xFF\xF0"[..]);
//! let mut events = Vec::new();
//! while let Some(event) = codec.decode(&mut input).unwrap() {
//!     events.push(event);
//! }
//! assert_eq!(events[1], TelnetEvent::ComPort(ComPortCommand::SetBaudRate(9600)));
//!
//! let mut output = BytesMut::new();
//! codec.encode(TelnetFrame::ComPort(ComPortCommand::SetBaudRate(9600)), &mut output).unwrap();
//! assert_eq!(output[3], 101);
//! ```
//!
//! ## IAC Escaping
//!
//! 0xFF is IAC, so a literal 0xFF in the data stream is sent as `IAC IAC`.
//! [`escape_iac`] does this for callers that buffer raw data themselves.

#![warn(missing_docs, future_incompatible, rust_2018_idioms)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod codec;
mod comport;
pub mod consts;
mod event;
mod frame;
mod options;
mod result;

pub use self::codec::{MAX_SUBNEGOTIATION, TelnetCodec, escape_iac};
pub use self::comport::{ComPortCommand, Role, control, purge};
pub use self::event::TelnetEvent;
pub use self::frame::TelnetFrame;
pub use self::options::{QState, TelnetOption, TelnetOptions, TelnetSide};
pub use self::result::{CodecError, CodecResult, ComPortErrorKind};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::Decoder;

    #[test]
    fn data_and_negotiation_interleave() {
        let mut codec = TelnetCodec::server();
        let mut input = BytesMut::from(&b"OK\xFF\xFB\x00\r\n"[..]);
        let mut events = Vec::new();
        while let Some(event) = codec.decode(&mut input).unwrap() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                TelnetEvent::Data(Bytes::from_static(b"OK")),
                TelnetEvent::OptionStatus(TelnetOption::TransmitBinary, TelnetSide::Remote, true),
                TelnetEvent::Data(Bytes::from_static(b"\r\n")),
            ]
        );
        assert!(codec.has_pending_responses());
    }
}
