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

use crate::{ComPortCommand, TelnetOption, TelnetSide};
use bytes::Bytes;

///
/// `TelnetEvent` is what the decoder yields from a network byte stream.
/// Negotiation verbs never surface here; they are answered internally and
/// reported as `OptionStatus` once an option settles.
///
#[derive(Clone, Debug, PartialEq)]
pub enum TelnetEvent {
    /// A run of plain data bytes with IAC escaping removed
    Data(Bytes),
    /// No Operation
    NoOperation,
    /// Data stream part of a Synch
    DataMark,
    /// Break key or Attention key
    Break,
    /// Interrupt current process
    InterruptProcess,
    /// Cancel output from the current process
    AbortOutput,
    /// Request acknowledgment
    AreYouThere,
    /// Erase the previous character
    EraseCharacter,
    /// Erase the previous line
    EraseLine,
    /// End of input for half-duplex connections
    GoAhead,
    /// End of Record
    EndOfRecord,
    /// An option finished negotiating: (option, side, enabled)
    OptionStatus(TelnetOption, TelnetSide, bool),
    /// Subnegotiation for an option without a dedicated decoder
    Subnegotiate(TelnetOption, Bytes),
    /// RFC 2217 COM-PORT-OPTION command
    ComPort(ComPortCommand),
}
