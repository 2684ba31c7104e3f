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

use crate::{ComPortCommand, TelnetOption};
use bytes::Bytes;

/// Everything the encoder can put on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum TelnetFrame {
    /// Data bytes, IAC doubled on output
    Data(Bytes),
    /// No Operation
    NoOperation,
    /// Data Mark
    DataMark,
    /// Break
    Break,
    /// Interrupt Process
    InterruptProcess,
    /// Abort Output
    AbortOutput,
    /// Are You There
    AreYouThere,
    /// Erase Character
    EraseCharacter,
    /// Erase Line
    EraseLine,
    /// Go Ahead
    GoAhead,
    /// End of Record
    EndOfRecord,
    /// Ask the peer to perform an option
    Do(TelnetOption),
    /// Ask the peer to stop performing an option
    Dont(TelnetOption),
    /// Offer to perform an option
    Will(TelnetOption),
    /// Refuse to perform an option
    Wont(TelnetOption),
    /// Raw subnegotiation; the payload is escaped on output
    Subnegotiate(TelnetOption, Bytes),
    /// COM-PORT-OPTION command, encoded for the codec's role
    ComPort(ComPortCommand),
}
