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

//! Telnet protocol byte values (RFC 854, RFC 2217)

/// Carriage Return
pub const CR: u8 = 13;
/// Line Feed
pub const LF: u8 = 10;
/// End of Record
pub const EOR: u8 = 239;
/// End of Subnegotiation
pub const SE: u8 = 240;
/// No Operation
pub const NOP: u8 = 241;
/// Data Mark (the data stream portion of a Synch)
pub const DM: u8 = 242;
/// Break
pub const BRK: u8 = 243;
/// Interrupt Process
pub const IP: u8 = 244;
/// Abort Output
pub const AO: u8 = 245;
/// Are You There
pub const AYT: u8 = 246;
/// Erase Character
pub const EC: u8 = 247;
/// Erase Line
pub const EL: u8 = 248;
/// Go Ahead
pub const GA: u8 = 249;
/// Begin Subnegotiation
pub const SB: u8 = 250;
/// WILL
pub const WILL: u8 = 251;
/// WONT
pub const WONT: u8 = 252;
/// DO
pub const DO: u8 = 253;
/// DONT
pub const DONT: u8 = 254;
/// Interpret As Command
pub const IAC: u8 = 255;

/// Option codes understood by the codec
pub mod option {
    /// Binary Transmission (RFC 856)
    pub const BINARY: u8 = 0;
    /// Echo (RFC 857)
    pub const ECHO: u8 = 1;
    /// Suppress Go Ahead (RFC 858)
    pub const SGA: u8 = 3;
    /// Status (RFC 859)
    pub const STATUS: u8 = 5;
    /// Timing Mark (RFC 860)
    pub const TM: u8 = 6;
    /// Terminal Type (RFC 1091)
    pub const TTYPE: u8 = 24;
    /// Negotiate About Window Size (RFC 1073)
    pub const NAWS: u8 = 31;
    /// Linemode (RFC 1184)
    pub const LINEMODE: u8 = 34;
    /// Com Port Control Option (RFC 2217)
    pub const COM_PORT: u8 = 44;
}

/// RFC 2217 COM-PORT-OPTION subcommands, as sent by the client.
///
/// The access server answers with the same code plus [`SERVER_OFFSET`].
pub mod comport {
    /// Offset added to a command code when the access server sends it
    pub const SERVER_OFFSET: u8 = 100;
    /// SIGNATURE
    pub const SIGNATURE: u8 = 0;
    /// SET-BAUDRATE
    pub const SET_BAUDRATE: u8 = 1;
    /// SET-DATASIZE
    pub const SET_DATASIZE: u8 = 2;
    /// SET-PARITY
    pub const SET_PARITY: u8 = 3;
    /// SET-STOPSIZE
    pub const SET_STOPSIZE: u8 = 4;
    /// SET-CONTROL
    pub const SET_CONTROL: u8 = 5;
    /// NOTIFY-LINESTATE
    pub const NOTIFY_LINESTATE: u8 = 6;
    /// NOTIFY-MODEMSTATE
    pub const NOTIFY_MODEMSTATE: u8 = 7;
    /// FLOWCONTROL-SUSPEND
    pub const FLOWCONTROL_SUSPEND: u8 = 8;
    /// FLOWCONTROL-RESUME
    pub const FLOWCONTROL_RESUME: u8 = 9;
    /// SET-LINESTATE-MASK
    pub const SET_LINESTATE_MASK: u8 = 10;
    /// SET-MODEMSTATE-MASK
    pub const SET_MODEMSTATE_MASK: u8 = 11;
    /// PURGE-DATA
    pub const PURGE_DATA: u8 = 12;
}

/// RFC 2217 modem state bits (NOTIFY-MODEMSTATE)
pub mod modemstate {
    /// Receive Line Signal Detect (Carrier Detect)
    pub const CD: u8 = 0x80;
    /// Ring Indicator
    pub const RI: u8 = 0x40;
    /// Data Set Ready
    pub const DSR: u8 = 0x20;
    /// Clear To Send
    pub const CTS: u8 = 0x10;
    /// Delta Receive Line Signal Detect
    pub const DELTA_CD: u8 = 0x08;
    /// Trailing Edge Ring Detector
    pub const TERI: u8 = 0x04;
    /// Delta Data Set Ready
    pub const DELTA_DSR: u8 = 0x02;
    /// Delta Clear To Send
    pub const DELTA_CTS: u8 = 0x01;
    /// The signal level half of the state byte
    pub const LINES: u8 = 0xF0;
}

/// RFC 2217 line state bits (NOTIFY-LINESTATE)
pub mod linestate {
    /// Time-out Error
    pub const TIMEOUT: u8 = 0x80;
    /// Transfer Shift Register Empty
    pub const TSRE: u8 = 0x40;
    /// Transfer Holding Register Empty
    pub const THRE: u8 = 0x20;
    /// Break-detect Error
    pub const BREAK: u8 = 0x10;
    /// Framing Error
    pub const FRAMING: u8 = 0x08;
    /// Parity Error
    pub const PARITY: u8 = 0x04;
    /// Overrun Error
    pub const OVERRUN: u8 = 0x02;
    /// Data Ready
    pub const DATA_READY: u8 = 0x01;
}
