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

//! RFC 2217 COM-PORT-OPTION subnegotiation payloads.

use crate::consts::comport as code;
use crate::{CodecError, CodecResult, ComPortErrorKind};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};

/// Which end of a COM-PORT-OPTION session is sending a command.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    /// The access server (the bridge); its codes carry the +100 offset.
    Server,
    /// The client controlling the remote serial port.
    Client,
}

impl Role {
    fn offset(self) -> u8 {
        match self {
            Role::Server => code::SERVER_OFFSET,
            Role::Client => 0,
        }
    }
}

/// PURGE-DATA selector values
pub mod purge {
    /// Purge the access server receive buffer
    pub const RECEIVE: u8 = 1;
    /// Purge the access server transmit buffer
    pub const TRANSMIT: u8 = 2;
    /// Purge both buffers
    pub const BOTH: u8 = 3;
}

/// SET-CONTROL values the bridge acts on
pub mod control {
    /// Request current outbound flow control setting
    pub const FLOW_REQUEST: u8 = 0;
    /// No outbound flow control
    pub const FLOW_NONE: u8 = 1;
    /// XON/XOFF outbound flow control
    pub const FLOW_XONXOFF: u8 = 2;
    /// RTS/CTS outbound flow control
    pub const FLOW_HARDWARE: u8 = 3;
    /// Request current break state
    pub const BREAK_REQUEST: u8 = 4;
    /// Set break on
    pub const BREAK_ON: u8 = 5;
    /// Set break off
    pub const BREAK_OFF: u8 = 6;
    /// Request current DTR state
    pub const DTR_REQUEST: u8 = 7;
    /// Set DTR on
    pub const DTR_ON: u8 = 8;
    /// Set DTR off
    pub const DTR_OFF: u8 = 9;
    /// Request current RTS state
    pub const RTS_REQUEST: u8 = 10;
    /// Set RTS on
    pub const RTS_ON: u8 = 11;
    /// Set RTS off
    pub const RTS_OFF: u8 = 12;
}

/// A decoded COM-PORT-OPTION command, independent of which side sent it.
///
/// A zero argument on a SET command is a query for the current value, and
/// the answer carries the same variant with the value filled in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ComPortCommand {
    /// Text identifying the sender; empty asks the peer for its signature.
    Signature(Bytes),
    /// Line speed in bits per second
    SetBaudRate(u32),
    /// Data bits per character (5..=8)
    SetDataSize(u8),
    /// Parity (1 none, 2 odd, 3 even, 4 mark, 5 space)
    SetParity(u8),
    /// Stop bits (1 one, 2 two, 3 one and a half)
    SetStopSize(u8),
    /// Flow control, break, DTR and RTS settings
    SetControl(u8),
    /// Line state bits
    NotifyLineState(u8),
    /// Modem state bits
    NotifyModemState(u8),
    /// Stop sending data to the requester
    FlowControlSuspend,
    /// Resume sending data to the requester
    FlowControlResume,
    /// Which line state bits the requester wants notified
    SetLineStateMask(u8),
    /// Which modem state bits the requester wants notified
    SetModemStateMask(u8),
    /// Discard buffered data
    PurgeData(u8),
    /// Unrecognized command code and its raw argument
    Unknown(u8, Bytes),
}

impl ComPortCommand {
    /// Parse a COM-PORT-OPTION payload (the bytes between `IAC SB 44` and `IAC SE`).
    ///
    /// Both client codes and server (+100) codes are accepted.
    pub fn decode(payload: &[u8]) -> CodecResult<ComPortCommand> {
        let (&raw, args) = payload.split_first().ok_or(CodecError::ComPortError {
            command: 0,
            reason: ComPortErrorKind::MissingCommand,
        })?;
        let command = if raw >= code::SERVER_OFFSET {
            raw - code::SERVER_OFFSET
        } else {
            raw
        };
        let byte_arg = || {
            args.first().copied().ok_or(CodecError::ComPortError {
                command,
                reason: ComPortErrorKind::InsufficientData {
                    required: 1,
                    available: 0,
                },
            })
        };
        Ok(match command {
            code::SIGNATURE => ComPortCommand::Signature(Bytes::copy_from_slice(args)),
            code::SET_BAUDRATE => {
                if args.len() < 4 {
                    return Err(CodecError::ComPortError {
                        command,
                        reason: ComPortErrorKind::InsufficientData {
                            required: 4,
                            available: args.len(),
                        },
                    });
                }
                ComPortCommand::SetBaudRate(BigEndian::read_u32(&args[..4]))
            }
            code::SET_DATASIZE => ComPortCommand::SetDataSize(byte_arg()?),
            code::SET_PARITY => ComPortCommand::SetParity(byte_arg()?),
            code::SET_STOPSIZE => ComPortCommand::SetStopSize(byte_arg()?),
            code::SET_CONTROL => ComPortCommand::SetControl(byte_arg()?),
            code::NOTIFY_LINESTATE => ComPortCommand::NotifyLineState(byte_arg()?),
            code::NOTIFY_MODEMSTATE => ComPortCommand::NotifyModemState(byte_arg()?),
            code::FLOWCONTROL_SUSPEND => ComPortCommand::FlowControlSuspend,
            code::FLOWCONTROL_RESUME => ComPortCommand::FlowControlResume,
            code::SET_LINESTATE_MASK => ComPortCommand::SetLineStateMask(byte_arg()?),
            code::SET_MODEMSTATE_MASK => ComPortCommand::SetModemStateMask(byte_arg()?),
            code::PURGE_DATA => ComPortCommand::PurgeData(byte_arg()?),
            _ => ComPortCommand::Unknown(raw, Bytes::copy_from_slice(args)),
        })
    }

    /// Client-side command code
    pub fn code(&self) -> u8 {
        match self {
            ComPortCommand::Signature(_) => code::SIGNATURE,
            ComPortCommand::SetBaudRate(_) => code::SET_BAUDRATE,
            ComPortCommand::SetDataSize(_) => code::SET_DATASIZE,
            ComPortCommand::SetParity(_) => code::SET_PARITY,
            ComPortCommand::SetStopSize(_) => code::SET_STOPSIZE,
            ComPortCommand::SetControl(_) => code::SET_CONTROL,
            ComPortCommand::NotifyLineState(_) => code::NOTIFY_LINESTATE,
            ComPortCommand::NotifyModemState(_) => code::NOTIFY_MODEMSTATE,
            ComPortCommand::FlowControlSuspend => code::FLOWCONTROL_SUSPEND,
            ComPortCommand::FlowControlResume => code::FLOWCONTROL_RESUME,
            ComPortCommand::SetLineStateMask(_) => code::SET_LINESTATE_MASK,
            ComPortCommand::SetModemStateMask(_) => code::SET_MODEMSTATE_MASK,
            ComPortCommand::PurgeData(_) => code::PURGE_DATA,
            ComPortCommand::Unknown(raw, _) => *raw,
        }
    }

    /// Write the unescaped payload (command code plus argument) as sent by `role`.
    pub fn encode_payload(&self, role: Role, dst: &mut BytesMut) {
        match self {
            ComPortCommand::Unknown(raw, args) => {
                dst.put_u8(*raw);
                dst.put_slice(args);
                return;
            }
            other => dst.put_u8(other.code() + role.offset()),
        }
        match self {
            ComPortCommand::Signature(text) => dst.put_slice(text),
            ComPortCommand::SetBaudRate(baud) => {
                let mut arg = Vec::with_capacity(4);
                // Writing into a Vec cannot fail.
                let _ = arg.write_u32::<BigEndian>(*baud);
                dst.put_slice(&arg);
            }
            ComPortCommand::SetDataSize(value)
            | ComPortCommand::SetParity(value)
            | ComPortCommand::SetStopSize(value)
            | ComPortCommand::SetControl(value)
            | ComPortCommand::NotifyLineState(value)
            | ComPortCommand::NotifyModemState(value)
            | ComPortCommand::SetLineStateMask(value)
            | ComPortCommand::SetModemStateMask(value)
            | ComPortCommand::PurgeData(value) => dst.put_u8(*value),
            ComPortCommand::FlowControlSuspend
            | ComPortCommand::FlowControlResume
            | ComPortCommand::Unknown(..) => {}
        }
    }
}
