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

use crate::options::{TelnetOptions, TelnetSide};
use crate::{CodecError, ComPortCommand, Role, TelnetEvent, TelnetFrame, TelnetOption, consts};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// Largest subnegotiation payload accepted before the decoder gives up on it.
pub const MAX_SUBNEGOTIATION: usize = 1024;

/// Telnet codec for one network connection of a serial bridge.
///
/// Decoding yields runs of data and the commands embedded in them. Negotiation
/// verbs (DO/DONT/WILL/WONT) are answered by the codec itself through its
/// RFC 1143 option table; the answers accumulate in an internal buffer that the
/// owner drains with [`TelnetCodec::flush_responses`] and puts on the wire ahead
/// of any new output.
///
/// COM-PORT-OPTION subnegotiations are parsed into [`ComPortCommand`]s.
/// Encoding a [`TelnetFrame::ComPort`] applies the +100 server offset when the
/// codec was built with [`TelnetCodec::server`].
#[derive(Debug)]
pub struct TelnetCodec {
    role: Role,
    decoder_state: DecoderState,
    decoder_buffer: BytesMut,
    options: TelnetOptions,
    responses: BytesMut,
}

impl TelnetCodec {
    /// Server-role codec, the usual choice for the bridge.
    ///
    /// # Example
    /// ```
    /// use serbridge_telnetcodec::TelnetCodec;
    ///
    /// let codec = TelnetCodec::new();
    /// assert!(!codec.has_pending_responses());
    /// ```
    pub fn new() -> TelnetCodec {
        TelnetCodec::server()
    }

    /// Codec for the access server end of a COM-PORT-OPTION session
    pub fn server() -> TelnetCodec {
        TelnetCodec::with_options(Role::Server, TelnetOptions::server())
    }

    /// Codec for the client end of a COM-PORT-OPTION session
    pub fn client() -> TelnetCodec {
        TelnetCodec::with_options(Role::Client, TelnetOptions::client())
    }

    /// Codec with an explicit role and option table
    pub fn with_options(role: Role, options: TelnetOptions) -> TelnetCodec {
        TelnetCodec {
            role,
            decoder_state: DecoderState::NormalData,
            decoder_buffer: BytesMut::new(),
            options,
            responses: BytesMut::new(),
        }
    }

    /// Role used when encoding COM-PORT-OPTION commands
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether `option` is fully enabled on `side`
    pub fn is_enabled(&self, option: TelnetOption, side: TelnetSide) -> bool {
        self.options.enabled(option, side)
    }

    /// Start performing `option` (queues WILL when a negotiation is needed).
    pub fn enable_local(&mut self, option: TelnetOption) {
        if let Some(frame) = self.options.enable_local(option) {
            self.queue_frame(frame);
        }
    }

    /// Stop performing `option` (queues WONT when a negotiation is needed).
    pub fn disable_local(&mut self, option: TelnetOption) {
        if let Some(frame) = self.options.disable_local(option) {
            self.queue_frame(frame);
        }
    }

    /// Ask the peer to perform `option` (queues DO when a negotiation is needed).
    pub fn enable_remote(&mut self, option: TelnetOption) {
        if let Some(frame) = self.options.enable_remote(option) {
            self.queue_frame(frame);
        }
    }

    /// Ask the peer to stop performing `option` (queues DONT when a negotiation is needed).
    pub fn disable_remote(&mut self, option: TelnetOption) {
        if let Some(frame) = self.options.disable_remote(option) {
            self.queue_frame(frame);
        }
    }

    /// Encode a frame into the pending response buffer.
    pub fn queue_frame(&mut self, frame: TelnetFrame) {
        let mut out = std::mem::take(&mut self.responses);
        encode_frame(self.role, frame, &mut out);
        self.responses = out;
    }

    /// Whether negotiation answers or queued frames are waiting to be sent
    pub fn has_pending_responses(&self) -> bool {
        !self.responses.is_empty()
    }

    /// Move all pending output into `dst`.
    pub fn flush_responses(&mut self, dst: &mut BytesMut) {
        dst.extend_from_slice(&self.responses);
        self.responses.clear();
    }

    /// Forget any partially decoded command, as when a connection is reused.
    pub fn reset(&mut self) {
        self.decoder_state = DecoderState::NormalData;
        self.decoder_buffer.clear();
        self.responses.clear();
    }

    fn negotiate(
        &mut self,
        frame: TelnetFrame,
        option: TelnetOption,
        side: TelnetSide,
    ) -> Result<Option<TelnetEvent>, CodecError> {
        let was_enabled = self.options.enabled(option, side);
        trace!(?frame, "negotiation received");
        if let Some(reply) = self.options.handle_received(&frame)? {
            self.queue_frame(reply);
        }
        let is_enabled = self.options.enabled(option, side);
        if was_enabled != is_enabled {
            return Ok(Some(TelnetEvent::OptionStatus(option, side, is_enabled)));
        }
        Ok(None)
    }

    fn finish_subnegotiation(&mut self, option: u8) -> TelnetEvent {
        let payload = self.decoder_buffer.split().freeze();
        let option = TelnetOption::from_u8(option);
        if option == TelnetOption::ComPort {
            match ComPortCommand::decode(&payload) {
                Ok(command) => return TelnetEvent::ComPort(command),
                Err(err) => warn!(error = %err, "malformed COM-PORT-OPTION subnegotiation"),
            }
        }
        TelnetEvent::Subnegotiate(option, payload)
    }
}

impl Default for TelnetCodec {
    fn default() -> Self {
        TelnetCodec::new()
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetEvent;
    type Error = CodecError;

    /// Decode the next event from `src`.
    ///
    /// Plain data is returned in runs up to the next IAC so a read of a few
    /// kilobytes costs one event rather than one per byte. State carries over
    /// between calls, so a command split across two reads decodes correctly.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TelnetEvent>, Self::Error> {
        loop {
            if src.is_empty() {
                return Ok(None);
            }
            match self.decoder_state {
                DecoderState::NormalData => {
                    let run = src
                        .iter()
                        .position(|b| *b == consts::IAC)
                        .unwrap_or(src.len());
                    if run > 0 {
                        return Ok(Some(TelnetEvent::Data(src.split_to(run).freeze())));
                    }
                    src.advance(1);
                    self.decoder_state = DecoderState::InterpretAsCommand;
                    continue;
                }
                DecoderState::SubnegotiateArgument(option) => {
                    let run = src
                        .iter()
                        .position(|b| *b == consts::IAC)
                        .unwrap_or(src.len());
                    if self.decoder_buffer.len() + run > MAX_SUBNEGOTIATION {
                        self.decoder_state = DecoderState::NormalData;
                        self.decoder_buffer.clear();
                        src.advance(run);
                        return Err(CodecError::SubnegotiationOverflow {
                            option,
                            limit: MAX_SUBNEGOTIATION,
                        });
                    }
                    self.decoder_buffer.extend_from_slice(&src[..run]);
                    src.advance(run);
                    if !src.is_empty() {
                        src.advance(1);
                        self.decoder_state = DecoderState::SubnegotiateArgumentIAC(option);
                    }
                    continue;
                }
                _ => {}
            }

            let byte = src.get_u8();
            match (self.decoder_state, byte) {
                (DecoderState::InterpretAsCommand, consts::IAC) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetEvent::Data(bytes::Bytes::from_static(&[
                        consts::IAC,
                    ]))));
                }
                (DecoderState::InterpretAsCommand, consts::DO) => {
                    self.decoder_state = DecoderState::NegotiateDo;
                }
                (DecoderState::InterpretAsCommand, consts::DONT) => {
                    self.decoder_state = DecoderState::NegotiateDont;
                }
                (DecoderState::InterpretAsCommand, consts::WILL) => {
                    self.decoder_state = DecoderState::NegotiateWill;
                }
                (DecoderState::InterpretAsCommand, consts::WONT) => {
                    self.decoder_state = DecoderState::NegotiateWont;
                }
                (DecoderState::InterpretAsCommand, consts::SB) => {
                    self.decoder_state = DecoderState::Subnegotiate;
                }
                (DecoderState::InterpretAsCommand, command) => {
                    self.decoder_state = DecoderState::NormalData;
                    let event = match command {
                        consts::NOP => TelnetEvent::NoOperation,
                        consts::DM => TelnetEvent::DataMark,
                        consts::BRK => TelnetEvent::Break,
                        consts::IP => TelnetEvent::InterruptProcess,
                        consts::AO => TelnetEvent::AbortOutput,
                        consts::AYT => TelnetEvent::AreYouThere,
                        consts::EC => TelnetEvent::EraseCharacter,
                        consts::EL => TelnetEvent::EraseLine,
                        consts::GA => TelnetEvent::GoAhead,
                        consts::EOR => TelnetEvent::EndOfRecord,
                        other => {
                            warn!("Received Unknown Command {:#X}", other);
                            TelnetEvent::NoOperation
                        }
                    };
                    return Ok(Some(event));
                }
                (DecoderState::NegotiateDo, option) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(option);
                    let frame = TelnetFrame::Do(option);
                    if let Some(event) = self.negotiate(frame, option, TelnetSide::Local)? {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateDont, option) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(option);
                    let frame = TelnetFrame::Dont(option);
                    if let Some(event) = self.negotiate(frame, option, TelnetSide::Local)? {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateWill, option) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(option);
                    let frame = TelnetFrame::Will(option);
                    if let Some(event) = self.negotiate(frame, option, TelnetSide::Remote)? {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateWont, option) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(option);
                    let frame = TelnetFrame::Wont(option);
                    if let Some(event) = self.negotiate(frame, option, TelnetSide::Remote)? {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::Subnegotiate, option) => {
                    self.decoder_buffer.clear();
                    self.decoder_state = DecoderState::SubnegotiateArgument(option);
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::IAC) => {
                    self.decoder_buffer.put_u8(consts::IAC);
                    self.decoder_state = DecoderState::SubnegotiateArgument(option);
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::SE) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(self.finish_subnegotiation(option)));
                }
                (DecoderState::SubnegotiateArgumentIAC(option), _) => {
                    self.decoder_state = DecoderState::NormalData;
                    self.decoder_buffer.clear();
                    warn!(
                        option,
                        "Received invalid command {:#X} during subnegotiation, aborting", byte
                    );
                    return Ok(Some(TelnetEvent::NoOperation));
                }
                (DecoderState::NormalData, data) => {
                    return Ok(Some(TelnetEvent::Data(bytes::Bytes::copy_from_slice(&[data]))));
                }
                (DecoderState::SubnegotiateArgument(_), data) => {
                    self.decoder_buffer.put_u8(data);
                }
            }
        }
    }
}

impl Encoder<TelnetFrame> for TelnetCodec {
    type Error = CodecError;

    fn encode(&mut self, item: TelnetFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(self.role, item, dst);
        Ok(())
    }
}

impl Encoder<&[u8]> for TelnetCodec {
    type Error = CodecError;

    /// Encode raw data, doubling every IAC.
    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        escape_iac(item, dst);
        Ok(())
    }
}

/// Append `src` to `dst` with every IAC doubled.
pub fn escape_iac(src: &[u8], dst: &mut BytesMut) {
    dst.reserve(src.len());
    let mut rest = src;
    while let Some(pos) = rest.iter().position(|b| *b == consts::IAC) {
        dst.put_slice(&rest[..=pos]);
        dst.put_u8(consts::IAC);
        rest = &rest[pos + 1..];
    }
    dst.put_slice(rest);
}

fn command(dst: &mut BytesMut, command: u8) {
    dst.reserve(2);
    dst.put_u8(consts::IAC);
    dst.put_u8(command);
}

fn negotiation(dst: &mut BytesMut, verb: u8, option: TelnetOption) {
    dst.reserve(3);
    dst.put_u8(consts::IAC);
    dst.put_u8(verb);
    dst.put_u8(option.into());
}

fn subnegotiation(dst: &mut BytesMut, option: TelnetOption, payload: &[u8]) {
    dst.reserve(5 + payload.len());
    dst.put_u8(consts::IAC);
    dst.put_u8(consts::SB);
    dst.put_u8(option.into());
    escape_iac(payload, dst);
    dst.put_u8(consts::IAC);
    dst.put_u8(consts::SE);
}

fn encode_frame(role: Role, item: TelnetFrame, dst: &mut BytesMut) {
    match item {
        TelnetFrame::Data(data) => escape_iac(&data, dst),
        TelnetFrame::NoOperation => command(dst, consts::NOP),
        TelnetFrame::DataMark => command(dst, consts::DM),
        TelnetFrame::Break => command(dst, consts::BRK),
        TelnetFrame::InterruptProcess => command(dst, consts::IP),
        TelnetFrame::AbortOutput => command(dst, consts::AO),
        TelnetFrame::AreYouThere => command(dst, consts::AYT),
        TelnetFrame::EraseCharacter => command(dst, consts::EC),
        TelnetFrame::EraseLine => command(dst, consts::EL),
        TelnetFrame::GoAhead => command(dst, consts::GA),
        TelnetFrame::EndOfRecord => command(dst, consts::EOR),
        TelnetFrame::Do(option) => negotiation(dst, consts::DO, option),
        TelnetFrame::Dont(option) => negotiation(dst, consts::DONT, option),
        TelnetFrame::Will(option) => negotiation(dst, consts::WILL, option),
        TelnetFrame::Wont(option) => negotiation(dst, consts::WONT, option),
        TelnetFrame::Subnegotiate(option, payload) => subnegotiation(dst, option, &payload),
        TelnetFrame::ComPort(cmd) => {
            let mut payload = BytesMut::with_capacity(8);
            cmd.encode_payload(role, &mut payload);
            subnegotiation(dst, TelnetOption::ComPort, &payload);
        }
    }
}

/// Decoder position within the Telnet byte stream.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum DecoderState {
    /// Normal Data
    NormalData,
    /// Received IAC, next byte is a command
    InterpretAsCommand,
    /// Received DO, next byte is the option
    NegotiateDo,
    /// Received DONT, next byte is the option
    NegotiateDont,
    /// Received WILL, next byte is the option
    NegotiateWill,
    /// Received WONT, next byte is the option
    NegotiateWont,
    /// Received SB, next byte is the option
    Subnegotiate,
    /// Collecting the subnegotiation payload
    SubnegotiateArgument(u8),
    /// Received IAC inside a subnegotiation
    SubnegotiateArgumentIAC(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tracing_test::traced_test;

    // ============================================================================
    // Helper Functions
    // ============================================================================

    fn collect_all(codec: &mut TelnetCodec, src: &[u8]) -> Vec<TelnetEvent> {
        let mut src = BytesMut::from(src);
        let mut out = Vec::new();
        while let Some(event) = codec.decode(&mut src).expect("decode should not error") {
            out.push(event);
        }
        out
    }

    fn pending(codec: &mut TelnetCodec) -> Vec<u8> {
        let mut dst = BytesMut::new();
        codec.flush_responses(&mut dst);
        dst.to_vec()
    }

    // ============================================================================
    // Decoding
    // ============================================================================

    #[test]
    fn decode_plain_data_is_one_run() {
        let mut codec = TelnetCodec::new();
        let events = collect_all(&mut codec, b"AT\r\n");
        assert_eq!(events, vec![TelnetEvent::Data(Bytes::from_static(b"AT\r\n"))]);
    }

    #[test]
    fn decode_escaped_iac_is_data() {
        let mut codec = TelnetCodec::new();
        let events = collect_all(&mut codec, &[b'a', 255, 255, b'b']);
        assert_eq!(
            events,
            vec![
                TelnetEvent::Data(Bytes::from_static(b"a")),
                TelnetEvent::Data(Bytes::from_static(&[255])),
                TelnetEvent::Data(Bytes::from_static(b"b")),
            ]
        );
    }

    #[test]
    fn decode_break_between_data() {
        let mut codec = TelnetCodec::new();
        let events = collect_all(&mut codec, &[b'x', 255, consts::BRK, b'y']);
        assert_eq!(events[1], TelnetEvent::Break);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn decode_command_split_across_reads() {
        let mut codec = TelnetCodec::new();
        assert!(collect_all(&mut codec, &[255]).is_empty());
        assert_eq!(collect_all(&mut codec, &[consts::DM]), vec![TelnetEvent::DataMark]);
    }

    #[test]
    fn decode_will_comport_answers_do_and_reports() {
        let mut codec = TelnetCodec::server();
        let events = collect_all(&mut codec, &[255, consts::WILL, 44]);
        assert_eq!(
            events,
            vec![TelnetEvent::OptionStatus(
                TelnetOption::ComPort,
                TelnetSide::Remote,
                true
            )]
        );
        assert_eq!(pending(&mut codec), vec![255, consts::DO, 44]);
    }

    #[test]
    fn decode_unsupported_do_is_refused_silently() {
        let mut codec = TelnetCodec::server();
        let events = collect_all(&mut codec, &[255, consts::DO, 31]);
        assert!(events.is_empty());
        assert_eq!(pending(&mut codec), vec![255, consts::WONT, 31]);
    }

    #[test]
    fn decode_comport_subnegotiation() {
        let mut codec = TelnetCodec::server();
        let events = collect_all(
            &mut codec,
            &[255, consts::SB, 44, 1, 0, 0, 0x25, 0x80, 255, consts::SE],
        );
        assert_eq!(
            events,
            vec![TelnetEvent::ComPort(ComPortCommand::SetBaudRate(9600))]
        );
    }

    #[test]
    fn decode_subnegotiation_with_escaped_iac() {
        let mut codec = TelnetCodec::server();
        let events = collect_all(
            &mut codec,
            &[255, consts::SB, 24, 0, 255, 255, 255, consts::SE],
        );
        assert_eq!(
            events,
            vec![TelnetEvent::Subnegotiate(
                TelnetOption::TerminalType,
                Bytes::from_static(&[0, 255])
            )]
        );
    }

    #[test]
    #[traced_test]
    fn decode_malformed_comport_falls_back_to_raw() {
        let mut codec = TelnetCodec::server();
        let events = collect_all(&mut codec, &[255, consts::SB, 44, 1, 0, 255, consts::SE]);
        assert_eq!(
            events,
            vec![TelnetEvent::Subnegotiate(
                TelnetOption::ComPort,
                Bytes::from_static(&[1, 0])
            )]
        );
        assert!(logs_contain("malformed COM-PORT-OPTION"));
    }

    #[test]
    fn decode_oversized_subnegotiation_is_error() {
        let mut codec = TelnetCodec::server();
        let mut src = BytesMut::from(&[255, consts::SB, 24][..]);
        src.extend_from_slice(&vec![b'x'; MAX_SUBNEGOTIATION + 1]);
        let err = loop {
            match codec.decode(&mut src) {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("expected overflow"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, CodecError::SubnegotiationOverflow { option: 24, .. }));
    }

    // ============================================================================
    // Encoding
    // ============================================================================

    #[test]
    fn encode_data_doubles_iac() {
        let mut codec = TelnetCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(TelnetFrame::Data(Bytes::from_static(&[1, 255, 2])), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &[1, 255, 255, 2]);
    }

    #[test]
    fn encode_server_comport_notification() {
        let mut codec = TelnetCodec::server();
        let mut dst = BytesMut::new();
        codec
            .encode(
                TelnetFrame::ComPort(ComPortCommand::NotifyModemState(0x30)),
                &mut dst,
            )
            .unwrap();
        assert_eq!(&dst[..], &[255, consts::SB, 44, 107, 0x30, 255, consts::SE]);
    }

    #[test]
    fn enable_remote_queues_do_once() {
        let mut codec = TelnetCodec::server();
        codec.enable_remote(TelnetOption::ComPort);
        codec.enable_remote(TelnetOption::ComPort);
        assert_eq!(pending(&mut codec), vec![255, consts::DO, 44]);
        assert!(!codec.has_pending_responses());
    }

    #[test]
    fn debug_output_names_role() {
        let codec = TelnetCodec::server();
        let text = format!("{:?}", codec);
        assert!(text.starts_with("TelnetCodec"));
        assert!(text.contains("Server"));
    }

    #[test]
    fn escape_iac_without_iac_is_copy() {
        let mut dst = BytesMut::new();
        escape_iac(b"plain", &mut dst);
        assert_eq!(&dst[..], b"plain");
    }
}
