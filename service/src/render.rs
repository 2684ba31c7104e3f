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

//! Rendering of banner, open, close and signature strings

use crate::config::SerialParams;
use crate::error::RenderError;
use bytes::{BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

/// Values a template may refer to
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Port name
    pub port: &'a str,
    /// Device string
    pub device: &'a str,
    /// Remote address of the connection, if one is involved
    pub remote: Option<&'a str>,
    /// Serial parameters in effect
    pub serial: SerialParams,
}

/// Turns a configured template into the bytes to send
pub trait StringRenderer: Send + Sync {
    /// Render `template` for `ctx`
    fn render(&self, template: &str, ctx: &RenderContext<'_>) -> Result<Bytes, RenderError>;
}

/// Backslash-escape renderer.
///
/// | Escape | Produces |
/// |--------|----------|
/// | `\r` `\n` `\t` `\\` | the control character or backslash |
/// | `\xHH` | the byte `0xHH` |
/// | `\p` | port name |
/// | `\d` | device |
/// | `\a` | remote address, empty if none |
/// | `\s` | serial parameters, e.g. `9600N81` |
/// | `\T` | seconds since the Unix epoch |
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicRenderer;

impl StringRenderer for BasicRenderer {
    fn render(&self, template: &str, ctx: &RenderContext<'_>) -> Result<Bytes, RenderError> {
        let mut out = BytesMut::with_capacity(template.len());
        let bytes = template.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b != b'\\' {
                out.put_u8(b);
                i += 1;
                continue;
            }
            let esc = *bytes.get(i + 1).ok_or(RenderError::Dangling)?;
            i += 2;
            match esc {
                b'r' => out.put_u8(b'\r'),
                b'n' => out.put_u8(b'\n'),
                b't' => out.put_u8(b'\t'),
                b'\\' => out.put_u8(b'\\'),
                b'x' => {
                    let hex = template
                        .get(i..i + 2)
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or(RenderError::BadHex(i - 2))?;
                    out.put_u8(hex);
                    i += 2;
                }
                b'p' => out.put_slice(ctx.port.as_bytes()),
                b'd' => out.put_slice(ctx.device.as_bytes()),
                b'a' => out.put_slice(ctx.remote.unwrap_or("").as_bytes()),
                b's' => out.put_slice(ctx.serial.to_string().as_bytes()),
                b'T' => {
                    let secs = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0);
                    out.put_slice(secs.to_string().as_bytes());
                }
                other => {
                    let ch = template[i - 1..].chars().next().unwrap_or(other as char);
                    return Err(RenderError::UnknownEscape(ch));
                }
            }
        }
        Ok(out.freeze())
    }
}
