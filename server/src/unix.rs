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

//! Unix-domain socket standing in for a serial device.
//!
//! Line settings requested over RFC 2217 are kept in a [`SerialShadow`] and
//! echoed back; there are no modem lines to report.

use serbridge_service::{
    DeviceEndpoint, Endpoint, SerialParams, SerialRequest, SerialShadow,
};
use std::io;
use std::path::Path;
use std::task::{Context, Poll};
use tokio::net::UnixStream;
use tracing::{debug, trace};

/// Device string prefix selecting this endpoint
pub const UNIX_PREFIX: &str = "unix:";

/// Device connected over a Unix-domain stream socket
#[derive(Debug)]
pub struct UnixDevice {
    stream: Option<UnixStream>,
    shadow: SerialShadow,
}

impl UnixDevice {
    /// Connect to the socket at `path`. Must run inside a tokio runtime.
    pub fn open(path: impl AsRef<Path>, params: SerialParams) -> io::Result<Self> {
        let path = path.as_ref();
        let stream = std::os::unix::net::UnixStream::connect(path)?;
        stream.set_nonblocking(true)?;
        debug!(path = %path.display(), "unix device connected");
        Ok(Self {
            stream: Some(UnixStream::from_std(stream)?),
            shadow: SerialShadow::new(params),
        })
    }

    fn stream(&self) -> io::Result<&UnixStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }
}

impl Endpoint for UnixDevice {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.try_write(buf)
    }

    fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &self.stream {
            Some(stream) => stream.poll_read_ready(cx),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn poll_write_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &self.stream {
            Some(stream) => stream.poll_write_ready(cx),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

impl DeviceEndpoint for UnixDevice {
    fn send_break(&mut self) -> io::Result<()> {
        trace!("break on a socket device has no effect");
        self.stream().map(|_| ())
    }

    fn serial_control(&mut self, request: SerialRequest) -> io::Result<u32> {
        Ok(self.shadow.apply(request))
    }

    fn modem_state(&mut self) -> io::Result<Option<u8>> {
        Ok(None)
    }
}
