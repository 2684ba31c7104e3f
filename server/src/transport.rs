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

//! Transport backed by real sockets and ttys

use crate::tcp::{self, TcpAccepter};
use crate::tty::TtyDevice;
use crate::unix::{UNIX_PREFIX, UnixDevice};
use futures::FutureExt;
use futures::future::BoxFuture;
use serbridge_service::{Accepter, Candidate, DeviceEndpoint, PortConfig, Transport};
use std::io;
use tracing::debug;

/// Opens devices by name and speaks TCP on the network side.
///
/// | Device string | Endpoint |
/// |---------------|----------|
/// | `unix:<path>` | [`UnixDevice`] |
/// | anything else | [`TtyDevice`] at that path |
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTransport;

impl Transport for SystemTransport {
    fn open_device(&self, config: &PortConfig) -> io::Result<Box<dyn DeviceEndpoint>> {
        match config.device.strip_prefix(UNIX_PREFIX) {
            Some(path) => {
                debug!(port = %config.name, path, "opening socket device");
                Ok(Box::new(UnixDevice::open(path, config.serial)?))
            }
            None => Ok(Box::new(TtyDevice::open(config)?)),
        }
    }

    fn bind(&self, accepter: &str) -> io::Result<Box<dyn Accepter>> {
        Ok(Box::new(TcpAccepter::bind(accepter)?))
    }

    fn connect(&self, target: &str) -> BoxFuture<'static, io::Result<Candidate>> {
        tcp::connect(target.to_string()).boxed()
    }
}
