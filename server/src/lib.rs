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

//! Serial to network bridge server
//!
//! Concrete transports for the `serbridge-service` engine: TCP accepters and
//! connect-back dialing on the network side, POSIX ttys and Unix-domain
//! sockets on the device side. [`BridgeServer`] wires them into a
//! [`Controller`](serbridge_service::Controller).
//!
//! # Example
//!
//! ```no_run
//! use serbridge_server::{BridgeServer, ServerConfig};
//! use serbridge_service::PortConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default().with_port(
//!         PortConfig::new("console", "tcp,0.0.0.0:3001", "/dev/ttyUSB0")
//!             .with_telnet(true)
//!             .with_timeout(600)
//!             .with_banner("\\p on \\d (\\s)\\r\\n"),
//!     );
//!     let server = BridgeServer::start(config)?;
//!     server.run_until_ctrl_c().await?;
//!     Ok(())
//! }
//! ```

#![cfg(unix)]
#![warn(missing_docs)]

mod config;
mod server;
mod tcp;
mod transport;
mod tty;
mod unix;

pub use config::ServerConfig;
pub use server::BridgeServer;
pub use tcp::{TcpAccepter, TcpEndpoint, parse_accepter};
pub use transport::SystemTransport;
pub use tty::TtyDevice;
pub use unix::{UNIX_PREFIX, UnixDevice};
