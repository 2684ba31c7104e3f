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

//! Serial to network bridging engine
//!
//! This crate moves bytes between one serial device and up to
//! `max_connections` network sessions per port, with optional Telnet and
//! RFC 2217 serial control on the network side.
//!
//! # Architecture
//!
//! ```text
//! Controller
//!     ↓
//! PortWorker (one task per port)
//!     ↓
//! Port ── DeviceEndpoint
//!     ↓
//! NetSlot → Endpoint
//! ```
//!
//! [`Port`] is a state machine without I/O of its own. It polls the
//! endpoints handed to it by a [`Transport`], so the engine can be driven
//! by real sockets and ttys or by the in-memory doubles of the `testing`
//! module, which is built for this crate's tests and with the `testing`
//! feature.
//!
//! # Example
//!
//! ```no_run
//! use serbridge_service::{Controller, PortConfig, PortServices};
//! use serbridge_service::testing::MockTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = Controller::new(PortServices::new(MockTransport::new()));
//!     controller.add_port(
//!         PortConfig::new("console", "0.0.0.0:3001", "/dev/ttyUSB0")
//!             .with_telnet(true)
//!             .with_timeout(600),
//!     )?;
//!     tokio::signal::ctrl_c().await?;
//!     controller.shutdown_all().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

mod auth;
mod buffer;
mod config;
mod endpoint;
mod error;
mod metrics;
mod monitor;
mod port;
mod registry;
mod render;
mod services;
mod slot;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod timer;
mod trace;
mod tracker;
mod transfer;
mod types;
mod worker;

pub use auth::{AllowAll, AuthGate};
pub use buffer::ByteBuffer;
pub use config::{
    ChardelayConfig, Parity, PortConfig, RemoteAddrRule, Rs485Config, SerialParams, TraceConfig,
};
pub use endpoint::{
    Accepter, Candidate, CandidateInfo, DeviceEndpoint, Endpoint, SerialRequest, SerialShadow,
    Transport,
};
pub use error::{BridgeError, Rejected, RenderError, Result};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use port::{PendingOp, Port, PortEvent};
pub use registry::Controller;
pub use render::{BasicRenderer, RenderContext, StringRenderer};
pub use services::PortServices;
pub use timer::TICK;
pub use trace::{FileTraceSink, TraceDirection, TraceSink, hexdump};
pub use tracker::{OpToken, OpTracker};
pub use types::{CloseReason, Direction, PortNotice, PortStats, SlotStats, TransferState};
pub use worker::{ControlMessage, PortWorker};
