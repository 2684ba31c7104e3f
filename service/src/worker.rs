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

//! Port worker
//!
//! Each port runs on its own task. The worker alternates between the port's
//! next event and control messages from the controller, so all of a port's
//! state changes happen on one task. Once a deleted port has released
//! everything the worker waits for outstanding authentication checks and
//! dials to finish, then exits.

use crate::config::PortConfig;
use crate::port::{PendingOp, Port};
use crate::services::PortServices;
use crate::tracker::OpTracker;
use crate::types::{Direction, PortStats};
use bytes::Bytes;
use std::future::poll_fn;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

/// Requests from the controller to a port worker
#[derive(Debug)]
pub enum ControlMessage {
    /// Close every connection, then restart, disable or delete the port
    Shutdown {
        /// Reason reported to clients and in notices
        reason: String,
        /// What to do once closed
        then: PendingOp,
    },
    /// Enable a disabled port
    Start,
    /// Replace the port configuration
    Reconfigure(Box<PortConfig>),
    /// Report statistics
    Stats(oneshot::Sender<PortStats>),
    /// Attach a live observer
    Monitor {
        /// Direction to observe
        direction: Direction,
        /// Where copies of the data go
        tx: mpsc::Sender<Bytes>,
    },
}

/// Task driving one [`Port`]
pub struct PortWorker {
    port: Port,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    tracker: OpTracker,
}

impl PortWorker {
    /// Create a worker and the sender used to control it
    pub fn new(
        config: PortConfig,
        services: PortServices,
    ) -> (Self, mpsc::UnboundedSender<ControlMessage>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let tracker = OpTracker::new();
        let worker = Self {
            port: Port::new(config, services, tracker.clone()),
            control_rx,
            tracker,
        };
        (worker, control_tx)
    }

    /// Run the port until it is deleted and released
    #[instrument(skip(self), fields(port = %self.port.name()))]
    pub async fn run(mut self) {
        self.port.startup();
        let mut control_open = true;

        while !self.port.is_released() {
            select! {
                event = poll_fn(|cx| self.port.poll_event(cx)) => {
                    self.port.handle_event(event);
                }
                msg = self.control_rx.recv(), if control_open => match msg {
                    Some(msg) => self.handle_control(msg),
                    None => {
                        debug!("controller went away");
                        control_open = false;
                        self.port.deleted = true;
                        self.port.shutdown_port("controller shut down", PendingOp::Delete);
                    }
                },
            }
        }

        let outstanding = self.tracker.outstanding();
        if outstanding > 0 {
            debug!(outstanding, "waiting for background operations");
        }
        self.tracker.idle().await;
        info!("port worker finished");
    }

    fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Shutdown { reason, then } => {
                if then == PendingOp::Delete {
                    self.port.deleted = true;
                }
                self.port.shutdown_port(&reason, then);
            }
            ControlMessage::Start if !self.port.deleted => self.port.start(),
            ControlMessage::Start => debug!("ignoring start of a deleted port"),
            ControlMessage::Reconfigure(config) if !self.port.deleted => {
                self.port.reconfigure(*config)
            }
            ControlMessage::Reconfigure(_) => debug!("ignoring reconfigure of a deleted port"),
            ControlMessage::Stats(reply) => {
                let _ = reply.send(self.port.stats());
            }
            ControlMessage::Monitor { direction, tx } => self.port.attach_monitor(direction, tx),
        }
    }
}

impl std::fmt::Debug for PortWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortWorker")
            .field("port", &self.port)
            .field("outstanding", &self.tracker.outstanding())
            .finish()
    }
}
