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

//! Bridge server facade

use crate::config::ServerConfig;
use crate::transport::SystemTransport;
use serbridge_service::{
    AuthGate, BridgeError, Controller, MetricsSnapshot, PortNotice, PortServices, Result,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// A running bridge: one controller driving every configured port over
/// system transports.
#[derive(Debug)]
pub struct BridgeServer {
    controller: Controller,
    notice_log: Option<JoinHandle<()>>,
}

impl BridgeServer {
    /// Start every configured port. Must run inside a tokio runtime.
    pub fn start(config: ServerConfig) -> Result<Self> {
        Self::start_with(config, PortServices::new(Arc::new(SystemTransport)))
    }

    /// Start with an authentication gate in front of every port
    pub fn start_with_auth(config: ServerConfig, auth: Arc<dyn AuthGate>) -> Result<Self> {
        Self::start_with(
            config,
            PortServices::new(Arc::new(SystemTransport)).with_auth(auth),
        )
    }

    /// Start with caller-supplied services
    #[instrument(skip_all, fields(ports = config.ports.len()))]
    pub fn start_with(config: ServerConfig, services: PortServices) -> Result<Self> {
        config.validate().map_err(BridgeError::Config)?;
        let controller = Controller::new(services);
        let notice_log = config
            .log_notices
            .then(|| tokio::spawn(log_notices(controller.subscribe())));

        for port in config.ports {
            let name = port.name.clone();
            if let Err(e) = controller.add_port(port) {
                error!(port = %name, error = %e, "unable to add port");
                return Err(e);
            }
        }
        info!(ports = ?controller.port_names(), "bridge started");
        Ok(Self {
            controller,
            notice_log,
        })
    }

    /// Controller for runtime changes and statistics
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Aggregate metrics of all ports
    pub fn metrics(&self) -> MetricsSnapshot {
        self.controller.metrics().snapshot()
    }

    /// Run until Ctrl-C, then shut every port down
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("interrupt received");
        self.shutdown().await;
        Ok(())
    }

    /// Close every connection and wait for all ports to finish
    #[instrument(skip(self))]
    pub async fn shutdown(self) {
        self.controller.shutdown_all().await;
        if let Some(task) = self.notice_log {
            task.abort();
        }
        info!("bridge stopped");
    }
}

async fn log_notices(mut notices: broadcast::Receiver<PortNotice>) {
    loop {
        match notices.recv().await {
            Ok(PortNotice::StartFailed {
                port,
                reason,
                retries,
            }) => warn!(port = %port, reason = %reason, retries, "port failed to start"),
            Ok(notice) => info!(?notice, "port notice"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "notice log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
