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

//! Port registry and controller
//!
//! The [`Controller`] owns one worker task per port and talks to it over a
//! control channel. A deleted port keeps its registry entry until its worker
//! has released everything; a port added under the same name meanwhile is
//! staged and started when the old worker exits. Dropping the last
//! controller handle closes every control channel, which deletes the ports.

use crate::config::PortConfig;
use crate::error::{BridgeError, Result};
use crate::metrics::BridgeMetrics;
use crate::port::PendingOp;
use crate::services::PortServices;
use crate::types::{Direction, PortNotice, PortStats};
use crate::worker::{ControlMessage, PortWorker};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Registry entry of a running port
struct PortHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
    generation: u64,
    deleted: bool,
    join: Option<JoinHandle<()>>,
}

impl PortHandle {
    fn send(&self, name: &str, msg: ControlMessage) -> Result<()> {
        self.tx.send(msg).map_err(|_| {
            debug!(port = %name, "port worker is gone");
            BridgeError::ChannelClosed
        })
    }
}

struct Shared {
    ports: DashMap<String, PortHandle>,
    /// Configurations waiting for a deleted namesake to drain
    staged: DashMap<String, PortConfig>,
    services: PortServices,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
}

impl Shared {
    fn spawn_port(self: &Arc<Self>, config: PortConfig) {
        let name = config.name.clone();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (worker, tx) = PortWorker::new(config, self.services.clone());
        let shared = Arc::downgrade(self);
        let exit_name = name.clone();
        let join = tokio::spawn(async move {
            worker.run().await;
            if let Some(shared) = shared.upgrade() {
                shared.worker_exited(&exit_name, generation);
            }
        });
        self.ports.insert(
            name.clone(),
            PortHandle {
                tx,
                generation,
                deleted: false,
                join: Some(join),
            },
        );
        debug!(port = %name, generation, "port worker spawned");
    }

    fn worker_exited(self: &Arc<Self>, name: &str, generation: u64) {
        let removed = self
            .ports
            .remove_if(name, |_, handle| handle.generation == generation)
            .is_some();
        if !removed {
            return;
        }
        debug!(port = %name, generation, "port worker exited");
        if self.shutting_down.load(Ordering::SeqCst) {
            self.staged.remove(name);
            return;
        }
        if let Some((_, config)) = self.staged.remove(name) {
            info!(port = %name, "starting staged port");
            self.spawn_port(config);
        }
    }
}

/// Owner of every port of a bridge
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    /// Controller with no ports
    pub fn new(services: PortServices) -> Self {
        Self {
            shared: Arc::new(Shared {
                ports: DashMap::new(),
                staged: DashMap::new(),
                services,
                next_generation: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    fn check_running(&self) -> Result<()> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::ShuttingDown);
        }
        Ok(())
    }

    /// Add and start a port
    #[instrument(skip(self, config), fields(port = %config.name))]
    pub fn add_port(&self, config: PortConfig) -> Result<()> {
        self.check_running()?;
        config.validate().map_err(BridgeError::Config)?;
        let draining = match self.shared.ports.get(&config.name) {
            Some(handle) if !handle.deleted => {
                return Err(BridgeError::PortExists(config.name.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if draining {
            info!("port is still draining, staging the new configuration");
            self.shared.staged.insert(config.name.clone(), config);
            return Ok(());
        }
        info!(accepter = %config.accepter, device = %config.device, "adding port");
        self.shared.spawn_port(config);
        Ok(())
    }

    fn send(&self, name: &str, msg: ControlMessage) -> Result<()> {
        match self.shared.ports.get(name) {
            Some(handle) if !handle.deleted => handle.send(name, msg),
            _ => Err(BridgeError::PortNotFound(name.to_string())),
        }
    }

    /// Enable a disabled port
    pub fn start_port(&self, name: &str) -> Result<()> {
        self.check_running()?;
        self.send(name, ControlMessage::Start)
    }

    /// Close every connection of a port and disable it
    pub fn stop_port(&self, name: &str) -> Result<()> {
        self.send(
            name,
            ControlMessage::Shutdown {
                reason: "port disabled".to_string(),
                then: PendingOp::Disable,
            },
        )
    }

    /// Close every connection of a port and remove it
    #[instrument(skip(self))]
    pub fn remove_port(&self, name: &str) -> Result<()> {
        self.shared.staged.remove(name);
        let mut handle = self
            .shared
            .ports
            .get_mut(name)
            .filter(|h| !h.deleted)
            .ok_or_else(|| BridgeError::PortNotFound(name.to_string()))?;
        handle.deleted = true;
        info!("removing port");
        handle.send(
            name,
            ControlMessage::Shutdown {
                reason: "port deleted".to_string(),
                then: PendingOp::Delete,
            },
        )
    }

    /// Apply a complete set of port configurations.
    ///
    /// Ports missing from `configs` are removed, new ones are added and the
    /// others are reconfigured in place. Nothing changes if any
    /// configuration is invalid.
    #[instrument(skip(self, configs), fields(count = configs.len()))]
    pub fn reconfigure(&self, configs: Vec<PortConfig>) -> Result<()> {
        self.check_running()?;
        let mut names = HashSet::new();
        for config in &configs {
            config.validate().map_err(BridgeError::Config)?;
            if !names.insert(config.name.clone()) {
                return Err(BridgeError::Config(format!(
                    "port {} defined twice",
                    config.name
                )));
            }
        }

        let stale: Vec<String> = self
            .port_names()
            .into_iter()
            .filter(|name| !names.contains(name))
            .collect();
        for name in stale {
            if let Err(e) = self.remove_port(&name) {
                warn!(port = %name, error = %e, "unable to remove port");
            }
        }

        for config in configs {
            let name = config.name.clone();
            let live = self
                .shared
                .ports
                .get(&name)
                .map(|h| !h.deleted)
                .unwrap_or(false);
            let result = if live {
                self.send(&name, ControlMessage::Reconfigure(Box::new(config)))
            } else {
                self.add_port(config)
            };
            if let Err(e) = result {
                warn!(port = %name, error = %e, "unable to apply configuration");
            }
        }
        Ok(())
    }

    /// Statistics of one port
    pub async fn port_stats(&self, name: &str) -> Result<PortStats> {
        let (reply, rx) = oneshot::channel();
        self.send(name, ControlMessage::Stats(reply))?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Statistics of every port, ordered by name
    pub async fn all_stats(&self) -> Vec<PortStats> {
        let mut stats = Vec::new();
        for name in self.port_names() {
            match self.port_stats(&name).await {
                Ok(snapshot) => stats.push(snapshot),
                Err(e) => debug!(port = %name, error = %e, "no statistics"),
            }
        }
        stats
    }

    /// Copy one direction of a port's traffic into a channel
    pub fn monitor(
        &self,
        name: &str,
        direction: Direction,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Bytes>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.send(name, ControlMessage::Monitor { direction, tx })?;
        Ok(rx)
    }

    /// Names of the ports that are not being deleted, sorted
    pub fn port_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .ports
            .iter()
            .filter(|entry| !entry.value().deleted)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Whether a port with this name is registered and not being deleted
    pub fn has_port(&self, name: &str) -> bool {
        self.shared
            .ports
            .get(name)
            .map(|h| !h.deleted)
            .unwrap_or(false)
    }

    /// Operator notices of every port
    pub fn subscribe(&self) -> broadcast::Receiver<PortNotice> {
        self.shared.services.notices.subscribe()
    }

    /// Shared metrics
    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        self.shared.services.metrics.clone()
    }

    /// Delete every port and wait for their workers to finish
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.staged.clear();
        let mut joins = Vec::new();
        for mut entry in self.shared.ports.iter_mut() {
            let name = entry.key().clone();
            let handle = entry.value_mut();
            if !handle.deleted {
                handle.deleted = true;
                let _ = handle.send(
                    &name,
                    ControlMessage::Shutdown {
                        reason: "bridge shutting down".to_string(),
                        then: PendingOp::Delete,
                    },
                );
            }
            if let Some(join) = handle.join.take() {
                joins.push((name, join));
            }
        }
        info!(ports = joins.len(), "waiting for ports to shut down");
        for (name, join) in joins {
            if let Err(e) = join.await {
                warn!(port = %name, error = %e, "port worker failed");
            }
        }
        info!("all ports shut down");
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("ports", &self.port_names())
            .field("staged", &self.shared.staged.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::types::TransferState;
    use std::time::Duration;

    fn controller() -> (Controller, Arc<MockTransport>) {
        let transport = MockTransport::new();
        (
            Controller::new(PortServices::new(transport.clone())),
            transport,
        )
    }

    fn port(name: &str, accepter: &str) -> PortConfig {
        PortConfig::new(name, accepter, format!("/dev/{}", name))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_remove_port() {
        let (controller, transport) = controller();
        controller.add_port(port("a", "127.0.0.1:5001")).unwrap();
        assert!(matches!(
            controller.add_port(port("a", "127.0.0.1:5002")),
            Err(BridgeError::PortExists(_))
        ));
        settle().await;
        assert!(transport.is_listening("127.0.0.1:5001"));
        assert_eq!(controller.port_names(), vec!["a".to_string()]);

        controller.remove_port("a").unwrap();
        assert!(!controller.has_port("a"));
        settle().await;
        assert!(!transport.is_listening("127.0.0.1:5001"));
        assert!(matches!(
            controller.port_stats("a").await,
            Err(BridgeError::PortNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_rejected() {
        let (controller, _transport) = controller();
        let bad = port("a", "127.0.0.1:5001").with_max_connections(0);
        assert!(matches!(controller.add_port(bad), Err(BridgeError::Config(_))));
        assert!(controller.port_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readd_waits_for_drain() {
        let (controller, transport) = controller();
        controller.add_port(port("a", "127.0.0.1:5001")).unwrap();
        settle().await;

        let client = transport
            .connect_client("127.0.0.1:5001", "10.0.0.1:1000")
            .unwrap();
        settle().await;
        client.set_write_capacity(Some(0));
        transport.device("/dev/a").push(b"pending");
        settle().await;

        controller.remove_port("a").unwrap();
        controller.add_port(port("a", "127.0.0.1:5002")).unwrap();
        settle().await;
        assert!(!transport.is_listening("127.0.0.1:5002"));

        client.grant(64);
        settle().await;
        assert!(client.is_closed());
        assert!(transport.is_listening("127.0.0.1:5002"));
        let stats = controller.port_stats("a").await.unwrap();
        assert_eq!(stats.accepter, "127.0.0.1:5002");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_set() {
        let (controller, transport) = controller();
        controller.add_port(port("a", "127.0.0.1:5001")).unwrap();
        controller.add_port(port("b", "127.0.0.1:5002")).unwrap();
        settle().await;

        controller
            .reconfigure(vec![
                port("b", "127.0.0.1:5003"),
                port("c", "127.0.0.1:5004"),
            ])
            .unwrap();
        settle().await;

        assert_eq!(controller.port_names(), vec!["b".to_string(), "c".to_string()]);
        assert!(!transport.is_listening("127.0.0.1:5001"));
        assert!(!transport.is_listening("127.0.0.1:5002"));
        assert!(transport.is_listening("127.0.0.1:5003"));
        assert!(transport.is_listening("127.0.0.1:5004"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_start() {
        let (controller, transport) = controller();
        controller.add_port(port("a", "127.0.0.1:5001")).unwrap();
        settle().await;

        controller.stop_port("a").unwrap();
        let stats = controller.port_stats("a").await.unwrap();
        assert_eq!(stats.dev_to_net_state, TransferState::Closed);
        assert!(!transport.is_listening("127.0.0.1:5001"));

        controller.start_port("a").unwrap();
        let stats = controller.port_stats("a").await.unwrap();
        assert_eq!(stats.dev_to_net_state, TransferState::Unconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_all() {
        let (controller, transport) = controller();
        let mut notices = controller.subscribe();
        controller.add_port(port("a", "127.0.0.1:5001")).unwrap();
        controller.add_port(port("b", "127.0.0.1:5002")).unwrap();
        settle().await;

        controller.shutdown_all().await;
        assert!(controller.port_names().is_empty());
        assert!(!transport.is_listening("127.0.0.1:5001"));
        assert!(matches!(
            controller.add_port(port("c", "127.0.0.1:5003")),
            Err(BridgeError::ShuttingDown)
        ));

        let mut shut_down = 0;
        while let Ok(notice) = notices.try_recv() {
            if matches!(notice, PortNotice::ShutDown { .. }) {
                shut_down += 1;
            }
        }
        assert_eq!(shut_down, 2);
    }
}
