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

//! Collaborators shared by every port of a controller

use crate::auth::{AllowAll, AuthGate};
use crate::endpoint::Transport;
use crate::metrics::BridgeMetrics;
use crate::render::{BasicRenderer, StringRenderer};
use crate::types::PortNotice;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the notice channel
const NOTICE_CAPACITY: usize = 256;

/// Transport, renderer, auth gate, metrics and notice channel handed to each port
#[derive(Clone)]
pub struct PortServices {
    /// Endpoint factory
    pub transport: Arc<dyn Transport>,
    /// Banner and control string renderer
    pub renderer: Arc<dyn StringRenderer>,
    /// Authentication gate
    pub auth: Arc<dyn AuthGate>,
    /// Shared metrics
    pub metrics: Arc<BridgeMetrics>,
    /// Operator notices
    pub notices: broadcast::Sender<PortNotice>,
}

impl PortServices {
    /// Services around `transport` with the default renderer and an open gate
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            transport,
            renderer: Arc::new(BasicRenderer),
            auth: Arc::new(AllowAll),
            metrics: Arc::new(BridgeMetrics::new()),
            notices,
        }
    }

    /// Replace the renderer
    pub fn with_renderer(mut self, renderer: Arc<dyn StringRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replace the authentication gate
    pub fn with_auth(mut self, auth: Arc<dyn AuthGate>) -> Self {
        self.auth = auth;
        self
    }

    /// Publish a notice; nobody listening is fine
    pub fn notify(&self, notice: PortNotice) {
        let _ = self.notices.send(notice);
    }
}

impl std::fmt::Debug for PortServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortServices")
            .field("metrics", &self.metrics)
            .field("subscribers", &self.notices.receiver_count())
            .finish_non_exhaustive()
    }
}
