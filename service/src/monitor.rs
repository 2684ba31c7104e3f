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

//! Live copies of port traffic for observers

use crate::types::Direction;
use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Optional observer channel per direction.
///
/// Sends never wait: a full channel drops the span and a closed one is
/// removed.
#[derive(Debug, Default)]
pub struct Monitor {
    dev_to_net: Option<mpsc::Sender<Bytes>>,
    net_to_dev: Option<mpsc::Sender<Bytes>>,
}

impl Monitor {
    /// No observers
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer, replacing any previous one for `direction`
    pub fn attach(&mut self, direction: Direction, tx: mpsc::Sender<Bytes>) {
        match direction {
            Direction::DevToNet => self.dev_to_net = Some(tx),
            Direction::NetToDev => self.net_to_dev = Some(tx),
        }
    }

    /// Whether an observer is attached for `direction`
    pub fn is_attached(&self, direction: Direction) -> bool {
        match direction {
            Direction::DevToNet => self.dev_to_net.is_some(),
            Direction::NetToDev => self.net_to_dev.is_some(),
        }
    }

    /// Offer a copy of `data` to the observer of `direction`
    pub fn tap(&mut self, direction: Direction, data: &[u8]) {
        let slot = match direction {
            Direction::DevToNet => &mut self.dev_to_net,
            Direction::NetToDev => &mut self.net_to_dev,
        };
        let Some(tx) = slot.as_mut() else {
            return;
        };
        if data.is_empty() {
            return;
        }
        match tx.try_send(Bytes::copy_from_slice(data)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(%direction, len = data.len(), "monitor full, span dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%direction, "monitor went away");
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tap_delivers_and_drops() {
        let mut monitor = Monitor::new();
        let (tx, mut rx) = mpsc::channel(1);
        monitor.attach(Direction::DevToNet, tx);

        monitor.tap(Direction::DevToNet, b"one");
        // Channel full: dropped, not blocked.
        monitor.tap(Direction::DevToNet, b"two");
        // No observer for this direction.
        monitor.tap(Direction::NetToDev, b"three");

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_monitor_is_detached() {
        let mut monitor = Monitor::new();
        let (tx, rx) = mpsc::channel(4);
        monitor.attach(Direction::NetToDev, tx);
        drop(rx);
        monitor.tap(Direction::NetToDev, b"data");
        assert!(!monitor.is_attached(Direction::NetToDev));
    }
}
