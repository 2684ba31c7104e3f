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

//! Accounting of in-flight asynchronous operations of a port

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    outstanding: AtomicUsize,
    idle: Notify,
}

/// Counts operations that still refer to a port.
///
/// Each operation holds an [`OpToken`]; dropping the token ends it. A port
/// is released only after [`OpTracker::idle`] resolves.
#[derive(Debug, Clone, Default)]
pub struct OpTracker {
    inner: Arc<Inner>,
}

impl OpTracker {
    /// New tracker with nothing outstanding
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation
    pub fn token(&self) -> OpToken {
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        OpToken {
            inner: self.inner.clone(),
        }
    }

    /// Operations currently outstanding
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Wait until no operation is outstanding
    pub async fn idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Proof that one operation is still running
#[derive(Debug)]
pub struct OpToken {
    inner: Arc<Inner>,
}

impl Drop for OpToken {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_idle_when_nothing_outstanding() {
        let tracker = OpTracker::new();
        tokio::time::timeout(Duration::from_millis(100), tracker.idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_waits_for_tokens() {
        let tracker = OpTracker::new();
        let first = tracker.token();
        let second = tracker.token();
        assert_eq!(tracker.outstanding(), 2);

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.idle().await })
        };
        drop(first);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracker.outstanding(), 0);
    }
}
