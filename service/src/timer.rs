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

//! One-shot port timers polled from the port event loop

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Interval of the housekeeping tick
pub const TICK: Duration = Duration::from_secs(1);

/// The two timers a port owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// One-second housekeeping tick: inactivity, retries, shutdown countdowns
    Tick,
    /// Flush of device data held back for batching
    CharDelay,
}

/// Holds the port timers. Each is a one-shot; an expired timer is disarmed
/// before it is reported, so it fires at most once per `start`.
#[derive(Default)]
pub struct TimerService {
    tick: Option<Pin<Box<Sleep>>>,
    chardelay: Option<Pin<Box<Sleep>>>,
}

impl TimerService {
    /// Create with both timers stopped
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<Pin<Box<Sleep>>> {
        match kind {
            TimerKind::Tick => &mut self.tick,
            TimerKind::CharDelay => &mut self.chardelay,
        }
    }

    /// Arm `kind` to fire after `after`, replacing any earlier deadline
    pub fn start(&mut self, kind: TimerKind, after: Duration) {
        let deadline = Instant::now() + after;
        match self.slot(kind) {
            Some(sleep) => sleep.as_mut().reset(deadline),
            slot => *slot = Some(Box::pin(tokio::time::sleep_until(deadline))),
        }
    }

    /// Disarm `kind`
    pub fn stop(&mut self, kind: TimerKind) {
        *self.slot(kind) = None;
    }

    /// Disarm both timers
    pub fn stop_all(&mut self) {
        self.tick = None;
        self.chardelay = None;
    }

    /// Whether `kind` is armed
    pub fn is_running(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Tick => self.tick.is_some(),
            TimerKind::CharDelay => self.chardelay.is_some(),
        }
    }

    /// Deadline of `kind` if armed
    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        match kind {
            TimerKind::Tick => self.tick.as_ref().map(|s| s.deadline()),
            TimerKind::CharDelay => self.chardelay.as_ref().map(|s| s.deadline()),
        }
    }

    /// Report the first armed timer that has expired.
    ///
    /// The chardelay flush is checked before the tick so a pending flush
    /// happens before the idle check of the same instant.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<TimerKind> {
        for kind in [TimerKind::CharDelay, TimerKind::Tick] {
            let slot = self.slot(kind);
            if let Some(sleep) = slot.as_mut() {
                if sleep.as_mut().poll(cx).is_ready() {
                    *slot = None;
                    return Poll::Ready(kind);
                }
            }
        }
        Poll::Pending
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("tick", &self.deadline(TimerKind::Tick))
            .field("chardelay", &self.deadline(TimerKind::CharDelay))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let mut timers = TimerService::new();
        timers.start(TimerKind::Tick, TICK);
        assert!(timers.is_running(TimerKind::Tick));

        let start = Instant::now();
        let kind = poll_fn(|cx| timers.poll_expired(cx)).await;
        assert_eq!(kind, TimerKind::Tick);
        assert!(Instant::now() - start >= TICK);
        assert!(!timers.is_running(TimerKind::Tick));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_moves_deadline() {
        let mut timers = TimerService::new();
        timers.start(TimerKind::CharDelay, Duration::from_millis(5));
        let first = timers.deadline(TimerKind::CharDelay).unwrap();
        tokio::time::advance(Duration::from_millis(2)).await;
        timers.start(TimerKind::CharDelay, Duration::from_millis(5));
        let second = timers.deadline(TimerKind::CharDelay).unwrap();
        assert_eq!(second - first, Duration::from_millis(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chardelay_reported_before_tick() {
        let mut timers = TimerService::new();
        timers.start(TimerKind::Tick, Duration::from_millis(1));
        timers.start(TimerKind::CharDelay, Duration::from_millis(1));
        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(
            poll_fn(|cx| timers.poll_expired(cx)).await,
            TimerKind::CharDelay
        );
        assert_eq!(poll_fn(|cx| timers.poll_expired(cx)).await, TimerKind::Tick);
    }

    #[test]
    fn test_stop_all() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut timers = TimerService::new();
            timers.start(TimerKind::Tick, TICK);
            timers.start(TimerKind::CharDelay, TICK);
            timers.stop_all();
            assert!(!timers.is_running(TimerKind::Tick));
            assert!(!timers.is_running(TimerKind::CharDelay));
        });
    }
}
