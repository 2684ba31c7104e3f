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

//! Lock-free bridge metrics
//!
//! Every update is mirrored to the `metrics` facade under `serbridge.*`
//! names with a `port` label, so an installed recorder sees the same
//! numbers that [`BridgeMetrics::snapshot`] returns.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by all ports of a controller
#[derive(Debug)]
pub struct BridgeMetrics {
    accepted: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,

    dev_bytes_read: AtomicU64,
    dev_bytes_written: AtomicU64,
    net_bytes_read: AtomicU64,
    net_bytes_written: AtomicU64,

    start_failures: AtomicU64,
    inactivity_timeouts: AtomicU64,
    device_errors: AtomicU64,
    connection_errors: AtomicU64,

    total_connection_duration_ns: AtomicU64,
    closed: AtomicU64,

    started_at: Instant,
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    /// Zeroed metrics
    pub fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            active: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dev_bytes_read: AtomicU64::new(0),
            dev_bytes_written: AtomicU64::new(0),
            net_bytes_read: AtomicU64::new(0),
            net_bytes_written: AtomicU64::new(0),
            start_failures: AtomicU64::new(0),
            inactivity_timeouts: AtomicU64::new(0),
            device_errors: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            total_connection_duration_ns: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// A connection took a slot
    pub fn connection_opened(&self, port: &str) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        counter!("serbridge.connections.accepted", "port" => port.to_string()).increment(1);
        gauge!("serbridge.connections.active", "port" => port.to_string()).increment(1.0);
    }

    /// A connection left its slot after `duration`
    pub fn connection_closed(&self, port: &str, duration: Duration) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.closed.fetch_add(1, Ordering::Relaxed);
        self.total_connection_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        gauge!("serbridge.connections.active", "port" => port.to_string()).decrement(1.0);
    }

    /// A candidate was turned away
    pub fn connection_rejected(&self, port: &str) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("serbridge.connections.rejected", "port" => port.to_string()).increment(1);
    }

    /// Bytes read from a device
    pub fn dev_read(&self, port: &str, count: usize) {
        self.dev_bytes_read.fetch_add(count as u64, Ordering::Relaxed);
        counter!("serbridge.dev.bytes_read", "port" => port.to_string()).increment(count as u64);
    }

    /// Bytes written to a device
    pub fn dev_written(&self, port: &str, count: usize) {
        self.dev_bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
        counter!("serbridge.dev.bytes_written", "port" => port.to_string())
            .increment(count as u64);
    }

    /// Bytes read from a network connection
    pub fn net_read(&self, port: &str, count: usize) {
        self.net_bytes_read.fetch_add(count as u64, Ordering::Relaxed);
        counter!("serbridge.net.bytes_read", "port" => port.to_string()).increment(count as u64);
    }

    /// Bytes written to a network connection
    pub fn net_written(&self, port: &str, count: usize) {
        self.net_bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
        counter!("serbridge.net.bytes_written", "port" => port.to_string())
            .increment(count as u64);
    }

    /// Port startup failed
    pub fn start_failure(&self, port: &str) {
        self.start_failures.fetch_add(1, Ordering::Relaxed);
        counter!("serbridge.ports.start_failures", "port" => port.to_string()).increment(1);
    }

    /// A connection went idle past its timeout
    pub fn inactivity_timeout(&self, port: &str) {
        self.inactivity_timeouts.fetch_add(1, Ordering::Relaxed);
        counter!("serbridge.connections.timeouts", "port" => port.to_string()).increment(1);
    }

    /// The device reported an error
    pub fn device_error(&self, port: &str) {
        self.device_errors.fetch_add(1, Ordering::Relaxed);
        counter!("serbridge.dev.errors", "port" => port.to_string()).increment(1);
    }

    /// A network connection reported an error
    pub fn connection_error(&self, port: &str) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
        counter!("serbridge.net.errors", "port" => port.to_string()).increment(1);
    }

    /// Current number of attached connections
    pub fn active_connections(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dev_bytes_read: self.dev_bytes_read.load(Ordering::Relaxed),
            dev_bytes_written: self.dev_bytes_written.load(Ordering::Relaxed),
            net_bytes_read: self.net_bytes_read.load(Ordering::Relaxed),
            net_bytes_written: self.net_bytes_written.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
            inactivity_timeouts: self.inactivity_timeouts.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            avg_connection_duration: self.average_connection_duration(),
        }
    }

    fn average_connection_duration(&self) -> Duration {
        let closed = self.closed.load(Ordering::Relaxed);
        if closed == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.total_connection_duration_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / closed)
    }
}

/// Copy of [`BridgeMetrics`] at one instant
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Connections admitted since start
    pub accepted: u64,
    /// Connections currently attached
    pub active: u64,
    /// Candidates rejected since start
    pub rejected: u64,
    /// Bytes read from devices
    pub dev_bytes_read: u64,
    /// Bytes written to devices
    pub dev_bytes_written: u64,
    /// Bytes read from network connections
    pub net_bytes_read: u64,
    /// Bytes written to network connections
    pub net_bytes_written: u64,
    /// Failed port startups
    pub start_failures: u64,
    /// Connections closed for inactivity
    pub inactivity_timeouts: u64,
    /// Device errors
    pub device_errors: u64,
    /// Network connection errors
    pub connection_errors: u64,
    /// Time since the metrics were created
    pub uptime: Duration,
    /// Mean lifetime of closed connections
    pub avg_connection_duration: Duration,
}

impl MetricsSnapshot {
    /// Device bytes per second, both directions
    pub fn dev_bytes_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        (self.dev_bytes_read + self.dev_bytes_written) as f64 / self.uptime.as_secs_f64()
    }

    /// All errors
    pub fn total_errors(&self) -> u64 {
        self.device_errors + self.connection_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_connection_tracking() {
        let metrics = BridgeMetrics::new();
        metrics.connection_opened("p");
        metrics.connection_opened("p");
        assert_eq!(metrics.active_connections(), 2);

        metrics.connection_closed("p", Duration::from_secs(10));
        metrics.connection_rejected("p");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.accepted, 2);
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.avg_connection_duration, Duration::from_secs(10));
    }

    #[test]
    fn test_byte_and_error_tracking() {
        let metrics = BridgeMetrics::new();
        metrics.dev_read("p", 4);
        metrics.net_written("p", 4);
        metrics.net_read("p", 2);
        metrics.dev_written("p", 2);
        metrics.device_error("p");
        metrics.connection_error("p");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dev_bytes_read, 4);
        assert_eq!(snapshot.net_bytes_written, 4);
        assert_eq!(snapshot.net_bytes_read, 2);
        assert_eq!(snapshot.dev_bytes_written, 2);
        assert_eq!(snapshot.total_errors(), 2);
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = std::sync::Arc::new(BridgeMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.dev_read("p", 10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().dev_bytes_read, 8000);
    }
}
