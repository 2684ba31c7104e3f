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

//! In-memory endpoints and transport for driving ports without sockets
//!
//! A [`MockHandle`] is the test's side of an endpoint: it scripts inbound
//! bytes, throttles writes and inspects what was written. [`MockTransport`]
//! hands out such endpoints as devices, accepted clients and dialed
//! connect-back sessions.

use crate::config::{PortConfig, SerialParams};
use crate::endpoint::{
    Accepter, Candidate, DeviceEndpoint, Endpoint, SerialRequest, SerialShadow, Transport,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

#[derive(Debug)]
struct EndpointState {
    inbound: VecDeque<Bytes>,
    eof: bool,
    read_error: Option<io::ErrorKind>,
    write_error: Option<io::ErrorKind>,
    write_capacity: Option<usize>,
    written: Vec<u8>,
    writes: Vec<Bytes>,
    closed: bool,
    opens: usize,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
    queue_len: Option<usize>,
    breaks: usize,
    modem_state: Option<u8>,
    line_state: Option<u8>,
    shadow: SerialShadow,
    purges: Vec<u8>,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            inbound: VecDeque::new(),
            eof: false,
            read_error: None,
            write_error: None,
            write_capacity: None,
            written: Vec::new(),
            writes: Vec::new(),
            closed: false,
            opens: 0,
            read_waker: None,
            write_waker: None,
            queue_len: None,
            breaks: 0,
            modem_state: None,
            line_state: None,
            shadow: SerialShadow::new(SerialParams::default()),
            purges: Vec::new(),
        }
    }
}

impl EndpointState {
    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }
}

/// Test-side handle of an in-memory endpoint
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<EndpointState>>,
}

impl MockHandle {
    /// New endpoint with nothing scripted and unlimited write capacity
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EndpointState> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The engine's side of this endpoint
    pub fn endpoint(&self) -> MockEndpoint {
        MockEndpoint {
            handle: self.clone(),
        }
    }

    /// Script one inbound chunk; each chunk is returned by a separate read
    pub fn push(&self, data: &[u8]) {
        let mut state = self.lock();
        state.inbound.push_back(Bytes::copy_from_slice(data));
        state.wake_reader();
    }

    /// End the inbound stream once scripted chunks are consumed
    pub fn push_eof(&self) {
        let mut state = self.lock();
        state.eof = true;
        state.wake_reader();
    }

    /// Make the next read fail with `kind`
    pub fn fail_reads(&self, kind: io::ErrorKind) {
        let mut state = self.lock();
        state.read_error = Some(kind);
        state.wake_reader();
    }

    /// Make every write fail with `kind`
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        let mut state = self.lock();
        state.write_error = Some(kind);
        state.wake_writer();
    }

    /// Limit how many more bytes writes accept; `None` removes the limit
    pub fn set_write_capacity(&self, capacity: Option<usize>) {
        let mut state = self.lock();
        state.write_capacity = capacity;
        if capacity != Some(0) {
            state.wake_writer();
        }
    }

    /// Allow `bytes` more bytes to be written
    pub fn grant(&self, bytes: usize) {
        let mut state = self.lock();
        state.write_capacity = Some(state.write_capacity.unwrap_or(0) + bytes);
        state.wake_writer();
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Each successful write call
    pub fn writes(&self) -> Vec<Bytes> {
        self.lock().writes.clone()
    }

    /// Take and clear everything written so far
    pub fn take_written(&self) -> Vec<u8> {
        let mut state = self.lock();
        state.writes.clear();
        std::mem::take(&mut state.written)
    }

    /// Whether the engine closed the endpoint
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// How often the endpoint was opened as a device
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Breaks sent to the device
    pub fn breaks(&self) -> usize {
        self.lock().breaks
    }

    /// Set the modem state the device reports
    pub fn set_modem_state(&self, state: u8) {
        self.lock().modem_state = Some(state);
    }

    /// Set the line state the device reports
    pub fn set_line_state(&self, state: u8) {
        self.lock().line_state = Some(state);
    }

    /// Set the OS queue length reported for `timeout_on_os_queue`
    pub fn set_queue_len(&self, len: Option<usize>) {
        self.lock().queue_len = len;
    }

    /// Line settings the device currently runs at
    pub fn serial(&self) -> SerialParams {
        self.lock().shadow.params
    }

    /// PURGE-DATA selectors received
    pub fn purges(&self) -> Vec<u8> {
        self.lock().purges.clone()
    }
}

/// Engine side of a [`MockHandle`]
#[derive(Debug)]
pub struct MockEndpoint {
    handle: MockHandle,
}

impl Endpoint for MockEndpoint {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.handle.lock();
        if state.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if let Some(kind) = state.read_error.take() {
            return Err(kind.into());
        }
        match state.inbound.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.inbound.push_front(chunk.slice(n..));
                }
                Ok(n)
            }
            None if state.eof => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.handle.lock();
        if state.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if let Some(kind) = state.write_error {
            return Err(kind.into());
        }
        let n = match state.write_capacity {
            Some(capacity) => capacity.min(buf.len()),
            None => buf.len(),
        };
        if n == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        if let Some(capacity) = state.write_capacity.as_mut() {
            *capacity -= n;
        }
        state.written.extend_from_slice(&buf[..n]);
        state.writes.push(Bytes::copy_from_slice(&buf[..n]));
        Ok(n)
    }

    fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = self.handle.lock();
        if !state.inbound.is_empty() || state.eof || state.read_error.is_some() || state.closed {
            Poll::Ready(Ok(()))
        } else {
            state.read_waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }

    fn poll_write_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = self.handle.lock();
        if state.write_capacity != Some(0) || state.write_error.is_some() || state.closed {
            Poll::Ready(Ok(()))
        } else {
            state.write_waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }

    fn close(&mut self) {
        let mut state = self.handle.lock();
        state.closed = true;
        state.wake_reader();
        state.wake_writer();
    }

    fn send_queue_len(&self) -> Option<usize> {
        self.handle.lock().queue_len
    }
}

impl DeviceEndpoint for MockEndpoint {
    fn send_break(&mut self) -> io::Result<()> {
        self.handle.lock().breaks += 1;
        Ok(())
    }

    fn serial_control(&mut self, request: SerialRequest) -> io::Result<u32> {
        Ok(self.handle.lock().shadow.apply(request))
    }

    fn modem_state(&mut self) -> io::Result<Option<u8>> {
        Ok(self.handle.lock().modem_state)
    }

    fn line_state(&mut self) -> io::Result<Option<u8>> {
        Ok(self.handle.lock().line_state)
    }

    fn purge(&mut self, which: u8) -> io::Result<()> {
        self.handle.lock().purges.push(which);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AccepterState {
    pending: VecDeque<Candidate>,
    waker: Option<Waker>,
    closed: bool,
}

/// Accepter fed by [`MockTransport::connect_client`]
#[derive(Debug)]
pub struct MockAccepter {
    addr: String,
    state: Arc<Mutex<AccepterState>>,
}

impl Accepter for MockAccepter {
    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Candidate>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.pending.pop_front() {
            Some(candidate) => Poll::Ready(Ok(candidate)),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    fn local_addr(&self) -> Option<String> {
        Some(self.addr.clone())
    }
}

impl Drop for MockAccepter {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        state.pending.clear();
    }
}

#[derive(Debug, Default)]
struct TransportState {
    devices: HashMap<String, MockHandle>,
    device_fails: bool,
    bind_fails: bool,
    accepters: HashMap<String, Arc<Mutex<AccepterState>>>,
    binds: usize,
    unreachable: Vec<String>,
    dialed: HashMap<String, Vec<MockHandle>>,
}

/// Transport producing [`MockEndpoint`]s
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<TransportState>,
}

impl MockTransport {
    /// New transport where everything succeeds
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle of the device named `device`, created on first use
    pub fn device(&self, device: &str) -> MockHandle {
        self.lock()
            .devices
            .entry(device.to_string())
            .or_default()
            .clone()
    }

    /// Make device opens fail
    pub fn fail_device_open(&self, fail: bool) {
        self.lock().device_fails = fail;
    }

    /// Make binds fail
    pub fn fail_bind(&self, fail: bool) {
        self.lock().bind_fails = fail;
    }

    /// Successful binds so far
    pub fn binds(&self) -> usize {
        self.lock().binds
    }

    /// Whether something listens on `accepter`
    pub fn is_listening(&self, accepter: &str) -> bool {
        self.lock()
            .accepters
            .get(accepter)
            .map(|s| !s.lock().unwrap_or_else(|e| e.into_inner()).closed)
            .unwrap_or(false)
    }

    /// Connect a client from `remote` to the accepter bound on `accepter`
    pub fn connect_client(&self, accepter: &str, remote: &str) -> Option<MockHandle> {
        let state = self.lock().accepters.get(accepter).cloned()?;
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return None;
        }
        let handle = MockHandle::new();
        let mut candidate = Candidate::new(
            Box::new(handle.endpoint()),
            remote.parse::<SocketAddr>().ok(),
        );
        candidate.remote = remote.to_string();
        state.pending.push_back(candidate);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
        Some(handle)
    }

    /// Make dials to `target` fail
    pub fn set_unreachable(&self, target: &str, unreachable: bool) {
        let mut state = self.lock();
        state.unreachable.retain(|t| t != target);
        if unreachable {
            state.unreachable.push(target.to_string());
        }
    }

    /// Sessions dialed to `target`, oldest first
    pub fn dialed(&self, target: &str) -> Vec<MockHandle> {
        self.lock().dialed.get(target).cloned().unwrap_or_default()
    }
}

impl Transport for MockTransport {
    fn open_device(&self, config: &PortConfig) -> io::Result<Box<dyn DeviceEndpoint>> {
        let mut state = self.lock();
        if state.device_fails {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        let handle = state.devices.entry(config.device.clone()).or_default().clone();
        drop(state);
        {
            let mut device = handle.lock();
            device.closed = false;
            device.opens += 1;
            device.shadow = SerialShadow::new(config.serial);
        }
        Ok(Box::new(handle.endpoint()))
    }

    fn bind(&self, accepter: &str) -> io::Result<Box<dyn Accepter>> {
        let mut state = self.lock();
        if state.bind_fails {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "address in use"));
        }
        state.binds += 1;
        let shared = Arc::new(Mutex::new(AccepterState::default()));
        state.accepters.insert(accepter.to_string(), shared.clone());
        Ok(Box::new(MockAccepter {
            addr: accepter.to_string(),
            state: shared,
        }))
    }

    fn connect(&self, target: &str) -> BoxFuture<'static, io::Result<Candidate>> {
        let mut state = self.lock();
        let result = if state.unreachable.iter().any(|t| t == target) {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
        } else {
            let handle = MockHandle::new();
            state
                .dialed
                .entry(target.to_string())
                .or_default()
                .push(handle.clone());
            let mut candidate = Candidate::new(
                Box::new(handle.endpoint()),
                target.parse::<SocketAddr>().ok(),
            );
            candidate.remote = target.to_string();
            Ok(candidate)
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;

    #[tokio::test]
    async fn test_scripted_reads_and_throttled_writes() {
        let handle = MockHandle::new();
        let mut endpoint = handle.endpoint();
        handle.push(b"abcdef");

        poll_fn(|cx| endpoint.poll_read_ready(cx)).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(endpoint.try_read(&mut buf).unwrap(), 4);
        assert_eq!(endpoint.try_read(&mut buf).unwrap(), 2);
        assert_eq!(
            endpoint.try_read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );

        handle.set_write_capacity(Some(3));
        assert_eq!(endpoint.try_write(b"hello").unwrap(), 3);
        assert_eq!(
            endpoint.try_write(b"lo").unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        handle.grant(2);
        assert_eq!(endpoint.try_write(b"lo").unwrap(), 2);
        assert_eq!(handle.written(), b"hello");
    }

    #[tokio::test]
    async fn test_transport_accepts_clients() {
        let transport = MockTransport::new();
        let mut accepter = transport.bind("127.0.0.1:2000").unwrap();
        assert!(transport.is_listening("127.0.0.1:2000"));
        transport
            .connect_client("127.0.0.1:2000", "10.0.0.1:5000")
            .unwrap();
        let candidate = poll_fn(|cx| accepter.poll_accept(cx)).await.unwrap();
        assert_eq!(candidate.remote, "10.0.0.1:5000");
        drop(accepter);
        assert!(!transport.is_listening("127.0.0.1:2000"));
    }
}
