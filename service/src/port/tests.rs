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

use super::*;
use crate::config::{ChardelayConfig, RemoteAddrRule};
use crate::testing::{MockHandle, MockTransport};
use crate::timer::TICK;
use crate::types::{CloseReason, PortNotice};
use serbridge_telnetcodec::consts::{BRK, IAC, SB, SE, WILL, comport, option};
use std::future::poll_fn;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_test::traced_test;

const ACCEPTER: &str = "127.0.0.1:3001";
const DEVICE: &str = "/dev/ttyUSB0";
const CLIENT: &str = "10.0.0.5:40000";

fn raw_config() -> PortConfig {
    PortConfig::new("modem", ACCEPTER, DEVICE).with_chardelay(ChardelayConfig::disabled())
}

struct Harness {
    port: Port,
    transport: Arc<MockTransport>,
    device: MockHandle,
    notices: broadcast::Receiver<PortNotice>,
}

impl Harness {
    fn new(config: PortConfig) -> Self {
        let transport = MockTransport::new();
        let device = transport.device(DEVICE);
        let services = PortServices::new(transport.clone());
        let notices = services.notices.subscribe();
        let mut port = Port::new(config, services, OpTracker::new());
        port.startup();
        Self {
            port,
            transport,
            device,
            notices,
        }
    }

    /// Handle every event that is ready, letting spawned checks and dials run
    async fn settle(&mut self) {
        let mut idle = 0;
        for _ in 0..10_000 {
            let event = poll_fn(|cx| Poll::Ready(match self.port.poll_event(cx) {
                Poll::Ready(event) => Some(event),
                Poll::Pending => None,
            }))
            .await;
            match event {
                Some(event) => {
                    idle = 0;
                    self.port.handle_event(event);
                }
                None if idle < 5 => {
                    idle += 1;
                    tokio::task::yield_now().await;
                }
                None => return,
            }
        }
        panic!("port never went idle");
    }

    async fn connect(&mut self, remote: &str) -> MockHandle {
        let client = self
            .transport
            .connect_client(ACCEPTER, remote)
            .expect("accepter is listening");
        self.settle().await;
        client
    }

    async fn ticks(&mut self, count: u32) {
        for _ in 0..count {
            tokio::time::advance(TICK).await;
            self.settle().await;
        }
    }

    async fn advance(&mut self, by: Duration) {
        tokio::time::advance(by).await;
        self.settle().await;
    }

    fn drain_notices(&mut self) -> Vec<PortNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }
}

fn comport_frame(code: u8, args: &[u8]) -> Vec<u8> {
    let mut frame = vec![IAC, SB, option::COM_PORT, code];
    frame.extend_from_slice(args);
    frame.extend_from_slice(&[IAC, SE]);
    frame
}

#[tokio::test(start_paused = true)]
async fn test_bridges_both_directions_then_times_out() {
    let mut h = Harness::new(raw_config().with_timeout(30));
    assert_eq!(h.port.dev_to_net_state(), TransferState::Unconnected);
    assert!(h.transport.is_listening(ACCEPTER));

    let client = h.connect(CLIENT).await;
    assert_eq!(h.device.opens(), 1);
    assert_eq!(h.port.dev_to_net_state(), TransferState::WaitingInput);

    client.push(b"AT\r");
    h.settle().await;
    assert_eq!(h.device.written(), b"AT\r");

    h.device.push(b"OK\r\n");
    h.settle().await;
    assert_eq!(client.written(), b"OK\r\n");

    h.ticks(29).await;
    assert!(!client.is_closed());
    h.ticks(3).await;
    assert!(client.is_closed());
    assert!(h.device.is_closed());
    assert_eq!(h.port.dev_to_net_state(), TransferState::Unconnected);

    let closed = h.drain_notices().into_iter().any(|n| {
        matches!(n, PortNotice::Disconnected { reason, .. } if reason == CloseReason::InactivityTimeout.to_string())
    });
    assert!(closed);
}

#[tokio::test(start_paused = true)]
async fn test_chardelay_batches_close_bytes() {
    let mut h = Harness::new(PortConfig::new("modem", ACCEPTER, DEVICE));
    let client = h.connect(CLIENT).await;

    h.device.push(b"Hel");
    h.settle().await;
    h.advance(Duration::from_millis(1)).await;
    assert!(client.written().is_empty());

    h.device.push(b"lo");
    h.settle().await;
    h.advance(Duration::from_millis(5)).await;
    assert_eq!(client.writes(), vec![bytes::Bytes::from_static(b"Hello")]);
}

#[tokio::test(start_paused = true)]
async fn test_chardelay_bounded_by_max_hold() {
    let mut h = Harness::new(PortConfig::new("modem", ACCEPTER, DEVICE));
    let client = h.connect(CLIENT).await;

    // A byte every millisecond never lets the line go quiet.
    for _ in 0..25 {
        h.device.push(b"x");
        h.advance(Duration::from_millis(1)).await;
    }
    assert!(!client.written().is_empty());
    assert!(client.written().len() < 25);
}

#[tokio::test(start_paused = true)]
async fn test_sendon_flushes_at_once() {
    let mut h = Harness::new(PortConfig::new("modem", ACCEPTER, DEVICE).with_sendon(&b"\n"[..]));
    let client = h.connect(CLIENT).await;

    h.device.push(b"line\n");
    h.settle().await;
    assert_eq!(client.written(), b"line\n");
}

#[tokio::test(start_paused = true)]
async fn test_slow_client_pauses_device_reads() {
    let mut h = Harness::new(raw_config());
    let client = h.connect(CLIENT).await;
    client.set_write_capacity(Some(3));

    h.device.push(b"abcdefgh");
    h.settle().await;
    assert_eq!(client.written(), b"abc");
    assert_eq!(h.port.dev_to_net_state(), TransferState::WaitingOutputClear);

    h.device.push(b"XYZ");
    h.settle().await;
    assert_eq!(client.written(), b"abc");

    client.grant(5);
    h.settle().await;
    assert_eq!(client.written(), b"abcdefgh");

    client.grant(10);
    h.settle().await;
    assert_eq!(client.written(), b"abcdefghXYZ");
    assert_eq!(h.port.dev_to_net_state(), TransferState::WaitingInput);
}

#[tokio::test(start_paused = true)]
async fn test_slow_device_pauses_network_reads() {
    let mut h = Harness::new(raw_config());
    let client = h.connect(CLIENT).await;
    h.device.set_write_capacity(Some(2));

    client.push(b"hello");
    client.push(b"world");
    h.settle().await;
    assert_eq!(h.device.written(), b"he");
    assert_eq!(h.port.net_to_dev_state(), TransferState::WaitingOutputClear);

    h.device.set_write_capacity(None);
    h.settle().await;
    assert_eq!(h.device.written(), b"helloworld");
    assert_eq!(h.port.net_to_dev_state(), TransferState::WaitingInput);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_disallowed_address_is_rejected() {
    let rule = RemoteAddrRule::parse("10.1.1.1").unwrap();
    let mut h = Harness::new(raw_config().with_allowed(vec![rule]));

    let client = h.connect(CLIENT).await;
    assert_eq!(client.written(), b"Access denied\r\n");
    assert!(client.is_closed());
    assert_eq!(h.device.opens(), 0);
    assert!(logs_contain("connection rejected"));

    let allowed = h.connect("10.1.1.1:1234").await;
    assert!(!allowed.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_full_port_turns_away_new_clients() {
    let mut h = Harness::new(raw_config());
    let first = h.connect(CLIENT).await;
    let second = h.connect("10.0.0.6:40001").await;

    assert!(!first.is_closed());
    assert_eq!(second.written(), b"Port already in use\r\n");
    assert!(second.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_rejection_notice_waits_for_writability() {
    let mut h = Harness::new(raw_config());
    let _first = h.connect(CLIENT).await;

    let second = h
        .transport
        .connect_client(ACCEPTER, "10.0.0.6:40001")
        .expect("accepter is listening");
    second.set_write_capacity(Some(0));
    h.settle().await;
    assert!(second.written().is_empty());
    assert!(!second.is_closed());
    assert_eq!(h.port.tracker.outstanding(), 1);

    second.grant(64);
    h.settle().await;
    assert_eq!(second.written(), b"Port already in use\r\n");
    assert!(second.is_closed());
    assert_eq!(h.port.tracker.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_notice_gives_up_after_timeout() {
    let mut h = Harness::new(raw_config());
    let _first = h.connect(CLIENT).await;

    let second = h
        .transport
        .connect_client(ACCEPTER, "10.0.0.6:40001")
        .expect("accepter is listening");
    second.set_write_capacity(Some(0));
    h.settle().await;
    assert!(!second.is_closed());

    h.advance(Duration::from_secs(3)).await;
    assert!(second.is_closed());
    assert!(second.written().is_empty());
    assert_eq!(h.port.tracker.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_kick_old_user_hands_over_slot() {
    let mut h = Harness::new(raw_config().with_kick_old_user(true));
    let first = h.connect(CLIENT).await;
    let second = h.connect("10.0.0.6:40001").await;

    assert_eq!(first.written(), b"kicked off, new user is coming\r\n");
    assert!(first.is_closed());
    assert!(!second.is_closed());

    let stats = h.port.stats();
    assert_eq!(stats.connections(), 1);
    assert_eq!(stats.slots[0].remote, "10.0.0.6:40001");
    // The device stays open across the hand-over.
    assert_eq!(h.device.opens(), 1);

    h.device.push(b"hi");
    h.settle().await;
    assert_eq!(second.written(), b"hi");
}

#[tokio::test(start_paused = true)]
async fn test_raw_port_passes_iac_through() {
    let mut h = Harness::new(raw_config());
    let client = h.connect(CLIENT).await;

    client.push(&[0x41, IAC, 0x42]);
    h.device.push(&[IAC, IAC]);
    h.settle().await;
    assert_eq!(h.device.written(), vec![0x41, IAC, 0x42]);
    assert_eq!(client.written(), vec![IAC, IAC]);
}

#[tokio::test(start_paused = true)]
async fn test_telnet_port_escapes_device_data() {
    let mut h = Harness::new(raw_config().with_telnet(true));
    let client = h.connect(CLIENT).await;
    assert!(client.written().starts_with(&[IAC, WILL]));
    client.take_written();

    h.device.push(&[0x41, IAC, 0x42]);
    h.settle().await;
    assert_eq!(client.written(), vec![0x41, IAC, IAC, 0x42]);

    client.push(&[b'a', IAC, IAC, b'b', IAC, BRK]);
    h.settle().await;
    assert_eq!(h.device.written(), vec![b'a', IAC, b'b']);
    assert_eq!(h.device.breaks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rfc2217_set_baud_rate() {
    let mut h = Harness::new(raw_config().with_telnet(true));
    let client = h.connect(CLIENT).await;
    client.push(&[IAC, WILL, option::COM_PORT]);
    h.settle().await;
    client.take_written();

    client.push(&comport_frame(comport::SET_BAUDRATE, &19200u32.to_be_bytes()));
    h.settle().await;

    assert_eq!(h.device.serial().baud, 19200);
    assert_eq!(h.port.serial.baud, 19200);
    assert_eq!(h.port.chardelay_window, Duration::from_micros(1041));
    let reply = comport_frame(comport::SET_BAUDRATE + comport::SERVER_OFFSET, &19200u32.to_be_bytes());
    assert_eq!(client.written(), reply);
}

#[tokio::test(start_paused = true)]
async fn test_rfc2217_signature_query() {
    let mut h = Harness::new(raw_config().with_telnet(true).with_signature("bridge \\p"));
    let client = h.connect(CLIENT).await;
    client.take_written();

    client.push(&comport_frame(comport::SIGNATURE, &[]));
    h.settle().await;
    let reply = comport_frame(comport::SIGNATURE + comport::SERVER_OFFSET, b"bridge modem");
    assert_eq!(client.written(), reply);
}

#[tokio::test(start_paused = true)]
async fn test_modemstate_notified_on_change_only() {
    let mut h = Harness::new(raw_config().with_telnet(true));
    let client = h.connect(CLIENT).await;
    client.push(&[IAC, WILL, option::COM_PORT]);
    h.settle().await;
    client.take_written();

    h.device.set_modem_state(0x30);
    h.ticks(1).await;
    let notify = comport::NOTIFY_MODEMSTATE + comport::SERVER_OFFSET;
    assert_eq!(client.take_written(), comport_frame(notify, &[0x30]));

    h.ticks(2).await;
    assert!(client.take_written().is_empty());

    h.device.set_modem_state(0xB0);
    h.ticks(1).await;
    assert_eq!(client.take_written(), comport_frame(notify, &[0xB8]));
}

#[tokio::test(start_paused = true)]
async fn test_modemstate_mask_filters_notifications() {
    let mut h = Harness::new(raw_config().with_telnet(true));
    let client = h.connect(CLIENT).await;
    client.push(&[IAC, WILL, option::COM_PORT]);
    client.push(&comport_frame(comport::SET_MODEMSTATE_MASK, &[0x80]));
    h.settle().await;
    client.take_written();

    h.device.set_modem_state(0x10);
    h.ticks(1).await;
    let notify = comport::NOTIFY_MODEMSTATE + comport::SERVER_OFFSET;
    assert_eq!(client.take_written(), comport_frame(notify, &[0x00]));

    // CTS is masked out.
    h.device.set_modem_state(0x00);
    h.ticks(1).await;
    assert!(client.take_written().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_closeon_ends_session_after_sequence() {
    let mut h = Harness::new(raw_config().with_closeon(&b"BYE"[..]));
    let client = h.connect(CLIENT).await;

    h.device.push(b"ok BYE trailing");
    h.settle().await;
    assert_eq!(client.written(), b"ok BYE");
    assert!(client.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_closeon_partial_match_before_sequence() {
    let mut h = Harness::new(raw_config().with_closeon(&b"aab"[..]));
    let client = h.connect(CLIENT).await;

    h.device.push(b"xaaab tail");
    h.settle().await;
    assert_eq!(client.written(), b"xaaab");
    assert!(client.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_suspended_client_does_not_stall_others() {
    let mut h = Harness::new(raw_config().with_telnet(true).with_max_connections(2));
    let suspended = h.connect(CLIENT).await;
    let other = h.connect("10.0.0.6:40001").await;
    suspended.push(&[IAC, WILL, option::COM_PORT]);
    suspended.push(&comport_frame(comport::FLOWCONTROL_SUSPEND, &[]));
    h.settle().await;
    suspended.take_written();
    other.take_written();

    h.device.push(b"one");
    h.settle().await;
    h.device.push(b"two");
    h.settle().await;
    assert_eq!(other.take_written(), b"onetwo");
    assert!(suspended.written().is_empty());
    assert_eq!(h.port.dev_to_net_state(), TransferState::WaitingInput);

    suspended.push(&comport_frame(comport::FLOWCONTROL_RESUME, &[]));
    h.settle().await;
    assert_eq!(suspended.take_written(), b"onetwo");

    h.device.push(b"three");
    h.settle().await;
    assert_eq!(suspended.written(), b"three");
    assert_eq!(other.written(), b"three");
}

#[tokio::test(start_paused = true)]
async fn test_queued_output_counts_as_activity() {
    let mut h = Harness::new(raw_config().with_timeout(5).with_timeout_on_os_queue(true));
    let client = h.connect(CLIENT).await;
    client.set_queue_len(Some(128));

    h.ticks(8).await;
    assert!(!client.is_closed());

    client.set_queue_len(Some(0));
    h.ticks(6).await;
    assert!(client.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_queued_output_ignored_unless_enabled() {
    let mut h = Harness::new(raw_config().with_timeout(5));
    let client = h.connect(CLIENT).await;
    client.set_queue_len(Some(128));

    h.ticks(6).await;
    assert!(client.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_open_and_close_strings() {
    let mut h = Harness::new(
        raw_config()
            .with_openstr("ATZ\\r")
            .with_closestr("ATH\\r"),
    );
    let client = h.connect(CLIENT).await;
    assert_eq!(h.device.written(), b"ATZ\r");

    client.push_eof();
    h.settle().await;
    assert_eq!(h.device.written(), b"ATZ\rATH\r");
    assert!(h.device.is_closed());
    assert_eq!(h.port.net_to_dev_state(), TransferState::Unconnected);
}

#[tokio::test(start_paused = true)]
async fn test_banner_precedes_data() {
    let mut h = Harness::new(raw_config().with_banner("welcome to \\p\\r\\n"));
    let client = h.connect(CLIENT).await;
    h.device.push(b"data");
    h.settle().await;
    assert_eq!(client.written(), b"welcome to modem\r\ndata");
}

#[tokio::test(start_paused = true)]
async fn test_connect_back_dials_on_device_data() {
    let rule = RemoteAddrRule::parse("!10.9.9.9:5000").unwrap();
    let mut h = Harness::new(raw_config().with_connect_back(vec![rule]));
    assert_eq!(h.device.opens(), 1);

    h.device.push(b"ALERT");
    h.settle().await;

    let dialed = h.transport.dialed("10.9.9.9:5000");
    assert_eq!(dialed.len(), 1);
    assert_eq!(dialed[0].written(), b"ALERT");
    assert!(h.port.stats().slots[0].connect_back);
}

#[tokio::test(start_paused = true)]
async fn test_connect_back_failure_pauses_reads() {
    let rule = RemoteAddrRule::parse("!10.9.9.9:5000").unwrap();
    let mut h = Harness::new(
        raw_config()
            .with_connect_back(vec![rule])
            .with_connback_timeout(3),
    );
    h.transport.set_unreachable("10.9.9.9:5000", true);

    h.device.push(b"one");
    h.settle().await;
    assert_eq!(h.port.nocon_read_enable_time_left, 3);

    h.transport.set_unreachable("10.9.9.9:5000", false);
    h.device.push(b"two");
    h.ticks(1).await;
    assert!(h.transport.dialed("10.9.9.9:5000").is_empty());

    h.ticks(3).await;
    let dialed = h.transport.dialed("10.9.9.9:5000");
    assert_eq!(dialed.len(), 1);
    assert_eq!(dialed[0].written(), b"onetwo");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent() {
    let mut h = Harness::new(raw_config());
    let client = h.connect(CLIENT).await;

    h.port.shutdown_port("operator request", PendingOp::Disable);
    h.port.shutdown_port("operator request", PendingOp::Disable);
    h.settle().await;

    assert!(client.is_closed());
    assert!(!h.transport.is_listening(ACCEPTER));
    assert_eq!(h.port.dev_to_net_state(), TransferState::Closed);
    let shut_down = h
        .drain_notices()
        .into_iter()
        .filter(|n| matches!(n, PortNotice::ShutDown { .. }))
        .count();
    assert_eq!(shut_down, 1);

    h.port.start();
    assert_eq!(h.port.dev_to_net_state(), TransferState::Unconnected);
    assert!(h.transport.is_listening(ACCEPTER));
}

#[tokio::test(start_paused = true)]
async fn test_delete_drains_before_release() {
    let mut h = Harness::new(raw_config());
    let client = h.connect(CLIENT).await;
    client.set_write_capacity(Some(0));
    h.device.push(b"last words");
    h.settle().await;

    h.port.deleted = true;
    h.port.shutdown_port("port deleted", PendingOp::Delete);
    assert!(h.port.is_shutting_down());
    assert!(!client.is_closed());

    client.grant(64);
    h.settle().await;
    assert_eq!(client.written(), b"last words");
    assert!(client.is_closed());
    assert!(h.port.is_released());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout_forces_release() {
    let mut h = Harness::new(raw_config().with_shutdown_timeout(2));
    let client = h.connect(CLIENT).await;
    client.set_write_capacity(Some(0));
    h.device.push(b"stuck");
    h.settle().await;

    h.port.shutdown_port("port deleted", PendingOp::Delete);
    h.ticks(1).await;
    assert!(!client.is_closed());
    h.ticks(2).await;
    assert!(client.is_closed());
    assert!(h.port.released);
}

#[tokio::test(start_paused = true)]
async fn test_device_failure_restarts_port() {
    let mut h = Harness::new(raw_config());
    let client = h.connect(CLIENT).await;

    h.device.fail_reads(std::io::ErrorKind::BrokenPipe);
    h.settle().await;

    assert!(client.is_closed());
    assert_eq!(h.transport.binds(), 2);
    assert_eq!(h.port.dev_to_net_state(), TransferState::Unconnected);
    assert_eq!(h.port.services.metrics.snapshot().device_errors, 1);

    let again = h.connect("10.0.0.7:40002").await;
    assert!(!again.is_closed());
    assert_eq!(h.device.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_startup_retries_after_bind_failure() {
    let transport = MockTransport::new();
    transport.fail_bind(true);
    let services = PortServices::new(transport.clone());
    let mut port = Port::new(raw_config().with_retry_times(2, 2), services, OpTracker::new());
    port.startup();
    assert_eq!(port.dev_to_net_state(), TransferState::NotStarted);
    assert_eq!(port.retry_startup_counter, 1);

    transport.fail_bind(false);
    let mut h = Harness {
        device: transport.device(DEVICE),
        notices: port.services.notices.subscribe(),
        transport,
        port,
    };
    h.ticks(2).await;
    assert_eq!(h.port.dev_to_net_state(), TransferState::Unconnected);
    assert!(h.transport.is_listening(ACCEPTER));
}

#[tokio::test(start_paused = true)]
async fn test_reconfigure_waits_for_idle() {
    let mut h = Harness::new(raw_config());
    let client = h.connect(CLIENT).await;

    h.port.reconfigure(raw_config().with_timeout(5));
    assert!(h.port.stats().new_config_pending);
    assert_eq!(h.port.config().timeout, 0);

    client.push_eof();
    h.settle().await;
    assert!(!h.port.stats().new_config_pending);
    assert_eq!(h.port.config().timeout, 5);
    assert!(h.transport.is_listening(ACCEPTER));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_direction_discards() {
    let mut h = Harness::new(raw_config().with_directions(true, false));
    let client = h.connect(CLIENT).await;

    client.push(b"ignored");
    h.device.push(b"shown");
    h.settle().await;
    assert!(h.device.written().is_empty());
    assert_eq!(client.written(), b"shown");
}

#[tokio::test(start_paused = true)]
async fn test_monitor_sees_both_directions() {
    let mut h = Harness::new(raw_config());
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    h.port.attach_monitor(Direction::NetToDev, tx);
    let client = h.connect(CLIENT).await;

    client.push(b"ping");
    h.settle().await;
    assert_eq!(rx.recv().await.unwrap(), bytes::Bytes::from_static(b"ping"));
}
