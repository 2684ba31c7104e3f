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

//! Bridge tests over real sockets, with a Unix-domain socket as the device

#![cfg(unix)]

use serbridge_server::{BridgeServer, ServerConfig};
use serbridge_service::{ChardelayConfig, PortConfig, RemoteAddrRule};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct FakeDevice {
    path: PathBuf,
    listener: UnixListener,
}

impl FakeDevice {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "serbridge-it-{}-{}.sock",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        Self { path, listener }
    }

    fn device(&self) -> String {
        format!("unix:{}", self.path.display())
    }

    async fn accept(&self) -> UnixStream {
        let (stream, _) = timeout(WAIT, self.listener.accept()).await.unwrap().unwrap();
        stream
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn accepter_addr(server: &BridgeServer, port: &str) -> String {
    timeout(WAIT, async {
        loop {
            if let Ok(stats) = server.controller().port_stats(port).await {
                if let Some(addr) = stats.accepter_addr {
                    return addr;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

async fn read_exactly<R: AsyncReadExt + Unpin>(reader: &mut R, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(WAIT, reader.read_exact(&mut buf)).await.unwrap().unwrap();
    buf
}

#[tokio::test]
async fn test_raw_bridge_over_tcp() {
    let fake = FakeDevice::new("raw");
    let config = ServerConfig::default().with_port(
        PortConfig::new("raw", "127.0.0.1:0", fake.device())
            .with_chardelay(ChardelayConfig::disabled())
            .with_banner("hello \\p\\r\\n"),
    );
    let server = BridgeServer::start(config).unwrap();
    let addr = accepter_addr(&server, "raw").await;

    let mut client = TcpStream::connect(addr.as_str()).await.unwrap();
    let mut device = fake.accept().await;
    assert_eq!(read_exactly(&mut client, 11).await, b"hello raw\r\n");

    client.write_all(b"ATI\r").await.unwrap();
    assert_eq!(read_exactly(&mut device, 4).await, b"ATI\r");

    device.write_all(b"OK\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 4).await, b"OK\r\n");

    let stats = server.controller().port_stats("raw").await.unwrap();
    assert_eq!(stats.connections(), 1);
    assert!(stats.device_open);

    drop(client);
    let mut rest = Vec::new();
    let n = timeout(WAIT, device.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert_eq!(n, 0, "device is closed when the last client leaves");

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_client_turned_away() {
    let fake = FakeDevice::new("busy");
    let config = ServerConfig::default().with_port(
        PortConfig::new("busy", "127.0.0.1:0", fake.device())
            .with_chardelay(ChardelayConfig::disabled()),
    );
    let server = BridgeServer::start(config).unwrap();
    let addr = accepter_addr(&server, "busy").await;

    let _first = TcpStream::connect(addr.as_str()).await.unwrap();
    let _device = fake.accept().await;

    let mut second = TcpStream::connect(addr.as_str()).await.unwrap();
    let mut notice = Vec::new();
    timeout(WAIT, second.read_to_end(&mut notice)).await.unwrap().unwrap();
    assert_eq!(notice, b"Port already in use\r\n");
    let snapshot = server.metrics();
    assert_eq!(snapshot.rejected, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_back_dials_out() {
    let fake = FakeDevice::new("dial");
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rule = RemoteAddrRule::parse(&target.local_addr().unwrap().to_string()).unwrap();
    let config = ServerConfig::default().with_port(
        PortConfig::new("dial", "127.0.0.1:0", fake.device())
            .with_chardelay(ChardelayConfig::disabled())
            .with_connect_back(vec![rule]),
    );
    let server = BridgeServer::start(config).unwrap();
    let mut device = fake.accept().await;

    device.write_all(b"ALARM\r\n").await.unwrap();
    let (mut session, _) = timeout(WAIT, target.accept()).await.unwrap().unwrap();
    assert_eq!(read_exactly(&mut session, 7).await, b"ALARM\r\n");

    session.write_all(b"ack\r").await.unwrap();
    assert_eq!(read_exactly(&mut device, 4).await, b"ack\r");

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let fake = FakeDevice::new("stop");
    let config = ServerConfig::default().with_port(
        PortConfig::new("stop", "127.0.0.1:0", fake.device()).with_shutdown_timeout(1),
    );
    let server = BridgeServer::start(config).unwrap();
    let addr = accepter_addr(&server, "stop").await;

    let mut client = TcpStream::connect(addr.as_str()).await.unwrap();
    let _device = fake.accept().await;

    timeout(WAIT, server.shutdown()).await.unwrap();
    let mut rest = Vec::new();
    timeout(WAIT, client.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(TcpStream::connect(addr.as_str()).await.is_err());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = ServerConfig::default()
        .with_port(PortConfig::new("a", "127.0.0.1:0", "/dev/null"))
        .with_port(PortConfig::new("a", "127.0.0.1:0", "/dev/null"));
    assert!(BridgeServer::start(config).is_err());
}
