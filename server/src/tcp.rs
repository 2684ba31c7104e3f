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

//! TCP accepter, connector and network endpoint

use metrics::counter;
use serbridge_service::{Accepter, Candidate, Endpoint};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::task::{Context, Poll};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace, warn};

/// Resolve an accepter string: `[tcp,]host:port`, or a bare port for all
/// interfaces
pub fn parse_accepter(accepter: &str) -> io::Result<SocketAddr> {
    let spec = accepter.trim();
    let spec = spec.strip_prefix("tcp,").unwrap_or(spec);
    if let Ok(port) = spec.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    spec.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("accepter {} resolves to no address", accepter),
        )
    })
}

/// One TCP connection
#[derive(Debug)]
pub struct TcpEndpoint {
    stream: Option<TcpStream>,
}

impl TcpEndpoint {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "unable to set TCP_NODELAY");
        }
        Self {
            stream: Some(stream),
        }
    }

    fn stream(&self) -> io::Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }
}

impl Endpoint for TcpEndpoint {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.try_write(buf)
    }

    fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &self.stream {
            Some(stream) => stream.poll_read_ready(cx),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn poll_write_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &self.stream {
            Some(stream) => stream.poll_write_ready(cx),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            trace!(peer = ?stream.peer_addr().ok(), "closing tcp endpoint");
        }
    }

    fn send_queue_len(&self) -> Option<usize> {
        let stream = self.stream.as_ref()?;
        outq_len(stream)
    }
}

#[cfg(target_os = "linux")]
fn outq_len(stream: &TcpStream) -> Option<usize> {
    use std::os::fd::AsRawFd;
    let mut queued: libc::c_int = 0;
    // SAFETY: the descriptor is owned by `stream` and stays open for the
    // call, and TIOCOUTQ writes one c_int through the pointer.
    let ret = unsafe { libc::ioctl(stream.as_raw_fd(), libc::TIOCOUTQ, &mut queued) };
    if ret < 0 {
        return None;
    }
    usize::try_from(queued).ok()
}

#[cfg(not(target_os = "linux"))]
fn outq_len(_stream: &TcpStream) -> Option<usize> {
    None
}

/// Listening TCP socket of a port
#[derive(Debug)]
pub struct TcpAccepter {
    listener: TcpListener,
    local: Option<String>,
}

impl TcpAccepter {
    /// Bind to an accepter string. Must run inside a tokio runtime.
    pub fn bind(accepter: &str) -> io::Result<Self> {
        let addr = parse_accepter(accepter)?;
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local = listener.local_addr().ok().map(|a| a.to_string());
        debug!(accepter, local = ?local, "tcp accepter bound");
        Ok(Self { listener, local })
    }
}

impl Accepter for TcpAccepter {
    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Candidate>> {
        match self.listener.poll_accept(cx) {
            Poll::Ready(Ok((stream, remote))) => {
                counter!("serbridge.tcp.accepted").increment(1);
                Poll::Ready(Ok(Candidate::new(
                    Box::new(TcpEndpoint::new(stream)),
                    Some(remote),
                )))
            }
            Poll::Ready(Err(e)) => {
                warn!(error = %e, "accept failed");
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn local_addr(&self) -> Option<String> {
        self.local.clone()
    }
}

/// Dial a connect-back target
pub async fn connect(target: String) -> io::Result<Candidate> {
    let stream = TcpStream::connect(target.as_str()).await?;
    let remote = stream.peer_addr().ok();
    counter!("serbridge.tcp.dialed").increment(1);
    debug!(target = %target, "connect-back established");
    let mut candidate = Candidate::new(Box::new(TcpEndpoint::new(stream)), remote);
    if remote.is_none() {
        candidate.remote = target;
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tracing_test::traced_test;

    #[test]
    fn test_parse_accepter_forms() {
        assert_eq!(
            parse_accepter("tcp,127.0.0.1:3001").unwrap(),
            "127.0.0.1:3001".parse().unwrap()
        );
        assert_eq!(
            parse_accepter("127.0.0.1:3002").unwrap(),
            "127.0.0.1:3002".parse().unwrap()
        );
        assert_eq!(
            parse_accepter("3003").unwrap(),
            "0.0.0.0:3003".parse().unwrap()
        );
        assert!(parse_accepter("not an address").is_err());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_accept_and_exchange() {
        let mut accepter = TcpAccepter::bind("127.0.0.1:0").unwrap();
        assert!(logs_contain("tcp accepter bound"));
        let addr = accepter.local_addr().unwrap();
        let mut client = TcpStream::connect(addr.as_str()).await.unwrap();

        let mut candidate = poll_fn(|cx| accepter.poll_accept(cx)).await.unwrap();
        assert!(candidate.remote_addr.is_some());

        client.write_all(b"ping").await.unwrap();
        let endpoint = &mut candidate.endpoint;
        poll_fn(|cx| endpoint.poll_read_ready(cx)).await.unwrap();
        let mut buf = [0u8; 16];
        let n = loop {
            match endpoint.try_read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    poll_fn(|cx| endpoint.poll_read_ready(cx)).await.unwrap();
                }
                Err(e) => panic!("read failed: {}", e),
            }
        };
        assert_eq!(&buf[..n], b"ping");

        poll_fn(|cx| endpoint.poll_write_ready(cx)).await.unwrap();
        assert_eq!(endpoint.try_write(b"pong").unwrap(), 4);
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");

        endpoint.close();
        assert!(endpoint.try_write(b"x").is_err());
        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connect_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let (dialed, accepted) = tokio::join!(connect(target.clone()), listener.accept());
        let candidate = dialed.unwrap();
        accepted.unwrap();
        assert_eq!(candidate.remote, target);
    }
}
