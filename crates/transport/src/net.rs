//! tokio TCP/UDP implementation of the probe exchange

use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, instrument, trace};

use netra_common::{Exchange, NetraError, NetraResult, Protocol, ScanOptions, Transport};

/// Largest response kept per exchange.
pub const MAX_RESPONSE: usize = 64 * 1024;

/// Connect, send one payload, collect the reply.
///
/// A probe's own `totalwaitms`/`tcpwrappedms` override the defaults held
/// here, and `max_wait`, when set, caps both. No retries: a failed exchange
/// is reported and the caller moves on.
#[derive(Debug, Clone)]
pub struct NetTransport {
    total_wait: Duration,
    tcp_wrapped: Duration,
    max_wait: Option<Duration>,
    read_idle: Duration,
    max_response: usize,
}

impl NetTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the default waits from scan options.
    pub fn from_options(options: &ScanOptions) -> Self {
        Self {
            total_wait: options.total_wait,
            tcp_wrapped: options.tcp_wrapped,
            max_wait: options.max_wait,
            ..Self::default()
        }
    }

    pub fn with_total_wait(mut self, wait: Duration) -> Self {
        self.total_wait = wait;
        self
    }

    pub fn with_tcp_wrapped(mut self, wait: Duration) -> Self {
        self.tcp_wrapped = wait;
        self
    }

    pub fn with_max_wait(mut self, cap: Duration) -> Self {
        self.max_wait = Some(cap);
        self
    }

    fn capped(&self, wait: Duration) -> Duration {
        self.max_wait.map_or(wait, |cap| wait.min(cap))
    }

    /// How long a TCP read may stay quiet once some data has arrived.
    pub fn with_read_idle(mut self, idle: Duration) -> Self {
        self.read_idle = idle;
        self
    }

    pub fn with_max_response(mut self, max: usize) -> Self {
        self.max_response = max.max(1);
        self
    }

    #[instrument(skip(self, payload, total_wait, tcp_wrapped), fields(sent = payload.len()))]
    async fn tcp_exchange(
        &self,
        address: &str,
        payload: &[u8],
        total_wait: Duration,
        tcp_wrapped: Duration,
    ) -> NetraResult<Vec<u8>> {
        let deadline = Instant::now() + total_wait;

        let mut stream = timeout_at(deadline, TcpStream::connect(address))
            .await
            .map_err(|_| NetraError::Timeout(format!("connect to {}", address)))??;
        let connected = Instant::now();

        if !payload.is_empty() {
            timeout_at(deadline, stream.write_all(payload))
                .await
                .map_err(|_| NetraError::Timeout(format!("write to {}", address)))??;
        }

        let mut response = Vec::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let wait_until = if response.is_empty() {
                deadline
            } else {
                deadline.min(Instant::now() + self.read_idle)
            };

            match timeout_at(wait_until, stream.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    if response.is_empty() {
                        if connected.elapsed() <= tcp_wrapped {
                            return Err(NetraError::TcpWrapped);
                        }
                        return Err(NetraError::Network(format!("{} closed without data", address)));
                    }
                    break;
                }
                Ok(Ok(n)) => {
                    response.extend_from_slice(&buf[..n]);
                    if response.len() >= self.max_response {
                        response.truncate(self.max_response);
                        trace!("response capped at {} bytes", self.max_response);
                        break;
                    }
                }
                Ok(Err(e)) if response.is_empty() => {
                    if e.kind() == ErrorKind::ConnectionReset && connected.elapsed() <= tcp_wrapped {
                        return Err(NetraError::TcpWrapped);
                    }
                    return Err(e.into());
                }
                Ok(Err(e)) => {
                    debug!("read error after {} bytes: {}", response.len(), e);
                    break;
                }
                Err(_) if response.is_empty() => {
                    return Err(NetraError::Timeout(format!("no response from {}", address)));
                }
                Err(_) => break,
            }
        }

        debug!(received = response.len(), "tcp exchange complete");
        Ok(response)
    }

    #[instrument(skip(self, payload, total_wait), fields(sent = payload.len()))]
    async fn udp_exchange(&self, address: &str, payload: &[u8], total_wait: Duration) -> NetraResult<Vec<u8>> {
        let deadline = Instant::now() + total_wait;

        let peer = timeout_at(deadline, lookup_host(address))
            .await
            .map_err(|_| NetraError::Timeout(format!("resolve {}", address)))??
            .next()
            .ok_or_else(|| NetraError::InvalidTarget(address.to_string()))?;
        let local = if peer.is_ipv4() {
            SocketAddr::from(([0u8; 4], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        socket.send(payload).await?;

        let mut buf = vec![0u8; self.max_response];
        let n = timeout_at(deadline, socket.recv(&mut buf))
            .await
            .map_err(|_| NetraError::Timeout(format!("no datagram from {}", address)))??;
        buf.truncate(n);

        debug!(received = n, "udp exchange complete");
        Ok(buf)
    }
}

impl Default for NetTransport {
    fn default() -> Self {
        Self {
            total_wait: Duration::from_millis(5000),
            tcp_wrapped: Duration::from_millis(2000),
            max_wait: None,
            read_idle: Duration::from_millis(300),
            max_response: MAX_RESPONSE,
        }
    }
}

#[async_trait]
impl Transport for NetTransport {
    async fn exchange(&self, request: &Exchange<'_>) -> NetraResult<Vec<u8>> {
        let total_wait = self.capped(request.total_wait.unwrap_or(self.total_wait));
        match request.protocol {
            Protocol::TCP => {
                let tcp_wrapped = self.capped(request.tcp_wrapped.unwrap_or(self.tcp_wrapped));
                self.tcp_exchange(request.address, request.payload, total_wait, tcp_wrapped)
                    .await
            }
            Protocol::UDP => self.udp_exchange(request.address, request.payload, total_wait).await,
        }
    }

    fn name(&self) -> &str {
        "tcp/udp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn tcp<'a>(address: &'a str, payload: &'a [u8]) -> Exchange<'a> {
        Exchange {
            protocol: Protocol::TCP,
            address,
            payload,
            total_wait: None,
            tcp_wrapped: None,
        }
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn reads_banner_without_sending() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"SSH-2.0-OpenSSH_8.2\r\n").await.unwrap();
        });

        let reply = NetTransport::new().exchange(&tcp(&addr, b"")).await.unwrap();
        assert_eq!(reply, b"SSH-2.0-OpenSSH_8.2\r\n");
    }

    #[tokio::test]
    async fn sends_payload_and_reads_reply() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"GET / HTTP/1.0\r\n\r\n");
            sock.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();
        });

        let reply = NetTransport::new()
            .exchange(&tcp(&addr, b"GET / HTTP/1.0\r\n\r\n"))
            .await
            .unwrap();
        assert_eq!(reply, b"HTTP/1.0 200 OK\r\n\r\n");
    }

    #[tokio::test]
    async fn immediate_close_is_tcpwrapped() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let err = NetTransport::new().exchange(&tcp(&addr, b"")).await.unwrap_err();
        assert!(matches!(err, NetraError::TcpWrapped), "got {:?}", err);
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let request = Exchange {
            total_wait: Some(Duration::from_millis(200)),
            ..tcp(&addr, b"")
        };
        let err = NetTransport::new().exchange(&request).await.unwrap_err();
        assert!(matches!(err, NetraError::Timeout(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn max_wait_caps_probe_declared_wait() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let request = Exchange {
            total_wait: Some(Duration::from_millis(6000)),
            ..tcp(&addr, b"")
        };
        let started = std::time::Instant::now();
        let err = NetTransport::new()
            .with_max_wait(Duration::from_millis(200))
            .exchange(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, NetraError::Timeout(_)), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let (listener, addr) = listener().await;
        drop(listener);

        let err = NetTransport::new().exchange(&tcp(&addr, b"")).await.unwrap_err();
        assert!(err.is_network(), "got {:?}", err);
    }

    #[tokio::test]
    async fn idle_read_returns_early() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"220 ready\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let started = std::time::Instant::now();
        let reply = NetTransport::new()
            .with_read_idle(Duration::from_millis(100))
            .exchange(&tcp(&addr, b""))
            .await
            .unwrap();
        assert_eq!(reply, b"220 ready\r\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn response_is_capped() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = sock.write_all(&[b'A'; 1000]).await;
        });

        let reply = NetTransport::new()
            .with_max_response(16)
            .exchange(&tcp(&addr, b""))
            .await
            .unwrap();
        assert_eq!(reply.len(), 16);
    }

    #[tokio::test]
    async fn udp_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"\0\x06");
            server.send_to(b"\0\x06\x85", peer).await.unwrap();
        });

        let request = Exchange {
            protocol: Protocol::UDP,
            address: &addr,
            payload: b"\0\x06",
            total_wait: Some(Duration::from_secs(2)),
            tcp_wrapped: None,
        };
        let reply = NetTransport::new().exchange(&request).await.unwrap();
        assert_eq!(reply, b"\0\x06\x85");
    }

    #[tokio::test]
    async fn udp_silence_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();

        let request = Exchange {
            protocol: Protocol::UDP,
            address: &addr,
            payload: b"x",
            total_wait: Some(Duration::from_millis(150)),
            tcp_wrapped: None,
        };
        let err = NetTransport::new().exchange(&request).await.unwrap_err();
        assert!(matches!(err, NetraError::Timeout(_)));
        drop(server);
    }

    #[test]
    fn options_set_default_waits() {
        let transport = NetTransport::from_options(&ScanOptions::fast());
        assert_eq!(transport.total_wait, Duration::from_millis(2000));
        assert_eq!(transport.tcp_wrapped, Duration::from_millis(1000));
        assert_eq!(transport.max_response, MAX_RESPONSE);
        assert_eq!(transport.max_wait, Some(Duration::from_millis(3000)));
        assert_eq!(NetTransport::new().capped(Duration::from_secs(9)), Duration::from_secs(9));
    }
}
