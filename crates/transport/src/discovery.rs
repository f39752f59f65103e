//! Host liveness checks run before service scanning

use std::io::{self, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Ports tried when ICMP gets no answer.
pub const SWEEP_PORTS: [u16; 7] = [22, 23, 80, 139, 443, 445, 3389];

/// Hosts checked at once. Each check holds up to one socket per sweep port
/// plus one ICMP socket.
pub const DISCOVERY_CONCURRENCY: usize = 16;

const PING_PAYLOAD: [u8; 56] = [0; 56];

/// ICMP echo first, then a TCP connect sweep over a few well-known ports.
///
/// ICMP needs a raw or datagram ICMP socket; without the privilege the ping
/// simply fails and the TCP sweep decides.
#[derive(Debug, Clone)]
pub struct HostDiscovery {
    ports: Vec<u16>,
    connect_timeout: Duration,
    icmp: bool,
    concurrency: usize,
}

impl HostDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, hosts: usize) -> Self {
        self.concurrency = hosts.max(1);
        self
    }

    /// Skip the ICMP echo and go straight to the TCP sweep.
    pub fn without_icmp(mut self) -> Self {
        self.icmp = false;
        self
    }

    /// `Ok(false)` only when every sweep port was refused, unreachable or
    /// silent. A local failure such as running out of sockets is an error,
    /// since it says nothing about the host.
    pub async fn is_alive(&self, ip: IpAddr) -> io::Result<bool> {
        if self.icmp && self.ping(ip).await {
            return Ok(true);
        }
        self.tcp_sweep(ip).await
    }

    /// Keep only the hosts that answer. Hosts whose check failed locally are
    /// kept so that the scan itself decides.
    pub async fn filter_alive(&self, hosts: Vec<IpAddr>) -> Vec<IpAddr> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();
        for (idx, ip) in hosts.into_iter().enumerate() {
            let discovery = self.clone();
            let permits = permits.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (idx, ip, discovery.is_alive(ip).await)
            });
        }

        let mut alive = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, ip, Ok(true))) => alive.push((idx, ip)),
                Ok((_, ip, Ok(false))) => trace!("{} is down", ip),
                Ok((idx, ip, Err(e))) => {
                    warn!("liveness check for {} failed ({}), keeping it", ip, e);
                    alive.push((idx, ip));
                }
                Err(e) => warn!("discovery task failed: {}", e),
            }
        }
        alive.sort_unstable_by_key(|(idx, _)| *idx);
        alive.into_iter().map(|(_, ip)| ip).collect()
    }

    async fn ping(&self, ip: IpAddr) -> bool {
        match timeout(self.connect_timeout, surge_ping::ping(ip, &PING_PAYLOAD)).await {
            Ok(Ok((_packet, rtt))) => {
                debug!("{} answered icmp echo in {:?}", ip, rtt);
                true
            }
            Ok(Err(e)) => {
                trace!("icmp echo to {} failed: {}", ip, e);
                false
            }
            Err(_) => false,
        }
    }

    async fn tcp_sweep(&self, ip: IpAddr) -> io::Result<bool> {
        let mut set = JoinSet::new();
        for &port in &self.ports {
            let wait = self.connect_timeout;
            set.spawn(async move {
                let addr = SocketAddr::new(ip, port);
                match timeout(wait, TcpStream::connect(addr)).await {
                    Ok(Ok(_)) => Ok(true),
                    Ok(Err(e)) if answers_for_host(&e) => Ok(false),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Ok(false),
                }
            });
        }

        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(true)) => {
                    debug!("{} accepted a tcp connection", ip);
                    set.abort_all();
                    return Ok(true);
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => failure = Some(e),
                Err(e) => failure = Some(io::Error::other(e)),
            }
        }
        failure.map_or(Ok(false), Err)
    }
}

/// Connect errors that describe the remote side rather than this process.
fn answers_for_host(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
    )
}

impl Default for HostDiscovery {
    fn default() -> Self {
        Self {
            ports: SWEEP_PORTS.to_vec(),
            connect_timeout: Duration::from_secs(2),
            icmp: true,
            concurrency: DISCOVERY_CONCURRENCY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn defaults() {
        let discovery = HostDiscovery::default();
        assert_eq!(discovery.ports, SWEEP_PORTS.to_vec());
        assert_eq!(discovery.connect_timeout, Duration::from_secs(2));
        assert!(discovery.icmp);
        assert_eq!(discovery.concurrency, DISCOVERY_CONCURRENCY);
    }

    #[tokio::test]
    async fn open_port_marks_host_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let discovery = HostDiscovery::new().without_icmp().with_ports(vec![port]);
        assert!(discovery.is_alive(LOCALHOST).await.unwrap());
    }

    #[tokio::test]
    async fn no_open_port_means_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let discovery = HostDiscovery::new()
            .without_icmp()
            .with_ports(vec![port])
            .with_timeout(Duration::from_millis(200));
        assert!(!discovery.is_alive(LOCALHOST).await.unwrap());
    }

    #[tokio::test]
    async fn filter_keeps_input_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let other = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2));
        let discovery = HostDiscovery::new()
            .without_icmp()
            .with_ports(vec![port])
            .with_timeout(Duration::from_millis(200));
        let alive = discovery.filter_alive(vec![LOCALHOST, other, LOCALHOST]).await;
        assert_eq!(alive, vec![LOCALHOST, LOCALHOST]);
    }

    #[tokio::test]
    async fn many_hosts_are_checked_in_bounded_batches() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                drop(sock);
            }
        });

        let discovery = HostDiscovery::new()
            .without_icmp()
            .with_ports(vec![port])
            .with_concurrency(8);
        let hosts = vec![LOCALHOST; 400];
        let alive = discovery.filter_alive(hosts).await;
        assert_eq!(alive.len(), 400);
    }

    #[test]
    fn local_connect_failures_are_not_closed_ports() {
        assert!(answers_for_host(&io::Error::from(ErrorKind::ConnectionRefused)));
        assert!(answers_for_host(&io::Error::from(ErrorKind::HostUnreachable)));
        assert!(!answers_for_host(&io::Error::new(ErrorKind::Other, "too many open files")));
        assert!(!answers_for_host(&io::Error::from(ErrorKind::OutOfMemory)));
    }
}
