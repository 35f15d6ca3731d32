//! TCP connect probing of a short list of well-known ports

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

/// FTP, SSH, Telnet, DNS, HTTP, HTTPS, SMB, MS RPC, NetBIOS, RDP, VNC, HTTP-Proxy
pub const DEFAULT_PORTS: [u16; 12] = [21, 22, 23, 53, 80, 443, 445, 135, 139, 3389, 5900, 8080];

/// Establishes (and immediately drops) one TCP connection.
///
/// Returns `true` when the connection completed. Timeouts are applied by the
/// caller, so implementations may wait indefinitely.
#[async_trait]
pub trait TcpConnector: Send + Sync {
    async fn connect(&self, addr: SocketAddrV4) -> bool;
}

/// Non-blocking connect on a raw socket, completed through the tokio reactor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketConnector;

#[async_trait]
impl TcpConnector for SocketConnector {
    async fn connect(&self, addr: SocketAddrV4) -> bool {
        match connect_nonblocking(addr).await {
            Ok(open) => open,
            Err(e) => {
                // Usually descriptor exhaustion; the port is reported closed.
                tracing::debug!("Connect to {} could not be attempted: {}", addr, e);
                false
            }
        }
    }
}

async fn connect_nonblocking(addr: SocketAddrV4) -> io::Result<bool> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;

    match socket.connect(&SockAddr::from(SocketAddr::V4(addr))) {
        Ok(()) => return Ok(true),
        Err(e) if is_in_progress(&e) => {}
        Err(_) => return Ok(false),
    }

    let stream = tokio::net::TcpStream::from_std(std::net::TcpStream::from(socket))?;
    stream.writable().await?;

    // SO_ERROR tells a completed handshake apart from a refused one
    Ok(stream.take_error()?.is_none())
}

fn is_in_progress(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if e.raw_os_error() == Some(libc::EINPROGRESS) {
            return true;
        }
    }
    e.kind() == io::ErrorKind::WouldBlock
}

/// Probes ports one at a time so a host scan holds at most one socket.
#[derive(Clone)]
pub struct PortProber {
    connector: Arc<dyn TcpConnector>,
}

impl PortProber {
    pub fn new(connector: Arc<dyn TcpConnector>) -> Self {
        Self { connector }
    }

    /// Ports of `ip` that accepted a connection within `per_port_timeout`,
    /// in probe order.
    pub async fn probe(&self, ip: Ipv4Addr, ports: &[u16], per_port_timeout: Duration) -> Vec<u16> {
        let mut open = Vec::new();
        let mut attempted = HashSet::with_capacity(ports.len());

        for &port in ports {
            if !attempted.insert(port) {
                continue;
            }

            let addr = SocketAddrV4::new(ip, port);
            match tokio::time::timeout(per_port_timeout, self.connector.connect(addr)).await {
                Ok(true) => {
                    tracing::trace!("{} open", addr);
                    open.push(port);
                }
                Ok(false) => tracing::trace!("{} closed", addr),
                Err(_) => tracing::trace!("{} timed out", addr),
            }
        }

        open
    }
}

impl Default for PortProber {
    fn default() -> Self {
        Self::new(Arc::new(SocketConnector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connector with a fixed delay and verdict per port
    struct ScriptedConnector {
        ports: HashMap<u16, (Duration, bool)>,
    }

    #[async_trait]
    impl TcpConnector for ScriptedConnector {
        async fn connect(&self, addr: SocketAddrV4) -> bool {
            match self.ports.get(&addr.port()) {
                Some(&(delay, open)) => {
                    tokio::time::sleep(delay).await;
                    open
                }
                None => false,
            }
        }
    }

    fn scripted(ports: &[(u16, u64, bool)]) -> PortProber {
        let ports = ports
            .iter()
            .map(|&(port, delay_ms, open)| (port, (Duration::from_millis(delay_ms), open)))
            .collect();
        PortProber::new(Arc::new(ScriptedConnector { ports }))
    }

    #[tokio::test]
    async fn test_slow_connect_counts_as_closed() {
        let prober = scripted(&[(80, 200, true)]);
        let open = prober
            .probe(Ipv4Addr::new(10, 0, 0, 1), &[80], Duration::from_millis(50))
            .await;
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn test_open_ports_keep_probe_order() {
        let prober = scripted(&[(8080, 0, true), (22, 0, true), (443, 0, false), (80, 5, true)]);
        let open = prober
            .probe(
                Ipv4Addr::new(10, 0, 0, 1),
                &[8080, 443, 22, 80, 22],
                Duration::from_millis(100),
            )
            .await;
        assert_eq!(open, vec![8080, 22, 80]);
    }

    /// Always refuses and counts attempts
    #[derive(Default)]
    struct RefusingConnector {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl TcpConnector for RefusingConnector {
        async fn connect(&self, _addr: SocketAddrV4) -> bool {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[tokio::test]
    async fn test_duplicate_closed_port_is_attempted_once() {
        let connector = Arc::new(RefusingConnector::default());
        let prober = PortProber::new(connector.clone());
        let open = prober
            .probe(
                Ipv4Addr::new(10, 0, 0, 1),
                &[80, 80, 443, 80],
                Duration::from_millis(10),
            )
            .await;

        assert!(open.is_empty());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_socket_connector_detects_loopback_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();

        // Bind then drop to get a port with nothing listening
        let closed_port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };

        let prober = PortProber::default();
        let open = prober
            .probe(
                Ipv4Addr::LOCALHOST,
                &[closed_port, open_port],
                Duration::from_millis(500),
            )
            .await;
        assert_eq!(open, vec![open_port]);
        drop(listener);
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(DEFAULT_PORTS.len(), 12);
        assert_eq!(DEFAULT_PORTS[0], 21);
        assert!(DEFAULT_PORTS.contains(&3389));
    }
}
