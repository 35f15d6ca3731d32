//! Per-address probe sequencing

use super::HostRecord;
use super::arp::{NeighborTable, SystemNeighborTable};
use super::dns::{NameResolver, SystemResolver};
use super::ping::{LivenessProbe, SystemPing};
use super::ports::{PortProber, SocketConnector, TcpConnector};
use crate::config::ScanConfig;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The probe backends a scanner drives
#[derive(Clone)]
pub struct ProbeSet {
    pub liveness: Arc<dyn LivenessProbe>,
    pub neighbors: Arc<dyn NeighborTable>,
    pub resolver: Arc<dyn NameResolver>,
    pub connector: Arc<dyn TcpConnector>,
}

impl ProbeSet {
    /// Backends that talk to the running system
    pub fn system(dns_timeout: Duration) -> Self {
        Self {
            liveness: Arc::new(SystemPing),
            neighbors: Arc::new(SystemNeighborTable),
            resolver: Arc::new(SystemResolver::new(dns_timeout)),
            connector: Arc::new(SocketConnector),
        }
    }
}

/// Timeouts and port list applied to every host
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub liveness_timeout: Duration,
    pub port_timeout: Duration,
    pub ports: Vec<u16>,
}

impl From<&ScanConfig> for ProbeSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            liveness_timeout: config.liveness_timeout(),
            port_timeout: config.port_timeout(),
            ports: config.ports.clone(),
        }
    }
}

/// Runs the probes for one address and builds its record.
pub struct HostScanner {
    liveness: Arc<dyn LivenessProbe>,
    neighbors: Arc<dyn NeighborTable>,
    resolver: Arc<dyn NameResolver>,
    port_prober: PortProber,
    settings: ProbeSettings,
}

impl HostScanner {
    pub fn new(probes: ProbeSet, settings: ProbeSettings) -> Self {
        Self {
            liveness: probes.liveness,
            neighbors: probes.neighbors,
            resolver: probes.resolver,
            port_prober: PortProber::new(probes.connector),
            settings,
        }
    }

    /// Scanner backed by the system probes and `config`
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(ProbeSet::system(config.dns_timeout()), ProbeSettings::from(config))
    }

    /// Probe `ip`. Dead hosts get no further probes. After cancellation an
    /// alive host is returned with whatever was gathered so far.
    pub async fn scan(&self, ip: Ipv4Addr, cancel: &CancellationToken) -> HostRecord {
        if !self.liveness.is_alive(ip, self.settings.liveness_timeout).await {
            tracing::trace!("{} did not answer", ip);
            return HostRecord::dead(ip);
        }

        if cancel.is_cancelled() {
            tracing::debug!("{} is alive; remaining probes skipped after cancel", ip);
            return HostRecord::alive(ip, None, None, Vec::new());
        }

        // The neighbor entry is usually created by the ping above
        let (hardware_address, hostname) =
            futures::future::join(self.neighbors.lookup(ip), self.resolver.resolve(ip)).await;

        let open_ports = if cancel.is_cancelled() {
            Vec::new()
        } else {
            self.port_prober
                .probe(ip, &self.settings.ports, self.settings.port_timeout)
                .await
        };

        tracing::debug!(
            "{} alive (mac: {}, host: {}, ports: {:?})",
            ip,
            hardware_address.as_deref().unwrap_or("-"),
            hostname.as_deref().unwrap_or("-"),
            open_ports
        );

        HostRecord::alive(ip, hardware_address, hostname, open_ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::SocketAddrV4;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        alive: bool,
        pings: AtomicUsize,
        lookups: AtomicUsize,
        resolves: AtomicUsize,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl LivenessProbe for Counting {
        async fn is_alive(&self, _ip: Ipv4Addr, _timeout: Duration) -> bool {
            self.pings.fetch_add(1, Ordering::SeqCst);
            self.alive
        }
    }

    #[async_trait]
    impl NeighborTable for Counting {
        async fn lookup(&self, _ip: Ipv4Addr) -> Option<String> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Some("aa:bb:cc:dd:ee:ff".to_string())
        }
    }

    #[async_trait]
    impl NameResolver for Counting {
        async fn resolve(&self, _ip: Ipv4Addr) -> Option<String> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            Some("host.lan".to_string())
        }
    }

    #[async_trait]
    impl TcpConnector for Counting {
        async fn connect(&self, addr: SocketAddrV4) -> bool {
            self.connects.fetch_add(1, Ordering::SeqCst);
            addr.port() == 22
        }
    }

    fn scanner(backend: Arc<Counting>) -> HostScanner {
        let probes = ProbeSet {
            liveness: backend.clone(),
            neighbors: backend.clone(),
            resolver: backend.clone(),
            connector: backend,
        };
        HostScanner::new(
            probes,
            ProbeSettings {
                liveness_timeout: Duration::from_millis(100),
                port_timeout: Duration::from_millis(100),
                ports: vec![21, 22, 80],
            },
        )
    }

    #[tokio::test]
    async fn test_dead_host_skips_other_probes() {
        let backend = Arc::new(Counting::default());
        let record = scanner(backend.clone())
            .scan(Ipv4Addr::new(10, 0, 0, 2), &CancellationToken::new())
            .await;

        assert_eq!(record, HostRecord::dead(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(backend.pings.load(Ordering::SeqCst), 1);
        assert_eq!(backend.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(backend.resolves.load(Ordering::SeqCst), 0);
        assert_eq!(backend.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_alive_host_collects_all_probes() {
        let backend = Arc::new(Counting {
            alive: true,
            ..Default::default()
        });
        let record = scanner(backend.clone())
            .scan(Ipv4Addr::new(10, 0, 0, 1), &CancellationToken::new())
            .await;

        assert!(record.is_alive());
        assert_eq!(record.hardware_address(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(record.hostname(), Some("host.lan"));
        assert_eq!(record.open_ports(), &[22]);
        assert_eq!(backend.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_scan_stops_after_liveness() {
        let backend = Arc::new(Counting {
            alive: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let record = scanner(backend.clone())
            .scan(Ipv4Addr::new(10, 0, 0, 1), &cancel)
            .await;

        assert!(record.is_alive());
        assert!(record.open_ports().is_empty());
        assert_eq!(backend.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(backend.connects.load(Ordering::SeqCst), 0);
    }
}
