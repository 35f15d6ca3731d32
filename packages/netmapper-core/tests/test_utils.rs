use async_trait::async_trait;
use netmapper_core::scanner::{
    HostRecord, HostScanner, LivenessProbe, NameResolver, NeighborTable, ProbeSet, ProbeSettings,
    ResultSink, TcpConnector,
};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What an alive host answers to each probe
#[derive(Debug, Clone, Default)]
pub struct HostScript {
    pub mac: Option<&'static str>,
    pub hostname: Option<&'static str>,
    pub open_ports: Vec<u16>,
}

/// Fake network: listed hosts are alive, every other address is dead.
/// Tracks how many liveness probes run at the same time.
#[derive(Default)]
pub struct ScriptedNetwork {
    hosts: HashMap<Ipv4Addr, HostScript>,
    ping_delay: Duration,
    panic_on: Option<Ipv4Addr>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub pings: AtomicUsize,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alive(mut self, ip: &str, script: HostScript) -> Self {
        self.hosts.insert(ip.parse().unwrap(), script);
        self
    }

    pub fn with_ping_delay(mut self, delay: Duration) -> Self {
        self.ping_delay = delay;
        self
    }

    pub fn panicking_on(mut self, ip: &str) -> Self {
        self.panic_on = Some(ip.parse().unwrap());
        self
    }
}

#[async_trait]
impl LivenessProbe for ScriptedNetwork {
    async fn is_alive(&self, ip: Ipv4Addr, _timeout: Duration) -> bool {
        if self.panic_on == Some(ip) {
            panic!("probe failure injected for {}", ip);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.pings.fetch_add(1, Ordering::SeqCst);

        if !self.ping_delay.is_zero() {
            tokio::time::sleep(self.ping_delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.hosts.contains_key(&ip)
    }
}

#[async_trait]
impl NeighborTable for ScriptedNetwork {
    async fn lookup(&self, ip: Ipv4Addr) -> Option<String> {
        self.hosts.get(&ip)?.mac.map(str::to_string)
    }
}

#[async_trait]
impl NameResolver for ScriptedNetwork {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        self.hosts.get(&ip)?.hostname.map(str::to_string)
    }
}

#[async_trait]
impl TcpConnector for ScriptedNetwork {
    async fn connect(&self, addr: SocketAddrV4) -> bool {
        self.hosts
            .get(addr.ip())
            .is_some_and(|h| h.open_ports.contains(&addr.port()))
    }
}

/// Host scanner driving `network` for every probe
pub fn create_test_scanner(network: Arc<ScriptedNetwork>, ports: &[u16]) -> HostScanner {
    let probes = ProbeSet {
        liveness: network.clone(),
        neighbors: network.clone(),
        resolver: network.clone(),
        connector: network,
    };
    HostScanner::new(
        probes,
        ProbeSettings {
            liveness_timeout: Duration::from_millis(100),
            port_timeout: Duration::from_millis(50),
            ports: ports.to_vec(),
        },
    )
}

/// Sink that keeps every delivery. A reset clears what it holds.
#[derive(Default)]
pub struct CollectingSink {
    deliveries: Mutex<Vec<(HostRecord, u32, u32)>>,
    pub resets: AtomicUsize,
}

impl CollectingSink {
    pub fn deliveries(&self) -> Vec<(HostRecord, u32, u32)> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Delivered records sorted by address
    #[allow(dead_code)]
    pub fn records_by_address(&self) -> Vec<HostRecord> {
        let mut records: Vec<HostRecord> =
            self.deliveries().into_iter().map(|(r, _, _)| r).collect();
        records.sort_by_key(|r| r.address());
        records
    }
}

impl ResultSink for CollectingSink {
    fn on_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.deliveries.lock().unwrap().clear();
    }

    fn on_host_scanned(&self, record: HostRecord, completed: u32, total: u32) {
        self.deliveries.lock().unwrap().push((record, completed, total));
    }
}
