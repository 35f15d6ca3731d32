//! Scan range derivation from the host's interface table

use super::ScanError;
use ipnetwork::Ipv4Network;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};
use std::io;
use std::net::Ipv4Addr;

/// Inclusive range of usable IPv4 addresses, stored as host-order integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkRange {
    network_address: u32,
    broadcast_address: u32,
    usable_start: u32,
    usable_end: u32,
}

impl NetworkRange {
    /// Derive the range of the subnet `address` lives in.
    pub fn from_address_and_mask(address: Ipv4Addr, netmask: Ipv4Addr) -> Result<Self, ScanError> {
        let mask = u32::from(netmask);
        if mask == 0 {
            return Err(ScanError::InvalidRange(format!(
                "netmask of {} is 0.0.0.0",
                address
            )));
        }

        let network = u32::from(address) & mask;
        let broadcast = network | !mask;
        Self::validated(network, broadcast)
    }

    /// Parse a CIDR block such as `192.168.1.0/24`.
    pub fn from_cidr(cidr: &str) -> Result<Self, ScanError> {
        let network: Ipv4Network = cidr
            .trim()
            .parse()
            .map_err(|e| ScanError::InvalidRange(format!("'{}': {}", cidr, e)))?;
        Self::from_address_and_mask(network.ip(), network.mask())
    }

    /// An explicit inclusive range. The network and broadcast addresses are
    /// the addresses just outside the bounds.
    pub fn from_bounds(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self, ScanError> {
        let (start, end) = (u32::from(start), u32::from(end));
        if start == 0 || end == u32::MAX {
            return Err(ScanError::InvalidRange(format!(
                "{} - {} touches a reserved boundary address",
                Ipv4Addr::from(start),
                Ipv4Addr::from(end)
            )));
        }
        Self::validated(start - 1, end + 1)
    }

    /// Parse `A-B` into an explicit range.
    pub fn from_range_str(spec: &str) -> Result<Self, ScanError> {
        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| ScanError::InvalidRange(format!("'{}' is not of the form A-B", spec)))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<Ipv4Addr>()
                .map_err(|e| ScanError::InvalidRange(format!("'{}': {}", s.trim(), e)))
        };
        Self::from_bounds(parse(start)?, parse(end)?)
    }

    fn validated(network: u32, broadcast: u32) -> Result<Self, ScanError> {
        let usable_start = network.wrapping_add(1);
        let usable_end = broadcast.wrapping_sub(1);

        if broadcast <= network || usable_end < usable_start {
            return Err(ScanError::InvalidRange(format!(
                "no usable hosts between {} and {}",
                Ipv4Addr::from(network),
                Ipv4Addr::from(broadcast)
            )));
        }
        if usable_start == 0 || usable_end == u32::MAX {
            return Err(ScanError::InvalidRange(format!(
                "{} - {} touches a reserved boundary address",
                Ipv4Addr::from(usable_start),
                Ipv4Addr::from(usable_end)
            )));
        }

        Ok(Self {
            network_address: network,
            broadcast_address: broadcast,
            usable_start,
            usable_end,
        })
    }

    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network_address)
    }

    pub fn broadcast_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.broadcast_address)
    }

    pub fn usable_start(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.usable_start)
    }

    pub fn usable_end(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.usable_end)
    }

    /// Number of usable addresses (at most 2^32 - 2, hence u64)
    pub fn address_count(&self) -> u64 {
        u64::from(self.usable_end - self.usable_start) + 1
    }

    /// Usable addresses in ascending order
    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + Send + use<> {
        (self.usable_start..=self.usable_end).map(Ipv4Addr::from)
    }
}

impl std::fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.usable_start(), self.usable_end())
    }
}

impl Serialize for NetworkRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("NetworkRange", 5)?;
        state.serialize_field("networkAddress", &self.network_address())?;
        state.serialize_field("broadcastAddress", &self.broadcast_address())?;
        state.serialize_field("usableStart", &self.usable_start())?;
        state.serialize_field("usableEnd", &self.usable_end())?;
        state.serialize_field("addressCount", &self.address_count())?;
        state.end()
    }
}

/// One IPv4 entry of the interface table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub name: String,
    pub address: Ipv4Addr,
    pub netmask: Option<Ipv4Addr>,
}

impl InterfaceAddress {
    pub fn new(name: &str, address: Ipv4Addr, netmask: Option<Ipv4Addr>) -> Self {
        Self {
            name: name.to_string(),
            address,
            netmask,
        }
    }

    /// Loopback, link-local and unconfigured addresses have no LAN to scan
    pub fn is_scannable(&self) -> bool {
        let ip = self.address;
        !(ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()) && self.netmask.is_some()
    }
}

/// Detected network: the interface it was taken from and its range
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub interface: String,
    pub local_ip: Ipv4Addr,
    pub range: NetworkRange,
}

impl NetworkInfo {
    /// CIDR form of the subnet, e.g. `192.168.1.0/24`
    pub fn subnet(&self) -> String {
        let host_bits =
            u32::from(self.range.broadcast_address()) ^ u32::from(self.range.network_address());
        format!("{}/{}", self.range.network_address(), (!host_bits).count_ones())
    }
}

/// Pick the first scannable IPv4 interface entry and derive its range.
pub fn select_network(interfaces: &[InterfaceAddress]) -> Result<NetworkInfo, ScanError> {
    let candidate = interfaces
        .iter()
        .find(|iface| iface.is_scannable())
        .ok_or(ScanError::NoUsableInterface)?;

    let netmask = candidate.netmask.ok_or(ScanError::NoUsableInterface)?;
    let range = NetworkRange::from_address_and_mask(candidate.address, netmask)?;

    tracing::debug!(
        "Selected interface {} ({}/{}) -> {}",
        candidate.name,
        candidate.address,
        netmask,
        range
    );

    Ok(NetworkInfo {
        interface: candidate.name.clone(),
        local_ip: candidate.address,
        range,
    })
}

/// Detect the scannable range from the current interface table.
pub fn detect_network() -> Result<NetworkInfo, ScanError> {
    let interfaces = list_interfaces()?;
    tracing::debug!("Found {} IPv4 interface entries", interfaces.len());
    select_network(&interfaces)
}

/// Snapshot of the IPv4 entries in the interface table.
pub fn list_interfaces() -> Result<Vec<InterfaceAddress>, ScanError> {
    let interfaces = NetworkInterface::show().map_err(|e| ScanError::Io(io::Error::other(e)))?;

    let mut entries = Vec::new();
    for interface in interfaces {
        for addr in &interface.addr {
            if let Addr::V4(v4) = addr {
                entries.push(InterfaceAddress::new(&interface.name, v4.ip, v4.netmask));
            }
        }
    }
    Ok(entries)
}
