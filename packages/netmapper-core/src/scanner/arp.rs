//! Neighbor (ARP) cache lookups
//!
//! Only the cache the OS already maintains is read; no ARP request is sent.
//! The liveness probe usually populates the entry, so lookups must happen
//! after it succeeds.

use async_trait::async_trait;
use std::net::Ipv4Addr;

/// One IP to hardware address mapping from the neighbor cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
}

/// Read-only view of the neighbor cache
#[async_trait]
pub trait NeighborTable: Send + Sync {
    async fn lookup(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Reads the neighbor cache of the running system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNeighborTable;

#[async_trait]
impl NeighborTable for SystemNeighborTable {
    async fn lookup(&self, ip: Ipv4Addr) -> Option<String> {
        let entries = match read_neighbor_table().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Neighbor table unavailable: {}", e);
                return None;
            }
        };

        entries.into_iter().find(|e| e.ip == ip).map(|e| e.mac)
    }
}

impl SystemNeighborTable {
    /// Whether the neighbor cache can be read at all
    pub async fn is_available(&self) -> bool {
        read_neighbor_table().await.is_ok()
    }
}

/// Snapshot of the whole neighbor cache
pub async fn read_neighbor_table() -> std::io::Result<Vec<NeighborEntry>> {
    #[cfg(target_os = "linux")]
    {
        match tokio::fs::read_to_string("/proc/net/arp").await {
            Ok(content) => Ok(parse_proc_net_arp(&content)),
            Err(e) => {
                tracing::debug!("Cannot read /proc/net/arp ({}), falling back to arp -n", e);
                let output = run_arp(&["-n"]).await?;
                Ok(parse_arp_linux(&output))
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let output = run_arp(&["-a", "-n"]).await?;
        Ok(parse_arp_bsd(&output))
    }

    #[cfg(target_os = "windows")]
    {
        let output = run_arp(&["-a"]).await?;
        Ok(parse_arp_windows(&output))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "neighbor table is not supported on this platform",
        ))
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
async fn run_arp(args: &'static [&'static str]) -> std::io::Result<String> {
    let output =
        tokio::task::spawn_blocking(move || super::hidden_command("arp").args(args).output())
            .await
            .map_err(std::io::Error::other)??;

    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "arp exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Normalize a MAC address to lowercase `aa:bb:cc:dd:ee:ff`.
///
/// Accepts `-` separators and the single-digit octets macOS prints
/// (`0:1c:b3:9:85:15`). Returns `None` for malformed, all-zero and broadcast
/// addresses.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let octets: Vec<&str> = mac.split([':', '-']).collect();
    if octets.len() != 6 {
        return None;
    }

    let mut bytes = [0u8; 6];
    for (byte, octet) in bytes.iter_mut().zip(&octets) {
        if octet.is_empty() || octet.len() > 2 {
            return None;
        }
        *byte = u8::from_str_radix(octet, 16).ok()?;
    }

    if bytes == [0u8; 6] || bytes == [0xffu8; 6] {
        return None;
    }

    Some(
        bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Parse `/proc/net/arp`:
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:ff     *        eth0
/// ```
pub fn parse_proc_net_arp(content: &str) -> Vec<NeighborEntry> {
    let mut entries = Vec::new();

    for line in content.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }

        // 0x0 marks an incomplete entry
        if parts[2] == "0x0" {
            continue;
        }

        if let (Ok(ip), Some(mac)) = (parts[0].parse::<Ipv4Addr>(), normalize_mac(parts[3])) {
            entries.push(NeighborEntry { ip, mac });
        }
    }

    entries
}

/// Parse `arp -n` output from net-tools.
pub fn parse_arp_linux(output: &str) -> Vec<NeighborEntry> {
    let mut entries = Vec::new();

    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || parts[2] == "(incomplete)" {
            continue;
        }

        if let (Ok(ip), Some(mac)) = (parts[0].parse::<Ipv4Addr>(), normalize_mac(parts[2])) {
            entries.push(NeighborEntry { ip, mac });
        }
    }

    entries
}

/// Parse BSD/macOS `arp -a -n` output:
/// `? (192.168.1.1) at 0:1c:b3:9:85:15 on en0 ifscope [ethernet]`
pub fn parse_arp_bsd(output: &str) -> Vec<NeighborEntry> {
    let mut entries = Vec::new();

    for line in output.lines() {
        let (Some(ip_start), Some(ip_end)) = (line.find('('), line.find(')')) else {
            continue;
        };
        if ip_end <= ip_start {
            continue;
        }
        let Ok(ip) = line[ip_start + 1..ip_end].parse::<Ipv4Addr>() else {
            continue;
        };
        let Some(at_pos) = line.find(" at ") else {
            continue;
        };
        let mac = line[at_pos + 4..].split_whitespace().next().unwrap_or("");

        if let Some(mac) = normalize_mac(mac) {
            entries.push(NeighborEntry { ip, mac });
        }
    }

    entries
}

/// Parse Windows `arp -a` output.
pub fn parse_arp_windows(output: &str) -> Vec<NeighborEntry> {
    let mut entries: Vec<NeighborEntry> = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Interface") || line.contains("Internet Address") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let Ok(ip) = parts[0].parse::<Ipv4Addr>() else {
            continue;
        };
        if ip.is_multicast() || ip.is_broadcast() {
            continue;
        }

        if let Some(mac) = normalize_mac(parts[1]) {
            if !entries.iter().any(|e| e.ip == ip) {
                entries.push(NeighborEntry { ip, mac });
            }
        }
    }

    entries
}
