//! Probe availability checks for the current process
//!
//! Host discovery relies on the system `ping` binary and on reading the
//! neighbor cache. Neither normally needs root, but both can be locked down:
//! - Linux: `ping` needs setuid, CAP_NET_RAW or `net.ipv4.ping_group_range`
//! - macOS: `ping` is setuid by default
//! - Windows: `ping` and `arp -a` work without elevation

use super::arp::SystemNeighborTable;
use super::ping::{LivenessProbe, SystemPing};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Whether every probe the scanner uses is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Liveness and neighbor lookups both work
    Full,
    /// At least one probe is unavailable; results will be incomplete
    Limited,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Full => write!(f, "full"),
            ScanMode::Limited => write!(f, "limited"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCapabilities {
    pub mode: ScanMode,
    pub can_ping: bool,
    pub can_read_neighbors: bool,
    pub is_elevated: bool,
    pub warning: Option<String>,
    pub elevation_instructions: Option<String>,
}

impl ScanCapabilities {
    fn from_checks(can_ping: bool, can_read_neighbors: bool, is_elevated: bool) -> Self {
        let mode = if can_ping && can_read_neighbors {
            ScanMode::Full
        } else {
            ScanMode::Limited
        };

        let (warning, elevation_instructions) = match (mode, can_ping) {
            (ScanMode::Full, _) => (None, None),
            (ScanMode::Limited, false) => (
                Some("Ping is unavailable; every host will be reported dead.".to_string()),
                Some(get_elevation_instructions()),
            ),
            (ScanMode::Limited, true) => (
                Some(
                    "The neighbor cache cannot be read; hardware addresses will be missing."
                        .to_string(),
                ),
                None,
            ),
        };

        Self {
            mode,
            can_ping,
            can_read_neighbors,
            is_elevated,
            warning,
            elevation_instructions,
        }
    }
}

/// Check if the current process is running with elevated privileges
pub fn is_elevated() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(target_os = "windows")]
    {
        match super::hidden_command("whoami").args(["/groups"]).output() {
            Ok(output) => {
                let groups = String::from_utf8_lossy(&output.stdout);
                groups.contains("S-1-16-12288") || groups.contains("High Mandatory Level")
            }
            Err(_) => false,
        }
    }

    #[cfg(not(any(unix, target_os = "windows")))]
    {
        false
    }
}

/// Ping the loopback address with the same probe the scanner uses
pub async fn test_ping_capability() -> bool {
    SystemPing
        .is_alive(Ipv4Addr::LOCALHOST, Duration::from_secs(1))
        .await
}

/// Detect which probes work for this process
pub async fn detect_capabilities() -> ScanCapabilities {
    let (can_ping, can_read_neighbors) =
        tokio::join!(test_ping_capability(), SystemNeighborTable.is_available());

    let caps = ScanCapabilities::from_checks(can_ping, can_read_neighbors, is_elevated());
    tracing::debug!("Scan capabilities: {:?}", caps);
    caps
}

/// Get platform-specific instructions for making ping usable
pub fn get_elevation_instructions() -> String {
    #[cfg(target_os = "linux")]
    {
        "To let netmapper ping hosts on Linux:\n\
         \n\
         Option 1 - Allow unprivileged ICMP sockets for your group:\n\
         $ sudo sysctl -w net.ipv4.ping_group_range=\"0 2147483647\"\n\
         \n\
         Option 2 - Restore the setuid bit or capability on ping:\n\
         $ sudo setcap cap_net_raw+ep $(command -v ping)\n\
         \n\
         Option 3 - Run as root:\n\
         $ sudo netmapper scan"
            .to_string()
    }

    #[cfg(target_os = "macos")]
    {
        "The system ping is normally setuid on macOS. Check that /sbin/ping\n\
         is present and executable, or run:\n\
         $ sudo netmapper scan"
            .to_string()
    }

    #[cfg(target_os = "windows")]
    {
        "Check that ping.exe is on PATH and that ICMP echo is not blocked\n\
         by a firewall policy. Running from an elevated prompt may help."
            .to_string()
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        "Make sure a 'ping' command is installed and usable by this user.".to_string()
    }
}

/// Format a user-friendly message about current scan capabilities
pub fn format_capabilities_message(caps: &ScanCapabilities) -> String {
    if caps.mode == ScanMode::Full {
        return "Scanning with full capabilities".to_string();
    }

    let mut msg = String::from("Scanning with limited capabilities:\n");
    if !caps.can_ping {
        msg.push_str("  - Ping unavailable (no host will be found alive)\n");
    }
    if !caps.can_read_neighbors {
        msg.push_str("  - Neighbor cache unreadable (no hardware addresses)\n");
    }

    if let Some(ref instructions) = caps.elevation_instructions {
        msg.push('\n');
        msg.push_str(instructions);
    }

    msg
}
