//! Network scanning module.
//!
//! Discovers and characterizes hosts on the local IPv4 subnet using:
//! - Interface/netmask inspection to derive the scan range
//! - System ping for liveness
//! - The OS neighbor (ARP) cache for hardware addresses
//! - Reverse DNS for hostnames
//! - Non-blocking TCP connects against a short list of well-known ports

pub mod arp;
mod dns;
mod host;
mod orchestrator;
mod ping;
mod ports;
pub mod privileges;
pub mod range;

pub use arp::{NeighborEntry, NeighborTable, SystemNeighborTable};
pub use dns::{NameResolver, SystemResolver};
pub use host::{HostScanner, ProbeSet, ProbeSettings};
pub use orchestrator::{ResultSink, ScanOrchestrator, ScanSummary};
pub use ping::{LivenessProbe, SystemPing};
pub use ports::{DEFAULT_PORTS, PortProber, SocketConnector, TcpConnector};
pub use privileges::ScanCapabilities;
pub use range::{InterfaceAddress, NetworkInfo, NetworkRange, detect_network};

use serde::Serialize;
use std::net::Ipv4Addr;
use std::process::Command;
use thiserror::Error;

/// Scanner-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum ScanError {
    /// No up, non-loopback IPv4 interface with a netmask was found
    #[error("No usable network interface found")]
    NoUsableInterface,

    /// The derived or requested address range cannot be scanned
    #[error("Invalid address range: {0}")]
    InvalidRange(String),

    /// A configuration value is out of bounds
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A scan session is already running on this orchestrator
    #[error("A scan is already in progress")]
    ScanInProgress,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Get user-friendly description and instructions
    pub fn user_message(&self) -> String {
        match self {
            ScanError::NoUsableInterface => {
                "Failed to detect the local network. Are you connected?\n\n\
                 Pass an explicit subnet with --subnet (e.g. 192.168.1.0/24) to scan anyway."
                    .to_string()
            }
            ScanError::InvalidRange(msg) => {
                format!("The address range cannot be scanned: {}", msg)
            }
            ScanError::InvalidConfig(msg) => {
                format!(
                    "Configuration error: {}\n\n\
                     Run 'netmapper config' to see the effective settings.",
                    msg
                )
            }
            ScanError::ScanInProgress => {
                "A scan is already running. Wait for it to finish or cancel it first.".to_string()
            }
            ScanError::Io(e) => format!("I/O error: {}", e),
        }
    }
}

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
#[cfg(target_os = "windows")]
pub(crate) fn hidden_command(program: &str) -> Command {
    use std::os::windows::process::CommandExt;
    let mut cmd = Command::new(program);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn hidden_command(program: &str) -> Command {
    Command::new(program)
}

/// Whether a scanned address answered the liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Alive,
    Dead,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Alive => write!(f, "alive"),
            HostStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Result of scanning one address. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    address: Ipv4Addr,
    status: HostStatus,
    hardware_address: Option<String>,
    hostname: Option<String>,
    open_ports: Vec<u16>,
}

impl HostRecord {
    /// A host that did not answer. Carries no probe data.
    pub fn dead(address: Ipv4Addr) -> Self {
        Self {
            address,
            status: HostStatus::Dead,
            hardware_address: None,
            hostname: None,
            open_ports: Vec::new(),
        }
    }

    pub fn alive(
        address: Ipv4Addr,
        hardware_address: Option<String>,
        hostname: Option<String>,
        open_ports: Vec<u16>,
    ) -> Self {
        Self {
            address,
            status: HostStatus::Alive,
            hardware_address,
            hostname,
            open_ports,
        }
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn status(&self) -> HostStatus {
        self.status
    }

    pub fn is_alive(&self) -> bool {
        self.status == HostStatus::Alive
    }

    pub fn hardware_address(&self) -> Option<&str> {
        self.hardware_address.as_deref()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Open ports in probe order
    pub fn open_ports(&self) -> &[u16] {
        &self.open_ports
    }
}
