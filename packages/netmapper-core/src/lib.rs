//! NetMapper Core Library
//!
//! Discovers hosts on the local IPv4 subnet and characterizes each one:
//! - Range detection from the primary interface (or an explicit CIDR/range)
//! - Liveness through the system ping
//! - Hardware address from the OS neighbor cache
//! - Hostname through reverse DNS
//! - Open ports through non-blocking TCP connects
//!
//! Hosts are scanned concurrently under a fixed limit and each result is
//! delivered to a [`ResultSink`] as soon as it completes.
//!
//! # Example
//!
//! ```no_run
//! use netmapper_core::config::ScanConfig;
//! use netmapper_core::scanner::{self, HostRecord, ResultSink, ScanOrchestrator};
//!
//! struct Print;
//!
//! impl ResultSink for Print {
//!     fn on_reset(&self) {}
//!     fn on_host_scanned(&self, record: HostRecord, completed: u32, total: u32) {
//!         println!("[{}/{}] {} {}", completed, total, record.address(), record.status());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let network = scanner::detect_network()?;
//!     let orchestrator = ScanOrchestrator::from_config(&ScanConfig::default())?;
//!     let summary = orchestrator.run(&network.range, &Print).await?;
//!     println!("{} alive", summary.alive);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod scanner;

// Re-export commonly used types
pub use config::{ConfigSource, ScanConfig};
pub use scanner::{
    HostRecord, HostStatus, NetworkInfo, NetworkRange, ResultSink, ScanCapabilities, ScanError,
    ScanOrchestrator, ScanSummary,
};
