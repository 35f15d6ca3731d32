//! Liveness checks using the system ping command

use super::hidden_command;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Extra time allowed for the ping process to start and exit on top of its
/// own reply timeout.
const PROCESS_GRACE: Duration = Duration::from_secs(2);

/// Reachability check for a single address.
///
/// Implementations never fail: anything other than a confirmed reply is
/// reported as not alive.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_alive(&self, ip: Ipv4Addr, timeout: Duration) -> bool;
}

/// Sends one echo request through the platform `ping` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPing;

#[async_trait]
impl LivenessProbe for SystemPing {
    async fn is_alive(&self, ip: Ipv4Addr, timeout: Duration) -> bool {
        let task = tokio::task::spawn_blocking(move || ping_once(ip, timeout));

        match tokio::time::timeout(timeout + PROCESS_GRACE, task).await {
            Ok(Ok(alive)) => alive,
            Ok(Err(e)) => {
                tracing::debug!("Ping task for {} failed: {}", ip, e);
                false
            }
            Err(_) => {
                tracing::debug!("Ping of {} did not exit in time", ip);
                false
            }
        }
    }
}

/// iputils and busybox `ping -W` only take whole seconds.
#[cfg_attr(any(target_os = "windows", target_os = "macos"), allow(dead_code))]
fn whole_seconds(timeout: Duration) -> u64 {
    timeout.as_secs_f64().ceil().max(1.0) as u64
}

/// Windows `-w` and BSD `-W` take milliseconds.
#[cfg_attr(not(any(target_os = "windows", target_os = "macos")), allow(dead_code))]
fn whole_millis(timeout: Duration) -> u128 {
    timeout.as_millis().max(1)
}

fn ping_once(ip: Ipv4Addr, timeout: Duration) -> bool {
    let ip_str = ip.to_string();

    #[cfg(target_os = "windows")]
    let output = hidden_command("ping")
        .args(["-n", "1", "-w", &whole_millis(timeout).to_string(), &ip_str])
        .output();

    #[cfg(target_os = "macos")]
    let output = hidden_command("ping")
        .args(["-c", "1", "-W", &whole_millis(timeout).to_string(), &ip_str])
        .output();

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let output = hidden_command("ping")
        .args(["-c", "1", "-W", &whole_seconds(timeout).to_string(), &ip_str])
        .output();

    match output {
        Ok(output) => {
            #[cfg(target_os = "windows")]
            {
                // Windows ping exits 0 on "Destination host unreachable" replies
                let output_lower = String::from_utf8_lossy(&output.stdout).to_lowercase();
                if output_lower.contains("request timed out")
                    || output_lower.contains("destination host unreachable")
                    || output_lower.contains("transmit failed")
                    || output_lower.contains("general failure")
                    || !output_lower.contains("reply from")
                {
                    return false;
                }
            }

            output.status.success()
        }
        Err(e) => {
            tracing::debug!("Failed to execute ping for {}: {}", ip_str, e);
            false
        }
    }
}
