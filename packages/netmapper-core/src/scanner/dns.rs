//! Reverse DNS through the system resolver

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Reverse lookup of an address. A failed lookup is `None`, never an error.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Uses `getnameinfo` with a name required, bounded by `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

#[async_trait]
impl NameResolver for SystemResolver {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        let task = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&IpAddr::V4(ip)));

        // The blocking lookup is left to finish on its own if it overruns.
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(name))) => clean_hostname(&name, ip),
            Ok(Ok(Err(e))) => {
                tracing::debug!("Reverse lookup of {} failed: {}", ip, e);
                None
            }
            Ok(Err(e)) => {
                tracing::debug!("Reverse lookup task for {} failed: {}", ip, e);
                None
            }
            Err(_) => {
                tracing::debug!("Reverse lookup of {} timed out after {:?}", ip, self.timeout);
                None
            }
        }
    }
}

/// Drop empty answers, numeric echoes of the address and the trailing dot.
fn clean_hostname(name: &str, ip: Ipv4Addr) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name.parse::<Ipv4Addr>().is_ok() || name == ip.to_string() {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_hostname() {
        let ip = Ipv4Addr::new(192, 168, 1, 10);
        assert_eq!(clean_hostname("nas.lan.", ip).as_deref(), Some("nas.lan"));
        assert_eq!(clean_hostname("  printer  ", ip).as_deref(), Some("printer"));
        assert_eq!(clean_hostname("192.168.1.10", ip), None);
        assert_eq!(clean_hostname("", ip), None);
        assert_eq!(clean_hostname(".", ip), None);
    }

    #[tokio::test]
    async fn test_resolver_respects_timeout() {
        let resolver = SystemResolver::new(Duration::from_millis(1));
        let started = std::time::Instant::now();
        // TEST-NET-3 has no PTR records; either way the call must return promptly.
        let _ = resolver.resolve(Ipv4Addr::new(203, 0, 113, 77)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
