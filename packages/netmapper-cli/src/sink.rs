//! Terminal result sinks for the scan command

use netmapper_core::scanner::{HostRecord, ResultSink, ScanSummary};
use serde::Serialize;

/// Human-readable table rows, printed as hosts complete
pub struct TextSink {
    show_dead: bool,
}

impl TextSink {
    pub fn new(show_dead: bool) -> Self {
        Self { show_dead }
    }
}

impl ResultSink for TextSink {
    fn on_reset(&self) {
        println!(
            "  {:>11}  {:15} {:17} {:28} {}",
            "PROGRESS", "ADDRESS", "HARDWARE", "HOSTNAME", "OPEN PORTS"
        );
    }

    fn on_host_scanned(&self, record: HostRecord, completed: u32, total: u32) {
        if record.is_alive() || self.show_dead {
            println!("{}", format_host_line(&record, completed, total));
        }
    }
}

pub fn format_host_line(record: &HostRecord, completed: u32, total: u32) -> String {
    let progress = format!("[{}/{}]", completed, total);
    if !record.is_alive() {
        return format!("  {:>11}  {:15} (no reply)", progress, record.address().to_string());
    }

    let ports = if record.open_ports().is_empty() {
        "-".to_string()
    } else {
        record
            .open_ports()
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",")
    };

    format!(
        "  {:>11}  {:15} {:17} {:28} {}",
        progress,
        record.address().to_string(),
        record.hardware_address().unwrap_or("-"),
        record.hostname().unwrap_or("-"),
        ports
    )
}

pub fn print_text_summary(summary: &ScanSummary) {
    println!();
    println!(
        "Scanned {}/{} addresses in {}: {} alive ({:.1}s){}",
        summary.completed,
        summary.total,
        summary.range,
        summary.alive,
        summary.elapsed_secs,
        if summary.cancelled { ", cancelled" } else { "" }
    );
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event<'a> {
    Host {
        completed: u32,
        total: u32,
        #[serde(flatten)]
        host: &'a HostRecord,
    },
    Summary(&'a ScanSummary),
}

/// One JSON object per line: a `host` event per record, then a `summary`
pub struct JsonSink {
    show_dead: bool,
}

impl JsonSink {
    pub fn new(show_dead: bool) -> Self {
        Self { show_dead }
    }
}

impl ResultSink for JsonSink {
    fn on_reset(&self) {}

    fn on_host_scanned(&self, record: HostRecord, completed: u32, total: u32) {
        if !record.is_alive() && !self.show_dead {
            return;
        }
        print_event(&Event::Host {
            completed,
            total,
            host: &record,
        });
    }
}

pub fn print_json_summary(summary: &ScanSummary) {
    print_event(&Event::Summary(summary));
}

fn print_event(event: &Event<'_>) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("Failed to encode scan event: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_alive_line() {
        let record = HostRecord::alive(
            Ipv4Addr::new(192, 168, 1, 20),
            Some("aa:bb:cc:dd:ee:ff".to_string()),
            Some("printer.lan".to_string()),
            vec![80, 443],
        );
        let line = format_host_line(&record, 3, 254);
        assert!(line.contains("[3/254]"));
        assert!(line.contains("192.168.1.20"));
        assert!(line.contains("aa:bb:cc:dd:ee:ff"));
        assert!(line.contains("printer.lan"));
        assert!(line.ends_with("80,443"));
    }

    #[test]
    fn test_alive_line_without_details() {
        let record = HostRecord::alive(Ipv4Addr::new(10, 0, 0, 1), None, None, Vec::new());
        let line = format_host_line(&record, 1, 1);
        assert!(line.trim_end().ends_with('-'));
    }

    #[test]
    fn test_dead_line() {
        let line = format_host_line(&HostRecord::dead(Ipv4Addr::new(10, 0, 0, 2)), 2, 2);
        assert!(line.contains("(no reply)"));
    }

    #[test]
    fn test_host_event_is_flat() {
        let record = HostRecord::alive(Ipv4Addr::new(10, 0, 0, 1), None, None, vec![22]);
        let json = serde_json::to_value(Event::Host {
            completed: 1,
            total: 4,
            host: &record,
        })
        .unwrap();
        assert_eq!(json["type"], "host");
        assert_eq!(json["completed"], 1);
        assert_eq!(json["address"], "10.0.0.1");
        assert_eq!(json["openPorts"], serde_json::json!([22]));
    }
}
