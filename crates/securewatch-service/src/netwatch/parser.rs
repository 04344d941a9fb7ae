//! Tolerant parsing of tcpdump's line output into packet descriptors.
//!
//! Expects `tcpdump -n -l -tt` lines: epoch timestamp, then
//! `src.port > dst.port:` (or bare addresses for portless protocols like
//! ICMP) and a trailing `length N`. Lines that fail every pattern yield
//! `None` and are dropped by the capture loop.

use crate::netwatch::classifier::Protocol;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketDescriptor {
    pub timestamp: DateTime<Utc>,
    pub protocol: Protocol,
    pub src_ip: String,
    pub src_port: Option<u16>,
    pub dst_ip: String,
    pub dst_port: Option<u16>,
    pub size_bytes: u64,
}

pub struct LineParser {
    timestamp: Regex,
    addr_with_ports: Regex,
    addr_bare: Regex,
    length: Regex,
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            timestamp: Regex::new(r"^(\d+)\.(\d+)\s+").expect("static regex"),
            addr_with_ports: Regex::new(
                r"(\d+\.\d+\.\d+\.\d+)\.(\d+)\s*>\s*(\d+\.\d+\.\d+\.\d+)\.(\d+)",
            )
            .expect("static regex"),
            addr_bare: Regex::new(r"(\d+\.\d+\.\d+\.\d+)\s*>\s*(\d+\.\d+\.\d+\.\d+)")
                .expect("static regex"),
            length: Regex::new(r"length\s+(\d+)").expect("static regex"),
        }
    }

    pub fn parse(&self, line: &str) -> Option<PacketDescriptor> {
        let ts = self.timestamp.captures(line)?;
        let secs: i64 = ts[1].parse().ok()?;
        let micros = fraction_micros(&ts[2])?;
        let timestamp = Utc
            .timestamp_opt(secs, micros * 1000)
            .single()
            .unwrap_or_else(Utc::now);

        let protocol = sniff_protocol(line);

        let (src_ip, src_port, dst_ip, dst_port) =
            if let Some(caps) = self.addr_with_ports.captures(line) {
                (
                    caps[1].to_string(),
                    caps[2].parse::<u16>().ok(),
                    caps[3].to_string(),
                    caps[4].parse::<u16>().ok(),
                )
            } else if let Some(caps) = self.addr_bare.captures(line) {
                (caps[1].to_string(), None, caps[2].to_string(), None)
            } else {
                return None;
            };

        let size_bytes = self
            .length
            .captures(line)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0);

        Some(PacketDescriptor {
            timestamp,
            protocol,
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            size_bytes,
        })
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpret a fractional-seconds digit run as microseconds: `.1` is
/// 100000µs, digits past the sixth are dropped.
fn fraction_micros(digits: &str) -> Option<u32> {
    let trimmed = &digits[..digits.len().min(6)];
    let mut value: u32 = trimmed.parse().ok()?;
    for _ in trimmed.len()..6 {
        value *= 10;
    }
    Some(value)
}

fn sniff_protocol(line: &str) -> Protocol {
    let lower = line.to_ascii_lowercase();
    if lower.contains("icmp") {
        Protocol::Icmp
    } else if lower.contains(" udp") || lower.contains("udp,") || lower.contains(".udp") {
        Protocol::Udp
    } else if lower.contains("flags [") || lower.contains(" tcp") || lower.contains(".tcp") {
        // tcpdump prints TCP segments with a Flags field rather than a
        // protocol tag
        Protocol::Tcp
    } else if line.contains(" IP ") || line.starts_with("IP ") {
        Protocol::Ip
    } else {
        Protocol::Unknown
    }
}
