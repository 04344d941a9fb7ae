//! Live packet capture pipeline.
//!
//! `start` snapshots the local-address set and firewall rules, launches a
//! tcpdump subprocess, and moves the blocking read loop onto a dedicated
//! thread so callers are never blocked. Each parsed line is classified and
//! published on the event bus; the broadcast sender is thread-safe, so the
//! reader thread never touches the async runtime directly.

use crate::firewall::{self, FirewallRule, Ufw};
use crate::netwatch::classifier::{self, Verdict};
use crate::netwatch::parser::{LineParser, PacketDescriptor};
use parking_lot::Mutex;
use regex::Regex;
use securewatch_core::bus::EventBus;
use securewatch_core::error::{Error, Result};
use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Running,
    Stopping,
}

pub struct PacketMonitor {
    ufw: Ufw,
    bus: EventBus,
    state: Arc<Mutex<CaptureState>>,
    running: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PacketMonitor {
    pub fn new(bus: EventBus) -> Self {
        Self {
            ufw: Ufw::new(),
            bus,
            state: Arc::new(Mutex::new(CaptureState::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            child: Arc::new(Mutex::new(None)),
            thread: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    /// Start capturing. A second call while running is a warned no-op.
    pub fn start(&self, interface: Option<&str>, packet_limit: Option<u32>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != CaptureState::Idle {
                warn!("packet capture already running");
                return Ok(());
            }
            *state = CaptureState::Running;
        }

        if let Err(err) = self.ensure_capture_tool() {
            *self.state.lock() = CaptureState::Idle;
            return Err(err);
        }

        let local_ips = match local_ipv4_addrs() {
            Ok(ips) => {
                info!(count = ips.len(), "detected local addresses");
                ips
            }
            Err(err) => {
                warn!(error = %err, "could not determine local addresses");
                HashSet::new()
            }
        };

        let rules = match self.ufw.list_rules() {
            Ok(rules) => {
                info!(count = rules.len(), "loaded firewall rules");
                rules
            }
            Err(err) => {
                warn!(error = %err, "could not load firewall rules");
                Vec::new()
            }
        };

        let mut cmd = Command::new("sudo");
        cmd.args(["tcpdump", "-n", "-l", "-tt"]);
        if let Some(iface) = interface {
            cmd.args(["-i", iface]);
        }
        if let Some(limit) = packet_limit {
            cmd.arg("-c").arg(limit.to_string());
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(err) => {
                *self.state.lock() = CaptureState::Idle;
                return Err(Error::CaptureUnavailable(format!(
                    "failed to launch tcpdump: {err}"
                )));
            }
        };
        let stdout = match child.stdout.take() {
            Some(s) => s,
            None => {
                let _ = child.kill();
                *self.state.lock() = CaptureState::Idle;
                return Err(Error::CaptureUnavailable(
                    "tcpdump stdout unavailable".to_string(),
                ));
            }
        };
        *self.child.lock() = Some(child);
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let child_slot = self.child.clone();
        let state = self.state.clone();
        let bus = self.bus.clone();

        let spawned = std::thread::Builder::new()
            .name("packet-capture".into())
            .spawn(move || {
                capture_loop(stdout, running, &bus, &rules, &local_ips);
                if let Some(mut child) = child_slot.lock().take() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                *state.lock() = CaptureState::Idle;
                info!("packet capture thread exiting");
            });
        match spawned {
            Ok(handle) => *self.thread.lock() = Some(handle),
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                if let Some(mut child) = self.child.lock().take() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                *self.state.lock() = CaptureState::Idle;
                return Err(err.into());
            }
        }

        info!(?interface, ?packet_limit, "packet capture started");
        Ok(())
    }

    /// Stop capture and join the reader thread. The subprocess is killed so
    /// a quiet interface cannot keep the reader blocked.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != CaptureState::Running {
                return;
            }
            *state = CaptureState::Stopping;
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        *self.state.lock() = CaptureState::Idle;
        info!("packet capture stopped");
    }

    fn ensure_capture_tool(&self) -> Result<()> {
        if firewall::tool_on_path("tcpdump") {
            return Ok(());
        }
        warn!("tcpdump not found on PATH, attempting package install");
        firewall::pkg_install("tcpdump")
            .map_err(|err| Error::CaptureUnavailable(err.to_string()))
    }
}

fn capture_loop(
    stdout: std::process::ChildStdout,
    running: Arc<AtomicBool>,
    bus: &EventBus,
    rules: &[FirewallRule],
    local_ips: &HashSet<String>,
) {
    let parser = LineParser::new();
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(err) => {
                debug!(error = %err, "capture stream read error");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let descriptor = match parser.parse(line) {
            Some(d) => d,
            None => {
                debug!(line, "dropped unparseable capture line");
                continue;
            }
        };
        publish_packet(bus, &descriptor, rules, local_ips);
    }
}

fn publish_packet(
    bus: &EventBus,
    descriptor: &PacketDescriptor,
    rules: &[FirewallRule],
    local_ips: &HashSet<String>,
) {
    let direction = classifier::direction_of(&descriptor.src_ip, local_ips);
    let verdict = classifier::classify(
        descriptor.protocol,
        &descriptor.src_ip,
        &descriptor.dst_ip,
        descriptor.src_port,
        descriptor.dst_port,
        rules,
        local_ips,
    );
    if verdict == Verdict::Denied {
        debug!(
            src = %descriptor.src_ip,
            dst = %descriptor.dst_ip,
            port = ?descriptor.dst_port,
            "observed packet classified as denied"
        );
    }

    let payload = serde_json::json!({
        "timestamp": descriptor.timestamp,
        "protocol": descriptor.protocol,
        "source": endpoint(&descriptor.src_ip, descriptor.src_port),
        "destination": endpoint(&descriptor.dst_ip, descriptor.dst_port),
        "port": descriptor.dst_port,
        "size": descriptor.size_bytes,
        "direction": direction,
        "status": verdict,
    });
    bus.publish_network_packet(payload);
}

fn endpoint(ip: &str, port: Option<u16>) -> String {
    match port {
        Some(p) => format!("{ip}:{p}"),
        None => ip.to_string(),
    }
}

/// Snapshot the host's IPv4 addresses via `ip -4 addr show`.
pub fn local_ipv4_addrs() -> Result<HashSet<String>> {
    let output = Command::new("ip")
        .args(["-4", "addr", "show"])
        .output()
        .map_err(|e| Error::external_tool("ip", e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::external_tool("ip", stderr));
    }
    Ok(parse_ip_addr_output(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_ip_addr_output(output: &str) -> HashSet<String> {
    let inet = Regex::new(r"inet\s+(\d+\.\d+\.\d+\.\d+)").expect("static regex");
    output
        .lines()
        .filter_map(|line| inet.captures(line).map(|c| c[1].to_string()))
        .collect()
}
