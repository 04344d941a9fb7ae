//! UFW control and rule normalization.
//!
//! All commands shell out to `sudo ufw …`; a non-zero exit surfaces the
//! tool's stderr as `Error::ExternalTool`. `list_rules` parses the
//! `status numbered` listing into canonical [`FirewallRule`] records. UFW
//! does not label which column is the destination matcher and which is the
//! source, so normalization applies a looks-like-a-port-or-address
//! heuristic and swaps the fields when needed.

use regex::Regex;
use securewatch_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleAction {
    Allow,
    Deny,
    Reject,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleDirection {
    In,
    Out,
}

/// Canonical mirror of one UFW rule as shown by `ufw status numbered`.
///
/// `matcher` always holds the destination-side matcher (port, port/proto,
/// service name, or "Anywhere"); `source` always holds the source address
/// spec. `number` is display/removal order only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub number: u32,
    pub matcher: String,
    pub action: RuleAction,
    pub direction: Option<RuleDirection>,
    pub source: String,
}

pub struct Ufw {
    status_line: Regex,
    port_token: Regex,
}

impl Ufw {
    pub fn new() -> Self {
        Self {
            // [num] <field-A> ACTION [IN|OUT] <field-B>
            status_line: Regex::new(
                r"^\[\s*(\d+)\]\s+(.+?)\s+(ALLOW|DENY|REJECT)\s+(?:(IN|OUT)\s+)?(.+)$",
            )
            .expect("static regex"),
            port_token: Regex::new(r"^\d+(/\w+)?$").expect("static regex"),
        }
    }

    /// Verify ufw is present, attempting a loudly-logged best-effort install
    /// when it is not.
    pub fn ensure_installed(&self) -> Result<()> {
        if tool_on_path("ufw") {
            return Ok(());
        }
        warn!("ufw not found on PATH, attempting package install");
        pkg_install("ufw")
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("sudo")
            .arg("ufw")
            .args(args)
            .output()
            .map_err(|e| Error::external_tool("ufw", e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::external_tool("ufw", stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn enable(&self) -> Result<String> {
        self.run(&["enable"])
    }

    pub fn disable(&self) -> Result<String> {
        self.run(&["disable"])
    }

    pub fn reload(&self) -> Result<String> {
        self.run(&["reload"])
    }

    pub fn status(&self, verbose: bool) -> Result<String> {
        if verbose {
            self.run(&["status", "verbose"])
        } else {
            self.run(&["status"])
        }
    }

    pub fn default_allow(&self) -> Result<String> {
        self.run(&["default", "allow"])
    }

    pub fn default_deny(&self) -> Result<String> {
        self.run(&["default", "deny"])
    }

    pub fn allow_ip(&self, ip: &str) -> Result<String> {
        self.run(&["allow", "from", ip])
    }

    pub fn deny_ip(&self, ip: &str) -> Result<String> {
        self.run(&["deny", "from", ip])
    }

    pub fn remove_ip(&self, ip: &str) -> Result<String> {
        self.run(&["delete", "allow", "from", ip])
    }

    pub fn allow_port(&self, port: u16, proto: Option<&str>) -> Result<String> {
        self.run(&["allow", &port_spec(port, proto)])
    }

    pub fn deny_port(&self, port: u16, proto: Option<&str>) -> Result<String> {
        self.run(&["deny", &port_spec(port, proto)])
    }

    pub fn remove_port(&self, port: u16, proto: Option<&str>) -> Result<String> {
        self.run(&["delete", "allow", &port_spec(port, proto)])
    }

    /// Allow a named service (ssh, http, https, …) by its UFW profile name.
    pub fn allow_service(&self, name: &str) -> Result<String> {
        self.run(&["allow", name])
    }

    pub fn deny_service(&self, name: &str) -> Result<String> {
        self.run(&["deny", name])
    }

    pub fn remove_service(&self, name: &str) -> Result<String> {
        self.run(&["delete", "allow", name])
    }

    /// Remove a rule by the same text used to add it, e.g. "22/tcp" or
    /// "allow from 192.168.1.10".
    pub fn remove_rule(&self, spec: &str) -> Result<String> {
        let mut args = vec!["delete"];
        args.extend(spec.split_whitespace());
        self.run(&args)
    }

    pub fn list_rules(&self) -> Result<Vec<FirewallRule>> {
        let output = self.run(&["status", "numbered"])?;
        Ok(self.parse_status_numbered(&output))
    }

    /// Parse `ufw status numbered` output. Unparseable lines are skipped
    /// with a warning, never fatal.
    pub fn parse_status_numbered(&self, output: &str) -> Vec<FirewallRule> {
        let mut rules = Vec::new();
        for raw in output.lines() {
            let line = raw.trim();
            if !line.starts_with('[') {
                continue;
            }
            let caps = match self.status_line.captures(line) {
                Some(c) => c,
                None => {
                    warn!(line, "unparsed ufw status line");
                    continue;
                }
            };
            let number: u32 = match caps[1].parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let field_a = caps[2].trim().to_string();
            let action = match &caps[3] {
                "ALLOW" => RuleAction::Allow,
                "DENY" => RuleAction::Deny,
                _ => RuleAction::Reject,
            };
            let direction = caps.get(4).map(|d| match d.as_str() {
                "IN" => RuleDirection::In,
                _ => RuleDirection::Out,
            });
            let field_b = caps[5].trim().to_string();

            // UFW does not consistently order the columns. If field-A looks
            // like a port/proto token or an address-side literal it is the
            // destination matcher; otherwise the columns are swapped.
            let (matcher, source) = if self.looks_like_matcher(&field_a) {
                (field_a, field_b)
            } else {
                (field_b, field_a)
            };

            rules.push(FirewallRule {
                number,
                matcher,
                action,
                direction,
                source,
            });
        }
        rules
    }

    fn looks_like_matcher(&self, field: &str) -> bool {
        let lower = field.to_ascii_lowercase();
        self.port_token.is_match(field) || field.contains('/') || lower == "anywhere" || lower == "ipv6"
    }
}

impl Default for Ufw {
    fn default() -> Self {
        Self::new()
    }
}

fn port_spec(port: u16, proto: Option<&str>) -> String {
    match proto {
        Some(p) => format!("{port}/{p}"),
        None => port.to_string(),
    }
}

/// Check PATH for an executable, like `shutil.which`.
pub fn tool_on_path(name: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| {
        let candidate = dir.join(name);
        candidate.is_file()
    })
}

/// Best-effort package install via the first detected package manager.
/// Explicit fallback path only; callers decide whether failure is fatal.
pub fn pkg_install(package: &str) -> Result<()> {
    let attempts: &[&[&str]] = &[
        &["apt-get", "install", "-y"],
        &["yum", "install", "-y"],
        &["dnf", "install", "-y"],
        &["pacman", "-S", "--noconfirm"],
    ];
    for attempt in attempts {
        if !tool_on_path(attempt[0]) {
            continue;
        }
        info!(manager = attempt[0], package, "installing missing tool");
        if attempt[0] == "apt-get" {
            // refresh indexes first; failure here is non-fatal
            let _ = Command::new("sudo").args(["apt-get", "update", "-y"]).output();
        }
        let output = Command::new("sudo")
            .args(*attempt)
            .arg(package)
            .output()
            .map_err(|e| Error::external_tool(attempt[0], e.to_string()))?;
        if output.status.success() {
            info!(package, "install succeeded");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::external_tool(attempt[0], stderr));
    }
    Err(Error::external_tool(
        "package manager",
        format!("no supported package manager found to install {package}"),
    ))
}
