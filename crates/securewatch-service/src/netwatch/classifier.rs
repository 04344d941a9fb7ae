//! Direction-aware packet classification against the mirrored rule set.
//!
//! Rules are evaluated in listed order and the first match wins; there is
//! no most-specific-wins refinement. When nothing matches, the default
//! policy is asymmetric: traffic the host originates is allowed, unsolicited
//! inbound traffic is denied. That asymmetry is load-bearing and must not
//! be changed.

use crate::firewall::{FirewallRule, RuleAction, RuleDirection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Ip,
    Unknown,
}

impl Protocol {
    pub fn as_lower(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Ip => "ip",
            Protocol::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrafficDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allowed,
    Denied,
}

/// Fixed service-name resolution table: name → (port, proto).
const SERVICE_PORTS: &[(&str, u16, &str)] = &[
    ("ssh", 22, "tcp"),
    ("http", 80, "tcp"),
    ("https", 443, "tcp"),
    ("ftp", 21, "tcp"),
    ("smtp", 25, "tcp"),
    ("dns", 53, "udp"),
];

pub fn direction_of(src_ip: &str, local_ips: &HashSet<String>) -> TrafficDirection {
    if local_ips.contains(src_ip) {
        TrafficDirection::Outgoing
    } else {
        TrafficDirection::Incoming
    }
}

/// Classify one packet against the rule set.
///
/// First matching rule decides: ALLOW → Allowed, DENY/REJECT → Denied.
/// No match → default policy by direction.
pub fn classify(
    protocol: Protocol,
    src_ip: &str,
    _dst_ip: &str,
    _src_port: Option<u16>,
    dst_port: Option<u16>,
    rules: &[FirewallRule],
    local_ips: &HashSet<String>,
) -> Verdict {
    let direction = direction_of(src_ip, local_ips);

    for rule in rules {
        // Skip rules pinned to the other direction.
        match (rule.direction, direction) {
            (Some(RuleDirection::In), TrafficDirection::Outgoing) => continue,
            (Some(RuleDirection::Out), TrafficDirection::Incoming) => continue,
            _ => {}
        }

        if !matcher_hits(&rule.matcher, protocol, dst_port) {
            continue;
        }
        if !source_hits(&rule.source, src_ip) {
            continue;
        }

        return match rule.action {
            RuleAction::Allow => Verdict::Allowed,
            RuleAction::Deny | RuleAction::Reject => Verdict::Denied,
        };
    }

    match direction {
        TrafficDirection::Outgoing => Verdict::Allowed,
        TrafficDirection::Incoming => Verdict::Denied,
    }
}

/// Destination-side matcher: "anywhere"/"any" wildcard, exact
/// port[/proto] (absent proto is a wildcard), or a known service name.
fn matcher_hits(matcher: &str, protocol: Protocol, dst_port: Option<u16>) -> bool {
    let matcher = matcher.trim().to_ascii_lowercase();
    if matcher == "anywhere" || matcher == "any" {
        return true;
    }

    let Some(dst_port) = dst_port else {
        return false;
    };

    let (port_text, proto_text) = match matcher.split_once('/') {
        Some((p, proto)) => (p, Some(proto)),
        None => (matcher.as_str(), None),
    };
    if let Ok(rule_port) = port_text.parse::<u16>() {
        if rule_port == dst_port {
            return match proto_text {
                None => true,
                Some(p) => p == protocol.as_lower(),
            };
        }
        return false;
    }

    SERVICE_PORTS
        .iter()
        .any(|(name, port, proto)| *name == matcher && *port == dst_port && *proto == protocol.as_lower())
}

/// Source-side matcher: "anywhere"/"any" wildcard or exact IP literal.
fn source_hits(source: &str, src_ip: &str) -> bool {
    let source = source.trim().to_ascii_lowercase();
    if source == "anywhere" || source == "any" {
        return true;
    }
    source == src_ip
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::{FirewallRule, RuleAction, RuleDirection};

    fn rule(
        number: u32,
        matcher: &str,
        action: RuleAction,
        direction: Option<RuleDirection>,
        source: &str,
    ) -> FirewallRule {
        FirewallRule {
            number,
            matcher: matcher.to_string(),
            action,
            direction,
            source: source.to_string(),
        }
    }

    fn locals() -> HashSet<String> {
        ["192.168.1.2".to_string()].into_iter().collect()
    }

    #[test]
    fn default_policy_allows_outgoing_denies_incoming() {
        let rules = vec![];
        let out = classify(
            Protocol::Tcp,
            "192.168.1.2",
            "8.8.8.8",
            Some(50000),
            Some(443),
            &rules,
            &locals(),
        );
        assert_eq!(out, Verdict::Allowed);

        let inc = classify(
            Protocol::Tcp,
            "8.8.8.8",
            "192.168.1.2",
            Some(443),
            Some(50000),
            &rules,
            &locals(),
        );
        assert_eq!(inc, Verdict::Denied);
    }

    #[test]
    fn first_match_wins_over_later_opposite_rule() {
        let allow_first = vec![
            rule(1, "22/tcp", RuleAction::Allow, None, "Anywhere"),
            rule(2, "22/tcp", RuleAction::Deny, None, "Anywhere"),
        ];
        let deny_first = vec![
            rule(1, "22/tcp", RuleAction::Deny, None, "Anywhere"),
            rule(2, "22/tcp", RuleAction::Allow, None, "Anywhere"),
        ];
        let check = |rules: &[FirewallRule]| {
            classify(
                Protocol::Tcp,
                "10.1.1.1",
                "192.168.1.2",
                Some(40000),
                Some(22),
                rules,
                &locals(),
            )
        };
        assert_eq!(check(&allow_first), Verdict::Allowed);
        assert_eq!(check(&deny_first), Verdict::Denied);
    }

    #[test]
    fn direction_pinned_rule_is_skipped() {
        // incoming ssh; the only allow rule is OUT-pinned, so the default
        // incoming policy applies
        let rules = vec![rule(
            1,
            "22/tcp",
            RuleAction::Allow,
            Some(RuleDirection::Out),
            "Anywhere",
        )];
        let v = classify(
            Protocol::Tcp,
            "10.1.1.1",
            "192.168.1.2",
            Some(40000),
            Some(22),
            &rules,
            &locals(),
        );
        assert_eq!(v, Verdict::Denied);
    }

    #[test]
    fn service_name_resolves_port_and_proto() {
        let rules = vec![rule(1, "ssh", RuleAction::Allow, None, "Anywhere")];
        let hit = classify(
            Protocol::Tcp,
            "10.1.1.1",
            "192.168.1.2",
            Some(40000),
            Some(22),
            &rules,
            &locals(),
        );
        assert_eq!(hit, Verdict::Allowed);

        // same port, wrong protocol: service table requires tcp
        let miss = classify(
            Protocol::Udp,
            "10.1.1.1",
            "192.168.1.2",
            Some(40000),
            Some(22),
            &rules,
            &locals(),
        );
        assert_eq!(miss, Verdict::Denied);
    }

    #[test]
    fn bare_port_matches_any_protocol() {
        let rules = vec![rule(1, "53", RuleAction::Allow, None, "Anywhere")];
        for proto in [Protocol::Tcp, Protocol::Udp] {
            let v = classify(
                proto,
                "10.1.1.1",
                "192.168.1.2",
                Some(40000),
                Some(53),
                &rules,
                &locals(),
            );
            assert_eq!(v, Verdict::Allowed);
        }
    }

    #[test]
    fn source_restriction_must_match_exactly() {
        let rules = vec![rule(1, "22/tcp", RuleAction::Allow, None, "10.1.1.1")];
        let hit = classify(
            Protocol::Tcp,
            "10.1.1.1",
            "192.168.1.2",
            None,
            Some(22),
            &rules,
            &locals(),
        );
        assert_eq!(hit, Verdict::Allowed);

        let miss = classify(
            Protocol::Tcp,
            "10.1.1.2",
            "192.168.1.2",
            None,
            Some(22),
            &rules,
            &locals(),
        );
        assert_eq!(miss, Verdict::Denied);
    }

    #[test]
    fn portless_packet_only_matches_wildcard_rules() {
        let rules = vec![
            rule(1, "22/tcp", RuleAction::Allow, None, "Anywhere"),
            rule(2, "Anywhere", RuleAction::Deny, None, "10.9.9.9"),
        ];
        // ICMP from the denied host
        let v = classify(
            Protocol::Icmp,
            "10.9.9.9",
            "192.168.1.2",
            None,
            None,
            &rules,
            &locals(),
        );
        assert_eq!(v, Verdict::Denied);
    }
}
