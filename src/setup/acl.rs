//! # Lista de Control de Acceso
//! src/setup/acl.rs
//!
//! `access_control_list` es una lista separada por comas de reglas
//! `[+-]IPv4[/bits]`. Si la primera regla es `-` el default es permitir,
//! si no el default es denegar. Se evalúan todas las reglas y gana la última
//! que coincide.
//!
//! ```text
//! -0.0.0.0/0,+192.168.0.0/16   solo la red 192.168.x.x
//! -10.0.0.1                    todos menos 10.0.0.1
//! ```

use super::{Setup, SetupStep};
use crate::config::OptionIndex;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

static RULE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn rule_pattern() -> &'static Regex {
    RULE_PATTERN.get_or_init(|| {
        Regex::new(r"^([+-])\s*(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?:/(\d{1,2}))?$")
            .expect("ACL rule pattern is valid")
    })
}

/// Una regla de la lista
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclRule {
    pub allow: bool,
    network: u32,
    mask: u32,
}

impl AclRule {
    fn matches(&self, ip: u32) -> bool {
        ip & self.mask == self.network
    }
}

/// Lista compilada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    rules: Vec<AclRule>,
    default_allow: bool,
}

impl Acl {
    /// Compila la lista; falla en la primera regla mal formada
    pub fn parse(list: &str) -> Result<Self, String> {
        let mut rules = Vec::new();

        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let caps = rule_pattern()
                .captures(entry)
                .ok_or_else(|| format!("Invalid ACL entry '{}'", entry))?;

            let allow = &caps[1] == "+";
            let addr: Ipv4Addr = caps[2]
                .parse()
                .map_err(|_| format!("Invalid ACL address in '{}'", entry))?;
            let bits: u32 = match caps.get(3) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .ok()
                    .filter(|&b| b <= 32)
                    .ok_or_else(|| format!("Invalid ACL mask in '{}'", entry))?,
                None => 32,
            };

            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            rules.push(AclRule {
                allow,
                network: u32::from(addr) & mask,
                mask,
            });
        }

        if rules.is_empty() {
            return Err("Empty access control list".to_string());
        }

        let default_allow = !rules[0].allow;
        Ok(Self {
            rules,
            default_allow,
        })
    }

    /// Decide si un cliente puede conectarse
    ///
    /// Las direcciones IPv6 que no mapean a IPv4 reciben el default.
    pub fn allows(&self, ip: IpAddr) -> bool {
        let v4 = match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(v6) => v6.to_ipv4_mapped(),
        };
        let Some(v4) = v4 else {
            return self.default_allow;
        };

        let ip = u32::from(v4);
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(ip))
            .map_or(self.default_allow, |rule| rule.allow)
    }

    pub fn rules(&self) -> &[AclRule] {
        &self.rules
    }
}

/// Colaborador que compila `access_control_list`
pub struct AccessControl;

impl SetupStep for AccessControl {
    fn name(&self) -> &'static str {
        "access_control_list"
    }

    fn apply(&self, setup: &mut Setup) -> bool {
        let Some(list) = setup.config().get_non_empty(OptionIndex::AccessControlList) else {
            return true;
        };

        match Acl::parse(list) {
            Ok(acl) => {
                setup.set_acl(acl);
                true
            }
            Err(e) => {
                setup.cry(&e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_allow_only_subnet() {
        let acl = Acl::parse("-0.0.0.0/0,+192.168.0.0/16").unwrap();
        assert!(acl.allows(ip("192.168.1.20")));
        assert!(!acl.allows(ip("10.0.0.1")));
    }

    #[test]
    fn test_deny_single_host() {
        let acl = Acl::parse("-10.0.0.1").unwrap();
        assert!(!acl.allows(ip("10.0.0.1")));
        assert!(acl.allows(ip("10.0.0.2")));
    }

    #[test]
    fn test_leading_allow_defaults_to_deny() {
        let acl = Acl::parse("+127.0.0.1").unwrap();
        assert!(acl.allows(ip("127.0.0.1")));
        assert!(!acl.allows(ip("127.0.0.2")));
    }

    #[test]
    fn test_last_match_wins() {
        let acl = Acl::parse("+10.0.0.0/8,-10.1.0.0/16,+10.1.2.3").unwrap();
        assert!(acl.allows(ip("10.200.0.1")));
        assert!(!acl.allows(ip("10.1.9.9")));
        assert!(acl.allows(ip("10.1.2.3")));
    }

    #[test]
    fn test_ipv4_mapped_ipv6() {
        let acl = Acl::parse("+127.0.0.1").unwrap();
        assert!(acl.allows(ip("::ffff:127.0.0.1")));
        assert!(!acl.allows(ip("::1")));
    }

    #[test]
    fn test_rules_keep_declaration_order() {
        let acl = Acl::parse("-0.0.0.0/0, +192.168.0.0/16 ,+10.0.0.1").unwrap();
        let allows: Vec<bool> = acl.rules().iter().map(|rule| rule.allow).collect();
        assert_eq!(allows, vec![false, true, true]);
    }

    #[test]
    fn test_malformed_entries() {
        assert!(Acl::parse("127.0.0.1").is_err());
        assert!(Acl::parse("+300.0.0.1").is_err());
        assert!(Acl::parse("+10.0.0.0/33").is_err());
        assert!(Acl::parse(" , ").is_err());
    }
}
