//! Client address pool and DNS server selection

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::{debug, warn};

/// Ranges a client pool must never overlap: common corporate and home LANs.
const RESERVED_RANGES: [&str; 2] = ["10.0.0.0/8", "192.168.0.0/16"];

/// Name AWS uses in DHCP options for the VPC resolver.
const AMAZON_PROVIDED_DNS: &str = "AmazonProvidedDNS";

/// Client VPN endpoints accept at most two DNS servers.
const MAX_DNS_SERVERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    fn mask(prefix: u8) -> u32 {
        if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        let mask = Self::mask(self.prefix.min(other.prefix));
        self.network & mask == other.network & mask
    }

    /// Address `offset` past the network address.
    pub fn offset(&self, offset: u32) -> Ipv4Addr {
        Ipv4Addr::from(self.network.wrapping_add(offset))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("'{}' is not in address/prefix form", s))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("'{}' has a bad address: {}", s, e))?;
        let prefix: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| format!("'{}' has a bad prefix length", s))?;

        Ok(Self {
            network: u32::from(addr) & Self::mask(prefix),
            prefix,
        })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

/// First candidate that overlaps neither the reserved ranges nor `in_use`.
pub fn select_client_cidr(candidates: &[String], in_use: &[Ipv4Cidr]) -> Option<Ipv4Cidr> {
    let reserved: Vec<Ipv4Cidr> = RESERVED_RANGES
        .iter()
        .filter_map(|r| r.parse().ok())
        .collect();

    for candidate in candidates {
        let cidr: Ipv4Cidr = match candidate.parse() {
            Ok(cidr) => cidr,
            Err(e) => {
                warn!("Skipping client CIDR candidate: {}", e);
                continue;
            }
        };

        if let Some(clash) = reserved.iter().chain(in_use).find(|r| r.overlaps(&cidr)) {
            debug!("Client CIDR {} overlaps {}", cidr, clash);
            continue;
        }
        return Some(cidr);
    }

    None
}

/// Turn DHCP `domain-name-servers` values into usable resolver addresses.
///
/// `AmazonProvidedDNS` becomes the VPC resolver at base + 2. Falls back to
/// `fallback` when nothing usable remains.
pub fn select_dns_servers(
    dhcp_values: &[String],
    vpc_cidr: Option<&Ipv4Cidr>,
    fallback: &[String],
) -> Vec<String> {
    let mut servers: Vec<String> = Vec::new();

    for value in dhcp_values {
        let resolved = if value == AMAZON_PROVIDED_DNS {
            match vpc_cidr {
                Some(cidr) => Some(cidr.offset(2).to_string()),
                None => {
                    warn!("Cannot resolve {} without the VPC CIDR", AMAZON_PROVIDED_DNS);
                    None
                }
            }
        } else if value.parse::<Ipv4Addr>().is_ok() {
            Some(value.clone())
        } else {
            debug!("Ignoring DNS server value {}", value);
            None
        };

        if let Some(server) = resolved {
            if !servers.contains(&server) {
                servers.push(server);
            }
        }
    }

    if servers.is_empty() {
        servers = fallback.to_vec();
    }
    servers.truncate(MAX_DNS_SERVERS);
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Ipv4Cidr {
        s.parse().unwrap()
    }

    fn defaults() -> Vec<String> {
        ["172.20.0.0/22", "172.21.0.0/22", "172.22.0.0/22", "172.23.0.0/22"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_parse_normalizes_host_bits() {
        assert_eq!(cidr("10.1.2.3/16").to_string(), "10.1.0.0/16");
        assert_eq!(cidr("0.0.0.0/0").to_string(), "0.0.0.0/0");
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("300.0.0.0/8".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn test_overlaps() {
        assert!(cidr("10.0.0.0/8").overlaps(&cidr("10.200.0.0/16")));
        assert!(cidr("10.200.0.0/16").overlaps(&cidr("10.0.0.0/8")));
        assert!(!cidr("172.20.0.0/22").overlaps(&cidr("172.20.4.0/22")));
        assert!(cidr("172.16.0.0/12").overlaps(&cidr("172.21.0.0/22")));
    }

    #[test]
    fn test_first_candidate_for_typical_vpc() {
        let selected = select_client_cidr(&defaults(), &[cidr("10.0.0.0/16"), cidr("10.0.1.0/24")]);
        assert_eq!(selected, Some(cidr("172.20.0.0/22")));
    }

    #[test]
    fn test_skips_candidate_inside_default_vpc() {
        let selected = select_client_cidr(&defaults(), &[cidr("172.20.0.0/16")]);
        assert_eq!(selected, Some(cidr("172.21.0.0/22")));
    }

    #[test]
    fn test_no_candidate_left() {
        assert_eq!(select_client_cidr(&defaults(), &[cidr("172.16.0.0/12")]), None);
        let reserved_only = vec!["10.8.0.0/22".to_string(), "192.168.4.0/22".to_string()];
        assert_eq!(select_client_cidr(&reserved_only, &[]), None);
    }

    #[test]
    fn test_amazon_provided_dns() {
        let vpc = cidr("172.31.0.0/16");
        let servers = select_dns_servers(
            &["AmazonProvidedDNS".to_string()],
            Some(&vpc),
            &["8.8.8.8".to_string()],
        );
        assert_eq!(servers, vec!["172.31.0.2"]);
    }

    #[test]
    fn test_custom_dns_is_kept_and_capped() {
        let values: Vec<String> = ["10.2.5.1", "10.2.5.2", "10.2.5.3", "10.2.5.1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let servers = select_dns_servers(&values, None, &[]);
        assert_eq!(servers, vec!["10.2.5.1", "10.2.5.2"]);
    }

    #[test]
    fn test_fallback_when_nothing_usable() {
        let fallback = vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()];
        assert_eq!(select_dns_servers(&[], None, &fallback), fallback);
        assert_eq!(
            select_dns_servers(&["AmazonProvidedDNS".to_string()], None, &fallback),
            fallback
        );
        assert_eq!(
            select_dns_servers(&["dns.example.com".to_string()], None, &fallback),
            fallback
        );
    }
}
