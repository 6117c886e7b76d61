//! Address ranges answered without a registry call.

use std::net::Ipv4Addr;

use circuitmap_recon::config::{Ipv4Cidr, StaticRange};

use crate::error::RegistryError;

/// Private, shared and reserved IPv4 space. Nothing useful is registered here.
const RESERVED: [Ipv4Cidr; 14] = [
    Ipv4Cidr::new(0, 0, 0, 0, 8),
    Ipv4Cidr::new(10, 0, 0, 0, 8),
    Ipv4Cidr::new(100, 64, 0, 0, 10),
    Ipv4Cidr::new(127, 0, 0, 0, 8),
    Ipv4Cidr::new(169, 254, 0, 0, 16),
    Ipv4Cidr::new(172, 16, 0, 0, 12),
    Ipv4Cidr::new(192, 0, 0, 0, 24),
    Ipv4Cidr::new(192, 0, 2, 0, 24),
    Ipv4Cidr::new(192, 168, 0, 0, 16),
    Ipv4Cidr::new(198, 18, 0, 0, 15),
    Ipv4Cidr::new(198, 51, 100, 0, 24),
    Ipv4Cidr::new(203, 0, 113, 0, 24),
    Ipv4Cidr::new(224, 0, 0, 0, 4),
    Ipv4Cidr::new(240, 0, 0, 0, 4),
];

pub fn is_reserved(ip: Ipv4Addr) -> bool {
    RESERVED.iter().any(|r| r.contains(ip))
}

/// Configured static ownership, most specific range first.
#[derive(Debug, Clone, Default)]
pub struct StaticRanges {
    ranges: Vec<(Ipv4Cidr, String)>,
}

impl StaticRanges {
    pub fn new(entries: &[StaticRange]) -> Result<Self, RegistryError> {
        let mut ranges = entries
            .iter()
            .map(|e| {
                Ipv4Cidr::parse(&e.cidr)
                    .map(|cidr| (cidr, e.organization.clone()))
                    .ok_or_else(|| RegistryError::InvalidAddress(format!("bad CIDR '{}'", e.cidr)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ranges.sort_by(|a, b| b.0.prefix().cmp(&a.0.prefix()));
        Ok(Self { ranges })
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<&str> {
        self.ranges
            .iter()
            .find(|(cidr, _)| cidr.contains(ip))
            .map(|(_, org)| org.as_str())
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
