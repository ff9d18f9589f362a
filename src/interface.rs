use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Instant;

use crate::message::HTYPE_ETHERNET;

/// Identity and current addressing of the managed interface. The engine
/// owns one of these per instance; the address fields track what the
/// platform shim has actually installed.
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub hwtype: u8,
    pub hwaddr: Vec<u8>,
    pub addr: Ipv4Addr,
    pub net: Ipv4Addr,
    /// Peer address on point-to-point links.
    pub dst: Ipv4Addr,
    pub point_to_point: bool,
    pub carrier_down: bool,
    pub lease_file: PathBuf,
    pub start_uptime: Instant,
}

impl Interface {
    pub fn new(name: &str, hwaddr: &[u8], lease_file: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            hwtype: HTYPE_ETHERNET,
            hwaddr: hwaddr.to_vec(),
            addr: Ipv4Addr::UNSPECIFIED,
            net: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
            point_to_point: false,
            carrier_down: false,
            lease_file,
            start_uptime: Instant::now(),
        }
    }

    pub fn hwlen(&self) -> u8 {
        self.hwaddr.len().min(16) as u8
    }

    /// True when a reply's chaddr is ours. Oversized hardware addresses
    /// cannot fit in chaddr and are never compared.
    pub fn hwaddr_matches(&self, chaddr: &[u8; 16]) -> bool {
        if self.hwaddr.len() > chaddr.len() {
            return true;
        }
        chaddr[..self.hwaddr.len()] == self.hwaddr[..]
    }
}
