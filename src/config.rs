use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A set of DHCP option codes, used for the request/require/exclude
/// configuration knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionMask(BTreeSet<u8>);

impl OptionMask {
    pub fn has(&self, code: u8) -> bool {
        self.0.contains(&code)
    }

    pub fn set(&mut self, code: u8) {
        self.0.insert(code);
    }
}

impl FromIterator<u8> for OptionMask {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// RFC 4702 FQDN update mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fqdn {
    #[default]
    Disable,
    None,
    Ptr,
    Both,
}

impl Fqdn {
    pub fn raw(self) -> u8 {
        match self {
            Self::Disable => 0,
            Self::None => 1,
            Self::Ptr => 2,
            Self::Both => 3,
        }
    }
}

/// Process-level mode, passed explicitly instead of living in globals.
/// `test` runs one exchange, reports through the hook and stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    pub test: bool,
    pub master: bool,
    pub daemonised: bool,
}

/// An address prefix filter entry: a packet source matches when
/// `source & mask == addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrFilter {
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl AddrFilter {
    pub fn matches(&self, source: Ipv4Addr) -> bool {
        u32::from(source) & u32::from(self.mask) == u32::from(self.addr)
    }
}

/// Typed per-interface configuration. Produced by whatever configuration
/// frontend the host uses; JSON is the native surface here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Ask servers to broadcast their replies.
    pub broadcast: bool,
    pub hostname: Option<String>,
    pub fqdn: Fqdn,
    /// Raw client identifier, emitted as option 61 when set.
    pub client_id: Option<Vec<u8>>,
    /// Pre-encoded payloads; empty means "do not send".
    pub user_class: Vec<u8>,
    pub vendor_class_id: Vec<u8>,
    pub vendor: Vec<u8>,
    /// Requested lease time in seconds; 0 leaves it to the server.
    pub lease_time: u32,
    pub request_addr: Option<Ipv4Addr>,
    pub request_netmask: Option<Ipv4Addr>,
    /// Use `request_addr`/`request_netmask` verbatim, no DHCP exchange.
    pub static_addr: bool,
    pub inform: bool,
    pub ipv4ll: bool,
    pub arp: bool,
    /// Derive the xid from the hardware address instead of the RNG.
    pub xid_hwaddr: bool,
    /// On reboot timeout, bind the cached lease before rediscovering.
    pub lastlease: bool,
    /// DISCOVER timeout in seconds before fallback/IPv4LL kicks in.
    pub timeout: u32,
    /// INIT-REBOOT timeout in seconds.
    pub reboot: u32,
    pub fallback: Option<String>,
    /// Extra option codes for the parameter request list.
    pub requestmask: OptionMask,
    /// Option codes a reply must carry to be accepted.
    pub requiremask: OptionMask,
    /// Option codes excluded from routes and the hook environment.
    pub nomask: OptionMask,
    pub whitelist: Vec<AddrFilter>,
    pub blacklist: Vec<AddrFilter>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broadcast: false,
            hostname: None,
            fqdn: Fqdn::Disable,
            client_id: None,
            user_class: Vec::new(),
            vendor_class_id: Vec::new(),
            vendor: Vec::new(),
            lease_time: 0,
            request_addr: None,
            request_netmask: None,
            static_addr: false,
            inform: false,
            ipv4ll: true,
            arp: true,
            xid_hwaddr: false,
            lastlease: false,
            timeout: 30,
            reboot: 5,
            fallback: None,
            requestmask: OptionMask::default(),
            requiremask: OptionMask::default(),
            nomask: OptionMask::default(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

fn is_contiguous_mask(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);
    if bits == 0 {
        return false;
    }
    let inverted = !bits;
    inverted.count_ones() == inverted.trailing_ones()
}

impl ClientConfig {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ClientConfig = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = ClientConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.static_addr && self.request_addr.is_none() {
            return Err(Error::InvalidConfig(
                "static_addr requires request_addr".to_string(),
            ));
        }

        if let Some(mask) = self.request_netmask
            && !is_contiguous_mask(mask)
        {
            return Err(Error::InvalidConfig(format!(
                "invalid netmask: {} (must be contiguous)",
                mask
            )));
        }

        if self.timeout == 0 {
            return Err(Error::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(id) = &self.client_id
            && id.is_empty()
        {
            return Err(Error::InvalidConfig(
                "client_id must not be empty when set".to_string(),
            ));
        }

        Ok(())
    }
}
