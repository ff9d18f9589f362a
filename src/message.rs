use std::net::Ipv4Addr;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Marks the start of the DHCP options area within the BOOTP vendor field.
pub const MAGIC_COOKIE: u32 = 0x6382_5363;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const HTYPE_ETHERNET: u8 = 1;

pub const BROADCAST_FLAG: u16 = 0x8000;

/// Fixed BOOTP fields plus the magic cookie.
pub const DHCP_FIXED_LEN: usize = 240;
/// Minimum options capacity a server may assume (RFC 2131 §2).
pub const DHCP_OPTIONS_LEN: usize = 312;
pub const DHCP_MESSAGE_MAX: usize = DHCP_FIXED_LEN + DHCP_OPTIONS_LEN;
/// Some BOOTP relays drop anything shorter than the classic minimum.
pub const BOOTP_MESSAGE_MIN: usize = 300;

pub const DHCP_MIN_LEASE: u32 = 20;

pub const MTU_MIN: u16 = 576;
pub const MTU_MAX: u16 = 1500;

// Option codes referenced by name. Everything else is table-driven in
// `options::DHCP_OPTS`.
pub const DHO_PAD: u8 = 0;
pub const DHO_SUBNETMASK: u8 = 1;
pub const DHO_ROUTER: u8 = 3;
pub const DHO_HOSTNAME: u8 = 12;
pub const DHO_BROADCAST: u8 = 28;
pub const DHO_STATICROUTE: u8 = 33;
pub const DHO_VENDOR: u8 = 43;
pub const DHO_IPADDRESS: u8 = 50;
pub const DHO_LEASETIME: u8 = 51;
pub const DHO_OPTIONSOVERLOADED: u8 = 52;
pub const DHO_MESSAGETYPE: u8 = 53;
pub const DHO_SERVERID: u8 = 54;
pub const DHO_PARAMETERREQUESTLIST: u8 = 55;
pub const DHO_MESSAGE: u8 = 56;
pub const DHO_MAXMESSAGESIZE: u8 = 57;
pub const DHO_RENEWALTIME: u8 = 58;
pub const DHO_REBINDTIME: u8 = 59;
pub const DHO_VENDORCLASSID: u8 = 60;
pub const DHO_CLIENTID: u8 = 61;
pub const DHO_USERCLASS: u8 = 77;
pub const DHO_FQDN: u8 = 81;
pub const DHO_DNSSEARCH: u8 = 119;
pub const DHO_SIP: u8 = 120;
pub const DHO_CSR: u8 = 121;
pub const DHO_SIXRD: u8 = 212;
pub const DHO_MSCSR: u8 = 249;
pub const DHO_END: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// A BOOTP/DHCP message in wire form: the 236 fixed bytes, the cookie and
/// the raw options trailer. The trailer is kept as received; all option
/// interpretation happens in [`crate::options`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub op: u8,
    pub hwtype: u8,
    pub hwlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub servername: [u8; 64],
    pub bootfile: [u8; 128],
    pub cookie: u32,
    pub options: Vec<u8>,
}

impl Default for DhcpMessage {
    fn default() -> Self {
        Self {
            op: 0,
            hwtype: 0,
            hwlen: 0,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; 16],
            servername: [0; 64],
            bootfile: [0; 128],
            cookie: 0,
            options: Vec::new(),
        }
    }
}

fn addr_at(raw: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(raw[at], raw[at + 1], raw[at + 2], raw[at + 3])
}

impl DhcpMessage {
    /// Decodes a message from raw bytes. Short input is zero-padded, as a
    /// truncated lease file must still yield a usable message; anything
    /// beyond the wire maximum is ignored. Garbage input is caught later
    /// by the cookie, xid and chaddr filters.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut raw = [0u8; DHCP_MESSAGE_MAX];
        let len = data.len().min(DHCP_MESSAGE_MAX);
        raw[..len].copy_from_slice(&data[..len]);

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&raw[28..44]);
        let mut servername = [0u8; 64];
        servername.copy_from_slice(&raw[44..108]);
        let mut bootfile = [0u8; 128];
        bootfile.copy_from_slice(&raw[108..236]);

        Self {
            op: raw[0],
            hwtype: raw[1],
            hwlen: raw[2],
            hops: raw[3],
            xid: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
            secs: u16::from_be_bytes([raw[8], raw[9]]),
            flags: u16::from_be_bytes([raw[10], raw[11]]),
            ciaddr: addr_at(&raw, 12),
            yiaddr: addr_at(&raw, 16),
            siaddr: addr_at(&raw, 20),
            giaddr: addr_at(&raw, 24),
            chaddr,
            servername,
            bootfile,
            cookie: u32::from_be_bytes([raw[236], raw[237], raw[238], raw[239]]),
            options: data
                .get(DHCP_FIXED_LEN..len)
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DHCP_FIXED_LEN + self.options.len());

        out.push(self.op);
        out.push(self.hwtype);
        out.push(self.hwlen);
        out.push(self.hops);
        out.extend_from_slice(&self.xid.to_be_bytes());
        out.extend_from_slice(&self.secs.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&self.ciaddr.octets());
        out.extend_from_slice(&self.yiaddr.octets());
        out.extend_from_slice(&self.siaddr.octets());
        out.extend_from_slice(&self.giaddr.octets());
        out.extend_from_slice(&self.chaddr);
        out.extend_from_slice(&self.servername);
        out.extend_from_slice(&self.bootfile);
        out.extend_from_slice(&self.cookie.to_be_bytes());
        out.extend_from_slice(&self.options);

        out
    }

    /// Byte count of the message up to and including the END option, which
    /// is all the lease file stores. Without an END the whole trailer
    /// counts.
    pub fn trimmed_len(&self) -> usize {
        let mut at = 0;
        while at < self.options.len() {
            match self.options[at] {
                DHO_END => return DHCP_FIXED_LEN + at + 1,
                DHO_PAD => at += 1,
                _ => {
                    if at + 1 >= self.options.len() {
                        break;
                    }
                    at += 2 + self.options[at + 1] as usize;
                }
            }
        }
        DHCP_FIXED_LEN + self.options.len()
    }

    pub fn format_hwaddr(&self) -> String {
        let len = (self.hwlen as usize).min(self.chaddr.len());
        self.chaddr[..len]
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn is_broadcast(&self) -> bool {
        (self.flags & BROADCAST_FLAG) != 0
    }
}
