use std::borrow::Cow;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::message::{
    DHO_CSR, DHO_END, DHO_MESSAGETYPE, DHO_MSCSR, DHO_OPTIONSOVERLOADED, DHO_PAD, DHO_ROUTER,
    DHO_STATICROUTE, DhcpMessage, MessageType,
};

/// Semantic type flags for option table entries. An entry may combine a
/// base type with `ARRAY` and/or `REQUEST`.
pub mod flag {
    pub const UINT8: u32 = 1 << 0;
    pub const UINT16: u32 = 1 << 1;
    pub const UINT32: u32 = 1 << 2;
    pub const SINT16: u32 = 1 << 3;
    pub const ADDRIPV4: u32 = 1 << 4;
    pub const STRING: u32 = 1 << 5;
    pub const ARRAY: u32 = 1 << 6;
    pub const REQUEST: u32 = 1 << 7;
    pub const RFC3361: u32 = 1 << 8;
    pub const RFC3397: u32 = 1 << 9;
    pub const RFC3442: u32 = 1 << 10;
    pub const RFC5969: u32 = 1 << 11;

    pub const IPV4A: u32 = ADDRIPV4 | ARRAY;
}

use flag::*;

#[derive(Debug, Clone, Copy)]
pub struct OptionEntry {
    pub option: u8,
    pub kind: u32,
    pub var: &'static str,
}

const fn entry(option: u8, kind: u32, var: &'static str) -> OptionEntry {
    OptionEntry { option, kind, var }
}

/// Every option this client understands, with the variable name used for
/// the hook environment. The CSR entries sit first: RFC 3442 requires
/// classless routes to take precedence over static routes and routers.
pub static DHCP_OPTS: &[OptionEntry] = &[
    entry(1, ADDRIPV4 | REQUEST, "subnet_mask"),
    entry(121, RFC3442, "classless_static_routes"),
    entry(249, RFC3442, "ms_classless_static_routes"),
    entry(33, IPV4A | REQUEST, "static_routes"),
    entry(3, IPV4A | REQUEST, "routers"),
    entry(2, UINT32, "time_offset"),
    entry(4, IPV4A, "time_servers"),
    entry(5, IPV4A, "ien116_name_servers"),
    entry(6, IPV4A, "domain_name_servers"),
    entry(7, IPV4A, "log_servers"),
    entry(8, IPV4A, "cookie_servers"),
    entry(9, IPV4A, "lpr_servers"),
    entry(10, IPV4A, "impress_servers"),
    entry(11, IPV4A, "resource_location_servers"),
    entry(12, STRING, "host_name"),
    entry(13, UINT16, "boot_size"),
    entry(14, STRING, "merit_dump"),
    entry(15, STRING, "domain_name"),
    entry(16, ADDRIPV4, "swap_server"),
    entry(17, STRING, "root_path"),
    entry(18, STRING, "extensions_path"),
    entry(19, UINT8, "ip_forwarding"),
    entry(20, UINT8, "non_local_source_routing"),
    entry(21, IPV4A, "policy_filter"),
    entry(22, SINT16, "max_dgram_reassembly"),
    entry(23, UINT16, "default_ip_ttl"),
    entry(24, UINT32, "path_mtu_aging_timeout"),
    entry(25, UINT16 | ARRAY, "path_mtu_plateau_table"),
    entry(26, UINT16, "interface_mtu"),
    entry(27, UINT8, "all_subnets_local"),
    entry(28, ADDRIPV4 | REQUEST, "broadcast_address"),
    entry(29, UINT8, "perform_mask_discovery"),
    entry(30, UINT8, "mask_supplier"),
    entry(31, UINT8, "router_discovery"),
    entry(32, ADDRIPV4, "router_solicitation_address"),
    entry(34, UINT8, "trailer_encapsulation"),
    entry(35, UINT32, "arp_cache_timeout"),
    entry(36, UINT16, "ieee802_3_encapsulation"),
    entry(37, UINT8, "default_tcp_ttl"),
    entry(38, UINT32, "tcp_keepalive_interval"),
    entry(39, UINT8, "tcp_keepalive_garbage"),
    entry(40, STRING, "nis_domain"),
    entry(41, IPV4A, "nis_servers"),
    entry(42, IPV4A, "ntp_servers"),
    entry(43, STRING, "vendor_encapsulated_options"),
    entry(44, IPV4A, "netbios_name_servers"),
    entry(45, ADDRIPV4, "netbios_dd_server"),
    entry(46, UINT8, "netbios_node_type"),
    entry(47, STRING, "netbios_scope"),
    entry(48, IPV4A, "font_servers"),
    entry(49, IPV4A, "x_display_manager"),
    entry(50, ADDRIPV4, "dhcp_requested_address"),
    entry(51, UINT32 | REQUEST, "dhcp_lease_time"),
    entry(52, UINT8, "dhcp_option_overload"),
    entry(53, UINT8, "dhcp_message_type"),
    entry(54, ADDRIPV4, "dhcp_server_identifier"),
    entry(55, UINT8 | ARRAY, "dhcp_parameter_request_list"),
    entry(56, STRING, "dhcp_message"),
    entry(57, UINT16, "dhcp_max_message_size"),
    entry(58, UINT32 | REQUEST, "dhcp_renewal_time"),
    entry(59, UINT32 | REQUEST, "dhcp_rebinding_time"),
    entry(64, STRING, "nisplus_domain"),
    entry(65, IPV4A, "nisplus_servers"),
    entry(66, STRING, "tftp_server_name"),
    entry(67, STRING, "bootfile_name"),
    entry(68, IPV4A, "mobile_ip_home_agent"),
    entry(69, IPV4A, "smtp_server"),
    entry(70, IPV4A, "pop_server"),
    entry(71, IPV4A, "nntp_server"),
    entry(72, IPV4A, "www_server"),
    entry(73, IPV4A, "finger_server"),
    entry(74, IPV4A, "irc_server"),
    entry(75, IPV4A, "streettalk_server"),
    entry(76, IPV4A, "streettalk_directory_assistance_server"),
    entry(77, STRING, "user_class"),
    entry(81, STRING | RFC3397, "fqdn_name"),
    entry(85, IPV4A, "nds_servers"),
    entry(86, STRING, "nds_tree_name"),
    entry(87, STRING, "nds_context"),
    entry(88, STRING | RFC3397, "bcms_controller_names"),
    entry(89, IPV4A, "bcms_controller_address"),
    entry(91, UINT32, "client_last_transaction_time"),
    entry(92, IPV4A, "associated_ip"),
    entry(98, STRING, "uap_servers"),
    entry(112, IPV4A, "netinfo_server_address"),
    entry(113, STRING, "netinfo_server_tag"),
    entry(114, STRING, "default_url"),
    entry(118, ADDRIPV4, "subnet_selection"),
    entry(119, STRING | RFC3397, "domain_search"),
    entry(120, STRING | RFC3361, "sip_server"),
    entry(212, RFC5969, "sixrd"),
];

pub fn lookup(option: u8) -> Option<&'static OptionEntry> {
    DHCP_OPTS.iter().find(|opt| opt.option == option)
}

/// The codec result for a single option lookup. A `Malformed` option is
/// treated as absent by callers; it never fails the whole message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue<'a> {
    Absent,
    Malformed,
    Value(Cow<'a, [u8]>, u32),
}

impl OptionValue<'_> {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Value(data, _) => Some(data),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Value(..))
    }
}

/// Checks a raw (possibly concatenated) value length against the table.
/// Fixed-size types reject short payloads and truncate long ones; address
/// arrays round down to whole addresses; free-form types pass through.
fn validate_length(option: u8, dl: usize) -> (Option<usize>, u32) {
    let Some(opt) = lookup(option) else {
        // unknown option, so let it pass
        return if dl == 0 { (None, 0) } else { (Some(dl), 0) };
    };

    if dl == 0 {
        return (None, opt.kind);
    }

    if opt.kind == 0 || opt.kind & (STRING | RFC3442 | RFC5969) != 0 {
        return (Some(dl), opt.kind);
    }

    if opt.kind & ADDRIPV4 != 0 && opt.kind & ARRAY != 0 {
        if dl < 4 {
            return (None, opt.kind);
        }
        return (Some(dl - dl % 4), opt.kind);
    }

    let mut sz = 0;
    if opt.kind & (UINT32 | ADDRIPV4) != 0 {
        sz = 4;
    }
    if opt.kind & UINT16 != 0 {
        sz = 2;
    }
    if opt.kind & UINT8 != 0 {
        sz = 1;
    }
    if sz == 0 {
        // If we don't know the size, assume it's valid.
        return (Some(dl), opt.kind);
    }
    if dl < sz {
        (None, opt.kind)
    } else {
        (Some(sz), opt.kind)
    }
}

/// Locates an option in the message, walking the options trailer and, when
/// option 52 says so, the `file` and `sname` fields in that order. Repeats
/// of the same code are concatenated per RFC 3396; the borrowed variant is
/// returned whenever the value was contiguous on the wire.
pub fn get_option<'a>(msg: &'a DhcpMessage, code: u8) -> OptionValue<'a> {
    let mut segments: Vec<&'a [u8]> = Vec::new();
    let mut overl: u8 = 0;
    let mut overl_seen = false;

    let mut cur: &'a [u8] = &msg.options;
    let mut p = 0usize;

    loop {
        if p >= cur.len() {
            break;
        }
        let o = cur[p];
        p += 1;

        if o == code {
            if p >= cur.len() {
                break;
            }
            let ol = cur[p] as usize;
            let start = p + 1;
            let end = (start + ol).min(cur.len());
            segments.push(&cur[start..end]);
        }

        match o {
            DHO_PAD => continue,
            DHO_END => {
                if overl & 1 != 0 {
                    // bit 1 set means parse boot file
                    overl &= !1;
                    cur = &msg.bootfile;
                    p = 0;
                } else if overl & 2 != 0 {
                    // bit 2 set means parse server name
                    overl &= !2;
                    cur = &msg.servername;
                    p = 0;
                } else {
                    break;
                }
                continue;
            }
            DHO_OPTIONSOVERLOADED => {
                // Ensure we only honour this option once.
                if !overl_seen {
                    overl_seen = true;
                    overl = *cur.get(p + 1).unwrap_or(&0);
                }
            }
            _ => {}
        }

        if p >= cur.len() {
            break;
        }
        let l = cur[p] as usize;
        p += 1 + l;
    }

    if segments.is_empty() {
        return OptionValue::Absent;
    }

    let total: usize = segments.iter().map(|s| s.len()).sum();
    let (valid, kind) = validate_length(code, total);
    let Some(valid) = valid else {
        return OptionValue::Malformed;
    };

    if segments.len() == 1 {
        OptionValue::Value(Cow::Borrowed(&segments[0][..valid]), kind)
    } else {
        let mut joined = Vec::with_capacity(total);
        for segment in segments {
            joined.extend_from_slice(segment);
        }
        joined.truncate(valid);
        OptionValue::Value(Cow::Owned(joined), kind)
    }
}

pub fn has_option(msg: &DhcpMessage, code: u8) -> bool {
    get_option(msg, code).is_present()
}

pub fn get_option_addr(msg: &DhcpMessage, code: u8) -> Option<Ipv4Addr> {
    let value = get_option(msg, code);
    let data = value.bytes()?;
    if data.len() < 4 {
        return None;
    }
    Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
}

pub fn get_option_u32(msg: &DhcpMessage, code: u8) -> Option<u32> {
    let value = get_option(msg, code);
    let data = value.bytes()?;
    if data.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

pub fn get_option_u16(msg: &DhcpMessage, code: u8) -> Option<u16> {
    let value = get_option(msg, code);
    let data = value.bytes()?;
    if data.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([data[0], data[1]]))
}

pub fn get_option_u8(msg: &DhcpMessage, code: u8) -> Option<u8> {
    get_option(msg, code).bytes()?.first().copied()
}

/// String form of an option, decoding RFC 3397/3361 payloads when the
/// table says so.
pub fn get_option_string(msg: &DhcpMessage, code: u8) -> Option<String> {
    let value = get_option(msg, code);
    let OptionValue::Value(data, kind) = value else {
        return None;
    };
    if data.is_empty() || data[0] == 0 {
        return None;
    }

    if kind & RFC3397 != 0 {
        return decode_rfc3397(&data).map(|names| names.join(" "));
    }
    if kind & RFC3361 != 0 {
        return decode_rfc3361(&data).map(|sip| sip.to_string());
    }

    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    Some(String::from_utf8_lossy(&data[..end]).into_owned())
}

impl DhcpMessage {
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(get_option_u8(self, DHO_MESSAGETYPE)?).ok()
    }

    /// A reply without a message-type option is a plain BOOTP reply,
    /// unless it is one of our own link-local constructions.
    pub fn is_bootp(&self) -> bool {
        !self.yiaddr.is_link_local() && get_option_u8(self, DHO_MESSAGETYPE).is_none()
    }
}

/// One entry of an ordered route list decoded from the routing options.
/// A default route has a zero destination and netmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub dest: Ipv4Addr,
    pub net: Ipv4Addr,
    pub gate: Ipv4Addr,
}

/// RFC 3442 classless static routes: `{cidr, dest[ceil(cidr/8)], gateway}`
/// repeated. Truncation or a prefix length over 32 voids the whole option.
pub fn decode_rfc3442(data: &[u8]) -> Option<Vec<Route>> {
    // Minimum is 5: a CIDR byte and a router length of 4.
    if data.len() < 5 {
        return None;
    }

    let mut routes = Vec::new();
    let mut p = 0;
    while p < data.len() {
        let cidr = data[p];
        p += 1;
        if cidr > 32 {
            return None;
        }
        let ocets = (cidr as usize).div_ceil(8);
        if p + ocets + 4 > data.len() {
            return None;
        }

        let mut dest = [0u8; 4];
        dest[..ocets].copy_from_slice(&data[p..p + ocets]);
        p += ocets;
        let net = if cidr == 0 { 0 } else { !0u32 << (32 - cidr) };

        let gate = Ipv4Addr::new(data[p], data[p + 1], data[p + 2], data[p + 3]);
        p += 4;

        routes.push(Route {
            dest: Ipv4Addr::from(dest),
            net: Ipv4Addr::from(net),
            gate,
        });
    }
    Some(routes)
}

/// RFC 3397 domain search list: DNS names with label compression whose
/// pointer offsets are confined to the option payload.
pub fn decode_rfc3397(data: &[u8]) -> Option<Vec<String>> {
    let mut names = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let (name, next) = read_dns_name(data, pos)?;
        if !name.is_empty() {
            names.push(name);
        }
        pos = next;
    }
    if names.is_empty() { None } else { Some(names) }
}

fn read_dns_name(data: &[u8], start: usize) -> Option<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut resume: Option<usize> = None;
    let mut jumps = 0usize;

    loop {
        let len = *data.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        match len & 0xc0 {
            0xc0 => {
                let target = ((len & 0x3f) << 8) | *data.get(pos + 1)? as usize;
                if resume.is_none() {
                    resume = Some(pos + 2);
                }
                // A pointer chain longer than the payload must be a loop.
                jumps += 1;
                if jumps > data.len() {
                    return None;
                }
                pos = target;
            }
            0x00 => {
                let label = data.get(pos + 1..pos + 1 + len)?;
                labels.push(String::from_utf8_lossy(label).into_owned());
                pos += 1 + len;
            }
            _ => return None,
        }
    }

    Some((labels.join("."), resume.unwrap_or(pos)))
}

/// RFC 3361 SIP servers: an encoding byte, then either a DNS name list
/// (0) or an IPv4 address array (1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipServers {
    Names(Vec<String>),
    Addrs(Vec<Ipv4Addr>),
}

impl std::fmt::Display for SipServers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Names(names) => write!(f, "{}", names.join(" ")),
            Self::Addrs(addrs) => {
                let text: Vec<String> = addrs.iter().map(Ipv4Addr::to_string).collect();
                write!(f, "{}", text.join(" "))
            }
        }
    }
}

pub fn decode_rfc3361(data: &[u8]) -> Option<SipServers> {
    if data.len() < 2 {
        return None;
    }
    let rest = &data[1..];
    match data[0] {
        0 => decode_rfc3397(rest).map(SipServers::Names),
        1 => {
            if rest.is_empty() || rest.len() % 4 != 0 {
                return None;
            }
            let addrs = rest
                .chunks_exact(4)
                .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                .collect();
            Some(SipServers::Addrs(addrs))
        }
        _ => None,
    }
}

/// RFC 5969 6rd option: mask lengths, a 16-byte IPv6 prefix and any
/// number of border-relay addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SixRd {
    pub ipv4_masklen: u8,
    pub ipv6_prefixlen: u8,
    pub prefix: Ipv6Addr,
    pub border_relays: Vec<Ipv4Addr>,
}

pub fn decode_rfc5969(data: &[u8]) -> Option<SixRd> {
    if data.len() < 22 {
        return None;
    }
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&data[2..18]);

    let border_relays = data[18..]
        .chunks_exact(4)
        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
        .collect();

    Some(SixRd {
        ipv4_masklen: data[0],
        ipv6_prefixlen: data[1],
        prefix: Ipv6Addr::from(prefix),
        border_relays,
    })
}

/// The netmask to assume for a legacy static route: the classful mask of
/// the destination, widened while its host part overlaps set bits. This
/// is not the same computation used for interface addresses.
fn route_netmask(dest: u32) -> u32 {
    let mut t = if dest & 0x8000_0000 == 0 {
        0x00ff_ffff
    } else if dest & 0xc000_0000 == 0x8000_0000 {
        0x0000_ffff
    } else if dest & 0xe000_0000 == 0xc000_0000 {
        0x0000_00ff
    } else {
        0
    };

    while t & dest != 0 {
        t >>= 1;
    }
    !t
}

/// Extracts the route list a reply carries. Classless routes (121, or the
/// Microsoft 249) take absolute precedence; otherwise static routes (33)
/// come first and routers (3) append default routes. Codes in `nomask`
/// are skipped. The boolean is true when classless routes were used.
pub fn get_option_routes(
    msg: &DhcpMessage,
    nomask: &crate::config::OptionMask,
) -> (Vec<Route>, bool) {
    let mut csr = OptionValue::Absent;
    if !nomask.has(DHO_CSR) {
        csr = get_option(msg, DHO_CSR);
    }
    if !csr.is_present() && !nomask.has(DHO_MSCSR) {
        csr = get_option(msg, DHO_MSCSR);
    }
    if let Some(data) = csr.bytes()
        && let Some(routes) = decode_rfc3442(data)
        && !routes.is_empty()
    {
        return (routes, true);
    }

    let mut routes = Vec::new();

    if !nomask.has(DHO_STATICROUTE)
        && let Some(data) = get_option(msg, DHO_STATICROUTE).bytes()
    {
        for pair in data.chunks_exact(8) {
            let dest = Ipv4Addr::new(pair[0], pair[1], pair[2], pair[3]);
            routes.push(Route {
                dest,
                net: Ipv4Addr::from(route_netmask(u32::from(dest))),
                gate: Ipv4Addr::new(pair[4], pair[5], pair[6], pair[7]),
            });
        }
    }

    if !nomask.has(DHO_ROUTER)
        && let Some(data) = get_option(msg, DHO_ROUTER).bytes()
    {
        for gate in data.chunks_exact(4) {
            routes.push(Route {
                dest: Ipv4Addr::UNSPECIFIED,
                net: Ipv4Addr::UNSPECIFIED,
                gate: Ipv4Addr::new(gate[0], gate[1], gate[2], gate[3]),
            });
        }
    }

    (routes, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptionMask;
    use crate::message::{DHO_LEASETIME, DHO_SUBNETMASK, MAGIC_COOKIE};

    fn msg_with_options(options: &[u8]) -> DhcpMessage {
        let mut msg = DhcpMessage {
            cookie: MAGIC_COOKIE,
            ..Default::default()
        };
        msg.options = options.to_vec();
        msg
    }

    #[test]
    fn test_single_option() {
        let msg = msg_with_options(&[DHO_SUBNETMASK, 4, 255, 255, 255, 0, DHO_END]);
        match get_option(&msg, DHO_SUBNETMASK) {
            OptionValue::Value(data, kind) => {
                assert_eq!(&data[..], &[255, 255, 255, 0]);
                assert!(matches!(data, Cow::Borrowed(_)));
                assert_eq!(kind, ADDRIPV4 | REQUEST);
            }
            other => panic!("expected value, got {:?}", other),
        }
        assert_eq!(
            get_option_addr(&msg, DHO_SUBNETMASK),
            Some(Ipv4Addr::new(255, 255, 255, 0))
        );
        assert_eq!(get_option(&msg, DHO_ROUTER), OptionValue::Absent);
    }

    #[test]
    fn test_rfc3396_concatenation() {
        // host_name split across three occurrences, interleaved with
        // another option.
        let msg = msg_with_options(&[
            12, 3, b'f', b'o', b'o',
            DHO_LEASETIME, 4, 0, 0, 0, 60,
            12, 2, b'b', b'a',
            12, 1, b'r',
            DHO_END,
        ]);
        let value = get_option(&msg, 12);
        match value {
            OptionValue::Value(data, _) => {
                assert_eq!(&data[..], b"foobar");
                assert!(matches!(data, Cow::Owned(_)));
            }
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_option_overload() {
        let mut msg = msg_with_options(&[DHO_OPTIONSOVERLOADED, 1, 3, DHO_END]);
        // file then sname, each searched exactly once after END.
        msg.bootfile[..6].copy_from_slice(&[12, 3, b'a', b'b', b'c', DHO_END]);
        msg.servername[..7].copy_from_slice(&[15, 4, b't', b'e', b's', b't', DHO_END]);

        assert_eq!(get_option_string(&msg, 12).as_deref(), Some("abc"));
        assert_eq!(get_option_string(&msg, 15).as_deref(), Some("test"));
    }

    #[test]
    fn test_overload_recorded_once() {
        let mut msg = msg_with_options(&[
            DHO_OPTIONSOVERLOADED, 1, 1,
            DHO_OPTIONSOVERLOADED, 1, 2,
            DHO_END,
        ]);
        msg.bootfile[..5].copy_from_slice(&[19, 1, 1, DHO_END, 0]);
        msg.servername[..5].copy_from_slice(&[20, 1, 1, DHO_END, 0]);

        // Only the first overload value (file) is honoured.
        assert!(has_option(&msg, 19));
        assert!(!has_option(&msg, 20));
    }

    #[test]
    fn test_length_validation() {
        // Short fixed-size payload is malformed.
        let msg = msg_with_options(&[DHO_LEASETIME, 2, 0, 60, DHO_END]);
        assert_eq!(get_option(&msg, DHO_LEASETIME), OptionValue::Malformed);

        // Long payload truncates to the nominal size.
        let msg = msg_with_options(&[DHO_LEASETIME, 6, 0, 0, 0, 60, 9, 9, DHO_END]);
        assert_eq!(get_option_u32(&msg, DHO_LEASETIME), Some(60));

        // Zero length always fails.
        let msg = msg_with_options(&[12, 0, DHO_END]);
        assert_eq!(get_option(&msg, 12), OptionValue::Malformed);

        // Address arrays round down to whole addresses.
        let msg = msg_with_options(&[DHO_ROUTER, 6, 192, 0, 2, 1, 9, 9, DHO_END]);
        match get_option(&msg, DHO_ROUTER) {
            OptionValue::Value(data, _) => assert_eq!(data.len(), 4),
            other => panic!("expected value, got {:?}", other),
        }

        // ...but fewer than four bytes is malformed.
        let msg = msg_with_options(&[DHO_ROUTER, 3, 192, 0, 2, DHO_END]);
        assert_eq!(get_option(&msg, DHO_ROUTER), OptionValue::Malformed);
    }

    #[test]
    fn test_unknown_option_passes_through() {
        let msg = msg_with_options(&[200, 2, 0xaa, 0xbb, DHO_END]);
        match get_option(&msg, 200) {
            OptionValue::Value(data, kind) => {
                assert_eq!(&data[..], &[0xaa, 0xbb]);
                assert_eq!(kind, 0);
            }
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_rfc3442_spec_sample() {
        // 10.0.0.0/18 via 192.0.2.1 plus a default route via 192.0.2.1.
        let data = [
            0x12, 0x0a, 0x00, 0x00, 0xc0, 0x00, 0x02, 0x01,
            0x00, 0xc0, 0x00, 0x02, 0x01,
        ];
        let routes = decode_rfc3442(&data).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].dest, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(routes[0].net, Ipv4Addr::new(255, 255, 192, 0));
        assert_eq!(routes[0].gate, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(routes[1].dest, Ipv4Addr::UNSPECIFIED);
        assert_eq!(routes[1].net, Ipv4Addr::UNSPECIFIED);
        assert_eq!(routes[1].gate, Ipv4Addr::new(192, 0, 2, 1));
    }

    #[test]
    fn test_rfc3442_rejects_bad_input() {
        assert!(decode_rfc3442(&[24, 10, 0, 0, 192, 0, 2]).is_none()); // truncated gateway
        assert!(decode_rfc3442(&[33, 0, 0, 0, 0, 192, 0, 2, 1]).is_none()); // cidr > 32
        assert!(decode_rfc3442(&[8, 10]).is_none()); // below minimum
    }

    #[test]
    fn test_rfc3397_plain_and_compressed() {
        // "example.com" then "sub.example.com" via a pointer to offset 0.
        let data = [
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0,
            3, b's', b'u', b'b', 0xc0, 0x00,
        ];
        let names = decode_rfc3397(&data).unwrap();
        assert_eq!(names, vec!["example.com", "sub.example.com"]);
    }

    #[test]
    fn test_rfc3397_detects_loops() {
        // A pointer to itself can never terminate.
        assert!(decode_rfc3397(&[0xc0, 0x00]).is_none());
    }

    #[test]
    fn test_rfc3361_encodings() {
        let dns = [0u8, 3, b's', b'i', b'p', 3, b'o', b'r', b'g', 0];
        assert_eq!(
            decode_rfc3361(&dns),
            Some(SipServers::Names(vec!["sip.org".into()]))
        );

        let addrs = [1u8, 192, 0, 2, 5, 192, 0, 2, 6];
        assert_eq!(
            decode_rfc3361(&addrs),
            Some(SipServers::Addrs(vec![
                Ipv4Addr::new(192, 0, 2, 5),
                Ipv4Addr::new(192, 0, 2, 6),
            ]))
        );

        assert!(decode_rfc3361(&[1, 192, 0, 2]).is_none()); // not a multiple of 4
        assert!(decode_rfc3361(&[2, 0]).is_none()); // unknown encoding
    }

    #[test]
    fn test_rfc5969() {
        let mut data = vec![16u8, 32];
        data.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        data.extend_from_slice(&[192, 0, 2, 9]);
        let sixrd = decode_rfc5969(&data).unwrap();
        assert_eq!(sixrd.ipv4_masklen, 16);
        assert_eq!(sixrd.ipv6_prefixlen, 32);
        assert_eq!(sixrd.prefix, "2001:db8::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(sixrd.border_relays, vec![Ipv4Addr::new(192, 0, 2, 9)]);

        assert!(decode_rfc5969(&data[..20]).is_none());
    }

    #[test]
    fn test_route_netmask_classful_then_narrowed() {
        // Clean class A, B and C destinations keep the classful mask.
        assert_eq!(route_netmask(u32::from(Ipv4Addr::new(10, 0, 0, 0))), 0xff00_0000);
        assert_eq!(route_netmask(u32::from(Ipv4Addr::new(172, 16, 0, 0))), 0xffff_0000);
        assert_eq!(route_netmask(u32::from(Ipv4Addr::new(192, 0, 2, 0))), 0xffff_ff00);

        // Host bits below the classful boundary narrow the mask until the
        // complement no longer overlaps them.
        assert_eq!(
            route_netmask(u32::from(Ipv4Addr::new(10, 0, 0, 1))),
            0xffff_ffff
        );
        assert_eq!(
            route_netmask(u32::from(Ipv4Addr::new(10, 64, 0, 0))),
            0xffc0_0000
        );
    }

    #[test]
    fn test_route_precedence() {
        // Both CSR and static+router options present: only CSR is used.
        let msg = msg_with_options(&[
            DHO_CSR, 5, 0, 192, 0, 2, 1,
            DHO_STATICROUTE, 8, 10, 0, 0, 0, 192, 0, 2, 2,
            DHO_ROUTER, 4, 192, 0, 2, 3,
            DHO_END,
        ]);
        let (routes, csr) = get_option_routes(&msg, &OptionMask::default());
        assert!(csr);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].gate, Ipv4Addr::new(192, 0, 2, 1));
    }

    #[test]
    fn test_static_routes_then_routers() {
        let msg = msg_with_options(&[
            DHO_STATICROUTE, 8, 10, 0, 0, 0, 192, 0, 2, 2,
            DHO_ROUTER, 4, 192, 0, 2, 3,
            DHO_END,
        ]);
        let (routes, csr) = get_option_routes(&msg, &OptionMask::default());
        assert!(!csr);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].dest, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(routes[0].net, Ipv4Addr::new(255, 0, 0, 0));
        assert_eq!(routes[1].dest, Ipv4Addr::UNSPECIFIED);
        assert_eq!(routes[1].gate, Ipv4Addr::new(192, 0, 2, 3));
    }

    #[test]
    fn test_bootp_detection() {
        let msg = msg_with_options(&[DHO_LEASETIME, 4, 0, 0, 0, 60, DHO_END]);
        assert!(msg.is_bootp());

        let msg = msg_with_options(&[DHO_MESSAGETYPE, 1, 5, DHO_END]);
        assert!(!msg.is_bootp());
        assert_eq!(msg.message_type(), Some(MessageType::Ack));
    }
}
