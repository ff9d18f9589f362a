use std::net::Ipv4Addr;

use crate::config::OptionMask;
use crate::message::{DHO_BROADCAST, DHO_FQDN, DHO_OPTIONSOVERLOADED, DHO_SUBNETMASK, DhcpMessage};
use crate::net::classful_netmask;
use crate::options::{
    DHCP_OPTS, OptionValue, decode_rfc3361, decode_rfc3397, decode_rfc3442, decode_rfc5969, flag,
    get_option, get_option_addr, get_option_u8,
};

fn cstr(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn escape_string(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        if b == 0 {
            break;
        }
        let c = b as char;
        if b.is_ascii_graphic() || c == ' ' {
            out.push(c);
        } else {
            out.push_str(&format!("\\{:03o}", b));
        }
    }
    out
}

fn fmt_routes(routes: &[crate::options::Route]) -> String {
    routes
        .iter()
        .map(|r| {
            format!(
                "{}/{} {}",
                r.dest,
                u32::from(r.net).count_ones(),
                r.gate
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders one option value the way the hook script expects it, driven
/// by the table's type flags.
fn fmt_option(data: &[u8], kind: u32) -> String {
    if kind & flag::RFC3442 != 0 {
        return decode_rfc3442(data)
            .map(|routes| fmt_routes(&routes))
            .unwrap_or_default();
    }
    if kind & flag::RFC3397 != 0 {
        return decode_rfc3397(data)
            .map(|names| names.join(" "))
            .unwrap_or_default();
    }
    if kind & flag::RFC3361 != 0 {
        return decode_rfc3361(data)
            .map(|sip| sip.to_string())
            .unwrap_or_default();
    }
    if kind & flag::RFC5969 != 0 {
        let Some(sixrd) = decode_rfc5969(data) else {
            return String::new();
        };
        let octets = sixrd.prefix.octets();
        let mut out = format!("{} {} ", sixrd.ipv4_masklen, sixrd.ipv6_prefixlen);
        let groups: Vec<String> = octets
            .chunks_exact(2)
            .map(|pair| format!("{:02x}{:02x}", pair[0], pair[1]))
            .collect();
        out.push_str(&groups.join(":"));
        for br in &sixrd.border_relays {
            out.push(' ');
            out.push_str(&br.to_string());
        }
        return out;
    }
    if kind & flag::STRING != 0 {
        return escape_string(data);
    }
    if kind & flag::ADDRIPV4 != 0 {
        return data
            .chunks_exact(4)
            .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]).to_string())
            .collect::<Vec<_>>()
            .join(" ");
    }
    if kind & flag::UINT32 != 0 {
        return data
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]).to_string())
            .collect::<Vec<_>>()
            .join(" ");
    }
    if kind & flag::UINT16 != 0 {
        return data
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]).to_string())
            .collect::<Vec<_>>()
            .join(" ");
    }
    if kind & flag::SINT16 != 0 {
        return data
            .chunks_exact(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]).to_string())
            .collect::<Vec<_>>()
            .join(" ");
    }
    if kind & flag::UINT8 != 0 {
        return data
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(" ");
    }
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Flattens a bound message into the `{prefix}_{name}=value` pairs the
/// hook script consumes: the derived addressing variables, the BOOTP
/// file/sname fields when not overloaded, then every known option.
pub fn collect(prefix: &str, msg: &DhcpMessage, nomask: &OptionMask) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = Vec::new();
    let overl = get_option_u8(msg, DHO_OPTIONSOVERLOADED).unwrap_or(0);

    if msg.yiaddr != Ipv4Addr::UNSPECIFIED || msg.ciaddr != Ipv4Addr::UNSPECIFIED {
        // Variables derived from the message that are not necessarily in
        // the options.
        let addr = if msg.yiaddr != Ipv4Addr::UNSPECIFIED {
            msg.yiaddr
        } else {
            msg.ciaddr
        };
        env.push((format!("{}_ip_address", prefix), addr.to_string()));

        let net = match get_option_addr(msg, DHO_SUBNETMASK) {
            Some(net) => net,
            None => {
                let net = classful_netmask(addr);
                env.push((format!("{}_subnet_mask", prefix), net.to_string()));
                net
            }
        };
        env.push((
            format!("{}_subnet_cidr", prefix),
            u32::from(net).count_ones().to_string(),
        ));

        if get_option_addr(msg, DHO_BROADCAST).is_none() {
            let brd = Ipv4Addr::from(u32::from(addr) | !u32::from(net));
            env.push((format!("{}_broadcast_address", prefix), brd.to_string()));
        }

        let network = Ipv4Addr::from(u32::from(msg.yiaddr) & u32::from(net));
        env.push((format!("{}_network_number", prefix), network.to_string()));
    }

    if msg.bootfile[0] != 0 && overl & 1 == 0 {
        env.push((format!("{}_filename", prefix), cstr(&msg.bootfile)));
    }
    if msg.servername[0] != 0 && overl & 2 == 0 {
        env.push((format!("{}_server_name", prefix), cstr(&msg.servername)));
    }

    for opt in DHCP_OPTS {
        if nomask.has(opt.option) {
            continue;
        }
        let OptionValue::Value(data, kind) = get_option(msg, opt.option) else {
            continue;
        };
        // Only the name part of the FQDN option is worth exporting.
        let data: &[u8] = if opt.option == DHO_FQDN {
            if data.len() <= 3 {
                continue;
            }
            &data[3..]
        } else {
            &data
        };
        env.push((
            format!("{}_{}", prefix, opt.var),
            fmt_option(data, kind),
        ));
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DHO_END, DHO_LEASETIME, DHO_MESSAGETYPE, DHO_ROUTER, MAGIC_COOKIE};

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn ack() -> DhcpMessage {
        let mut msg = DhcpMessage {
            cookie: MAGIC_COOKIE,
            yiaddr: Ipv4Addr::new(192, 0, 2, 10),
            ..Default::default()
        };
        msg.options = vec![
            DHO_MESSAGETYPE, 1, 5,
            DHO_SUBNETMASK, 4, 255, 255, 255, 0,
            DHO_ROUTER, 4, 192, 0, 2, 1,
            DHO_LEASETIME, 4, 0, 0, 0x0e, 0x10,
            DHO_END,
        ];
        msg
    }

    #[test]
    fn test_derived_variables() {
        let env = collect("new", &ack(), &OptionMask::default());

        assert_eq!(lookup(&env, "new_ip_address"), Some("192.0.2.10"));
        assert_eq!(lookup(&env, "new_subnet_cidr"), Some("24"));
        assert_eq!(lookup(&env, "new_network_number"), Some("192.0.2.0"));
        // Mask came as an option, so the table entry carries it.
        assert_eq!(lookup(&env, "new_subnet_mask"), Some("255.255.255.0"));
        // Broadcast was absent and gets derived.
        assert_eq!(lookup(&env, "new_broadcast_address"), Some("192.0.2.255"));
        assert_eq!(lookup(&env, "new_routers"), Some("192.0.2.1"));
        assert_eq!(lookup(&env, "new_dhcp_lease_time"), Some("3600"));
    }

    #[test]
    fn test_classful_mask_derived_when_absent() {
        let mut msg = ack();
        msg.options = vec![DHO_MESSAGETYPE, 1, 5, DHO_END];
        let env = collect("new", &msg, &OptionMask::default());
        assert_eq!(lookup(&env, "new_subnet_mask"), Some("255.255.255.0"));
        assert_eq!(lookup(&env, "new_subnet_cidr"), Some("24"));
    }

    #[test]
    fn test_filename_and_servername() {
        let mut msg = ack();
        msg.bootfile[..8].copy_from_slice(b"pxe.bin\0");
        msg.servername[..5].copy_from_slice(b"srv1\0");
        let env = collect("new", &msg, &OptionMask::default());
        assert_eq!(lookup(&env, "new_filename"), Some("pxe.bin"));
        assert_eq!(lookup(&env, "new_server_name"), Some("srv1"));

        // Overloaded fields hold options, not strings.
        let mut overloaded = msg.clone();
        overloaded.options.truncate(overloaded.options.len() - 1);
        overloaded
            .options
            .extend_from_slice(&[crate::message::DHO_OPTIONSOVERLOADED, 1, 3, DHO_END]);
        overloaded.bootfile[..8].copy_from_slice(&[17, 5, b'/', b'r', b'o', b'o', b't', DHO_END]);
        let env = collect("new", &overloaded, &OptionMask::default());
        assert_eq!(lookup(&env, "new_filename"), None);
        assert_eq!(lookup(&env, "new_server_name"), None);
        assert_eq!(lookup(&env, "new_root_path"), Some("/root"));
    }

    #[test]
    fn test_fqdn_strips_flags() {
        let mut msg = ack();
        msg.options.truncate(msg.options.len() - 1);
        let name = crate::builder::encode_rfc1035("worklap.example.org");
        msg.options.push(DHO_FQDN);
        msg.options.push(3 + name.len() as u8);
        msg.options.extend_from_slice(&[0x05, 0, 0]);
        msg.options.extend_from_slice(&name);
        msg.options.push(DHO_END);

        let env = collect("new", &msg, &OptionMask::default());
        assert_eq!(lookup(&env, "new_fqdn_name"), Some("worklap.example.org"));
    }

    #[test]
    fn test_nomask_excludes() {
        let nomask: OptionMask = [DHO_ROUTER].into_iter().collect();
        let env = collect("new", &ack(), &nomask);
        assert_eq!(lookup(&env, "new_routers"), None);
        assert_eq!(lookup(&env, "new_subnet_mask"), Some("255.255.255.0"));
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(escape_string(b"plain text"), "plain text");
        assert_eq!(escape_string(b"tab\there"), "tab\\011here");
        assert_eq!(escape_string(b"cut\0short"), "cut");
    }
}
