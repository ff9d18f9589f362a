use std::net::Ipv4Addr;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::interface::Interface;
use crate::lease::Lease;
use crate::message::{
    BOOTP_MESSAGE_MIN, BOOTREQUEST, DHCP_FIXED_LEN, DHCP_OPTIONS_LEN, DHO_CLIENTID, DHO_END,
    DHO_FQDN, DHO_HOSTNAME, DHO_IPADDRESS, DHO_LEASETIME, DHO_MAXMESSAGESIZE, DHO_MESSAGE,
    DHO_MESSAGETYPE, DHO_PAD, DHO_PARAMETERREQUESTLIST, DHO_REBINDTIME, DHO_RENEWALTIME,
    DHO_SERVERID, DHO_SUBNETMASK, DHO_USERCLASS, DHO_VENDOR, DHO_VENDORCLASSID, DhcpMessage,
    MAGIC_COOKIE, MTU_MAX, MTU_MIN, MessageType,
};
use crate::options::{DHCP_OPTS, flag};

const DAD: &str = "Duplicate address detected";

/// Everything a message is built from. `addr` is the address the engine
/// wants treated as currently configured, which is not always
/// `iface.addr`: unicast is impossible without a bound UDP socket and
/// never allowed from a BOOTP lease.
pub struct BuildContext<'a> {
    pub iface: &'a Interface,
    pub config: &'a ClientConfig,
    pub lease: &'a Lease,
    pub addr: Ipv4Addr,
    pub xid: u32,
    pub up_secs: u64,
    pub mtu: u16,
    /// False only when the current binding exists and is not DHCP.
    pub bound_is_dhcp: bool,
}

fn put_addr(options: &mut Vec<u8>, code: u8, addr: Ipv4Addr) {
    options.push(code);
    options.push(4);
    options.extend_from_slice(&addr.octets());
}

fn put_blob(options: &mut Vec<u8>, code: u8, data: &[u8]) {
    options.push(code);
    options.push(data.len() as u8);
    options.extend_from_slice(data);
}

/// Encodes a dotted name as RFC 1035 labels with a terminating zero. A
/// trailing dot is ignored; an empty label cuts the name short.
pub fn encode_rfc1035(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    if name.is_empty() {
        return out;
    }
    for label in name.strip_suffix('.').unwrap_or(name).split('.') {
        out.push(label.len() as u8);
        if label.is_empty() {
            return out;
        }
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

/// Builds an outbound message of the given type from the interface,
/// lease and configuration.
pub fn make_message(ctx: &BuildContext<'_>, mtype: MessageType) -> Result<DhcpMessage> {
    let iface = ctx.iface;
    let config = ctx.config;
    let lease = ctx.lease;

    let mut msg = DhcpMessage {
        op: BOOTREQUEST,
        hwtype: iface.hwtype,
        hwlen: iface.hwlen(),
        xid: ctx.xid,
        cookie: MAGIC_COOKIE,
        ..Default::default()
    };
    let hwlen = iface.hwlen() as usize;
    msg.chaddr[..hwlen].copy_from_slice(&iface.hwaddr[..hwlen]);

    if mtype == MessageType::Inform
        || mtype == MessageType::Release
        || (mtype == MessageType::Request && iface.net == lease.net && ctx.bound_is_dhcp)
    {
        msg.ciaddr = ctx.addr;
        // In-case we haven't actually configured the address yet.
        if mtype == MessageType::Inform && ctx.addr == Ipv4Addr::UNSPECIFIED {
            msg.ciaddr = lease.addr;
        }
    }

    if config.broadcast
        && msg.ciaddr == Ipv4Addr::UNSPECIFIED
        && mtype != MessageType::Decline
        && mtype != MessageType::Release
    {
        msg.flags = crate::message::BROADCAST_FLAG;
    }

    if mtype != MessageType::Decline && mtype != MessageType::Release {
        msg.secs = ctx.up_secs.min(u64::from(u16::MAX)) as u16;
    }

    let mut options = Vec::with_capacity(DHCP_OPTIONS_LEN);
    options.push(DHO_MESSAGETYPE);
    options.push(1);
    options.push(mtype as u8);

    if let Some(client_id) = &config.client_id {
        put_blob(&mut options, DHO_CLIENTID, client_id);
    }

    if lease.addr != Ipv4Addr::UNSPECIFIED && lease.cookie == MAGIC_COOKIE {
        if mtype == MessageType::Decline
            || (mtype == MessageType::Request && lease.addr != ctx.addr)
        {
            put_addr(&mut options, DHO_IPADDRESS, lease.addr);
            if lease.server != Ipv4Addr::UNSPECIFIED {
                put_addr(&mut options, DHO_SERVERID, lease.server);
            }
        }

        if mtype == MessageType::Release && lease.server != Ipv4Addr::UNSPECIFIED {
            put_addr(&mut options, DHO_SERVERID, lease.server);
        }
    }

    if mtype == MessageType::Decline {
        put_blob(&mut options, DHO_MESSAGE, DAD.as_bytes());
    }

    if mtype == MessageType::Discover
        && let Some(request_addr) = config.request_addr
    {
        put_addr(&mut options, DHO_IPADDRESS, request_addr);
    }

    if matches!(
        mtype,
        MessageType::Discover | MessageType::Inform | MessageType::Request
    ) {
        let mss = ctx.mtu.clamp(MTU_MIN, MTU_MAX);
        options.push(DHO_MAXMESSAGESIZE);
        options.push(2);
        options.extend_from_slice(&mss.to_be_bytes());

        if !config.user_class.is_empty() {
            put_blob(&mut options, DHO_USERCLASS, &config.user_class);
        }
        if !config.vendor_class_id.is_empty() {
            put_blob(&mut options, DHO_VENDORCLASSID, &config.vendor_class_id);
        }

        if mtype != MessageType::Inform && config.lease_time != 0 {
            options.push(DHO_LEASETIME);
            options.push(4);
            options.extend_from_slice(&config.lease_time.to_be_bytes());
        }

        // Regardless of RFC 2132, always send the short hostname (up to
        // the first dot); a full name confuses some servers when they
        // update DNS. The FQDN option exists for the full name.
        if let Some(hostname) = config.hostname.as_deref()
            && !hostname.is_empty()
        {
            let short = hostname.split('.').next().unwrap_or(hostname);
            put_blob(&mut options, DHO_HOSTNAME, short.as_bytes());

            if config.fqdn != crate::config::Fqdn::Disable {
                // RFC 4702. Flags 0000NEOS: S asks the server to update
                // the A RR, O is server-only, E marks DNS encoding, N
                // forbids any server update.
                let name = encode_rfc1035(hostname);
                options.push(DHO_FQDN);
                options.push(3 + name.len() as u8);
                options.push((config.fqdn.raw() & 0x09) | 0x04);
                options.push(0); // from server for PTR RR
                options.push(0); // from server for A RR if S=1
                options.extend_from_slice(&name);
            }
        }

        // vendor is already encoded correctly, so just add it.
        if !config.vendor.is_empty() {
            put_blob(&mut options, DHO_VENDOR, &config.vendor);
        }

        options.push(DHO_PARAMETERREQUESTLIST);
        let len_at = options.len();
        options.push(0);
        for opt in DHCP_OPTS {
            if opt.kind & flag::REQUEST == 0 && !config.requestmask.has(opt.option) {
                continue;
            }
            if mtype == MessageType::Inform
                && (opt.option == DHO_RENEWALTIME || opt.option == DHO_REBINDTIME)
            {
                continue;
            }
            options.push(opt.option);
        }
        options[len_at] = (options.len() - len_at - 1) as u8;
    }

    options.push(DHO_END);

    // Some BOOTP relays insist on the classic minimum message length.
    while DHCP_FIXED_LEN + options.len() < BOOTP_MESSAGE_MIN {
        options.push(DHO_PAD);
    }

    if options.len() > DHCP_OPTIONS_LEN {
        return Err(Error::MessageOverflow);
    }

    msg.options = options;
    Ok(msg)
}

/// A minimal cookie-less message carrying just an address and mask, used
/// for static and inform bindings.
pub fn address_message(addr: Ipv4Addr, mask: Option<Ipv4Addr>) -> DhcpMessage {
    let mut msg = DhcpMessage {
        yiaddr: addr,
        ..Default::default()
    };
    if let Some(mask) = mask
        && mask != Ipv4Addr::UNSPECIFIED
    {
        put_addr(&mut msg.options, DHO_SUBNETMASK, mask);
    }
    msg.options.push(DHO_END);
    msg
}
