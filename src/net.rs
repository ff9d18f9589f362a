use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::message::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};

const IP_HDR_LEN: usize = 20;
const UDP_HDR_LEN: usize = 8;
const IPPROTO_UDP: u8 = 17;
const IP_TTL: u8 = 64;

/// The classful netmask for an interface address with no explicit mask.
pub fn classful_netmask(addr: Ipv4Addr) -> Ipv4Addr {
    let a = u32::from(addr);
    if a == 0 {
        return Ipv4Addr::UNSPECIFIED;
    }
    if a & 0x8000_0000 == 0 {
        Ipv4Addr::new(255, 0, 0, 0)
    } else if a & 0xc000_0000 == 0x8000_0000 {
        Ipv4Addr::new(255, 255, 0, 0)
    } else if a & 0xe000_0000 == 0xc000_0000 {
        Ipv4Addr::new(255, 255, 255, 0)
    } else {
        Ipv4Addr::BROADCAST
    }
}

/// RFC 1071 ones' complement sum over 16-bit big-endian words, with an
/// odd trailing byte padded with zero.
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn udp_checksum(src: Ipv4Addr, dst: Ipv4Addr, udp: &[u8]) -> u16 {
    let mut pseudo = Vec::with_capacity(12 + udp.len());
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dst.octets());
    pseudo.push(0);
    pseudo.push(IPPROTO_UDP);
    pseudo.extend_from_slice(&(udp.len() as u16).to_be_bytes());
    pseudo.extend_from_slice(udp);
    match checksum(&pseudo) {
        0 => 0xffff,
        sum => sum,
    }
}

/// Wraps a DHCP payload in the IP and UDP headers used on the raw path.
/// A zero destination means the limited broadcast; the link header is
/// added by the transport.
pub fn make_udp_frame(payload: &[u8], from: Ipv4Addr, to: Ipv4Addr) -> Vec<u8> {
    let to = if to == Ipv4Addr::UNSPECIFIED {
        Ipv4Addr::BROADCAST
    } else {
        to
    };

    let udp_len = UDP_HDR_LEN + payload.len();
    let total_len = IP_HDR_LEN + udp_len;

    let mut udp = Vec::with_capacity(udp_len);
    udp.extend_from_slice(&DHCP_CLIENT_PORT.to_be_bytes());
    udp.extend_from_slice(&DHCP_SERVER_PORT.to_be_bytes());
    udp.extend_from_slice(&(udp_len as u16).to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);
    let udp_sum = udp_checksum(from, to, &udp);
    udp[6..8].copy_from_slice(&udp_sum.to_be_bytes());

    let mut frame = Vec::with_capacity(total_len);
    frame.push(0x45);
    frame.push(0);
    frame.extend_from_slice(&(total_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]); // id
    frame.extend_from_slice(&[0, 0]); // flags, fragment offset
    frame.push(IP_TTL);
    frame.push(IPPROTO_UDP);
    frame.extend_from_slice(&[0, 0]); // checksum, filled below
    frame.extend_from_slice(&from.octets());
    frame.extend_from_slice(&to.octets());
    let ip_sum = checksum(&frame[..IP_HDR_LEN]);
    frame[10..12].copy_from_slice(&ip_sum.to_be_bytes());

    frame.extend_from_slice(&udp);
    frame
}

/// Validates a received IP frame as a DHCP-client-bound UDP packet and
/// returns the source address. The UDP checksum is verified unless it is
/// zero (permitted) or the kernel flagged the frame as partially
/// checksummed.
pub fn valid_udp_frame(frame: &[u8], partial_csum: bool) -> Result<Ipv4Addr> {
    if frame.len() < IP_HDR_LEN + UDP_HDR_LEN {
        return Err(Error::InvalidFrame("frame too short".to_string()));
    }
    if frame[0] >> 4 != 4 {
        return Err(Error::InvalidFrame("not IPv4".to_string()));
    }
    let ihl = (frame[0] & 0x0f) as usize * 4;
    let total_len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    if ihl < IP_HDR_LEN || total_len < ihl + UDP_HDR_LEN || total_len > frame.len() {
        return Err(Error::InvalidFrame("bad length fields".to_string()));
    }
    if frame[9] != IPPROTO_UDP {
        return Err(Error::InvalidFrame("not UDP".to_string()));
    }
    if checksum(&frame[..ihl]) != 0 {
        return Err(Error::InvalidFrame("bad IP checksum".to_string()));
    }

    let src = Ipv4Addr::new(frame[12], frame[13], frame[14], frame[15]);
    let dst = Ipv4Addr::new(frame[16], frame[17], frame[18], frame[19]);
    let udp = &frame[ihl..total_len];
    let dport = u16::from_be_bytes([udp[2], udp[3]]);
    if dport != DHCP_CLIENT_PORT {
        return Err(Error::InvalidFrame(format!("not for port {}", DHCP_CLIENT_PORT)));
    }
    let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if udp_len < UDP_HDR_LEN || udp_len > udp.len() {
        return Err(Error::InvalidFrame("bad UDP length".to_string()));
    }

    let wire_sum = u16::from_be_bytes([udp[6], udp[7]]);
    if wire_sum != 0 && !partial_csum {
        let mut copy = udp[..udp_len].to_vec();
        copy[6] = 0;
        copy[7] = 0;
        if udp_checksum(src, dst, &copy) != wire_sum {
            return Err(Error::InvalidFrame("bad UDP checksum".to_string()));
        }
    }

    Ok(src)
}

/// The DHCP payload of a frame already accepted by [`valid_udp_frame`].
pub fn udp_payload(frame: &[u8]) -> &[u8] {
    let ihl = (frame[0] & 0x0f) as usize * 4;
    let udp_len = u16::from_be_bytes([frame[ihl + 4], frame[ihl + 5]]) as usize;
    &frame[ihl + UDP_HDR_LEN..ihl + udp_len]
}
