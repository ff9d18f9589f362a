use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::message::{
    DHCP_MESSAGE_MAX, DHCP_MIN_LEASE, DHO_BROADCAST, DHO_LEASETIME, DHO_REBINDTIME,
    DHO_RENEWALTIME, DHO_SERVERID, DHO_SUBNETMASK, DhcpMessage,
};
use crate::net::classful_netmask;
use crate::options::{get_option_addr, get_option_u32};

/// An all-ones lease time never expires.
pub const INFINITE_LEASE: u32 = !0u32;

const T1: f64 = 0.5;
const T2: f64 = 0.875;

/// The decoded form of a bound (or cached) lease.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub addr: Ipv4Addr,
    pub net: Ipv4Addr,
    pub brd: Ipv4Addr,
    pub server: Ipv4Addr,
    pub leasetime: u32,
    pub renewaltime: u32,
    pub rebindtime: u32,
    /// The raw cookie of the message this lease came from; anything but
    /// the magic value marks a non-DHCP (static or link-local) binding.
    pub cookie: u32,
    pub boundtime: Option<Instant>,
    pub leasedfrom: Option<DateTime<Utc>>,
    /// True when the lease was reloaded from the lease file.
    pub frominfo: bool,
}

impl Default for Lease {
    fn default() -> Self {
        Self {
            addr: Ipv4Addr::UNSPECIFIED,
            net: Ipv4Addr::UNSPECIFIED,
            brd: Ipv4Addr::UNSPECIFIED,
            server: Ipv4Addr::UNSPECIFIED,
            leasetime: 0,
            renewaltime: 0,
            rebindtime: 0,
            cookie: 0,
            boundtime: None,
            leasedfrom: None,
            frominfo: false,
        }
    }
}

impl Lease {
    /// Decodes the lease data out of a reply. A missing subnet mask falls
    /// back to the classful mask of the address, a missing broadcast to
    /// `addr | !net`, and a missing lease time means an infinite (BOOTP)
    /// lease. Absent renew/rebind times stay 0 until [`normalize_times`]
    /// fills them in.
    ///
    /// [`normalize_times`]: Lease::normalize_times
    pub fn from_message(msg: &DhcpMessage) -> Self {
        let mut lease = Lease {
            cookie: msg.cookie,
            ..Default::default()
        };

        // BOOTP does not set yiaddr for replies when ciaddr is set.
        lease.addr = if msg.yiaddr != Ipv4Addr::UNSPECIFIED {
            msg.yiaddr
        } else {
            msg.ciaddr
        };
        lease.net =
            get_option_addr(msg, DHO_SUBNETMASK).unwrap_or_else(|| classful_netmask(lease.addr));
        lease.brd = get_option_addr(msg, DHO_BROADCAST)
            .unwrap_or_else(|| Ipv4Addr::from(u32::from(lease.addr) | !u32::from(lease.net)));
        lease.leasetime = get_option_u32(msg, DHO_LEASETIME).unwrap_or(INFINITE_LEASE);
        lease.renewaltime = get_option_u32(msg, DHO_RENEWALTIME).unwrap_or(0);
        lease.rebindtime = get_option_u32(msg, DHO_REBINDTIME).unwrap_or(0);
        lease.server = get_option_addr(msg, DHO_SERVERID).unwrap_or(Ipv4Addr::UNSPECIFIED);

        lease
    }

    pub fn is_infinite(&self) -> bool {
        self.leasetime == INFINITE_LEASE
    }

    pub fn subnet_cidr(&self) -> u8 {
        u32::from(self.net).count_ones() as u8
    }

    /// Enforces the timing invariants before the timers are armed:
    /// a floor of 20 s on the lease, T2 defaulted or clamped to 0.875 of
    /// the lease, T1 defaulted or clamped to 0.5, and an infinite lease
    /// propagating to both.
    pub fn normalize_times(&mut self, ifname: &str) {
        if self.is_infinite() {
            self.renewaltime = INFINITE_LEASE;
            self.rebindtime = INFINITE_LEASE;
            return;
        }

        if self.leasetime < DHCP_MIN_LEASE {
            warn!("{}: minimum lease is {} seconds", ifname, DHCP_MIN_LEASE);
            self.leasetime = DHCP_MIN_LEASE;
        }

        if self.rebindtime == 0 {
            self.rebindtime = (self.leasetime as f64 * T2) as u32;
        } else if self.rebindtime >= self.leasetime {
            self.rebindtime = (self.leasetime as f64 * T2) as u32;
            error!(
                "{}: rebind time greater than lease time, forcing to {} seconds",
                ifname, self.rebindtime
            );
        }

        if self.renewaltime == 0 {
            self.renewaltime = (self.leasetime as f64 * T1) as u32;
        } else if self.renewaltime > self.rebindtime {
            self.renewaltime = (self.leasetime as f64 * T1) as u32;
            error!(
                "{}: renewal time greater than rebind time, forcing to {} seconds",
                ifname, self.renewaltime
            );
        }
    }
}

/// Writes the raw message, truncated at the END option, to the lease
/// file with mode 0444. BOOTP replies carry no times worth caching, so
/// they remove the file instead.
pub fn write_lease(ifname: &str, path: &Path, msg: &DhcpMessage) -> std::io::Result<usize> {
    if msg.is_bootp() {
        let _ = std::fs::remove_file(path);
        return Ok(0);
    }

    debug!("{}: writing lease `{}'", ifname, path.display());

    let mut open = OpenOptions::new();
    open.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        open.mode(0o444);
    }
    let mut file = open.open(path)?;

    let bytes = msg.to_bytes();
    let len = msg.trimmed_len().min(bytes.len());
    file.write_all(&bytes[..len])?;
    Ok(len)
}

/// Reads a cached lease back. A short file is fine; the zero padding
/// halts the options parser. Returns None when there is no usable file.
pub fn read_lease(ifname: &str, path: &Path) -> Option<DhcpMessage> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                error!("{}: open `{}': {}", ifname, path.display(), err);
            }
            return None;
        }
    };
    debug!("{}: reading lease `{}'", ifname, path.display());

    let mut raw = vec![0u8; DHCP_MESSAGE_MAX];
    let mut have = 0;
    loop {
        match file.read(&mut raw[have..]) {
            Ok(0) => break,
            Ok(n) => {
                have += n;
                if have == raw.len() {
                    break;
                }
            }
            Err(err) => {
                error!("{}: read `{}': {}", ifname, path.display(), err);
                return None;
            }
        }
    }

    Some(DhcpMessage::from_bytes(&raw[..have]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DHO_END, MAGIC_COOKIE};

    struct TestGuard(std::path::PathBuf);
    impl Drop for TestGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn reply(options: &[u8]) -> DhcpMessage {
        let mut msg = DhcpMessage {
            cookie: MAGIC_COOKIE,
            yiaddr: Ipv4Addr::new(192, 0, 2, 10),
            ..Default::default()
        };
        msg.options = options.to_vec();
        msg
    }

    #[test]
    fn test_mask_and_broadcast_inference() {
        let lease = Lease::from_message(&reply(&[DHO_END]));
        // 192.0.2.10 is class C.
        assert_eq!(lease.net, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(lease.brd, Ipv4Addr::new(192, 0, 2, 255));
        assert!(lease.is_infinite());
        assert_eq!(lease.server, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_explicit_options_win() {
        let lease = Lease::from_message(&reply(&[
            DHO_SUBNETMASK, 4, 255, 255, 0, 0,
            DHO_BROADCAST, 4, 192, 0, 255, 255,
            DHO_LEASETIME, 4, 0, 0, 0x0e, 0x10,
            DHO_SERVERID, 4, 192, 0, 2, 1,
            DHO_END,
        ]));
        assert_eq!(lease.net, Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(lease.brd, Ipv4Addr::new(192, 0, 255, 255));
        assert_eq!(lease.leasetime, 3600);
        assert_eq!(lease.server, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(lease.subnet_cidr(), 16);
    }

    #[test]
    fn test_normalize_defaults_t1_t2() {
        let mut lease = Lease {
            leasetime: 3600,
            ..Default::default()
        };
        lease.normalize_times("eth0");
        assert_eq!(lease.renewaltime, 1800);
        assert_eq!(lease.rebindtime, 3150);
    }

    #[test]
    fn test_normalize_clamps_min_lease() {
        let mut lease = Lease {
            leasetime: 5,
            ..Default::default()
        };
        lease.normalize_times("eth0");
        assert_eq!(lease.leasetime, DHCP_MIN_LEASE);
        assert_eq!(lease.renewaltime, 10);
        assert_eq!(lease.rebindtime, 17);
    }

    #[test]
    fn test_normalize_clamps_inverted_times() {
        // rebind beyond the lease is recomputed from T2.
        let mut lease = Lease {
            leasetime: 3600,
            rebindtime: 4000,
            renewaltime: 100,
            ..Default::default()
        };
        lease.normalize_times("eth0");
        assert_eq!(lease.rebindtime, 3150);
        assert_eq!(lease.renewaltime, 100);

        // renew beyond rebind is recomputed from T1.
        let mut lease = Lease {
            leasetime: 3600,
            rebindtime: 3000,
            renewaltime: 3500,
            ..Default::default()
        };
        lease.normalize_times("eth0");
        assert_eq!(lease.renewaltime, 1800);
        assert_eq!(lease.rebindtime, 3000);
    }

    #[test]
    fn test_normalize_infinite() {
        let mut lease = Lease {
            leasetime: INFINITE_LEASE,
            renewaltime: 100,
            rebindtime: 200,
            ..Default::default()
        };
        lease.normalize_times("eth0");
        assert_eq!(lease.renewaltime, INFINITE_LEASE);
        assert_eq!(lease.rebindtime, INFINITE_LEASE);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let path = std::path::PathBuf::from("test_lease_roundtrip.bin");
        let _guard = TestGuard(path.clone());

        let msg = reply(&[DHO_LEASETIME, 4, 0, 0, 0x0e, 0x10, DHO_END]);
        let written = write_lease("eth0", &path, &msg).unwrap();
        assert_eq!(written, msg.trimmed_len());

        let back = read_lease("eth0", &path).unwrap();
        assert_eq!(back.yiaddr, msg.yiaddr);
        assert_eq!(back.cookie, MAGIC_COOKIE);
        let lease = Lease::from_message(&back);
        assert_eq!(lease.leasetime, 3600);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o444);
        }
    }

    #[test]
    fn test_bootp_lease_unlinks_file() {
        let path = std::path::PathBuf::from("test_lease_bootp.bin");
        let _guard = TestGuard(path.clone());

        let msg = reply(&[DHO_LEASETIME, 4, 0, 0, 0x0e, 0x10, DHO_END]);
        write_lease("eth0", &path, &msg).unwrap();
        assert!(path.exists());

        // No message type makes it BOOTP; the stale file must go.
        let bootp = reply(&[DHO_END]);
        assert_eq!(write_lease("eth0", &path, &bootp).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_read_lease_missing() {
        assert!(read_lease("eth0", Path::new("does_not_exist.bin")).is_none());
    }
}
