use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::lease::Lease;

/// Opaque file descriptor token passed between the transport and the
/// event loop.
pub type Fd = i32;

/// The timers the engine arms, one variant per distinct callback. Timers
/// are keyed by variant; re-arming a variant replaces the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    SendDiscover,
    SendRequest,
    SendRenew,
    SendRebind,
    SendInform,
    /// T1 reached, enter RENEWING.
    Renew,
    /// T2 reached, enter REBINDING.
    Rebind,
    /// Lease expired.
    Expire,
    /// REBOOT timed out with `lastlease` set.
    Timeout,
    /// DISCOVER/REBOOT timed out with a fallback profile configured.
    Fallback,
    /// Give up on DHCP and hand over to the IPv4LL engine.
    Ipv4ll,
    /// Re-enter `start` (NAK backoff, post-expiry, post-decline).
    Restart,
}

/// The host event loop. Fired timers and readable fds come back through
/// [`crate::Engine::handle_timer`] and [`crate::Engine::handle_raw_ready`].
pub trait EventLoop {
    fn add_timer(&mut self, after: Duration, event: TimerEvent);
    /// Cancels one timer kind, or every timer for this interface when
    /// `event` is None.
    fn delete_timer(&mut self, event: Option<TimerEvent>);
    fn add_fd(&mut self, fd: Fd);
    fn delete_fd(&mut self, fd: Fd);
}

/// The socket factory and send/receive paths. Raw frames carry the IP
/// header onward; the transport owns the link-layer encapsulation.
pub trait Transport {
    fn open_raw(&mut self) -> Result<Fd>;
    fn open_udp(&mut self, addr: Ipv4Addr) -> Result<Fd>;
    fn close_raw(&mut self);
    fn close_udp(&mut self);
    fn send_raw(&mut self, frame: &[u8]) -> Result<()>;
    fn send_udp(&mut self, dst: Ipv4Addr, payload: &[u8]) -> Result<()>;
    /// Returns the next buffered frame and the partial-checksum offload
    /// flag; a zero length means the buffer is drained.
    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<(usize, bool)>;
}

/// Duplicate address detection. Completion comes back through
/// [`crate::Engine::handle_arp_conflict`] and
/// [`crate::Engine::handle_arp_claimed`].
pub trait Arp {
    fn arp_probe(&mut self);
    fn arp_announce(&mut self);
}

/// The address-application shim that installs and removes what the
/// engine binds.
pub trait Ipv4Shim {
    fn has_address(&self, addr: Ipv4Addr) -> bool;
    /// Installs the lease, or removes the current addressing when None.
    fn apply_addr(&mut self, lease: Option<&Lease>, reason: &str);
    /// Current (addr, net, dst) if the interface has one.
    fn get_address(&self) -> Option<(Ipv4Addr, Ipv4Addr, Ipv4Addr)>;
    fn get_mtu(&self) -> u16;
    fn set_mtu(&mut self, mtu: u16) -> bool;
    /// The profile to switch to when DISCOVER times out, if any.
    fn fallback_profile(&mut self) -> Option<ClientConfig>;
}

pub trait Script {
    fn script_run(&mut self, reason: &str, env: &[(String, String)]);
}

pub trait Ipv4ll {
    fn ipv4ll_start(&mut self);
}

/// Everything the engine consumes from its host, in one bound.
pub trait Host: EventLoop + Transport + Arp + Ipv4Shim + Script + Ipv4ll {}

impl<T: EventLoop + Transport + Arp + Ipv4Shim + Script + Ipv4ll> Host for T {}
