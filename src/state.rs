use std::net::Ipv4Addr;

use crate::lease::Lease;
use crate::message::DhcpMessage;

/// DHCP client states, RFC 2131 figure 5 plus the probe and inform side
/// paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DhcpState {
    #[default]
    Init,
    Discover,
    Request,
    Bound,
    Renew,
    Rebind,
    Reboot,
    Inform,
    Probe,
}

impl std::fmt::Display for DhcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Discover => write!(f, "SELECTING"),
            Self::Request => write!(f, "REQUESTING"),
            Self::Bound => write!(f, "BOUND"),
            Self::Renew => write!(f, "RENEWING"),
            Self::Rebind => write!(f, "REBINDING"),
            Self::Reboot => write!(f, "REBOOTING"),
            Self::Inform => write!(f, "INFORM"),
            Self::Probe => write!(f, "PROBING"),
        }
    }
}

/// Per-interface mutable state. `offer` becomes `new` on bind, `new`
/// becomes `old` on the next bind; `old` only lives until the hook has
/// seen the transition.
#[derive(Debug)]
pub struct IfState {
    pub state: DhcpState,
    pub xid: u32,
    /// Current retransmission window in seconds.
    pub interval: u32,
    /// NAK backoff in seconds, 0 when the last reply was good.
    pub nakoff: u32,
    pub claims: u32,
    pub probes: u32,
    pub conflicts: u32,
    pub offer: Option<DhcpMessage>,
    pub new: Option<DhcpMessage>,
    pub old: Option<DhcpMessage>,
    pub lease: Lease,
    /// Tag handed to the hook script describing the last transition.
    pub reason: Option<&'static str>,
    /// Last address that failed duplicate detection.
    pub fail: Ipv4Addr,
}

impl Default for IfState {
    fn default() -> Self {
        Self {
            state: DhcpState::Init,
            xid: 0,
            interval: 0,
            nakoff: 0,
            claims: 0,
            probes: 0,
            conflicts: 0,
            offer: None,
            new: None,
            old: None,
            lease: Lease::default(),
            reason: None,
            fail: Ipv4Addr::UNSPECIFIED,
        }
    }
}
