use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::builder::{self, BuildContext};
use crate::config::{ClientConfig, RunMode};
use crate::env;
use crate::error::Result;
use crate::interface::Interface;
use crate::lease::{self, INFINITE_LEASE, Lease};
use crate::message::{
    DHCP_MESSAGE_MAX, DHO_MESSAGE, DHO_SERVERID, DhcpMessage, MAGIC_COOKIE, MTU_MIN, MessageType,
};
use crate::net;
use crate::options::{self, get_option_addr, get_option_string};
use crate::platform::{Fd, Host, TimerEvent};
use crate::state::{DhcpState, IfState};

/// Ceiling for the NAK exponential backoff.
const NAKOFF_MAX: u32 = 60;

/// Retransmission window: starts at 4 s and doubles to 64 s.
const INTERVAL_MAX: u32 = 64;

/// Wait between sending a RELEASE and dropping the address, so the
/// kernel has time to actually send it.
const RELEASE_DELAY: Duration = Duration::from_millis(10);

/// Wait before rediscovering after declining a conflicted address.
const DECLINE_WAIT: Duration = Duration::from_secs(10);

/// Backoff before retrying IPv4LL when the last conflict was link-local.
const RATE_LIMIT_INTERVAL: u64 = 60;

enum ReplyLog {
    Info,
    Warn,
    Error,
}

/// The per-interface DHCP client automaton. The host event loop feeds it
/// through [`handle_timer`], [`handle_raw_ready`] and the ARP callbacks;
/// everything it does to the system goes back out through the [`Host`]
/// traits.
///
/// [`handle_timer`]: Engine::handle_timer
/// [`handle_raw_ready`]: Engine::handle_raw_ready
pub struct Engine<H: Host> {
    host: H,
    iface: Interface,
    config: ClientConfig,
    mode: RunMode,
    state: IfState,
    raw_fd: Option<Fd>,
    udp_fd: Option<Fd>,
    csr_logged: bool,
    finished: bool,
}

impl<H: Host> Engine<H> {
    pub fn new(host: H, iface: Interface, config: ClientConfig, mode: RunMode) -> Self {
        Self {
            host,
            iface,
            config,
            mode,
            state: IfState::default(),
            raw_fd: None,
            udp_fd: None,
            csr_logged: false,
            finished: false,
        }
    }

    pub fn state(&self) -> &IfState {
        &self.state
    }

    pub fn lease(&self) -> &Lease {
        &self.state.lease
    }

    pub fn iface(&self) -> &Interface {
        &self.iface
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// True once a test-mode run has reported through the hook.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Routes decoded from the current binding, logging the first use of
    /// classless routes per binding.
    pub fn routes(&mut self) -> Vec<options::Route> {
        let Some(new) = &self.state.new else {
            return Vec::new();
        };
        let (routes, csr) = options::get_option_routes(new, &self.config.nomask);
        if csr && !self.csr_logged {
            debug!("{}: using Classless Static Routes", self.iface.name);
            self.csr_logged = true;
        }
        routes
    }

    /// Brings the interface up: static and inform configurations go
    /// their own way, otherwise the cached lease decides between
    /// INIT-REBOOT and DISCOVER.
    pub fn start(&mut self) {
        if self.config.static_addr {
            self.do_static();
            return;
        }

        if self.open_sockets().is_err() {
            return;
        }

        if self.config.inform {
            self.inform();
            return;
        }

        if self.iface.hwaddr.is_empty() && self.config.client_id.is_none() {
            warn!("{}: needs a clientid to configure", self.iface.name);
            self.drop_lease("FAIL");
            self.close_sockets();
            self.host.delete_timer(None);
            return;
        }

        // Don't reread the old lease if we NAKed an old test run.
        let nolease = self.state.offer.is_some() && self.mode.test;
        if !nolease {
            self.state.offer = lease::read_lease(&self.iface.name, &self.iface.lease_file);
        }

        if let Some(offer) = self.state.offer.take() {
            let mut cached = Lease::from_message(&offer);
            cached.frominfo = true;
            let mut keep = true;

            if offer.cookie != MAGIC_COOKIE {
                if offer.yiaddr == self.iface.addr {
                    keep = false;
                }
            } else if cached.leasetime != INFINITE_LEASE
                && let Ok(meta) = std::fs::metadata(&self.iface.lease_file)
                && let Ok(modified) = meta.modified()
                && let Ok(age) = modified.elapsed()
            {
                // Offset lease times against the file age and check expiry.
                let age = age.as_secs();
                if u64::from(cached.leasetime) < age {
                    debug!("{}: discarding expired lease", self.iface.name);
                    keep = false;
                    cached.addr = Ipv4Addr::UNSPECIFIED;
                } else {
                    let age = age as u32;
                    cached.leasetime -= age;
                    cached.renewaltime = cached.renewaltime.saturating_sub(age);
                    cached.rebindtime = cached.rebindtime.saturating_sub(age);
                }
            }

            self.state.lease = cached;
            if keep {
                self.state.offer = Some(offer);
            }
        }

        match self.state.offer.as_ref().map(|m| m.cookie) {
            None => self.discover(),
            Some(cookie) if cookie != MAGIC_COOKIE && self.config.ipv4ll => {
                self.host.ipv4ll_start()
            }
            Some(_) => self.reboot(),
        }
    }

    pub fn discover(&mut self) {
        let mut timeout = self.config.timeout;
        // A foregrounded reboot shortens the timeout so fallback or
        // IPv4LL still get their chance.
        if self.state.state == DhcpState::Reboot && !self.mode.daemonised {
            timeout = timeout.saturating_sub(self.config.reboot);
            if timeout == 0 {
                timeout = 2;
            }
        }

        self.state.state = DhcpState::Discover;
        self.state.xid = self.new_xid();
        self.host.delete_timer(None);

        if self.config.fallback.is_some() {
            self.host
                .add_timer(Duration::from_secs(timeout.into()), TimerEvent::Fallback);
        } else if self.config.ipv4ll && !self.iface.addr.is_link_local() {
            let delay = if self.state.fail.is_link_local() {
                RATE_LIMIT_INTERVAL
            } else {
                timeout.into()
            };
            self.host
                .add_timer(Duration::from_secs(delay), TimerEvent::Ipv4ll);
        }

        if let Some(request_addr) = self.config.request_addr {
            info!(
                "{}: broadcasting for a lease (requesting {})",
                self.iface.name, request_addr
            );
        } else {
            info!("{}: broadcasting for a lease", self.iface.name);
        }
        self.send_discover();
    }

    fn request(&mut self) {
        self.state.state = DhcpState::Request;
        self.send_request();
    }

    fn renew(&mut self) {
        let lease = &self.state.lease;
        info!("{}: renewing lease of {}", self.iface.name, lease.addr);
        debug!(
            "{}: rebind in {} seconds, expire in {} seconds",
            self.iface.name,
            lease.rebindtime.saturating_sub(lease.renewaltime),
            lease.leasetime.saturating_sub(lease.renewaltime)
        );
        self.state.state = DhcpState::Renew;
        self.state.xid = self.new_xid();
        self.send_renew();
    }

    fn rebind(&mut self) {
        error!(
            "{}: failed to renew, attempting to rebind",
            self.iface.name
        );
        debug!(
            "{}: expire in {} seconds",
            self.iface.name,
            self.state.lease.leasetime.saturating_sub(self.state.lease.rebindtime)
        );
        self.state.state = DhcpState::Rebind;
        self.host.delete_timer(Some(TimerEvent::SendRenew));
        // Rebinding goes back to broadcast; forget the server.
        self.state.lease.server = Ipv4Addr::UNSPECIFIED;
        self.state.xid = self.new_xid();
        self.send_rebind();
    }

    fn expire(&mut self) {
        self.state.interval = 0;
        if self.iface.addr == Ipv4Addr::UNSPECIFIED {
            // We failed to reboot, so enter discovery.
            self.state.lease.addr = Ipv4Addr::UNSPECIFIED;
            self.discover();
            return;
        }

        error!("{}: lease expired", self.iface.name);
        self.host.delete_timer(None);
        self.drop_lease("EXPIRE");
        let _ = std::fs::remove_file(&self.iface.lease_file);
        if !self.iface.carrier_down {
            self.start();
        }
    }

    fn timeout(&mut self) {
        self.bind_with_reason(Some("TIMEOUT"));
        self.state.interval = 0;
        self.discover();
    }

    fn fallback(&mut self) {
        if let Some(profile) = self.host.fallback_profile() {
            self.config = profile;
        }
        self.start();
    }

    /// Sends a RELEASE for a DHCP binding, waits briefly for the packet
    /// to drain, then drops the address and the lease file.
    pub fn release(&mut self) {
        if self
            .state
            .new
            .as_ref()
            .is_some_and(|m| m.cookie == MAGIC_COOKIE)
        {
            info!(
                "{}: releasing lease of {}",
                self.iface.name, self.state.lease.addr
            );
            self.state.xid = self.new_xid();
            self.send_message(MessageType::Release, None);
            // Give the packet a chance to go before dropping the ip.
            thread::sleep(RELEASE_DELAY);
            self.drop_lease("RELEASE");
        }
        let _ = std::fs::remove_file(&self.iface.lease_file);
    }

    pub fn decline(&mut self) {
        self.send_message(MessageType::Decline, None);
    }

    pub fn inform(&mut self) {
        if self.handle_3rdparty() {
            return;
        }

        if self.mode.test {
            self.iface.addr = self.config.request_addr.unwrap_or(Ipv4Addr::UNSPECIFIED);
            self.iface.net = self.config.request_netmask.unwrap_or(Ipv4Addr::UNSPECIFIED);
        } else if self.config.request_addr.is_some() {
            self.config.static_addr = true;
            self.do_static();
        }

        self.state.state = DhcpState::Inform;
        self.state.xid = self.new_xid();
        self.send_inform();
    }

    fn reboot(&mut self) {
        if self.iface.carrier_down {
            info!("{}: waiting for carrier", self.iface.name);
            return;
        }
        if self.config.static_addr {
            self.do_static();
            return;
        }
        if self.config.reboot == 0 || self.state.offer.is_none() {
            self.discover();
            return;
        }

        let offer_is_dhcp = self
            .state
            .offer
            .as_ref()
            .is_some_and(|m| m.cookie == MAGIC_COOKIE);
        if self.config.inform {
            info!(
                "{}: informing address of {}",
                self.iface.name, self.state.lease.addr
            );
        } else if !offer_is_dhcp {
            if self.config.ipv4ll {
                self.state.claims = 0;
                self.host.arp_announce();
            } else {
                self.discover();
            }
            return;
        } else {
            info!(
                "{}: rebinding lease of {}",
                self.iface.name, self.state.lease.addr
            );
        }

        self.state.state = DhcpState::Reboot;
        self.state.xid = self.new_xid();
        self.state.lease.server = Ipv4Addr::UNSPECIFIED;
        self.host.delete_timer(None);

        let reboot = Duration::from_secs(self.config.reboot.into());
        if self.config.fallback.is_some() {
            self.host.add_timer(reboot, TimerEvent::Fallback);
        } else if self.config.lastlease && self.state.lease.frominfo {
            self.host.add_timer(reboot, TimerEvent::Timeout);
        } else if !(self.config.inform && (self.mode.master || self.mode.daemonised)) {
            self.host.add_timer(reboot, TimerEvent::Expire);
        }

        // No ARP check; the server could NAK us first. The state stays
        // REBOOT so a successful bind reports the right reason.
        if self.config.inform {
            self.inform();
        } else {
            self.send_request();
        }
    }

    fn handle_3rdparty(&mut self) -> bool {
        if self.config.request_addr.is_some() {
            return false;
        }
        if let Some((addr, net, dst)) = self.host.get_address() {
            self.iface.addr = addr;
            self.iface.net = net;
            self.iface.dst = dst;
            false
        } else {
            info!(
                "{}: waiting for 3rd party to configure IP address",
                self.iface.name
            );
            self.state.reason = Some("3RDPARTY");
            self.host.script_run("3RDPARTY", &[]);
            true
        }
    }

    fn do_static(&mut self) {
        if self.handle_3rdparty() {
            return;
        }
        let addr = self.config.request_addr.unwrap_or(Ipv4Addr::UNSPECIFIED);
        self.state.offer = Some(builder::address_message(addr, self.config.request_netmask));
        self.host.delete_timer(None);
        self.bind();
    }

    /// ARP reported the probed address in use: decline it and start over
    /// after a rate-limit delay.
    pub fn handle_arp_conflict(&mut self) {
        self.state.conflicts += 1;
        let failed = self
            .state
            .offer
            .as_ref()
            .map(|m| m.yiaddr)
            .unwrap_or(self.state.lease.addr);
        self.state.fail = failed;
        warn!(
            "{}: duplicate address {} detected, declining",
            self.iface.name, failed
        );
        self.decline();
        let _ = std::fs::remove_file(&self.iface.lease_file);
        self.state.offer = None;
        self.state.lease.addr = Ipv4Addr::UNSPECIFIED;
        self.close_sockets();
        self.host.delete_timer(None);
        self.host.add_timer(DECLINE_WAIT, TimerEvent::Restart);
    }

    /// ARP finished probing without a conflict: the offer is ours.
    pub fn handle_arp_claimed(&mut self) {
        if self.state.state == DhcpState::Probe {
            self.bind();
        }
    }

    pub fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::SendDiscover => self.send_discover(),
            TimerEvent::SendRequest => self.send_request(),
            TimerEvent::SendRenew => self.send_renew(),
            TimerEvent::SendRebind => self.send_rebind(),
            TimerEvent::SendInform => self.send_inform(),
            TimerEvent::Renew => self.renew(),
            TimerEvent::Rebind => self.rebind(),
            TimerEvent::Expire => self.expire(),
            TimerEvent::Timeout => self.timeout(),
            TimerEvent::Fallback => self.fallback(),
            TimerEvent::Ipv4ll => self.host.ipv4ll_start(),
            TimerEvent::Restart => self.start(),
        }
    }

    /// Drains every buffered frame off the raw socket. If one of them
    /// closes the socket (a state change), the rest wait for the reopen.
    pub fn handle_raw_ready(&mut self) {
        let mut buf = vec![0u8; 1500];
        loop {
            let (len, partial) = match self.host.recv_raw(&mut buf) {
                Ok(result) => result,
                Err(_) => break,
            };
            if len == 0 {
                break;
            }

            let frame = &buf[..len];
            let from = match net::valid_udp_frame(frame, partial) {
                Ok(from) => from,
                Err(err) => {
                    error!("{}: invalid UDP packet: {}", self.iface.name, err);
                    continue;
                }
            };

            if !self.config.whitelist.is_empty() {
                if !self.config.whitelist.iter().any(|f| f.matches(from)) {
                    warn!(
                        "{}: non whitelisted DHCP packet from {}",
                        self.iface.name, from
                    );
                    continue;
                }
            } else if self.config.blacklist.iter().any(|f| f.matches(from)) {
                warn!(
                    "{}: blacklisted DHCP packet from {}",
                    self.iface.name, from
                );
                continue;
            }

            if self.iface.point_to_point && self.iface.dst != from {
                warn!("{}: server {} is not destination", self.iface.name, from);
            }

            let payload = net::udp_payload(frame);
            if payload.len() > DHCP_MESSAGE_MAX {
                error!(
                    "{}: packet greater than DHCP size from {}",
                    self.iface.name, from
                );
                continue;
            }
            let msg = DhcpMessage::from_bytes(payload);

            if msg.cookie != MAGIC_COOKIE {
                debug!("{}: bogus cookie from {}", self.iface.name, from);
                continue;
            }
            if msg.xid != self.state.xid {
                debug!(
                    "{}: wrong xid 0x{:x} (expecting 0x{:x}) from {}",
                    self.iface.name, msg.xid, self.state.xid, from
                );
                continue;
            }
            if !self.iface.hwaddr_matches(&msg.chaddr) {
                debug!(
                    "{}: xid 0x{:x} is not for hwaddr {}",
                    self.iface.name,
                    msg.xid,
                    msg.format_hwaddr()
                );
                continue;
            }

            self.handle_message(msg, from);
            if self.raw_fd.is_none() {
                break;
            }
        }
    }

    fn handle_message(&mut self, msg: DhcpMessage, from: Ipv4Addr) {
        // Any valid reply resets the message counter.
        self.state.interval = 0;

        // We may have found a BOOTP server.
        let mtype = msg.message_type();

        if mtype == Some(MessageType::Nak) {
            // For NAK, only check if we require the server id.
            if self.config.requiremask.has(DHO_SERVERID)
                && get_option_addr(&msg, DHO_SERVERID).is_none()
            {
                self.log_reply(ReplyLog::Warn, "reject NAK", &msg, from);
                return;
            }
            self.log_reply(ReplyLog::Warn, "NAK:", &msg, from);
            if !self.mode.test {
                self.drop_lease("NAK");
                let _ = std::fs::remove_file(&self.iface.lease_file);
            }
            self.close_sockets();
            // Constant NAKs deserve a slow backoff.
            self.host.add_timer(
                Duration::from_secs(self.state.nakoff.into()),
                TimerEvent::Restart,
            );
            if self.state.nakoff == 0 {
                self.state.nakoff = 1;
            } else {
                self.state.nakoff = (self.state.nakoff * 2).min(NAKOFF_MAX);
            }
            return;
        }

        // Ensure that all required options are present. BOOTP replies
        // are excused from the server id; require the message type to
        // shut BOOTP out entirely.
        for code in 1..=254u8 {
            if self.config.requiremask.has(code) && !options::has_option(&msg, code) {
                if mtype.is_none() && code == DHO_SERVERID {
                    continue;
                }
                self.log_reply(ReplyLog::Warn, "reject DHCP", &msg, from);
                return;
            }
        }

        // Ensure that the address offered is valid.
        let unusable = |a: Ipv4Addr| a == Ipv4Addr::UNSPECIFIED || a == Ipv4Addr::BROADCAST;
        if matches!(mtype, None | Some(MessageType::Offer) | Some(MessageType::Ack))
            && unusable(msg.ciaddr)
            && unusable(msg.yiaddr)
        {
            self.log_reply(ReplyLog::Warn, "reject invalid address", &msg, from);
            return;
        }

        // No NAK, so reset the backoff.
        self.state.nakoff = 0;

        let mut consumed = false;
        if matches!(mtype, None | Some(MessageType::Offer))
            && self.state.state == DhcpState::Discover
        {
            self.state.lease.frominfo = false;
            self.state.lease.addr = msg.yiaddr;
            self.state.lease.cookie = msg.cookie;
            self.state.lease.server = if mtype.is_none() {
                Ipv4Addr::UNSPECIFIED
            } else {
                get_option_addr(&msg, DHO_SERVERID).unwrap_or(Ipv4Addr::UNSPECIFIED)
            };
            self.log_reply(ReplyLog::Info, "offered", &msg, from);
            self.state.offer = Some(msg.clone());
            consumed = true;

            if self.mode.test {
                self.state.old = self.state.new.take();
                self.state.new = self.state.offer.take();
                self.state.reason = Some("TEST");
                let env = env::collect("new", &msg, &self.config.nomask);
                self.host.script_run("TEST", &env);
                self.finished = true;
                return;
            }

            self.host.delete_timer(Some(TimerEvent::SendDiscover));
            // We don't request BOOTP addresses.
            if mtype.is_some() {
                // ARP checking a mere offer would violate RFC 2131, and
                // some servers ignore a DECLINE with no REQUEST anyway.
                self.request();
                return;
            }
        }

        if let Some(t) = mtype {
            if t == MessageType::Offer {
                self.log_reply(ReplyLog::Info, "ignoring offer of", &msg, from);
                return;
            }
            // We should only be dealing with acks.
            if t != MessageType::Ack {
                self.log_reply(ReplyLog::Error, "not ACK or OFFER", &msg, from);
                return;
            }
            if !self.config.inform {
                self.log_reply(ReplyLog::Info, "acknowledged", &msg, from);
            }
        }

        if !consumed {
            self.state.offer = Some(msg);
        }
        self.state.lease.frominfo = false;
        self.host.delete_timer(None);

        // With the offer in hand the sockets can close, which keeps a
        // broken server's ACK-then-bogus-NAK from reaching us while we
        // ARP.
        self.close_sockets();

        let offered = self
            .state
            .offer
            .as_ref()
            .map(|m| m.yiaddr)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        if self.config.arp
            && self.iface.addr != offered
            && !self.host.has_address(offered)
        {
            self.state.claims = 0;
            self.state.probes = 0;
            self.state.conflicts = 0;
            self.state.state = DhcpState::Probe;
            self.host.arp_probe();
            return;
        }

        self.bind();
    }

    /// Commits the pending offer: decode the lease, choose the hook
    /// reason, persist, install, rearm the clocks.
    pub fn bind(&mut self) {
        self.bind_with_reason(None);
    }

    fn bind_with_reason(&mut self, preset: Option<&'static str>) {
        // Binding now; the exchange sockets must not linger.
        self.close_sockets();
        self.host.delete_timer(None);
        self.state.reason = None;
        self.state.xid = 0;
        self.state.old = self.state.new.take();
        self.state.new = self.state.offer.take();
        let Some(new) = self.state.new.clone() else {
            return;
        };

        let frominfo = self.state.lease.frominfo;
        let mut lease = Lease::from_message(&new);
        lease.boundtime = Some(Instant::now());
        lease.frominfo = frominfo;
        let mut reason = preset;

        if self.config.static_addr {
            lease.leasetime = INFINITE_LEASE;
            lease.net = self.config.request_netmask.unwrap_or(Ipv4Addr::UNSPECIFIED);
            info!(
                "{}: using static address {}",
                self.iface.name, lease.addr
            );
            reason = Some("STATIC");
        } else if new.cookie != MAGIC_COOKIE {
            info!(
                "{}: using IPv4LL address {}",
                self.iface.name, lease.addr
            );
            lease.leasetime = INFINITE_LEASE;
            reason = Some("IPV4LL");
        } else if self.config.inform {
            lease.addr = match self.config.request_addr {
                Some(addr) if addr != Ipv4Addr::UNSPECIFIED => addr,
                _ => self.iface.addr,
            };
            info!(
                "{}: received approval for {}",
                self.iface.name, lease.addr
            );
            lease.leasetime = INFINITE_LEASE;
            reason = Some("INFORM");
        } else {
            lease.leasedfrom = Some(Utc::now());
            lease.normalize_times(&self.iface.name);
            if lease.is_infinite() {
                info!(
                    "{}: leased {} for infinity",
                    self.iface.name, lease.addr
                );
            } else {
                info!(
                    "{}: leased {} for {} seconds",
                    self.iface.name, lease.addr, lease.leasetime
                );
            }
        }

        if lease.is_infinite() {
            lease.renewaltime = INFINITE_LEASE;
            lease.rebindtime = INFINITE_LEASE;
        }

        if self.mode.test {
            self.state.lease = lease;
            self.state.reason = Some("TEST");
            let env = env::collect("new", &new, &self.config.nomask);
            self.host.script_run("TEST", &env);
            self.finished = true;
            return;
        }

        let reason = reason.unwrap_or_else(|| {
            if let Some(old) = &self.state.old {
                if old.yiaddr == new.yiaddr && lease.server != Ipv4Addr::UNSPECIFIED {
                    "RENEW"
                } else {
                    "REBIND"
                }
            } else if self.state.state == DhcpState::Reboot {
                "REBOOT"
            } else {
                "BOUND"
            }
        });

        if !lease.is_infinite() {
            self.host.add_timer(
                Duration::from_secs(lease.renewaltime.into()),
                TimerEvent::Renew,
            );
            self.host.add_timer(
                Duration::from_secs(lease.rebindtime.into()),
                TimerEvent::Rebind,
            );
            self.host.add_timer(
                Duration::from_secs(lease.leasetime.into()),
                TimerEvent::Expire,
            );
            debug!(
                "{}: renew in {} seconds, rebind in {} seconds",
                self.iface.name, lease.renewaltime, lease.rebindtime
            );
        }

        self.csr_logged = false;
        if let Err(err) = lease::write_lease(&self.iface.name, &self.iface.lease_file, &new) {
            error!("{}: write_lease: {}", self.iface.name, err);
        }

        self.iface.addr = lease.addr;
        self.iface.net = lease.net;
        self.state.lease = lease;
        self.state.reason = Some(reason);

        self.host.apply_addr(Some(&self.state.lease), reason);
        let env = env::collect("new", &new, &self.config.nomask);
        self.host.script_run(reason, &env);

        self.state.state = DhcpState::Bound;
        if self.config.arp {
            self.state.claims = 0;
            self.host.arp_announce();
        }
    }

    /// Removes the current binding: address uninstalled, hook told why,
    /// lease forgotten.
    fn drop_lease(&mut self, reason: &'static str) {
        self.host.delete_timer(None);
        self.state.old = self.state.new.take();
        self.state.reason = Some(reason);
        self.host.apply_addr(None, reason);
        let env = match &self.state.old {
            Some(old) => env::collect("old", old, &self.config.nomask),
            None => Vec::new(),
        };
        self.host.script_run(reason, &env);
        self.state.old = None;
        self.state.lease.addr = Ipv4Addr::UNSPECIFIED;
        self.iface.addr = Ipv4Addr::UNSPECIFIED;
        self.iface.net = Ipv4Addr::UNSPECIFIED;
        self.state.state = DhcpState::Init;
    }

    fn send_discover(&mut self) {
        self.send_message(MessageType::Discover, Some(TimerEvent::SendDiscover));
    }

    fn send_request(&mut self) {
        self.send_message(MessageType::Request, Some(TimerEvent::SendRequest));
    }

    fn send_renew(&mut self) {
        self.send_message(MessageType::Request, Some(TimerEvent::SendRenew));
    }

    fn send_rebind(&mut self) {
        self.send_message(MessageType::Request, Some(TimerEvent::SendRebind));
    }

    fn send_inform(&mut self) {
        self.send_message(MessageType::Inform, Some(TimerEvent::SendInform));
    }

    fn send_message(&mut self, mtype: MessageType, retransmit: Option<TimerEvent>) {
        let delay = match retransmit {
            Some(_) => {
                if self.state.interval == 0 {
                    self.state.interval = 4;
                } else {
                    self.state.interval = (self.state.interval * 2).min(INTERVAL_MAX);
                }
                // Jitter the retransmit by ±1 s with sub-second randomness.
                let micros = u64::from(self.state.interval - 1) * 1_000_000
                    + rand::random_range(0..2_000_000u64);
                let tv = Duration::from_micros(micros);
                debug!(
                    "{}: sending {} (xid 0x{:x}), next in {:.2} seconds",
                    self.iface.name,
                    mtype,
                    self.state.xid,
                    tv.as_secs_f64()
                );
                Some(tv)
            }
            None => {
                debug!(
                    "{}: sending {} with xid 0x{:x}",
                    self.iface.name, mtype, self.state.xid
                );
                None
            }
        };

        if self.open_sockets().is_err() {
            if !self.mode.test {
                self.drop_lease("FAIL");
            }
            return;
        }

        // Without a bound UDP socket we cannot renew (our address may
        // have been pulled out from underneath us), and we must never
        // unicast from a BOOTP lease.
        let bootp_bound = self.state.new.as_ref().is_some_and(DhcpMessage::is_bootp);
        let addr = if self.udp_fd.is_none() || (!self.config.inform && bootp_bound) {
            Ipv4Addr::UNSPECIFIED
        } else {
            self.iface.addr
        };

        let mut mtu = self.host.get_mtu();
        if mtu < MTU_MIN && self.host.set_mtu(MTU_MIN) {
            mtu = MTU_MIN;
        }

        let ctx = BuildContext {
            iface: &self.iface,
            config: &self.config,
            lease: &self.state.lease,
            addr,
            xid: self.state.xid,
            up_secs: self.iface.start_uptime.elapsed().as_secs(),
            mtu,
            bound_is_dhcp: self
                .state
                .new
                .as_ref()
                .is_none_or(|m| m.cookie == MAGIC_COOKIE),
        };
        let msg = match builder::make_message(&ctx, mtype) {
            Ok(msg) => msg,
            Err(err) => {
                error!("{}: make_message: {}", self.iface.name, err);
                return;
            }
        };

        let from = msg.ciaddr;
        let to = if from != Ipv4Addr::UNSPECIFIED {
            self.state.lease.server
        } else {
            Ipv4Addr::UNSPECIFIED
        };

        let mut rearm = retransmit;
        let bytes = msg.to_bytes();
        if to != Ipv4Addr::UNSPECIFIED && to != Ipv4Addr::BROADCAST {
            if let Err(err) = self.host.send_udp(to, &bytes) {
                error!("{}: send_udp: {}", self.iface.name, err);
                self.close_sockets();
            }
        } else {
            let frame = net::make_udp_frame(&bytes, from, to);
            if let Err(err) = self.host.send_raw(&frame) {
                // Failing here means we cannot work beneath the IP layer
                // for this interface.
                error!("{}: send_raw: {}", self.iface.name, err);
                if !self.mode.test {
                    self.drop_lease("FAIL");
                }
                self.close_sockets();
                self.host.delete_timer(None);
                rearm = None;
            }
        }

        // The retransmit timer was computed before the send, so a
        // cancelled send never leaves a dangling timer.
        if let (Some(event), Some(tv)) = (rearm, delay) {
            self.host.add_timer(tv, event);
        }
    }

    fn open_sockets(&mut self) -> Result<()> {
        if self.raw_fd.is_none() {
            match self.host.open_raw() {
                Ok(fd) => {
                    self.host.add_fd(fd);
                    self.raw_fd = Some(fd);
                }
                Err(err) => {
                    error!("{}: open_raw: {}", self.iface.name, err);
                    return Err(err);
                }
            }
        }

        if self.udp_fd.is_none()
            && self.iface.addr != Ipv4Addr::UNSPECIFIED
            && (self
                .state
                .new
                .as_ref()
                .is_some_and(|m| m.cookie == MAGIC_COOKIE)
                || self.config.inform)
        {
            match self.host.open_udp(self.iface.addr) {
                Ok(fd) => self.udp_fd = Some(fd),
                // Renewing falls back to the raw path when this fails.
                Err(err) => error!("{}: open_udp: {}", self.iface.name, err),
            }
        }

        Ok(())
    }

    fn close_sockets(&mut self) {
        if let Some(fd) = self.raw_fd.take() {
            self.host.delete_fd(fd);
            self.host.close_raw();
        }
        if self.udp_fd.take().is_some() {
            // No events are watched on the udp socket.
            self.host.close_udp();
        }
    }

    fn new_xid(&self) -> u32 {
        if self.config.xid_hwaddr && self.iface.hwaddr.len() >= 4 {
            // The lower bits are probably more unique on the network.
            let hw = &self.iface.hwaddr;
            let at = hw.len() - 4;
            u32::from_be_bytes([hw[at], hw[at + 1], hw[at + 2], hw[at + 3]])
        } else {
            rand::random()
        }
    }

    fn log_reply(&self, level: ReplyLog, what: &str, msg: &DhcpMessage, from: Ipv4Addr) {
        let detail = if what == "NAK:" {
            get_option_string(msg, DHO_MESSAGE)
        } else if msg.yiaddr != Ipv4Addr::UNSPECIFIED {
            Some(msg.yiaddr.to_string())
        } else {
            None
        };

        let server_id = get_option_addr(msg, DHO_SERVERID);
        let end = msg
            .servername
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(msg.servername.len());
        let servername = String::from_utf8_lossy(&msg.servername[..end]);

        let line = if let Some(server) = server_id
            && !servername.is_empty()
        {
            format!(
                "{}: {} {} from {} `{}'",
                self.iface.name,
                what,
                detail.unwrap_or_default(),
                server,
                servername
            )
        } else {
            let (tfrom, addr) = match server_id {
                Some(server) => ("from", server),
                None => ("via", from),
            };
            match detail {
                Some(detail) => format!(
                    "{}: {} {} {} {}",
                    self.iface.name, what, detail, tfrom, addr
                ),
                None => format!("{}: {} {} {}", self.iface.name, what, tfrom, addr),
            }
        };

        match level {
            ReplyLog::Info => info!("{}", line),
            ReplyLog::Warn => warn!("{}", line),
            ReplyLog::Error => error!("{}", line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arp, EventLoop, Ipv4Shim, Ipv4ll, Script, Transport};
    use std::path::PathBuf;

    struct NullHost;

    impl EventLoop for NullHost {
        fn add_timer(&mut self, _: Duration, _: TimerEvent) {}
        fn delete_timer(&mut self, _: Option<TimerEvent>) {}
        fn add_fd(&mut self, _: Fd) {}
        fn delete_fd(&mut self, _: Fd) {}
    }

    impl Transport for NullHost {
        fn open_raw(&mut self) -> Result<Fd> {
            Ok(3)
        }
        fn open_udp(&mut self, _: Ipv4Addr) -> Result<Fd> {
            Ok(4)
        }
        fn close_raw(&mut self) {}
        fn close_udp(&mut self) {}
        fn send_raw(&mut self, _: &[u8]) -> Result<()> {
            Ok(())
        }
        fn send_udp(&mut self, _: Ipv4Addr, _: &[u8]) -> Result<()> {
            Ok(())
        }
        fn recv_raw(&mut self, _: &mut [u8]) -> Result<(usize, bool)> {
            Ok((0, false))
        }
    }

    impl Arp for NullHost {
        fn arp_probe(&mut self) {}
        fn arp_announce(&mut self) {}
    }

    impl Ipv4Shim for NullHost {
        fn has_address(&self, _: Ipv4Addr) -> bool {
            false
        }
        fn apply_addr(&mut self, _: Option<&Lease>, _: &str) {}
        fn get_address(&self) -> Option<(Ipv4Addr, Ipv4Addr, Ipv4Addr)> {
            None
        }
        fn get_mtu(&self) -> u16 {
            1500
        }
        fn set_mtu(&mut self, _: u16) -> bool {
            true
        }
        fn fallback_profile(&mut self) -> Option<ClientConfig> {
            None
        }
    }

    impl Script for NullHost {
        fn script_run(&mut self, _: &str, _: &[(String, String)]) {}
    }

    impl Ipv4ll for NullHost {
        fn ipv4ll_start(&mut self) {}
    }

    fn engine(config: ClientConfig) -> Engine<NullHost> {
        let iface = Interface::new(
            "eth0",
            &[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01],
            PathBuf::from("test_engine.lease"),
        );
        Engine::new(NullHost, iface, config, RunMode::default())
    }

    #[test]
    fn test_xid_from_hwaddr() {
        let engine = engine(ClientConfig {
            xid_hwaddr: true,
            ..Default::default()
        });
        assert_eq!(engine.new_xid(), 0xbeef_0001);
    }

    #[test]
    fn test_xid_random_when_unconfigured() {
        let engine = engine(ClientConfig::default());
        assert_ne!(engine.new_xid(), engine.new_xid());
    }

    #[test]
    fn test_retransmit_interval_doubles_and_caps() {
        let mut engine = engine(ClientConfig::default());
        let mut seen = Vec::new();
        for _ in 0..7 {
            engine.send_message(MessageType::Discover, Some(TimerEvent::SendDiscover));
            seen.push(engine.state.interval);
        }
        assert_eq!(seen, vec![4, 8, 16, 32, 64, 64, 64]);
    }

    #[test]
    fn test_interval_resets_on_reply_handling() {
        let mut engine = engine(ClientConfig::default());
        engine.send_message(MessageType::Discover, Some(TimerEvent::SendDiscover));
        assert_eq!(engine.state.interval, 4);
        // Any handled reply resets the window, a NAK included.
        let mut nak = DhcpMessage {
            cookie: MAGIC_COOKIE,
            ..Default::default()
        };
        nak.options = vec![53, 1, MessageType::Nak as u8, 255];
        engine.handle_message(nak, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(engine.state.interval, 0);
    }
}
