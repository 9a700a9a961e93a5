// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers allow the engine to be plugged into different network
//! stacks by letting the stack supply the services the router and
//! prefix subsystem consumes but does not own: the forwarding table,
//! the neighbor cache, interface address management, packet output,
//! randomness, time, and logging. A provider is only worth having when
//! there are at least two obvious implementations; here they are the
//! host stack and the in-memory simulation in [`crate::sim`].

use crate::api::IfIndex;
use crate::api::Ipv6Addr;
use crate::api::Ipv6Cidr;
pub use crate::ddi::time::BootClock;
pub use crate::ddi::time::Clock;
use crate::engine::ifnet::AddrFlags;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use rand::RngCore;

/// The set of all platform-specific providers required by the
/// subsystem.
pub struct Providers {
    pub log: Box<dyn LogProvider>,
    pub clock: Box<dyn Clock>,
    pub routes: Box<dyn RouteTable>,
    pub neighbors: Box<dyn NeighborCache>,
    pub addrs: Box<dyn AddrManager>,
    pub output: Box<dyn PacketOutput>,
    pub random: Box<dyn RandomSource>,
    pub notify: Box<dyn TaskNotify>,
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// For example, in a unit test this could map to `println!`. In a
/// daemon it would map to a structured logger.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

bitflags::bitflags! {
    /// Flags of a forwarding table entry.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct RouteFlags: u32 {
        const UP = 0x1;
        const GATEWAY = 0x2;
        const HOST = 0x4;
        const DYNAMIC = 0x10;
        /// Clone a per-destination entry on lookup.
        const CLONING = 0x100;
    }
}

impl Display for RouteFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = String::new();
        for (c, flag) in [
            ('U', Self::UP),
            ('G', Self::GATEWAY),
            ('H', Self::HOST),
            ('D', Self::DYNAMIC),
            ('C', Self::CLONING),
        ] {
            if self.contains(flag) {
                s.push(c);
            }
        }
        write!(f, "{s}")
    }
}

/// A request to add a forwarding table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteReq {
    pub dst: Ipv6Cidr,
    /// The next hop for a gateway route, or the interface address the
    /// route is attributed to for an interface route.
    pub gateway: Ipv6Addr,
    pub ifindex: IfIndex,
    pub flags: RouteFlags,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("route exists")]
    Exists,
    #[error("no such route")]
    NotFound,
    #[error("no buffer space")]
    NoBufs,
    #[error("{0}")]
    Other(String),
}

/// The forwarding table.
pub trait RouteTable: Send + Sync {
    fn add(&self, req: &RouteReq) -> Result<(), RouteError>;

    /// Delete the entry for `dst` on `ifindex`. When `gateway` is given
    /// only an entry through that gateway matches.
    fn delete(
        &self,
        dst: Ipv6Cidr,
        gateway: Option<Ipv6Addr>,
        ifindex: IfIndex,
    ) -> Result<(), RouteError>;

    /// Remove every dynamically learned entry (e.g. from a redirect)
    /// whose next hop is `gateway` on `ifindex`.
    fn flush_gateway(&self, gateway: Ipv6Addr, ifindex: IfIndex);
}

/// Which message a link-layer address was learned from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LladdrSource {
    RouterAdvert,
    RouterSolicit,
}

/// The neighbor cache.
pub trait NeighborCache: Send + Sync {
    /// Is the neighbor in the REACHABLE state, or in a state where it
    /// is probably still reachable (STALE, DELAY, PROBE)?
    fn is_probably_reachable(&self, addr: Ipv6Addr, ifindex: IfIndex)
    -> bool;

    /// Record what a Router Advertisement or Solicitation told us about
    /// `addr`. Called even without a link-layer address option, as the
    /// message alone updates the neighbor's router status.
    fn learn_lladdr(
        &self,
        ifindex: IfIndex,
        addr: Ipv6Addr,
        lladdr: Option<&[u8]>,
        source: LladdrSource,
    );
}

/// A request to create an interface address, or to update the
/// lifetimes of one that already exists.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddrReq {
    pub ifindex: IfIndex,
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
    /// Valid lifetime, in seconds.
    pub vltime: u32,
    /// Preferred lifetime, in seconds.
    pub pltime: u32,
    pub flags: AddrFlags,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AddrError {
    #[error("address {0} is in use")]
    InUse(Ipv6Addr),
    #[error("no such interface {0}")]
    NoInterface(IfIndex),
    #[error("{0}")]
    Other(String),
}

/// The interface address manager.
pub trait AddrManager: Send + Sync {
    /// Create or update an interface address. This may block, so it is
    /// never called with the subsystem lock held.
    fn update_addr(&self, req: &AddrReq) -> Result<(), AddrError>;

    /// The subsystem stopped tracking this address.
    fn purge_addr(&self, ifindex: IfIndex, addr: Ipv6Addr);
}

/// Transmit a complete IPv6 packet on an interface.
pub trait PacketOutput: Send + Sync {
    fn send(&self, ifindex: IfIndex, pkt: Vec<u8>);
}

/// A source of randomness for reachable time jitter, temporary
/// interface identifiers, and desynchronization offsets.
pub trait RandomSource: Send + Sync {
    fn next_u32(&self) -> u32;
    fn fill_bytes(&self, buf: &mut [u8]);
}

/// The thread-local OS-seeded generator.
#[derive(Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn next_u32(&self) -> u32 {
        rand::rng().next_u32()
    }

    fn fill_bytes(&self, buf: &mut [u8]) {
        rand::rng().fill_bytes(buf)
    }
}

/// Told when deferred work has been queued. The implementation
/// arranges for [`crate::engine::Nd::run_tasks()`] to be called from a
/// context that is allowed to block.
pub trait TaskNotify: Send + Sync {
    fn kick(&self);
}

/// For consumers that drain the task queue themselves.
#[derive(Clone, Copy, Default)]
pub struct NoNotify;

impl TaskNotify for NoNotify {
    fn kick(&self) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::IfConfig;
    use crate::api::Ipv6Cidr;
    use crate::api::MacAddr;
    use crate::api::NdConfig;
    use crate::api::PiFlags;
    use crate::api::PrefixInfoOpt;
    use crate::api::RouterAdvert;
    use crate::engine::Nd;
    use crate::sim::SimStack;

    // The host's log, clock, randomness, and task notification with the
    // simulated tables.
    fn host_providers(sim: &SimStack) -> Providers {
        Providers {
            log: Box::new(PrintlnLog),
            clock: Box::new(BootClock::new()),
            random: Box::new(OsRandom),
            notify: Box::new(NoNotify),
            ..sim.providers()
        }
    }

    #[test]
    fn os_random_fills() {
        let mut buf = [0u8; 32];
        OsRandom.fill_bytes(&mut buf);
        // 2^-256
        assert_ne!(buf, [0u8; 32]);
    }

    #[test]
    fn host_providers_drive_engine() {
        let sim = SimStack::new();
        let nd = Nd::new(NdConfig::default(), host_providers(&sim)).unwrap();
        let mac = MacAddr::from_const([0x02, 0, 0, 0, 0, 1]);
        let mut ifc = IfConfig::new("em0", 1, Some(mac));
        ifc.privacy = true;
        nd.ifattach(ifc).unwrap();

        let router = "fe80::1".parse().unwrap();
        sim.neighbors.set_reachable(1, router, true);
        let mut ra = RouterAdvert::new(router, 1800);
        let cidr: Ipv6Cidr = "2001:db8::/64".parse().unwrap();
        let la = PiFlags::ONLINK | PiFlags::AUTO;
        ra.opts.prefixes = vec![PrefixInfoOpt::new(cidr, la, 86400, 14400)];
        nd.ra_input(1, &ra);
        assert_eq!(sim.routes.default_routes().len(), 1);

        // Nothing drains the queue on our behalf.
        assert!(nd.tasks_pending());
        assert!(nd.run_tasks() > 0);
        assert!(!nd.tasks_pending());
        assert_eq!(sim.notify.kicks(), 0);

        let addrs = nd.addrs(1).unwrap();
        assert!(addrs.iter().any(|a| a.prefix == Some(cidr)));
        assert!(addrs.iter().any(|a| a.flags.contains(AddrFlags::PRIVACY)));
        assert_eq!(nd.slowtimo(), crate::api::ND6_SLOWTIMER_INTERVAL);
    }
}
