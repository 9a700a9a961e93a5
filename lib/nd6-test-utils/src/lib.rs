// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

#[macro_use]
pub mod nd_state;
pub mod solicit;

// Let's make our lives easier and pub use a bunch of stuff.
pub use nd_state::NdExpect;
pub use nd6::api::*;
pub use nd6::engine::Nd;
pub use nd6::engine::ifnet::AddrConfig;
pub use nd6::engine::ifnet::AddrFlags;
pub use nd6::engine::input::DropReason;
pub use nd6::engine::input::NdInputResult;
pub use nd6::provider::LladdrSource;
pub use nd6::provider::LogLevel;
pub use nd6::provider::RouteError;
pub use nd6::sim::SIM_START;
pub use nd6::sim::SimStack;
pub use solicit::ParsedRs;
pub use solicit::parse_rs;

pub const MAC1: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 1]);
pub const MAC2: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 2]);

/// The link-local address of router `n`.
pub fn rtr(n: u16) -> Ipv6Addr {
    Ipv6Addr::from_const([0xfe80, 0, 0, 0, 0, 0, 0, n])
}

pub fn cidr(s: &str) -> Ipv6Cidr {
    s.parse().unwrap()
}

pub fn ip(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

/// A Prefix Information option with both L and A set.
pub fn pi_la(prefix: &str, vltime: u32, pltime: u32) -> PrefixInfoOpt {
    PrefixInfoOpt::new(
        cidr(prefix),
        PiFlags::ONLINK | PiFlags::AUTO,
        vltime,
        pltime,
    )
}

/// Build up a [`RouterAdvert`] one option at a time.
pub struct RaBuilder {
    ra: RouterAdvert,
}

impl RaBuilder {
    pub fn new(src: Ipv6Addr, lifetime: u16) -> Self {
        Self { ra: RouterAdvert::new(src, lifetime) }
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.ra.flags = flags;
        self
    }

    pub fn prefix(mut self, pi: PrefixInfoOpt) -> Self {
        self.ra.opts.prefixes.push(pi);
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.ra.opts.mtu = Some(MtuOpt::new(mtu));
        self
    }

    pub fn lladdr(mut self, mac: MacAddr) -> Self {
        self.ra.opts.src_lladdr = Some(LinkAddrOpt::from_mac(mac));
        self
    }

    pub fn reachable(mut self, ms: u32) -> Self {
        self.ra.reachable_time = ms;
        self
    }

    pub fn build(self) -> RouterAdvert {
        self.ra
    }
}

/// The subsystem wired to a simulated stack, along with the expected
/// counter values.
pub struct NdHarness {
    pub sim: SimStack,
    pub nd: Nd,
    pub expect: NdExpect,
}

impl NdHarness {
    pub fn new(cfg: NdConfig) -> Self {
        let sim = SimStack::new();
        let nd = sim.nd(cfg).expect("failed to create subsystem");
        Self { sim, nd, expect: NdExpect::new() }
    }

    /// A host with a single auto-configuring interface `em0`.
    pub fn host() -> Self {
        let h = Self::new(NdConfig::default());
        h.attach("em0", 1, MAC1);
        h
    }

    pub fn attach(&self, name: &str, index: IfIndex, mac: MacAddr) {
        self.nd
            .ifattach(IfConfig::new(name, index, Some(mac)))
            .expect("failed to attach interface");
    }

    pub fn ra(&self, ifindex: IfIndex, ra: &RouterAdvert) -> NdInputResult {
        self.nd.ra_input(ifindex, ra)
    }

    pub fn routers(&self) -> Vec<DefRouterDump> {
        self.nd.dump_routers(&DumpRoutersReq::default()).routers
    }

    pub fn prefixes(&self) -> Vec<PrefixDump> {
        self.nd.dump_prefixes(&DumpPrefixesReq::default()).prefixes
    }

    pub fn prefix(&self, c: &str) -> Option<PrefixDump> {
        let c = cidr(c);
        self.prefixes().into_iter().find(|p| p.prefix == c)
    }

    /// The router currently holding the default route, if any.
    pub fn installed(&self) -> Option<Ipv6Addr> {
        self.routers().iter().find(|dr| dr.installed).map(|dr| dr.addr)
    }

    /// Advance the clock and fire the lifetime timer.
    pub fn tick(&self, secs: u64) {
        self.sim.clock.advance(secs);
        self.nd.timer();
    }

    /// Look up a counter by name.
    pub fn stat(&self, name: &str) -> u64 {
        self.nd
            .stats()
            .fields()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .unwrap_or_else(|| panic!("no such counter: {name}"))
    }
}
