// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Periodic timers: lifetime expiry of routers, addresses, and
//! prefixes, and the slow recalculation of the reachable time.

use super::Ctx;
use super::Nd;
use super::NdState;
use super::ifnet::AddrFlags;
use super::lifetime::compute_rtime;
use super::prefix::PrefixId;
use crate::api::IfIndex;
use crate::api::Ipv6Addr;
use crate::api::ND6_INFINITE_LIFETIME;
use crate::api::ND6_SLOWTIMER_INTERVAL;
use alloc::vec::Vec;

impl NdState {
    fn timer(&mut self, ctx: &Ctx) {
        let now = ctx.now;

        while let Some(idx) =
            self.routers.iter().position(|dr| dr.expire < now)
        {
            nd6log!(
                ctx,
                "default router {} on {} expired",
                self.routers[idx].addr,
                self.ifname(self.routers[idx].ifindex)
            );
            self.defrtrlist_del(ctx, idx);
        }

        let mut invalid: Vec<(IfIndex, Ipv6Addr)> = Vec::new();
        for ifp in self.ifaces.values_mut() {
            for ia6 in ifp.addrs.iter_mut() {
                if ia6.ltime.is_invalid(now) {
                    invalid.push((ifp.cfg.index, ia6.addr));
                } else if ia6.ltime.is_deprecated(now) {
                    ia6.flags.insert(AddrFlags::DEPRECATED);
                } else {
                    // A new advertisement may have revived it.
                    ia6.flags.remove(AddrFlags::DEPRECATED);
                }
            }
        }

        for (index, addr) in invalid {
            nd6log!(ctx, "address {addr} on {} expired", self.ifname(index));
            self.purge_addr(ctx, index, addr);
        }

        // Address and prefix expiry are independent: an expired prefix
        // leaves its addresses alone.
        let expired: Vec<PrefixId> = self
            .prefixes
            .iter()
            .filter(|pr| {
                !pr.removing
                    && pr.ltime.vltime != ND6_INFINITE_LIFETIME
                    && now.delta_as_secs(pr.lastupdate)
                        > u64::from(pr.ltime.vltime)
            })
            .map(|pr| pr.id)
            .collect();

        for id in expired {
            self.prelist_remove(ctx, id);
        }
    }

    fn slowtimo(&mut self, ctx: &Ctx) {
        let interval = i64::from(ND6_SLOWTIMER_INTERVAL);
        for ifp in self.ifaces.values_mut() {
            let ndi = &mut ifp.ndi;
            if ndi.basereachable == 0 {
                continue;
            }

            ndi.recalctm -= interval;
            if ndi.recalctm <= 0 {
                ndi.recalctm = i64::from(ctx.cfg.recalc_reachtm_interval);
                ndi.reachable =
                    compute_rtime(ctx.pv.random.as_ref(), ndi.basereachable);
            }
        }
    }
}

impl Nd {
    /// Expire routers, addresses, and prefixes. Meant to be called
    /// about once a second.
    pub fn timer(&self) {
        let (mut st, ctx) = self.lock();
        st.timer(&ctx);
    }

    /// The slow timer, to be called every [`ND6_SLOWTIMER_INTERVAL`]
    /// seconds. Returns that interval.
    pub fn slowtimo(&self) -> u32 {
        let (mut st, ctx) = self.lock();
        st.slowtimo(&ctx);
        ND6_SLOWTIMER_INTERVAL
    }
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
    use crate::engine::ifnet::AddrConfig;
    use crate::sim::SimStack;

    const MAC: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 1]);

    fn setup(cfg: NdConfig) -> (SimStack, Nd) {
        let sim = SimStack::new();
        let nd = sim.nd(cfg).unwrap();
        nd.ifattach(IfConfig::new("em0", 1, Some(MAC))).unwrap();
        (sim, nd)
    }

    #[test]
    fn router_expiry() {
        let (sim, nd) = setup(NdConfig::default());
        nd.ra_input(1, &RouterAdvert::new("fe80::1".parse().unwrap(), 30));
        assert_eq!(sim.routes.default_routes().len(), 1);

        sim.clock.advance(30);
        nd.timer();
        assert_eq!(nd.state.lock().routers.len(), 1);

        sim.clock.advance(1);
        nd.timer();
        assert!(nd.state.lock().routers.is_empty());
        assert!(sim.routes.default_routes().is_empty());
    }

    #[test]
    fn address_lifetimes() {
        let (sim, nd) = setup(NdConfig::default());
        let addr: Ipv6Addr = "2001:db8::5".parse().unwrap();
        let mut acfg = AddrConfig::new(addr, 64);
        acfg.vltime = 100;
        acfg.pltime = 50;
        nd.add_address(1, &acfg).unwrap();

        let flags = |nd: &Nd| {
            let addrs = nd.addrs(1).unwrap();
            addrs.iter().find(|a| a.addr == addr).map(|a| a.flags)
        };

        sim.clock.advance(51);
        nd.timer();
        assert_eq!(flags(&nd), Some(AddrFlags::DEPRECATED));

        sim.clock.advance(50);
        nd.timer();
        assert_eq!(flags(&nd), None);
        assert!(sim.addrs.purged().contains(&(1, addr)));
    }

    #[test]
    fn prefix_and_address_expire_together() {
        let (sim, nd) = setup(NdConfig::default());
        sim.neighbors.set_reachable(1, "fe80::1".parse().unwrap(), true);
        let mut ra = RouterAdvert::new("fe80::1".parse().unwrap(), 9000);
        let cidr: Ipv6Cidr = "2001:db8::/64".parse().unwrap();
        let la = PiFlags::ONLINK | PiFlags::AUTO;
        ra.opts.prefixes = vec![PrefixInfoOpt::new(cidr, la, 600, 300)];
        nd.ra_input(1, &ra);
        nd.run_tasks();
        assert_eq!(sim.routes.routes_to(&cidr).len(), 1);

        sim.clock.advance(601);
        nd.timer();

        // The address goes by its own lifetime and takes the last
        // reference on the prefix with it.
        let st = nd.state.lock();
        assert!(st.prefix_lookup(1, &cidr).is_none());
        assert!(sim.routes.routes_to(&cidr).is_empty());
    }

    #[test]
    fn prefix_removal_deferred_by_address() {
        let (sim, nd) = setup(NdConfig::default());
        sim.neighbors.set_reachable(1, "fe80::1".parse().unwrap(), true);
        let mut ra = RouterAdvert::new("fe80::1".parse().unwrap(), 9000);
        let cidr: Ipv6Cidr = "2001:db8::/64".parse().unwrap();
        let la = PiFlags::ONLINK | PiFlags::AUTO;
        ra.opts.prefixes = vec![PrefixInfoOpt::new(cidr, la, 600, 300)];
        nd.ra_input(1, &ra);
        nd.run_tasks();

        // Stretch the address so it outlives the prefix.
        let addr: Ipv6Addr = "2001:db8::ff:fe00:1".parse().unwrap();
        {
            let mut st = nd.state.lock();
            let ifp = st.ifaces.get_mut(&1).unwrap();
            let ia6 = ifp.addrs.iter_mut().find(|a| a.addr == addr).unwrap();
            ia6.ltime = crate::engine::lifetime::Lifetimes::INFINITE;
        }

        sim.clock.advance(601);
        nd.timer();
        {
            let st = nd.state.lock();
            let idx = st.prefix_lookup(1, &cidr).unwrap();
            assert!(st.prefixes[idx].removing);
            assert!(!st.prefixes[idx].state.is_onlink());
        }
        assert!(sim.routes.routes_to(&cidr).is_empty());

        nd.purge_address(1, addr).unwrap();
        assert!(nd.state.lock().prefix_lookup(1, &cidr).is_none());
    }

    #[test]
    fn reachable_recalc() {
        let cfg = NdConfig {
            recalc_reachtm_interval: 2 * ND6_SLOWTIMER_INTERVAL,
            ..Default::default()
        };
        let (_sim, nd) = setup(cfg);
        let before = nd.state.lock().ifaces[&1].ndi.reachable;

        assert_eq!(nd.slowtimo(), ND6_SLOWTIMER_INTERVAL);
        {
            let st = nd.state.lock();
            let ndi = &st.ifaces[&1].ndi;
            assert_eq!(ndi.recalctm, i64::from(ND6_SLOWTIMER_INTERVAL));
            assert_eq!(ndi.reachable, before);
        }

        nd.slowtimo();
        let st = nd.state.lock();
        let ndi = &st.ifaces[&1].ndi;
        assert_eq!(ndi.recalctm, i64::from(2 * ND6_SLOWTIMER_INTERVAL));
        // The sequential random source never repeats itself.
        assert_ne!(ndi.reachable, before);
    }
}
