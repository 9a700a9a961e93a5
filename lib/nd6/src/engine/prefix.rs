// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The Prefix List.
//!
//! A prefix is tracked per interface. Autoconfigured addresses point
//! back at the prefix they came from and each such address holds a
//! reference on it, as does a pending autoconfiguration task. A prefix
//! with references is never freed: removing it only zeroes its
//! lifetimes and the last reference to go away finishes the job.

use super::Ctx;
use super::NdState;
use super::defrouter::RouterKey;
use super::ifnet::AddrFlags;
use super::lifetime::Lifetimes;
use super::lifetime::two_hour_rule;
use crate::api::IfIndex;
use crate::api::Ipv6Addr;
use crate::api::Ipv6Cidr;
use crate::api::NdConfig;
use crate::api::PiFlags;
use crate::api::PrefixState;
use crate::ddi::time::Moment;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;

/// A stable handle on a prefix. Unlike a list position it survives
/// the list changing underneath, and unlike a pointer it can be checked
/// for still being in the list.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PrefixId(pub(crate) u64);

impl Display for PrefixId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An entry of the Prefix List.
#[derive(Clone, Debug)]
pub struct NdPrefix {
    pub id: PrefixId,
    pub ifindex: IfIndex,
    pub cidr: Ipv6Cidr,
    /// The L and A bits. They are only ever turned on.
    pub raf: PiFlags,
    pub ltime: Lifetimes,
    /// When `ltime` was last set from an advertisement.
    pub lastupdate: Moment,
    pub state: PrefixState,
    pub refcnt: u32,
    /// The routers advertising this prefix, most recent first.
    pub advrtrs: Vec<RouterKey>,
    /// An autoconfiguration task is queued for this prefix.
    pub task_pending: bool,
    /// Removal was requested while references were held.
    pub removing: bool,
}

impl NdPrefix {
    pub fn onlink_flag(&self) -> bool {
        self.raf.contains(PiFlags::ONLINK)
    }

    pub fn auto_flag(&self) -> bool {
        self.raf.contains(PiFlags::AUTO)
    }

    pub fn is_link_local(&self) -> bool {
        self.cidr.ip().is_link_local()
    }
}

/// A prefix as described by a Prefix Information option or a manually
/// configured address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrefixCandidate {
    pub ifindex: IfIndex,
    pub cidr: Ipv6Cidr,
    pub raf: PiFlags,
    pub ltime: Lifetimes,
    pub lastupdate: Moment,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum PrefixAddError {
    #[error("too many prefixes on interface {0}")]
    TooManyPrefixes(IfIndex),
    #[error("no such interface {0}")]
    NoInterface(IfIndex),
}

impl NdState {
    pub(crate) fn prefix_idx(&self, id: PrefixId) -> Option<usize> {
        self.prefixes.iter().position(|pr| pr.id == id)
    }

    pub(crate) fn prefix(&self, id: PrefixId) -> Option<&NdPrefix> {
        self.prefixes.iter().find(|pr| pr.id == id)
    }

    pub(crate) fn prefix_mut(&mut self, id: PrefixId) -> Option<&mut NdPrefix> {
        self.prefixes.iter_mut().find(|pr| pr.id == id)
    }

    /// Find the prefix for `cidr` on `ifindex`.
    pub(crate) fn prefix_lookup(
        &self,
        ifindex: IfIndex,
        cidr: &Ipv6Cidr,
    ) -> Option<usize> {
        self.prefixes
            .iter()
            .position(|pr| pr.ifindex == ifindex && pr.cidr == *cidr)
    }

    /// Link an advertising router to a prefix, unless it already is.
    fn pfxrtr_add(&mut self, ctx: &Ctx, id: PrefixId, key: RouterKey) {
        let Some(pr) = self.prefix_mut(id) else {
            return;
        };
        if pr.advrtrs.contains(&key) {
            return;
        }
        pr.advrtrs.insert(0, key);
        self.pfxlist_onlink_check(ctx);
    }

    /// Start tracking a new prefix.
    pub(crate) fn prelist_add(
        &mut self,
        ctx: &Ctx,
        cand: &PrefixCandidate,
        dr: Option<RouterKey>,
    ) -> Result<PrefixId, PrefixAddError> {
        let ifindex = cand.ifindex;
        let cap = ctx.cfg.max_if_prefixes;
        let n = self
            .ifaces
            .get(&ifindex)
            .ok_or(PrefixAddError::NoInterface(ifindex))?
            .nprefixes;

        if cap >= 0 && n >= cap as u32 / 2 {
            self.purge_detached(ctx, ifindex);
        }

        let n = self
            .ifaces
            .get(&ifindex)
            .ok_or(PrefixAddError::NoInterface(ifindex))?
            .nprefixes;
        if NdConfig::at_cap(cap, n) {
            self.stats.prefix_cap_drop += 1;
            return Err(PrefixAddError::TooManyPrefixes(ifindex));
        }

        let id = self.alloc_prefix_id();
        self.prefixes.insert(
            0,
            NdPrefix {
                id,
                ifindex,
                cidr: cand.cidr,
                raf: cand.raf,
                ltime: cand.ltime,
                lastupdate: cand.lastupdate,
                state: PrefixState::Offlink,
                refcnt: 0,
                advrtrs: Vec::new(),
                task_pending: false,
                removing: false,
            },
        );

        if cand.raf.contains(PiFlags::ONLINK) {
            if let Err(e) = self.prefix_onlink(ctx, id) {
                nd6log!(
                    ctx,
                    "failed to make {} on {} onlink: {e}",
                    cand.cidr,
                    self.ifname(ifindex)
                );
            }
        }

        if let Some(key) = dr {
            self.pfxrtr_add(ctx, id, key);
        }

        if let Some(ifp) = self.ifaces.get_mut(&ifindex) {
            ifp.nprefixes += 1;
        }

        Ok(id)
    }

    /// Make room on an interface by dropping the prefixes nobody
    /// advertises anymore, along with the addresses configured from
    /// them.
    fn purge_detached(&mut self, ctx: &Ctx, ifindex: IfIndex) {
        let stale: Vec<PrefixId> = self
            .prefixes
            .iter()
            .filter(|pr| {
                pr.ifindex == ifindex
                    && !pr.is_link_local()
                    && (pr.state.is_detached() || pr.advrtrs.is_empty())
            })
            .map(|pr| pr.id)
            .collect();

        for id in stale {
            let owned: Vec<Ipv6Addr> = self
                .ifaces
                .get(&ifindex)
                .map(|ifp| {
                    ifp.addrs
                        .iter()
                        .filter(|a| {
                            a.flags.contains(AddrFlags::AUTOCONF)
                                && a.prefix == Some(id)
                        })
                        .map(|a| a.addr)
                        .collect()
                })
                .unwrap_or_default();

            for addr in owned {
                self.purge_addr(ctx, ifindex, addr);
            }

            // Purging the last address may have removed it already.
            if self.prefix(id).is_some_and(|pr| pr.refcnt == 0) {
                self.prelist_remove(ctx, id);
            }
        }
    }

    /// Stop tracking a prefix. With references outstanding it lingers,
    /// expired and off-link, until the last one is dropped.
    pub(crate) fn prelist_remove(&mut self, ctx: &Ctx, id: PrefixId) {
        let Some(pr) = self.prefix_mut(id) else {
            return;
        };

        // Anyone still looking at it sees it as expired from here on.
        pr.ltime = Lifetimes::expired(ctx.now);
        let (cidr, ifindex) = (pr.cidr, pr.ifindex);

        if pr.state.is_onlink() {
            if let Err(e) = self.prefix_offlink(ctx, id) {
                nd6log!(
                    ctx,
                    "failed to make {cidr} on {} offlink: {e}",
                    self.ifname(ifindex)
                );
            }
        }

        let Some(idx) = self.prefix_idx(id) else {
            return;
        };
        if self.prefixes[idx].refcnt > 0 {
            self.prefixes[idx].removing = true;
            return;
        }

        self.prefixes.remove(idx);
        let ifname = self.ifname(ifindex);
        if let Some(ifp) = self.ifaces.get_mut(&ifindex) {
            ctx.counter_dec(&mut ifp.nprefixes, "prefixes", &ifname);
        }

        self.pfxlist_onlink_check(ctx);
    }

    /// Fold one advertised prefix into the list and decide whether the
    /// advertisement calls for a new autoconfigured address.
    pub(crate) fn prelist_update(
        &mut self,
        ctx: &Ctx,
        new: &PrefixCandidate,
        dr: Option<RouterKey>,
        authenticated: bool,
    ) {
        let ifname = self.ifname(new.ifindex);
        let id = match self.prefix_lookup(new.ifindex, &new.cidr) {
            Some(idx) => {
                let pr = &mut self.prefixes[idx];
                // The flags can only be turned on.
                pr.raf |= new.raf;
                if new.raf.contains(PiFlags::ONLINK) {
                    pr.ltime = new.ltime;
                    pr.lastupdate = new.lastupdate;
                    if new.ltime.vltime != 0 {
                        pr.removing = false;
                    }
                }

                let id = pr.id;
                if new.raf.contains(PiFlags::ONLINK) && !pr.state.is_onlink() {
                    if let Err(e) = self.prefix_onlink(ctx, id) {
                        nd6log!(
                            ctx,
                            "failed to make {} on {ifname} onlink: {e}",
                            new.cidr
                        );
                    }
                }

                if let Some(key) = dr {
                    self.pfxrtr_add(ctx, id, key);
                }
                id
            }

            None => {
                if new.ltime.vltime == 0
                    || !new.raf.intersects(PiFlags::ONLINK | PiFlags::AUTO)
                {
                    return;
                }

                let id = match self.prelist_add(ctx, new, dr) {
                    Ok(id) => id,
                    Err(e) => {
                        nd6log!(
                            ctx,
                            "failed to add prefix {} on {ifname}: {e}",
                            new.cidr
                        );
                        return;
                    }
                };

                // A prefix without the L bit is only kept as an anchor
                // for the addresses configured from it, and must look
                // expired to everything else.
                if let Some(pr) = self.prefix_mut(id) {
                    if !pr.onlink_flag() {
                        pr.ltime = Lifetimes::expired(ctx.now);
                    }
                }
                id
            }
        };

        if !new.raf.contains(PiFlags::AUTO) {
            return;
        }

        let now = ctx.now;
        let Some(ifp) = self.ifaces.get_mut(&new.ifindex) else {
            return;
        };
        let privacy = ifp.cfg.privacy;

        // Whether a usable stable address, a usable temporary address,
        // and a manually configured address exist for the prefix.
        let mut autoconf = false;
        let mut tempaddr_preferred = false;
        let mut statique = false;

        for ia6 in ifp.addrs.iter_mut() {
            if ia6.flags.contains(AddrFlags::ANYCAST)
                || !ia6.in_prefix(&new.cidr)
            {
                continue;
            }

            if !ia6.flags.contains(AddrFlags::AUTOCONF) {
                statique = true;
                continue;
            }

            let deprecated = ia6.flags.contains(AddrFlags::DEPRECATED);
            if ia6.flags.contains(AddrFlags::PRIVACY) {
                if !deprecated {
                    tempaddr_preferred = true;
                }
                // Temporary addresses are never extended.
                if new.ltime.vltime >= ia6.ltime.vltime
                    || new.ltime.pltime >= ia6.ltime.pltime
                {
                    continue;
                }
            } else if !deprecated {
                autoconf = true;
            }

            let stored = ia6.ltime.remaining_valid(ia6.updated, now);
            let vltime = two_hour_rule(new.ltime.vltime, stored, authenticated);
            ia6.ltime = Lifetimes::for_address(vltime, new.ltime.pltime, now);
            ia6.updated = now;
        }

        if (!autoconf || (privacy && !tempaddr_preferred))
            && new.ltime.vltime != 0
            && !(!privacy && statique)
        {
            self.schedule_addr_add(ctx, id);
        }
    }

    /// Queue address autoconfiguration for a prefix. The queued task
    /// holds a reference, and a prefix is queued at most once.
    fn schedule_addr_add(&mut self, ctx: &Ctx, id: PrefixId) {
        let Some(pr) = self.prefix_mut(id) else {
            return;
        };

        pr.refcnt += 1;
        if pr.task_pending {
            pr.refcnt -= 1;
            return;
        }

        pr.task_pending = true;
        self.tasks.push_back(id);
        ctx.pv.notify.kick();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::IfConfig;
    use crate::api::MacAddr;
    use crate::engine::Nd;
    use crate::engine::defrouter::DefRouter;
    use crate::sim::SimStack;

    const MAC: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 1]);

    fn rtr(n: u16) -> Ipv6Addr {
        Ipv6Addr::from_const([0xfe80, 0, 0, 0, 0, 0, 0, n])
    }

    fn cidr(s: &str) -> Ipv6Cidr {
        s.parse().unwrap()
    }

    fn setup(cfg: NdConfig) -> (SimStack, Nd) {
        let sim = SimStack::new();
        let nd = sim.nd(cfg).unwrap();
        nd.ifattach(IfConfig::new("em0", 1, Some(MAC))).unwrap();
        (sim, nd)
    }

    // No link-layer address, so no link-local address or prefix either.
    fn setup_bare(cfg: NdConfig) -> (SimStack, Nd) {
        let sim = SimStack::new();
        let nd = sim.nd(cfg).unwrap();
        nd.ifattach(IfConfig::new("em0", 1, None)).unwrap();
        (sim, nd)
    }

    fn cand(nd: &Nd, c: &str, raf: PiFlags, v: u32, p: u32) -> PrefixCandidate {
        let now = nd.pv.clock.now();
        PrefixCandidate {
            ifindex: 1,
            cidr: cidr(c),
            raf,
            ltime: Lifetimes::for_prefix(v, p, now).unwrap(),
            lastupdate: now,
        }
    }

    fn update(nd: &Nd, new: &PrefixCandidate, dr: Option<RouterKey>) {
        let (mut st, ctx) = nd.lock();
        st.prelist_update(&ctx, new, dr, false);
    }

    fn add_router(nd: &Nd, addr: Ipv6Addr) -> RouterKey {
        let (mut st, ctx) = nd.lock();
        let dr = DefRouter::new(addr, 1, 0, 1800, ctx.now);
        st.defrtrlist_update(&ctx, dr).unwrap()
    }

    const LA: PiFlags = PiFlags::ONLINK.union(PiFlags::AUTO);

    #[test]
    fn flags_only_promoted() {
        let (_sim, nd) = setup(NdConfig::default());
        for flags in [PiFlags::AUTO, PiFlags::ONLINK, PiFlags::empty()] {
            update(&nd, &cand(&nd, "2001:db8::/64", flags, 3600, 1800), None);
        }

        let st = nd.state.lock();
        let idx = st.prefix_lookup(1, &cidr("2001:db8::/64")).unwrap();
        assert_eq!(st.prefixes[idx].raf, LA);
    }

    #[test]
    fn nothing_to_track() {
        let (_sim, nd) = setup_bare(NdConfig::default());
        update(&nd, &cand(&nd, "2001:db8::/64", LA, 0, 0), None);
        update(
            &nd,
            &cand(&nd, "2001:db8:1::/64", PiFlags::empty(), 3600, 1800),
            None,
        );
        assert!(nd.state.lock().prefixes.is_empty());
    }

    #[test]
    fn auto_only_prefix_looks_expired() {
        let (_sim, nd) = setup(NdConfig::default());
        let pi = cand(&nd, "2001:db8::/64", PiFlags::AUTO, 3600, 1800);
        update(&nd, &pi, None);
        let st = nd.state.lock();
        let pr = &st.prefixes[0];
        assert_eq!((pr.ltime.vltime, pr.ltime.pltime), (0, 0));
        assert!(!pr.state.is_onlink());
        // Still scheduled for autoconfiguration.
        assert!(pr.task_pending);
        assert_eq!(pr.refcnt, 1);
    }

    #[test]
    fn schedule_at_most_once() {
        let (sim, nd) = setup(NdConfig::default());
        let new = cand(&nd, "2001:db8::/64", LA, 3600, 1800);
        update(&nd, &new, None);
        update(&nd, &new, None);
        let st = nd.state.lock();
        assert_eq!(st.tasks.len(), 1);
        assert_eq!(st.prefixes[0].refcnt, 1);
        assert_eq!(sim.notify.kicks(), 1);
    }

    #[test]
    fn static_address_suppresses_slaac() {
        let (_sim, nd) = setup(NdConfig::default());
        let mut acfg = crate::engine::ifnet::AddrConfig::new(
            "2001:db8::99".parse().unwrap(),
            64,
        );
        acfg.flags = AddrFlags::empty();
        nd.add_address(1, &acfg).unwrap();

        update(&nd, &cand(&nd, "2001:db8::/64", LA, 3600, 1800), None);
        let st = nd.state.lock();
        assert!(st.tasks.is_empty());
        // The manual address holds the only reference.
        assert_eq!(st.prefixes[0].refcnt, 1);
    }

    #[test]
    fn links_router_once() {
        let (_sim, nd) = setup(NdConfig::default());
        let r1 = add_router(&nd, rtr(1));
        let r2 = add_router(&nd, rtr(2));
        let new = cand(&nd, "2001:db8::/64", LA, 3600, 1800);
        update(&nd, &new, Some(r1));
        update(&nd, &new, Some(r2));
        update(&nd, &new, Some(r1));
        let st = nd.state.lock();
        assert_eq!(st.prefixes[0].advrtrs, vec![r2, r1]);
    }

    #[test]
    fn refcount_defers_removal() {
        let (sim, nd) = setup(NdConfig::default());
        update(&nd, &cand(&nd, "2001:db8::/64", LA, 3600, 1800), None);
        let id = {
            let (mut st, ctx) = nd.lock();
            let id = st.prefixes[0].id;
            st.prelist_remove(&ctx, id);
            id
        };

        {
            let st = nd.state.lock();
            let pr = st.prefix(id).unwrap();
            assert!(pr.removing);
            assert_eq!(pr.ltime.vltime, 0);
            assert!(!pr.state.is_onlink());
        }
        assert!(sim.routes.routes_to(&cidr("2001:db8::/64")).is_empty());

        // The queued task drops the last reference and finishes the
        // removal without creating anything.
        nd.run_tasks();
        let st = nd.state.lock();
        assert!(st.prefix(id).is_none());
        assert_eq!(st.ifaces[&1].nprefixes, 1);
    }

    #[test]
    fn cap_purges_detached_first() {
        let cfg = NdConfig { max_if_prefixes: 2, ..Default::default() };
        let (sim, nd) = setup_bare(cfg);
        let r1 = add_router(&nd, rtr(1));
        sim.neighbors.set_reachable(1, rtr(1), true);

        // The first prefix has no advertiser and is fair game.
        update(
            &nd,
            &cand(&nd, "2001:db8:1::/64", PiFlags::ONLINK, 3600, 0),
            None,
        );
        update(
            &nd,
            &cand(&nd, "2001:db8:2::/64", PiFlags::ONLINK, 3600, 0),
            Some(r1),
        );
        update(
            &nd,
            &cand(&nd, "2001:db8:3::/64", PiFlags::ONLINK, 3600, 0),
            Some(r1),
        );

        let st = nd.state.lock();
        let have: Vec<Ipv6Cidr> = st.prefixes.iter().map(|p| p.cidr).collect();
        assert_eq!(
            have,
            vec![cidr("2001:db8:3::/64"), cidr("2001:db8:2::/64")]
        );
        assert_eq!(st.ifaces[&1].nprefixes, 2);
    }

    #[test]
    fn cap_refuses() {
        let cfg = NdConfig { max_if_prefixes: 1, ..Default::default() };
        let (sim, nd) = setup_bare(cfg);
        let r1 = add_router(&nd, rtr(1));
        // A reachable advertiser keeps the first prefix attached.
        sim.neighbors.set_reachable(1, rtr(1), true);
        update(
            &nd,
            &cand(&nd, "2001:db8:1::/64", PiFlags::ONLINK, 3600, 0),
            Some(r1),
        );
        update(
            &nd,
            &cand(&nd, "2001:db8:2::/64", PiFlags::ONLINK, 3600, 0),
            Some(r1),
        );
        assert_eq!(nd.state.lock().prefixes.len(), 1);
        assert_eq!(nd.stats().prefix_cap_drop, 1);
    }
}
