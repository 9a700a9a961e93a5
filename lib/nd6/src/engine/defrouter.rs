// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The Default Router List.
//!
//! Routers are kept sorted by preference, highest first, and in order
//! of arrival within a preference. At most one of them is installed as
//! the default route at any time; [`NdState::defrouter_select()`] is
//! the only place that changes which.

use super::Ctx;
use super::Nd;
use super::NdState;
use crate::api::IfIndex;
use crate::api::Ipv6Addr;
use crate::api::Ipv6Cidr;
use crate::api::NdConfig;
use crate::api::RouterPref;
use crate::ddi::time::Moment;
use crate::provider::RouteFlags;
use crate::provider::RouteReq;
use itertools::Itertools;

/// Identifies a router across both lists: the prefix list refers to its
/// advertisers by key rather than by position.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct RouterKey {
    pub addr: Ipv6Addr,
    pub ifindex: IfIndex,
}

/// An entry of the Default Router List.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DefRouter {
    pub addr: Ipv6Addr,
    pub ifindex: IfIndex,
    /// The flags byte of the last RA: M, O, and the preference.
    pub flags: u8,
    /// Router lifetime, in seconds.
    pub lifetime: u16,
    pub expire: Moment,
    /// This router is the installed default route.
    pub installed: bool,
}

impl DefRouter {
    /// A router learned at `now` from an RA.
    pub fn new(
        addr: Ipv6Addr,
        ifindex: IfIndex,
        flags: u8,
        lifetime: u16,
        now: Moment,
    ) -> Self {
        Self {
            addr,
            ifindex,
            flags,
            lifetime,
            expire: now + u32::from(lifetime),
            installed: false,
        }
    }

    pub fn key(&self) -> RouterKey {
        RouterKey { addr: self.addr, ifindex: self.ifindex }
    }
}

/// The preference of a router. With preference support turned off
/// every router sorts as medium.
pub fn rtpref(cfg: &NdConfig, flags: u8) -> RouterPref {
    if cfg.rtpref {
        RouterPref::from_ra_flags(flags)
    } else {
        RouterPref::Medium
    }
}

impl NdState {
    pub(crate) fn defrouter_lookup(
        &self,
        addr: Ipv6Addr,
        ifindex: IfIndex,
    ) -> Option<usize> {
        self.routers
            .iter()
            .position(|dr| dr.addr == addr && dr.ifindex == ifindex)
    }

    fn defrouter_pos(&self, key: &RouterKey) -> Option<usize> {
        self.defrouter_lookup(key.addr, key.ifindex)
    }

    /// Is the router behind `key` probably reachable?
    pub(crate) fn router_reachable(&self, ctx: &Ctx, key: &RouterKey) -> bool {
        ctx.pv.neighbors.is_probably_reachable(key.addr, key.ifindex)
    }

    /// Fold an advertised router into the list. Returns the key of the
    /// entry that now represents it, or `None` when there is none (a
    /// zero lifetime, or no room for a new router).
    pub(crate) fn defrtrlist_update(
        &mut self,
        ctx: &Ctx,
        new: DefRouter,
    ) -> Option<RouterKey> {
        if let Some(idx) = self.defrouter_lookup(new.addr, new.ifindex) {
            if new.lifetime == 0 {
                self.defrtrlist_del(ctx, idx);
                return None;
            }

            let key = new.key();
            let dr = &mut self.routers[idx];
            let oldpref = rtpref(ctx.cfg, dr.flags);
            dr.flags = new.flags;
            dr.lifetime = new.lifetime;
            dr.expire = new.expire;

            if rtpref(ctx.cfg, new.flags) == oldpref {
                return Some(key);
            }

            // The preference changed: move the entry to its new place.
            let dr = self.routers.remove(idx);
            self.defrtr_insert(ctx, dr);
            return Some(key);
        }

        if new.lifetime == 0 {
            // Never add a router that is already going away, but do
            // forget any redirect through it.
            if !ctx.cfg.forwarding {
                ctx.pv.routes.flush_gateway(new.addr, new.ifindex);
            }
            return None;
        }

        let ifname = self.ifname(new.ifindex);
        let ifp = self.ifaces.get_mut(&new.ifindex)?;
        if NdConfig::at_cap(ctx.cfg.max_if_defrouters, ifp.ndefrouters) {
            nd6log!(
                ctx,
                "too many default routers on {ifname}, ignoring {}",
                new.addr
            );
            self.stats.router_cap_drop += 1;
            return None;
        }
        ifp.ndefrouters += 1;

        let key = new.key();
        self.defrtr_insert(ctx, DefRouter { installed: false, ..new });
        Some(key)
    }

    /// Insert before the first router of strictly lower preference, then
    /// reselect.
    fn defrtr_insert(&mut self, ctx: &Ctx, dr: DefRouter) {
        let pref = rtpref(ctx.cfg, dr.flags);
        let pos = self
            .routers
            .iter()
            .position(|cur| pref > rtpref(ctx.cfg, cur.flags))
            .unwrap_or(self.routers.len());
        self.routers.insert(pos, dr);
        self.defrouter_select(ctx);
    }

    /// Remove the router at `idx`, unlinking it from every prefix it
    /// advertised.
    pub(crate) fn defrtrlist_del(&mut self, ctx: &Ctx, idx: usize) {
        let Some(dr) = self.routers.get(idx) else {
            ctx.error(&format!("no default router at position {idx}"));
            return;
        };
        let key = dr.key();

        if !ctx.cfg.forwarding {
            ctx.pv.routes.flush_gateway(key.addr, key.ifindex);
        }

        let was_installed = dr.installed;
        if was_installed {
            self.defrouter_delreq(ctx, idx);
        }

        self.routers.remove(idx);
        for pr in self.prefixes.iter_mut() {
            pr.advrtrs.retain(|k| *k != key);
        }

        self.pfxlist_onlink_check(ctx);

        if was_installed {
            self.defrouter_select(ctx);
        }

        let ifname = self.ifname(key.ifindex);
        if let Some(ifp) = self.ifaces.get_mut(&key.ifindex) {
            ctx.counter_dec(&mut ifp.ndefrouters, "default routers", &ifname);
        }
    }

    /// Decide which router should be the default route, and make it so.
    ///
    /// The first router that is probably reachable through an
    /// autoconfiguring interface wins. Without one, the routers take
    /// turns: the one after the installed router is tried, wrapping to
    /// the head. An installed router that is still reachable is kept
    /// unless the winner has strictly higher preference.
    pub(crate) fn defrouter_select(&mut self, ctx: &Ctx) {
        if ctx.cfg.forwarding || self.routers.is_empty() {
            return;
        }

        let selected = self.routers.iter().position(|dr| {
            self.ifaces.get(&dr.ifindex).is_some_and(|ifp| ifp.autoconf())
                && self.router_reachable(ctx, &dr.key())
        });

        let mut iter = self.routers.iter().positions(|dr| dr.installed);
        let installed = iter.next();
        if iter.next().is_some() {
            ctx.error("more than one default router is installed");
        }

        let selected = match (selected, installed) {
            (None, Some(inst)) if inst + 1 < self.routers.len() => inst + 1,
            (None, _) => 0,
            (Some(sel), Some(inst))
                if self.router_reachable(ctx, &self.routers[inst].key())
                    && rtpref(ctx.cfg, self.routers[sel].flags)
                        <= rtpref(ctx.cfg, self.routers[inst].flags) =>
            {
                inst
            }
            (Some(sel), _) => sel,
        };

        if installed != Some(selected) {
            if let Some(inst) = installed {
                self.defrouter_delreq(ctx, inst);
            }
            self.defrouter_addreq(ctx, selected);
        }
    }

    /// Install the router at `idx` as the default route.
    fn defrouter_addreq(&mut self, ctx: &Ctx, idx: usize) {
        let dr = &mut self.routers[idx];
        let req = RouteReq {
            dst: Ipv6Cidr::DEFAULT,
            gateway: dr.addr,
            ifindex: dr.ifindex,
            flags: RouteFlags::UP | RouteFlags::GATEWAY,
        };

        match ctx.pv.routes.add(&req) {
            Ok(()) => {
                nd6log!(ctx, "default router {} installed", dr.addr);
                dr.installed = true;
            }

            Err(e) => ctx.error(&format!(
                "failed to install default route via {} (if {}, flags {}): \
                 {e}",
                dr.addr, dr.ifindex, req.flags
            )),
        }
    }

    /// Retract the default route through the router at `idx`. The entry
    /// is considered uninstalled whatever the route table says.
    fn defrouter_delreq(&mut self, ctx: &Ctx, idx: usize) {
        let dr = &mut self.routers[idx];
        if let Err(e) =
            ctx.pv.routes.delete(Ipv6Cidr::DEFAULT, Some(dr.addr), dr.ifindex)
        {
            ctx.error(&format!(
                "failed to delete default route via {} (if {}): {e}",
                dr.addr, dr.ifindex
            ));
        }
        dr.installed = false;
    }

    /// Retract whichever router is installed.
    pub(crate) fn defrouter_reset(&mut self, ctx: &Ctx) {
        for idx in 0..self.routers.len() {
            if self.routers[idx].installed {
                self.defrouter_delreq(ctx, idx);
            }
        }
    }

    /// Neighbor Unreachability Detection gave up on `addr`.
    fn router_unreachable(
        &mut self,
        ctx: &Ctx,
        addr: Ipv6Addr,
        ifindex: IfIndex,
    ) {
        if ctx.cfg.forwarding {
            return;
        }

        ctx.pv.routes.flush_gateway(addr, ifindex);
        if self.defrouter_pos(&RouterKey { addr, ifindex }).is_some() {
            self.pfxlist_onlink_check(ctx);
            self.defrouter_select(ctx);
        }
    }
}

impl Nd {
    /// The neighbor cache gave up on `addr`, a router on `ifindex`: its
    /// routes are flushed and, if it is a default router, router
    /// selection and the on-link check are rerun against the new
    /// reachability.
    pub fn router_unreachable(&self, addr: Ipv6Addr, ifindex: IfIndex) {
        let (mut st, ctx) = self.lock();
        st.router_unreachable(&ctx, addr, ifindex);
    }
}
