// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! On-link routes and the attachment of prefixes and addresses.

use super::Ctx;
use super::Nd;
use super::NdState;
use super::ifnet::AddrFlags;
use super::prefix::NdPrefix;
use super::prefix::PrefixId;
use crate::api::IfIndex;
use crate::api::Ipv6Cidr;
use crate::provider::RouteError;
use crate::provider::RouteFlags;
use crate::provider::RouteReq;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum OnlinkError {
    #[error("prefix is already on-link")]
    AlreadyInstalled,
    #[error("prefix is already off-link")]
    AlreadyAbsent,
    #[error("no such prefix")]
    NotFound,
    #[error("route table: {0}")]
    Route(#[from] RouteError),
}

impl NdState {
    /// Does any router advertising `pr` look reachable?
    fn pfx_reachable(&self, ctx: &Ctx, pr: &NdPrefix) -> bool {
        pr.advrtrs.iter().any(|key| self.router_reachable(ctx, key))
    }

    /// Recompute which prefixes and addresses are detached, and install
    /// or retract on-link routes to match.
    ///
    /// A prefix is detached when none of its advertisers is reachable.
    /// When no advertiser of any prefix is reachable and there are no
    /// routers at all, there is no telling a move to another network
    /// from every router being down, so nothing is detached.
    pub(crate) fn pfxlist_onlink_check(&mut self, ctx: &Ctx) {
        let reachable: BTreeSet<PrefixId> = self
            .prefixes
            .iter()
            .filter(|pr| self.pfx_reachable(ctx, pr))
            .map(|pr| pr.id)
            .collect();

        let any_reachable = self
            .prefixes
            .iter()
            .any(|pr| pr.onlink_flag() && reachable.contains(&pr.id));
        let judge = any_reachable || !self.routers.is_empty();

        for pr in self.prefixes.iter_mut() {
            if pr.is_link_local() || !pr.onlink_flag() {
                continue;
            }

            let detached = judge && !reachable.contains(&pr.id);
            if pr.state.is_detached() != detached {
                pr.state = pr.state.with_detached(detached);
            }
        }

        let ids: Vec<PrefixId> = self
            .prefixes
            .iter()
            .filter(|pr| !pr.is_link_local() && pr.onlink_flag())
            .map(|pr| pr.id)
            .collect();

        for id in ids {
            let Some(pr) = self.prefix(id) else {
                continue;
            };
            let (cidr, ifindex) = (pr.cidr, pr.ifindex);

            if pr.state.is_detached() && pr.state.is_onlink() {
                if let Err(e) = self.prefix_offlink(ctx, id) {
                    nd6log!(
                        ctx,
                        "failed to make {cidr} on {} offlink: {e}",
                        self.ifname(ifindex)
                    );
                }
            } else if !pr.state.is_detached()
                && !pr.state.is_onlink()
                && !pr.removing
            {
                if let Err(e) = self.prefix_onlink(ctx, id) {
                    nd6log!(
                        ctx,
                        "failed to make {cidr} on {} onlink: {e}",
                        self.ifname(ifindex)
                    );
                }
            }
        }

        // Addresses follow the reachability of their prefix, with the
        // same fallback as the prefixes themselves.
        let owned = |flags: AddrFlags, prefix: Option<PrefixId>| {
            flags.contains(AddrFlags::AUTOCONF) && prefix.is_some()
        };
        let any_addr_reachable = self.ifaces.values().any(|ifp| {
            ifp.addrs.iter().any(|a| {
                owned(a.flags, a.prefix)
                    && a.prefix.is_some_and(|id| reachable.contains(&id))
            })
        });

        for ifp in self.ifaces.values_mut() {
            for a in ifp.addrs.iter_mut() {
                if !owned(a.flags, a.prefix) {
                    continue;
                }

                let detached = any_addr_reachable
                    && !a.prefix.is_some_and(|id| reachable.contains(&id));
                a.flags.set(AddrFlags::DETACHED, detached);
            }
        }
    }

    /// Install the interface route for a prefix.
    ///
    /// Only one route exists per distinct prefix. When the same prefix
    /// is already on-link through another interface this succeeds
    /// without touching the route table.
    pub(crate) fn prefix_onlink(
        &mut self,
        ctx: &Ctx,
        id: PrefixId,
    ) -> Result<(), OnlinkError> {
        let idx = self.prefix_idx(id).ok_or(OnlinkError::NotFound)?;
        let pr = &self.prefixes[idx];
        if pr.state.is_onlink() {
            return Err(OnlinkError::AlreadyInstalled);
        }

        let (cidr, ifindex) = (pr.cidr, pr.ifindex);
        if self
            .prefixes
            .iter()
            .any(|opr| {
                opr.id != id && opr.cidr == cidr && opr.state.is_onlink()
            })
        {
            return Ok(());
        }

        let Some(ifp) = self.ifaces.get(&ifindex) else {
            return Err(OnlinkError::NotFound);
        };

        // The route hangs off an interface address, preferably the
        // link-local one.
        let src = ifp
            .link_local(AddrFlags::NOTREADY | AddrFlags::ANYCAST)
            .or_else(|| ifp.addrs.first())
            .map(|ia6| ia6.addr);
        let Some(src) = src else {
            ctx.note(&format!(
                "no interface address on {} to add a route for {cidr}",
                ifp.name()
            ));
            return Ok(());
        };

        let mut flags = RouteFlags::UP;
        if ifp.cfg.need_cache {
            flags |= RouteFlags::CLONING;
        }
        let req = RouteReq { dst: cidr, gateway: src, ifindex, flags };

        match ctx.pv.routes.add(&req) {
            Ok(()) => {
                let pr = &mut self.prefixes[idx];
                pr.state = pr.state.with_onlink(true);
                Ok(())
            }

            Err(e) => {
                ctx.error(&format!(
                    "failed to add route for {cidr} on {} (gw {src}, flags \
                     {flags}): {e}",
                    ifp.name()
                ));
                Err(OnlinkError::Route(e))
            }
        }
    }

    /// Retract the interface route for a prefix. When another interface
    /// has the same prefix attached, the route is handed over to it.
    pub(crate) fn prefix_offlink(
        &mut self,
        ctx: &Ctx,
        id: PrefixId,
    ) -> Result<(), OnlinkError> {
        let idx = self.prefix_idx(id).ok_or(OnlinkError::NotFound)?;
        let pr = &self.prefixes[idx];
        if !pr.state.is_onlink() {
            return Err(OnlinkError::AlreadyAbsent);
        }

        let (cidr, ifindex) = (pr.cidr, pr.ifindex);
        if let Err(e) = ctx.pv.routes.delete(cidr, None, ifindex) {
            ctx.error(&format!(
                "failed to delete route for {cidr} on {}: {e}",
                self.ifname(ifindex)
            ));
            return Err(OnlinkError::Route(e));
        }

        let pr = &mut self.prefixes[idx];
        pr.state = pr.state.with_onlink(false);

        let heirs: Vec<PrefixId> = self
            .prefixes
            .iter()
            .filter(|opr| {
                opr.id != id
                    && opr.cidr == cidr
                    && !opr.state.is_onlink()
                    && !opr.state.is_detached()
            })
            .map(|opr| opr.id)
            .collect();

        for heir in heirs {
            if let Err(e) = self.prefix_onlink(ctx, heir) {
                nd6log!(ctx, "failed to hand {cidr} over to {heir}: {e}");
            }
        }

        Ok(())
    }

    fn prefix_find(
        &self,
        ifindex: IfIndex,
        cidr: &Ipv6Cidr,
    ) -> Result<PrefixId, OnlinkError> {
        self.prefix_lookup(ifindex, cidr)
            .map(|idx| self.prefixes[idx].id)
            .ok_or(OnlinkError::NotFound)
    }
}

impl Nd {
    /// Install the on-link route of the prefix `cidr` on `ifindex`.
    pub fn prefix_onlink(
        &self,
        ifindex: IfIndex,
        cidr: &Ipv6Cidr,
    ) -> Result<(), OnlinkError> {
        let (mut st, ctx) = self.lock();
        let id = st.prefix_find(ifindex, cidr)?;
        st.prefix_onlink(&ctx, id)
    }

    /// Retract the on-link route of the prefix `cidr` on `ifindex`.
    pub fn prefix_offlink(
        &self,
        ifindex: IfIndex,
        cidr: &Ipv6Cidr,
    ) -> Result<(), OnlinkError> {
        let (mut st, ctx) = self.lock();
        let id = st.prefix_find(ifindex, cidr)?;
        st.prefix_offlink(&ctx, id)
    }
}
