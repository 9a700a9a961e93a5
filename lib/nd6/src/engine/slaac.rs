// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Stateless address autoconfiguration.
//!
//! Advertisement processing only decides that a prefix needs
//! addresses; the addresses themselves are created here, from task
//! context, because the address manager may block. Each task runs in
//! three steps:
//!
//! 1. With the lock held, rescan the interface and work out which
//!    addresses to create.
//! 2. With the lock dropped, ask the address manager to create them.
//! 3. With the lock held again, record what was created and release
//!    the reference the task held on the prefix.

use super::Ctx;
use super::Nd;
use super::NdState;
use super::ifnet::AddrFlags;
use super::prefix::PrefixId;
use crate::api::Ipv6Addr;
use crate::api::Ipv6PrefixLen;
use crate::provider::AddrError;
use crate::provider::AddrReq;
use alloc::vec::Vec;

/// Generate a random interface identifier, in the low 64 bits of the
/// returned address, with the universal/local bit set to local.
fn rand_ifid(ctx: &Ctx) -> Ipv6Addr {
    let mut bytes = [0u8; 16];
    ctx.pv.random.fill_bytes(&mut bytes[8..]);
    bytes[8] &= !0x02;
    Ipv6Addr::from(bytes)
}

impl NdState {
    fn next_task(&mut self) -> Option<PrefixId> {
        let id = self.tasks.pop_front()?;
        if let Some(pr) = self.prefix_mut(id) {
            pr.task_pending = false;
        }
        Some(id)
    }

    /// Build the address request for one autoconfigured address of a
    /// prefix. Returns `None` when the interface has no link-local
    /// address to borrow an identifier from, or when the prefix length
    /// doesn't leave room for it.
    fn in6_ifadd(
        &self,
        ctx: &Ctx,
        id: PrefixId,
        privacy: bool,
    ) -> Option<AddrReq> {
        let pr = self.prefix(id)?;
        let ifp = self.ifaces.get(&pr.ifindex)?;
        let Some(ll) = ifp.link_local(AddrFlags::empty()) else {
            nd6log!(ctx, "no link-local address on {}", ifp.name());
            return None;
        };

        let plen = pr.cidr.prefix_len();
        if ll.prefix_len != plen {
            nd6log!(
                ctx,
                "wrong prefix length for {} (prefix={plen} ifid={})",
                ifp.name(),
                128 - u32::from(ll.prefix_len)
            );
            return None;
        }

        let plen = Ipv6PrefixLen::new(plen).ok()?;
        let mut vltime = pr.ltime.vltime;
        let mut pltime = pr.ltime.pltime;
        let mut flags = AddrFlags::AUTOCONF;

        let addr = if privacy {
            flags |= AddrFlags::PRIVACY;
            let desync = match ctx.cfg.max_desync_factor {
                0 => 0,
                max => ctx.pv.random.next_u32() % max,
            };
            vltime = vltime.min(ctx.cfg.temp_valid_lifetime);
            pltime = pltime
                .min(ctx.cfg.temp_preferred_lifetime.saturating_sub(desync));
            pr.cidr.ip().with_iid(&rand_ifid(ctx), plen)
        } else {
            pr.cidr.ip().with_iid(&ll.addr, plen)
        };

        Some(AddrReq {
            ifindex: pr.ifindex,
            addr,
            prefix_len: plen.val(),
            vltime,
            pltime,
            flags,
        })
    }

    /// Decide which addresses a prefix still needs. The interface may
    /// have changed since the task was queued, so it is rescanned.
    fn plan_addrs(&self, ctx: &Ctx, id: PrefixId) -> Vec<AddrReq> {
        let Some(pr) = self.prefix(id) else {
            return Vec::new();
        };

        // Removed since, or never valid (A without L).
        if pr.ltime.vltime == 0 {
            nd6log!(ctx, "prefix {} is not valid, no address added", pr.cidr);
            return Vec::new();
        }

        let Some(ifp) = self.ifaces.get(&pr.ifindex) else {
            return Vec::new();
        };

        let mut autoconf = true;
        let mut privacy = ifp.cfg.privacy;
        for ia6 in &ifp.addrs {
            if ia6.flags.intersects(AddrFlags::ANYCAST | AddrFlags::DEPRECATED)
                || !ia6.flags.contains(AddrFlags::AUTOCONF)
                || !ia6.in_prefix(&pr.cidr)
            {
                continue;
            }

            if ia6.flags.contains(AddrFlags::PRIVACY) {
                privacy = false;
            } else {
                autoconf = false;
            }
        }

        let mut reqs = Vec::new();
        if autoconf {
            reqs.extend(self.in6_ifadd(ctx, id, false));
        }
        if privacy {
            reqs.extend(self.in6_ifadd(ctx, id, true));
        }
        reqs
    }

    /// Record the addresses that were created and drop the reference
    /// the task held.
    fn finish_task(
        &mut self,
        ctx: &Ctx,
        id: PrefixId,
        added: &[AddrReq],
        failed: &[(AddrReq, AddrError)],
    ) {
        for (req, e) in failed {
            nd6log!(
                ctx,
                "failed to make ifaddr {} on {}: {e}",
                req.addr,
                self.ifname(req.ifindex)
            );
            self.stats.addr_add_fail += 1;
        }

        let mut linked = false;
        for req in added {
            if !self.ifaces.contains_key(&req.ifindex) {
                // The interface went away while the lock was dropped.
                ctx.pv.addrs.purge_addr(req.ifindex, req.addr);
                continue;
            }
            self.record_addr(ctx, req, Some(id));
            linked = true;
        }

        if linked {
            self.pfxlist_onlink_check(ctx);
        }

        let Some(pr) = self.prefix_mut(id) else {
            ctx.error(&format!("autoconf task for freed prefix {id}"));
            return;
        };
        match pr.refcnt.checked_sub(1) {
            Some(n) => pr.refcnt = n,
            None => {
                let cidr = pr.cidr;
                ctx.warn(&format!(
                    "prefix {cidr} reference count went negative"
                ));
            }
        }

        if pr.refcnt == 0 && pr.removing {
            self.prelist_remove(ctx, id);
        }
    }
}

impl Nd {
    /// Run every queued autoconfiguration task. This calls the address
    /// manager and so must be called from a context that may block.
    /// Returns the number of tasks run.
    pub fn run_tasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let (id, reqs) = {
                let (mut st, ctx) = self.lock();
                let Some(id) = st.next_task() else {
                    break;
                };
                let reqs = st.plan_addrs(&ctx, id);
                (id, reqs)
            };

            let mut added = Vec::new();
            let mut failed = Vec::new();
            for req in reqs {
                match self.pv.addrs.update_addr(&req) {
                    Ok(()) => added.push(req),
                    Err(e) => failed.push((req, e)),
                }
            }

            let (mut st, ctx) = self.lock();
            st.finish_task(&ctx, id, &added, &failed);
            ran += 1;
        }
        ran
    }

    /// Are there autoconfiguration tasks waiting to run?
    pub fn tasks_pending(&self) -> bool {
        !self.state.lock().tasks.is_empty()
    }
}
