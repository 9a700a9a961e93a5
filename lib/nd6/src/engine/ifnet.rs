// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Interfaces and their IPv6 addresses.

use super::Ctx;
use super::Nd;
use super::NdState;
use super::lifetime::Lifetimes;
use super::lifetime::compute_rtime;
use super::prefix::PrefixCandidate;
use super::prefix::PrefixId;
use crate::api::IPV6_DEFHLIM;
use crate::api::IPV6_MMTU;
use crate::api::IfConfig;
use crate::api::IfIndex;
use crate::api::Ipv6Addr;
use crate::api::Ipv6Cidr;
use crate::api::ND6_INFINITE_LIFETIME;
use crate::api::NdError;
use crate::api::NdIfFlags;
use crate::api::NdIfInfo;
use crate::api::PiFlags;
use crate::api::REACHABLE_TIME;
use crate::api::RETRANS_TIMER;
use crate::ddi::time::Moment;
use crate::provider::AddrReq;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

bitflags::bitflags! {
    /// Flags of an interface address.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct AddrFlags: u32 {
        const ANYCAST = 0x01;
        /// Duplicate address detection has not finished.
        const TENTATIVE = 0x02;
        const DUPLICATED = 0x04;
        /// The prefix of the address has no reachable advertiser.
        const DETACHED = 0x08;
        /// The preferred lifetime ran out.
        const DEPRECATED = 0x10;
        /// Created by stateless address autoconfiguration.
        const AUTOCONF = 0x40;
        /// A temporary address.
        const PRIVACY = 0x80;
        /// Not yet usable as a source address.
        const NOTREADY = Self::TENTATIVE.bits() | Self::DUPLICATED.bits();
    }
}

/// An IPv6 address configured on an interface.
#[derive(Clone, Debug)]
pub struct In6Ifaddr {
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
    pub flags: AddrFlags,
    pub ltime: Lifetimes,
    /// When `ltime` was last set.
    pub updated: Moment,
    /// The prefix this address was configured from. The prefix holds a
    /// reference for as long as this is set.
    pub prefix: Option<PrefixId>,
}

impl In6Ifaddr {
    /// Do the first `len` bits of this address match `cidr`, with the
    /// address configured at exactly that length?
    pub fn in_prefix(&self, cidr: &Ipv6Cidr) -> bool {
        self.prefix_len == cidr.prefix_len() && cidr.is_member(self.addr)
    }
}

/// A read-only view of an interface address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddrInfo {
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
    pub flags: AddrFlags,
    pub vltime: u32,
    pub pltime: u32,
    /// The prefix the address belongs to, if linked to one.
    pub prefix: Option<Ipv6Cidr>,
}

pub(crate) fn default_ifinfo(ctx: &Ctx, cfg: &IfConfig) -> NdIfInfo {
    NdIfInfo {
        linkmtu: 0,
        maxmtu: if cfg.maxmtu != 0 { cfg.maxmtu } else { cfg.mtu },
        basereachable: REACHABLE_TIME,
        reachable: compute_rtime(ctx.pv.random.as_ref(), REACHABLE_TIME),
        retrans: RETRANS_TIMER,
        flags: NdIfFlags::PERFORMNUD | NdIfFlags::ACCEPT_RTADV,
        recalctm: i64::from(ctx.cfg.recalc_reachtm_interval),
        chlim: IPV6_DEFHLIM,
    }
}

/// The subsystem's view of one interface.
#[derive(Debug)]
pub struct Interface {
    pub cfg: IfConfig,
    pub ndi: NdIfInfo,
    /// Number of default routers learned on this interface.
    pub ndefrouters: u32,
    /// Number of prefixes tracked on this interface.
    pub nprefixes: u32,
    pub addrs: Vec<In6Ifaddr>,
}

impl Interface {
    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn index(&self) -> IfIndex {
        self.cfg.index
    }

    pub fn is_running(&self) -> bool {
        self.cfg.running
    }

    pub fn autoconf(&self) -> bool {
        self.cfg.autoconf6
    }

    /// The first link-local address without any of `ignore` set.
    pub fn link_local(&self, ignore: AddrFlags) -> Option<&In6Ifaddr> {
        self.addrs
            .iter()
            .find(|a| a.addr.is_link_local() && !a.flags.intersects(ignore))
    }

    pub fn find_addr(&self, addr: Ipv6Addr) -> Option<&In6Ifaddr> {
        self.addrs.iter().find(|a| a.addr == addr)
    }

    fn find_addr_mut(&mut self, addr: Ipv6Addr) -> Option<&mut In6Ifaddr> {
        self.addrs.iter_mut().find(|a| a.addr == addr)
    }
}

/// A manually configured address, as given to [`Nd::add_address()`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AddrConfig {
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
    #[serde(default = "infinite")]
    pub vltime: u32,
    #[serde(default = "infinite")]
    pub pltime: u32,
    #[serde(default)]
    pub flags: AddrFlags,
}

fn infinite() -> u32 {
    ND6_INFINITE_LIFETIME
}

impl AddrConfig {
    pub fn new(addr: Ipv6Addr, prefix_len: u8) -> Self {
        Self {
            addr,
            prefix_len,
            vltime: ND6_INFINITE_LIFETIME,
            pltime: ND6_INFINITE_LIFETIME,
            flags: AddrFlags::empty(),
        }
    }
}

impl NdState {
    pub(crate) fn iface(&self, index: IfIndex) -> Result<&Interface, NdError> {
        self.ifaces.get(&index).ok_or(NdError::IfNotFound(index))
    }

    pub(crate) fn ifname(&self, index: IfIndex) -> String {
        match self.ifaces.get(&index) {
            Some(ifp) => ifp.cfg.name.clone(),
            None => index.to_string(),
        }
    }

    fn ifattach(&mut self, ctx: &Ctx, cfg: IfConfig) -> Result<(), NdError> {
        if self.ifaces.contains_key(&cfg.index) {
            return Err(NdError::IfExists(cfg.index));
        }

        let ndi = default_ifinfo(ctx, &cfg);
        if ndi.maxmtu < IPV6_MMTU {
            ctx.note(&format!(
                "link MTU on {} ({}) is too small for IPv6",
                cfg.name, ndi.maxmtu
            ));
        }

        let join_rs = cfg.running && cfg.autoconf6;
        let index = cfg.index;
        self.ifaces.insert(
            index,
            Interface { cfg, ndi, ndefrouters: 0, nprefixes: 0, addrs: vec![] },
        );

        if join_rs {
            self.rs_join();
        }

        Ok(())
    }

    /// Tear down everything learned on an interface, right before it
    /// goes away.
    fn ifpurge(&mut self, ctx: &Ctx, index: IfIndex) {
        // Installed routers go last, so the default route is replaced
        // only once.
        for installed in [false, true] {
            while let Some(idx) = self.routers.iter().position(|dr| {
                dr.ifindex == index && dr.installed == installed
            }) {
                self.defrtrlist_del(ctx, idx);
            }
        }

        let ids: Vec<PrefixId> = self
            .prefixes
            .iter()
            .filter(|pr| pr.ifindex == index && !pr.removing)
            .map(|pr| pr.id)
            .collect();
        for id in ids {
            self.prelist_remove(ctx, id);
        }

        if self.ifaces.get(&index).is_some_and(|ifp| ifp.autoconf()) {
            self.defrouter_select(ctx);
        }

        let addrs: Vec<Ipv6Addr> = self
            .ifaces
            .get(&index)
            .map(|ifp| ifp.addrs.iter().map(|a| a.addr).collect())
            .unwrap_or_default();
        for addr in addrs {
            self.purge_addr(ctx, index, addr);
        }
    }

    fn ifdetach(&mut self, ctx: &Ctx, index: IfIndex) -> Result<(), NdError> {
        let ifp = self.iface(index)?;
        let autoconf = ifp.is_running() && ifp.autoconf();

        self.ifpurge(ctx, index);
        if autoconf {
            self.rs_leave();
        }
        self.tasks.retain(|id| self.prefixes.iter().any(|pr| pr.id == *id));
        self.ifaces.remove(&index);
        Ok(())
    }

    fn set_link_state(
        &mut self,
        index: IfIndex,
        running: bool,
    ) -> Result<(), NdError> {
        let ifp =
            self.ifaces.get_mut(&index).ok_or(NdError::IfNotFound(index))?;
        let was = ifp.cfg.running;
        ifp.cfg.running = running;
        let autoconf = ifp.autoconf();

        if autoconf && !was && running {
            self.rs_join();
        } else if autoconf && was && !running {
            self.rs_leave();
        }
        Ok(())
    }

    /// Record an address that the address manager has accepted, linking
    /// it to `prefix` when it isn't linked to one already. Returns
    /// whether the address was newly linked.
    pub(crate) fn record_addr(
        &mut self,
        ctx: &Ctx,
        req: &AddrReq,
        prefix: Option<PrefixId>,
    ) -> bool {
        let ltime = Lifetimes::for_address(req.vltime, req.pltime, ctx.now);
        let Some(ifp) = self.ifaces.get_mut(&req.ifindex) else {
            nd6log!(ctx, "address {} added to a detached interface", req.addr);
            return false;
        };

        let ia6 = match ifp.find_addr_mut(req.addr) {
            Some(ia6) => {
                ia6.prefix_len = req.prefix_len;
                ia6.flags = req.flags;
                ia6.ltime = ltime;
                ia6.updated = ctx.now;
                ia6
            }

            None => {
                ifp.addrs.push(In6Ifaddr {
                    addr: req.addr,
                    prefix_len: req.prefix_len,
                    flags: req.flags,
                    ltime,
                    updated: ctx.now,
                    prefix: None,
                });
                // Just pushed.
                let last = ifp.addrs.len() - 1;
                &mut ifp.addrs[last]
            }
        };

        let Some(id) = prefix else {
            return false;
        };
        if ia6.prefix.is_some() {
            return false;
        }
        ia6.prefix = Some(id);
        match self.prefix_mut(id) {
            Some(pr) => {
                pr.refcnt += 1;
                true
            }

            None => {
                ctx.error(&format!(
                    "address {} linked to a freed prefix",
                    req.addr
                ));
                false
            }
        }
    }

    /// Finish adding a manually configured address: make sure a prefix
    /// covers it and relate the two.
    fn add_address_prefix(
        &mut self,
        ctx: &Ctx,
        req: &AddrReq,
    ) -> Result<(), NdError> {
        if req.prefix_len == 128 {
            self.record_addr(ctx, req, None);
            return Ok(());
        }

        let cidr = Ipv6Cidr::new_checked(req.addr, req.prefix_len)
            .map_err(NdError::BadState)?;
        let id = match self.prefix_lookup(req.ifindex, &cidr) {
            Some(idx) => self.prefixes[idx].id,
            None => {
                let mut raf = PiFlags::ONLINK;
                if req.flags.contains(AddrFlags::AUTOCONF) {
                    raf |= PiFlags::AUTO;
                }

                let ltime =
                    Lifetimes::for_prefix(req.vltime, req.pltime, ctx.now)
                        .map_err(|e| NdError::BadState(e.to_string()))?;
                let cand = PrefixCandidate {
                    ifindex: req.ifindex,
                    cidr,
                    raf,
                    ltime,
                    lastupdate: ctx.now,
                };
                // Record the address first so the on-link route has an
                // interface address to hang off.
                self.record_addr(ctx, req, None);
                self.prelist_add(ctx, &cand, None).map_err(|_| {
                    NdError::MaxCapacity(ctx.cfg.max_if_prefixes as u64)
                })?
            }
        };

        self.record_addr(ctx, req, Some(id));

        // The new address may make other addresses detached.
        self.pfxlist_onlink_check(ctx);
        Ok(())
    }

    /// Forget an address: release its prefix and tell the address
    /// manager.
    pub(crate) fn purge_addr(
        &mut self,
        ctx: &Ctx,
        index: IfIndex,
        addr: Ipv6Addr,
    ) -> bool {
        let Some(ifp) = self.ifaces.get_mut(&index) else {
            return false;
        };
        let Some(pos) = ifp.addrs.iter().position(|a| a.addr == addr) else {
            return false;
        };

        let mut ia6 = ifp.addrs.remove(pos);
        ctx.pv.addrs.purge_addr(index, addr);

        match ia6.prefix.take() {
            None => {
                if !addr.is_link_local() && ia6.prefix_len != 128 {
                    ctx.note(&format!(
                        "interface address {addr} has no prefix"
                    ));
                }
            }

            Some(id) => {
                if let Some(pr) = self.prefix_mut(id) {
                    match pr.refcnt.checked_sub(1) {
                        Some(n) => pr.refcnt = n,
                        None => {
                            let cidr = pr.cidr;
                            ctx.warn(&format!(
                                "prefix {cidr} reference count went negative"
                            ));
                        }
                    }

                    if pr.refcnt == 0 {
                        self.prelist_remove(ctx, id);
                    }
                }
            }
        }

        true
    }

    pub(crate) fn addr_infos(
        &self,
        index: IfIndex,
    ) -> Result<Vec<AddrInfo>, NdError> {
        let ifp = self.iface(index)?;
        Ok(ifp
            .addrs
            .iter()
            .map(|a| AddrInfo {
                addr: a.addr,
                prefix_len: a.prefix_len,
                flags: a.flags,
                vltime: a.ltime.vltime,
                pltime: a.ltime.pltime,
                prefix: a
                    .prefix
                    .and_then(|id| self.prefix(id))
                    .map(|pr| pr.cidr),
            })
            .collect())
    }
}

impl Nd {
    /// Start Neighbor Discovery on an interface. When the interface has
    /// a link-layer address, its EUI-64 link-local address is
    /// configured as well.
    pub fn ifattach(&self, cfg: IfConfig) -> Result<(), NdError> {
        let lladdr = cfg.lladdr;
        let index = cfg.index;
        {
            let (mut st, ctx) = self.lock();
            st.ifattach(&ctx, cfg)?;
        }

        if let Some(mac) = lladdr {
            let ll = AddrConfig::new(Ipv6Addr::from_eui64(&mac), 64);
            self.add_address(index, &ll)?;
        }
        Ok(())
    }

    /// Stop Neighbor Discovery on an interface, purging every router,
    /// prefix, and address learned on it.
    pub fn ifdetach(&self, index: IfIndex) -> Result<(), NdError> {
        let (mut st, ctx) = self.lock();
        st.ifdetach(&ctx, index)
    }

    /// Note a change in the running state of an interface. A link
    /// coming up restarts Router Solicitation at the quick interval.
    pub fn set_link_state(
        &self,
        index: IfIndex,
        running: bool,
    ) -> Result<(), NdError> {
        let (mut st, _ctx) = self.lock();
        st.set_link_state(index, running)
    }

    /// Configure an address by hand, creating an on-link prefix for it
    /// when none exists yet.
    pub fn add_address(
        &self,
        index: IfIndex,
        acfg: &AddrConfig,
    ) -> Result<(), NdError> {
        if acfg.prefix_len > 128 {
            return Err(NdError::BadState(format!(
                "bad prefix length {}",
                acfg.prefix_len
            )));
        }
        if acfg.pltime > acfg.vltime {
            return Err(NdError::BadState(
                "preferred lifetime exceeds valid lifetime".into(),
            ));
        }

        let req = AddrReq {
            ifindex: index,
            addr: acfg.addr,
            prefix_len: acfg.prefix_len,
            vltime: acfg.vltime,
            pltime: acfg.pltime,
            flags: acfg.flags,
        };

        // Check before calling out, but the address manager must never
        // be called with the lock held.
        self.state.lock().iface(index)?;
        self.pv.addrs.update_addr(&req).map_err(|e| NdError::System {
            errno: libc::EIO,
            msg: e.to_string(),
        })?;

        let (mut st, ctx) = self.lock();
        st.add_address_prefix(&ctx, &req)
    }

    /// Remove an address.
    pub fn purge_address(
        &self,
        index: IfIndex,
        addr: Ipv6Addr,
    ) -> Result<(), NdError> {
        let (mut st, ctx) = self.lock();
        st.iface(index)?;
        if !st.purge_addr(&ctx, index, addr) {
            return Err(NdError::AddrNotFound(addr));
        }
        Ok(())
    }

    /// The addresses of an interface.
    pub fn addrs(&self, index: IfIndex) -> Result<Vec<AddrInfo>, NdError> {
        self.state.lock().addr_infos(index)
    }
}
