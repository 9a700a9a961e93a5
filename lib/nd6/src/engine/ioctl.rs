// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The administrative command boundary.
//!
//! Commands carry a postcard-encoded request and produce a
//! postcard-encoded response, the way an ioctl(2) handler would copy
//! them in and out of user memory.

use super::Ctx;
use super::Nd;
use super::NdState;
use super::defrouter::rtpref;
use super::ifnet::AddrFlags;
use super::prefix::PrefixId;
use crate::api::CmdOk;
use crate::api::DefRouterDump;
use crate::api::DumpPrefixesReq;
use crate::api::DumpPrefixesResp;
use crate::api::DumpRoutersReq;
use crate::api::DumpRoutersResp;
use crate::api::DumpStatsResp;
use crate::api::GetIfInfoReq;
use crate::api::GetIfInfoResp;
use crate::api::IfIndex;
use crate::api::Ipv6Addr;
use crate::api::ND6_INFINITE_LIFETIME;
use crate::api::NdCmd;
use crate::api::NdError;
use crate::api::NoResp;
use crate::api::PrefixDump;
use crate::api::SetIfFlagsReq;
use crate::ddi::kstat::KStatProvider;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use libc::c_int;
use serde::de::DeserializeOwned;

/// A command along with its still-encoded request body.
pub struct CmdEnvelope<'a> {
    cmd: NdCmd,
    req: &'a [u8],
}

impl<'a> CmdEnvelope<'a> {
    pub fn new(cmd: NdCmd, req: &'a [u8]) -> Self {
        Self { cmd, req }
    }

    pub fn cmd(&self) -> NdCmd {
        self.cmd
    }

    /// Decode the request body.
    pub fn copy_in_req<T: DeserializeOwned>(&self) -> Result<T, NdError> {
        if self.req.is_empty() {
            return Err(NdError::NoRequestBody);
        }

        postcard::from_bytes(self.req)
            .map_err(|e| NdError::DeserCmdReq(e.to_string()))
    }
}

// Encode a handler's successful response.
fn hdlr_resp<T>(resp: Result<T, NdError>) -> Result<Vec<u8>, NdError>
where
    T: CmdOk,
{
    let resp = resp?;
    postcard::to_allocvec(&resp).map_err(|e| NdError::SerCmdResp(e.to_string()))
}

impl NdState {
    fn sync_routers(&mut self, ctx: &Ctx) {
        self.defrouter_reset(ctx);
        self.defrouter_select(ctx);
    }

    fn flush_prefixes(&mut self, ctx: &Ctx) {
        let ids: Vec<PrefixId> = self
            .prefixes
            .iter()
            .filter(|pr| !pr.is_link_local())
            .map(|pr| pr.id)
            .collect();

        // Addresses first, so the prefixes have fewer references to
        // linger on.
        let owned: Vec<(IfIndex, Ipv6Addr)> = self
            .ifaces
            .values()
            .flat_map(|ifp| {
                ifp.addrs
                    .iter()
                    .filter(|a| {
                        a.flags.contains(AddrFlags::AUTOCONF)
                            && a.prefix.is_some_and(|id| ids.contains(&id))
                    })
                    .map(|a| (ifp.index(), a.addr))
            })
            .collect();
        for (index, addr) in owned {
            self.purge_addr(ctx, index, addr);
        }

        for id in ids {
            if self.prefix(id).is_some_and(|pr| !pr.removing) {
                self.prelist_remove(ctx, id);
            }
        }
    }

    fn flush_routers(&mut self, ctx: &Ctx) {
        self.defrouter_reset(ctx);
        while !self.routers.is_empty() {
            self.defrtrlist_del(ctx, 0);
        }
        self.defrouter_select(ctx);
    }

    fn dump_routers(&self, ctx: &Ctx, req: &DumpRoutersReq) -> DumpRoutersResp {
        let routers = self
            .routers
            .iter()
            .filter(|dr| req.ifindex.is_none_or(|idx| idx == dr.ifindex))
            .map(|dr| DefRouterDump {
                addr: dr.addr,
                ifindex: dr.ifindex,
                flags: dr.flags,
                pref: rtpref(ctx.cfg, dr.flags),
                lifetime: dr.lifetime,
                expire: dr.expire.secs(),
                installed: dr.installed,
            })
            .collect();
        DumpRoutersResp { routers }
    }

    fn dump_prefixes(&self, req: &DumpPrefixesReq) -> DumpPrefixesResp {
        let prefixes = self
            .prefixes
            .iter()
            .filter(|pr| req.ifindex.is_none_or(|idx| idx == pr.ifindex))
            .map(|pr| {
                let expire = if pr.ltime.vltime == ND6_INFINITE_LIFETIME {
                    0
                } else {
                    pr.lastupdate
                        .secs()
                        .saturating_add(u64::from(pr.ltime.vltime))
                };

                PrefixDump {
                    prefix: pr.cidr,
                    ifindex: pr.ifindex,
                    onlink: pr.onlink_flag(),
                    autonomous: pr.auto_flag(),
                    valid_lifetime: pr.ltime.vltime,
                    preferred_lifetime: pr.ltime.pltime,
                    expire,
                    refcnt: pr.refcnt,
                    state: pr.state,
                    advrtrs: pr.advrtrs.iter().map(|k| k.addr).collect(),
                }
            })
            .collect();
        DumpPrefixesResp { prefixes }
    }

    fn get_ifinfo(&self, req: &GetIfInfoReq) -> Result<GetIfInfoResp, NdError> {
        let ifp = self.iface(req.ifindex)?;
        Ok(GetIfInfoResp {
            ifindex: req.ifindex,
            name: ifp.name().to_string(),
            info: ifp.ndi.clone(),
        })
    }

    fn set_ifflags(&mut self, req: &SetIfFlagsReq) -> Result<(), NdError> {
        let ifp = self
            .ifaces
            .get_mut(&req.ifindex)
            .ok_or(NdError::IfNotFound(req.ifindex))?;
        ifp.ndi.flags = req.flags;
        Ok(())
    }

    fn dump_stats(&self) -> DumpStatsResp {
        let stats = self
            .stats
            .snapshot()
            .fields()
            .iter()
            .map(|(name, val)| (String::from(*name), *val))
            .collect();
        DumpStatsResp { stats }
    }
}

impl Nd {
    /// Retract the installed default router and choose again.
    pub fn sync_routers(&self) {
        let (mut st, ctx) = self.lock();
        st.sync_routers(&ctx);
    }

    /// Remove every prefix except the link-local ones, along with the
    /// addresses autoconfigured from them.
    pub fn flush_prefixes(&self) {
        let (mut st, ctx) = self.lock();
        st.flush_prefixes(&ctx);
    }

    /// Remove every default router.
    pub fn flush_routers(&self) {
        let (mut st, ctx) = self.lock();
        st.flush_routers(&ctx);
    }

    pub fn dump_routers(&self, req: &DumpRoutersReq) -> DumpRoutersResp {
        let (st, ctx) = self.lock();
        st.dump_routers(&ctx, req)
    }

    pub fn dump_prefixes(&self, req: &DumpPrefixesReq) -> DumpPrefixesResp {
        self.state.lock().dump_prefixes(req)
    }

    pub fn get_ifinfo(
        &self,
        req: &GetIfInfoReq,
    ) -> Result<GetIfInfoResp, NdError> {
        self.state.lock().get_ifinfo(req)
    }

    pub fn set_ifflags(&self, req: &SetIfFlagsReq) -> Result<(), NdError> {
        self.state.lock().set_ifflags(req)
    }

    pub fn dump_stats(&self) -> DumpStatsResp {
        self.state.lock().dump_stats()
    }

    /// Run one administrative command. The request and the successful
    /// response are postcard-encoded; commands without a request body
    /// ignore `req`.
    pub fn handle_cmd(
        &self,
        cmd: NdCmd,
        req: &[u8],
    ) -> Result<Vec<u8>, NdError> {
        let env = CmdEnvelope::new(cmd, req);

        match env.cmd() {
            NdCmd::DumpRouters => {
                let resp = env
                    .copy_in_req::<DumpRoutersReq>()
                    .map(|req| self.dump_routers(&req));
                hdlr_resp(resp)
            }

            NdCmd::DumpPrefixes => {
                let resp = env
                    .copy_in_req::<DumpPrefixesReq>()
                    .map(|req| self.dump_prefixes(&req));
                hdlr_resp(resp)
            }

            NdCmd::GetIfInfo => {
                let resp = env
                    .copy_in_req::<GetIfInfoReq>()
                    .and_then(|req| self.get_ifinfo(&req));
                hdlr_resp(resp)
            }

            NdCmd::SetIfFlags => {
                let resp = env
                    .copy_in_req::<SetIfFlagsReq>()
                    .and_then(|req| self.set_ifflags(&req))
                    .map(|_| NoResp::default());
                hdlr_resp(resp)
            }

            NdCmd::SyncRouters => {
                self.sync_routers();
                hdlr_resp(Ok(NoResp::default()))
            }

            NdCmd::FlushPrefixes => {
                self.flush_prefixes();
                hdlr_resp(Ok(NoResp::default()))
            }

            NdCmd::FlushRouters => {
                self.flush_routers();
                hdlr_resp(Ok(NoResp::default()))
            }

            NdCmd::DumpStats => hdlr_resp(Ok(self.dump_stats())),
        }
    }

    /// Like [`Nd::handle_cmd()`], for a raw command number.
    pub fn handle_raw_cmd(
        &self,
        cmd: c_int,
        req: &[u8],
    ) -> Result<Vec<u8>, NdError> {
        let cmd = NdCmd::try_from(cmd).map_err(|_| NdError::BadCmd(cmd))?;
        self.handle_cmd(cmd, req)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::IfConfig;
    use crate::api::Ipv6Cidr;
    use crate::api::MacAddr;
    use crate::api::NdConfig;
    use crate::api::NdIfFlags;
    use crate::api::PiFlags;
    use crate::api::PrefixInfoOpt;
    use crate::api::RouterAdvert;
    use crate::engine::ifnet::AddrConfig;
    use crate::sim::SimStack;

    const MAC: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 1]);

    fn setup() -> (SimStack, Nd) {
        let sim = SimStack::new();
        let nd = sim.nd(NdConfig::default()).unwrap();
        nd.ifattach(IfConfig::new("em0", 1, Some(MAC))).unwrap();
        (sim, nd)
    }

    fn advertise(nd: &Nd, rtr: &str, prefix: &str) {
        let mut ra = RouterAdvert::new(rtr.parse().unwrap(), 1800);
        let cidr: Ipv6Cidr = prefix.parse().unwrap();
        let la = PiFlags::ONLINK | PiFlags::AUTO;
        ra.opts.prefixes = vec![PrefixInfoOpt::new(cidr, la, 86400, 14400)];
        nd.ra_input(1, &ra);
    }

    #[test]
    fn dump_over_the_boundary() {
        let (_sim, nd) = setup();
        advertise(&nd, "fe80::1", "2001:db8::/64");
        nd.run_tasks();

        let req = postcard::to_allocvec(&DumpRoutersReq::default()).unwrap();
        let resp = nd.handle_cmd(NdCmd::DumpRouters, &req).unwrap();
        let resp: DumpRoutersResp = postcard::from_bytes(&resp).unwrap();
        assert_eq!(resp.routers.len(), 1);
        let dr = &resp.routers[0];
        assert_eq!(dr.addr, "fe80::1".parse::<Ipv6Addr>().unwrap());
        assert!(dr.installed);
        assert_eq!(dr.expire, crate::sim::SIM_START.secs() + 1800);

        let req = DumpPrefixesReq { ifindex: Some(1) };
        let req = postcard::to_allocvec(&req).unwrap();
        let resp = nd.handle_cmd(NdCmd::DumpPrefixes, &req).unwrap();
        let resp: DumpPrefixesResp = postcard::from_bytes(&resp).unwrap();
        let pfx = resp
            .prefixes
            .iter()
            .find(|p| p.prefix == "2001:db8::/64".parse().unwrap())
            .unwrap();
        assert!(pfx.onlink && pfx.autonomous);
        assert_eq!(pfx.expire, crate::sim::SIM_START.secs() + 86400);
        assert_eq!(pfx.refcnt, 1);
        assert_eq!(pfx.advrtrs, vec!["fe80::1".parse::<Ipv6Addr>().unwrap()]);

        // The link-local prefix never expires.
        let ll = resp
            .prefixes
            .iter()
            .find(|p| p.prefix == Ipv6Cidr::LINK_LOCAL)
            .unwrap();
        assert_eq!(ll.expire, 0);
    }

    #[test]
    fn bad_requests() {
        let (_sim, nd) = setup();
        assert_eq!(
            nd.handle_cmd(NdCmd::GetIfInfo, &[]),
            Err(NdError::NoRequestBody)
        );
        assert!(matches!(
            nd.handle_cmd(NdCmd::GetIfInfo, &[0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(NdError::DeserCmdReq(_))
        ));
        assert_eq!(nd.handle_raw_cmd(99, &[]), Err(NdError::BadCmd(99)));

        let req = postcard::to_allocvec(&GetIfInfoReq { ifindex: 9 }).unwrap();
        assert_eq!(
            nd.handle_cmd(NdCmd::GetIfInfo, &req),
            Err(NdError::IfNotFound(9))
        );
    }

    #[test]
    fn if_flags() {
        let (_sim, nd) = setup();
        let req = SetIfFlagsReq { ifindex: 1, flags: NdIfFlags::PERFORMNUD };
        let req = postcard::to_allocvec(&req).unwrap();
        nd.handle_cmd(NdCmd::SetIfFlags, &req).unwrap();

        let info = nd.get_ifinfo(&GetIfInfoReq { ifindex: 1 }).unwrap();
        assert_eq!(info.name, "em0");
        assert_eq!(info.info.flags, NdIfFlags::PERFORMNUD);

        // With ACCEPT_RTADV off advertisements are ignored.
        advertise(&nd, "fe80::1", "2001:db8::/64");
        assert!(nd.dump_routers(&DumpRoutersReq::default()).routers.is_empty());
        assert_eq!(nd.stats().ra_ignored, 1);
    }

    #[test]
    fn flush_prefixes_keeps_link_local() {
        let (sim, nd) = setup();
        advertise(&nd, "fe80::1", "2001:db8::/64");
        nd.run_tasks();
        let manual: Ipv6Addr = "2001:db8:1::5".parse().unwrap();
        nd.add_address(1, &AddrConfig::new(manual, 64)).unwrap();

        nd.handle_cmd(NdCmd::FlushPrefixes, &[]).unwrap();

        let prefixes = nd.dump_prefixes(&DumpPrefixesReq::default()).prefixes;
        // The manually configured address holds its prefix.
        let left: Vec<_> = prefixes.iter().map(|p| p.prefix).collect();
        assert_eq!(
            left,
            vec!["2001:db8:1::/64".parse().unwrap(), Ipv6Cidr::LINK_LOCAL]
        );
        let addrs: Vec<_> =
            nd.addrs(1).unwrap().iter().map(|a| a.addr).collect();
        assert!(addrs.contains(&manual));
        assert!(!addrs.iter().any(|a| {
            "2001:db8::/64".parse::<Ipv6Cidr>().unwrap().is_member(*a)
        }));
        let gone: Ipv6Cidr = "2001:db8::/64".parse().unwrap();
        assert!(sim.routes.routes_to(&gone).is_empty());
    }

    #[test]
    fn flush_and_sync_routers() {
        let (sim, nd) = setup();
        advertise(&nd, "fe80::1", "2001:db8::/64");
        advertise(&nd, "fe80::2", "2001:db8::/64");
        assert_eq!(sim.routes.default_routes().len(), 1);

        let adds = sim.routes.add_count();
        nd.handle_cmd(NdCmd::SyncRouters, &[]).unwrap();
        assert_eq!(sim.routes.default_routes().len(), 1);
        assert!(sim.routes.add_count() > adds);

        nd.handle_cmd(NdCmd::FlushRouters, &[]).unwrap();
        assert!(sim.routes.default_routes().is_empty());
        assert!(nd.dump_routers(&DumpRoutersReq::default()).routers.is_empty());
    }

    #[test]
    fn stats_by_name() {
        let (_sim, nd) = setup();
        let mut ra = RouterAdvert::new("fe80::1".parse().unwrap(), 1800);
        ra.hop_limit = 1;
        nd.ra_input(1, &ra);

        let resp = nd.handle_cmd(NdCmd::DumpStats, &[]).unwrap();
        let resp: DumpStatsResp = postcard::from_bytes(&resp).unwrap();
        let ra_bad = resp.stats.iter().find(|(n, _)| n == "ra_bad").unwrap();
        assert_eq!(ra_bad.1, 1);
    }
}
