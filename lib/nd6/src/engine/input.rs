// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Router Advertisement and Router Solicitation input.

use super::Ctx;
use super::Nd;
use super::NdState;
use super::defrouter::DefRouter;
use super::lifetime::Lifetimes;
use super::lifetime::compute_rtime;
use super::prefix::PrefixCandidate;
use crate::api::IPV6_MMTU;
use crate::api::IfIndex;
use crate::api::Ipv6Cidr;
use crate::api::LinkAddrOpt;
use crate::api::MAX_REACHABLE_TIME;
use crate::api::ND_HOP_LIMIT;
use crate::api::ND_OPT_MTU_LEN;
use crate::api::ND_OPT_PI_LEN;
use crate::api::NdIfFlags;
use crate::api::PiFlags;
use crate::api::PrefixInfoOpt;
use crate::api::RouterAdvert;
use crate::api::RouterSolicit;
use crate::api::lladdr_opt_len;
use crate::provider::LladdrSource;
use core::fmt;
use core::fmt::Display;

/// Why a message was dropped as malformed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropReason {
    /// The IPv6 hop limit was not 255, so the message may have been
    /// forwarded.
    HopLimit,
    /// A Router Advertisement must come from a link-local address.
    SrcNotLinkLocal,
    /// The link-layer address option does not fit the interface.
    BadLladdrLen,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::HopLimit => "invalid hop limit",
            Self::SrcNotLinkLocal => "source is not link-local",
            Self::BadLladdrLen => "link-layer address option length mismatch",
        };
        write!(f, "{s}")
    }
}

/// The outcome of processing one message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NdInputResult {
    Processed,
    /// Not for us in our current role or configuration.
    Ignored,
    Bad(DropReason),
}

/// Does a link-layer address option fit an interface with a link-layer
/// address of `addrlen` octets?
fn lladdr_fits(opt: &LinkAddrOpt, addrlen: usize) -> bool {
    usize::from(opt.len) == lladdr_opt_len(addrlen) && opt.addr.len() >= addrlen
}

impl NdState {
    /// Validate a Prefix Information option and turn it into a
    /// candidate for the prefix list.
    fn pi_candidate(
        &mut self,
        ctx: &Ctx,
        ifindex: IfIndex,
        pi: &PrefixInfoOpt,
    ) -> Option<PrefixCandidate> {
        let why = if pi.len != ND_OPT_PI_LEN {
            "invalid option length"
        } else if pi.prefix_len > 128 {
            "invalid prefix length"
        } else if pi.prefix.is_multicast() || pi.prefix.is_link_local() {
            "invalid prefix"
        } else if pi.prefix.is_aggregatable_unicast() && pi.prefix_len != 64 {
            "invalid prefix length for aggregatable unicast"
        } else {
            ""
        };

        if !why.is_empty() {
            nd6log!(
                ctx,
                "prefix option {}/{}: {why}",
                pi.prefix,
                pi.prefix_len
            );
            self.stats.pi_bad += 1;
            return None;
        }

        let ltime = match Lifetimes::for_prefix(
            pi.valid_lifetime,
            pi.preferred_lifetime,
            ctx.now,
        ) {
            Ok(ltime) => ltime,
            Err(e) => {
                nd6log!(
                    ctx,
                    "prefix option {}/{}: {e}",
                    pi.prefix,
                    pi.prefix_len
                );
                self.stats.pi_bad += 1;
                return None;
            }
        };

        let cidr = Ipv6Cidr::new_checked(pi.prefix, pi.prefix_len).ok()?;
        Some(PrefixCandidate {
            ifindex,
            cidr,
            raf: pi.flags & (PiFlags::ONLINK | PiFlags::AUTO),
            ltime,
            lastupdate: ctx.now,
        })
    }

    fn ra_input(
        &mut self,
        ctx: &Ctx,
        ifindex: IfIndex,
        ra: &RouterAdvert,
    ) -> NdInputResult {
        let Some(ifp) = self.ifaces.get_mut(&ifindex) else {
            self.stats.ra_ignored += 1;
            return NdInputResult::Ignored;
        };

        if !ifp.autoconf() || !ifp.ndi.flags.contains(NdIfFlags::ACCEPT_RTADV)
        {
            self.stats.ra_ignored += 1;
            return NdInputResult::Ignored;
        }

        if ra.hop_limit != ND_HOP_LIMIT {
            nd6log!(
                ctx,
                "invalid hop limit {} in RA from {} on {}",
                ra.hop_limit,
                ra.src,
                ifp.name()
            );
            self.stats.ra_bad += 1;
            return NdInputResult::Bad(DropReason::HopLimit);
        }

        if !ra.src.is_link_local() {
            nd6log!(ctx, "RA from non link-local address {}", ra.src);
            self.stats.ra_bad += 1;
            return NdInputResult::Bad(DropReason::SrcNotLinkLocal);
        }

        let ndi = &mut ifp.ndi;
        let advreachable = ra.reachable_time;
        if advreachable != 0
            && advreachable <= MAX_REACHABLE_TIME
            && advreachable != ndi.basereachable
        {
            ndi.basereachable = advreachable;
            ndi.reachable = compute_rtime(ctx.pv.random.as_ref(), advreachable);
            ndi.recalctm = i64::from(ctx.cfg.recalc_reachtm_interval);
        }
        if ra.retrans_timer != 0 {
            ndi.retrans = ra.retrans_timer;
        }
        if ra.cur_hop_limit != 0 {
            ndi.chlim = ra.cur_hop_limit;
        }

        let addrlen = if ifp.cfg.lladdr.is_some() { 6 } else { 0 };
        self.stats.ra_in += 1;

        let dr = DefRouter::new(
            ra.src,
            ifindex,
            ra.flags,
            ra.router_lifetime,
            ctx.now,
        );
        let key = self.defrtrlist_update(ctx, dr);

        for pi in &ra.opts.prefixes {
            if let Some(cand) = self.pi_candidate(ctx, ifindex, pi) {
                self.prelist_update(ctx, &cand, key, ra.authenticated);
            }
        }

        if let Some(opt) = &ra.opts.mtu {
            self.ra_mtu(ctx, ifindex, opt.len, opt.mtu, ra);
        }

        let lladdr = match &ra.opts.src_lladdr {
            Some(opt) if !lladdr_fits(opt, addrlen) => {
                nd6log!(
                    ctx,
                    "lladdr option length {} from {} does not match the \
                     interface",
                    opt.len,
                    ra.src
                );
                self.stats.ra_bad += 1;
                return NdInputResult::Bad(DropReason::BadLladdrLen);
            }

            Some(opt) => Some(&opt.addr[..addrlen]),
            None => None,
        };

        ctx.pv.neighbors.learn_lladdr(
            ifindex,
            ra.src,
            lladdr,
            LladdrSource::RouterAdvert,
        );

        // Whatever the neighbor cache learned may change which routers
        // look reachable.
        self.pfxlist_onlink_check(ctx);
        NdInputResult::Processed
    }

    fn ra_mtu(
        &mut self,
        ctx: &Ctx,
        ifindex: IfIndex,
        len: u8,
        mtu: u32,
        ra: &RouterAdvert,
    ) {
        if len != ND_OPT_MTU_LEN {
            self.stats.mtu_bad += 1;
            return;
        }

        if mtu < IPV6_MMTU {
            nd6log!(ctx, "bogus mtu option mtu={mtu} from {}", ra.src);
            self.stats.mtu_bad += 1;
            return;
        }

        let Some(ifp) = self.ifaces.get_mut(&ifindex) else {
            return;
        };
        let ndi = &mut ifp.ndi;
        let maxmtu = if ndi.maxmtu != 0 && ndi.maxmtu < ifp.cfg.mtu {
            ndi.maxmtu
        } else {
            ifp.cfg.mtu
        };

        if mtu <= maxmtu {
            ndi.linkmtu = mtu;
        } else {
            nd6log!(
                ctx,
                "bogus mtu mtu={mtu} from {}, exceeds maxmtu {maxmtu}",
                ra.src
            );
            self.stats.mtu_bad += 1;
        }
    }

    fn rs_input(
        &mut self,
        ctx: &Ctx,
        ifindex: IfIndex,
        rs: &RouterSolicit,
    ) -> NdInputResult {
        let Some(ifp) = self.ifaces.get(&ifindex) else {
            self.stats.rs_ignored += 1;
            return NdInputResult::Ignored;
        };

        // Only routers care about solicitations.
        if !ctx.cfg.forwarding || ifp.autoconf() {
            self.stats.rs_ignored += 1;
            return NdInputResult::Ignored;
        }

        if rs.hop_limit != ND_HOP_LIMIT {
            nd6log!(
                ctx,
                "invalid hop limit {} in RS from {} on {}",
                rs.hop_limit,
                rs.src,
                ifp.name()
            );
            self.stats.rs_bad += 1;
            return NdInputResult::Bad(DropReason::HopLimit);
        }

        // The sender has no address yet; there is nothing to learn.
        if rs.src.is_unspecified() {
            self.stats.rs_ignored += 1;
            return NdInputResult::Ignored;
        }

        let addrlen = if ifp.cfg.lladdr.is_some() { 6 } else { 0 };
        let lladdr = match &rs.src_lladdr {
            Some(opt) if !lladdr_fits(opt, addrlen) => {
                nd6log!(
                    ctx,
                    "lladdr option length {} from {} does not match the \
                     interface",
                    opt.len,
                    rs.src
                );
                self.stats.rs_bad += 1;
                return NdInputResult::Bad(DropReason::BadLladdrLen);
            }

            Some(opt) => Some(&opt.addr[..addrlen]),
            None => None,
        };

        self.stats.rs_in += 1;
        ctx.pv.neighbors.learn_lladdr(
            ifindex,
            rs.src,
            lladdr,
            LladdrSource::RouterSolicit,
        );
        NdInputResult::Processed
    }
}

impl Nd {
    /// Process a Router Advertisement received on `ifindex`.
    pub fn ra_input(
        &self,
        ifindex: IfIndex,
        ra: &RouterAdvert,
    ) -> NdInputResult {
        let (mut st, ctx) = self.lock();
        st.ra_input(&ctx, ifindex, ra)
    }

    /// Process a Router Solicitation received on `ifindex`. No answer is
    /// sent; that is left to a router advertisement daemon.
    pub fn rs_input(
        &self,
        ifindex: IfIndex,
        rs: &RouterSolicit,
    ) -> NdInputResult {
        let (mut st, ctx) = self.lock();
        st.rs_input(&ctx, ifindex, rs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::IfConfig;
    use crate::api::Ipv6Addr;
    use crate::api::MacAddr;
    use crate::api::MtuOpt;
    use crate::api::NdConfig;
    use crate::api::REACHABLE_TIME;
    use crate::provider::LladdrSource;
    use crate::sim::SimStack;

    const MAC: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 1]);
    const RMAC: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0xaa]);

    fn rtr() -> Ipv6Addr {
        "fe80::1".parse().unwrap()
    }

    fn setup(cfg: NdConfig) -> (SimStack, Nd) {
        let sim = SimStack::new();
        let nd = sim.nd(cfg).unwrap();
        nd.ifattach(IfConfig::new("em0", 1, Some(MAC))).unwrap();
        (sim, nd)
    }

    #[test]
    fn rejects() {
        let (_sim, nd) = setup(NdConfig::default());

        let mut ra = RouterAdvert::new(rtr(), 1800);
        ra.hop_limit = 64;
        assert_eq!(
            nd.ra_input(1, &ra),
            NdInputResult::Bad(DropReason::HopLimit)
        );

        let ra = RouterAdvert::new("2001:db8::1".parse().unwrap(), 1800);
        assert_eq!(
            nd.ra_input(1, &ra),
            NdInputResult::Bad(DropReason::SrcNotLinkLocal)
        );

        assert_eq!(
            nd.ra_input(7, &RouterAdvert::new(rtr(), 1800)),
            NdInputResult::Ignored
        );

        let stats = nd.stats();
        assert_eq!(stats.ra_bad, 2);
        assert_eq!(stats.ra_ignored, 1);
        assert_eq!(stats.ra_in, 0);
        assert!(nd.state.lock().routers.is_empty());
    }

    #[test]
    fn not_autoconf_ignored() {
        let sim = SimStack::new();
        let nd = sim.nd(NdConfig::default()).unwrap();
        let mut ifc = IfConfig::new("em0", 1, Some(MAC));
        ifc.autoconf6 = false;
        nd.ifattach(ifc).unwrap();
        assert_eq!(
            nd.ra_input(1, &RouterAdvert::new(rtr(), 1800)),
            NdInputResult::Ignored
        );
    }

    #[test]
    fn interface_params() {
        let (_sim, nd) = setup(NdConfig::default());
        let mut ra = RouterAdvert::new(rtr(), 1800);
        ra.reachable_time = 20_000;
        ra.retrans_timer = 2_000;
        ra.cur_hop_limit = 32;
        assert_eq!(nd.ra_input(1, &ra), NdInputResult::Processed);

        {
            let st = nd.state.lock();
            let ndi = &st.ifaces[&1].ndi;
            assert_eq!(ndi.basereachable, 20_000);
            let unit = 20_000 >> 10;
            assert!(ndi.reachable >= 512 * unit);
            assert!(ndi.reachable < 1536 * unit);
            assert_eq!(ndi.retrans, 2_000);
            assert_eq!(ndi.chlim, 32);
        }

        // Zero means no opinion, and too long is ignored.
        let mut ra = RouterAdvert::new(rtr(), 1800);
        ra.reachable_time = MAX_REACHABLE_TIME + 1;
        nd.ra_input(1, &ra);
        let st = nd.state.lock();
        let ndi = &st.ifaces[&1].ndi;
        assert_eq!(ndi.basereachable, 20_000);
        assert_eq!(ndi.retrans, 2_000);
        assert_eq!(ndi.chlim, 32);
        assert_ne!(ndi.basereachable, REACHABLE_TIME);
    }

    #[test]
    fn mtu_option() {
        let sim = SimStack::new();
        let nd = sim.nd(NdConfig::default()).unwrap();
        let mut ifc = IfConfig::new("em0", 1, Some(MAC));
        ifc.mtu = 9000;
        ifc.maxmtu = 4000;
        nd.ifattach(ifc).unwrap();

        let linkmtu = |mtu: u32| {
            let mut ra = RouterAdvert::new(rtr(), 1800);
            ra.opts.mtu = Some(MtuOpt::new(mtu));
            nd.ra_input(1, &ra);
            nd.state.lock().ifaces[&1].ndi.linkmtu
        };

        assert_eq!(linkmtu(1000), 0);
        assert_eq!(linkmtu(3000), 3000);
        assert_eq!(linkmtu(5000), 3000);
        assert_eq!(nd.stats().mtu_bad, 2);
    }

    #[test]
    fn bad_prefix_options() {
        let (_sim, nd) = setup(NdConfig::default());
        let mut ra = RouterAdvert::new(rtr(), 1800);
        let good = PrefixInfoOpt::new(
            "2001:db8::/64".parse().unwrap(),
            PiFlags::ONLINK,
            3600,
            1800,
        );

        let mut bad_len = good.clone();
        bad_len.len = 3;
        let mut mcast = good.clone();
        mcast.prefix = "ff02::".parse().unwrap();
        let mut agg = good.clone();
        agg.prefix_len = 48;
        let mut ltimes = good.clone();
        ltimes.preferred_lifetime = 7200;

        ra.opts.prefixes = vec![bad_len, mcast, agg, ltimes, good];
        assert_eq!(nd.ra_input(1, &ra), NdInputResult::Processed);
        assert_eq!(nd.stats().pi_bad, 4);

        let st = nd.state.lock();
        let p: Ipv6Cidr = "2001:db8::/64".parse().unwrap();
        let idx = st.prefix_lookup(1, &p).unwrap();
        assert_eq!(st.prefixes[idx].advrtrs.len(), 1);
    }

    #[test]
    fn lladdr_learned() {
        let (sim, nd) = setup(NdConfig::default());
        let mut ra = RouterAdvert::new(rtr(), 1800);
        ra.opts.src_lladdr = Some(LinkAddrOpt::from_mac(RMAC));
        assert_eq!(nd.ra_input(1, &ra), NdInputResult::Processed);

        let learned = sim.neighbors.learned();
        assert_eq!(learned.len(), 1);
        assert_eq!(learned[0].lladdr.as_deref(), Some(&RMAC.bytes()[..]));
        assert_eq!(learned[0].source, LladdrSource::RouterAdvert);

        ra.opts.src_lladdr = Some(LinkAddrOpt { len: 2, addr: vec![0; 14] });
        assert_eq!(
            nd.ra_input(1, &ra),
            NdInputResult::Bad(DropReason::BadLladdrLen)
        );
        assert_eq!(sim.neighbors.learned().len(), 1);
    }

    #[test]
    fn solicitations() {
        let cfg = NdConfig { forwarding: true, ..Default::default() };
        let sim = SimStack::new();
        let nd = sim.nd(cfg).unwrap();
        let mut ifc = IfConfig::new("em0", 1, Some(MAC));
        ifc.autoconf6 = false;
        nd.ifattach(ifc).unwrap();

        let host: Ipv6Addr = "fe80::99".parse().unwrap();
        let rs = RouterSolicit {
            src: host,
            hop_limit: ND_HOP_LIMIT,
            src_lladdr: Some(LinkAddrOpt::from_mac(RMAC)),
        };
        assert_eq!(nd.rs_input(1, &rs), NdInputResult::Processed);
        let learned = sim.neighbors.learned();
        assert_eq!(learned[0].source, LladdrSource::RouterSolicit);

        let anon = RouterSolicit { src: Ipv6Addr::ANY_ADDR, ..rs.clone() };
        assert_eq!(nd.rs_input(1, &anon), NdInputResult::Ignored);

        let hops = RouterSolicit { hop_limit: 1, ..rs };
        assert_eq!(
            nd.rs_input(1, &hops),
            NdInputResult::Bad(DropReason::HopLimit)
        );

        let stats = nd.stats();
        assert_eq!((stats.rs_in, stats.rs_bad, stats.rs_ignored), (1, 1, 1));
    }

    #[test]
    fn hosts_ignore_solicitations() {
        let (_sim, nd) = setup(NdConfig::default());
        let rs = RouterSolicit {
            src: "fe80::99".parse().unwrap(),
            hop_limit: ND_HOP_LIMIT,
            src_lladdr: None,
        };
        assert_eq!(nd.rs_input(1, &rs), NdInputResult::Ignored);
    }
}
