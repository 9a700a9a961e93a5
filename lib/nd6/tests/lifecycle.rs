// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests driving the subsystem through whole router and
//! prefix lifecycles against the simulated stack.

use nd6::print::print_prefixes_into;
use nd6::print::print_routers_into;
use nd6_test_utils as common;

use common::*;

#[test]
fn host_learns_router_and_prefix() {
    let mut h = NdHarness::host();
    h.sim.neighbors.set_reachable(1, rtr(1), true);

    let ra = RaBuilder::new(rtr(1), 1800)
        .prefix(pi_la("2001:db8::/64", 86400, 14400))
        .mtu(1400)
        .lladdr(MAC2)
        .build();
    assert_eq!(h.ra(1, &ra), NdInputResult::Processed);
    incr!(h, ["ra_in"]);

    assert_eq!(h.installed(), Some(rtr(1)));
    let defaults = h.sim.routes.default_routes();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].gateway, rtr(1));

    let pfx = h.prefix("2001:db8::/64").unwrap();
    assert_eq!(pfx.state, PrefixState::OnlinkAttached);
    assert_eq!(pfx.advrtrs, vec![rtr(1)]);
    assert_eq!(h.sim.routes.routes_to(&cidr("2001:db8::/64")).len(), 1);

    // The address shows up once the task has run.
    assert!(h.nd.tasks_pending());
    assert_eq!(h.nd.run_tasks(), 1);
    let want = ip("2001:db8::ff:fe00:1");
    let req = h.sim.addrs.get(1, want).unwrap();
    assert_eq!(req.prefix_len, 64);
    assert_eq!(req.vltime, 86400);
    assert_eq!(req.pltime, 14400);
    assert_eq!(h.prefix("2001:db8::/64").unwrap().refcnt, 1);

    let learned = h.sim.neighbors.learned();
    assert_eq!(learned.len(), 1);
    assert_eq!(learned[0].addr, rtr(1));
    assert_eq!(learned[0].lladdr, Some(MAC2.bytes().to_vec()));
    assert_eq!(learned[0].source, LladdrSource::RouterAdvert);

    let info = h.nd.get_ifinfo(&GetIfInfoReq { ifindex: 1 }).unwrap();
    assert_eq!(info.info.linkmtu, 1400);
    assert_nd!(h);
}

#[test]
fn zero_lifetime_withdraws_router() {
    let mut h = NdHarness::host();
    h.ra(1, &RaBuilder::new(rtr(1), 1800).build());
    incr!(h, ["ra_in"]);
    assert_eq!(h.installed(), Some(rtr(1)));

    h.ra(1, &RaBuilder::new(rtr(1), 0).build());
    incr!(h, ["ra_in"]);
    assert!(h.routers().is_empty());
    assert!(h.sim.routes.default_routes().is_empty());
    assert!(h.sim.routes.flushed().contains(&(rtr(1), 1)));
}

#[test]
fn everything_expires() {
    let h = NdHarness::host();
    h.sim.neighbors.set_reachable(1, rtr(1), true);
    let ra = RaBuilder::new(rtr(1), 600)
        .prefix(pi_la("2001:db8::/64", 3600, 1800))
        .build();
    h.ra(1, &ra);
    h.nd.run_tasks();
    let addr = ip("2001:db8::ff:fe00:1");

    // The router goes first. With no routers left the prefix stays
    // attached and on-link.
    h.tick(601);
    assert!(h.routers().is_empty());
    assert!(h.sim.routes.default_routes().is_empty());
    let pfx = h.prefix("2001:db8::/64").unwrap();
    assert_eq!(pfx.state, PrefixState::OnlinkAttached);
    assert!(pfx.advrtrs.is_empty());

    h.tick(1300);
    let flags = |h: &NdHarness| {
        h.nd.addrs(1)
            .unwrap()
            .into_iter()
            .find(|a| a.addr == addr)
            .map(|a| a.flags)
    };
    assert!(flags(&h).unwrap().contains(AddrFlags::DEPRECATED));

    h.tick(1800);
    assert_eq!(flags(&h), None);
    assert!(h.sim.addrs.purged().contains(&(1, addr)));
    assert!(h.prefix("2001:db8::/64").is_none());
    assert!(h.sim.routes.routes_to(&cidr("2001:db8::/64")).is_empty());

    // Only the link-local prefix is left.
    let left: Vec<_> = h.prefixes().iter().map(|p| p.prefix).collect();
    assert_eq!(left, vec![Ipv6Cidr::LINK_LOCAL]);
}

#[test]
fn failover_to_reachable_router() {
    let h = NdHarness::host();
    h.sim.neighbors.set_reachable(1, rtr(1), true);
    h.sim.neighbors.set_reachable(1, rtr(2), true);
    h.ra(1, &RaBuilder::new(rtr(1), 1800).build());
    h.ra(1, &RaBuilder::new(rtr(2), 1800).build());
    assert_eq!(h.installed(), Some(rtr(1)));

    h.sim.neighbors.set_reachable(1, rtr(1), false);
    h.nd.router_unreachable(rtr(1), 1);
    assert_eq!(h.installed(), Some(rtr(2)));
    let defaults = h.sim.routes.default_routes();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].gateway, rtr(2));
}

#[test]
fn bad_adverts_counted() {
    let mut h = NdHarness::host();

    let mut ra = RaBuilder::new(rtr(1), 1800).build();
    ra.hop_limit = 64;
    assert_eq!(h.ra(1, &ra), NdInputResult::Bad(DropReason::HopLimit));
    incr!(h, ["ra_bad"]);

    let ra = RaBuilder::new(ip("2001:db8::1"), 1800).build();
    assert_eq!(
        h.ra(1, &ra),
        NdInputResult::Bad(DropReason::SrcNotLinkLocal)
    );
    incr!(h, ["ra_bad"]);
    assert!(h.routers().is_empty());

    // A bad prefix option spoils only itself.
    let ra = RaBuilder::new(rtr(1), 1800)
        .prefix(pi_la("ff02::/64", 86400, 14400))
        .prefix(pi_la("2001:db8::/64", 86400, 14400))
        .build();
    assert_eq!(h.ra(1, &ra), NdInputResult::Processed);
    incr!(h, ["ra_in", "pi_bad"]);
    assert!(h.prefix("ff02::/64").is_none());
    assert!(h.prefix("2001:db8::/64").is_some());

    let mut ra = RaBuilder::new(rtr(2), 1800).build();
    ra.opts.src_lladdr = Some(LinkAddrOpt { len: 2, addr: vec![1, 2, 3] });
    assert_eq!(h.ra(1, &ra), NdInputResult::Bad(DropReason::BadLladdrLen));
    incr!(h, ["ra_in", "ra_bad"]);
    assert!(h.sim.neighbors.learned().iter().all(|l| l.addr != rtr(2)));

    let ra = RaBuilder::new(rtr(1), 1800).build();
    assert_eq!(h.ra(7, &ra), NdInputResult::Ignored);
    incr!(h, ["ra_ignored"]);
}

#[test]
fn solicit_until_told() {
    let mut h = NdHarness::host();
    assert_eq!(h.nd.rs_timer(), Some(2));
    incr!(h, ["rs_out"]);

    let sent = h.sim.output.take();
    assert_eq!(sent.len(), 1);
    let rs = parse_rs(&sent[0].1);
    assert_eq!(rs.src, Ipv6Addr::from_eui64(&MAC1));
    assert_eq!(rs.dst, Ipv6Addr::ALL_ROUTERS);
    assert_eq!(rs.hop_limit, 255);
    assert_eq!(rs.lladdr, Some(MAC1.bytes().to_vec()));

    // A second interface joins and restarts the quick schedule.
    h.attach("em1", 2, MAC2);
    assert_eq!(h.nd.rs_timer(), Some(2));
    incr!(h, ["rs_out", "rs_out"]);
    let mut out: Vec<_> =
        h.sim.output.take().into_iter().map(|(idx, _)| idx).collect();
    out.sort();
    assert_eq!(out, vec![1, 2]);
}

#[test]
fn command_boundary_and_printing() {
    let h = NdHarness::host();
    h.sim.neighbors.set_reachable(1, rtr(1), true);
    let ra = RaBuilder::new(rtr(1), 1800)
        .flags(ND_RA_FLAG_OTHER | ND_RA_FLAG_RTPREF_HIGH)
        .prefix(pi_la("2001:db8::/64", 86400, 14400))
        .build();
    h.ra(1, &ra);
    h.nd.run_tasks();

    let req = postcard::to_allocvec(&DumpRoutersReq { ifindex: Some(1) })
        .unwrap();
    let resp = h.nd.handle_cmd(NdCmd::DumpRouters, &req).unwrap();
    let resp: DumpRoutersResp = postcard::from_bytes(&resp).unwrap();
    let mut out = Vec::new();
    print_routers_into(&mut out, &resp).unwrap();
    let out = String::from_utf8(out).unwrap();
    let row: Vec<_> =
        out.lines().nth(1).unwrap().split_whitespace().collect();
    assert_eq!(row[0], "fe80::1");
    assert_eq!(row[2], "O");
    assert_eq!(row[3], "high");
    assert_eq!(row[6], "yes");

    let req = postcard::to_allocvec(&DumpPrefixesReq::default()).unwrap();
    let resp = h.nd.handle_cmd(NdCmd::DumpPrefixes, &req).unwrap();
    let resp: DumpPrefixesResp = postcard::from_bytes(&resp).unwrap();
    let mut out = Vec::new();
    print_prefixes_into(&mut out, &resp).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.lines().any(|l| l.starts_with("2001:db8::/64")));
    assert!(out.lines().any(|l| l.starts_with("fe80::/64")));

    // Nothing on an interface that doesn't exist.
    let req = postcard::to_allocvec(&DumpRoutersReq { ifindex: Some(5) })
        .unwrap();
    let resp = h.nd.handle_cmd(NdCmd::DumpRouters, &req).unwrap();
    let resp: DumpRoutersResp = postcard::from_bytes(&resp).unwrap();
    assert!(resp.routers.is_empty());
}

#[test]
fn detach_purges_interface() {
    let h = NdHarness::host();
    h.attach("em1", 2, MAC2);
    h.sim.neighbors.set_reachable(1, rtr(1), true);
    h.sim.neighbors.set_reachable(2, rtr(2), true);
    let ra1 = RaBuilder::new(rtr(1), 1800)
        .prefix(pi_la("2001:db8:1::/64", 86400, 14400))
        .build();
    let ra2 = RaBuilder::new(rtr(2), 1800)
        .prefix(pi_la("2001:db8:2::/64", 86400, 14400))
        .build();
    h.ra(1, &ra1);
    h.ra(2, &ra2);
    h.nd.run_tasks();
    assert_eq!(h.installed(), Some(rtr(1)));

    h.nd.ifdetach(1).unwrap();
    assert_eq!(h.installed(), Some(rtr(2)));
    assert!(h.prefixes().iter().all(|p| p.ifindex == 2));
    assert!(h.sim.routes.routes_to(&cidr("2001:db8:1::/64")).is_empty());
    let gone = ip("2001:db8:1::ff:fe00:1");
    assert!(h.sim.addrs.purged().contains(&(1, gone)));
    assert_eq!(h.nd.addrs(1).unwrap_err(), NdError::IfNotFound(1));
}
