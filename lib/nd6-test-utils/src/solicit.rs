// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Routines for verifying Router Solicitations sent by the subsystem.

use nd6::api::Ipv6Addr;
use smoltcp::wire::IpAddress;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Icmpv6Packet;
use smoltcp::wire::Ipv6Packet;
use smoltcp::wire::Ipv6Repr;
use smoltcp::wire::NdiscRepr;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedRs {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub hop_limit: u8,
    pub lladdr: Option<Vec<u8>>,
}

/// Parse an IPv6 Router Solicitation, panicking on anything else,
/// including a bad ICMPv6 checksum.
pub fn parse_rs(pkt: &[u8]) -> ParsedRs {
    let ip6 = Ipv6Packet::new_checked(pkt).expect("bad IPv6 header");
    let ip = Ipv6Repr::parse(&ip6).expect("bad IPv6 header");
    assert_eq!(ip.next_header, IpProtocol::Icmpv6);

    let icmp = Icmpv6Packet::new_checked(ip6.payload()).expect("bad ICMPv6");
    assert!(
        icmp.verify_checksum(
            &IpAddress::Ipv6(ip.src_addr),
            &IpAddress::Ipv6(ip.dst_addr),
        ),
        "bad ICMPv6 checksum"
    );

    let lladdr = match NdiscRepr::parse(&icmp).expect("bad NDP message") {
        NdiscRepr::RouterSolicit { lladdr } => {
            lladdr.map(|l| l.as_bytes().to_vec())
        }
        other => panic!("expected RS, got {other:?}"),
    };

    ParsedRs {
        src: Ipv6Addr::from(ip.src_addr.0),
        dst: Ipv6Addr::from(ip.dst_addr.0),
        hop_limit: ip.hop_limit,
        lladdr,
    }
}
