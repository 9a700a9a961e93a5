// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Router Solicitation output.
//!
//! A single schedule serves every auto-configuring interface. A link
//! coming up resets the schedule to the quick interval, after which it
//! backs off exponentially to the steady interval.

use super::Ctx;
use super::Nd;
use super::NdState;
use super::ifnet::AddrFlags;
use crate::api::IfIndex;
use crate::api::Ipv6Addr;
use crate::api::ND_HOP_LIMIT;
use crate::api::ND6_RS_OUTPUT_INTERVAL;
use crate::api::ND6_RS_OUTPUT_QUICK_INTERVAL;
use alloc::vec::Vec;
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::Icmpv6Packet;
use smoltcp::wire::Icmpv6Repr;
use smoltcp::wire::IpAddress;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv6Address;
use smoltcp::wire::Ipv6Packet;
use smoltcp::wire::Ipv6Repr;
use smoltcp::wire::NdiscRepr;
use smoltcp::wire::RawHardwareAddress;

/// The Router Solicitation schedule.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RsTimer {
    /// Seconds until the next firing.
    pub timeout: u32,
    /// Number of interfaces taking part.
    pub count: u32,
}

/// Build a Router Solicitation from `src` to all-routers, carrying
/// `lladdr` in a source link-layer address option when given.
pub fn rs_packet(src: Ipv6Addr, lladdr: Option<&[u8]>) -> Vec<u8> {
    let src = Ipv6Address::from_bytes(&src.bytes());
    let dst = Ipv6Address::from_bytes(&Ipv6Addr::ALL_ROUTERS.bytes());
    let rs = Icmpv6Repr::Ndisc(NdiscRepr::RouterSolicit {
        lladdr: lladdr.map(RawHardwareAddress::from_bytes),
    });

    let ip = Ipv6Repr {
        src_addr: src,
        dst_addr: dst,
        next_header: IpProtocol::Icmpv6,
        payload_len: rs.buffer_len(),
        hop_limit: ND_HOP_LIMIT,
    };

    let mut buf = vec![0u8; ip.buffer_len() + rs.buffer_len()];
    let mut pkt = Ipv6Packet::new_unchecked(&mut buf[..]);
    ip.emit(&mut pkt);
    let mut icmp = Icmpv6Packet::new_unchecked(pkt.payload_mut());
    rs.emit(
        &IpAddress::Ipv6(src),
        &IpAddress::Ipv6(dst),
        &mut icmp,
        &ChecksumCapabilities::default(),
    );
    buf
}

impl NdState {
    /// An auto-configuring interface came up.
    pub(crate) fn rs_join(&mut self) {
        self.rs.count += 1;
        self.rs.timeout = ND6_RS_OUTPUT_QUICK_INTERVAL;
    }

    /// An auto-configuring interface went down or away.
    pub(crate) fn rs_leave(&mut self) {
        self.rs.count = self.rs.count.saturating_sub(1);
    }

    fn rs_timer(&mut self, ctx: &Ctx) -> Option<u32> {
        if self.rs.count == 0 {
            return None;
        }

        let timeout = self.rs.timeout.max(ND6_RS_OUTPUT_QUICK_INTERVAL);
        self.rs.timeout = if timeout < ND6_RS_OUTPUT_INTERVAL {
            (timeout * 2).min(ND6_RS_OUTPUT_INTERVAL)
        } else {
            ND6_RS_OUTPUT_INTERVAL
        };

        let out: Vec<(IfIndex, Vec<u8>)> = self
            .ifaces
            .values()
            .filter(|ifp| ifp.is_running() && ifp.autoconf())
            .filter_map(|ifp| {
                let ia6 = ifp.link_local(AddrFlags::TENTATIVE)?;
                let mac = ifp.cfg.lladdr.map(|m| m.bytes());
                let pkt = rs_packet(ia6.addr, mac.as_ref().map(|m| &m[..]));
                Some((ifp.index(), pkt))
            })
            .collect();

        for (index, pkt) in out {
            ctx.pv.output.send(index, pkt);
            self.stats.rs_out += 1;
        }

        Some(self.rs.timeout)
    }
}

impl Nd {
    /// Fire the Router Solicitation timer, sending one solicitation on
    /// every running auto-configuring interface that has a usable
    /// link-local address. Returns the number of seconds until it
    /// should fire again, or `None` when no interface takes part.
    pub fn rs_timer(&self) -> Option<u32> {
        let (mut st, ctx) = self.lock();
        st.rs_timer(&ctx)
    }

    /// The current solicitation schedule.
    pub fn rs_schedule(&self) -> RsTimer {
        self.state.lock().rs
    }
}
