// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Neighbor Discovery protocol constants and the parsed form of the
//! Router Advertisement and Router Solicitation messages.
//!
//! Decoding the wire format into these types is the job of the ICMPv6
//! layer; the engine only ever sees the parsed structures.

use super::ip::Ipv6Addr;
use super::ip::Ipv6Cidr;
use super::mac::MacAddr;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// A lifetime value meaning "forever".
pub const ND6_INFINITE_LIFETIME: u32 = 0xffff_ffff;

/// The hop limit every ND message must arrive with.
pub const ND_HOP_LIMIT: u8 = 255;

/// The IPv6 minimum link MTU.
pub const IPV6_MMTU: u32 = 1280;

/// The default hop limit for unicast packets.
pub const IPV6_DEFHLIM: u8 = 64;

/// Default base reachable time, in milliseconds.
pub const REACHABLE_TIME: u32 = 30_000;

/// Largest reachable time a router may advertise, in milliseconds.
pub const MAX_REACHABLE_TIME: u32 = 3_600_000;

/// Default retransmit timer, in milliseconds.
pub const RETRANS_TIMER: u32 = 1_000;

/// Bounds of the random factor applied to the base reachable time,
/// in units of 1/1024.
pub const MIN_RANDOM_FACTOR: u32 = 512;
pub const MAX_RANDOM_FACTOR: u32 = 1536;

/// Period of the slow timer, in seconds.
pub const ND6_SLOWTIMER_INTERVAL: u32 = 60 * 60;

/// How often the randomized reachable time is recomputed, in seconds.
pub const ND6_RECALC_REACHTM_INTERVAL: u32 = 60 * 120;

/// Steady-state Router Solicitation interval, in seconds.
pub const ND6_RS_OUTPUT_INTERVAL: u32 = 60;

/// First Router Solicitation interval after a link comes up, in
/// seconds.
pub const ND6_RS_OUTPUT_QUICK_INTERVAL: u32 = 1;

/// Maximum valid lifetime of a temporary address, in seconds.
pub const ND6_PRIV_VALID_LIFETIME: u32 = 604_800;

/// Maximum preferred lifetime of a temporary address, in seconds.
pub const ND6_PRIV_PREFERRED_LIFETIME: u32 = 86_400;

/// Upper bound of the random desynchronization offset subtracted from
/// the preferred lifetime of a temporary address, in seconds.
pub const ND6_PRIV_MAX_DESYNC_FACTOR: u32 = 600;

/// The two hour floor on valid lifetime reductions of RFC 4862
/// §5.5.3 (e).
pub const TWO_HOURS: u32 = 2 * 60 * 60;

/// Length of a Prefix Information option, in units of 8 octets.
pub const ND_OPT_PI_LEN: u8 = 4;

/// Length of an MTU option, in units of 8 octets.
pub const ND_OPT_MTU_LEN: u8 = 1;

/// The M flag in the Router Advertisement flags byte.
pub const ND_RA_FLAG_MANAGED: u8 = 0x80;

/// The O flag in the Router Advertisement flags byte.
pub const ND_RA_FLAG_OTHER: u8 = 0x40;

/// Mask of the 2-bit Default Router Preference field (RFC 4191).
pub const ND_RA_FLAG_RTPREF_MASK: u8 = 0x18;
pub const ND_RA_FLAG_RTPREF_HIGH: u8 = 0x08;
pub const ND_RA_FLAG_RTPREF_MEDIUM: u8 = 0x00;
pub const ND_RA_FLAG_RTPREF_LOW: u8 = 0x18;
pub const ND_RA_FLAG_RTPREF_RSV: u8 = 0x10;

/// The length an ND link-layer address option must have for a link
/// address of `addrlen` octets, in units of 8 octets: the address plus
/// the two octet option header, rounded up.
pub const fn lladdr_opt_len(addrlen: usize) -> usize {
    ((addrlen + 2 + 7) & !7) >> 3
}

/// Default Router Preference, RFC 4191 §2.1.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum RouterPref {
    Low = -1,
    Medium = 0,
    High = 1,
}

impl RouterPref {
    /// Extract the preference from a Router Advertisement flags byte.
    /// The reserved encoding is treated as medium.
    pub fn from_ra_flags(flags: u8) -> Self {
        match flags & ND_RA_FLAG_RTPREF_MASK {
            ND_RA_FLAG_RTPREF_HIGH => Self::High,
            ND_RA_FLAG_RTPREF_LOW => Self::Low,
            _ => Self::Medium,
        }
    }

    /// The encoding of this preference in the flags byte.
    pub fn ra_flags(self) -> u8 {
        match self {
            Self::High => ND_RA_FLAG_RTPREF_HIGH,
            Self::Medium => ND_RA_FLAG_RTPREF_MEDIUM,
            Self::Low => ND_RA_FLAG_RTPREF_LOW,
        }
    }
}

impl Display for RouterPref {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

bitflags::bitflags! {
    /// Flags carried in a Prefix Information option.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct PiFlags: u8 {
        /// On-link (L).
        const ONLINK = 0x80;
        /// Autonomous address-configuration (A).
        const AUTO = 0x40;
    }
}

/// The on-link state of a tracked prefix.
///
/// The two halves of the state move independently: installing or
/// retracting the interface route flips between on-link and off-link,
/// while the on-link check is the only thing that attaches or detaches
/// a prefix.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum PrefixState {
    /// No interface route is installed for the prefix.
    #[default]
    Offlink,
    /// The interface route is installed and the prefix is attached.
    OnlinkAttached,
    /// The prefix lost its last reachable advertiser but its interface
    /// route has not been retracted yet.
    OnlinkDetached,
    /// Detached, with no interface route.
    OfflinkDetached,
}

impl PrefixState {
    pub fn is_onlink(self) -> bool {
        matches!(self, Self::OnlinkAttached | Self::OnlinkDetached)
    }

    pub fn is_detached(self) -> bool {
        matches!(self, Self::OnlinkDetached | Self::OfflinkDetached)
    }

    #[must_use]
    pub fn with_onlink(self, onlink: bool) -> Self {
        Self::from_parts(onlink, self.is_detached())
    }

    #[must_use]
    pub fn with_detached(self, detached: bool) -> Self {
        Self::from_parts(self.is_onlink(), detached)
    }

    fn from_parts(onlink: bool, detached: bool) -> Self {
        match (onlink, detached) {
            (false, false) => Self::Offlink,
            (true, false) => Self::OnlinkAttached,
            (true, true) => Self::OnlinkDetached,
            (false, true) => Self::OfflinkDetached,
        }
    }
}

impl Display for PrefixState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Offlink => "offlink",
            Self::OnlinkAttached => "onlink",
            Self::OnlinkDetached => "onlink,detached",
            Self::OfflinkDetached => "detached",
        };
        write!(f, "{s}")
    }
}

bitflags::bitflags! {
    /// Per-interface Neighbor Discovery flags.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct NdIfFlags: u32 {
        /// Perform Neighbor Unreachability Detection.
        const PERFORMNUD = 0x1;
        /// Accept Router Advertisements.
        const ACCEPT_RTADV = 0x2;
    }
}

/// The Neighbor Discovery parameters of one interface.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NdIfInfo {
    /// The link MTU learned from Router Advertisements; zero until one
    /// is learned.
    pub linkmtu: u32,
    /// Upper bound on `linkmtu`.
    pub maxmtu: u32,
    /// Base reachable time, in milliseconds.
    pub basereachable: u32,
    /// Randomized reachable time, in milliseconds.
    pub reachable: u32,
    /// Retransmit timer, in milliseconds.
    pub retrans: u32,
    pub flags: NdIfFlags,
    /// Seconds until `reachable` is randomized again.
    pub recalctm: i64,
    /// Current hop limit.
    pub chlim: u8,
}

fn default_hop_limit() -> u8 {
    ND_HOP_LIMIT
}

fn default_pi_len() -> u8 {
    ND_OPT_PI_LEN
}

fn default_mtu_len() -> u8 {
    ND_OPT_MTU_LEN
}

/// A parsed Prefix Information option.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PrefixInfoOpt {
    /// The option length, in units of 8 octets.
    #[serde(default = "default_pi_len")]
    pub len: u8,
    pub prefix_len: u8,
    #[serde(default)]
    pub flags: PiFlags,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    /// The prefix as it appeared on the wire. Host bits are not
    /// guaranteed to be zero.
    pub prefix: Ipv6Addr,
}

impl PrefixInfoOpt {
    pub fn new(
        prefix: Ipv6Cidr,
        flags: PiFlags,
        valid_lifetime: u32,
        preferred_lifetime: u32,
    ) -> Self {
        Self {
            len: ND_OPT_PI_LEN,
            prefix_len: prefix.prefix_len(),
            flags,
            valid_lifetime,
            preferred_lifetime,
            prefix: prefix.ip(),
        }
    }
}

/// A parsed MTU option.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MtuOpt {
    #[serde(default = "default_mtu_len")]
    pub len: u8,
    pub mtu: u32,
}

impl MtuOpt {
    pub fn new(mtu: u32) -> Self {
        Self { len: ND_OPT_MTU_LEN, mtu }
    }
}

/// A parsed Source/Target Link-layer Address option.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LinkAddrOpt {
    /// The option length, in units of 8 octets.
    pub len: u8,
    /// The link-layer address octets, without padding.
    pub addr: Vec<u8>,
}

impl LinkAddrOpt {
    pub fn from_mac(mac: MacAddr) -> Self {
        Self { len: lladdr_opt_len(6) as u8, addr: mac.bytes().to_vec() }
    }
}

/// The options of an ND message that this subsystem consumes.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NdOpts {
    #[serde(default)]
    pub mtu: Option<MtuOpt>,
    #[serde(default)]
    pub prefixes: Vec<PrefixInfoOpt>,
    #[serde(default)]
    pub src_lladdr: Option<LinkAddrOpt>,
}

/// A parsed Router Advertisement, along with the IPv6 header fields
/// needed to validate it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RouterAdvert {
    /// The IPv6 source address.
    pub src: Ipv6Addr,
    /// The hop limit of the IPv6 header carrying the message.
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u8,
    #[serde(default)]
    pub cur_hop_limit: u8,
    /// The flags byte: M, O and the router preference.
    #[serde(default)]
    pub flags: u8,
    /// Router lifetime, in seconds.
    pub router_lifetime: u16,
    /// Reachable time, in milliseconds.
    #[serde(default)]
    pub reachable_time: u32,
    /// Retransmit timer, in milliseconds.
    #[serde(default)]
    pub retrans_timer: u32,
    #[serde(default)]
    pub opts: NdOpts,
    /// The packet was covered by an authentication header.
    #[serde(default)]
    pub authenticated: bool,
}

impl RouterAdvert {
    /// A well-formed advertisement from `src` with the given router
    /// lifetime and no options.
    pub fn new(src: Ipv6Addr, router_lifetime: u16) -> Self {
        Self {
            src,
            hop_limit: ND_HOP_LIMIT,
            cur_hop_limit: 0,
            flags: 0,
            router_lifetime,
            reachable_time: 0,
            retrans_timer: 0,
            opts: NdOpts::default(),
            authenticated: false,
        }
    }
}

/// A parsed Router Solicitation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RouterSolicit {
    pub src: Ipv6Addr,
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u8,
    #[serde(default)]
    pub src_lladdr: Option<LinkAddrOpt>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn router_pref_from_flags() {
        assert_eq!(RouterPref::from_ra_flags(0x08), RouterPref::High);
        assert_eq!(RouterPref::from_ra_flags(0x00), RouterPref::Medium);
        assert_eq!(RouterPref::from_ra_flags(0x18), RouterPref::Low);
        // Reserved maps to medium.
        assert_eq!(RouterPref::from_ra_flags(0x10), RouterPref::Medium);
        // M/O bits don't matter.
        assert_eq!(RouterPref::from_ra_flags(0xc8), RouterPref::High);
        assert!(RouterPref::High > RouterPref::Medium);
        assert!(RouterPref::Medium > RouterPref::Low);
    }

    #[test]
    fn prefix_state_halves() {
        let s = PrefixState::Offlink.with_onlink(true);
        assert_eq!(s, PrefixState::OnlinkAttached);
        let s = s.with_detached(true);
        assert_eq!(s, PrefixState::OnlinkDetached);
        let s = s.with_onlink(false);
        assert_eq!(s, PrefixState::OfflinkDetached);
        assert!(s.is_detached() && !s.is_onlink());
        assert_eq!(s.with_detached(false), PrefixState::Offlink);
    }

    #[test]
    fn lladdr_len() {
        // Ethernet: 6 + 2 = 8 octets, one unit.
        assert_eq!(lladdr_opt_len(6), 1);
        // EUI-64 link addresses need two units.
        assert_eq!(lladdr_opt_len(8), 2);
    }
}
