// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::mac::MacAddr;
use alloc::string::String;
use alloc::string::ToString;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::ops::Deref;
use core::result;
use core::str::FromStr;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as DeError;

/// An IPv6 address.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(C)]
pub struct Ipv6Addr {
    inner: [u8; 16],
}

impl Ipv6Addr {
    /// The unspecified IPv6 address, i.e., `::` or all zeros.
    pub const ANY_ADDR: Self = Self { inner: [0; 16] };

    /// The All-Routers multicast address, used in the Neighbor Discovery
    /// Protocol.
    pub const ALL_ROUTERS: Self =
        Self::from_const([0xff02, 0, 0, 0, 0, 0, 0, 2]);

    /// The All-Nodes multicast address, used in the Neighbor Discovery
    /// Protocol.
    pub const ALL_NODES: Self = Self::from_const([0xff02, 0, 0, 0, 0, 0, 0, 1]);

    /// Generate an IPv6 address via an EUI-64 transform, from a MAC address.
    /// The generated address has link-local scope.
    ///
    /// See [RFC 4291] for details of the transformation applied.
    ///
    /// [RFC 4291]: https://www.rfc-editor.org/rfc/rfc4291#page-20
    pub fn from_eui64(mac: &MacAddr) -> Self {
        let mac = mac.bytes();
        // Invert the universal/local bit in the first octet of the MAC
        let mac0 = mac[0] ^ 0b10;
        let bytes: [u8; 16] = [
            0xfe, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, mac0, mac[1],
            mac[2], 0xff, 0xfe, mac[3], mac[4], mac[5],
        ];
        Self::from(bytes)
    }

    /// Return `true` if this is a multicast IPv6 address, and `false` otherwise
    pub const fn is_multicast(&self) -> bool {
        self.inner[0] == 0xFF
    }

    /// Return `true` if this is a unicast link-local address (`fe80::/10`).
    pub const fn is_link_local(&self) -> bool {
        self.inner[0] == 0xfe && (self.inner[1] & 0xc0) == 0x80
    }

    /// Return `true` if this is the unspecified address `::`.
    pub const fn is_unspecified(&self) -> bool {
        let mut i = 0;
        while i < 16 {
            if self.inner[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    /// Return `true` if the top three bits are `001`, the format
    /// prefix of aggregatable global unicast addresses (RFC 2374).
    /// Prefixes of this class always use a 64-bit interface
    /// identifier.
    pub const fn is_aggregatable_unicast(&self) -> bool {
        (self.inner[0] & 0xe0) == 0x20
    }

    /// Return the bytes of the address.
    pub fn bytes(&self) -> [u8; 16] {
        self.inner
    }

    /// Return the address after applying the network mask.
    pub fn mask(mut self, mask: u8) -> Result<Self, String> {
        if mask > 128 {
            return Err(format!("bad mask: {mask}"));
        }

        if mask == 128 {
            return Ok(self);
        }

        if mask == 0 {
            self.inner.fill(0);
            return Ok(self);
        }

        // The first `mask / 8` bytes stay as-is, byte N may need
        // partial masking, and the remaining bytes are zeroed.
        let mut byte_idx = usize::from(mask / 8);
        let partial = mask % 8;

        if partial > 0 {
            let bits = i8::MIN >> (partial - 1);
            self.inner[byte_idx] &= bits as u8;
            byte_idx += 1;
        }
        self.inner[byte_idx..].fill(0);

        Ok(self)
    }

    /// Apply a prefix length which is known to be valid.
    pub fn safe_mask(self, mask: Ipv6PrefixLen) -> Self {
        let netmask = u128::from(mask.to_netmask());
        Self::from(u128::from(self) & netmask)
    }

    /// Do `self` and `other` agree on the first `len` bits?
    pub fn prefix_eq(&self, other: &Ipv6Addr, len: Ipv6PrefixLen) -> bool {
        self.safe_mask(len) == other.safe_mask(len)
    }

    /// Combine the first `len` bits of `self` with the remaining
    /// (interface identifier) bits of `iid`.
    pub fn with_iid(&self, iid: &Ipv6Addr, len: Ipv6PrefixLen) -> Self {
        let mask = u128::from(len.to_netmask());
        Self::from((u128::from(*self) & mask) | (u128::from(*iid) & !mask))
    }

    pub const fn from_const(words: [u16; 8]) -> Self {
        let w0 = words[0].to_be_bytes();
        let w1 = words[1].to_be_bytes();
        let w2 = words[2].to_be_bytes();
        let w3 = words[3].to_be_bytes();
        let w4 = words[4].to_be_bytes();
        let w5 = words[5].to_be_bytes();
        let w6 = words[6].to_be_bytes();
        let w7 = words[7].to_be_bytes();
        Self {
            inner: [
                w0[0], w0[1], w1[0], w1[1], w2[0], w2[1], w3[0], w3[1], w4[0],
                w4[1], w5[0], w5[1], w6[0], w6[1], w7[0], w7[1],
            ],
        }
    }
}

impl Display for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", core::net::Ipv6Addr::from(self.inner))
    }
}

impl Debug for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv6Addr {{ inner: {self} }}")
    }
}

impl From<core::net::Ipv6Addr> for Ipv6Addr {
    fn from(ip6: core::net::Ipv6Addr) -> Self {
        Self { inner: ip6.octets() }
    }
}

impl From<Ipv6Addr> for core::net::Ipv6Addr {
    fn from(ip6: Ipv6Addr) -> Self {
        Self::from(ip6.inner)
    }
}

impl From<&[u8; 16]> for Ipv6Addr {
    fn from(bytes: &[u8; 16]) -> Ipv6Addr {
        Ipv6Addr { inner: *bytes }
    }
}

impl From<[u8; 16]> for Ipv6Addr {
    fn from(bytes: [u8; 16]) -> Ipv6Addr {
        Ipv6Addr { inner: bytes }
    }
}

impl From<Ipv6Addr> for u128 {
    fn from(ip: Ipv6Addr) -> u128 {
        u128::from_be_bytes(ip.bytes())
    }
}

impl From<u128> for Ipv6Addr {
    fn from(i: u128) -> Ipv6Addr {
        Self::from(i.to_be_bytes())
    }
}

impl From<[u16; 8]> for Ipv6Addr {
    fn from(words: [u16; 8]) -> Ipv6Addr {
        Self::from_const(words)
    }
}

impl FromStr for Ipv6Addr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        val.parse::<core::net::Ipv6Addr>()
            .map(Self::from)
            .map_err(|_| format!("invalid IPv6 address: {val}"))
    }
}

impl AsRef<[u8]> for Ipv6Addr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl Deref for Ipv6Addr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

// Human-readable formats (TOML scenario files, JSON) carry the textual
// form; binary formats (postcard) carry the raw octets.
impl Serialize for Ipv6Addr {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.collect_str(self)
        } else {
            self.inner.serialize(s)
        }
    }
}

impl<'de> Deserialize<'de> for Ipv6Addr {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            let s = String::deserialize(d)?;
            s.parse().map_err(D::Error::custom)
        } else {
            <[u8; 16]>::deserialize(d).map(Self::from)
        }
    }
}

/// A valid IPv6 prefix length.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Ord,
    PartialOrd,
)]
pub struct Ipv6PrefixLen(u8);

impl TryFrom<u8> for Ipv6PrefixLen {
    type Error = String;

    fn try_from(p: u8) -> Result<Self, Self::Error> {
        Self::new(p)
    }
}

impl Ipv6PrefixLen {
    pub const NETMASK_NONE: Self = Self(0);
    pub const NETMASK_ALL: Self = Self(128);

    pub fn new(prefix_len: u8) -> result::Result<Self, String> {
        if prefix_len > 128 {
            return Err(format!("bad IPv6 prefix length: {prefix_len}"));
        }

        Ok(Self(prefix_len))
    }

    pub fn val(&self) -> u8 {
        self.0
    }

    /// Return the network mask with the first `self` bits set.
    pub fn to_netmask(self) -> Ipv6Addr {
        let mask = match self.0 {
            0 => 0,
            n => u128::MAX << (128 - u32::from(n)),
        };
        Ipv6Addr::from(mask)
    }

    /// Convert a contiguous network mask into a prefix length.
    /// Returns `None` for a non-contiguous mask.
    pub fn from_netmask(mask: Ipv6Addr) -> Option<Self> {
        let m = u128::from(mask);
        let len = m.leading_ones();
        if m.checked_shl(len).unwrap_or(0) != 0 {
            return None;
        }
        Some(Self(len as u8))
    }
}

/// An IPv6 CIDR.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Ipv6Cidr {
    ip: Ipv6Addr,
    prefix_len: Ipv6PrefixLen,
}

impl core::cmp::Ord for Ipv6Cidr {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        if self.ip != other.ip {
            self.ip.cmp(&other.ip)
        } else {
            self.prefix_len.cmp(&other.prefix_len)
        }
    }
}

impl core::cmp::PartialOrd for Ipv6Cidr {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Ipv6Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (ip, prefix_len) = self.parts();
        write!(f, "{ip}/{}", prefix_len.val())
    }
}

impl FromStr for Ipv6Cidr {
    type Err = String;

    /// Convert a string like "2001:db8::/64" into an [`Ipv6Cidr`].
    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let (ip_s, prefix_s) = match val.split_once('/') {
            Some(v) => v,
            None => return Err("no '/' found".to_string()),
        };

        let ip = ip_s
            .parse::<Ipv6Addr>()
            .map_err(|_| format!("Bad IP address component: '{ip_s}'"))?;

        let prefix_len = match prefix_s.parse::<u8>() {
            Ok(v) => v,
            Err(e) => {
                return Err(format!("bad prefix length: {e}"));
            }
        };

        Ipv6Cidr::new_checked(ip, prefix_len)
    }
}

impl Serialize for Ipv6Cidr {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.collect_str(self)
        } else {
            (self.ip, self.prefix_len).serialize(s)
        }
    }
}

impl<'de> Deserialize<'de> for Ipv6Cidr {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            let s = String::deserialize(d)?;
            s.parse().map_err(D::Error::custom)
        } else {
            let (ip, prefix_len) =
                <(Ipv6Addr, Ipv6PrefixLen)>::deserialize(d)?;
            Ipv6Cidr::new_checked(ip, prefix_len.val())
                .map_err(D::Error::custom)
        }
    }
}

impl Ipv6Cidr {
    /// The IPv6 link-local prefix, `fe80::/64`.
    pub const LINK_LOCAL: Self = Self {
        ip: Ipv6Addr::from_const([0xfe80, 0, 0, 0, 0, 0, 0, 0]),
        prefix_len: Ipv6PrefixLen(64),
    };

    /// The default route, `::/0`.
    pub const DEFAULT: Self =
        Self { ip: Ipv6Addr::ANY_ADDR, prefix_len: Ipv6PrefixLen(0) };

    /// Create a CIDR, zeroing any host bits in `ip`.
    pub fn new(ip: Ipv6Addr, prefix_len: Ipv6PrefixLen) -> Self {
        let ip = ip.safe_mask(prefix_len);
        Ipv6Cidr { ip, prefix_len }
    }

    pub fn new_checked(
        ip: Ipv6Addr,
        prefix_len: u8,
    ) -> result::Result<Self, String> {
        let pl = Ipv6PrefixLen::new(prefix_len)?;
        Ok(Self::new(ip, pl))
    }

    pub fn parts(&self) -> (Ipv6Addr, Ipv6PrefixLen) {
        (self.ip, self.prefix_len)
    }

    /// Return `true` if this is the default route subnet
    pub fn is_default(&self) -> bool {
        let (ip, prefix_len) = self.parts();
        ip == Ipv6Addr::ANY_ADDR && prefix_len.val() == 0
    }

    /// Return the prefix length (netmask).
    pub fn prefix_len(self) -> u8 {
        self.prefix_len.0
    }

    /// Return the network address of this CIDR.
    pub fn ip(&self) -> Ipv6Addr {
        self.ip
    }

    /// Return the network mask of this CIDR.
    pub fn netmask(&self) -> Ipv6Addr {
        self.prefix_len.to_netmask()
    }

    /// Is this `ip` a member of the CIDR?
    pub fn is_member(&self, ip: Ipv6Addr) -> bool {
        ip.safe_mask(self.prefix_len) == self.ip
    }
}
