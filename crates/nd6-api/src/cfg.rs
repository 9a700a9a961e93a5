// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Tunables for the router and prefix subsystem.

use super::IfIndex;
use super::mac::MacAddr;
use super::ndp::ND6_PRIV_MAX_DESYNC_FACTOR;
use super::ndp::ND6_PRIV_PREFERRED_LIFETIME;
use super::ndp::ND6_PRIV_VALID_LIFETIME;
use super::ndp::ND6_RECALC_REACHTM_INTERVAL;
use alloc::string::String;
use serde::Deserialize;
use serde::Serialize;

/// The default per-interface cap on routers and on prefixes.
pub const DEFAULT_MAX_IF_ENTRIES: i32 = 16;

/// Stack-wide knobs.
///
/// Every field has a default, so a configuration file only needs to
/// name the knobs it changes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct NdConfig {
    /// The node forwards packets, i.e. acts as a router. Router
    /// selection and RA processing are host-only behavior.
    pub forwarding: bool,

    /// Maximum number of default routers tracked per interface. A
    /// negative value means unlimited.
    pub max_if_defrouters: i32,

    /// Maximum number of prefixes tracked per interface. A negative
    /// value means unlimited.
    pub max_if_prefixes: i32,

    /// How often the randomized reachable time is recomputed, in
    /// seconds.
    pub recalc_reachtm_interval: u32,

    /// Honor the Default Router Preference field. When off, every
    /// router sorts as medium and the list is pure arrival order.
    pub rtpref: bool,

    /// Maximum valid lifetime of a temporary address, in seconds.
    pub temp_valid_lifetime: u32,

    /// Maximum preferred lifetime of a temporary address, in seconds.
    pub temp_preferred_lifetime: u32,

    /// Upper bound on the random desynchronization factor, in
    /// seconds.
    pub max_desync_factor: u32,

    /// Emit debug-class log messages.
    pub debug: bool,
}

impl Default for NdConfig {
    fn default() -> Self {
        Self {
            forwarding: false,
            max_if_defrouters: DEFAULT_MAX_IF_ENTRIES,
            max_if_prefixes: DEFAULT_MAX_IF_ENTRIES,
            recalc_reachtm_interval: ND6_RECALC_REACHTM_INTERVAL,
            rtpref: true,
            temp_valid_lifetime: ND6_PRIV_VALID_LIFETIME,
            temp_preferred_lifetime: ND6_PRIV_PREFERRED_LIFETIME,
            max_desync_factor: ND6_PRIV_MAX_DESYNC_FACTOR,
            debug: false,
        }
    }
}

impl NdConfig {
    /// Is `count` at or above a per-interface cap?
    pub fn at_cap(cap: i32, count: u32) -> bool {
        cap >= 0 && count >= cap as u32
    }
}

fn default_true() -> bool {
    true
}

/// The configuration of one interface, given when it is attached.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IfConfig {
    pub name: String,
    pub index: IfIndex,

    /// The link-layer address, if the link has one. When present a
    /// link-local address is derived from it at attach time.
    #[serde(default)]
    pub lladdr: Option<MacAddr>,

    /// The link MTU.
    pub mtu: u32,

    /// An administrative upper bound on the MTU learned from RAs. Zero
    /// means no override.
    #[serde(default)]
    pub maxmtu: u32,

    /// The interface is up and running.
    #[serde(default = "default_true")]
    pub running: bool,

    /// The interface performs IPv6 stateless autoconfiguration.
    #[serde(default = "default_true")]
    pub autoconf6: bool,

    /// Also generate temporary addresses.
    #[serde(default)]
    pub privacy: bool,

    /// The link needs a neighbor cache entry per destination, so
    /// on-link routes are installed as cloning routes.
    #[serde(default = "default_true")]
    pub need_cache: bool,
}

impl IfConfig {
    pub fn new(name: &str, index: IfIndex, lladdr: Option<MacAddr>) -> Self {
        Self {
            name: name.into(),
            index,
            lladdr,
            mtu: 1500,
            maxmtu: 0,
            running: true,
            autoconf6: true,
            privacy: false,
            need_cache: true,
        }
    }
}
