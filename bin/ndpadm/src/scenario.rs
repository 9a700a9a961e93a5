// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Scenario files.
//!
//! A scenario is a TOML document describing the subsystem tunables,
//! the interfaces attached at start, and a list of steps to replay:
//!
//! ```toml
//! [config]
//! rtpref = true
//!
//! [[interface]]
//! name = "em0"
//! index = 1
//! lladdr = "02:00:00:00:00:01"
//! mtu = 1500
//!
//! [[step]]
//! kind = "neighbor"
//! ifindex = 1
//! addr = "fe80::1"
//! reachable = true
//!
//! [[step]]
//! kind = "advert"
//! ifindex = 1
//! ra = { src = "fe80::1", router_lifetime = 1800 }
//!
//! [[step]]
//! kind = "tick"
//! secs = 600
//! ```

use nd6::api::IfConfig;
use nd6::api::IfIndex;
use nd6::api::Ipv6Addr;
use nd6::api::NdConfig;
use nd6::api::RouterAdvert;
use nd6::api::RouterSolicit;
use nd6::engine::ifnet::AddrConfig;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: NdConfig,

    #[serde(default, rename = "interface")]
    pub interfaces: Vec<IfConfig>,

    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

/// One event delivered to the subsystem during replay.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// A Router Advertisement arrives.
    Advert { ifindex: IfIndex, ra: RouterAdvert },

    /// A Router Solicitation arrives.
    Solicit { ifindex: IfIndex, rs: RouterSolicit },

    /// Advance the clock and fire the lifetime timer.
    Tick { secs: u64 },

    /// Fire the slow timer, which rerandomizes reachable times.
    SlowTimer,

    /// Fire the Router Solicitation timer.
    RsTimer,

    /// Change what neighbor unreachability detection knows about a
    /// neighbor. A neighbor going unreachable is also reported to the
    /// subsystem, which may pick another default router.
    Neighbor {
        ifindex: IfIndex,
        addr: Ipv6Addr,
        reachable: bool,
    },

    /// Bring an interface up or down.
    LinkState { ifindex: IfIndex, running: bool },

    Attach { interface: IfConfig },

    Detach { ifindex: IfIndex },

    /// Configure an address by hand.
    AddAddress { ifindex: IfIndex, address: AddrConfig },

    PurgeAddress { ifindex: IfIndex, addr: Ipv6Addr },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Advert { .. } => "advert",
            Self::Solicit { .. } => "solicit",
            Self::Tick { .. } => "tick",
            Self::SlowTimer => "slow_timer",
            Self::RsTimer => "rs_timer",
            Self::Neighbor { .. } => "neighbor",
            Self::LinkState { .. } => "link_state",
            Self::Attach { .. } => "attach",
            Self::Detach { .. } => "detach",
            Self::AddAddress { .. } => "add_address",
            Self::PurgeAddress { .. } => "purge_address",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nd6::api::PiFlags;

    const SCENARIO: &str = r#"
[config]
rtpref = false
max_if_prefixes = 4

[[interface]]
name = "em0"
index = 1
lladdr = "02:00:00:00:00:01"
mtu = 9000

[[step]]
kind = "advert"
ifindex = 1

[step.ra]
src = "fe80::1"
router_lifetime = 1800
flags = 8

[[step.ra.opts.prefixes]]
prefix = "2001:db8::"
prefix_len = 64
flags = "ONLINK | AUTO"
valid_lifetime = 86400
preferred_lifetime = 14400

[[step]]
kind = "tick"
secs = 60

[[step]]
kind = "rs_timer"

[[step]]
kind = "add_address"
ifindex = 1
address = { addr = "2001:db8:1::5", prefix_len = 64 }
"#;

    #[test]
    fn parse_scenario() {
        let sc = Scenario::parse(SCENARIO).unwrap();
        assert!(!sc.config.rtpref);
        assert_eq!(sc.config.max_if_prefixes, 4);
        // Unnamed knobs keep their defaults.
        assert!(!sc.config.forwarding);

        assert_eq!(sc.interfaces.len(), 1);
        let ifc = &sc.interfaces[0];
        assert_eq!(ifc.name, "em0");
        assert_eq!(ifc.mtu, 9000);
        assert!(ifc.running);
        assert!(ifc.autoconf6);

        assert_eq!(sc.steps.len(), 4);
        match &sc.steps[0] {
            Step::Advert { ifindex, ra } => {
                assert_eq!(*ifindex, 1);
                assert_eq!(ra.src, "fe80::1".parse::<Ipv6Addr>().unwrap());
                assert_eq!(ra.hop_limit, 255);
                assert_eq!(ra.flags, 8);
                let pi = &ra.opts.prefixes[0];
                assert_eq!(pi.flags, PiFlags::ONLINK | PiFlags::AUTO);
                assert_eq!(pi.prefix_len, 64);
            }
            step => panic!("expected advert, got {step:?}"),
        }
        assert!(matches!(sc.steps[1], Step::Tick { secs: 60 }));
        assert_eq!(sc.steps[2].kind(), "rs_timer");
        match &sc.steps[3] {
            Step::AddAddress { address, .. } => {
                assert_eq!(address.prefix_len, 64);
                assert_eq!(address.vltime, nd6::api::ND6_INFINITE_LIFETIME);
            }
            step => panic!("expected add_address, got {step:?}"),
        }
    }

    #[test]
    fn unknown_step() {
        let bad = "[[step]]\nkind = \"reboot\"\n";
        assert!(Scenario::parse(bad).is_err());
    }

    #[test]
    fn empty_scenario() {
        let sc = Scenario::parse("").unwrap();
        assert_eq!(sc.config, NdConfig::default());
        assert!(sc.interfaces.is_empty());
        assert!(sc.steps.is_empty());
    }
}
