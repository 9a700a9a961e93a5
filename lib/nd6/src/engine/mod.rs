// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The router and prefix subsystem.
//!
//! All state lives in one [`NdState`] behind the single coarse lock of
//! [`Nd`]. The operations are spread over the submodules as `impl
//! NdState` blocks, each taking a [`Ctx`] which carries the tunables,
//! the providers, and the current time.
//!
//! All code under this namespace is guarded by the `engine` feature
//! flag.

/// Log a debug-class message. These are only emitted when
/// [`NdConfig::debug`] is set.
macro_rules! nd6log {
    ($ctx:expr, $($arg:tt)*) => {
        if $ctx.cfg.debug {
            $ctx.note(&format!($($arg)*));
        }
    };
}

pub mod defrouter;
pub mod ifnet;
pub mod input;
pub mod ioctl;
pub mod lifetime;
pub mod onlink;
pub mod prefix;
pub mod slaac;
pub mod solicit;
pub mod task;
pub mod timer;

use crate::api::IfIndex;
use crate::api::NdConfig;
use crate::ddi::kstat;
use crate::ddi::kstat::KStatNamed;
use crate::ddi::kstat::KStatProvider;
use crate::ddi::kstat::KStatU64;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KMutexGuard;
use crate::ddi::time::Moment;
use crate::provider::LogLevel;
use crate::provider::Providers;
use alloc::collections::BTreeMap;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use defrouter::DefRouter;
use ifnet::Interface;
use kstat_macro::KStatProvider;
use prefix::NdPrefix;
use prefix::PrefixId;
use solicit::RsTimer;

/// Counters kept by the subsystem.
#[derive(KStatProvider)]
pub struct NdStats {
    /// Router Advertisements accepted for processing.
    pub ra_in: KStatU64,
    /// Router Advertisements dropped as malformed.
    pub ra_bad: KStatU64,
    /// Router Advertisements ignored by configuration.
    pub ra_ignored: KStatU64,
    pub rs_in: KStatU64,
    pub rs_bad: KStatU64,
    pub rs_ignored: KStatU64,
    pub rs_out: KStatU64,
    /// Prefix Information options skipped as invalid.
    pub pi_bad: KStatU64,
    /// MTU options rejected.
    pub mtu_bad: KStatU64,
    /// New routers refused at the per-interface cap.
    pub router_cap_drop: KStatU64,
    /// New prefixes refused at the per-interface cap.
    pub prefix_cap_drop: KStatU64,
    /// Autoconfigured addresses the address manager refused.
    pub addr_add_fail: KStatU64,
}

/// The per-call context handed to every state operation.
pub struct Ctx<'a> {
    pub cfg: &'a NdConfig,
    pub pv: &'a Providers,
    pub now: Moment,
}

impl Ctx<'_> {
    pub fn note(&self, msg: &str) {
        self.pv.log.log(LogLevel::Note, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.pv.log.log(LogLevel::Warn, msg);
    }

    pub fn error(&self, msg: &str) {
        self.pv.log.log(LogLevel::Error, msg);
    }

    /// Decrement a per-interface counter, refusing to wrap below zero.
    pub(crate) fn counter_dec(
        &self,
        counter: &mut u32,
        what: &str,
        ifname: &str,
    ) {
        match counter.checked_sub(1) {
            Some(v) => *counter = v,
            None => {
                self.warn(&format!("{what} on {ifname} went negative"));
            }
        }
    }
}

/// Everything guarded by the subsystem lock.
pub struct NdState {
    pub(crate) ifaces: BTreeMap<IfIndex, Interface>,
    /// The default router list, highest preference first and in order
    /// of arrival within a preference.
    pub(crate) routers: Vec<DefRouter>,
    /// The prefix list, newest first.
    pub(crate) prefixes: Vec<NdPrefix>,
    next_prefix_id: u64,
    /// Prefixes waiting for address autoconfiguration.
    pub(crate) tasks: VecDeque<PrefixId>,
    pub(crate) rs: RsTimer,
    pub(crate) stats: KStatNamed<NdStats>,
}

impl NdState {
    fn new() -> Result<Self, kstat::Error> {
        Ok(Self {
            ifaces: BTreeMap::new(),
            routers: Vec::new(),
            prefixes: Vec::new(),
            next_prefix_id: 1,
            tasks: VecDeque::new(),
            rs: RsTimer::default(),
            stats: KStatNamed::new("nd6", "rtr", NdStats::new())?,
        })
    }

    pub(crate) fn alloc_prefix_id(&mut self) -> PrefixId {
        let id = PrefixId(self.next_prefix_id);
        self.next_prefix_id += 1;
        id
    }
}

/// The Neighbor Discovery router and prefix subsystem.
///
/// One instance serves every interface of a stack. Every public
/// operation takes the lock for its duration, except where noted: the
/// address manager is always called with the lock dropped.
pub struct Nd {
    cfg: NdConfig,
    pv: Providers,
    state: KMutex<NdState>,
}

impl Nd {
    pub fn new(cfg: NdConfig, pv: Providers) -> Result<Self, kstat::Error> {
        Ok(Self { cfg, pv, state: KMutex::new(NdState::new()?) })
    }

    pub fn cfg(&self) -> &NdConfig {
        &self.cfg
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> NdStatsSnap {
        self.state.lock().stats.snapshot()
    }

    fn ctx(&self) -> Ctx<'_> {
        Ctx { cfg: &self.cfg, pv: &self.pv, now: self.pv.clock.now() }
    }

    /// Take the subsystem lock along with a fresh context.
    fn lock(&self) -> (KMutexGuard<'_, NdState>, Ctx<'_>) {
        let state = self.state.lock();
        (state, self.ctx())
    }

    /// Recompute the attachment of every prefix and address.
    pub fn onlink_check(&self) {
        let (mut st, ctx) = self.lock();
        st.pfxlist_onlink_check(&ctx);
    }

    /// Rerun default router selection.
    pub fn defrouter_select(&self) {
        let (mut st, ctx) = self.lock();
        st.defrouter_select(&ctx);
    }
}
