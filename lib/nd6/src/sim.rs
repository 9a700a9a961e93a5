// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! In-memory collaborators for running the subsystem outside of a
//! network stack.
//!
//! Every collaborator is a cheap handle around shared state: clone it,
//! hand one copy to [`Providers`], and keep the other to steer and
//! inspect the simulation from a test.

use crate::api::IfIndex;
use crate::api::Ipv6Addr;
use crate::api::Ipv6Cidr;
use crate::api::NdConfig;
use crate::ddi::kstat;
use crate::ddi::sync::KMutex;
use crate::ddi::time::Clock;
use crate::ddi::time::Moment;
use crate::engine::Nd;
use crate::provider::AddrError;
use crate::provider::AddrManager;
use crate::provider::AddrReq;
use crate::provider::LladdrSource;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::provider::NeighborCache;
use crate::provider::PacketOutput;
use crate::provider::Providers;
use crate::provider::RandomSource;
use crate::provider::RouteError;
use crate::provider::RouteReq;
use crate::provider::RouteTable;
use crate::provider::TaskNotify;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

/// The time the simulation starts at.
pub const SIM_START: Moment = Moment::from_secs(1_000);

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Moment) -> Self {
        Self { now: Arc::new(AtomicU64::new(start.secs())) }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: Moment) {
        self.now.store(now.secs(), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(SIM_START)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Moment {
        Moment::from_secs(self.now.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
struct RoutesInner {
    routes: Vec<RouteReq>,
    flushed: Vec<(Ipv6Addr, IfIndex)>,
    fail_add: Option<RouteError>,
    fail_delete: Option<RouteError>,
    adds: u64,
}

/// A forwarding table.
#[derive(Clone, Default)]
pub struct SimRoutes {
    inner: Arc<KMutex<RoutesInner>>,
}

impl SimRoutes {
    pub fn routes(&self) -> Vec<RouteReq> {
        self.inner.lock().routes.clone()
    }

    /// The installed default routes.
    pub fn default_routes(&self) -> Vec<RouteReq> {
        self.routes_to(&Ipv6Cidr::DEFAULT)
    }

    pub fn routes_to(&self, dst: &Ipv6Cidr) -> Vec<RouteReq> {
        self.inner
            .lock()
            .routes
            .iter()
            .filter(|r| r.dst == *dst)
            .cloned()
            .collect()
    }

    /// Every `(gateway, ifindex)` passed to `flush_gateway()`, in
    /// order.
    pub fn flushed(&self) -> Vec<(Ipv6Addr, IfIndex)> {
        self.inner.lock().flushed.clone()
    }

    /// The number of successful adds.
    pub fn add_count(&self) -> u64 {
        self.inner.lock().adds
    }

    /// Fail every add with `err` until cleared.
    pub fn fail_adds(&self, err: Option<RouteError>) {
        self.inner.lock().fail_add = err;
    }

    /// Fail every delete with `err` until cleared.
    pub fn fail_deletes(&self, err: Option<RouteError>) {
        self.inner.lock().fail_delete = err;
    }
}

impl RouteTable for SimRoutes {
    fn add(&self, req: &RouteReq) -> Result<(), RouteError> {
        let mut inner = self.inner.lock();
        if let Some(err) = &inner.fail_add {
            return Err(err.clone());
        }

        if inner
            .routes
            .iter()
            .any(|r| r.dst == req.dst && r.gateway == req.gateway)
        {
            return Err(RouteError::Exists);
        }

        inner.routes.push(req.clone());
        inner.adds += 1;
        Ok(())
    }

    fn delete(
        &self,
        dst: Ipv6Cidr,
        gateway: Option<Ipv6Addr>,
        ifindex: IfIndex,
    ) -> Result<(), RouteError> {
        let mut inner = self.inner.lock();
        if let Some(err) = &inner.fail_delete {
            return Err(err.clone());
        }

        let pos = inner.routes.iter().position(|r| {
            r.dst == dst
                && r.ifindex == ifindex
                && gateway.is_none_or(|gw| gw == r.gateway)
        });

        match pos {
            Some(pos) => {
                inner.routes.remove(pos);
                Ok(())
            }

            None => Err(RouteError::NotFound),
        }
    }

    fn flush_gateway(&self, gateway: Ipv6Addr, ifindex: IfIndex) {
        self.inner.lock().flushed.push((gateway, ifindex));
    }
}

/// What the neighbor cache was told by an RA or RS.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Learned {
    pub ifindex: IfIndex,
    pub addr: Ipv6Addr,
    pub lladdr: Option<Vec<u8>>,
    pub source: LladdrSource,
}

#[derive(Default)]
struct NeighborsInner {
    reachable: BTreeSet<(IfIndex, Ipv6Addr)>,
    learned: Vec<Learned>,
}

/// A neighbor cache. Neighbors are unreachable until marked otherwise.
#[derive(Clone, Default)]
pub struct SimNeighbors {
    inner: Arc<KMutex<NeighborsInner>>,
}

impl SimNeighbors {
    pub fn set_reachable(&self, ifindex: IfIndex, addr: Ipv6Addr, up: bool) {
        let mut inner = self.inner.lock();
        if up {
            inner.reachable.insert((ifindex, addr));
        } else {
            inner.reachable.remove(&(ifindex, addr));
        }
    }

    pub fn learned(&self) -> Vec<Learned> {
        self.inner.lock().learned.clone()
    }
}

impl NeighborCache for SimNeighbors {
    fn is_probably_reachable(
        &self,
        addr: Ipv6Addr,
        ifindex: IfIndex,
    ) -> bool {
        self.inner.lock().reachable.contains(&(ifindex, addr))
    }

    fn learn_lladdr(
        &self,
        ifindex: IfIndex,
        addr: Ipv6Addr,
        lladdr: Option<&[u8]>,
        source: LladdrSource,
    ) {
        self.inner.lock().learned.push(Learned {
            ifindex,
            addr,
            lladdr: lladdr.map(|b| b.to_vec()),
            source,
        });
    }
}

#[derive(Default)]
struct AddrsInner {
    addrs: BTreeMap<(IfIndex, Ipv6Addr), AddrReq>,
    purged: Vec<(IfIndex, Ipv6Addr)>,
    fail: BTreeSet<Ipv6Addr>,
    fail_all: bool,
    calls: u64,
}

/// An interface address manager.
#[derive(Clone, Default)]
pub struct SimAddrs {
    inner: Arc<KMutex<AddrsInner>>,
}

impl SimAddrs {
    /// The addresses currently configured on `ifindex`.
    pub fn addrs(&self, ifindex: IfIndex) -> Vec<AddrReq> {
        self.inner
            .lock()
            .addrs
            .values()
            .filter(|a| a.ifindex == ifindex)
            .cloned()
            .collect()
    }

    pub fn get(&self, ifindex: IfIndex, addr: Ipv6Addr) -> Option<AddrReq> {
        self.inner.lock().addrs.get(&(ifindex, addr)).cloned()
    }

    pub fn purged(&self) -> Vec<(IfIndex, Ipv6Addr)> {
        self.inner.lock().purged.clone()
    }

    /// Refuse to create `addr`.
    pub fn fail_addr(&self, addr: Ipv6Addr) {
        self.inner.lock().fail.insert(addr);
    }

    /// Refuse every request while set.
    pub fn fail_all(&self, fail: bool) {
        self.inner.lock().fail_all = fail;
    }

    /// The number of `update_addr()` calls, successful or not.
    pub fn update_calls(&self) -> u64 {
        self.inner.lock().calls
    }
}

impl AddrManager for SimAddrs {
    fn update_addr(&self, req: &AddrReq) -> Result<(), AddrError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        if inner.fail_all || inner.fail.contains(&req.addr) {
            return Err(AddrError::Other("injected failure".to_string()));
        }

        inner.addrs.insert((req.ifindex, req.addr), req.clone());
        Ok(())
    }

    fn purge_addr(&self, ifindex: IfIndex, addr: Ipv6Addr) {
        let mut inner = self.inner.lock();
        inner.addrs.remove(&(ifindex, addr));
        inner.purged.push((ifindex, addr));
    }
}

/// Collects transmitted packets.
#[derive(Clone, Default)]
pub struct CaptureOutput {
    pkts: Arc<KMutex<Vec<(IfIndex, Vec<u8>)>>>,
}

impl CaptureOutput {
    /// Drain the packets sent so far.
    pub fn take(&self) -> Vec<(IfIndex, Vec<u8>)> {
        core::mem::take(&mut *self.pkts.lock())
    }
}

impl PacketOutput for CaptureOutput {
    fn send(&self, ifindex: IfIndex, pkt: Vec<u8>) {
        self.pkts.lock().push((ifindex, pkt));
    }
}

/// A predictable "random" source: a counter.
#[derive(Clone)]
pub struct SeqRandom {
    next: Arc<AtomicU32>,
}

impl SeqRandom {
    pub fn new(seed: u32) -> Self {
        Self { next: Arc::new(AtomicU32::new(seed)) }
    }
}

impl Default for SeqRandom {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RandomSource for SeqRandom {
    fn next_u32(&self) -> u32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    fn fill_bytes(&self, buf: &mut [u8]) {
        for b in buf {
            *b = self.next_u32() as u8;
        }
    }
}

/// Prints like [`crate::provider::PrintlnLog`] while keeping every
/// line for later inspection.
#[derive(Clone, Default)]
pub struct CaptureLog {
    lines: Arc<KMutex<Vec<(LogLevel, String)>>>,
}

impl CaptureLog {
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }

    /// The number of lines logged at `level`.
    pub fn count(&self, level: LogLevel) -> usize {
        self.lines.lock().iter().filter(|(l, _)| *l == level).count()
    }

    /// Was something containing `needle` logged at `level`?
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

impl LogProvider for CaptureLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
        self.lines.lock().push((level, msg.to_string()));
    }
}

/// Counts how often deferred work was announced.
#[derive(Clone, Default)]
pub struct CountingNotify {
    kicks: Arc<AtomicU64>,
}

impl CountingNotify {
    pub fn kicks(&self) -> u64 {
        self.kicks.load(Ordering::SeqCst)
    }
}

impl TaskNotify for CountingNotify {
    fn kick(&self) {
        self.kicks.fetch_add(1, Ordering::SeqCst);
    }
}

/// One of every simulated collaborator.
#[derive(Clone, Default)]
pub struct SimStack {
    pub clock: ManualClock,
    pub routes: SimRoutes,
    pub neighbors: SimNeighbors,
    pub addrs: SimAddrs,
    pub output: CaptureOutput,
    pub random: SeqRandom,
    pub log: CaptureLog,
    pub notify: CountingNotify,
}

impl SimStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn providers(&self) -> Providers {
        Providers {
            log: Box::new(self.log.clone()),
            clock: Box::new(self.clock.clone()),
            routes: Box::new(self.routes.clone()),
            neighbors: Box::new(self.neighbors.clone()),
            addrs: Box::new(self.addrs.clone()),
            output: Box::new(self.output.clone()),
            random: Box::new(self.random.clone()),
            notify: Box::new(self.notify.clone()),
        }
    }

    /// A subsystem wired to this simulation.
    pub fn nd(&self, cfg: NdConfig) -> Result<Nd, kstat::Error> {
        Nd::new(cfg, self.providers())
    }
}
