// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv6 Neighbor Discovery administration library.
//!
//! There is no control node to open. Instead [`NdpAdm`] wires the
//! subsystem to the simulated stack, replays a [`Scenario`] against
//! it, and then issues administrative commands across the same
//! postcard-encoded boundary a driver would expose.

pub mod scenario;

use nd6::api::CmdOk;
use nd6::api::DumpPrefixesReq;
use nd6::api::DumpPrefixesResp;
use nd6::api::DumpRoutersReq;
use nd6::api::DumpRoutersResp;
use nd6::api::DumpStatsResp;
use nd6::api::GetIfInfoReq;
use nd6::api::GetIfInfoResp;
use nd6::api::IfIndex;
use nd6::api::NdCmd;
use nd6::api::NdConfig;
use nd6::api::NdError;
use nd6::api::NdIfFlags;
use nd6::api::NoResp;
use nd6::api::SetIfFlagsReq;
use nd6::engine::Nd;
use nd6::engine::ifnet::AddrInfo;
use nd6::engine::input::NdInputResult;
use nd6::provider::LogLevel;
use nd6::provider::LogProvider;
use nd6::provider::RouteReq;
use nd6::sim::SimStack;
pub use scenario::Scenario;
pub use scenario::Step;
use serde::Serialize;
use serde::de::DeserializeOwned;
use slog::Drain;
use slog::Logger;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read scenario {path}: {err}")]
    Io { path: PathBuf, err: std::io::Error },

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to create subsystem: {0}")]
    Init(String),

    #[error("step {index} ({kind}) failed: {err}")]
    Step { index: usize, kind: &'static str, err: NdError },

    #[error("failed to serialize request for {0:?}: {1}")]
    ReqSer(NdCmd, postcard::Error),

    #[error("failed to deserialize response for {0:?}: {1}")]
    RespDeser(NdCmd, postcard::Error),

    #[error("command {0:?} failed: {1}")]
    CommandError(NdCmd, NdError),
}

/// Route the subsystem's log messages into a [`Logger`].
pub struct SlogLog(Logger);

impl SlogLog {
    pub fn new(log: Logger) -> Self {
        Self(log)
    }
}

impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => info!(self.0, "{}", msg),
            LogLevel::Warn => warn!(self.0, "{}", msg),
            LogLevel::Error => error!(self.0, "{}", msg),
        }
    }
}

/// A terminal logger filtered by `RUST_LOG`.
pub fn term_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "ndpadm"))
}

/// The handle used to administer a simulated subsystem.
pub struct NdpAdm {
    sim: SimStack,
    nd: Nd,
    log: Logger,
}

impl NdpAdm {
    /// Create a subsystem with no interfaces attached.
    pub fn new(cfg: NdConfig, log: Logger) -> Result<Self, Error> {
        let sim = SimStack::new();
        let mut pv = sim.providers();
        pv.log = Box::new(SlogLog::new(log.new(o!("component" => "nd6"))));
        let nd = Nd::new(cfg, pv).map_err(|e| Error::Init(e.to_string()))?;
        Ok(Self { sim, nd, log })
    }

    /// Load a scenario file, attach its interfaces, and replay its
    /// steps.
    pub fn load(path: &Path, log: Logger) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Io { path: path.to_path_buf(), err })?;
        Self::from_scenario(&Scenario::parse(&text)?, log)
    }

    pub fn from_scenario(sc: &Scenario, log: Logger) -> Result<Self, Error> {
        let adm = Self::new(sc.config.clone(), log)?;
        for (index, ifc) in sc.interfaces.iter().enumerate() {
            adm.nd.ifattach(ifc.clone()).map_err(|err| Error::Step {
                index,
                kind: "attach",
                err,
            })?;
        }
        for (index, step) in sc.steps.iter().enumerate() {
            adm.replay(step).map_err(|err| Error::Step {
                index,
                kind: step.kind(),
                err,
            })?;
        }
        Ok(adm)
    }

    /// Deliver one step. Address tasks queued by the step are run
    /// before returning.
    pub fn replay(&self, step: &Step) -> Result<(), NdError> {
        let log = self.log.new(o!("step" => step.kind()));
        match step {
            Step::Advert { ifindex, ra } => {
                let res = self.nd.ra_input(*ifindex, ra);
                log_input(&log, *ifindex, res);
            }

            Step::Solicit { ifindex, rs } => {
                let res = self.nd.rs_input(*ifindex, rs);
                log_input(&log, *ifindex, res);
            }

            Step::Tick { secs } => {
                self.sim.clock.advance(*secs);
                self.nd.timer();
                debug!(log, "timer fired"; "advance" => secs);
            }

            Step::SlowTimer => {
                let next = self.nd.slowtimo();
                debug!(log, "slow timer fired"; "next" => next);
            }

            Step::RsTimer => {
                let next = self.nd.rs_timer();
                let sent = self.sim.output.take();
                info!(log, "solicitations sent";
                    "count" => sent.len(), "next" => ?next);
            }

            Step::Neighbor { ifindex, addr, reachable } => {
                self.sim.neighbors.set_reachable(*ifindex, *addr, *reachable);
                if !reachable {
                    self.nd.router_unreachable(*addr, *ifindex);
                }
            }

            Step::LinkState { ifindex, running } => {
                self.nd.set_link_state(*ifindex, *running)?;
            }

            Step::Attach { interface } => {
                self.nd.ifattach(interface.clone())?;
            }

            Step::Detach { ifindex } => self.nd.ifdetach(*ifindex)?,

            Step::AddAddress { ifindex, address } => {
                self.nd.add_address(*ifindex, address)?;
            }

            Step::PurgeAddress { ifindex, addr } => {
                self.nd.purge_address(*ifindex, *addr)?;
            }
        }

        if self.nd.tasks_pending() {
            let ran = self.nd.run_tasks();
            debug!(log, "address tasks run"; "count" => ran);
        }
        Ok(())
    }

    /// Send a command across the command boundary and decode the
    /// response.
    pub fn run_cmd<T, R>(&self, cmd: NdCmd, req: Option<&R>) -> Result<T, Error>
    where
        T: CmdOk + DeserializeOwned,
        R: Serialize,
    {
        let req = match req {
            Some(req) => postcard::to_allocvec(req)
                .map_err(|e| Error::ReqSer(cmd, e))?,
            None => Vec::new(),
        };
        let resp = self
            .nd
            .handle_cmd(cmd, &req)
            .map_err(|e| Error::CommandError(cmd, e))?;
        postcard::from_bytes(&resp).map_err(|e| Error::RespDeser(cmd, e))
    }

    pub fn dump_routers(
        &self,
        ifindex: Option<IfIndex>,
    ) -> Result<DumpRoutersResp, Error> {
        let req = DumpRoutersReq { ifindex };
        self.run_cmd(NdCmd::DumpRouters, Some(&req))
    }

    pub fn dump_prefixes(
        &self,
        ifindex: Option<IfIndex>,
    ) -> Result<DumpPrefixesResp, Error> {
        let req = DumpPrefixesReq { ifindex };
        self.run_cmd(NdCmd::DumpPrefixes, Some(&req))
    }

    pub fn get_ifinfo(&self, ifindex: IfIndex) -> Result<GetIfInfoResp, Error> {
        let req = GetIfInfoReq { ifindex };
        self.run_cmd(NdCmd::GetIfInfo, Some(&req))
    }

    pub fn set_ifflags(
        &self,
        ifindex: IfIndex,
        flags: NdIfFlags,
    ) -> Result<NoResp, Error> {
        let req = SetIfFlagsReq { ifindex, flags };
        self.run_cmd(NdCmd::SetIfFlags, Some(&req))
    }

    /// Retract the installed default route and select again.
    pub fn sync_routers(&self) -> Result<NoResp, Error> {
        self.run_cmd(NdCmd::SyncRouters, None::<&()>)
    }

    /// Remove every prefix but the link-local ones, along with the
    /// addresses autoconfigured from them.
    pub fn flush_prefixes(&self) -> Result<NoResp, Error> {
        self.run_cmd(NdCmd::FlushPrefixes, None::<&()>)
    }

    pub fn flush_routers(&self) -> Result<NoResp, Error> {
        self.run_cmd(NdCmd::FlushRouters, None::<&()>)
    }

    pub fn dump_stats(&self) -> Result<DumpStatsResp, Error> {
        self.run_cmd(NdCmd::DumpStats, None::<&()>)
    }

    /// The simulated forwarding table.
    pub fn routes(&self) -> Vec<RouteReq> {
        self.sim.routes.routes()
    }

    pub fn addrs(&self, ifindex: IfIndex) -> Result<Vec<AddrInfo>, Error> {
        self.nd
            .addrs(ifindex)
            .map_err(|e| Error::CommandError(NdCmd::GetIfInfo, e))
    }
}

fn log_input(log: &Logger, ifindex: IfIndex, res: NdInputResult) {
    match res {
        NdInputResult::Processed => {
            debug!(log, "processed"; "ifindex" => ifindex)
        }
        res => info!(log, "not processed";
            "ifindex" => ifindex, "result" => ?res),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nd6::api::Ipv6Addr;
    use nd6::api::PrefixState;

    const TWO_ROUTERS: &str = r#"
[[interface]]
name = "em0"
index = 1
lladdr = "02:00:00:00:00:01"
mtu = 1500

[[step]]
kind = "neighbor"
ifindex = 1
addr = "fe80::1"
reachable = true

[[step]]
kind = "neighbor"
ifindex = 1
addr = "fe80::2"
reachable = true

[[step]]
kind = "advert"
ifindex = 1

[step.ra]
src = "fe80::1"
router_lifetime = 1800

[[step.ra.opts.prefixes]]
prefix = "2001:db8::"
prefix_len = 64
flags = "ONLINK | AUTO"
valid_lifetime = 86400
preferred_lifetime = 14400

[[step]]
kind = "advert"
ifindex = 1
ra = { src = "fe80::2", router_lifetime = 1800 }
"#;

    fn discard() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn adm() -> NdpAdm {
        let sc = Scenario::parse(TWO_ROUTERS).unwrap();
        NdpAdm::from_scenario(&sc, discard()).unwrap()
    }

    fn ip(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    fn replay_scenario() {
        let adm = adm();

        let routers = adm.dump_routers(None).unwrap().routers;
        let addrs: Vec<_> = routers.iter().map(|dr| dr.addr).collect();
        assert_eq!(addrs, vec![ip("fe80::1"), ip("fe80::2")]);
        assert!(routers[0].installed);
        assert!(!routers[1].installed);

        let prefixes = adm.dump_prefixes(Some(1)).unwrap().prefixes;
        let pfx = prefixes
            .iter()
            .find(|p| p.prefix == "2001:db8::/64".parse().unwrap())
            .unwrap();
        assert_eq!(pfx.state, PrefixState::OnlinkAttached);

        // The autoconfigured address was created during replay.
        let want = ip("2001:db8::ff:fe00:1");
        assert!(adm.addrs(1).unwrap().iter().any(|a| a.addr == want));
        assert!(adm.routes().iter().any(|r| r.gateway == ip("fe80::1")));
    }

    #[test]
    fn failover_step() {
        let adm = adm();
        let step = Step::Neighbor {
            ifindex: 1,
            addr: ip("fe80::1"),
            reachable: false,
        };
        adm.replay(&step).unwrap();
        let routers = adm.dump_routers(Some(1)).unwrap().routers;
        let installed: Vec<_> =
            routers.iter().filter(|dr| dr.installed).collect();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].addr, ip("fe80::2"));
    }

    #[test]
    fn flush_commands() {
        let adm = adm();
        adm.flush_routers().unwrap();
        assert!(adm.dump_routers(None).unwrap().routers.is_empty());

        adm.flush_prefixes().unwrap();
        let left = adm.dump_prefixes(None).unwrap().prefixes;
        assert!(left.iter().all(|p| p.prefix.ip().is_link_local()));

        let stats = adm.dump_stats().unwrap().stats;
        assert!(stats.contains(&("ra_in".to_string(), 2)));
    }

    #[test]
    fn ifinfo_and_flags() {
        let adm = adm();
        let info = adm.get_ifinfo(1).unwrap();
        assert_eq!(info.name, "em0");
        assert!(info.info.flags.contains(NdIfFlags::ACCEPT_RTADV));

        adm.set_ifflags(1, NdIfFlags::PERFORMNUD).unwrap();
        let info = adm.get_ifinfo(1).unwrap();
        assert_eq!(info.info.flags, NdIfFlags::PERFORMNUD);

        match adm.get_ifinfo(9) {
            Err(Error::CommandError(NdCmd::GetIfInfo, e)) => {
                assert_eq!(e, NdError::IfNotFound(9));
            }
            res => panic!("expected IfNotFound, got {res:?}"),
        }
    }

    #[test]
    fn demo_scenario() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../demos/two-routers.toml");
        let adm = NdpAdm::load(&path, discard()).unwrap();

        let routers = adm.dump_routers(None).unwrap().routers;
        assert_eq!(routers.len(), 1);
        assert_eq!(routers[0].addr, ip("fe80::2"));
        assert!(routers[0].installed);

        let info = adm.get_ifinfo(1).unwrap();
        assert_eq!(info.info.linkmtu, 1450);
    }

    #[test]
    fn missing_scenario() {
        let path = Path::new("/nonexistent/scenario.toml");
        assert!(matches!(
            NdpAdm::load(path, discard()),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn failed_step_reports_index() {
        let mut sc = Scenario::parse(TWO_ROUTERS).unwrap();
        sc.steps.push(Step::Detach { ifindex: 4 });
        match NdpAdm::from_scenario(&sc, discard()) {
            Err(Error::Step { index, kind, err }) => {
                assert_eq!(index, 4);
                assert_eq!(kind, "detach");
                assert_eq!(err, NdError::IfNotFound(4));
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected failure"),
        }
    }
}
