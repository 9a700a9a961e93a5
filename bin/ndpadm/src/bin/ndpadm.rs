// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use tabwriter::TabWriter;

use nd6::api::API_VERSION;
use nd6::api::IfIndex;
use nd6::api::NdIfFlags;
use nd6::engine::ifnet::AddrInfo;
use nd6::print::print_ifinfo;
use nd6::print::print_prefixes;
use nd6::print::print_routers;
use nd6::print::print_stats;
use nd6::print::write_hrb;
use nd6::provider::RouteReq;
use ndpadm::NdpAdm;
use ndpadm::Scenario;

/// Administer IPv6 Neighbor Discovery router and prefix state
///
/// Every command first replays the given scenario against a simulated
/// network stack and then operates on the resulting state.
#[derive(Debug, Parser)]
#[command(version = ndpadm_version())]
struct Cli {
    /// The scenario file to replay.
    #[arg(short, long)]
    scenario: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay the scenario and print the resulting routers, prefixes,
    /// and forwarding table.
    Replay,

    /// List the default routers.
    DumpRouters {
        #[arg(short)]
        ifindex: Option<IfIndex>,
    },

    /// List the prefixes.
    DumpPrefixes {
        #[arg(short)]
        ifindex: Option<IfIndex>,
    },

    /// Show the ND parameters of an interface.
    IfInfo { ifindex: IfIndex },

    /// Replace the ND flags of an interface.
    SetIfFlags {
        ifindex: IfIndex,

        /// Perform neighbor unreachability detection.
        #[arg(long)]
        nud: bool,

        /// Accept Router Advertisements.
        #[arg(long)]
        accept_rtadv: bool,
    },

    /// Retract the installed default route and select again.
    SyncRouters,

    /// Remove every default router.
    FlushRouters,

    /// Remove every prefix except the link-local ones.
    FlushPrefixes,

    /// Dump the ND counters.
    DumpStats,

    /// List the forwarding table.
    ListRoutes,

    /// List the addresses of an interface.
    ListAddrs { ifindex: IfIndex },

    /// Print the scenario with every default filled in.
    ShowScenario,
}

fn ndpadm_version() -> String {
    format!("{} (API {API_VERSION})", env!("CARGO_PKG_VERSION"))
}

fn print_routes(routes: &[RouteReq]) -> std::io::Result<()> {
    let mut t = TabWriter::new(std::io::stdout());
    writeln!(t, "DESTINATION\tGATEWAY\tIF\tFLAGS")?;
    for r in routes {
        writeln!(t, "{}\t{}\t{}\t{}", r.dst, r.gateway, r.ifindex, r.flags)?;
    }
    t.flush()
}

fn print_addrs(addrs: &[AddrInfo]) -> std::io::Result<()> {
    let mut t = TabWriter::new(std::io::stdout());
    writeln!(t, "ADDRESS\tFLAGS\tVLTIME\tPLTIME\tPREFIX")?;
    for a in addrs {
        let prefix = a.prefix.map_or_else(|| "-".into(), |p| p.to_string());
        writeln!(
            t,
            "{}/{}\t{:?}\t{}\t{}\t{}",
            a.addr, a.prefix_len, a.flags, a.vltime, a.pltime, prefix,
        )?;
    }
    t.flush()
}

fn print_state(hdl: &NdpAdm) -> anyhow::Result<()> {
    print_routers(&hdl.dump_routers(None)?)?;
    println!();
    print_prefixes(&hdl.dump_prefixes(None)?)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let text = std::fs::read_to_string(&cli.scenario).with_context(|| {
        format!("failed to read scenario {}", cli.scenario.display())
    })?;
    let sc = Scenario::parse(&text)?;
    let open = || NdpAdm::from_scenario(&sc, ndpadm::term_logger());

    match cli.cmd {
        Command::Replay => {
            let hdl = open()?;
            print_state(&hdl)?;
            println!();
            write_hrb(&mut std::io::stdout())?;
            print_routes(&hdl.routes())?;
        }

        Command::DumpRouters { ifindex } => {
            let hdl = open()?;
            print_routers(&hdl.dump_routers(ifindex)?)?;
        }

        Command::DumpPrefixes { ifindex } => {
            let hdl = open()?;
            print_prefixes(&hdl.dump_prefixes(ifindex)?)?;
        }

        Command::IfInfo { ifindex } => {
            let hdl = open()?;
            print_ifinfo(&hdl.get_ifinfo(ifindex)?)?;
        }

        Command::SetIfFlags { ifindex, nud, accept_rtadv } => {
            let hdl = open()?;
            let mut flags = NdIfFlags::empty();
            flags.set(NdIfFlags::PERFORMNUD, nud);
            flags.set(NdIfFlags::ACCEPT_RTADV, accept_rtadv);
            hdl.set_ifflags(ifindex, flags)?;
            print_ifinfo(&hdl.get_ifinfo(ifindex)?)?;
        }

        Command::SyncRouters => {
            let hdl = open()?;
            hdl.sync_routers()?;
            print_routers(&hdl.dump_routers(None)?)?;
        }

        Command::FlushRouters => {
            let hdl = open()?;
            hdl.flush_routers()?;
            print_state(&hdl)?;
        }

        Command::FlushPrefixes => {
            let hdl = open()?;
            hdl.flush_prefixes()?;
            print_state(&hdl)?;
        }

        Command::DumpStats => {
            let hdl = open()?;
            print_stats(&hdl.dump_stats()?)?;
        }

        Command::ListRoutes => {
            let hdl = open()?;
            print_routes(&hdl.routes())?;
        }

        Command::ListAddrs { ifindex } => {
            let hdl = open()?;
            print_addrs(&hdl.addrs(ifindex)?)?;
        }

        Command::ShowScenario => {
            print!("{}", toml::to_string_pretty(&sc)?);
        }
    }

    Ok(())
}
