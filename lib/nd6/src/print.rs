// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print command responses in human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both ndpadm and integration tests.

use crate::api::DefRouterDump;
use crate::api::DumpPrefixesResp;
use crate::api::DumpRoutersResp;
use crate::api::DumpStatsResp;
use crate::api::GetIfInfoResp;
use crate::api::ND_RA_FLAG_MANAGED;
use crate::api::ND_RA_FLAG_OTHER;
use crate::api::ND6_INFINITE_LIFETIME;
use crate::api::NdIfFlags;
use crate::api::PrefixDump;
use std::io::Write;
use std::string::String;
use std::string::ToString;
use tabwriter::TabWriter;

/// Print a [`DumpRoutersResp`].
pub fn print_routers(resp: &DumpRoutersResp) -> std::io::Result<()> {
    print_routers_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpRoutersResp`] into a given writer.
pub fn print_routers_into(
    writer: &mut impl Write,
    resp: &DumpRoutersResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "ROUTER\tIF\tFLAGS\tPREF\tLIFETIME\tEXPIRE\tINSTALLED")?;
    for dr in &resp.routers {
        print_router(&mut t, dr)?;
    }
    t.flush()
}

fn print_router(
    t: &mut impl Write,
    dr: &DefRouterDump,
) -> std::io::Result<()> {
    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        dr.addr,
        dr.ifindex,
        ra_flags_str(dr.flags),
        dr.pref,
        dr.lifetime,
        dr.expire,
        if dr.installed { "yes" } else { "no" },
    )
}

fn ra_flags_str(flags: u8) -> String {
    let mut s = String::new();
    if flags & ND_RA_FLAG_MANAGED != 0 {
        s.push('M');
    }
    if flags & ND_RA_FLAG_OTHER != 0 {
        s.push('O');
    }
    if s.is_empty() {
        s.push('-');
    }
    s
}

/// Print a [`DumpPrefixesResp`].
pub fn print_prefixes(resp: &DumpPrefixesResp) -> std::io::Result<()> {
    print_prefixes_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpPrefixesResp`] into a given writer.
pub fn print_prefixes_into(
    writer: &mut impl Write,
    resp: &DumpPrefixesResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(
        t,
        "PREFIX\tIF\tFLAGS\tVLTIME\tPLTIME\tEXPIRE\tREFS\tSTATE\tROUTERS"
    )?;
    for pr in &resp.prefixes {
        print_prefix(&mut t, pr)?;
    }
    t.flush()
}

fn print_prefix(t: &mut impl Write, pr: &PrefixDump) -> std::io::Result<()> {
    let mut flags = String::new();
    flags.push(if pr.onlink { 'L' } else { '-' });
    flags.push(if pr.autonomous { 'A' } else { '-' });
    let advrtrs = if pr.advrtrs.is_empty() {
        String::from("-")
    } else {
        let addrs: Vec<_> =
            pr.advrtrs.iter().map(ToString::to_string).collect();
        addrs.join(",")
    };
    let expire = if pr.expire == 0 {
        String::from("never")
    } else {
        pr.expire.to_string()
    };

    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        pr.prefix,
        pr.ifindex,
        flags,
        lifetime_str(pr.valid_lifetime),
        lifetime_str(pr.preferred_lifetime),
        expire,
        pr.refcnt,
        pr.state,
        advrtrs,
    )
}

fn lifetime_str(ltime: u32) -> String {
    if ltime == ND6_INFINITE_LIFETIME {
        String::from("infinity")
    } else {
        ltime.to_string()
    }
}

/// Print a [`GetIfInfoResp`].
pub fn print_ifinfo(resp: &GetIfInfoResp) -> std::io::Result<()> {
    print_ifinfo_into(&mut std::io::stdout(), resp)
}

/// Print a [`GetIfInfoResp`] into a given writer.
pub fn print_ifinfo_into(
    writer: &mut impl Write,
    resp: &GetIfInfoResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    let info = &resp.info;
    writeln!(t, "Interface {} ({})", resp.name, resp.ifindex)?;
    write_hr(&mut t)?;
    writeln!(t, "linkmtu\t{}", info.linkmtu)?;
    writeln!(t, "maxmtu\t{}", info.maxmtu)?;
    writeln!(t, "curhlim\t{}", info.chlim)?;
    writeln!(t, "basereachable\t{}ms", info.basereachable)?;
    writeln!(t, "reachable\t{}ms", info.reachable)?;
    writeln!(t, "retrans\t{}ms", info.retrans)?;
    writeln!(t, "recalctm\t{}s", info.recalctm)?;

    let mut flags = Vec::new();
    if info.flags.contains(NdIfFlags::PERFORMNUD) {
        flags.push("nud");
    }
    if info.flags.contains(NdIfFlags::ACCEPT_RTADV) {
        flags.push("accept_rtadv");
    }
    writeln!(t, "flags\t{}", flags.join(" "))?;
    t.flush()
}

/// Print a [`DumpStatsResp`].
pub fn print_stats(resp: &DumpStatsResp) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpStatsResp`] into a given writer.
pub fn print_stats_into(
    writer: &mut impl Write,
    resp: &DumpStatsResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "COUNTER\tVALUE")?;
    for (name, val) in &resp.stats {
        writeln!(t, "{name}\t{val}")?;
    }
    t.flush()
}

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Ipv6Cidr;
    use crate::api::PrefixState;
    use crate::api::RouterPref;

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
    {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn routers_table() {
        let resp = DumpRoutersResp {
            routers: vec![DefRouterDump {
                addr: "fe80::1".parse().unwrap(),
                ifindex: 1,
                flags: ND_RA_FLAG_MANAGED,
                pref: RouterPref::Medium,
                lifetime: 1800,
                expire: 2800,
                installed: true,
            }],
        };
        let out = render(|w| print_routers_into(w, &resp));
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ROUTER"));
        let cols: Vec<_> = lines[1].split_whitespace().collect();
        assert_eq!(
            cols,
            vec!["fe80::1", "1", "M", "medium", "1800", "2800", "yes"]
        );
    }

    #[test]
    fn prefixes_table() {
        let resp = DumpPrefixesResp {
            prefixes: vec![
                PrefixDump {
                    prefix: "2001:db8::/64".parse().unwrap(),
                    ifindex: 1,
                    onlink: true,
                    autonomous: true,
                    valid_lifetime: 86400,
                    preferred_lifetime: 14400,
                    expire: 87400,
                    refcnt: 1,
                    state: PrefixState::OnlinkAttached,
                    advrtrs: vec!["fe80::1".parse().unwrap()],
                },
                PrefixDump {
                    prefix: Ipv6Cidr::LINK_LOCAL,
                    ifindex: 1,
                    onlink: true,
                    autonomous: false,
                    valid_lifetime: ND6_INFINITE_LIFETIME,
                    preferred_lifetime: ND6_INFINITE_LIFETIME,
                    expire: 0,
                    refcnt: 1,
                    state: PrefixState::OnlinkAttached,
                    advrtrs: vec![],
                },
            ],
        };
        let out = render(|w| print_prefixes_into(w, &resp));
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        let cols: Vec<_> = lines[1].split_whitespace().collect();
        assert_eq!(
            cols,
            vec![
                "2001:db8::/64",
                "1",
                "LA",
                "86400",
                "14400",
                "87400",
                "1",
                "onlink",
                "fe80::1",
            ]
        );
        let cols: Vec<_> = lines[2].split_whitespace().collect();
        assert_eq!(cols[2], "L-");
        assert_eq!(cols[3], "infinity");
        assert_eq!(cols[5], "never");
        assert_eq!(cols[8], "-");
    }

    #[test]
    fn stats_table() {
        let resp = DumpStatsResp {
            stats: vec![("ra_in".into(), 3), ("ra_bad".into(), 0)],
        };
        let out = render(|w| print_stats_into(w, &resp));
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1].split_whitespace().collect::<Vec<_>>(),
            vec!["ra_in", "3"]
        );
    }
}
