// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::IfIndex;
use super::ip::Ipv6Addr;
use super::ip::Ipv6Cidr;
use super::ndp::NdIfFlags;
use super::ndp::NdIfInfo;
use super::ndp::PrefixState;
use super::ndp::RouterPref;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use libc::c_int;
use serde::Deserialize;
use serde::Serialize;

/// Administrative commands accepted by the ND subsystem.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub enum NdCmd {
    DumpRouters = 1,    // list the default routers
    DumpPrefixes = 2,   // list the prefixes
    GetIfInfo = 3,      // get the ND parameters of an interface
    SyncRouters = 10,   // retract the installed router and reselect
    FlushPrefixes = 11, // remove every non-link-local prefix
    FlushRouters = 12,  // remove every default router
    SetIfFlags = 13,    // set the ND flags of an interface
    DumpStats = 20,     // dump the ND counters
}

impl TryFrom<c_int> for NdCmd {
    type Error = ();

    fn try_from(num: c_int) -> Result<Self, Self::Error> {
        match num {
            1 => Ok(Self::DumpRouters),
            2 => Ok(Self::DumpPrefixes),
            3 => Ok(Self::GetIfInfo),
            10 => Ok(Self::SyncRouters),
            11 => Ok(Self::FlushPrefixes),
            12 => Ok(Self::FlushRouters),
            13 => Ok(Self::SetIfFlags),
            20 => Ok(Self::DumpStats),
            _ => Err(()),
        }
    }
}

impl NdCmd {
    /// Does this command carry a request body?
    pub fn has_request(&self) -> bool {
        matches!(
            self,
            Self::DumpRouters
                | Self::DumpPrefixes
                | Self::GetIfInfo
                | Self::SetIfFlags
        )
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum NdError {
    BadApiVersion {
        user: u64,
        kernel: u64,
    },
    BadCmd(c_int),
    BadState(String),
    DeserCmdErr(String),
    DeserCmdReq(String),
    IfExists(IfIndex),
    IfNotFound(IfIndex),
    AddrNotFound(Ipv6Addr),
    MaxCapacity(u64),

    /// The command expects a request body but none was given.
    NoRequestBody,

    SerCmdResp(String),
    System {
        errno: c_int,
        msg: String,
    },
}

impl NdError {
    /// Convert to an errno value.
    pub fn to_errno(&self) -> c_int {
        use libc::*;

        match self {
            Self::BadApiVersion { .. } => EPROTO,
            Self::BadCmd(_) => ENOTSUP,
            Self::BadState(_) => EINVAL,
            Self::DeserCmdErr(_) => ENOMSG,
            Self::DeserCmdReq(_) => ENOMSG,
            Self::IfExists(_) => EEXIST,
            Self::IfNotFound(_) => ENXIO,
            Self::AddrNotFound(_) => EADDRNOTAVAIL,
            Self::MaxCapacity(_) => ENOMEM,
            Self::NoRequestBody => EINVAL,
            Self::SerCmdResp(_) => ENOMSG,
            Self::System { errno, .. } => *errno,
        }
    }
}

impl Display for NdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadApiVersion { user, kernel } => {
                write!(f, "API version mismatch: user {user} kernel {kernel}")
            }
            Self::BadCmd(num) => write!(f, "unknown command: {num}"),
            Self::BadState(msg) => write!(f, "bad state: {msg}"),
            Self::DeserCmdErr(msg) => {
                write!(f, "failed to deserialize error: {msg}")
            }
            Self::DeserCmdReq(msg) => {
                write!(f, "failed to deserialize request: {msg}")
            }
            Self::IfExists(idx) => {
                write!(f, "interface {idx} already attached")
            }
            Self::IfNotFound(idx) => write!(f, "interface {idx} not found"),
            Self::AddrNotFound(addr) => write!(f, "address {addr} not found"),
            Self::MaxCapacity(max) => write!(f, "capacity {max} reached"),
            Self::NoRequestBody => write!(f, "missing request body"),
            Self::SerCmdResp(msg) => {
                write!(f, "failed to serialize response: {msg}")
            }
            Self::System { errno, msg } => write!(f, "{msg} (errno {errno})"),
        }
    }
}

impl core::error::Error for NdError {}

/// A marker trait indicating a success response type that is returned
/// from a command and may be passed across the command boundary.
pub trait CmdOk: Debug + Serialize {}

impl CmdOk for () {}

/// Indicates no meaningful response value on success.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NoResp {
    pub unused: u64,
}

impl CmdOk for NoResp {}

/// List the default routers, optionally limited to one interface.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DumpRoutersReq {
    pub ifindex: Option<IfIndex>,
}

/// One entry of the default router list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DefRouterDump {
    pub addr: Ipv6Addr,
    pub ifindex: IfIndex,
    /// The RA flags byte (M, O, preference).
    pub flags: u8,
    pub pref: RouterPref,
    /// Router lifetime, in seconds.
    pub lifetime: u16,
    /// Absolute expiry time, in seconds since boot.
    pub expire: u64,
    pub installed: bool,
}

/// The response to a [`DumpRoutersReq`], in list order.
#[derive(Debug, Deserialize, Serialize)]
pub struct DumpRoutersResp {
    pub routers: Vec<DefRouterDump>,
}

impl CmdOk for DumpRoutersResp {}

/// List the prefixes, optionally limited to one interface.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DumpPrefixesReq {
    pub ifindex: Option<IfIndex>,
}

/// One entry of the prefix list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PrefixDump {
    pub prefix: Ipv6Cidr,
    pub ifindex: IfIndex,
    /// The L flag.
    pub onlink: bool,
    /// The A flag.
    pub autonomous: bool,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    /// Absolute expiry time in seconds since boot; zero when the valid
    /// lifetime is infinite.
    pub expire: u64,
    pub refcnt: u32,
    pub state: PrefixState,
    /// Addresses of the routers advertising this prefix.
    pub advrtrs: Vec<Ipv6Addr>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DumpPrefixesResp {
    pub prefixes: Vec<PrefixDump>,
}

impl CmdOk for DumpPrefixesResp {}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetIfInfoReq {
    pub ifindex: IfIndex,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetIfInfoResp {
    pub ifindex: IfIndex,
    pub name: String,
    pub info: NdIfInfo,
}

impl CmdOk for GetIfInfoResp {}

/// Replace the ND flags of an interface.
#[derive(Debug, Deserialize, Serialize)]
pub struct SetIfFlagsReq {
    pub ifindex: IfIndex,
    pub flags: NdIfFlags,
}

/// A snapshot of the subsystem's counters as name/value pairs.
#[derive(Debug, Deserialize, Serialize)]
pub struct DumpStatsResp {
    pub stats: Vec<(String, u64)>,
}

impl CmdOk for DumpStatsResp {}
