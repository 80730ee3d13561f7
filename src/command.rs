//! Pinger invocation construction.
//!
//! One invocation is built per address family that has to run. Arguments
//! mirror fping's short options: `-C` (per-target count with per-packet
//! reporting), `-p` period, `-b` payload size, `-t` timeout, `-i` packet
//! interval, plus the detected source-address flag.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::capability::SourceIpFlag;
use crate::config::PingerConfig;

/// IP address family a pinger binary serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4, served by the primary binary.
    V4,
    /// IPv6, served by the companion binary (or the primary one when it
    /// reports IPv6 support).
    V6,
}

impl AddressFamily {
    /// Family of an address literal.
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4 => write!(f, "ipv4"),
            Self::V6 => write!(f, "ipv6"),
        }
    }
}

/// Which pinger binaries are installed and executable.
///
/// Probed from the filesystem once per sweep; everything downstream
/// branches on this data instead of build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinarySet {
    /// The IPv4 binary is present and executable.
    pub v4: bool,
    /// The IPv6 binary is present and executable.
    pub v6: bool,
}

impl BinarySet {
    /// Probe both configured binaries.
    pub fn detect(config: &PingerConfig) -> Self {
        let set = Self {
            v4: executable(&config.fping),
            v6: executable(&config.fping6),
        };
        tracing::debug!(v4 = set.v4, v6 = set.v6, "probed pinger binaries");
        set
    }

    /// Whether the binary for `family` is available.
    pub fn has(&self, family: AddressFamily) -> bool {
        match family {
            AddressFamily::V4 => self.v4,
            AddressFamily::V6 => self.v6,
        }
    }
}

/// True when `path` exists and the process may execute it.
#[cfg(unix)]
pub fn executable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: cpath is a valid NUL-terminated string for the access(2) call.
    unsafe { libc::access(cpath.as_ptr(), libc::X_OK) == 0 }
}

#[cfg(not(unix))]
pub fn executable(path: &Path) -> bool {
    path.exists()
}

/// Why no runnable family set could be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyError {
    /// Neither binary is installed.
    NoBinaries,
    /// An explicit source IP requires this family's binary, which is
    /// missing.
    MissingFor(AddressFamily),
}

/// Decide which families to invoke, in execution order.
///
/// - An explicit source IP pins the sweep to its own family.
/// - Otherwise the IPv4 binary always runs when present, and the IPv6
///   binary additionally runs only when the IPv4 binary does not already
///   cover IPv6 targets itself (`v4_covers_v6`).
pub fn select_families(
    set: BinarySet,
    source_family: Option<AddressFamily>,
    v4_covers_v6: bool,
) -> Result<Vec<AddressFamily>, FamilyError> {
    if !set.v4 && !set.v6 {
        return Err(FamilyError::NoBinaries);
    }

    if let Some(family) = source_family {
        if !set.has(family) {
            return Err(FamilyError::MissingFor(family));
        }
        return Ok(vec![family]);
    }

    let mut families = Vec::with_capacity(2);
    if set.v4 {
        families.push(AddressFamily::V4);
    }
    if set.v6 && !(set.v4 && v4_covers_v6) {
        families.push(AddressFamily::V6);
    }
    Ok(families)
}

/// One ready-to-run pinger command line.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Family this invocation serves.
    pub family: AddressFamily,
    /// Binary to execute.
    pub binary: PathBuf,
    /// Argument vector, targets supplied via stdin.
    pub args: Vec<String>,
}

/// Assemble the argument vector for one family.
///
/// Zero-valued overrides mean "leave it to the pinger's default" and are
/// omitted. The detected minimum interval is always passed, and the source
/// flag only when one was detected for the binary.
pub fn build_args(
    requests_count: u32,
    interval_ms: u32,
    size_bytes: u32,
    timeout_ms: u32,
    min_interval_ms: u32,
    source: Option<(SourceIpFlag, IpAddr)>,
) -> Vec<String> {
    let mut args = vec![format!("-C{requests_count}")];
    if interval_ms != 0 {
        args.push(format!("-p{interval_ms}"));
    }
    if size_bytes != 0 {
        args.push(format!("-b{size_bytes}"));
    }
    if timeout_ms != 0 {
        args.push(format!("-t{timeout_ms}"));
    }
    args.push(format!("-i{min_interval_ms}"));
    if let Some((flag, addr)) = source {
        args.push(format!("{}{addr}", flag.as_str()));
    }
    args
}
