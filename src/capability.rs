//! Pinger capability detection and caching.
//!
//! Installed fping builds differ in ways that change how they must be
//! invoked: the source-address flag (`-S` since 3.x, `-I` on some old
//! patched builds, absent on 2.4b2-era ones), the minimum packet interval
//! they accept without complaining, and whether a single binary handles
//! IPv6. These facts are probed once per binary and cached process-wide
//! with a wall-clock TTL so that a pinger upgrade is picked up within the
//! hour.
//!
//! Supported minimum interval (ms) across fping versions:
//!
//! | version          | as root / non-root / without "safe limits" | default |
//! |------------------|--------------------------------------------|---------|
//! |        X < 3.14  | 1 / 10 / -                                 | 25      |
//! | 3.14 <= X < 4.0  | 0 /  1 / -                                 | 25      |
//! | 4.0  <= X        | 0 /  0 / 1                                 | 10      |
//!
//! "Safe limits" is a compile-time option introduced in fping 4.0;
//! distribution packages ship without it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::command::AddressFamily;
use crate::error::SweepError;
use crate::runner::{ProcessRunner, RunOutcome};

/// Detected capabilities expire once this much time has passed since the
/// last cache reset.
pub const CAPABILITY_TTL: Duration = Duration::from_secs(3600);

/// Candidate packet intervals tried during minimum-interval detection.
pub const PROBE_INTERVALS_MS: [u32; 3] = [0, 1, 10];

/// Execution timeout for a single detection probe.
const DETECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-packet timeout (`-t`) used by detection probes, milliseconds.
const DETECT_PACKET_TIMEOUT_MS: u32 = 50;

/// Output at or above this size is a help screen, not a probe response.
const HELP_SCREEN_BYTES: usize = 1024;

/// Which flag the installed pinger uses to set the source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceIpFlag {
    /// `-I<addr>` (old patched 2.4b2 builds; binds interfaces since 3.x).
    DashI,
    /// `-S<addr>` (fping 3.x and later).
    DashS,
}

impl SourceIpFlag {
    /// Literal flag text, prepended to the address.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DashI => "-I",
            Self::DashS => "-S",
        }
    }
}

/// Detected facts about one pinger binary.
///
/// `None` at the outer level always means "not probed yet this TTL
/// window"; in particular `source_ip_flag == Some(None)` records a binary
/// probed and found to support no source-address flag at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCaps {
    /// Detected source-address flag, if any.
    pub source_ip_flag: Option<Option<SourceIpFlag>>,
    /// Minimum packet interval the binary accepts, milliseconds.
    pub min_interval_ms: Option<u32>,
    /// Whether the binary handles IPv6 targets (probed on the IPv4 binary
    /// only).
    pub ipv6_supported: Option<bool>,
}

#[derive(Debug, Default)]
struct CacheState {
    reset_at: u64,
    v4: BinaryCaps,
    v6: BinaryCaps,
}

impl CacheState {
    fn caps_mut(&mut self, family: AddressFamily) -> &mut BinaryCaps {
        match family {
            AddressFamily::V4 => &mut self.v4,
            AddressFamily::V6 => &mut self.v6,
        }
    }
}

/// Process-wide capability cache with time-based invalidation.
///
/// Shared by all concurrent invocations; detection is read-check-then-write,
/// so a [`CapabilitySession`] holds the single lock for the whole refresh.
pub struct CapabilityCache {
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl CapabilityCache {
    /// Create a cache reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Open a detection session, invalidating everything first if the TTL
    /// window has lapsed (strictly more than [`CAPABILITY_TTL`] since the
    /// last reset).
    pub async fn session(&self) -> CapabilitySession<'_> {
        let mut state = self.state.lock().await;
        let now = self.clock.now_unix_sec();

        if now.saturating_sub(state.reset_at) > CAPABILITY_TTL.as_secs() {
            tracing::debug!("capability cache expired, re-detecting pinger options");
            *state = CacheState {
                reset_at: now,
                ..CacheState::default()
            };
        }

        CapabilitySession { state }
    }
}

impl std::fmt::Debug for CapabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityCache").finish_non_exhaustive()
    }
}

/// Exclusive view of the cache for one sweep's capability refresh.
pub struct CapabilitySession<'a> {
    state: MutexGuard<'a, CacheState>,
}

impl CapabilitySession<'_> {
    /// Source-address flag for `binary`, probing its help output on a cache
    /// miss.
    ///
    /// A failed help run leaves the capability undetected — the sweep
    /// proceeds without a flag and the next invocation probes again.
    pub async fn source_ip_flag(
        &mut self,
        runner: &dyn ProcessRunner,
        family: AddressFamily,
        binary: &Path,
    ) -> Option<SourceIpFlag> {
        if let Some(flag) = self.state.caps_mut(family).source_ip_flag {
            return flag;
        }

        match detect_source_ip_flag(runner, binary).await {
            Some(flag) => {
                tracing::debug!(
                    binary = %binary.display(),
                    flag = flag.map(|f| f.as_str()).unwrap_or(""),
                    "detected pinger source IP option"
                );
                self.state.caps_mut(family).source_ip_flag = Some(flag);
                flag
            }
            None => None,
        }
    }

    /// Minimum packet interval for `binary`, probing targets on a cache
    /// miss. Detection failure fails the sweep; it is not retried within
    /// the call.
    pub async fn min_interval(
        &mut self,
        runner: &dyn ProcessRunner,
        family: AddressFamily,
        binary: &Path,
        hosts: &[String],
    ) -> Result<u32, SweepError> {
        if let Some(value) = self.state.caps_mut(family).min_interval_ms {
            return Ok(value);
        }

        let value = detect_min_interval(runner, binary, hosts).await?;
        tracing::debug!(
            binary = %binary.display(),
            interval_ms = value,
            "detected minimum supported packet interval (-i)"
        );
        self.state.caps_mut(family).min_interval_ms = Some(value);
        Ok(value)
    }

    /// Whether the IPv4 binary covers IPv6 targets, probing on a cache
    /// miss.
    pub async fn ipv6_supported(
        &mut self,
        runner: &dyn ProcessRunner,
        binary: &Path,
        dst: &str,
    ) -> bool {
        if let Some(value) = self.state.v4.ipv6_supported {
            return value;
        }

        let value = detect_ipv6_support(runner, binary, dst).await;
        tracing::debug!(
            binary = %binary.display(),
            supported = value,
            "detected pinger IPv6 support"
        );
        self.state.v4.ipv6_supported = Some(value);
        value
    }
}

/// Scan help output for the source-address flag.
///
/// `-I` is recorded as a candidate and scanning continues; `-S` is recorded
/// and scanning stops, so `-S` wins whenever it appears anywhere in the
/// help text.
async fn detect_source_ip_flag(
    runner: &dyn ProcessRunner,
    binary: &Path,
) -> Option<Option<SourceIpFlag>> {
    let args = vec!["-h".to_string()];
    let output = match runner.execute(binary, &args, None, DETECT_TIMEOUT).await {
        RunOutcome::Completed { output, .. } => output,
        RunOutcome::TimedOut | RunOutcome::Failed { .. } => return None,
    };

    let mut flag = None;
    for line in output.lines() {
        let option = line.trim_start();
        if is_flag_token(option, "-I") {
            flag = Some(SourceIpFlag::DashI);
            continue;
        }
        if is_flag_token(option, "-S") {
            flag = Some(SourceIpFlag::DashS);
            break;
        }
    }

    Some(flag)
}

/// A help line introduces a flag when the flag text leads and the next
/// character is whitespace or a comma.
fn is_flag_token(line: &str, flag: &str) -> bool {
    line.strip_prefix(flag)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_whitespace() || c == ',')
}

/// Probe the minimum packet interval by single-packet runs against each
/// host with each candidate interval, accepting the first decisive signal.
async fn detect_min_interval(
    runner: &dyn ProcessRunner,
    binary: &Path,
    hosts: &[String],
) -> Result<u32, SweepError> {
    let mut last_output: Option<String> = None;

    for dst in hosts {
        for interval in PROBE_INTERVALS_MS {
            tracing::debug!(interval_ms = interval, "testing pinger packet interval");

            let args = vec![
                "-c1".to_string(),
                format!("-t{DETECT_PACKET_TIMEOUT_MS}"),
                format!("-i{interval}"),
                dst.clone(),
            ];

            let output = match runner.execute(binary, &args, None, DETECT_TIMEOUT).await {
                RunOutcome::Completed { output, .. } => output,
                RunOutcome::TimedOut => {
                    return Err(SweepError::Execution(format!(
                        "timeout while executing \"{}\"",
                        render_command(binary, &args)
                    )));
                }
                RunOutcome::Failed { error } => {
                    return Err(SweepError::Execution(format!(
                        "cannot execute \"{}\": {}",
                        render_command(binary, &args),
                        error
                    )));
                }
            };

            // Newer fping rejects risky options outright, e.g.:
            //   fping: these options are too risky for mere mortals.
            //   fping: You need i >= 1, p >= 20, r < 20, and t >= 50
            if let Some(value) = suggested_minimum(&output) {
                return Ok(value);
            }

            // The target address echoed back means the tried interval was
            // accepted, unless we hit the help screen, which is always
            // bigger than 1 KiB.
            if output.len() < HELP_SCREEN_BYTES {
                if output.trim_start().contains(dst.as_str()) {
                    return Ok(interval);
                }

                if output.contains(" as root") {
                    return Err(SweepError::Execution(
                        output.trim_end_matches('\n').to_string(),
                    ));
                }
            }

            last_output = Some(output);
        }
    }

    // Probably a usage or error message; surface it when it looks like one.
    match last_output {
        Some(out) if !out.is_empty() && out.len() < HELP_SCREEN_BYTES => Err(
            SweepError::Execution(out.trim_end_matches('\n').to_string()),
        ),
        _ => Err(SweepError::Execution(format!(
            "cannot detect the minimum interval of {}",
            binary.display()
        ))),
    }
}

/// Extract the minimum from a "You need i >= N" complaint.
///
/// fping 3.16 changed the wording from `You need i >=` to `You need -i >=`;
/// both are accepted.
fn suggested_minimum(output: &str) -> Option<u32> {
    for prefix in ["You need i >= ", "You need -i >= "] {
        if let Some(pos) = output.find(prefix) {
            return leading_u32(&output[pos + prefix.len()..]);
        }
    }
    None
}

fn leading_u32(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Probe IPv6 support with a single `-6` packet. A timeout proves nothing
/// either way and is treated optimistically as supported.
async fn detect_ipv6_support(runner: &dyn ProcessRunner, binary: &Path, dst: &str) -> bool {
    let args = vec![
        "-6".to_string(),
        "-c1".to_string(),
        format!("-t{DETECT_PACKET_TIMEOUT_MS}"),
        dst.to_string(),
    ];

    match runner.execute(binary, &args, None, DETECT_TIMEOUT).await {
        RunOutcome::Completed { output, .. } => {
            output.len() < HELP_SCREEN_BYTES && output.contains(dst)
        }
        RunOutcome::TimedOut => true,
        RunOutcome::Failed { .. } => false,
    }
}

fn render_command(binary: &Path, args: &[String]) -> String {
    let mut line = binary.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
