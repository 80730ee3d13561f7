//! Sweep orchestration.
//!
//! One [`Sweeper::ping`] call is one batch: refresh capabilities (cached),
//! build the per-family invocations, stage the target file, run the
//! pinger(s) under an interrupt guard, and fold the output into per-host
//! statistics. Single pass, no retries — a timed-out or failed subprocess
//! is reported to the caller, whose scheduler decides what happens next.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::capability::{CapabilityCache, SourceIpFlag};
use crate::clock::SystemClock;
use crate::command::{self, AddressFamily, BinarySet, FamilyError, Invocation};
use crate::config::PingerConfig;
use crate::error::SweepError;
use crate::parser::parse_line;
use crate::runner::{ProcessRunner, RunOutcome, SystemRunner};
use crate::signal::InterruptGuard;
use crate::stats::{Accumulator, HostStats};

/// Floor for the sweep execution timeout.
const MIN_SWEEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Pinger default period between packets to one target, milliseconds.
const PINGER_DEFAULT_PERIOD_MS: u32 = 1000;

/// Pinger default per-target timeout, milliseconds.
const PINGER_DEFAULT_TIMEOUT_MS: u32 = 500;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// One batch of addresses to probe, with request knobs.
///
/// Zero-valued overrides leave the corresponding decision to the pinger
/// (or, for the packet interval, to detection).
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    /// Addresses to probe, in order. IPv4 and IPv6 literals may be mixed.
    pub addrs: Vec<String>,
    /// Echo requests per target.
    pub requests_count: u32,
    /// Interval between packets to one target, ms (0 = pinger default).
    pub interval_ms: u32,
    /// Payload size in bytes (0 = pinger default).
    pub size_bytes: u32,
    /// Per-target initial timeout, ms (0 = pinger default).
    pub timeout_ms: u32,
    /// Credit redirected responses to the original target.
    pub allow_redirect: bool,
    /// Explicit source address; pins the sweep to one family.
    pub source_ip: Option<IpAddr>,
}

impl ProbeRequest {
    /// Create a request with all overrides at their defaults.
    pub fn new(addrs: Vec<String>, requests_count: u32) -> Self {
        Self {
            addrs,
            requests_count,
            interval_ms: 0,
            size_bytes: 0,
            timeout_ms: 0,
            allow_redirect: false,
            source_ip: None,
        }
    }

    /// Set the packet interval override.
    pub fn with_interval_ms(mut self, interval_ms: u32) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Set the payload size override.
    pub fn with_size_bytes(mut self, size_bytes: u32) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Set the per-target timeout override.
    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Allow redirected responses to count as the target being up.
    pub fn with_allow_redirect(mut self, allow: bool) -> Self {
        self.allow_redirect = allow;
        self
    }

    /// Pin the sweep to an explicit source address.
    pub fn with_source_ip(mut self, source_ip: IpAddr) -> Self {
        self.source_ip = Some(source_ip);
        self
    }

    fn validate(&self) -> Result<(), SweepError> {
        if self.addrs.is_empty() {
            return Err(SweepError::Config("no target hosts".to_string()));
        }
        if self.requests_count == 0 {
            return Err(SweepError::Config(
                "requests count must be positive".to_string(),
            ));
        }
        for addr in &self.addrs {
            if addr.parse::<IpAddr>().is_err() {
                return Err(SweepError::Config(format!(
                    "invalid target address: '{addr}'"
                )));
            }
        }
        Ok(())
    }
}

/// Batch reachability prober delegating packet exchange to the external
/// pinger.
pub struct Sweeper {
    config: PingerConfig,
    runner: Arc<dyn ProcessRunner>,
    cache: Arc<CapabilityCache>,
}

impl Sweeper {
    /// Create a sweeper with the production runner and a fresh capability
    /// cache on the system clock.
    pub fn new(config: PingerConfig) -> Self {
        Self {
            config,
            runner: Arc::new(SystemRunner::new()),
            cache: Arc::new(CapabilityCache::new(Arc::new(SystemClock))),
        }
    }

    /// Replace the process runner (tests).
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Share or replace the capability cache.
    pub fn with_cache(mut self, cache: Arc<CapabilityCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &PingerConfig {
        &self.config
    }

    fn binary_for(&self, family: AddressFamily) -> &Path {
        match family {
            AddressFamily::V4 => &self.config.fping,
            AddressFamily::V6 => &self.config.fping6,
        }
    }

    /// Probe the batch once.
    ///
    /// Returns one statistics record per host on success. A host that
    /// answered nothing is reported with `received == 0`, not as an error.
    pub async fn ping(&self, request: &ProbeRequest) -> Result<Vec<HostStats>, SweepError> {
        request.validate()?;
        tracing::debug!(
            hosts = request.addrs.len(),
            requests = request.requests_count,
            "starting sweep"
        );

        let set = BinarySet::detect(&self.config);
        if !set.v4 && !set.v6 {
            return Err(SweepError::Config(format!(
                "at least one of '{}', '{}' must exist; both are missing in the system",
                self.config.fping.display(),
                self.config.fping6.display()
            )));
        }

        let source_family = request.source_ip.map(AddressFamily::of);
        let plan = self.refresh_capabilities(request, set, source_family).await?;

        let families =
            command::select_families(set, source_family, plan.v4_covers_v6).map_err(|e| match e {
                FamilyError::NoBinaries => SweepError::Config(format!(
                    "at least one of '{}', '{}' must exist; both are missing in the system",
                    self.config.fping.display(),
                    self.config.fping6.display()
                )),
                FamilyError::MissingFor(family) => SweepError::Config(format!(
                    "file '{}' cannot be found in the system",
                    self.binary_for(family).display()
                )),
            })?;

        let invocations: Vec<Invocation> = families
            .iter()
            .map(|&family| {
                let source = request
                    .source_ip
                    .and_then(|ip| plan.source_flag(family).map(|flag| (flag, ip)));
                Invocation {
                    family,
                    binary: self.binary_for(family).to_path_buf(),
                    args: command::build_args(
                        request.requests_count,
                        request.interval_ms,
                        request.size_bytes,
                        request.timeout_ms,
                        plan.min_interval(family),
                        source,
                    ),
                }
            })
            .collect();

        let target_file = TargetFile::stage(&self.config.tmpdir, &request.addrs).await?;

        // Both binaries present without a pinned source means a host may be
        // probed twice; the accumulator then isolates the two passes.
        let dual_stack = request.source_ip.is_none() && set.v4 && set.v6;
        let mut acc = Accumulator::new(
            &request.addrs,
            request.requests_count as usize,
            dual_stack,
        );

        let limit = sweep_timeout(request);
        let mut outputs = Vec::with_capacity(invocations.len());
        {
            let _guard = InterruptGuard::block();
            for invocation in &invocations {
                tracing::debug!(
                    family = %invocation.family,
                    binary = %invocation.binary.display(),
                    args = ?invocation.args,
                    "executing pinger"
                );
                match self
                    .runner
                    .execute(
                        &invocation.binary,
                        &invocation.args,
                        Some(&target_file.path),
                        limit,
                    )
                    .await
                {
                    RunOutcome::Completed { output, signaled } => outputs.push((output, signaled)),
                    RunOutcome::TimedOut => {
                        return Err(SweepError::Execution(format!(
                            "timeout while executing {}",
                            invocation.binary.display()
                        )));
                    }
                    RunOutcome::Failed { error } => {
                        return Err(SweepError::Execution(error));
                    }
                }
            }
        }

        let mut total_lines = 0usize;
        let mut last_line = "";
        let mut signaled = false;
        for (output, sig) in &outputs {
            signaled |= *sig;
            for line in output.lines() {
                total_lines += 1;
                last_line = line;
                acc.apply(parse_line(line, request.allow_redirect));
            }
        }

        if signaled {
            return Err(SweepError::Execution(
                "pinger terminated by a signal".to_string(),
            ));
        }
        if total_lines == 0 {
            return Err(SweepError::NoOutput);
        }
        if acc.recognized() == 0 {
            return Err(SweepError::Protocol(last_line.to_string()));
        }

        Ok(acc.finish())
    }

    /// Run the cached capability detections this sweep needs, holding the
    /// cache lock for the whole refresh.
    async fn refresh_capabilities(
        &self,
        request: &ProbeRequest,
        set: BinarySet,
        source_family: Option<AddressFamily>,
    ) -> Result<SweepPlan, SweepError> {
        let runner = self.runner.as_ref();
        let mut session = self.cache.session().await;

        // The minimum interval is probed for every installed binary, not
        // only the ones this particular sweep ends up invoking.
        let min_v4 = if set.v4 {
            Some(
                session
                    .min_interval(runner, AddressFamily::V4, &self.config.fping, &request.addrs)
                    .await?,
            )
        } else {
            None
        };
        let min_v6 = if set.v6 {
            Some(
                session
                    .min_interval(
                        runner,
                        AddressFamily::V6,
                        &self.config.fping6,
                        &request.addrs,
                    )
                    .await?,
            )
        } else {
            None
        };

        let (flag_v4, flag_v6) = if request.source_ip.is_some() {
            let flag_v4 = if set.v4 {
                session
                    .source_ip_flag(runner, AddressFamily::V4, &self.config.fping)
                    .await
            } else {
                None
            };
            let flag_v6 = if set.v6 {
                session
                    .source_ip_flag(runner, AddressFamily::V6, &self.config.fping6)
                    .await
            } else {
                None
            };
            (flag_v4, flag_v6)
        } else {
            (None, None)
        };

        let v4_covers_v6 = if source_family.is_none() && set.v4 {
            session
                .ipv6_supported(runner, &self.config.fping, &request.addrs[0])
                .await
        } else {
            false
        };

        Ok(SweepPlan {
            min_v4,
            min_v6,
            flag_v4,
            flag_v6,
            v4_covers_v6,
        })
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Capabilities resolved for one sweep.
#[derive(Debug, Clone, Copy)]
struct SweepPlan {
    min_v4: Option<u32>,
    min_v6: Option<u32>,
    flag_v4: Option<SourceIpFlag>,
    flag_v6: Option<SourceIpFlag>,
    v4_covers_v6: bool,
}

impl SweepPlan {
    fn min_interval(&self, family: AddressFamily) -> u32 {
        match family {
            AddressFamily::V4 => self.min_v4,
            AddressFamily::V6 => self.min_v6,
        }
        // Families are only selected for installed binaries, which always
        // have a detected interval by this point.
        .unwrap_or(0)
    }

    fn source_flag(&self, family: AddressFamily) -> Option<SourceIpFlag> {
        match family {
            AddressFamily::V4 => self.flag_v4,
            AddressFamily::V6 => self.flag_v6,
        }
    }
}

/// Staged batch of target addresses, removed from disk on drop.
struct TargetFile {
    path: PathBuf,
}

impl TargetFile {
    async fn stage(tmpdir: &Path, addrs: &[String]) -> Result<Self, SweepError> {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = tmpdir.join(format!("fsweep_{}_{}.targets", std::process::id(), seq));

        let mut contents = String::new();
        for addr in addrs {
            tracing::debug!(%addr, "staging target");
            contents.push_str(addr);
            contents.push('\n');
        }
        tokio::fs::write(&path, contents).await?;
        tracing::debug!(path = %path.display(), targets = addrs.len(), "staged target file");

        Ok(Self { path })
    }
}

impl Drop for TargetFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "could not remove target file");
        }
    }
}

/// Hard execution bound for one pinger run.
///
/// The pinger bounds its own runtime via period and timeout; this only has
/// to catch a wedged subprocess, so it stays generous.
fn sweep_timeout(request: &ProbeRequest) -> Duration {
    let period = if request.interval_ms != 0 {
        request.interval_ms
    } else {
        PINGER_DEFAULT_PERIOD_MS
    };
    let timeout = if request.timeout_ms != 0 {
        request.timeout_ms
    } else {
        PINGER_DEFAULT_TIMEOUT_MS
    };
    let bound =
        u64::from(request.requests_count) * u64::from(period) + u64::from(timeout);
    Duration::from_millis(bound).max(MIN_SWEEP_TIMEOUT)
}
