//! fsweep - Batch ICMP Reachability Probing
//!
//! Probes a batch of hosts for ICMP reachability without elevated
//! privileges by delegating the packet exchange to an external
//! fping-compatible pinger and doing the hard part here: probing the
//! installed binary for behavioral quirks (supported flags, minimum safe
//! packet interval, IPv6 capability) with time-cached results, building
//! correct invocations for one or two address families, parsing the
//! version-drifting text output with strict accounting, and reconciling
//! dual-stack runs without double-counting.
//!
//! # Architecture
//!
//! - **Capability**: per-binary quirk detection with a TTL cache
//! - **Command**: per-family argument assembly and family selection
//! - **Parser / Stats**: pure line classification feeding per-host accounting
//! - **Engine**: staging, signal-guarded execution, outcome classification
//!
//! # Example
//!
//! ```rust,no_run
//! use fsweep::{PingerConfig, ProbeRequest, Sweeper};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fsweep::SweepError> {
//!     let sweeper = Sweeper::new(PingerConfig::default());
//!     let request = ProbeRequest::new(vec!["8.8.8.8".to_string()], 3);
//!
//!     for host in sweeper.ping(&request).await? {
//!         println!("{}: {}/{} answered", host.addr, host.received, host.sent);
//!     }
//!     Ok(())
//! }
//! ```

pub mod capability;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod parser;
pub mod runner;
pub mod signal;
pub mod stats;

pub use capability::{CapabilityCache, SourceIpFlag};
pub use clock::{Clock, MockClock, SystemClock};
pub use command::AddressFamily;
pub use config::{AppConfig, ConfigError, PingerConfig};
pub use engine::{ProbeRequest, Sweeper};
pub use error::SweepError;
pub use runner::{ProcessRunner, RunOutcome, ScriptedRunner, SystemRunner};
pub use stats::HostStats;
