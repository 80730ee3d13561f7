//! fsweep Binary Entry Point
//!
//! Command-line front end for the sweep engine. Core functionality is
//! provided by the `fsweep` library crate.

use clap::Parser;
use fsweep::{AppConfig, ProbeRequest, Sweeper};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// fsweep - batch ICMP reachability probing via an external pinger
#[derive(Parser, Debug)]
#[command(name = "fsweep", version, about, long_about = None)]
struct Cli {
    /// Target addresses (IPv4/IPv6 literals); may also come from the config file
    targets: Vec<String>,

    /// Path to configuration file
    #[arg(short, long, env = "FSWEEP_CONFIG")]
    config: Option<String>,

    /// Echo requests per target
    #[arg(short = 'C', long)]
    count: Option<u32>,

    /// Interval between packets to one target, milliseconds
    #[arg(short = 'p', long)]
    period: Option<u32>,

    /// Payload size in bytes
    #[arg(short = 'b', long)]
    size: Option<u32>,

    /// Per-target initial timeout, milliseconds
    #[arg(short = 't', long)]
    timeout: Option<u32>,

    /// Treat redirected responses as the target being up
    #[arg(long)]
    allow_redirect: bool,

    /// Explicit source address
    #[arg(short = 'S', long)]
    source_ip: Option<std::net::IpAddr>,

    /// IPv4 pinger binary (overrides config file)
    #[arg(long, env = "FSWEEP_FPING")]
    fping: Option<std::path::PathBuf>,

    /// IPv6 pinger binary (overrides config file)
    #[arg(long, env = "FSWEEP_FPING6")]
    fping6: Option<std::path::PathBuf>,

    /// Staging directory for target files
    #[arg(long, env = "FSWEEP_TMPDIR")]
    tmpdir: Option<std::path::PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,fsweep=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration file when given, then apply overrides
    // (CLI > ENV > config file).
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    if !cli.targets.is_empty() {
        config.targets = cli.targets.clone();
    }
    if let Some(count) = cli.count {
        config.requests = count;
    }
    if let Some(period) = cli.period {
        config.period = Some(std::time::Duration::from_millis(u64::from(period)));
    }
    if let Some(size) = cli.size {
        config.size = Some(size);
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = Some(std::time::Duration::from_millis(u64::from(timeout)));
    }
    if cli.allow_redirect {
        config.allow_redirect = true;
    }
    if let Some(source_ip) = cli.source_ip {
        config.source_ip = Some(source_ip);
    }

    if let Some(fping) = cli.fping {
        config.pinger.fping = fping;
    }
    if let Some(fping6) = cli.fping6 {
        config.pinger.fping6 = fping6;
    }
    if let Some(tmpdir) = cli.tmpdir {
        config.pinger.tmpdir = tmpdir;
    }

    config.validate()?;
    if config.targets.is_empty() {
        return Err("no targets given; pass addresses or a config file".into());
    }

    let mut request = ProbeRequest::new(config.targets.clone(), config.requests)
        .with_allow_redirect(config.allow_redirect);
    if let Some(period) = config.period {
        request = request.with_interval_ms(period.as_millis() as u32);
    }
    if let Some(size) = config.size {
        request = request.with_size_bytes(size);
    }
    if let Some(timeout) = config.timeout {
        request = request.with_timeout_ms(timeout.as_millis() as u32);
    }
    if let Some(source_ip) = config.source_ip {
        request = request.with_source_ip(source_ip);
    }

    let sweeper = Sweeper::new(config.pinger.clone());
    let stats = match sweeper.ping(&request).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!(code = e.code(), "{e}");
            return Err(e.into());
        }
    };

    if cli.json {
        let records: Vec<serde_json::Value> = stats
            .iter()
            .map(|host| {
                serde_json::json!({
                    "addr": host.addr,
                    "sent": host.sent,
                    "received": host.received,
                    "loss": host.loss(),
                    "min_sec": (host.received > 0).then_some(host.min),
                    "avg_sec": host.avg(),
                    "max_sec": (host.received > 0).then_some(host.max),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for host in &stats {
            match host.avg() {
                Some(avg) => println!(
                    "{:<40} sent {:>3}  recv {:>3}  loss {:>5.1}%  min/avg/max {:.2}/{:.2}/{:.2} ms",
                    host.addr,
                    host.sent,
                    host.received,
                    host.loss() * 100.0,
                    host.min * 1000.0,
                    avg * 1000.0,
                    host.max * 1000.0,
                ),
                None => println!(
                    "{:<40} sent {:>3}  recv {:>3}  loss {:>5.1}%  unreachable",
                    host.addr,
                    host.sent,
                    host.received,
                    host.loss() * 100.0,
                ),
            }
        }
    }

    Ok(())
}
