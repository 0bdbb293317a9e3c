//! `srvpick` — binary entry point.
//!
//! Looks up a service's SRV records, health checks the targets and prints the
//! one to use. With `--watch` it keeps refreshing in the background and prints
//! the current choice on every interval until interrupted.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use srvpick::{Discovery, Endpoint, HealthCheckerFn, Target};
use tokio::time::{interval_at, Instant, Interval};
use tracing::{info, warn};

/// Command-line configuration.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "srvpick",
    version,
    about = "Pick the best healthy target for a DNS SRV service (RFC 2782)"
)]
struct Args {
    /// Service name, without the leading underscore (e.g. `ldap`).
    #[arg(env = "SRVPICK_SERVICE")]
    service: String,

    /// Domain to look the service up in.
    #[arg(env = "SRVPICK_NAME")]
    name: String,

    /// Transport protocol: `tcp` or `udp`.
    #[arg(long, env = "SRVPICK_PROTO", default_value = "tcp")]
    proto: String,

    /// Connection timeout in ms for each health check.
    #[arg(long, env = "SRVPICK_PROBE_TIMEOUT_MS", default_value = "2000")]
    probe_timeout_ms: u64,

    /// Treat every target as healthy instead of connecting to it.
    #[arg(long, env = "SRVPICK_NO_HEALTH_CHECK")]
    no_health_check: bool,

    /// Keep refreshing every N seconds and print the choice each time.
    #[arg(long, env = "SRVPICK_WATCH_SECS")]
    watch: Option<u64>,

    /// Print the whole ranked set instead of only the chosen target.
    #[arg(long)]
    all: bool,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    /// Log level.
    #[arg(long, env = "SRVPICK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format: `json` or `text`.
    #[arg(long, env = "SRVPICK_LOG_FORMAT", default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, &args.log_format);

    let discovery = build_discovery(&args);
    info!(record = %discovery.record_name(), "discovering");

    match args.watch {
        Some(secs) => watch(&discovery, Duration::from_secs(secs), &args).await,
        None => once(&discovery, &args).await,
    }
}

fn build_discovery(args: &Args) -> Discovery {
    let builder = Discovery::builder(&args.service, &args.proto, &args.name)
        .probe_timeout(Duration::from_millis(args.probe_timeout_ms));

    if args.no_health_check {
        builder.health_checker(HealthCheckerFn::new(|_, _, _| async { Ok(true) })).build()
    } else {
        builder.build()
    }
}

async fn once(discovery: &Discovery, args: &Args) -> anyhow::Result<()> {
    discovery
        .refresh()
        .await
        .with_context(|| format!("failed to discover {}", discovery.record_name()))?;
    report_errors(discovery);

    if args.all {
        return print_servers(&discovery.servers(), args.json);
    }
    match discovery.choose() {
        Some(target) => print_target(&target, args.json),
        None => bail!("no healthy target for {}", discovery.record_name()),
    }
}

async fn watch(discovery: &Discovery, interval: Duration, args: &Args) -> anyhow::Result<()> {
    let handle = discovery.refresh_async(interval);
    let mut ticker = print_ticker(interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, stopping");
                break;
            }
            _ = ticker.tick() => {
                report_errors(discovery);
                if args.all {
                    print_servers(&discovery.servers(), args.json)?;
                } else if let Some(target) = discovery.choose() {
                    print_target(&target, args.json)?;
                } else {
                    warn!(record = %discovery.record_name(), "no healthy target");
                }
            }
        }
    }

    handle.stop_and_wait().await;
    report_errors(discovery);
    Ok(())
}

/// Ticks once per `interval`, starting one interval from now so the background
/// refresh has installed its first set before anything is printed.
fn print_ticker(interval: Duration) -> Interval {
    let period = interval.max(Duration::from_millis(1));
    interval_at(Instant::now() + period, period)
}

fn report_errors(discovery: &Discovery) {
    for err in discovery.errors() {
        warn!(error = %err, "discovery error");
    }
}

fn print_target(target: &Target, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(target)?);
    } else {
        println!("{target}");
    }
    Ok(())
}

#[derive(Serialize)]
struct RankedEntry<'a> {
    rank: usize,
    #[serde(flatten)]
    endpoint: &'a Endpoint,
}

fn print_servers(servers: &[Endpoint], json: bool) -> anyhow::Result<()> {
    if json {
        let entries: Vec<_> = servers
            .iter()
            .enumerate()
            .map(|(rank, endpoint)| RankedEntry { rank, endpoint })
            .collect();
        println!("{}", serde_json::to_string(&entries)?);
    } else {
        for (rank, ep) in servers.iter().enumerate() {
            println!("{rank}\t{}\t{}\t{}", ep.priority, ep.weight, ep.target());
        }
    }
    Ok(())
}

/// Initialise `tracing` with the given level and format (`json` or `text`).
/// Logs go to stderr so they never mix with results on stdout.
fn init_tracing(level: &str, format: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}
