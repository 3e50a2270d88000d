//! Batch VPN/proxy check CLI.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vpn_check::{Config, ErrorKind, VpnChecker, SUSPICION_THRESHOLD};

#[derive(Parser, Debug)]
#[command(name = "vpn-check")]
#[command(about = "Check IP addresses against VPN/proxy reputation providers")]
#[command(version)]
struct Args {
    /// Path to configuration file; defaults apply if it does not exist
    #[arg(short, long, default_value = "vpn-check.yaml")]
    config: PathBuf,

    /// IP addresses to check
    #[arg(value_name = "IP")]
    ips: Vec<String>,

    /// File with one IP address per line
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "warn")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = if args.config.exists() {
        info!(config = %args.config.display(), "Loading configuration");
        Config::load(&args.config)?
    } else {
        Config::default()
    };

    if args.validate {
        config.validate()?;
        info!("Configuration is valid");
        return Ok(());
    }

    let mut ips = args.ips;
    if let Some(path) = &args.file {
        let content = std::fs::read_to_string(path)?;
        ips.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }

    if ips.is_empty() {
        anyhow::bail!("no IP addresses given; pass them as arguments or via --file");
    }

    let checker = VpnChecker::open(config)?;

    println!("Checking {} addresses...", ips.len());
    for ip in &ips {
        match checker.check(ip).await {
            Ok(result) if result.score >= SUSPICION_THRESHOLD => {
                println!("Likely VPN or proxy: {}, score: {}", ip, result.score);
            }
            Ok(result) => {
                info!(ip = %ip, score = result.score, cached = result.cached, "address clean");
            }
            Err(e) if e.kind() == ErrorKind::Quota => {
                // Other addresses in the same quota window cannot succeed
                // either.
                println!("{} could not be checked: {}", ip, e);
                warn!("provider quota exhausted, stopping batch");
                break;
            }
            Err(e) => {
                println!("{} could not be checked: {}", ip, e);
            }
        }
    }

    Ok(())
}
