use clap::Parser;
use dnssec_chain::analysis::{AnalysisResult, DnssecAnalysis};
use dnssec_chain::config::{ValidatorConfig, parse_resolvers};
use dnssec_chain::dns::client::UdpDnsClient;
use dnssec_chain::dnssec::{ChainVerdict, TrustAnchorStore};
use dnssec_chain::error::AnalysisError;
use futures::future::join_all;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info_span, warn};
use tracing_subscriber::EnvFilter;

/// Validate the DNSSEC chain of trust from the root down to each domain
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Domains to validate
    #[arg(required = true)]
    domains: Vec<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use a local root-anchors.xml instead of downloading it
    #[arg(long)]
    anchors: Option<PathBuf>,

    /// Resolver address (IP or IP:port), may be repeated
    #[arg(short, long = "resolver")]
    resolvers: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let store = match &args.anchors {
        Some(path) => TrustAnchorStore::from_file(path, &config),
        None => match TrustAnchorStore::from_config(&config) {
            Ok(store) => store,
            Err(e) => {
                error!("{}", e);
                return ExitCode::from(2);
            }
        },
    };
    let analysis = DnssecAnalysis::new(
        Arc::new(UdpDnsClient::new(&config)),
        Arc::new(store),
        &config,
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding lookups");
            ctrl_c.cancel();
        }
    });

    let outcomes = join_all(args.domains.iter().map(|domain| {
        let span = info_span!("dnssec", domain = %domain);
        analysis.analyze(domain, span, &cancel)
    }))
    .await;

    let mut exit = ExitCode::SUCCESS;
    let mut results = Vec::new();
    for (domain, outcome) in args.domains.iter().zip(outcomes) {
        match outcome {
            Ok(result) => {
                if result.verdict != ChainVerdict::Secure {
                    exit = ExitCode::from(1);
                }
                results.push(result);
            }
            Err(e @ AnalysisError::InvalidDomain(_)) => {
                error!("{}: {}", domain, e);
                return ExitCode::from(2);
            }
            Err(AnalysisError::Cancelled) => {
                warn!("{}: cancelled", domain);
                exit = ExitCode::from(1);
            }
        }
    }

    if args.json {
        match serde_json::to_string_pretty(&results) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Could not serialise results: {}", e);
                return ExitCode::from(1);
            }
        }
    } else {
        for result in &results {
            print_result(result);
        }
    }

    exit
}

fn load_config(args: &Args) -> Result<ValidatorConfig, dnssec_chain::error::ConfigError> {
    let mut config = match &args.config {
        Some(path) => ValidatorConfig::from_file(path)?,
        None => ValidatorConfig::from_env()?,
    };
    if !args.resolvers.is_empty() {
        config.resolvers = parse_resolvers(&args.resolvers.join(","))?;
    }
    config.validate()?;
    Ok(config)
}

fn print_result(result: &AnalysisResult) {
    println!(
        "{}: {}{}",
        result.domain,
        result.verdict,
        if result.chain_valid { " (chain valid)" } else { "" }
    );
    for link in &result.links {
        let key = link
            .matched_key_tag
            .map(|tag| format!(" key {}", tag))
            .unwrap_or_default();
        println!("  {:<24} {:?}{}", link.zone, link.status, key);
    }
    if result.key_expires_soon {
        match result.nearest_expiry {
            Some(expiry) => println!("  key material expires soon: {}", expiry.to_rfc3339()),
            None => println!("  key material expires soon"),
        }
    }
    for issue in &result.issues {
        println!("  ! {}", issue);
    }
}
