use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use reqwest::{Method, Url};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use httpthrottle::config::ThrottleConfig;
use httpthrottle::ratelimit::Context;
use httpthrottle::transport::TransportError;

/// Send GET requests through a throttling policy and report what happened.
#[derive(Debug, Parser)]
#[command(name = "httpthrottle", version)]
struct Args {
    /// YAML throttling policy; without one every request is admitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// URL to request
    #[arg(short, long)]
    url: Url,

    /// Number of requests to issue
    #[arg(short = 'n', long, default_value_t = 10)]
    requests: u32,

    /// Deadline for the whole run in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    sent: u32,
    throttled: u32,
    failed: u32,
    interrupted: bool,
    elapsed_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("httpthrottle={}", args.log_level))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(ref path) => ThrottleConfig::from_file(path)?,
        None => ThrottleConfig::default(),
    };
    let transport = config.build_transport()?;

    let root = match args.timeout_ms {
        Some(ms) => Context::background().with_timeout(Duration::from_millis(ms)),
        None => Context::background(),
    };
    let shutdown = root.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    info!(url = %args.url, requests = args.requests, "Sending requests");

    let started = Instant::now();
    let mut summary = Summary::default();

    for i in 0..args.requests {
        let request = reqwest::Request::new(Method::GET, args.url.clone());

        match transport.execute(&root, request).await {
            Ok(response) => {
                summary.sent += 1;
                info!(request = i, status = %response.status(), "Request sent");
            }
            Err(err) if err.is_quota_exceeded() => {
                summary.throttled += 1;
                warn!(request = i, "Quota exceeded, request not sent");
            }
            Err(TransportError::Throttled(err)) if err.is_context_error() => {
                info!(request = i, error = %err, "Stopped waiting for admission");
            }
            Err(err) => {
                summary.failed += 1;
                warn!(request = i, error = %err, "Request failed");
            }
        }

        if root.is_done() {
            summary.interrupted = true;
            break;
        }
    }

    summary.elapsed_ms = started.elapsed().as_millis() as u64;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "sent={} throttled={} failed={} interrupted={} elapsed={}ms",
            summary.sent, summary.throttled, summary.failed, summary.interrupted, summary.elapsed_ms
        );
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling outstanding requests");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling outstanding requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "httpthrottle",
            "--url",
            "http://localhost:8080/",
            "-n",
            "3",
            "--json",
        ])
        .unwrap();

        assert_eq!(args.requests, 3);
        assert!(args.json);
        assert!(args.config.is_none());
        assert_eq!(args.url.as_str(), "http://localhost:8080/");
    }

    #[test]
    fn test_args_require_url() {
        assert!(Args::try_parse_from(["httpthrottle"]).is_err());
    }
}
