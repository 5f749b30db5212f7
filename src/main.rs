//! Market-intelligence ingestion pipeline: binary entrypoint.
//!
//! `market-intel-pipeline`           periodic scheduler (interval from admin config)
//! `market-intel-pipeline --once`    one run, then exit
//! `market-intel-pipeline --once --force`  one run bypassing the search cache

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_intel_pipeline::config::load_config_default;
use market_intel_pipeline::metrics::{ensure_metrics_described, install_exporter};
use market_intel_pipeline::{build_pipeline, Orchestrator, Secrets, Store};

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    once: bool,
    force: bool,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args> {
    let mut out = Args::default();
    for a in args {
        match a.as_str() {
            "--once" => out.once = true,
            "--force" => out.force = true,
            other => anyhow::bail!("unknown argument {other:?} (expected --once, --force)"),
        }
    }
    Ok(out)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_intel_pipeline=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env in dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = parse_args(std::env::args().skip(1))?;
    let cfg = load_config_default().context("loading pipeline config")?;
    let secrets = Secrets::from_env();

    match std::env::var("METRICS_ADDR") {
        Ok(addr) => {
            let addr: SocketAddr = addr.parse().context("parsing METRICS_ADDR")?;
            install_exporter(addr)?;
            info!(%addr, "prometheus exporter listening");
        }
        Err(_) => ensure_metrics_described(),
    }

    let store = Store::open(&secrets.database_url)
        .await
        .context("opening database")?;
    let (pipeline, worker) = build_pipeline(store, cfg, &secrets)?;
    let orchestrator = Orchestrator::new(pipeline);

    if args.once {
        let report = orchestrator.run_once(args.force).await?;
        drop(orchestrator);
        // Let queued alerts go out before exiting.
        if let Err(e) = worker.await {
            warn!(error = %e, "notification worker ended abnormally");
        }
        if report.failed() > 0 {
            anyhow::bail!("{} of {} keywords failed", report.failed(), report.keywords.len());
        }
        return Ok(());
    }

    if args.force {
        warn!("--force only applies together with --once; ignoring");
    }
    orchestrator
        .run_scheduler(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c handler failed");
            }
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Result<Args> {
        parse_args(v.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_flags() {
        assert_eq!(args(&[]).unwrap(), Args::default());
        assert_eq!(
            args(&["--once", "--force"]).unwrap(),
            Args {
                once: true,
                force: true
            }
        );
        assert!(args(&["--nope"]).is_err());
    }
}
