// =============================================================================
// Stop-loss Engine: Main Entry Point
// =============================================================================
//
// Reads price points from stdin, one per line:
//
//   <price>
//   <price>,<rfc3339 timestamp>
//
// and evaluates them against the strategies listed in the config file
// (`STOPLOSS_CONFIG`, default `stoploss.json`). Every trigger is written to
// stdout as one JSON line. Runs until EOF or Ctrl+C.
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use stoploss_engine::config::{AppConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use stoploss_engine::indicators::{AtrTracker, SmaTracker};
use stoploss_engine::types::{Bar, IndicatorUpdate, PricePoint, TriggerCallback, TriggerEvent};
use stoploss_engine::Manager;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Stop-loss engine — starting up");

    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if config.strategies.is_empty() {
        anyhow::bail!("no strategies configured (config path: {path})");
    }

    // ── 2. Build and register strategies ─────────────────────────────────
    let manager = Manager::new(config.engine.clone())?;

    let callback: TriggerCallback = Arc::new(|event: &TriggerEvent| -> anyhow::Result<()> {
        let line = serde_json::to_string(event).context("failed to encode trigger event")?;
        println!("{line}");
        Ok(())
    });

    for entry in &config.strategies {
        let strategy = entry
            .spec
            .build(Some(callback.clone()))
            .with_context(|| format!("invalid strategy '{}'", entry.name))?;
        manager.register_strategy(entry.name.clone(), strategy)?;
    }

    manager.start()?;

    // ── 3. Indicator feeds ───────────────────────────────────────────────
    let mut atr = AtrTracker::new(config.indicators.atr_period);
    let mut sma = SmaTracker::new(config.indicators.ma_period);
    if atr.is_none() || sma.is_none() {
        warn!(
            atr_period = config.indicators.atr_period,
            ma_period = config.indicators.ma_period,
            "Zero indicator period — that feed is disabled"
        );
    }

    info!(
        strategies = ?manager.strategy_names(),
        "All strategies running. Reading prices from stdin; Ctrl+C to stop."
    );

    // ── 4. Price loop ────────────────────────────────────────────────────
    let read_timeout = config.engine.read_timeout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut accepted: u64 = 0;
    let mut dropped: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Shutdown signal received — stopping gracefully");
                break;
            }
            read = tokio::time::timeout(read_timeout, lines.next_line()) => match read {
                Err(_) => {
                    debug!(timeout_ms = config.engine.read_timeout_ms, "No price within read timeout");
                }
                Ok(Ok(Some(line))) => {
                    let point = match parse_point(&line) {
                        Ok(Some(point)) => point,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(line = %line, error = %e, "Skipping malformed price line");
                            continue;
                        }
                    };

                    if let Some(value) = atr.as_mut().and_then(|t| t.push(Bar::from_tick(point.price))) {
                        manager.broadcast_indicator(IndicatorUpdate::Atr(value));
                    }
                    if let Some(value) = sma.as_mut().and_then(|t| t.push(point.price)) {
                        manager.broadcast_indicator(IndicatorUpdate::MovingAverage(value));
                    }

                    manager.collect(point, |_| dropped += 1)?;
                    accepted += 1;
                }
                Ok(Ok(None)) => {
                    info!("Input closed");
                    break;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    }

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    manager.stop().await;

    for stats in manager.stats() {
        info!(
            strategy = %stats.name,
            kind = %stats.kind,
            active = stats.active,
            evaluated = stats.evaluated,
            triggered = stats.triggered,
            dropped = stats.dropped,
            restarts = stats.restarts,
            errors = stats.errors,
            "Strategy summary"
        );
    }
    info!(accepted, dropped, "Stop-loss engine shut down complete.");
    Ok(())
}

/// Parse `<price>` or `<price>,<rfc3339>`. Blank lines and `#` comments
/// yield `None`.
fn parse_point(line: &str) -> Result<Option<PricePoint>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (price, observed_at) = match line.split_once(',') {
        Some((price, ts)) => {
            let ts = DateTime::parse_from_rfc3339(ts.trim())
                .with_context(|| format!("invalid timestamp '{}'", ts.trim()))?
                .with_timezone(&Utc);
            (price.trim(), ts)
        }
        None => (line, Utc::now()),
    };

    let price = Decimal::from_str(price).with_context(|| format!("invalid price '{price}'"))?;
    if price <= Decimal::ZERO {
        anyhow::bail!("price must be positive, got {price}");
    }
    Ok(Some(PricePoint::new(price, observed_at)))
}
