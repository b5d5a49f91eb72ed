//! Round Tracker runtime
//!
//! Connects to the configured RPC endpoint, tracks one token and, when a
//! deadline is given, determines the round winner once it passes.
//!
//! Usage:
//!   cargo run --release --bin round_tracker -- --token <MINT> [--deadline <RFC3339>] [--round <ID>]
//!
//! Configuration comes from the environment (see `TrackerConfig::from_env`);
//! `--token` overrides `TOKEN_ADDRESS`.

use chrono::{DateTime, Utc};
use dotenv::dotenv;
use log::{error, info, warn};
use round_tracker::config::TrackerConfig;
use round_tracker::rpc::HttpConnector;
use round_tracker::storage::{open_database, SqliteFeedStore, SqliteRewardLedger, SqliteWatermarkStore};
use round_tracker::winner::{CountdownDeadline, WinnerOutcome};
use round_tracker::tracker::close_round;
use round_tracker::Tracker;
use std::env;
use std::sync::Arc;

struct CliArgs {
    token: Option<String>,
    deadline: Option<DateTime<Utc>>,
    round: Option<String>,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut args = CliArgs {
        token: None,
        deadline: None,
        round: None,
    };

    let mut iter = env::args().skip(1);
    while let Some(flag) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| format!("{} requires a value", flag));
        match flag.as_str() {
            "--token" => args.token = Some(value()?),
            "--round" => args.round = Some(value()?),
            "--deadline" => {
                let raw = value()?;
                let parsed = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| format!("invalid --deadline '{}': {}", raw, e))?;
                args.deadline = Some(parsed.with_timezone(&Utc));
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }

    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = parse_args()?;
    let config = TrackerConfig::from_env()?;

    let Some(token) = args.token.clone().or_else(|| config.token_address.clone()) else {
        error!("❌ No token to track (set TOKEN_ADDRESS or pass --token)");
        return Ok(());
    };

    info!("🚀 Round Tracker");
    info!("   ├─ RPC: {}", config.rpc.endpoint);
    info!("   ├─ Token: {}", token);
    info!("   ├─ Poll interval: {:?} (max {:?})", config.poll.interval, config.poll.max_interval);
    info!("   ├─ Database: {}", config.db_path);
    info!("   └─ Snapshot: {}", config.snapshot_path);

    let conn = open_database(&config.db_path)?;
    let watermarks = Arc::new(SqliteWatermarkStore::new(conn.clone()));
    let feed = Arc::new(SqliteFeedStore::new(conn.clone(), config.store.large_feed_cap));
    let ledger = Arc::new(SqliteRewardLedger::new(conn));
    let connector = Arc::new(HttpConnector {
        commitment: config.rpc.commitment,
        timeout: config.rpc.request_timeout,
    });

    let mut tracker = Tracker::new(config, connector, watermarks, feed, ledger);
    tracker.connect().await?;
    tracker.start_tracking(&token).await?;

    let mut notices = tracker.subscribe_large_transactions().await;
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            info!(
                "🐋 {} {} by {}",
                notice.transaction.kind.as_str(),
                notice.transaction.ui_amount(),
                notice.transaction.trader
            );
        }
    });

    if let Some(target) = args.deadline {
        let deadline = CountdownDeadline::new(target);
        let round = args.round.clone().unwrap_or_else(|| target.to_rfc3339());
        let engine = tracker.winner_engine();
        let poll = tracker.poll_handle().ok_or("poller is not running")?;

        info!("⏳ Round {} closes at {}", round, target);
        tokio::spawn(async move {
            match close_round(&poll, &engine, &round, &deadline).await {
                Ok(WinnerOutcome::Winner { record, reward }) => {
                    info!("🏆 Winner {} ({}), reward id {}", reward.winner, record.signature, reward.id)
                }
                Ok(WinnerOutcome::AlreadyAwarded(reward)) => {
                    info!("Round {} was already awarded to {}", round, reward.winner)
                }
                Ok(WinnerOutcome::NoWinner) => info!("🏁 Round {} has no winner", round),
                Ok(WinnerOutcome::NotReady { remaining }) => {
                    warn!("Round {} not closed yet ({:?} left)", round, remaining)
                }
                Err(e) => error!("❌ Round {} left open, winner determination failed: {}", round, e),
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutting down...");
    tracker.stop_tracking().await?;

    Ok(())
}
