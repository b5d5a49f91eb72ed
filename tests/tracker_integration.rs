//! End-to-end tracker tests against an in-process ledger double
//!
//! Covered:
//! - watermark resume across restarts (no transaction classified twice)
//! - cadence doubling under rate limiting
//! - non-overlapping cycles when a call outlives the interval
//! - token switch discards the previous watermark before the first poll
//! - round resolution over the large-transaction feed
//! - a final cycle at the deadline catches late buys before the round closes
//! - stop writes the snapshot even when the watermark store is failing

#[cfg(test)]
mod tracker_integration_tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use round_tracker::config::TrackerConfig;
    use round_tracker::error::{PersistenceError, RpcError, TrackerError};
    use round_tracker::reward::RewardLedger;
    use round_tracker::rpc::types::{
        AccountKey, EncodedMessage, EncodedTransaction, TokenBalance, TransactionMeta, UiTokenAmount,
    };
    use round_tracker::rpc::{LedgerRpc, LedgerTransaction, RpcConnector, RpcVersion, SignatureInfo};
    use round_tracker::storage::{
        open_database, SharedConnection, SqliteFeedStore, SqliteRewardLedger, SqliteWatermarkStore,
    };
    use round_tracker::snapshot::load_snapshot;
    use round_tracker::tracker::close_round;
    use round_tracker::watermark::{Watermark, WatermarkStore};
    use round_tracker::winner::{CountdownDeadline, WinnerOutcome};
    use round_tracker::Tracker;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::time::Instant;

    const TOKEN_X: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const TOKEN_Y: &str = "So11111111111111111111111111111111111111112";

    /// Ledger double: current listing per address, optional injected failures
    #[derive(Default)]
    struct FakeLedger {
        listings: Mutex<HashMap<String, Vec<SignatureInfo>>>,
        transactions: Mutex<HashMap<String, LedgerTransaction>>,
        failures: Mutex<VecDeque<RpcError>>,
        listing_delay: Mutex<Option<Duration>>,
        list_calls: Mutex<Vec<(String, Instant)>>,
        fetches: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeLedger {
        /// Add a buy to the front of `mint`'s listing
        fn push_buy(&self, mint: &str, sig: &str, buyer: &str, amount: u64, block_time: i64) {
            self.transactions
                .lock()
                .unwrap()
                .insert(sig.to_string(), buy_tx(mint, buyer, amount, block_time));
            self.listings
                .lock()
                .unwrap()
                .entry(mint.to_string())
                .or_default()
                .insert(0, SignatureInfo::new(sig, Some(block_time)));
        }

        fn fail_next(&self, err: RpcError) {
            self.failures.lock().unwrap().push_back(err);
        }

        fn list_calls_for(&self, mint: &str) -> Vec<Instant> {
            self.list_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(address, _)| address == mint)
                .map(|(_, at)| *at)
                .collect()
        }

        fn fetches(&self) -> Vec<String> {
            self.fetches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LedgerRpc for FakeLedger {
        async fn get_version(&self) -> Result<RpcVersion, RpcError> {
            Ok(RpcVersion {
                solana_core: "2.1.0".to_string(),
                feature_set: Some(1),
            })
        }

        async fn get_signatures_for_address(
            &self,
            address: &str,
            limit: usize,
        ) -> Result<Vec<SignatureInfo>, RpcError> {
            self.list_calls
                .lock()
                .unwrap()
                .push((address.to_string(), Instant::now()));

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            let delay = *self.listing_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let failure = self.failures.lock().unwrap().pop_front();
            if let Some(err) = failure {
                return Err(err);
            }

            let mut listing = self
                .listings
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .unwrap_or_default();
            listing.truncate(limit);
            Ok(listing)
        }

        async fn get_transaction(&self, signature: &str) -> Result<Option<LedgerTransaction>, RpcError> {
            self.fetches.lock().unwrap().push(signature.to_string());
            Ok(self.transactions.lock().unwrap().get(signature).cloned())
        }
    }

    struct FakeConnector(Arc<FakeLedger>);

    impl RpcConnector for FakeConnector {
        fn open(&self, _endpoint: &str) -> Result<Arc<dyn LedgerRpc>, RpcError> {
            Ok(self.0.clone())
        }
    }

    /// Watermark store that starts failing every call once `failing` is set
    struct FlakyWatermarks {
        inner: SqliteWatermarkStore,
        failing: AtomicBool,
    }

    impl FlakyWatermarks {
        fn check(&self) -> Result<(), PersistenceError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(PersistenceError::InvalidData("database is locked".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl WatermarkStore for FlakyWatermarks {
        async fn load(&self, token_address: &str) -> Result<Option<Watermark>, PersistenceError> {
            self.check()?;
            self.inner.load(token_address).await
        }

        async fn save(&self, watermark: &Watermark) -> Result<(), PersistenceError> {
            self.check()?;
            self.inner.save(watermark).await
        }

        async fn compare_and_swap(
            &self,
            expected: Option<&str>,
            watermark: &Watermark,
        ) -> Result<bool, PersistenceError> {
            self.check()?;
            self.inner.compare_and_swap(expected, watermark).await
        }

        async fn clear(&self, token_address: &str) -> Result<(), PersistenceError> {
            self.check()?;
            self.inner.clear(token_address).await
        }
    }

    fn balance(mint: &str, owner: &str, amount: u64) -> TokenBalance {
        TokenBalance {
            account_index: 1,
            mint: mint.to_string(),
            owner: Some(owner.to_string()),
            ui_token_amount: UiTokenAmount {
                amount: amount.to_string(),
                decimals: 6,
                ui_amount: None,
            },
        }
    }

    fn buy_tx(mint: &str, buyer: &str, amount: u64, block_time: i64) -> LedgerTransaction {
        LedgerTransaction {
            slot: 1,
            block_time: Some(block_time),
            meta: Some(TransactionMeta {
                err: None,
                pre_token_balances: Some(vec![balance(mint, "Pool", amount * 10), balance(mint, buyer, 0)]),
                post_token_balances: Some(vec![
                    balance(mint, "Pool", amount * 9),
                    balance(mint, buyer, amount),
                ]),
            }),
            transaction: EncodedTransaction {
                signatures: vec![],
                message: EncodedMessage {
                    account_keys: vec![AccountKey::Plain(buyer.to_string())],
                },
            },
        }
    }

    fn config(dir: &Path) -> TrackerConfig {
        let mut config = TrackerConfig::new("http://127.0.0.1:8899");
        config.poll.interval = Duration::from_secs(5);
        config.poll.max_interval = Duration::from_secs(60);
        config.store.large_tx_threshold = 1;
        config.snapshot_path = dir.join("transactions.json").to_string_lossy().into_owned();
        config.db_path = dir.join("tracker.db").to_string_lossy().into_owned();
        config
    }

    struct Fixture {
        dir: TempDir,
        ledger: Arc<FakeLedger>,
        conn: SharedConnection,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let conn = open_database(dir.path().join("tracker.db")).unwrap();
            Self {
                dir,
                ledger: Arc::new(FakeLedger::default()),
                conn,
            }
        }

        fn tracker(&self) -> Tracker {
            self.tracker_with(self.ledger.clone(), config(self.dir.path()))
        }

        fn tracker_with(&self, ledger: Arc<FakeLedger>, config: TrackerConfig) -> Tracker {
            let cap = config.store.large_feed_cap;
            Tracker::new(
                config,
                Arc::new(FakeConnector(ledger)),
                Arc::new(SqliteWatermarkStore::new(self.conn.clone())),
                Arc::new(SqliteFeedStore::new(self.conn.clone(), cap)),
                Arc::new(SqliteRewardLedger::new(self.conn.clone())),
            )
        }
    }

    #[tokio::test]
    async fn test_start_requires_connection_and_valid_address() {
        let fixture = Fixture::new();
        let mut tracker = fixture.tracker();

        assert!(matches!(
            tracker.start_tracking(TOKEN_X).await,
            Err(TrackerError::NotConnected)
        ));

        tracker.connect().await.unwrap();
        assert!(matches!(
            tracker.start_tracking("definitely not base58").await,
            Err(TrackerError::InvalidAddress(_))
        ));

        tracker.start_tracking(TOKEN_X).await.unwrap();
        assert!(matches!(
            tracker.start_tracking(TOKEN_Y).await,
            Err(TrackerError::AlreadyTracking(_))
        ));
        tracker.stop_tracking().await.unwrap();
        // Idempotent
        tracker.stop_tracking().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resumes_from_watermark() {
        let fixture = Fixture::new();
        fixture.ledger.push_buy(TOKEN_X, "a", "alice", 100, 1_000);
        fixture.ledger.push_buy(TOKEN_X, "b", "bob", 200, 1_010);

        let mut tracker = fixture.tracker();
        tracker.connect().await.unwrap();
        tracker.start_tracking(TOKEN_X).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.stop_tracking().await.unwrap();

        let stored = tracker.stored_watermark(TOKEN_X).await.unwrap().unwrap();
        assert_eq!(stored.signature, "b");
        assert!(fixture.dir.path().join("transactions.json").exists());
        assert_eq!(fixture.ledger.fetches(), vec!["a", "b"]);

        // Fresh tracker over the same database and snapshot
        let ledger = Arc::new(FakeLedger::default());
        ledger.push_buy(TOKEN_X, "a", "alice", 100, 1_000);
        ledger.push_buy(TOKEN_X, "b", "bob", 200, 1_010);
        ledger.push_buy(TOKEN_X, "c", "carol", 300, 1_020);

        let mut tracker = fixture.tracker_with(ledger.clone(), config(fixture.dir.path()));
        tracker.connect().await.unwrap();
        tracker.start_tracking(TOKEN_X).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.stop_tracking().await.unwrap();

        assert_eq!(ledger.fetches(), vec!["c"]);
        let events = tracker.events();
        let events = events.read().await;
        let sigs: Vec<_> = events.log().iter().map(|r| r.signature.as_str()).collect();
        assert_eq!(sigs, vec!["a", "b", "c"]);
        assert_eq!(events.feed().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_doubles_next_delay() {
        let fixture = Fixture::new();
        fixture.ledger.fail_next(RpcError::RateLimited);

        let mut tracker = fixture.tracker();
        tracker.connect().await.unwrap();
        tracker.start_tracking(TOKEN_X).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        tracker.stop_tracking().await.unwrap();

        let calls = fixture.ledger.list_calls_for(TOKEN_X);
        assert!(calls.len() >= 3, "expected at least 3 polls, got {}", calls.len());
        // 5s doubled to 10s after the rate limit, and it stays there
        assert_eq!(calls[1] - calls[0], Duration::from_secs(10));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_never_overlap() {
        let fixture = Fixture::new();
        *fixture.ledger.listing_delay.lock().unwrap() = Some(Duration::from_secs(12));

        let mut tracker = fixture.tracker();
        tracker.connect().await.unwrap();
        tracker.start_tracking(TOKEN_X).await.unwrap();
        tokio::time::sleep(Duration::from_secs(40)).await;
        tracker.stop_tracking().await.unwrap();

        assert_eq!(fixture.ledger.max_in_flight.load(Ordering::SeqCst), 1);

        let calls = fixture.ledger.list_calls_for(TOKEN_X);
        assert!(calls.len() >= 2);
        // Ticks at +5s and +10s fell inside the 12s call and were skipped
        assert_eq!(calls[1] - calls[0], Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_discards_previous_watermark() {
        let fixture = Fixture::new();
        fixture.ledger.push_buy(TOKEN_X, "x1", "alice", 100, 1_000);
        fixture.ledger.push_buy(TOKEN_Y, "y1", "bob", 100, 1_000);

        let mut tracker = fixture.tracker();
        tracker.connect().await.unwrap();
        tracker.start_tracking(TOKEN_X).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(tracker.stored_watermark(TOKEN_X).await.unwrap().is_some());

        tracker.switch_token(TOKEN_Y).await.unwrap();
        assert_eq!(tracker.tracked_token(), Some(TOKEN_Y));
        assert!(tracker.stored_watermark(TOKEN_X).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.stop_tracking().await.unwrap();

        assert_eq!(
            tracker.stored_watermark(TOKEN_Y).await.unwrap().unwrap().signature,
            "y1"
        );
        let events = tracker.events();
        let events = events.read().await;
        let sigs: Vec<_> = events.log().iter().map(|r| r.signature.as_str()).collect();
        assert_eq!(sigs, vec!["y1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_resolves_to_largest_buy_before_deadline() {
        let fixture = Fixture::new();
        fixture.ledger.push_buy(TOKEN_X, "A", "alice", 5, 100);
        fixture.ledger.push_buy(TOKEN_X, "B", "bob", 7, 200);
        fixture.ledger.push_buy(TOKEN_X, "C", "carol", 9, 300);
        fixture.ledger.push_buy(TOKEN_X, "D", "dave", 100, 301);

        let mut tracker = fixture.tracker();
        tracker.connect().await.unwrap();
        tracker.start_tracking(TOKEN_X).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.stop_tracking().await.unwrap();

        let engine = tracker.winner_engine();
        let deadline = CountdownDeadline::new(Utc.timestamp_opt(300, 0).unwrap());
        let after = Utc.timestamp_opt(400, 0).unwrap();

        match engine.determine_winner("round-1", &deadline, after).await.unwrap() {
            WinnerOutcome::Winner { record, reward } => {
                assert_eq!(record.signature, "C");
                assert_eq!(reward.winner, "carol");
                assert_eq!(reward.amount, 100_000);
            }
            other => panic!("expected a winner, got {:?}", other),
        }

        let early = CountdownDeadline::new(Utc.timestamp_opt(50, 0).unwrap());
        assert_eq!(
            engine.determine_winner("round-0", &early, after).await.unwrap(),
            WinnerOutcome::NoWinner
        );

        let ledger = tracker.ledger();
        let reward = ledger.reward_for_round("round-1").await.unwrap().unwrap();
        ledger.claim_reward(reward.id, "claim-sig").await.unwrap();
        assert_eq!(ledger.balance("carol").await.unwrap().points, 100_000);
    }

    fn slow_poll_config(dir: &Path) -> TrackerConfig {
        let mut config = config(dir);
        config.poll.interval = Duration::from_secs(60);
        config.poll.max_interval = Duration::from_secs(60);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_close_polls_for_late_buys() {
        let fixture = Fixture::new();
        let deadline = CountdownDeadline::new(Utc::now() + chrono::Duration::seconds(3));
        let cutoff = deadline.target_time.timestamp();
        fixture.ledger.push_buy(TOKEN_X, "early", "alice", 50, cutoff - 100);

        let mut tracker = fixture.tracker_with(fixture.ledger.clone(), slow_poll_config(fixture.dir.path()));
        tracker.connect().await.unwrap();
        tracker.start_tracking(TOKEN_X).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fixture.ledger.fetches(), vec!["early"]);

        // Confirmed a second before the deadline; next scheduled cycle is a minute out
        fixture.ledger.push_buy(TOKEN_X, "late", "bob", 90, cutoff - 1);

        let poll = tracker.poll_handle().unwrap();
        let engine = tracker.winner_engine();
        match close_round(&poll, &engine, "round-late", &deadline).await.unwrap() {
            WinnerOutcome::Winner { record, reward } => {
                assert_eq!(record.signature, "late");
                assert_eq!(reward.winner, "bob");
            }
            other => panic!("expected a winner, got {:?}", other),
        }

        tracker.stop_tracking().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_stays_open_when_final_cycle_fails() {
        let fixture = Fixture::new();
        let deadline = CountdownDeadline::new(Utc::now() + chrono::Duration::seconds(3));
        fixture
            .ledger
            .push_buy(TOKEN_X, "early", "alice", 50, deadline.target_time.timestamp() - 100);

        let mut tracker = fixture.tracker_with(fixture.ledger.clone(), slow_poll_config(fixture.dir.path()));
        tracker.connect().await.unwrap();
        tracker.start_tracking(TOKEN_X).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        fixture.ledger.fail_next(RpcError::RateLimited);
        let poll = tracker.poll_handle().unwrap();
        let engine = tracker.winner_engine();
        let result = close_round(&poll, &engine, "round-open", &deadline).await;
        assert!(matches!(result, Err(TrackerError::Rpc(RpcError::RateLimited))));
        assert!(tracker.ledger().reward_for_round("round-open").await.unwrap().is_none());

        tracker.stop_tracking().await.unwrap();
        assert!(matches!(tracker.poll_now().await, Err(TrackerError::NotTracking)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_saves_snapshot_when_watermark_flush_fails() {
        let fixture = Fixture::new();
        fixture.ledger.push_buy(TOKEN_X, "a", "alice", 100, 1_000);

        let watermarks = Arc::new(FlakyWatermarks {
            inner: SqliteWatermarkStore::new(fixture.conn.clone()),
            failing: AtomicBool::new(false),
        });
        let config = config(fixture.dir.path());
        let cap = config.store.large_feed_cap;
        let mut tracker = Tracker::new(
            config,
            Arc::new(FakeConnector(fixture.ledger.clone())),
            watermarks.clone(),
            Arc::new(SqliteFeedStore::new(fixture.conn.clone(), cap)),
            Arc::new(SqliteRewardLedger::new(fixture.conn.clone())),
        );
        tracker.connect().await.unwrap();
        tracker.start_tracking(TOKEN_X).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        watermarks.failing.store(true, Ordering::SeqCst);
        let result = tracker.stop_tracking().await;
        assert!(matches!(result, Err(TrackerError::Persistence(_))));
        assert!(tracker.tracked_token().is_none());

        let saved = load_snapshot(TOKEN_X, &fixture.dir.path().join("transactions.json")).unwrap();
        let sigs: Vec<_> = saved.iter().map(|r| r.signature.as_str()).collect();
        assert_eq!(sigs, vec!["a"]);
    }
}
