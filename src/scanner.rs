//! Per-chain scanner: finality, reorg handling and watermark-driven forward sync.

use crate::chain::{ChainClient, LogSource};
use crate::config::ChainConfig;
use crate::db::{Repository, RollbackSummary};
use crate::decoder::{event_topics, Decoded, EventDecoder};
use crate::domain::{
    sort_events, BlockHeader, BlockNumber, BlockTag, Chain, DomainEvent, LogKey, RawLog,
};
use crate::error::ScanError;
use crate::fetcher::{AdaptiveLogFetcher, ChunkPolicy};
use crate::finality::{BoundaryResolver, FinalityCapabilities};
use crate::ledger::{LedgerApplier, Valuer};
use crate::reorg::{ReorgCheck, ReorgDetector};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Starting,
    Polling,
    Stopped,
}

/// What one polling tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub boundary: BlockNumber,
    pub headers_pruned: u64,
    pub reorg: ReorgCheck,
    pub rollback: Option<RollbackSummary>,
    /// Blocks processed this tick, inclusive.
    pub range: Option<(BlockNumber, BlockNumber)>,
    pub logs_fetched: usize,
    pub logs_dropped: usize,
    pub decode_failures: usize,
    pub events_applied: usize,
    pub duplicates: usize,
    pub owner_failures: usize,
    /// First block whose logs disagree with the canonical header; the tick
    /// stops below it and the next tick fetches it again.
    pub stale_block: Option<BlockNumber>,
    pub watermark: BlockNumber,
}

#[derive(Debug)]
pub struct ChainScanner {
    config: ChainConfig,
    repo: Arc<Repository>,
    client: Arc<dyn ChainClient>,
    fetcher: AdaptiveLogFetcher,
    decoder: EventDecoder,
    applier: LedgerApplier,
    reorg: ReorgDetector,
    resolver: BoundaryResolver,
    resume_from_watermark: bool,
    state: ScannerState,
}

impl ChainScanner {
    pub fn new(
        config: ChainConfig,
        repo: Arc<Repository>,
        client: Arc<dyn ChainClient>,
        logs: Arc<dyn LogSource>,
        valuer: Arc<dyn Valuer>,
    ) -> Self {
        let fetcher = AdaptiveLogFetcher::new(
            logs,
            config.position_manager.clone(),
            event_topics(),
            ChunkPolicy::from_config(&config),
        );
        Self {
            decoder: EventDecoder::new(config.chain.clone(), config.protocol.clone()),
            applier: LedgerApplier::new(repo.clone(), valuer),
            reorg: ReorgDetector::new(config.chain.clone(), repo.clone(), client.clone()),
            resolver: BoundaryResolver::new(
                FinalityCapabilities::default(),
                config.confirmations_fallback,
            ),
            fetcher,
            config,
            repo,
            client,
            resume_from_watermark: false,
            state: ScannerState::Starting,
        }
    }

    /// Keep a stored watermark at or below head instead of restarting at head - 1.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume_from_watermark = resume;
        self
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Reset the header window, probe finality tags and place the watermark.
    ///
    /// # Errors
    /// Returns an error if the store or the node cannot be reached; the
    /// scanner stays in `Starting`.
    pub async fn start(&mut self) -> Result<BlockNumber, ScanError> {
        self.state = ScannerState::Starting;
        let chain = self.config.chain.clone();

        let wiped = self.repo.delete_all_headers(&chain).await?;
        let capabilities = FinalityCapabilities::probe(self.client.as_ref()).await;
        self.resolver = BoundaryResolver::new(capabilities, self.config.confirmations_fallback);

        let head = self.client.head().await?.number;
        let stored = self.repo.get_watermark(&chain).await?;
        let watermark = match stored {
            Some(w) if self.resume_from_watermark && w <= head => w,
            _ => head.saturating_sub(1),
        };
        self.repo.set_watermark(&chain, watermark).await?;

        info!(
            chain = %chain,
            head,
            watermark,
            headers_wiped = wiped,
            supports_finalized = capabilities.supports_finalized,
            supports_safe = capabilities.supports_safe,
            "Scanner started"
        );
        self.state = ScannerState::Polling;
        Ok(watermark)
    }

    /// One polling step.
    ///
    /// # Errors
    /// Any upstream or storage failure aborts the tick; blocks already
    /// committed stay committed and the next tick resumes from the watermark.
    pub async fn tick(&mut self) -> Result<TickReport, ScanError> {
        let chain = self.config.chain.clone();
        let mut report = TickReport::default();

        let boundary = self.resolver.resolve(self.client.as_ref()).await?;
        report.boundary = boundary;
        report.headers_pruned = self.repo.prune_headers_at_or_below(&chain, boundary).await?;

        let reorg = self.reorg.detect(boundary).await?;
        report.reorg = reorg;
        if let (true, Some(ancestor)) = (reorg.has_reorg, reorg.common_ancestor) {
            report.rollback = Some(self.reorg.rollback(ancestor).await?);
        }

        let watermark = self
            .repo
            .get_watermark(&chain)
            .await?
            .ok_or_else(|| ScanError::MissingWatermark(chain.to_string()))?;
        report.watermark = watermark;

        let head = self.client.head().await?.number;
        let target = watermark
            .saturating_add(self.config.max_blocks_per_tick)
            .min(head);
        if target <= watermark {
            debug!(chain = %chain, watermark, head, "No new blocks");
            return Ok(report);
        }
        let from = watermark + 1;
        report.range = Some((from, target));

        let mut headers = BTreeMap::new();
        for number in from..=target {
            let header = self
                .client
                .get_block(BlockTag::Number(number))
                .await?
                .ok_or(ScanError::MissingBlock(number))?;
            headers.insert(number, header);
        }

        let fetched = self.fetcher.fetch(from, target).await?;
        report.logs_fetched = fetched.logs.len();
        let stale = first_stale_block(&fetched.logs, &headers);
        if let Some(block) = stale {
            warn!(
                chain = %chain,
                block,
                "Logs reference a non-canonical block hash, deferring block"
            );
        }
        report.stale_block = stale;
        let events = self.decode_logs(fetched.logs, &headers, &mut report);

        let mut by_block: BTreeMap<BlockNumber, Vec<DomainEvent>> = BTreeMap::new();
        for event in events {
            by_block.entry(event.block_number).or_default().push(event);
        }

        for (number, header) in &headers {
            if stale.is_some_and(|s| *number >= s) {
                break;
            }
            for event in by_block.remove(number).unwrap_or_default() {
                let applied = self.applier.apply(&event).await?;
                report.events_applied += applied.applied();
                report.duplicates += applied.duplicates();
                report.owner_failures += applied.failures().count();
            }
            self.store_block(header).await?;
            report.watermark = *number;
        }

        info!(
            chain = %chain,
            boundary,
            from,
            to = target,
            logs = report.logs_fetched,
            applied = report.events_applied,
            duplicates = report.duplicates,
            failures = report.owner_failures,
            chunk_width = self.fetcher.width(),
            "Tick complete"
        );
        Ok(report)
    }

    async fn store_block(&self, header: &BlockHeader) -> Result<(), ScanError> {
        self.repo.insert_header(header).await?;
        self.repo
            .advance_watermark(&self.config.chain, header.number)
            .await?;
        Ok(())
    }

    /// Drop removed and repeated logs, fill timestamps from headers, decode,
    /// and return events in execution order.
    fn decode_logs(
        &self,
        logs: Vec<RawLog>,
        headers: &BTreeMap<BlockNumber, BlockHeader>,
        report: &mut TickReport,
    ) -> Vec<DomainEvent> {
        let mut seen: HashSet<LogKey> = HashSet::new();
        let mut events = Vec::new();

        for mut log in logs {
            if log.removed || !seen.insert(log.key()) {
                report.logs_dropped += 1;
                continue;
            }
            if log.block_timestamp.is_none() {
                log.block_timestamp = headers.get(&log.block_number).map(|h| h.timestamp);
            }
            match self.decoder.decode(&log) {
                Ok(Decoded::Event(event)) => events.push(event),
                Ok(Decoded::Unrecognized) => {
                    debug!(
                        tx = %log.transaction_hash,
                        log_index = log.log_index,
                        "Skipping unrecognized log"
                    );
                }
                Err(err) => {
                    report.decode_failures += 1;
                    warn!(
                        chain = %self.config.chain,
                        block = log.block_number,
                        tx = %log.transaction_hash,
                        log_index = log.log_index,
                        error = %err,
                        "Skipping undecodable log"
                    );
                }
            }
        }

        sort_events(&mut events);
        events
    }

    /// Start, then tick every poll interval until `shutdown` flips to `true`.
    ///
    /// Failed ticks are logged and retried on the next interval. A tick in
    /// progress always completes before the scanner stops.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let due = tokio::select! {
                _ = ticker.tick() => true,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    false
                }
            };
            if *shutdown.borrow() {
                break;
            }
            if !due {
                continue;
            }

            if self.state != ScannerState::Polling {
                if let Err(err) = self.start().await {
                    error!(chain = %self.config.chain, error = %err, "Scanner start failed");
                }
                continue;
            }

            if let Err(err) = self.tick().await {
                error!(chain = %self.config.chain, error = %err, "Tick failed");
            }
        }

        self.state = ScannerState::Stopped;
        info!(chain = %self.config.chain, "Scanner stopped");
    }
}

/// Lowest block with a live log whose block hash differs from the header
/// fetched from the node. Logs without a block hash are trusted.
fn first_stale_block(
    logs: &[RawLog],
    headers: &BTreeMap<BlockNumber, BlockHeader>,
) -> Option<BlockNumber> {
    logs.iter()
        .filter(|log| !log.removed && !log.block_hash.is_empty())
        .filter(|log| {
            headers
                .get(&log.block_number)
                .is_some_and(|h| !h.hash.eq_ignore_ascii_case(&log.block_hash))
        })
        .map(|log| log.block_number)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{position_log, MockChain, MockLogSource};
    use crate::db::init_db;
    use crate::domain::{Address, Decimal, EventKind, PositionKey};
    use crate::ledger::FixedPriceValuer;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config() -> ChainConfig {
        ChainConfig {
            chain: Chain::new("ethereum"),
            chain_id: 1,
            rpc_url: "http://localhost:8545".to_string(),
            position_manager: Address::new("0xc36442b4a4522e871399cd717abdd847ab11fe88"),
            protocol: "uniswap-v3".to_string(),
            confirmations_fallback: 10,
            poll_interval_ms: 1000,
            chunk_min: 1,
            chunk_max: 50,
            target_logs_per_call: 100,
            max_blocks_per_tick: 5,
        }
    }

    async fn setup(
        head: u64,
    ) -> (ChainScanner, MockChain, MockLogSource, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let repo = Arc::new(Repository::new(init_db(&db_path).await.unwrap()));
        let chain = MockChain::new(Chain::new("ethereum"), head);
        let logs = MockLogSource::new();
        let scanner = ChainScanner::new(
            config(),
            repo.clone(),
            Arc::new(chain.clone()),
            Arc::new(logs.clone()),
            Arc::new(FixedPriceValuer::default()),
        );
        (scanner, chain, logs, repo, temp_dir)
    }

    #[tokio::test]
    async fn test_start_places_watermark_below_head() {
        let (mut scanner, _chain, _logs, repo, _temp) = setup(100).await;
        assert_eq!(scanner.state(), ScannerState::Starting);

        assert_eq!(scanner.start().await.unwrap(), 99);
        assert_eq!(scanner.state(), ScannerState::Polling);
        assert_eq!(repo.get_watermark(&Chain::new("ethereum")).await.unwrap(), Some(99));
    }

    #[tokio::test]
    async fn test_resume_keeps_stored_watermark() {
        let (scanner, _chain, _logs, repo, _temp) = setup(100).await;
        repo.set_watermark(&Chain::new("ethereum"), 80).await.unwrap();

        let mut scanner = scanner.with_resume(true);
        assert_eq!(scanner.start().await.unwrap(), 80);
    }

    #[tokio::test]
    async fn test_resume_ignores_watermark_above_head() {
        let (scanner, _chain, _logs, repo, _temp) = setup(100).await;
        repo.set_watermark(&Chain::new("ethereum"), 500).await.unwrap();

        let mut scanner = scanner.with_resume(true);
        assert_eq!(scanner.start().await.unwrap(), 99);
    }

    #[tokio::test]
    async fn test_tick_is_bounded_by_max_blocks() {
        let (mut scanner, chain, _logs, repo, _temp) = setup(100).await;
        scanner.start().await.unwrap();
        chain.extend_to(120);

        let report = scanner.tick().await.unwrap();
        assert_eq!(report.range, Some((100, 104)));
        assert_eq!(report.watermark, 104);
        assert_eq!(repo.get_watermark(&Chain::new("ethereum")).await.unwrap(), Some(104));
        assert!(repo.get_header(&Chain::new("ethereum"), 104).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tick_applies_events_and_skips_removed_logs() {
        let (mut scanner, chain, logs, repo, _temp) = setup(100).await;
        let key = PositionKey {
            chain: Chain::new("ethereum"),
            protocol: "uniswap-v3".to_string(),
            external_id: "5".to_string(),
        };
        let position_id = repo
            .upsert_position(&Address::new("0xowner"), &key, Decimal::zero())
            .await
            .unwrap();
        scanner.start().await.unwrap();
        chain.extend_to(102);

        let contract = config().position_manager;
        let kind = EventKind::IncreaseLiquidity {
            liquidity: 100,
            amount0: 10,
            amount1: 10,
        };
        let hash = chain.hash_at(101).unwrap();
        let log = position_log(&contract, 5, &kind, 101, &hash, "0xt1", 0, 3);
        logs.push_log(log.clone());
        logs.push_log(log);
        let mut removed = position_log(&contract, 5, &kind, 102, "0xgone", "0xt2", 0, 0);
        removed.removed = true;
        logs.push_log(removed);

        let report = scanner.tick().await.unwrap();
        assert_eq!(report.logs_fetched, 3);
        assert_eq!(report.logs_dropped, 2);
        assert_eq!(report.events_applied, 1);

        let entries = repo.query_ledger_entries(position_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].block_timestamp, chain.header_at(101).unwrap().timestamp);
        assert_eq!(entries[0].after.liquidity, Decimal::from(100u64));
    }

    #[tokio::test]
    async fn test_logs_from_orphaned_block_are_deferred() {
        let (mut scanner, chain, logs, repo, _temp) = setup(100).await;
        let key = PositionKey {
            chain: Chain::new("ethereum"),
            protocol: "uniswap-v3".to_string(),
            external_id: "8".to_string(),
        };
        let position_id = repo
            .upsert_position(&Address::new("0xowner"), &key, Decimal::zero())
            .await
            .unwrap();
        scanner.start().await.unwrap();
        chain.extend_to(105);

        let contract = config().position_manager;
        let kind = EventKind::IncreaseLiquidity {
            liquidity: 40,
            amount0: 4,
            amount1: 0,
        };
        logs.push_log(position_log(&contract, 8, &kind, 102, "0xorphanedfork", "0xold", 0, 0));

        let first = scanner.tick().await.unwrap();
        assert_eq!(first.stale_block, Some(102));
        assert_eq!(first.events_applied, 0);
        assert_eq!(first.watermark, 101);
        assert_eq!(repo.get_watermark(&Chain::new("ethereum")).await.unwrap(), Some(101));
        assert!(repo.get_header(&Chain::new("ethereum"), 102).await.unwrap().is_none());
        assert!(repo.query_ledger_entries(position_id).await.unwrap().is_empty());

        // The explorer catches up with the canonical chain.
        logs.remove_logs_above(101);
        let hash = chain.hash_at(102).unwrap();
        logs.push_log(position_log(&contract, 8, &kind, 102, &hash, "0xnew", 0, 0));

        let second = scanner.tick().await.unwrap();
        assert_eq!(second.stale_block, None);
        assert_eq!(second.range, Some((102, 105)));
        assert_eq!(second.events_applied, 1);
        let entries = repo.query_ledger_entries(position_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].transaction_hash, "0xnew");
    }

    #[tokio::test]
    async fn test_logs_without_block_hash_are_trusted() {
        let (mut scanner, chain, logs, _repo, _temp) = setup(100).await;
        scanner.start().await.unwrap();
        chain.extend_to(102);

        let kind = EventKind::IncreaseLiquidity {
            liquidity: 1,
            amount0: 1,
            amount1: 0,
        };
        logs.push_log(position_log(&config().position_manager, 3, &kind, 101, "", "0xt", 0, 0));

        let report = scanner.tick().await.unwrap();
        assert_eq!(report.stale_block, None);
        assert_eq!(report.watermark, 102);
    }

    async fn wait_for_watermark(repo: &Repository, expected: u64) -> bool {
        for _ in 0..300 {
            if repo.get_watermark(&Chain::new("ethereum")).await.unwrap() == Some(expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_run_keeps_polling_after_failed_ticks() {
        let (_scanner, chain, logs, repo, _temp) = setup(100).await;
        let mut scanner = ChainScanner::new(
            ChainConfig {
                poll_interval_ms: 20,
                ..config()
            },
            repo.clone(),
            Arc::new(chain.clone()),
            Arc::new(logs.clone()),
            Arc::new(FixedPriceValuer::default()),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            scanner.run(rx).await;
            scanner.state()
        });
        assert!(wait_for_watermark(&repo, 100).await);

        chain.set_failing(true);
        chain.extend_to(103);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(repo.get_watermark(&Chain::new("ethereum")).await.unwrap(), Some(100));

        chain.set_failing(false);
        logs.fail_next(2);
        assert!(wait_for_watermark(&repo, 103).await);

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), ScannerState::Stopped);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (mut scanner, _chain, _logs, _repo, _temp) = setup(100).await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            scanner.run(rx).await;
            scanner.state()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), ScannerState::Stopped);
    }
}
