//! Idempotent application of decoded events to every tracked owner of a position.

use crate::db::{PositionRecord, Repository};
use crate::domain::{Address, DomainEvent};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{LedgerBalances, LedgerEntry, LedgerError, Valuer};

/// Result of applying one event to one position record.
#[derive(Debug)]
pub enum OwnerOutcome {
    Applied(LedgerEntry),
    /// An entry for the same `(transaction_hash, log_index)` already exists.
    Duplicate,
    Failed(LedgerError),
}

#[derive(Debug)]
pub struct OwnerResult {
    pub position_id: i64,
    pub owner: Address,
    pub outcome: OwnerOutcome,
}

/// Per-owner outcomes of one event. Empty when no record tracks the position.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub results: Vec<OwnerResult>,
}

impl ApplyReport {
    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, OwnerOutcome::Applied(_)))
    }

    pub fn duplicates(&self) -> usize {
        self.count(|o| matches!(o, OwnerOutcome::Duplicate))
    }

    pub fn failures(&self) -> impl Iterator<Item = &OwnerResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, OwnerOutcome::Failed(_)))
    }

    pub fn is_untracked(&self) -> bool {
        self.results.is_empty()
    }

    fn count(&self, pred: impl Fn(&OwnerOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Writes ledger entries for decoded events.
#[derive(Debug, Clone)]
pub struct LedgerApplier {
    repo: Arc<Repository>,
    valuer: Arc<dyn Valuer>,
}

impl LedgerApplier {
    pub fn new(repo: Arc<Repository>, valuer: Arc<dyn Valuer>) -> Self {
        Self { repo, valuer }
    }

    /// Apply `event` to every position record sharing its key.
    ///
    /// Each record is handled independently; a failure for one owner is
    /// reported in the returned `ApplyReport` and never prevents the others.
    ///
    /// # Errors
    /// Returns an error only if the matching records cannot be loaded.
    pub async fn apply(&self, event: &DomainEvent) -> Result<ApplyReport, sqlx::Error> {
        let positions = self.repo.find_positions(&event.position).await?;
        let mut report = ApplyReport::default();

        for position in positions {
            let outcome = match self.apply_to(&position, event).await {
                Ok(outcome) => outcome,
                Err(err) => OwnerOutcome::Failed(err),
            };
            match &outcome {
                OwnerOutcome::Applied(entry) => debug!(
                    position = %event.position,
                    position_id = position.id,
                    event = %entry.event_type,
                    block = entry.block_number,
                    liquidity = %entry.after.liquidity,
                    "Ledger entry applied"
                ),
                OwnerOutcome::Duplicate => debug!(
                    position = %event.position,
                    position_id = position.id,
                    tx = %event.transaction_hash,
                    log_index = event.log_index,
                    "Ledger entry already present"
                ),
                OwnerOutcome::Failed(err) => warn!(
                    position = %event.position,
                    position_id = position.id,
                    owner = %position.owner,
                    block = event.block_number,
                    error = %err,
                    "Failed to apply event"
                ),
            }
            report.results.push(OwnerResult {
                position_id: position.id,
                owner: position.owner,
                outcome,
            });
        }

        Ok(report)
    }

    async fn apply_to(
        &self,
        position: &PositionRecord,
        event: &DomainEvent,
    ) -> Result<OwnerOutcome, LedgerError> {
        if self
            .repo
            .ledger_entry_exists(position.id, &event.transaction_hash, event.log_index)
            .await?
        {
            return Ok(OwnerOutcome::Duplicate);
        }

        let latest = self.repo.latest_ledger_entry(position.id).await?;
        let before = match &latest {
            Some(entry) => {
                // Same key under a different hash means the slot was rewritten without a rollback.
                if event.ordering_key() <= entry.ordering_key() {
                    return Err(LedgerError::OutOfOrder {
                        event: event.ordering_key(),
                        latest: entry.ordering_key(),
                    });
                }
                entry.after
            }
            None => LedgerBalances::opening(position.base_liquidity),
        };

        let after = before.apply(&event.kind, &event.position, self.valuer.as_ref())?;
        let mut entry = LedgerEntry::from_event(position.id, event, before, after)?;

        match self.repo.insert_ledger_entry(&entry).await? {
            Some(id) => {
                entry.id = Some(id);
                Ok(OwnerOutcome::Applied(entry))
            }
            None => Ok(OwnerOutcome::Duplicate),
        }
    }
}
