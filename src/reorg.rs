//! Reorg detection over the stored header window and rollback of derived state.

use crate::chain::ChainClient;
use crate::db::{Repository, RollbackSummary};
use crate::domain::{BlockHeader, BlockNumber, BlockTag, Chain};
use crate::error::ScanError;
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on the backward walk looking for a common ancestor.
pub const MAX_ANCESTOR_SEARCH_DEPTH: u64 = 100;

/// Outcome of comparing stored headers with the canonical chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorgCheck {
    pub has_reorg: bool,
    /// Highest height on which the stored and canonical chains agree.
    pub common_ancestor: Option<BlockNumber>,
    /// Stored blocks above the ancestor.
    pub depth: Option<u64>,
    /// The walk hit `MAX_ANCESTOR_SEARCH_DEPTH`; the ancestor is a best effort.
    pub exhausted: bool,
}

impl ReorgCheck {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct ReorgDetector {
    chain: Chain,
    repo: Arc<Repository>,
    client: Arc<dyn ChainClient>,
}

impl ReorgDetector {
    pub fn new(chain: Chain, repo: Arc<Repository>, client: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            repo,
            client,
        }
    }

    /// Compare every stored header above `boundary` with the canonical block at
    /// the same height, lowest first.
    ///
    /// A height the node cannot serve counts as a mismatch.
    ///
    /// # Errors
    /// Returns an error if the store or the node cannot be read.
    pub async fn detect(&self, boundary: BlockNumber) -> Result<ReorgCheck, ScanError> {
        let stored = self.repo.get_headers_above(&self.chain, boundary).await?;
        let Some(highest) = stored.last().map(|h| h.number) else {
            return Ok(ReorgCheck::none());
        };

        let mut mismatch = None;
        for header in &stored {
            if !self.matches_canonical(header).await? {
                mismatch = Some(header.number);
                break;
            }
        }
        let Some(mismatch) = mismatch else {
            return Ok(ReorgCheck::none());
        };

        let (ancestor, exhausted) = self.find_ancestor(mismatch, boundary).await?;
        if exhausted {
            warn!(
                chain = %self.chain,
                mismatch,
                ancestor,
                max_depth = MAX_ANCESTOR_SEARCH_DEPTH,
                "Common ancestor search exhausted, rolling back to search limit"
            );
        }
        let check = ReorgCheck {
            has_reorg: true,
            common_ancestor: Some(ancestor),
            depth: Some(highest.saturating_sub(ancestor)),
            exhausted,
        };
        info!(
            chain = %self.chain,
            mismatch,
            ancestor,
            depth = highest.saturating_sub(ancestor),
            "Reorg detected"
        );
        Ok(check)
    }

    /// Undo derived state above `ancestor`.
    ///
    /// # Errors
    /// Returns an error if the rollback transaction fails.
    pub async fn rollback(&self, ancestor: BlockNumber) -> Result<RollbackSummary, ScanError> {
        Ok(self.repo.rollback_to(&self.chain, ancestor).await?)
    }

    async fn matches_canonical(&self, stored: &BlockHeader) -> Result<bool, ScanError> {
        let canonical = self
            .client
            .get_block(BlockTag::Number(stored.number))
            .await?;
        Ok(canonical.is_some_and(|c| c.hash.eq_ignore_ascii_case(&stored.hash)))
    }

    /// Walk back from just below `mismatch`. Returns the ancestor and whether
    /// the search bound was hit.
    async fn find_ancestor(
        &self,
        mismatch: BlockNumber,
        boundary: BlockNumber,
    ) -> Result<(BlockNumber, bool), ScanError> {
        let mut height = mismatch.saturating_sub(1);
        for _ in 0..MAX_ANCESTOR_SEARCH_DEPTH {
            if height <= boundary {
                return Ok((height, false));
            }
            let Some(stored) = self.repo.get_header(&self.chain, height).await? else {
                return Ok((height, false));
            };
            if self.matches_canonical(&stored).await? {
                return Ok((height, false));
            }
            height = height.saturating_sub(1);
        }
        Ok((height, true))
    }
}
