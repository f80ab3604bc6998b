//! Finality boundary: the height at or below which blocks are treated as final.

use crate::chain::{ChainClient, RpcError};
use crate::domain::{BlockNumber, BlockTag};
use tracing::debug;

/// Which finality tags the node answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalityCapabilities {
    pub supports_finalized: bool,
    pub supports_safe: bool,
}

impl FinalityCapabilities {
    /// Ask the node for each tag once. Any failure means "unsupported".
    pub async fn probe(client: &dyn ChainClient) -> Self {
        Self {
            supports_finalized: probe_tag(client, BlockTag::Finalized).await,
            supports_safe: probe_tag(client, BlockTag::Safe).await,
        }
    }
}

async fn probe_tag(client: &dyn ChainClient, tag: BlockTag) -> bool {
    match client.get_block(tag).await {
        Ok(Some(_)) => true,
        Ok(None) => {
            debug!(tag = %tag, "Finality tag returned no block");
            false
        }
        Err(err) => {
            debug!(tag = %tag, error = %err, "Finality tag not supported");
            false
        }
    }
}

/// Resolves the boundary from cached capabilities, falling back to a fixed
/// confirmation depth below head.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryResolver {
    capabilities: FinalityCapabilities,
    confirmations_fallback: u64,
}

impl BoundaryResolver {
    pub fn new(capabilities: FinalityCapabilities, confirmations_fallback: u64) -> Self {
        Self {
            capabilities,
            confirmations_fallback,
        }
    }

    /// Current boundary: `finalized`, else `safe`, else `head - confirmations_fallback`.
    ///
    /// # Errors
    /// Fails only when the head itself cannot be read.
    pub async fn resolve(&self, client: &dyn ChainClient) -> Result<BlockNumber, RpcError> {
        if self.capabilities.supports_finalized {
            if let Some(number) = tagged_number(client, BlockTag::Finalized).await {
                return Ok(number);
            }
        }
        if self.capabilities.supports_safe {
            if let Some(number) = tagged_number(client, BlockTag::Safe).await {
                return Ok(number);
            }
        }
        let head = client.head().await?;
        Ok(head.number.saturating_sub(self.confirmations_fallback))
    }
}

async fn tagged_number(client: &dyn ChainClient, tag: BlockTag) -> Option<BlockNumber> {
    match client.get_block(tag).await {
        Ok(Some(header)) => Some(header.number),
        Ok(None) => None,
        Err(err) => {
            debug!(tag = %tag, error = %err, "Finality tag lookup failed, falling back");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use crate::domain::Chain;

    #[tokio::test]
    async fn test_probe_detects_supported_tags() {
        let chain = MockChain::new(Chain::new("ethereum"), 50).with_safe(Some(45));
        let caps = FinalityCapabilities::probe(&chain).await;
        assert!(!caps.supports_finalized);
        assert!(caps.supports_safe);
    }

    #[tokio::test]
    async fn test_finalized_preferred_without_touching_safe() {
        let chain = MockChain::new(Chain::new("ethereum"), 120)
            .with_finalized(Some(100))
            .with_safe(Some(110));
        let resolver = BoundaryResolver::new(
            FinalityCapabilities {
                supports_finalized: true,
                supports_safe: true,
            },
            64,
        );

        assert_eq!(resolver.resolve(&chain).await.unwrap(), 100);
        assert_eq!(chain.calls(), vec![BlockTag::Finalized]);
    }

    #[tokio::test]
    async fn test_safe_used_when_finalized_fails() {
        let chain = MockChain::new(Chain::new("ethereum"), 120).with_safe(Some(110));
        let resolver = BoundaryResolver::new(
            FinalityCapabilities {
                supports_finalized: true,
                supports_safe: true,
            },
            64,
        );
        assert_eq!(resolver.resolve(&chain).await.unwrap(), 110);
    }

    #[tokio::test]
    async fn test_fallback_depth_below_head() {
        let chain = MockChain::new(Chain::new("ethereum"), 1000);
        let resolver = BoundaryResolver::new(FinalityCapabilities::default(), 20);
        assert_eq!(resolver.resolve(&chain).await.unwrap(), 980);
        assert_eq!(chain.calls(), vec![BlockTag::Latest]);
    }

    #[tokio::test]
    async fn test_fallback_saturates_at_genesis() {
        let chain = MockChain::new(Chain::new("ethereum"), 5);
        let resolver = BoundaryResolver::new(FinalityCapabilities::default(), 64);
        assert_eq!(resolver.resolve(&chain).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_head_failure_is_error() {
        let chain = MockChain::new(Chain::new("ethereum"), 5);
        chain.set_failing(true);
        let resolver = BoundaryResolver::new(FinalityCapabilities::default(), 1);
        assert!(resolver.resolve(&chain).await.is_err());
    }
}
