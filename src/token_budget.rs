//! Token counting and budget decisions.
//!
//! The planner never counts fragments: every estimate is taken on the fully
//! rendered candidate text (header, breadcrumb and payload), so what fits here
//! is exactly what gets emitted.

use crate::config::ChunkingConfig;
use crate::errors::{ChunkerError, Result};
use crate::utils::cache::{CacheStats, TokenCountCache};
use tracing::debug;

/// Model-specific token counting capability
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> Result<usize>;
}

/// Roughly four characters per token
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(text.chars().count().div_ceil(4))
    }
}

/// One token per whitespace-separated word
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceCounter;

impl TokenCounter for WhitespaceCounter {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(text.split_whitespace().count())
    }
}

/// Memoizes another counter; failures are never cached
pub struct CachedCounter<C: TokenCounter> {
    inner: C,
    cache: TokenCountCache,
}

impl<C: TokenCounter> CachedCounter<C> {
    pub fn new(inner: C, capacity: usize) -> Self {
        Self {
            inner,
            cache: TokenCountCache::new(capacity),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl<C: TokenCounter> TokenCounter for CachedCounter<C> {
    fn count(&self, text: &str) -> Result<usize> {
        if let Some(count) = self.cache.get_count(text) {
            return Ok(count);
        }
        let count = self.inner.count(text)?;
        self.cache.store_count(text, count);
        Ok(count)
    }
}

/// Token count of one rendered candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Estimate {
    pub tokens: usize,
    /// Why the counter could not be used, when the heuristic fallback was taken
    pub fallback_reason: Option<String>,
}

impl Estimate {
    pub fn is_estimated(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Conservative character heuristic: `ceil(chars / 4 × 1.25)`
pub fn fallback_estimate(text: &str) -> usize {
    let chars = text.chars().count();
    (chars * 5).div_ceil(16)
}

/// Budget arithmetic over an injected [`TokenCounter`]
pub struct TokenBudgetPlanner<'a> {
    counter: &'a dyn TokenCounter,
    budget: usize,
    merge_threshold: usize,
    hard_ceiling: usize,
}

impl<'a> TokenBudgetPlanner<'a> {
    pub fn new(counter: &'a dyn TokenCounter, config: &ChunkingConfig) -> Self {
        let budget = config.target_token_budget;
        Self {
            counter,
            budget,
            merge_threshold: (budget as f64 * config.min_merge_threshold_fraction).floor() as usize,
            hard_ceiling: config.hard_ceiling(),
        }
    }

    /// Count `text`, falling back to the character heuristic when the counter fails
    pub fn estimate(&self, text: &str) -> Estimate {
        match self.counter.count(text) {
            Ok(tokens) => Estimate {
                tokens,
                fallback_reason: None,
            },
            Err(e) => {
                let reason = match e {
                    ChunkerError::TokenCountUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                let tokens = fallback_estimate(text);
                debug!(tokens, "Token counter failed, using heuristic: {}", reason);
                Estimate {
                    tokens,
                    fallback_reason: Some(reason),
                }
            }
        }
    }

    pub fn fits(&self, estimate: &Estimate) -> bool {
        estimate.tokens <= self.budget
    }

    pub fn within_ceiling(&self, estimate: &Estimate) -> bool {
        estimate.tokens <= self.hard_ceiling
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Units below this many tokens are merged with undersized siblings
    pub fn min_merge_threshold(&self) -> usize {
        self.merge_threshold
    }

    pub fn hard_ceiling(&self) -> usize {
        self.hard_ceiling
    }
}
