//! Permutation loop accumulating the null distribution
//!
//! The engine seeds a cache with the observed extrema, then appends one row per
//! permutation until the cache holds `target + 1` rows. Every row is persisted
//! before the next permutation starts.

use super::cache::{AppendOutcome, CacheKey, CacheStore, NullDistributionCache, NullRow};
use crate::config::InferenceConfig;
use crate::diagnostics::Diagnostic;
use crate::error::{InferenceError, NumericalError, Result};
use crate::statistics::{ObservedStatistic, PermutedStatistic};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows between progress log lines
const PROGRESS_INTERVAL: usize = 100;

/// Golden-ratio increment decorrelating per-permutation seeds
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// RNG for permutation `index` under base seed `seed`
///
/// Each permutation owns its stream, so resuming or extending a cache draws the
/// same permutations an uninterrupted run would.
pub fn permutation_rng(seed: u64, index: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (index as u64).wrapping_mul(SEED_STRIDE))
}

/// Cooperative cancellation shared with the caller
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to stop after the permutation in progress
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No cache loaded yet
    Empty,
    /// Cache holds at least the observed row
    Initialized,
    /// Permutations are being appended
    Accumulating,
    /// Cache holds at least `target + 1` rows
    Complete,
    /// Stopped early on request
    Interrupted,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Complete,
    Interrupted,
}

/// Null distribution after a run, plus what happened on the way
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRun {
    pub cache: NullDistributionCache,
    pub status: EngineStatus,
    /// Permutations computed by this run (excluding reused rows)
    pub computed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Drives permutations for one cache key against a store
pub struct PermutationEngine<'a> {
    store: &'a dyn CacheStore,
    config: &'a InferenceConfig,
    stop: StopFlag,
    state: EngineState,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> PermutationEngine<'a> {
    pub fn new(store: &'a dyn CacheStore, config: &'a InferenceConfig) -> Self {
        Self {
            store,
            config,
            stop: StopFlag::new(),
            state: EngineState::Empty,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        diagnostic.emit();
        self.diagnostics.push(diagnostic);
    }

    /// Extend the cache for `key` to `config.n_permutations + 1` rows
    pub fn run(
        &mut self,
        key: &CacheKey,
        statistic: &dyn PermutedStatistic,
        observed: &ObservedStatistic,
    ) -> Result<EngineRun> {
        self.diagnostics.clear();
        self.state = EngineState::Empty;
        let target = self.config.n_permutations;
        let seed = self.config.seed;
        let key_name = key.to_string();

        if self.config.is_low_permutation_count() {
            self.report(Diagnostic::LowPermutationCount {
                requested: target,
                threshold: self.config.reliability_threshold,
            });
        }

        let (max, min) = observed
            .extrema()
            .ok_or(NumericalError::UndefinedStatistic)?;
        let mut cache = self.initialize(key, NullRow::new(max, min))?;
        self.state = EngineState::Initialized;

        if cache.seed() != seed {
            self.report(Diagnostic::SeedMismatch {
                key: key_name.clone(),
                cached_seed: cache.seed(),
                requested_seed: seed,
            });
        }

        info!(
            key = %key_name,
            rows = cache.len(),
            target_rows = target + 1,
            "starting permutation analysis"
        );

        let mut computed = 0;
        let mut status = EngineStatus::Complete;
        while cache.len() <= target {
            if self.stop.is_stopped() {
                status = EngineStatus::Interrupted;
                break;
            }
            self.state = EngineState::Accumulating;

            let index = cache.len();
            let mut rng = permutation_rng(seed, index);
            let permuted = statistic.permuted_statistic(&mut rng)?;
            let (max, min) = permuted
                .off_diagonal_extrema()
                .ok_or(NumericalError::UndefinedStatistic)?;
            let row = NullRow::new(max, min);

            match self.store.append(key, seed, index, row)? {
                AppendOutcome::Appended => {
                    cache.push(row);
                    computed += 1;
                }
                AppendOutcome::Conflict { .. } => {
                    self.report(Diagnostic::ConcurrentAppend {
                        key: key_name.clone(),
                        row: index,
                    });
                    cache = self.reload(key)?;
                }
            }

            if index % PROGRESS_INTERVAL == 0 {
                debug!(
                    key = %key_name,
                    rows = cache.len(),
                    target_rows = target + 1,
                    "permutation progress"
                );
            }
        }

        if status == EngineStatus::Interrupted {
            self.state = EngineState::Interrupted;
            self.report(Diagnostic::Interrupted {
                rows: cache.len(),
                target_rows: target + 1,
            });
        } else {
            self.state = EngineState::Complete;
        }

        info!(
            key = %key_name,
            rows = cache.len(),
            computed,
            "null distribution ready"
        );

        Ok(EngineRun {
            cache,
            status,
            computed,
            diagnostics: std::mem::take(&mut self.diagnostics),
        })
    }

    /// Load the cache, or seed it with the observed row
    fn initialize(&mut self, key: &CacheKey, observed: NullRow) -> Result<NullDistributionCache> {
        let key_name = key.to_string();
        let recovered = match self.store.load(key) {
            Ok(Some(loaded)) => {
                // the next append truncates the partial line under the store lock
                if loaded.torn_tail {
                    self.report(Diagnostic::TornTailDropped {
                        key: key_name.clone(),
                        rows_kept: loaded.cache.len(),
                    });
                }
                self.report(Diagnostic::CacheResumed {
                    key: key_name,
                    rows: loaded.cache.len(),
                });
                return Ok(loaded.cache);
            }
            Ok(None) => false,
            Err(InferenceError::CacheCorruption(corruption)) => {
                warn!(key = %key_name, error = %corruption, "null distribution cache is corrupt");
                self.report(Diagnostic::CacheRecovered {
                    key: key_name.clone(),
                    reason: corruption.to_string(),
                });
                true
            }
            Err(e) => return Err(e),
        };

        let cache = NullDistributionCache::seeded(self.config.seed, observed);
        if recovered {
            self.store.rewrite(key, &cache)?;
            return Ok(cache);
        }
        match self.store.append(key, self.config.seed, 0, observed)? {
            AppendOutcome::Appended => Ok(cache),
            AppendOutcome::Conflict { .. } => {
                self.report(Diagnostic::ConcurrentAppend { key: key_name, row: 0 });
                self.reload(key)
            }
        }
    }

    fn reload(&self, key: &CacheKey) -> Result<NullDistributionCache> {
        match self.store.load(key)? {
            Some(loaded) => Ok(loaded.cache),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("null distribution {} disappeared during a run", key),
            )
            .into()),
        }
    }
}
