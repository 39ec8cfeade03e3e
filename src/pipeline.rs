//! End-to-end group comparison
//!
//! [`GroupComparison`] wires the collaborators for one comparison:
//! collect the sample, compute the observed statistic, extend the null
//! distribution, then derive thresholds. Configuration and design are validated
//! before any data is fetched. The thresholds are recorded next to the cache.

use crate::config::InferenceConfig;
use crate::correction::{MultipleComparisonCorrector, ThresholdSet};
use crate::design::{ComparisonContext, DesignSpecification};
use crate::diagnostics::Diagnostic;
use crate::error::Result;
use crate::permutation::{CacheKey, CacheStore, EngineStatus, PermutationEngine, StopFlag};
use crate::sample::{ParticipantTableProvider, Sample, SampleCollector, StorageProvider};
use crate::statistics::{ObservedStatistic, TestStatisticComputer};
use tracing::info;

/// Outcome of one comparison
#[derive(Debug, Clone, PartialEq)]
pub struct GroupResult {
    pub key: CacheKey,
    pub observed: ObservedStatistic,
    pub thresholds: ThresholdSet,
    /// `Interrupted` when thresholds come from a partial null distribution
    pub status: EngineStatus,
    pub diagnostics: Vec<Diagnostic>,
}

impl GroupResult {
    pub fn is_complete(&self) -> bool {
        self.status == EngineStatus::Complete
    }
}

/// One configured comparison pipeline
pub struct GroupComparison<'a> {
    config: InferenceConfig,
    storage: &'a dyn StorageProvider,
    participants: Option<&'a dyn ParticipantTableProvider>,
    cache: &'a dyn CacheStore,
    stop: StopFlag,
}

impl<'a> GroupComparison<'a> {
    pub fn new(
        config: InferenceConfig,
        storage: &'a dyn StorageProvider,
        cache: &'a dyn CacheStore,
    ) -> Self {
        Self {
            config,
            storage,
            participants: None,
            cache,
            stop: StopFlag::new(),
        }
    }

    /// Participant table for regression designs
    pub fn with_participants(mut self, participants: &'a dyn ParticipantTableProvider) -> Self {
        self.participants = Some(participants);
        self
    }

    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Run the comparison for one connectivity descriptor
    pub fn run(&self, spec: &DesignSpecification, ctx: &ComparisonContext) -> Result<GroupResult> {
        self.config.validate()?;
        spec.validate()?;

        info!(
            label = %ctx.label,
            design = %spec.kind(),
            descriptor = %ctx.descriptor,
            "starting group comparison"
        );

        let mut collector = SampleCollector::new(self.storage);
        if let Some(participants) = self.participants {
            collector = collector.with_participants(participants);
        }
        let sample = collector.collect(spec, ctx)?;
        self.run_sample(CacheKey::derive(ctx, spec), &sample)
    }

    /// Run the same design for several connectivity descriptors, in order
    pub fn run_descriptors(
        &self,
        spec: &DesignSpecification,
        ctx: &ComparisonContext,
        descriptors: &[&str],
    ) -> Result<Vec<GroupResult>> {
        descriptors
            .iter()
            .map(|descriptor| self.run(spec, &ctx.for_descriptor(*descriptor)))
            .collect()
    }

    /// Run on an already collected sample under `key`
    pub fn run_sample(&self, key: CacheKey, sample: &Sample) -> Result<GroupResult> {
        self.config.validate()?;
        let computer = TestStatisticComputer::new(sample)?;
        let observed = computer.observed()?;

        let run = PermutationEngine::new(self.cache, &self.config)
            .with_stop_flag(self.stop.clone())
            .run(&key, &computer, &observed)?;

        let thresholds = MultipleComparisonCorrector::new(&self.config).correct(&observed, &run.cache);
        self.cache.record_thresholds(&key, &thresholds)?;
        info!(
            key = %key,
            uncorrected = thresholds.uncorrected_mask.connection_count(),
            fdr = thresholds.fdr_mask.connection_count(),
            fwe = thresholds.fwe_mask.connection_count(),
            "significant connections"
        );

        Ok(GroupResult {
            key,
            observed,
            thresholds,
            status: run.status,
            diagnostics: run.diagnostics,
        })
    }
}
