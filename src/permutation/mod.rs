// Max-statistic permutation testing
//
// - cache: persistent (max, min) null distribution per comparison key
// - engine: resumable loop extending a cache to the requested permutation count

pub mod cache;
pub mod engine;

pub use cache::{
    AppendOutcome, CacheKey, CacheStore, FileCacheStore, LoadedCache, MemoryCacheStore,
    NullDistributionCache, NullRow, SCHEMA_VERSION,
};
pub use engine::{
    permutation_rng, EngineRun, EngineState, EngineStatus, PermutationEngine, StopFlag,
};
